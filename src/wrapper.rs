
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::compile::{CompiledSuite, compile, environment_reset, quote};
use crate::config::CiConfig;
use crate::error::ConfigError;
use crate::registry::build_registry;
use crate::sandbox::SandboxPolicy;

pub const SUITE_FILE_NAME: &str = "suite.bats";
pub const WRAPPER_FILE_NAME: &str = "run-checks";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessInvocation {
    pub program: PathBuf,
    pub jobs: usize,
    pub policy: SandboxPolicy,
}

impl HarnessInvocation {
    pub fn from_config(config: &CiConfig) -> Result<Self, ConfigError> {
        if config.harness.jobs == 0 {
            return Err(ConfigError::ZeroJobs);
        }
        Ok(Self {
            program: config.harness.program.clone(),
            jobs: config.harness.jobs,
            policy: config.sandbox.to_policy()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executable {
    script: String,
}

impl Executable {
    pub fn as_str(&self) -> &str {
        &self.script
    }
}

/// The script `exec`s the harness, so its exit status is the harness's.
pub fn wrap(suite_path: &Path, invocation: &HarnessInvocation) -> Executable {
    let mut words = environment_reset(&invocation.policy);
    words.push(quote(&invocation.program.to_string_lossy()));
    words.push("--jobs".to_string());
    words.push(invocation.jobs.to_string());
    words.push(quote(&suite_path.to_string_lossy()));

    let script = format!(
        "#!/bin/sh\n# Generated by ci-suite. Do not edit.\nexec {}\n",
        words.join(" ")
    );
    Executable { script }
}

#[derive(Debug, Clone)]
pub struct Artifacts {
    pub suite: PathBuf,
    pub executable: PathBuf,
}

pub fn write_artifacts(
    out_dir: &Path,
    suite: &CompiledSuite,
    invocation: &HarnessInvocation,
) -> Result<Artifacts> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory: {}", out_dir.display()))?;
    let out_dir = out_dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve output directory: {}", out_dir.display()))?;

    let suite_path = out_dir.join(SUITE_FILE_NAME);
    fs::write(&suite_path, suite.as_str())
        .with_context(|| format!("Failed to write compiled suite: {}", suite_path.display()))?;

    let executable = wrap(&suite_path, invocation);
    let executable_path = out_dir.join(WRAPPER_FILE_NAME);
    fs::write(&executable_path, executable.as_str()).with_context(|| {
        format!("Failed to write wrapper script: {}", executable_path.display())
    })?;
    make_executable(&executable_path)?;

    info!(
        suite = %suite_path.display(),
        executable = %executable_path.display(),
        jobs = invocation.jobs,
        "Harness artifacts written"
    );

    Ok(Artifacts {
        suite: suite_path,
        executable: executable_path,
    })
}

/// Nothing is written unless the registry and the suite were both produced.
pub fn generate(config: &CiConfig, out_dir: &Path) -> Result<Artifacts> {
    let registry = build_registry(config)?;
    let suite = compile(&registry)?;
    let invocation = HarnessInvocation::from_config(config)?;
    write_artifacts(out_dir, &suite, &invocation)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)
        .with_context(|| format!("Failed to read permissions: {}", path.display()))?
        .permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions)
        .with_context(|| format!("Failed to mark executable: {}", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
