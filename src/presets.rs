use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexMap;

use crate::config::{
    CONFIG_VERSION, CheckEntries, CheckSpec, CiConfig, HarnessSpec, OperationSpec, SandboxSpec,
};

pub const PRESETS: [&str; 2] = ["rust", "minimal"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresetOutcome {
    Written(PathBuf),
    /// The destination already existed and was left alone.
    Skipped(PathBuf),
}

pub fn preset_config(name: &str) -> Result<CiConfig> {
    match name {
        "rust" => Ok(rust_preset()),
        "minimal" => Ok(minimal_preset()),
        other => anyhow::bail!(
            "Unknown preset '{other}'. Available presets: {}",
            PRESETS.join(", ")
        ),
    }
}

/// Writes the named starter configuration to `destination` unless the file
/// exists and `force` is not set.
pub fn generate_preset(name: &str, destination: &Path, force: bool) -> Result<PresetOutcome> {
    let preset = preset_config(name)?;
    if destination.exists() && !force {
        return Ok(PresetOutcome::Skipped(destination.to_path_buf()));
    }

    let rendered = preset.to_yaml_string()?;
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(destination, rendered)
        .with_context(|| format!("Failed to write configuration: {}", destination.display()))?;

    Ok(PresetOutcome::Written(destination.to_path_buf()))
}

fn rust_preset() -> CiConfig {
    let mut checks = CheckEntries::default();
    checks.push(
        "fmt",
        check(
            "cargo fmt reports no changes",
            vec![OperationSpec::run(["cargo", "fmt", "--all", "--", "--check"])],
        ),
    );
    checks.push(
        "clippy",
        check(
            "clippy reports no warnings",
            vec![OperationSpec::run([
                "cargo",
                "clippy",
                "--all-targets",
                "--",
                "-D",
                "warnings",
            ])],
        ),
    );
    checks.push(
        "lockfile",
        CheckSpec {
            sandbox: false,
            mutates_checkout: true,
            ..check(
                "Cargo.lock is up to date",
                vec![OperationSpec::fresh(
                    ["cargo", "generate-lockfile", "--offline"],
                    ["Cargo.lock"],
                )],
            )
        },
    );
    checks.push(
        "test",
        check(
            "cargo test passes",
            vec![
                OperationSpec::env([("RUST_BACKTRACE", "1")]),
                OperationSpec::run(["cargo", "test", "--all-targets"]),
            ],
        ),
    );

    let mut sandbox = SandboxSpec::default();
    sandbox
        .propagate
        .extend(["CARGO_HOME", "RUSTUP_HOME"].map(String::from));
    sandbox
        .set
        .insert("CARGO_TERM_COLOR".to_string(), "never".to_string());

    CiConfig {
        version: CONFIG_VERSION,
        tools: IndexMap::new(),
        harness: HarnessSpec::default(),
        sandbox,
        checks,
    }
}

fn minimal_preset() -> CiConfig {
    let mut checks = CheckEntries::default();
    checks.push(
        "test",
        check("tests pass", vec![OperationSpec::run(["make", "test"])]),
    );
    CiConfig {
        version: CONFIG_VERSION,
        tools: IndexMap::new(),
        harness: HarnessSpec::default(),
        sandbox: SandboxSpec::default(),
        checks,
    }
}

fn check(description: &str, commands: Vec<OperationSpec>) -> CheckSpec {
    CheckSpec {
        description: description.to_string(),
        sandbox: true,
        mutates_checkout: false,
        commands,
    }
}
