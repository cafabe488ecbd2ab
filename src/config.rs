use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigError;
use crate::sandbox::{DEFAULT_ENV_PROGRAM, DEFAULT_PROPAGATE, DEFAULT_SHELL, SandboxPolicy};

pub const CONFIG_VERSION: u32 = 1;
pub const DEFAULT_HARNESS: &str = "bats";
pub const DEFAULT_JOBS: usize = 4;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CiConfig {
    pub version: u32,
    /// Resolved executable locations, keyed by the program name checks use.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub tools: IndexMap<String, PathBuf>,
    #[serde(default)]
    pub harness: HarnessSpec,
    #[serde(default)]
    pub sandbox: SandboxSpec,
    #[serde(default)]
    pub checks: CheckEntries,
}

impl CiConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;
        let config = Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse configuration YAML: {}", path.display()))?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn to_yaml_string(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessSpec {
    #[serde(default = "default_harness_program")]
    pub program: PathBuf,
    #[serde(default = "default_jobs")]
    pub jobs: usize,
}

impl Default for HarnessSpec {
    fn default() -> Self {
        Self {
            program: default_harness_program(),
            jobs: default_jobs(),
        }
    }
}

fn default_harness_program() -> PathBuf {
    PathBuf::from(DEFAULT_HARNESS)
}

fn default_jobs() -> usize {
    DEFAULT_JOBS
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxSpec {
    #[serde(default = "default_env_program")]
    pub env_program: PathBuf,
    #[serde(default = "default_shell")]
    pub shell: PathBuf,
    #[serde(default = "default_propagate")]
    pub propagate: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub set: IndexMap<String, String>,
}

impl Default for SandboxSpec {
    fn default() -> Self {
        Self {
            env_program: default_env_program(),
            shell: default_shell(),
            propagate: default_propagate(),
            set: IndexMap::new(),
        }
    }
}

impl SandboxSpec {
    pub fn to_policy(&self) -> Result<SandboxPolicy, ConfigError> {
        let mut policy = SandboxPolicy::empty(&self.env_program, &self.shell);
        for name in &self.propagate {
            policy = policy.propagate(name).map_err(ConfigError::InvalidSandbox)?;
        }
        for (name, value) in &self.set {
            policy = policy.set(name, value).map_err(ConfigError::InvalidSandbox)?;
        }
        if let Some(name) = policy.conflicts().first() {
            return Err(ConfigError::ConflictingSandboxVariable(name.to_string()));
        }
        Ok(policy)
    }
}

fn default_env_program() -> PathBuf {
    PathBuf::from(DEFAULT_ENV_PROGRAM)
}

fn default_shell() -> PathBuf {
    PathBuf::from(DEFAULT_SHELL)
}

fn default_propagate() -> Vec<String> {
    DEFAULT_PROPAGATE.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CheckSpec {
    pub description: String,
    /// Opt out of the environment reset for this check only.
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub sandbox: bool,
    /// The check writes into the repository checkout.
    #[serde(default, skip_serializing_if = "is_false")]
    pub mutates_checkout: bool,
    #[serde(default)]
    pub commands: Vec<OperationSpec>,
}

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// One entry of a check's `commands` list. Exactly one key must be present.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OperationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<IndexMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathBuf>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all: Option<Vec<Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fresh: Option<FreshnessSpec>,
}

impl OperationSpec {
    pub fn run<S: Into<String>>(argv: impl IntoIterator<Item = S>) -> Self {
        Self {
            run: Some(argv.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn env<'a>(vars: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            env: Some(
                vars.into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    pub fn fresh<S: Into<String>>(
        generate: impl IntoIterator<Item = S>,
        paths: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            fresh: Some(FreshnessSpec {
                generate: generate.into_iter().map(Into::into).collect(),
                paths: paths.into_iter().map(Into::into).collect(),
            }),
            ..Self::default()
        }
    }

    pub fn kinds(&self) -> Vec<OperationKind<'_>> {
        let mut kinds = Vec::new();
        if let Some(argv) = &self.run {
            kinds.push(OperationKind::Run(argv));
        }
        if let Some(dir) = &self.cd {
            kinds.push(OperationKind::Cd(dir));
        }
        if let Some(vars) = &self.env {
            kinds.push(OperationKind::Env(vars));
        }
        if let Some(dirs) = &self.path {
            kinds.push(OperationKind::Path(dirs));
        }
        if let Some(commands) = &self.all {
            kinds.push(OperationKind::All(commands));
        }
        if let Some(fresh) = &self.fresh {
            kinds.push(OperationKind::Fresh(fresh));
        }
        kinds
    }
}

#[derive(Debug, Clone, Copy)]
pub enum OperationKind<'a> {
    Run(&'a [String]),
    Cd(&'a Path),
    Env(&'a IndexMap<String, String>),
    Path(&'a [PathBuf]),
    All(&'a [Vec<String>]),
    Fresh(&'a FreshnessSpec),
}

impl OperationKind<'_> {
    pub fn key(&self) -> &'static str {
        match self {
            OperationKind::Run(_) => "run",
            OperationKind::Cd(_) => "cd",
            OperationKind::Env(_) => "env",
            OperationKind::Path(_) => "path",
            OperationKind::All(_) => "all",
            OperationKind::Fresh(_) => "fresh",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FreshnessSpec {
    pub generate: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
}

/// The `checks` mapping in document order. Repeated keys are kept so that
/// registry construction can reject them instead of the later one silently
/// replacing the earlier.
#[derive(Debug, Clone, Default)]
pub struct CheckEntries(pub Vec<(String, CheckSpec)>);

impl CheckEntries {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CheckSpec)> {
        self.0.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, name: impl Into<String>, spec: CheckSpec) {
        self.0.push((name.into(), spec));
    }
}

impl<'de> Deserialize<'de> for CheckEntries {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = CheckEntries;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a mapping from check name to check definition")
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CheckEntries::default())
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, spec)) = map.next_entry::<String, CheckSpec>()? {
                    entries.push((name, spec));
                }
                Ok(CheckEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

impl Serialize for CheckEntries {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, spec) in &self.0 {
            map.serialize_entry(name, spec)?;
        }
        map.end()
    }
}
