use indexmap::IndexMap;
use indexmap::map::Entry;
use tracing::debug;

use crate::config::{
    CONFIG_VERSION, CheckSpec, CiConfig, FreshnessSpec, OperationKind, OperationSpec,
};
use crate::error::{ConfigError, OperationError};
use crate::operation::{CommandSequence, Operation, SequenceBuilder};
use crate::sandbox::{SandboxPolicy, sandbox};

/// Program that compares regenerated files against the checkout.
pub const VCS_PROGRAM: &str = "git";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: String,
    pub description: String,
    pub sequence: CommandSequence,
    pub sandboxed: bool,
    pub mutates_checkout: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CheckRegistry {
    checks: IndexMap<String, Check>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The harness derives each test's identity from its description, so
    /// descriptions must be unique as well as names.
    pub fn insert(&mut self, check: Check) -> Result<(), ConfigError> {
        if let Some(existing) = self.checks.values().find(|existing| {
            existing.description == check.description && existing.name != check.name
        }) {
            return Err(ConfigError::DuplicateDescription {
                first: existing.name.clone(),
                second: check.name,
                description: check.description,
            });
        }
        match self.checks.entry(check.name.clone()) {
            Entry::Occupied(entry) => Err(ConfigError::DuplicateCheck(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(check);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Check> {
        self.checks.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Check> {
        self.checks.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.checks.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

pub fn build_registry(config: &CiConfig) -> Result<CheckRegistry, ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(config.version));
    }
    if config.harness.jobs == 0 {
        return Err(ConfigError::ZeroJobs);
    }
    let policy = config.sandbox.to_policy()?;

    let mut registry = CheckRegistry::new();
    for (name, spec) in config.checks.iter() {
        let check = build_check(name, spec, config, &policy)?;
        debug!(
            check = name,
            steps = check.sequence.len(),
            sandboxed = check.sandboxed,
            "Check registered"
        );
        registry.insert(check)?;
    }
    Ok(registry)
}

fn build_check(
    name: &str,
    spec: &CheckSpec,
    config: &CiConfig,
    policy: &SandboxPolicy,
) -> Result<Check, ConfigError> {
    if spec.description.trim().is_empty() {
        return Err(ConfigError::EmptyDescription(name.to_string()));
    }
    if spec.commands.is_empty() {
        return Err(ConfigError::EmptyCheck(name.to_string()));
    }

    let mut builder = SequenceBuilder::new();
    for (idx, op_spec) in spec.commands.iter().enumerate() {
        let index = idx + 1;
        for operation in resolve_operation(name, index, op_spec, config)? {
            builder = builder.guard(operation);
        }
    }
    let mut sequence = builder.build();
    if spec.sandbox {
        sequence = sandbox(policy, sequence);
    }

    Ok(Check {
        name: name.to_string(),
        description: spec.description.clone(),
        sequence,
        sandboxed: spec.sandbox,
        mutates_checkout: spec.mutates_checkout,
    })
}

fn resolve_operation(
    check: &str,
    index: usize,
    spec: &OperationSpec,
    config: &CiConfig,
) -> Result<Vec<Operation>, ConfigError> {
    let mut kinds = spec.kinds();
    if kinds.len() != 1 {
        let reason = if kinds.is_empty() {
            "expected one of run, cd, env, path, all, fresh".to_string()
        } else {
            let keys: Vec<_> = kinds.iter().map(OperationKind::key).collect();
            format!("expected exactly one operation key, found {}", keys.join(", "))
        };
        return Err(ConfigError::MalformedOperation {
            check: check.to_string(),
            index,
            reason,
        });
    }

    let invalid = |source: OperationError| ConfigError::InvalidOperation {
        check: check.to_string(),
        index,
        source,
    };

    let operations = match kinds.remove(0) {
        OperationKind::Run(argv) => {
            vec![Operation::invoke(resolve_argv(argv, config)).map_err(invalid)?]
        }
        OperationKind::Cd(dir) => vec![Operation::change_dir(dir).map_err(invalid)?],
        OperationKind::Env(vars) => {
            if vars.is_empty() {
                return Err(ConfigError::MalformedOperation {
                    check: check.to_string(),
                    index,
                    reason: "env requires at least one variable".into(),
                });
            }
            vars.iter()
                .map(|(name, value)| Operation::set_env(name.as_str(), value.as_str()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(invalid)?
        }
        OperationKind::Path(dirs) => {
            vec![Operation::prepend_path(dirs.iter().cloned()).map_err(invalid)?]
        }
        OperationKind::All(commands) => {
            let resolved: Vec<Vec<String>> = commands
                .iter()
                .map(|argv| resolve_argv(argv, config))
                .collect();
            vec![Operation::all_succeed(resolved).map_err(invalid)?]
        }
        OperationKind::Fresh(fresh) => freshness_operations(fresh, config).map_err(invalid)?,
    };
    Ok(operations)
}

/// Regenerates files, then fails when `git diff` reports a change.
fn freshness_operations(
    spec: &FreshnessSpec,
    config: &CiConfig,
) -> Result<Vec<Operation>, OperationError> {
    let generate = Operation::invoke(resolve_argv(&spec.generate, config))?;
    let mut diff = vec![
        resolve_program(VCS_PROGRAM, config),
        "diff".to_string(),
        "--exit-code".to_string(),
        "--".to_string(),
    ];
    diff.extend(spec.paths.iter().cloned());
    Ok(vec![generate, Operation::invoke(diff)?])
}

fn resolve_argv(argv: &[String], config: &CiConfig) -> Vec<String> {
    let mut resolved = argv.to_vec();
    if let Some(program) = resolved.first_mut() {
        *program = resolve_program(program, config);
    }
    resolved
}

pub fn resolve_program(program: &str, config: &CiConfig) -> String {
    config
        .tools
        .get(program)
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}
