//! A variable the policy leaves out is absent inside the sandbox. There is no
//! fallback to the caller's environment.

use std::path::PathBuf;

use indexmap::IndexMap;

use crate::error::OperationError;
use crate::operation::{CommandSequence, Operation, SequenceBuilder, validate_variable_name};

pub const DEFAULT_ENV_PROGRAM: &str = "/usr/bin/env";
pub const DEFAULT_SHELL: &str = "/bin/sh";
pub const DEFAULT_PROPAGATE: [&str; 2] = ["PATH", "HOME"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPolicy {
    env_program: PathBuf,
    shell: PathBuf,
    propagate: Vec<String>,
    set: IndexMap<String, String>,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            env_program: PathBuf::from(DEFAULT_ENV_PROGRAM),
            shell: PathBuf::from(DEFAULT_SHELL),
            propagate: DEFAULT_PROPAGATE.iter().map(|s| s.to_string()).collect(),
            set: IndexMap::new(),
        }
    }
}

impl SandboxPolicy {
    pub fn empty(env_program: impl Into<PathBuf>, shell: impl Into<PathBuf>) -> Self {
        Self {
            env_program: env_program.into(),
            shell: shell.into(),
            propagate: Vec::new(),
            set: IndexMap::new(),
        }
    }

    /// Unset in the invoking environment stays unset.
    pub fn propagate(mut self, name: &str) -> Result<Self, OperationError> {
        validate_variable_name(name)?;
        if !self.propagate.iter().any(|existing| existing == name) {
            self.propagate.push(name.to_string());
        }
        Ok(self)
    }

    pub fn set(mut self, name: &str, value: &str) -> Result<Self, OperationError> {
        validate_variable_name(name)?;
        self.set.insert(name.to_string(), value.to_string());
        Ok(self)
    }

    pub fn env_program(&self) -> &PathBuf {
        &self.env_program
    }

    pub fn shell(&self) -> &PathBuf {
        &self.shell
    }

    pub fn propagated(&self) -> &[String] {
        &self.propagate
    }

    pub fn explicit(&self) -> &IndexMap<String, String> {
        &self.set
    }

    pub fn conflicts(&self) -> Vec<&str> {
        self.propagate
            .iter()
            .filter(|name| self.set.contains_key(name.as_str()))
            .map(String::as_str)
            .collect()
    }

    pub fn allowed_names(&self) -> Vec<&str> {
        self.propagate
            .iter()
            .map(String::as_str)
            .chain(self.set.keys().map(String::as_str))
            .collect()
    }
}

/// The result is a single guarded step.
pub fn sandbox(policy: &SandboxPolicy, sequence: CommandSequence) -> CommandSequence {
    SequenceBuilder::new()
        .guard(Operation::Sandboxed {
            policy: policy.clone(),
            sequence,
        })
        .build()
}
