//! Generation-time errors.
//!
//! Both kinds abort the whole run: nothing is written when either is returned.

use thiserror::Error;

/// The declarative configuration cannot be turned into a registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unsupported configuration version: {0}")]
    UnsupportedVersion(u32),

    #[error("Duplicate check name '{0}'")]
    DuplicateCheck(String),

    #[error("Checks '{first}' and '{second}' share the description '{description}'")]
    DuplicateDescription {
        first: String,
        second: String,
        description: String,
    },

    #[error("Check '{0}' has an empty description")]
    EmptyDescription(String),

    #[error("Check '{0}' has no commands")]
    EmptyCheck(String),

    #[error("Check '{check}', command {index}: {reason}")]
    MalformedOperation {
        check: String,
        index: usize,
        reason: String,
    },

    #[error("Check '{check}', command {index}: {source}")]
    InvalidOperation {
        check: String,
        index: usize,
        #[source]
        source: OperationError,
    },

    #[error("Sandbox policy: {0}")]
    InvalidSandbox(#[source] OperationError),

    #[error("Sandbox variable '{0}' is both propagated and set explicitly")]
    ConflictingSandboxVariable(String),

    #[error("Harness concurrency must be at least 1")]
    ZeroJobs,
}

/// An operation was constructed from arguments it cannot render.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OperationError {
    #[error("command argv is empty")]
    EmptyArgv,

    #[error("command argv contains an empty program name")]
    EmptyProgram,

    #[error("directory path is empty")]
    EmptyPath,

    #[error("PATH prefix requires at least one directory")]
    EmptyPathPrefix,

    #[error("directory '{0}' contains ':' and cannot be placed on PATH")]
    PathSeparatorInDirectory(String),

    #[error("all-succeed group requires at least one command")]
    EmptyGroup,

    #[error("invalid environment variable name '{0}'")]
    InvalidVariableName(String),
}

/// A valid registry could not be rendered to the harness syntax.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Description of check '{check}' contains {found}, which cannot be escaped")]
    UnescapableDescription { check: String, found: String },

    #[error("Check '{check}' contains an operation that cannot be rendered: {source}")]
    InvalidOperation {
        check: String,
        #[source]
        source: OperationError,
    },
}
