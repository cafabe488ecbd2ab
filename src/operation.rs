use std::path::{Path, PathBuf};

use crate::error::OperationError;
use crate::sandbox::SandboxPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    SetEnv { name: String, value: String },
    PrependPath(Vec<PathBuf>),
    ChangeDir(PathBuf),
    Invoke(Vec<String>),
    AllSucceed(Vec<Vec<String>>),
    Sandboxed {
        policy: SandboxPolicy,
        sequence: CommandSequence,
    },
    /// Continue only if the wrapped step exits 0; otherwise stop with its status.
    Guard(Box<Operation>),
}

impl Operation {
    pub fn set_env(name: impl Into<String>, value: impl Into<String>) -> Result<Self, OperationError> {
        let name = name.into();
        validate_variable_name(&name)?;
        Ok(Operation::SetEnv {
            name,
            value: value.into(),
        })
    }

    pub fn prepend_path<I, P>(dirs: I) -> Result<Self, OperationError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let dirs: Vec<PathBuf> = dirs.into_iter().map(Into::into).collect();
        validate_path_prefix(&dirs)?;
        Ok(Operation::PrependPath(dirs))
    }

    pub fn change_dir(path: impl Into<PathBuf>) -> Result<Self, OperationError> {
        let path = path.into();
        validate_directory(&path)?;
        Ok(Operation::ChangeDir(path))
    }

    pub fn invoke<I, S>(argv: I) -> Result<Self, OperationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
        validate_argv(&argv)?;
        Ok(Operation::Invoke(argv))
    }

    pub fn all_succeed<I, C, S>(commands: I) -> Result<Self, OperationError>
    where
        I: IntoIterator<Item = C>,
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let commands: Vec<Vec<String>> = commands
            .into_iter()
            .map(|argv| argv.into_iter().map(Into::into).collect())
            .collect();
        validate_group(&commands)?;
        Ok(Operation::AllSucceed(commands))
    }

    /// Already guarded operations are returned unchanged.
    pub fn guarded(self) -> Self {
        match self {
            guard @ Operation::Guard(_) => guard,
            other => Operation::Guard(Box::new(other)),
        }
    }

    pub fn is_guarded(&self) -> bool {
        matches!(self, Operation::Guard(_))
    }

    pub fn program(&self) -> Option<&str> {
        match self {
            Operation::Invoke(argv) => argv.first().map(String::as_str),
            Operation::Guard(inner) => inner.program(),
            _ => None,
        }
    }
}

/// Accepts POSIX shell variable names: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_variable_name(name: &str) -> Result<(), OperationError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first == '_' || first.is_ascii_alphabetic() => {
            chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(OperationError::InvalidVariableName(name.to_string()))
    }
}

pub fn validate_path_prefix(dirs: &[PathBuf]) -> Result<(), OperationError> {
    if dirs.is_empty() {
        return Err(OperationError::EmptyPathPrefix);
    }
    for dir in dirs {
        let text = dir.to_string_lossy();
        if text.is_empty() {
            return Err(OperationError::EmptyPath);
        }
        if text.contains(':') {
            return Err(OperationError::PathSeparatorInDirectory(text.into_owned()));
        }
    }
    Ok(())
}

pub fn validate_directory(path: &Path) -> Result<(), OperationError> {
    if path.as_os_str().is_empty() {
        return Err(OperationError::EmptyPath);
    }
    Ok(())
}

pub fn validate_argv(argv: &[String]) -> Result<(), OperationError> {
    match argv.first() {
        None => Err(OperationError::EmptyArgv),
        Some(program) if program.is_empty() => Err(OperationError::EmptyProgram),
        Some(_) => Ok(()),
    }
}

pub fn validate_group(commands: &[Vec<String>]) -> Result<(), OperationError> {
    if commands.is_empty() {
        return Err(OperationError::EmptyGroup);
    }
    commands.iter().try_for_each(|argv| validate_argv(argv))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSequence {
    steps: Vec<Operation>,
}

impl CommandSequence {
    pub fn steps(&self) -> &[Operation] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.steps.iter()
    }

    pub fn programs(&self) -> Vec<&str> {
        let mut programs = Vec::new();
        collect_programs(&self.steps, &mut programs);
        programs
    }
}

fn collect_programs<'a>(steps: &'a [Operation], out: &mut Vec<&'a str>) {
    for step in steps {
        match step {
            Operation::Invoke(argv) => out.extend(argv.first().map(String::as_str)),
            Operation::AllSucceed(commands) => {
                out.extend(commands.iter().filter_map(|argv| argv.first().map(String::as_str)))
            }
            Operation::Sandboxed { sequence, .. } => collect_programs(&sequence.steps, out),
            Operation::Guard(inner) => collect_programs(std::slice::from_ref(inner.as_ref()), out),
            Operation::SetEnv { .. } | Operation::PrependPath(_) | Operation::ChangeDir(_) => {}
        }
    }
}

impl<'a> IntoIterator for &'a CommandSequence {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

#[derive(Debug, Default)]
pub struct SequenceBuilder {
    steps: Vec<Operation>,
}

impl SequenceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard(mut self, operation: Operation) -> Self {
        self.steps.push(operation.guarded());
        self
    }

    pub fn append(mut self, sequence: CommandSequence) -> Self {
        self.steps
            .extend(sequence.steps.into_iter().map(Operation::guarded));
        self
    }

    pub fn set_env(self, name: &str, value: &str) -> Result<Self, OperationError> {
        Ok(self.guard(Operation::set_env(name, value)?))
    }

    pub fn prepend_path<I, P>(self, dirs: I) -> Result<Self, OperationError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Ok(self.guard(Operation::prepend_path(dirs)?))
    }

    pub fn change_dir(self, path: &Path) -> Result<Self, OperationError> {
        Ok(self.guard(Operation::change_dir(path)?))
    }

    pub fn invoke<I, S>(self, argv: I) -> Result<Self, OperationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(self.guard(Operation::invoke(argv)?))
    }

    pub fn all_succeed<I, C, S>(self, commands: I) -> Result<Self, OperationError>
    where
        I: IntoIterator<Item = C>,
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(self.guard(Operation::all_succeed(commands)?))
    }

    /// The exports are not scoped to `sequence`: the rendered shell has no
    /// scoped export, so the values stay set for every step the caller adds
    /// afterwards. Callers that need them gone must overwrite them.
    pub fn with_env<'v, I>(self, vars: I, sequence: CommandSequence) -> Result<Self, OperationError>
    where
        I: IntoIterator<Item = (&'v str, &'v str)>,
    {
        let mut builder = self;
        for (name, value) in vars {
            builder = builder.set_env(name, value)?;
        }
        Ok(builder.append(sequence))
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn build(self) -> CommandSequence {
        CommandSequence { steps: self.steps }
    }
}
