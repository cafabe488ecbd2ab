//! All shell syntax and all escaping live here.

use std::borrow::Cow;
use std::fmt;
use std::path::Path;

use shell_escape::unix::escape;
use tracing::debug;

use crate::error::{CompileError, OperationError};
use crate::operation::{
    CommandSequence, Operation, validate_argv, validate_directory, validate_group,
    validate_path_prefix, validate_variable_name,
};
use crate::registry::{Check, CheckRegistry};
use crate::sandbox::SandboxPolicy;

pub const SUITE_HEADER: &str = "#!/usr/bin/env bats\n# Generated by ci-suite. Do not edit.\n";

const BODY_INDENT: &str = "  ";

/// Decides how a failing guard leaves the rendered sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderContext {
    Function,
    Script,
}

impl RenderContext {
    fn exit_keyword(self) -> &'static str {
        match self {
            RenderContext::Function => "return",
            RenderContext::Script => "exit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSuite {
    text: String,
    blocks: Vec<CompiledBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledBlock {
    pub name: String,
    pub description: String,
    pub text: String,
}

impl CompiledSuite {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn blocks(&self) -> &[CompiledBlock] {
        &self.blocks
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Display for CompiledSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

pub fn compile(registry: &CheckRegistry) -> Result<CompiledSuite, CompileError> {
    let mut text = String::from(SUITE_HEADER);
    let mut blocks = Vec::with_capacity(registry.len());
    for check in registry.iter() {
        let block = compile_check(check)?;
        debug!(check = check.name.as_str(), bytes = block.len(), "Check compiled");
        text.push('\n');
        text.push_str(&block);
        blocks.push(CompiledBlock {
            name: check.name.clone(),
            description: check.description.clone(),
            text: block,
        });
    }
    Ok(CompiledSuite { text, blocks })
}

fn compile_check(check: &Check) -> Result<String, CompileError> {
    let label = escape_description(&check.name, &check.description)?;
    let lines = render_sequence(&check.sequence, RenderContext::Function).map_err(|source| {
        CompileError::InvalidOperation {
            check: check.name.clone(),
            source,
        }
    })?;
    let mut block = format!("@test \"{label}\" {{\n");
    for line in lines {
        block.push_str(BODY_INDENT);
        block.push_str(&line);
        block.push('\n');
    }
    block.push_str("}\n");
    Ok(block)
}

/// The harness evaluates the test name inside double quotes. Control
/// characters cannot appear on the header line and are rejected.
pub fn escape_description(check: &str, description: &str) -> Result<String, CompileError> {
    let mut escaped = String::with_capacity(description.len() + 8);
    for ch in description.chars() {
        match ch {
            '\\' | '"' | '$' | '`' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            c if c.is_control() => {
                return Err(CompileError::UnescapableDescription {
                    check: check.to_string(),
                    found: format!("control character {:?}", c),
                });
            }
            c => escaped.push(c),
        }
    }
    Ok(escaped)
}

pub fn quote(text: &str) -> String {
    escape(Cow::Borrowed(text)).into_owned()
}

fn quote_argv(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn render_sequence(
    sequence: &CommandSequence,
    ctx: RenderContext,
) -> Result<Vec<String>, OperationError> {
    sequence
        .iter()
        .map(|operation| render_operation(operation, ctx))
        .collect()
}

pub fn render_script(sequence: &CommandSequence) -> Result<String, OperationError> {
    Ok(render_sequence(sequence, RenderContext::Script)?.join("; "))
}

/// Operations can be built without their constructors, so every payload is
/// checked again before it reaches the output.
pub fn render_operation(
    operation: &Operation,
    ctx: RenderContext,
) -> Result<String, OperationError> {
    let rendered = match operation {
        Operation::SetEnv { name, value } => {
            validate_variable_name(name)?;
            format!("export {name}={}", quote(value))
        }
        Operation::PrependPath(dirs) => {
            validate_path_prefix(dirs)?;
            let joined = dirs
                .iter()
                .map(|dir| dir.to_string_lossy())
                .collect::<Vec<_>>()
                .join(":");
            format!("export PATH={}\"${{PATH:+:$PATH}}\"", quote(&joined))
        }
        Operation::ChangeDir(path) => {
            validate_directory(path)?;
            format!("cd {}", quote(&directory_operand(path)))
        }
        Operation::Invoke(argv) => {
            validate_argv(argv)?;
            quote_argv(argv)
        }
        Operation::AllSucceed(commands) => {
            validate_group(commands)?;
            render_all_succeed(commands)
        }
        Operation::Sandboxed { policy, sequence } => {
            let mut words = environment_reset(policy);
            words.push(quote(&policy.shell().to_string_lossy()));
            words.push("-c".to_string());
            words.push(quote(&render_script(sequence)?));
            words.join(" ")
        }
        Operation::Guard(inner) => format!(
            "{} || {} $?",
            render_operation(inner, ctx)?,
            ctx.exit_keyword()
        ),
    };
    Ok(rendered)
}

/// `cd` reads a leading `-` as an option or as `$OLDPWD`.
fn directory_operand(path: &Path) -> String {
    let text = path.to_string_lossy();
    if text.starts_with('-') {
        format!("./{text}")
    } else {
        text.into_owned()
    }
}

fn render_all_succeed(commands: &[Vec<String>]) -> String {
    let mut script = String::from("{ __ci_status=0;");
    for argv in commands {
        script.push_str(&format!(
            " {} || {{ __ci_rc=$?; [ \"$__ci_status\" -ne 0 ] || __ci_status=$__ci_rc; }};",
            quote_argv(argv)
        ));
    }
    script.push_str(" (exit \"$__ci_status\"); }");
    script
}

/// Propagated variables expand to an assignment only when set in the
/// invoking environment.
pub fn environment_reset(policy: &SandboxPolicy) -> Vec<String> {
    let mut words = vec![quote(&policy.env_program().to_string_lossy()), "-i".to_string()];
    for name in policy.propagated() {
        words.push(format!("${{{name}+\"{name}=${name}\"}}"));
    }
    for (name, value) in policy.explicit() {
        words.push(quote(&format!("{name}={value}")));
    }
    words
}
