use std::path::Path;

use serde::Serialize;

use crate::config::{CiConfig, OperationKind};
use crate::registry::{VCS_PROGRAM, build_registry};

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

pub fn validate_config(config: &CiConfig) -> ValidationReport {
    let mut report = ValidationReport::default();

    if let Err(err) = build_registry(config) {
        report.errors.push(err.to_string());
    }

    if config.checks.is_empty() {
        report
            .warnings
            .push("Configuration defines no checks; the suite will be empty".into());
    }

    for (name, spec) in config.checks.iter() {
        if !spec.sandbox {
            report.warnings.push(format!(
                "Check '{name}' runs without the environment sandbox"
            ));
        }
        for program in referenced_programs(spec.commands.iter().flat_map(|op| op.kinds())) {
            if !Path::new(program).is_absolute()
                && !program.contains('/')
                && !config.tools.contains_key(program)
            {
                report.warnings.push(format!(
                    "Check '{name}': '{program}' is resolved through PATH at run time; \
                     list it under tools to pin its location"
                ));
            }
        }
    }

    report.merge(validate_checkout_mutation(config));
    report
}

fn referenced_programs<'a>(kinds: impl Iterator<Item = OperationKind<'a>>) -> Vec<&'a str> {
    let mut programs = Vec::new();
    for kind in kinds {
        match kind {
            OperationKind::Run(argv) => programs.extend(argv.first().map(String::as_str)),
            OperationKind::All(commands) => programs.extend(
                commands
                    .iter()
                    .filter_map(|argv| argv.first().map(String::as_str)),
            ),
            OperationKind::Fresh(fresh) => {
                programs.extend(fresh.generate.first().map(String::as_str));
                programs.push(VCS_PROGRAM);
            }
            OperationKind::Cd(_) | OperationKind::Env(_) | OperationKind::Path(_) => {}
        }
    }
    let mut unique = Vec::with_capacity(programs.len());
    for program in programs {
        if !unique.contains(&program) {
            unique.push(program);
        }
    }
    unique
}

/// Checks that write into the checkout are not isolated from each other; the
/// harness may run them at the same time.
fn validate_checkout_mutation(config: &CiConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mutating: Vec<&str> = config
        .checks
        .iter()
        .filter(|(_, spec)| spec.mutates_checkout)
        .map(|(name, _)| name)
        .collect();
    if mutating.len() > 1 && config.harness.jobs > 1 {
        report.warnings.push(format!(
            "Checks {} modify the checkout and may run concurrently with --jobs {}",
            mutating.join(", "),
            config.harness.jobs
        ));
    }
    report
}
