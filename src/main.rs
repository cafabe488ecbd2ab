use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use ci_suite::compile::compile;
use ci_suite::config::CiConfig;
use ci_suite::lockfile::generate_lock;
use ci_suite::presets::{PresetOutcome, generate_preset};
use ci_suite::registry::build_registry;
use ci_suite::validation::{ValidationReport, validate_config};
use ci_suite::wrapper::{HarnessInvocation, write_artifacts};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_tracing()?;

    match cli.command {
        Commands::Generate {
            config,
            out_dir,
            jobs,
        } => generate_cmd(&config, &out_dir, jobs),
        Commands::Compile { config, output } => compile_cmd(&config, output.as_deref()),
        Commands::Validate { config } => validate_cmd(&config),
        Commands::Lint { configs } => lint_configs(&configs),
        Commands::List { config, json } => list_checks(&config, json),
        Commands::Lock { config, output } => lock_cmd(&config, &output),
        Commands::Init {
            preset,
            output,
            force,
        } => init_cmd(&preset, &output, force),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "ci-suite", &mut io::stdout());
            Ok(())
        }
    }
}

fn configure_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))?;

    Ok(())
}

/// Loads `path` and refuses to continue past validation errors.
fn load_valid_config(path: &Path) -> Result<CiConfig> {
    let config = CiConfig::load(path)?;
    let report = validate_config(&config);
    log_report(path, &report);
    if !report.is_ok() {
        bail!(
            "Configuration validation failed with {} error(s)",
            report.errors.len()
        );
    }
    Ok(config)
}

fn log_report(path: &Path, report: &ValidationReport) {
    for warning in &report.warnings {
        warn!(file = %path.display(), "{warning}");
    }
    for error_msg in &report.errors {
        error!(file = %path.display(), "{error_msg}");
    }
}

fn generate_cmd(config_path: &Path, out_dir: &Path, jobs: Option<usize>) -> Result<()> {
    let mut config = load_valid_config(config_path)?;
    if let Some(jobs) = jobs {
        config.harness.jobs = jobs;
    }

    let registry = build_registry(&config)?;
    let suite = compile(&registry)?;
    let invocation = HarnessInvocation::from_config(&config)?;
    let artifacts = write_artifacts(out_dir, &suite, &invocation)?;

    info!(
        checks = registry.len(),
        config = %config_path.display(),
        "Suite generated"
    );
    println!("{}", artifacts.executable.display());
    Ok(())
}

fn compile_cmd(config_path: &Path, output: Option<&Path>) -> Result<()> {
    let config = load_valid_config(config_path)?;
    let registry = build_registry(&config)?;
    let suite = compile(&registry)?;

    match output {
        Some(path) => {
            create_parent_dir(path)?;
            fs::write(path, suite.as_str())
                .with_context(|| format!("Failed to write compiled suite: {}", path.display()))?;
            info!(suite = %path.display(), checks = registry.len(), "Suite written");
        }
        None => print!("{suite}"),
    }
    Ok(())
}

fn validate_cmd(config_path: &Path) -> Result<()> {
    let config = CiConfig::load(config_path)?;
    let report = validate_config(&config);
    log_report(config_path, &report);

    if report.is_ok() {
        info!(file = %config_path.display(), "Configuration validation passed");
        Ok(())
    } else {
        Err(anyhow!(
            "Configuration validation failed with {} error(s)",
            report.errors.len()
        ))
    }
}

fn lint_configs(configs: &[PathBuf]) -> Result<()> {
    if configs.is_empty() {
        bail!("No configuration files supplied for linting");
    }

    let mut failures = 0usize;
    for config_path in configs {
        match CiConfig::load(config_path) {
            Ok(config) => {
                let report = validate_config(&config);
                log_report(config_path, &report);
                if report.is_ok() {
                    info!(file = %config_path.display(), "Lint passed");
                } else {
                    failures += 1;
                }
            }
            Err(err) => {
                failures += 1;
                error!(file = %config_path.display(), "Failed to load configuration: {err:#}");
            }
        }
    }

    if failures > 0 {
        bail!("Lint failed for {failures} configuration(s)");
    }

    info!("All configuration lint checks passed");
    Ok(())
}

#[derive(Serialize)]
struct CheckListing<'a> {
    name: &'a str,
    description: &'a str,
    sandboxed: bool,
    mutates_checkout: bool,
    steps: usize,
}

fn list_checks(config_path: &Path, json: bool) -> Result<()> {
    let config = load_valid_config(config_path)?;
    let registry = build_registry(&config)?;
    let listings: Vec<CheckListing<'_>> = registry
        .iter()
        .map(|check| CheckListing {
            name: &check.name,
            description: &check.description,
            sandboxed: check.sandboxed,
            mutates_checkout: check.mutates_checkout,
            steps: check.sequence.len(),
        })
        .collect();

    if json {
        serde_json::to_writer_pretty(io::stdout(), &listings)
            .context("Failed to write check listing")?;
        println!();
    } else {
        println!("Checks:");
        for listing in &listings {
            println!("- {}: {}", listing.name, listing.description);
        }
    }
    Ok(())
}

fn lock_cmd(config_path: &Path, output_path: &Path) -> Result<()> {
    let config = load_valid_config(config_path)
        .context("Cannot generate lockfile for an invalid configuration")?;
    let registry = build_registry(&config)?;
    let suite = compile(&registry)?;

    create_parent_dir(output_path)?;
    generate_lock(&config, &registry, &suite, output_path)?;
    info!(
        lockfile = %output_path.display(),
        "Lockfile generated successfully"
    );
    Ok(())
}

fn init_cmd(preset: &str, output: &Path, force: bool) -> Result<()> {
    match generate_preset(preset, output, force)? {
        PresetOutcome::Written(path) => {
            info!(preset = %preset, path = %path.display(), "Configuration written");
        }
        PresetOutcome::Skipped(path) => {
            warn!(
                path = %path.display(),
                "Configuration exists, skipping. Pass --force to overwrite it."
            );
        }
    }
    Ok(())
}

fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

#[derive(Parser)]
#[command(
    name = "ci-suite",
    version,
    about = "Compiles declarative CI checks into a parallel bats suite"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the compiled suite and its runnable wrapper.
    Generate {
        config: PathBuf,
        #[arg(long = "out-dir", default_value = "ci-out")]
        out_dir: PathBuf,
        /// Override the configured harness concurrency.
        #[arg(long)]
        jobs: Option<usize>,
    },
    /// Print or write only the compiled suite.
    Compile {
        config: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    Validate {
        config: PathBuf,
    },
    Lint {
        #[arg(required = true)]
        configs: Vec<PathBuf>,
    },
    /// List checks in suite order.
    List {
        config: PathBuf,
        #[arg(long)]
        json: bool,
    },
    Lock {
        config: PathBuf,
        output: PathBuf,
    },
    /// Write a starter configuration.
    Init {
        #[arg(long, default_value = "rust")]
        preset: String,
        #[arg(long, default_value = "ci-suite.yaml")]
        output: PathBuf,
        #[arg(long)]
        force: bool,
    },
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}
