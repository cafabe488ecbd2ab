use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::compile::CompiledSuite;
use crate::config::CiConfig;
use crate::registry::CheckRegistry;

#[derive(Debug, Serialize)]
pub struct SuiteLock {
    pub config_version: u32,
    pub generated_at: DateTime<Utc>,
    pub suite_sha256: String,
    pub harness: HarnessLock,
    pub checks: Vec<CheckLock>,
}

#[derive(Debug, Serialize)]
pub struct HarnessLock {
    pub program: String,
    pub jobs: usize,
}

#[derive(Debug, Serialize)]
pub struct CheckLock {
    pub name: String,
    pub description: String,
    pub sandboxed: bool,
    pub sequence_hash: String,
}

pub fn build_lock(config: &CiConfig, registry: &CheckRegistry, suite: &CompiledSuite) -> SuiteLock {
    let checks = suite
        .blocks()
        .iter()
        .map(|block| CheckLock {
            name: block.name.clone(),
            description: block.description.clone(),
            sandboxed: registry
                .get(&block.name)
                .map(|check| check.sandboxed)
                .unwrap_or_default(),
            sequence_hash: sha256_hex(block.text.as_bytes()),
        })
        .collect();

    SuiteLock {
        config_version: config.version,
        generated_at: Utc::now(),
        suite_sha256: sha256_hex(suite.as_str().as_bytes()),
        harness: HarnessLock {
            program: config.harness.program.to_string_lossy().to_string(),
            jobs: config.harness.jobs,
        },
        checks,
    }
}

pub fn generate_lock(
    config: &CiConfig,
    registry: &CheckRegistry,
    suite: &CompiledSuite,
    path: &Path,
) -> Result<()> {
    let lock = build_lock(config, registry, suite);

    let file = File::create(path)
        .with_context(|| format!("Failed to create lockfile: {}", path.display()))?;
    serde_yaml::to_writer(file, &lock)
        .with_context(|| format!("Failed to write lockfile: {}", path.display()))?;

    Ok(())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
