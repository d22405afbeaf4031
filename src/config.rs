use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_RELATIVE_PATH: &str = ".promoter/config.toml";
const SUPPORTED_VERSION: u32 = 1;

pub const DEFAULT_INVOCATION_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoConfig {
    pub version: u32,
    pub pipeline: PipelineConfig,
    pub log: Option<LogConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    pub invocation_timeout_secs: u64,
    pub busy_timeout_ms: u64,
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            invocation_timeout_secs: DEFAULT_INVOCATION_TIMEOUT_SECS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            workers: DEFAULT_WORKERS,
        }
    }
}

impl PipelineConfig {
    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    pub ndjson: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawRepoConfig {
    version: Option<u32>,
    pipeline: Option<RawPipelineConfig>,
    log: Option<RawLogConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawPipelineConfig {
    invocation_timeout_secs: Option<u64>,
    busy_timeout_ms: Option<u64>,
    workers: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawLogConfig {
    ndjson: Option<String>,
}

pub fn repo_config_path(repo_root: &Path) -> PathBuf {
    repo_root.join(CONFIG_RELATIVE_PATH)
}

pub fn load_repo_config(repo_root: &Path) -> Result<Option<RepoConfig>> {
    let path = repo_config_path(repo_root);
    if !path.exists() {
        return Ok(None);
    }

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("read repo config {}", path.display()))?;
    let parsed: RawRepoConfig =
        toml::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(validate_repo_config(parsed, &path)?))
}

fn validate_repo_config(raw: RawRepoConfig, path: &Path) -> Result<RepoConfig> {
    let version = raw
        .version
        .ok_or_else(|| anyhow::anyhow!("{} missing required `version`", path.display()))?;
    if version != SUPPORTED_VERSION {
        bail!(
            "{} has unsupported version {version}; expected version = {SUPPORTED_VERSION}",
            path.display()
        );
    }

    let pipeline = raw
        .pipeline
        .map(|pipeline| validate_pipeline_config(pipeline, path))
        .transpose()?
        .unwrap_or_default();

    let log = raw.log.map(|log| LogConfig {
        ndjson: sanitize_optional(log.ndjson).map(PathBuf::from),
    });

    Ok(RepoConfig {
        version,
        pipeline,
        log,
    })
}

fn validate_pipeline_config(raw: RawPipelineConfig, path: &Path) -> Result<PipelineConfig> {
    let invocation_timeout_secs = raw
        .invocation_timeout_secs
        .unwrap_or(DEFAULT_INVOCATION_TIMEOUT_SECS);
    if invocation_timeout_secs == 0 {
        bail!(
            "{} has `[pipeline].invocation_timeout_secs = 0`; expected a positive number of seconds",
            path.display()
        );
    }
    let workers = raw.workers.unwrap_or(DEFAULT_WORKERS);
    if workers == 0 {
        bail!(
            "{} has `[pipeline].workers = 0`; expected at least one worker",
            path.display()
        );
    }
    Ok(PipelineConfig {
        invocation_timeout_secs,
        busy_timeout_ms: raw.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS),
        workers,
    })
}

fn sanitize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
