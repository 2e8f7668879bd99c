//! TOML configuration with compiled-in defaults, environment variable
//! override for the config file path, and a local-file fallback.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detect::engine::DetectConfig;
use crate::patch::PatchConfig;

fn default_db_path() -> String {
    "data/gridwarden.db".to_string()
}

fn default_ingestion_interval_seconds() -> u64 {
    6
}

fn default_poll_interval_seconds() -> u64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between telemetry ingestion cycles.
    #[serde(default = "default_ingestion_interval_seconds")]
    pub ingestion_interval_seconds: u64,

    /// Scheduler poll tick. Stop requests are observed once per tick.
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ingestion_interval_seconds: default_ingestion_interval_seconds(),
            poll_interval_seconds: default_poll_interval_seconds(),
        }
    }
}

/// Root configuration for the gridwarden process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Optional JSON seed catalog; the compiled-in fleet is used when
    /// absent.
    #[serde(default)]
    pub fleet_path: Option<PathBuf>,

    #[serde(default)]
    pub detect: DetectConfig,

    #[serde(default)]
    pub patch: PatchConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            fleet_path: None,
            detect: DetectConfig::default(),
            patch: PatchConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl GridConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path in the `GRIDWARDEN_CONFIG` environment variable.
    /// 2. `gridwarden.toml` in the working directory.
    /// 3. Fall back to compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("GRIDWARDEN_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "GRIDWARDEN_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local_path = Path::new("gridwarden.toml");
        if local_path.exists() {
            match Self::load(local_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %local_path.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}
