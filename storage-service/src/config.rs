// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/local-storage/config.toml";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Config {
    /// JSON document holding volumes and merges
    pub db_path: PathBuf,

    /// Directory containing `local-storage-helper.sh`
    pub shell_path: PathBuf,

    pub log_level: LoggingLevel,

    /// Enables a daily rolling log file in this directory
    pub log_dir: Option<PathBuf>,

    pub enable_mergerfs: bool,

    /// Options passed to `mount -o` for every merge
    pub merge_options: String,

    pub reconcile_interval_secs: u64,
    pub operation_timeout_secs: u64,
    pub event_bus_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("/var/lib/local-storage/db.json"),
            shell_path: PathBuf::from("/usr/share/local-storage/shell"),
            log_level: LoggingLevel::Info,
            log_dir: None,
            enable_mergerfs: true,
            merge_options:
                "defaults,allow_other,category.create=mfs,moveonenospc=true,minfreespace=1M"
                    .to_string(),
            reconcile_interval_secs: 5,
            operation_timeout_secs: 30,
            event_bus_capacity: 1024,
        }
    }
}

impl Config {
    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!(
                "Config file {} not found, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.reconcile_interval_secs > 0,
            "reconcile_interval_secs must be positive"
        );
        anyhow::ensure!(
            self.operation_timeout_secs > 0,
            "operation_timeout_secs must be positive"
        );
        anyhow::ensure!(
            self.event_bus_capacity > 0,
            "event_bus_capacity must be positive"
        );
        Ok(())
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}
