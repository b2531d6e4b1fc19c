use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::LevelFilter;
use monitor_logging::monitor_info;
use opwatch_core::DEFAULT_MAX_ATTEMPTS;
use opwatch_engine::{EndpointTemplates, MonitorSettings};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LogDestination;

pub const DEFAULT_CONFIG_FILE: &str = "opwatch.ron";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid log level {0:?}")]
    LogLevel(String),
}

/// One operation kind the console knows about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindConfig {
    pub name: String,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

impl KindConfig {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            poll_interval_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub base_url: String,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    pub push_enabled: bool,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub kinds: Vec<KindConfig>,
    pub log_destination: LogDestination,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            poll_interval_ms: 1500,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            push_enabled: true,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            kinds: vec![
                KindConfig::named("upload"),
                KindConfig::named("background-update"),
                KindConfig::named("catalog-refresh"),
                KindConfig::named("log-filter"),
            ],
            log_destination: LogDestination::File,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Reads the config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config = ron::from_str(&content).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        monitor_info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn log_level(&self) -> Result<LevelFilter, ConfigError> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::LogLevel(self.log_level.clone()))
    }

    pub fn kind_names(&self) -> Vec<String> {
        self.kinds.iter().map(|kind| kind.name.clone()).collect()
    }

    pub fn to_settings(&self) -> MonitorSettings {
        let mut settings = MonitorSettings {
            base_url: self.base_url.clone(),
            endpoints: EndpointTemplates::default(),
            default_poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.max_attempts,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            push_enabled: self.push_enabled,
            ..MonitorSettings::default()
        };
        for kind in &self.kinds {
            if let Some(interval) = kind.poll_interval_ms {
                settings = settings.with_poll_interval(&kind.name, Duration::from_millis(interval));
            }
        }
        settings
    }
}
