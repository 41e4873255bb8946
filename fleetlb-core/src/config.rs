use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Load balancer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub state: StateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Tuning knobs for the live balancer state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Grace period before a superseded client is shut down.
    /// Skipped once a full shutdown begins.
    pub client_retire_delay_ms: u64,

    /// How many times a failing client shutdown is retried before giving up
    pub client_shutdown_retries: u32,

    /// Ring points per unit of weight for the degrader strategy
    pub default_points_per_weight: u32,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            client_retire_delay_ms: 500,
            client_shutdown_retries: 2,
            default_points_per_weight: 100,
        }
    }
}

impl StateConfig {
    #[must_use]
    pub const fn client_retire_delay(&self) -> Duration {
        Duration::from_millis(self.client_retire_delay_ms)
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (FLEETLB_STATE__CLIENT_SHUTDOWN_RETRIES, etc.)
        builder = builder.add_source(
            Environment::with_prefix("FLEETLB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }
}
