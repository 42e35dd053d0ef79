//! Configuration management for Gatekeeper.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::RuleConfig;

/// Prefix for environment variable overrides, e.g.
/// `GATEKEEPER_RATE_LIMITING__SWEEP_INTERVAL_SECS=30`.
const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for the Gatekeeper limiter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Which counter store backs the limiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// One map behind a single lock
    #[default]
    Memory,
    /// Key space split across independently locked shards
    Sharded,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Counter store implementation
    #[serde(default)]
    pub backend: BackendKind,

    /// Shard count for the sharded backend (power of two, at least 2)
    #[serde(default)]
    pub shards: Option<usize>,

    /// How often expired buckets are evicted, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Rule applied to operations without an entry in `rules`
    #[serde(default = "default_rule")]
    pub default_rule: RuleConfig,

    /// Per-operation rules
    #[serde(default = "default_rules")]
    pub rules: HashMap<String, RuleConfig>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            shards: None,
            sweep_interval_secs: default_sweep_interval(),
            default_rule: default_rule(),
            rules: default_rules(),
        }
    }
}

impl RateLimitingConfig {
    /// Interval between two sweeps of the counter store.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_rule() -> RuleConfig {
    RuleConfig::per_secs(100, 120)
}

fn default_rules() -> HashMap<String, RuleConfig> {
    let standard = default_rule();
    HashMap::from([
        ("summoner".to_string(), standard.clone()),
        ("match".to_string(), standard.clone()),
        ("league".to_string(), standard),
        (
            "match-list".to_string(),
            RuleConfig::per_secs(1000, 10),
        ),
    ])
}

impl GatekeeperConfig {
    /// Load configuration from an optional YAML file, then apply
    /// `GATEKEEPER_*` environment overrides.
    ///
    /// Only scalar settings can be overridden from the environment. Rule
    /// tables come from the file alone, since environment keys lose their
    /// case and operation names are case-sensitive.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut loaded = match path {
            Some(path) => {
                info!(path = %path.display(), "Loading configuration file");
                let contents = std::fs::read_to_string(path)?;
                Self::parse_yaml(&contents)?
            }
            None => Self::default(),
        };

        let overrides: EnvOverrides = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        overrides.apply(&mut loaded);

        loaded.validate()?;
        Ok(loaded)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config = Self::parse_yaml(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn parse_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Reject settings the limiter cannot run with.
    ///
    /// Rules are checked when the [`RuleSet`](crate::ratelimit::RuleSet) is
    /// built from this configuration.
    pub fn validate(&self) -> Result<()> {
        let rate_limiting = &self.rate_limiting;

        if rate_limiting.sweep_interval_secs == 0 {
            return Err(GatekeeperError::Config(
                "sweep_interval_secs must be greater than zero".to_string(),
            ));
        }

        if let Some(shards) = rate_limiting.shards {
            if shards < 2 || !shards.is_power_of_two() {
                return Err(GatekeeperError::Config(format!(
                    "shards must be a power of two and at least 2, got {}",
                    shards
                )));
            }
        }

        Ok(())
    }
}

/// Settings `GATEKEEPER_*` environment variables may override.
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    #[serde(default)]
    logging: LoggingOverrides,
    #[serde(default)]
    rate_limiting: RateLimitingOverrides,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingOverrides {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RateLimitingOverrides {
    backend: Option<BackendKind>,
    shards: Option<usize>,
    sweep_interval_secs: Option<u64>,
}

impl EnvOverrides {
    fn apply(self, config: &mut GatekeeperConfig) {
        if let Some(level) = self.logging.level {
            config.logging.level = level;
        }
        if let Some(json) = self.logging.json {
            config.logging.json = json;
        }

        let rate_limiting = self.rate_limiting;
        if let Some(backend) = rate_limiting.backend {
            config.rate_limiting.backend = backend;
        }
        if let Some(shards) = rate_limiting.shards {
            config.rate_limiting.shards = Some(shards);
        }
        if let Some(interval) = rate_limiting.sweep_interval_secs {
            config.rate_limiting.sweep_interval_secs = interval;
        }
    }
}
