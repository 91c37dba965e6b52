//! Configuration management for Tollgate.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TollgateError};
use crate::ratelimit::Strategy;

/// Prefix for environment overrides, e.g. `TOLLGATE__LIMITER__LIMIT=10`.
const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for Tollgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Admission controller configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Admission policy: at most `limit` admissions per period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Maximum admissions per period
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// Period expressed as a time unit
    #[serde(default = "default_unit")]
    pub unit: TimeUnit,

    /// Explicit period in milliseconds; takes precedence over `unit`
    #[serde(default)]
    pub period_ms: Option<u64>,

    /// Which admission strategy to run
    #[serde(default)]
    pub strategy: Strategy,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            unit: default_unit(),
            period_ms: None,
            strategy: Strategy::default(),
        }
    }
}

fn default_limit() -> u32 {
    5
}

fn default_unit() -> TimeUnit {
    TimeUnit::Minute
}

impl LimiterConfig {
    /// Create a configuration with an explicit period.
    ///
    /// Periods are kept at millisecond granularity; any sub-millisecond
    /// remainder rounds up.
    pub fn new(limit: u32, period: Duration, strategy: Strategy) -> Self {
        let period_ms = period.as_nanos().div_ceil(1_000_000);
        Self {
            limit,
            unit: default_unit(),
            period_ms: Some(u64::try_from(period_ms).unwrap_or(u64::MAX)),
            strategy,
        }
    }

    /// The effective period.
    pub fn period(&self) -> Duration {
        match self.period_ms {
            Some(ms) => Duration::from_millis(ms),
            None => self.unit.duration(),
        }
    }

    /// Reject policies that could never admit anything.
    pub fn validate(&self) -> Result<()> {
        validate_policy(self.limit, self.period())
    }
}

/// Check a `(limit, period)` pair.
pub(crate) fn validate_policy(limit: u32, period: Duration) -> Result<()> {
    if limit == 0 {
        return Err(TollgateError::Config(
            "limit must be greater than 0".to_string(),
        ));
    }
    if period.is_zero() {
        return Err(TollgateError::Config(
            "period must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// Time unit for the admission period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of one unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Millisecond => Duration::from_millis(1),
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
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

impl TollgateConfig {
    /// Load configuration from defaults, an optional YAML file, and the environment.
    ///
    /// The result is not validated, so later overrides can still fix it up;
    /// call [`LimiterConfig::validate`] once every layer is applied.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Yaml),
            );
        }

        let config = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.limiter.validate()?;
        Ok(config)
    }
}
