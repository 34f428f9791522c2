//! Lock manager configuration.
//!
//! Values are layered with `figment`: built-in defaults, then an optional TOML
//! file (`[locks]` table), then `LOCKTABLE_*` environment variables.
//!
//! ```toml
//! [locks]
//! partitions = 256
//! resource_types = 8
//! deadlock_check_interval_ms = 500
//! ```

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Table name that holds lock settings in configuration files.
pub const CONFIG_SECTION: &str = "locks";

/// Environment variable prefix for overrides (`LOCKTABLE_PARTITIONS=64`).
pub const ENV_PREFIX: &str = "LOCKTABLE_";

/// Upper bound on partitions; entry handles reserve 16 bits for the partition.
pub const MAX_PARTITIONS: usize = 1 << 16;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A count that is used as a bit mask is not a power of two.
    #[error("{field} must be a non-zero power of two, got {value}")]
    NotPowerOfTwo {
        /// Offending field.
        field: &'static str,
        /// Offending value.
        value: usize,
    },

    /// A value is outside its accepted range.
    #[error("{field} out of range: {reason}")]
    OutOfRange {
        /// Offending field.
        field: &'static str,
        /// Accepted range.
        reason: String,
    },

    /// Figment could not read or merge a source.
    #[error("Failed to load configuration: {0}")]
    Load(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

/// Lock manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockManagerConfig {
    /// Number of partitions (power of two).
    pub partitions: usize,
    /// Number of resource types (power of two).
    pub resource_types: usize,
    /// How long a waiter parks before running deadlock detection.
    pub deadlock_check_interval_ms: u64,
    /// Panic on invariant violations instead of returning an error.
    ///
    /// `None` means "strict in debug builds only".
    pub strict_invariants: Option<bool>,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            partitions: 128,
            resource_types: 8,
            deadlock_check_interval_ms: 1000,
            strict_invariants: None,
        }
    }
}

impl LockManagerConfig {
    /// Loads configuration from defaults, an optional TOML file and the
    /// environment, then validates it.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Self::base_figment();
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let figment = figment.merge(
            Env::prefixed(ENV_PREFIX)
                .map(|key| format!("{CONFIG_SECTION}.{}", key.as_str()).into()),
        );
        Self::extract(&figment)
    }

    /// Parses configuration from a TOML document, ignoring the environment.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let figment = Self::base_figment().merge(Toml::string(toml));
        Self::extract(&figment)
    }

    fn base_figment() -> Figment {
        Figment::new().merge(Serialized::default(CONFIG_SECTION, Self::default()))
    }

    fn extract(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract_inner(CONFIG_SECTION)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_power_of_two("partitions", self.partitions)?;
        check_power_of_two("resource_types", self.resource_types)?;
        if self.partitions > MAX_PARTITIONS {
            return Err(ConfigError::OutOfRange {
                field: "partitions",
                reason: format!("at most {MAX_PARTITIONS}, got {}", self.partitions),
            });
        }
        if self.deadlock_check_interval_ms == 0 {
            return Err(ConfigError::OutOfRange {
                field: "deadlock_check_interval_ms",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Sets the partition count.
    #[must_use]
    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions;
        self
    }

    /// Sets the resource type count.
    #[must_use]
    pub fn with_resource_types(mut self, resource_types: usize) -> Self {
        self.resource_types = resource_types;
        self
    }

    /// Sets the park interval between deadlock checks.
    #[must_use]
    pub fn with_deadlock_check_interval(mut self, interval: Duration) -> Self {
        self.deadlock_check_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Forces strict (panicking) or lenient invariant handling.
    #[must_use]
    pub fn with_strict_invariants(mut self, strict: bool) -> Self {
        self.strict_invariants = Some(strict);
        self
    }

    /// Park interval between deadlock checks.
    #[must_use]
    pub fn deadlock_check_interval(&self) -> Duration {
        Duration::from_millis(self.deadlock_check_interval_ms)
    }

    /// Whether invariant violations panic.
    #[must_use]
    pub fn strict_invariants(&self) -> bool {
        self.strict_invariants.unwrap_or(cfg!(debug_assertions))
    }
}

fn check_power_of_two(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value.is_power_of_two() {
        Ok(())
    } else {
        Err(ConfigError::NotPowerOfTwo { field, value })
    }
}
