//! Engine and cache configuration.
//!
//! Configuration is usually loaded from a TOML file:
//!
//! ```toml
//! application_id = "shop"
//! max_concurrent_loads = 8
//! log_filter = "respipe=debug"
//!
//! [cache]
//! root_template = "/var/app-integration/{app}/files"
//! lock_expiry_secs = 300
//! max_entry_name_attempts = 20
//! ```
//!
//! Every field except `application_id` has a default.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_LOCK_EXPIRY_SECS, DEFAULT_MAX_CONCURRENT_LOADS, DEFAULT_MAX_ENTRY_NAME_ATTEMPTS,
    DEFAULT_ROOT_TEMPLATE,
};
use crate::error::ConfigError;

/// Configuration of a [`ResourceCache`](crate::cache::ResourceCache).
///
/// # Defaults
///
/// | Setting                   | Default                              |
/// |---------------------------|--------------------------------------|
/// | `root_template`           | `/var/app-integration/{app}/files`   |
/// | `lock_expiry_secs`        | 300 (5 minutes)                      |
/// | `max_entry_name_attempts` | 20                                   |
///
/// # Examples
///
/// ```
/// use respipe::config::CacheConfig;
///
/// let config = CacheConfig::default()
///     .with_root_template("/cache/{app}")
///     .with_lock_expiry_secs(60);
/// assert_eq!(config.lock_expiry().as_secs(), 60);
/// assert_eq!(config.max_entry_name_attempts, 20);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root path template; `{app}` is replaced by the escaped application id.
    #[serde(default = "default_root_template")]
    pub root_template: String,

    /// Age after which a lease may be taken over by another holder.
    #[serde(default = "default_lock_expiry_secs")]
    pub lock_expiry_secs: u64,

    /// Attempts to find a free entry name before a put fails.
    #[serde(default = "default_max_entry_name_attempts")]
    pub max_entry_name_attempts: usize,
}

fn default_root_template() -> String {
    DEFAULT_ROOT_TEMPLATE.to_string()
}

fn default_lock_expiry_secs() -> u64 {
    DEFAULT_LOCK_EXPIRY_SECS
}

fn default_max_entry_name_attempts() -> usize {
    DEFAULT_MAX_ENTRY_NAME_ATTEMPTS
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root_template: default_root_template(),
            lock_expiry_secs: default_lock_expiry_secs(),
            max_entry_name_attempts: default_max_entry_name_attempts(),
        }
    }
}

impl CacheConfig {
    /// Sets the root path template.
    pub fn with_root_template(mut self, template: impl Into<String>) -> Self {
        self.root_template = template.into();
        self
    }

    /// Sets the lease expiry in seconds.
    pub fn with_lock_expiry_secs(mut self, secs: u64) -> Self {
        self.lock_expiry_secs = secs;
        self
    }

    /// Sets the number of entry name attempts.
    pub fn with_max_entry_name_attempts(mut self, attempts: usize) -> Self {
        self.max_entry_name_attempts = attempts;
        self
    }

    /// Returns the lease expiry.
    pub fn lock_expiry(&self) -> Duration {
        Duration::from_secs(self.lock_expiry_secs)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if the template is not an absolute path
    /// without a trailing `/`, does not contain `{app}`, or if no entry name
    /// attempt is allowed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.root_template.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "cache.root_template must be an absolute path: {}",
                self.root_template
            )));
        }
        if self.root_template.len() > 1 && self.root_template.ends_with('/') {
            return Err(ConfigError::Invalid(format!(
                "cache.root_template must not end with '/': {}",
                self.root_template
            )));
        }
        if !self.root_template.contains("{app}") {
            return Err(ConfigError::Invalid(
                "cache.root_template must contain {app}".to_string(),
            ));
        }
        if self.max_entry_name_attempts == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_entry_name_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration of an [`IntegrationEngine`](crate::engine::IntegrationEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Application whose resources are integrated; namespaces the cache root.
    pub application_id: String,

    /// Cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Maximum number of resources loaded at the same time during prefetch.
    #[serde(default = "default_max_concurrent_loads")]
    pub max_concurrent_loads: usize,

    /// `tracing` filter directive used by [`logging::init`](crate::logging::init).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
}

fn default_max_concurrent_loads() -> usize {
    DEFAULT_MAX_CONCURRENT_LOADS
}

impl EngineConfig {
    /// Creates a configuration with defaults for everything but the
    /// application id.
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            cache: CacheConfig::default(),
            max_concurrent_loads: default_max_concurrent_loads(),
            log_filter: None,
        }
    }

    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml`](Self::from_toml).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML or missing fields,
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration to TOML.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Serialize`] if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Sets the cache settings.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the prefetch concurrency.
    pub fn with_max_concurrent_loads(mut self, loads: usize) -> Self {
        self.max_concurrent_loads = loads;
        self
    }

    /// Installs the global `tracing` subscriber with [`log_filter`](Self::log_filter).
    ///
    /// Without a filter, `RUST_LOG` applies. Returns `false` if a subscriber
    /// was already installed or the filter is invalid.
    #[cfg(feature = "logging")]
    pub fn init_logging(&self) -> bool {
        crate::logging::init(self.log_filter.as_deref())
    }

    /// Sets the `tracing` filter directive.
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for a blank application id, zero
    /// concurrency or an invalid [`CacheConfig`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "application_id must not be blank".to_string(),
            ));
        }
        if self.max_concurrent_loads == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_loads must be at least 1".to_string(),
            ));
        }
        self.cache.validate()
    }
}
