//! CLI configuration management.
//!
//! Consolidates environment variable reads and command-line overrides into a
//! validated configuration.

use std::time::Duration;
use wallet_ledger::db::{ConfigError, DatabaseConfig, RequestContext};

/// Complete CLI configuration
#[derive(Debug, Clone)]
pub struct CtlConfig {
    /// Database configuration
    pub database: DatabaseConfig,
    /// Deadline for the whole command, if any
    pub request_timeout: Option<Duration>,
}

impl CtlConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `database_url_override` - Optional database URL (from `--db-url`)
    /// * `timeout_ms_override` - Optional request timeout (from `--timeout-ms`)
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(
        database_url_override: Option<String>,
        timeout_ms_override: Option<u64>,
    ) -> Result<Self, ConfigError> {
        let database = DatabaseConfig::from_env_with_url(database_url_override)?;

        let timeout_ms = match timeout_ms_override {
            Some(ms) => Some(ms),
            None => match std::env::var("WALLETCTL_TIMEOUT_MS") {
                Ok(raw) => Some(raw.trim().parse().map_err(|_| ConfigError::Invalid {
                    var: "WALLETCTL_TIMEOUT_MS".to_string(),
                    reason: format!("Cannot parse {raw:?}"),
                })?),
                Err(_) => None,
            },
        };

        Ok(Self {
            database,
            request_timeout: timeout_ms.map(Duration::from_millis),
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;

        if self.request_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid {
                var: "WALLETCTL_TIMEOUT_MS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Context for a single command, carrying the configured deadline
    pub fn request_context(&self) -> RequestContext {
        match self.request_timeout {
            Some(timeout) => RequestContext::with_timeout(timeout),
            None => RequestContext::background(),
        }
    }
}
