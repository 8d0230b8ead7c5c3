//! Hub configuration loaded from environment variables.

use std::time::Duration;

use common::RetryPolicy;
use flowhs::FlowServiceConfig;

/// Process configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `FLOWHS_TIMEOUT_SECS`: operation timeout (default: `30`)
/// - `FLOWHS_SPEAKER_RETRIES`: re-sends of a failed speaker command (default: `3`)
/// - `FLOWHS_TRANSACTION_RETRIES`: retries of a storage transaction (default: `3`)
/// - `DATABASE_URL`: Postgres history store; in-memory history when unset
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub operation_timeout: Duration,
    pub speaker_retries: u32,
    pub transaction_retries: u32,
    pub database_url: Option<String>,
}

const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", 3000),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            operation_timeout: Duration::from_secs(env_or(
                "FLOWHS_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )),
            speaker_retries: env_or("FLOWHS_SPEAKER_RETRIES", RetryPolicy::DEFAULT_MAX_RETRIES),
            transaction_retries: env_or(
                "FLOWHS_TRANSACTION_RETRIES",
                RetryPolicy::DEFAULT_MAX_RETRIES,
            ),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.is_empty()),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings handed to the flow services.
    pub fn service_config(&self) -> FlowServiceConfig {
        FlowServiceConfig {
            speaker_retries: self.speaker_retries,
            transaction_retry: RetryPolicy::new(self.transaction_retries),
            ..FlowServiceConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            operation_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            speaker_retries: RetryPolicy::DEFAULT_MAX_RETRIES,
            transaction_retries: RetryPolicy::DEFAULT_MAX_RETRIES,
            database_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.operation_timeout, Duration::from_secs(30));
        assert_eq!(config.speaker_retries, 3);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_service_config_carries_retries() {
        let config = Config {
            speaker_retries: 5,
            transaction_retries: 1,
            ..Config::default()
        };
        let services = config.service_config();
        assert_eq!(services.speaker_retries, 5);
        assert_eq!(services.transaction_retry.max_retries(), 1);
    }
}
