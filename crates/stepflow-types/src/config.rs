//! Engine configuration, loaded from `config.toml` in the data directory.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the stepflow service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Address the HTTP API binds to.
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    /// Timer service poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Database URL override. `None` means the default path inside the
    /// data directory.
    #[serde(default)]
    pub database_url: Option<String>,
}

fn default_http_addr() -> String {
    "127.0.0.1:7415".to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            poll_interval_ms: default_poll_interval_ms(),
            database_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.http_addr, "127.0.0.1:7415");
        assert_eq!(config.poll_interval_ms, 500);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: EngineConfig = toml::from_str("poll_interval_ms = 100").unwrap();
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.http_addr, "127.0.0.1:7415");
    }
}
