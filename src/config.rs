//! Configuration module for the poller process.
//!
//! Process settings come from environment variables with sensible defaults.
//! The per-deployment inverter configuration lives in a JSON file whose path
//! is one of those settings; it is validated separately in [`crate::validate`].

use serde_json::Value;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default Solax Cloud realtime endpoint.
pub const DEFAULT_API_URL: &str = "https://www.solaxcloud.com/proxyApp/proxy/api/getRealtimeInfo.do";

/// Errors raised while reading the raw configuration file.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("config file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Path to the JSON inverter configuration (default: "config.json")
    pub config_path: String,
    /// Solax Cloud realtime endpoint
    pub api_url: String,
    /// Per-request timeout for Solax Cloud calls (default: 10s)
    pub request_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            config_path: "config.json".to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SOLAX_CONFIG_PATH`: inverter configuration file (default: "config.json")
    /// - `SOLAX_API_URL`: realtime endpoint (default: Solax Cloud)
    /// - `SOLAX_REQUEST_TIMEOUT_SECS`: request timeout in seconds (default: 10)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(path) = lookup("SOLAX_CONFIG_PATH") {
            cfg.config_path = path;
        }

        if let Some(url) = lookup("SOLAX_API_URL") {
            cfg.api_url = url;
        }

        if let Some(secs_str) = lookup("SOLAX_REQUEST_TIMEOUT_SECS") {
            match secs_str.parse::<u64>() {
                Ok(secs) if secs > 0 => cfg.request_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(
                    "Ignoring invalid SOLAX_REQUEST_TIMEOUT_SECS={}, using {:?}",
                    secs_str,
                    cfg.request_timeout
                ),
            }
        }

        cfg
    }
}

/// Read and parse the raw (unvalidated) inverter configuration.
pub fn load_raw_config<P: AsRef<Path>>(path: P) -> Result<Value, LoadError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.config_path, "config.json");
        assert_eq!(cfg.api_url, DEFAULT_API_URL);
        assert_eq!(cfg.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SOLAX_CONFIG_PATH", "/etc/solax.json"),
            ("SOLAX_API_URL", "http://localhost:9000/realtime"),
            ("SOLAX_REQUEST_TIMEOUT_SECS", "3"),
        ]
        .into_iter()
        .collect();

        let cfg = ServiceConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.config_path, "/etc/solax.json");
        assert_eq!(cfg.api_url, "http://localhost:9000/realtime");
        assert_eq!(cfg.request_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_invalid_timeout_keeps_default() {
        let cfg = ServiceConfig::from_lookup(|k| {
            (k == "SOLAX_REQUEST_TIMEOUT_SECS").then(|| "0".to_string())
        });
        assert_eq!(cfg.request_timeout, Duration::from_secs(10));

        let cfg = ServiceConfig::from_lookup(|k| {
            (k == "SOLAX_REQUEST_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert_eq!(cfg.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_load_raw_config() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, r#"{{"tokenId": "abc", "name": "Roof", "sn": "SN1"}}"#).unwrap();

        let raw = tokio_test::assert_ok!(load_raw_config(tmp.path()));
        assert_eq!(raw["tokenId"], "abc");
        assert_eq!(raw["sn"], "SN1");
    }

    #[test]
    fn test_load_raw_config_errors() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, "not json").unwrap();
        assert!(matches!(load_raw_config(tmp.path()), Err(LoadError::Json(_))));

        assert!(matches!(
            load_raw_config("/nonexistent/solax/config.json"),
            Err(LoadError::Io(_))
        ));
    }
}
