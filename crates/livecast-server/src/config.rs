//! Server configuration loading.
//!
//! Loading flow:
//! 1. Start with compiled [`ServerConfig::default()`]
//! 2. If a JSON config file is given and exists, its keys override defaults
//!    (missing keys keep their default)
//! 3. Apply environment variable overrides (highest priority short of CLI flags)

use std::path::Path;
use std::time::Duration;

use livecast_engine::RelayConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Server configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Per-client outbound queue length. Live frames beyond it are dropped for
    /// that client. A replay occupies one entry regardless of its size.
    pub max_send_queue: usize,
    /// Exact origin allowed by CORS, or `*` for any origin.
    pub cors_origin: String,
    pub cors_credentials: bool,
    /// Warn when a single stream buffers this many bytes. `None` disables it.
    pub buffer_warn_bytes: Option<u64>,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            max_send_queue: 4096,
            cors_origin: "http://localhost:5173".into(),
            cors_credentials: true,
            buffer_warn_bytes: Some(256 * 1024 * 1024),
            heartbeat_interval_secs: 30,
            client_timeout_secs: 90,
            cleanup_interval_secs: 60,
            log_level: "info".into(),
            log_json: false,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            buffer_warn_bytes: self.buffer_warn_bytes,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_send_queue == 0 {
            return Err(ConfigError::InvalidValue("maxSendQueue must be at least 1".into()));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "heartbeatIntervalSecs must be at least 1".into(),
            ));
        }
        if self.client_timeout_secs <= self.heartbeat_interval_secs {
            return Err(ConfigError::InvalidValue(format!(
                "clientTimeoutSecs ({}) must exceed heartbeatIntervalSecs ({})",
                self.client_timeout_secs, self.heartbeat_interval_secs
            )));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "cleanupIntervalSecs must be at least 1".into(),
            ));
        }
        if self.cors_origin != "*" && axum::http::HeaderValue::from_str(&self.cors_origin).is_err() {
            return Err(ConfigError::InvalidValue(format!(
                "corsOrigin is not a valid header value: {:?}",
                self.cors_origin
            )));
        }
        if self.cors_origin == "*" && self.cors_credentials {
            return Err(ConfigError::InvalidValue(
                "corsCredentials cannot be combined with corsOrigin \"*\"".into(),
            ));
        }
        Ok(())
    }
}

/// Load config from an optional file, then apply process environment overrides.
///
/// The result is not validated; callers apply any remaining overrides and then
/// call [`ServerConfig::validate`].
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig> {
    let mut config = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading config from file");
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        }
        Some(path) => {
            debug!(?path, "config file not found, using defaults");
            ServerConfig::default()
        }
        None => ServerConfig::default(),
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Apply environment overrides read through `lookup`.
///
/// Invalid values are logged and ignored, falling back to file/default.
pub fn apply_env_overrides(config: &mut ServerConfig, lookup: impl Fn(&str) -> Option<String>) {
    let env = Env { lookup };
    if let Some(v) = env.string("LIVECAST_HOST") {
        config.host = v;
    }
    if let Some(v) = env.u64_in("LIVECAST_PORT", 0, u16::MAX as u64) {
        config.port = v as u16;
    }
    // Name kept compatible with existing front-end deployments.
    if let Some(v) = env.string("FRONTEND_URL") {
        config.cors_origin = v;
    }
    if let Some(v) = env.bool("LIVECAST_CORS_CREDENTIALS") {
        config.cors_credentials = v;
    }
    if let Some(v) = env.u64_in("LIVECAST_MAX_SEND_QUEUE", 1, 1_000_000) {
        config.max_send_queue = v as usize;
    }
    if let Some(v) = env.u64_in("LIVECAST_BUFFER_WARN_BYTES", 0, u64::MAX) {
        config.buffer_warn_bytes = (v > 0).then_some(v);
    }
    if let Some(v) = env.string("LIVECAST_LOG_LEVEL") {
        config.log_level = v;
    }
    if let Some(v) = env.bool("LIVECAST_LOG_JSON") {
        config.log_json = v;
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = val.trim().parse::<u64>().ok().filter(|n| (min..=max).contains(n));
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.cors_origin, "http://localhost:5173");
        assert!(config.cors_credentials);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ServerConfig = serde_json::from_str(r#"{"port": 8080, "logJson": true}"#).unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.log_json);
        assert_eq!(config.max_send_queue, ServerConfig::default().max_send_queue);
    }

    #[test]
    fn null_buffer_threshold_disables_warning() {
        let config: ServerConfig = serde_json::from_str(r#"{"bufferWarnBytes": null}"#).unwrap();
        assert_eq!(config.buffer_warn_bytes, None);
        assert_eq!(config.relay_config().buffer_warn_bytes, None);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = ServerConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("LIVECAST_HOST", "127.0.0.1"),
                ("LIVECAST_PORT", "9000"),
                ("FRONTEND_URL", "https://app.example.com"),
                ("LIVECAST_CORS_CREDENTIALS", "off"),
                ("LIVECAST_MAX_SEND_QUEUE", "64"),
                ("LIVECAST_BUFFER_WARN_BYTES", "0"),
                ("LIVECAST_LOG_LEVEL", "debug"),
                ("LIVECAST_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(config.bind_addr(), "127.0.0.1:9000");
        assert_eq!(config.cors_origin, "https://app.example.com");
        assert!(!config.cors_credentials);
        assert_eq!(config.max_send_queue, 64);
        assert_eq!(config.buffer_warn_bytes, None);
        assert_eq!(config.log_level, "debug");
        assert!(config.log_json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut config = ServerConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("LIVECAST_PORT", "99999"),
                ("LIVECAST_MAX_SEND_QUEUE", "zero"),
                ("LIVECAST_LOG_JSON", "maybe"),
                ("LIVECAST_HOST", ""),
            ]),
        );
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn wildcard_origin_with_credentials_is_rejected() {
        let config = ServerConfig {
            cors_origin: "*".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));

        let config = ServerConfig {
            cors_origin: "*".into(),
            cors_credentials: false,
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn timeout_must_exceed_heartbeat() {
        let config = ServerConfig {
            heartbeat_interval_secs: 30,
            client_timeout_secs: 30,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("clientTimeoutSecs"));
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join("livecast-does-not-exist.json");
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.max_send_queue, ServerConfig::default().max_send_queue);
    }

    #[test]
    fn load_defers_validation_to_caller() {
        let path = std::env::temp_dir().join(format!("livecast-wild-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"maxSendQueue": 0}"#).unwrap();
        let loaded = load_config(Some(&path));
        std::fs::remove_file(&path).ok();

        let mut config = loaded.unwrap();
        assert!(config.validate().is_err());

        // A later override can still make it valid.
        config.max_send_queue = 8;
        config.validate().unwrap();
    }

    #[test]
    fn load_invalid_json_errors() {
        let path = std::env::temp_dir().join(format!("livecast-bad-{}.json", std::process::id()));
        std::fs::write(&path, "{not json").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, ConfigError::Json(_)));
    }
}
