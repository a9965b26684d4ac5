//! Runtime configuration with validation.
//!
//! Every field can be overridden from a `BUSRPC_*` environment variable.

use busrpc_types::{SenderId, MAX_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Client and server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Broker/transport address (`memory://local` for the in-process bus)
    pub broker_address: String,
    /// Shared channel every server consumes
    pub request_channel: String,
    /// Reply channel = prefix + sender id
    pub reply_channel_prefix: String,
    /// Timeout used by `RpcClient::send`
    pub default_timeout_ms: u64,
    /// Upper bound accepted for any per-request timeout
    pub max_timeout_ms: u64,
    /// Admission ceiling for in-flight requests
    pub max_pending_requests: usize,
    /// Admission ceiling for registered streaming sessions
    pub max_active_sessions: usize,
    /// Period of the idle-session sweep
    pub session_sweep_interval_ms: u64,
    /// Sessions idle for longer than this are evicted
    pub session_idle_timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            broker_address: "memory://local".to_string(),
            request_channel: "rpc.requests".to_string(),
            reply_channel_prefix: "rpc.replies.".to_string(),
            default_timeout_ms: 30_000,
            max_timeout_ms: MAX_TIMEOUT_MS,
            max_pending_requests: 1_000,
            max_active_sessions: 100,
            session_sweep_interval_ms: 10_000,
            session_idle_timeout_ms: 60_000,
        }
    }
}

impl RpcConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker_address.trim().is_empty() {
            return Err(ConfigError::Empty("broker_address"));
        }
        if self.request_channel.trim().is_empty() {
            return Err(ConfigError::Empty("request_channel"));
        }
        if self.reply_channel_prefix.trim().is_empty() {
            return Err(ConfigError::Empty("reply_channel_prefix"));
        }

        if self.max_timeout_ms == 0 || self.max_timeout_ms > MAX_TIMEOUT_MS {
            return Err(ConfigError::InvalidTimeout(format!(
                "max_timeout_ms must be in [1, {MAX_TIMEOUT_MS}], got {}",
                self.max_timeout_ms
            )));
        }
        if self.default_timeout_ms == 0 || self.default_timeout_ms > self.max_timeout_ms {
            return Err(ConfigError::InvalidTimeout(format!(
                "default_timeout_ms must be in [1, {}], got {}",
                self.max_timeout_ms, self.default_timeout_ms
            )));
        }

        if self.max_pending_requests == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_pending_requests cannot be 0".into(),
            ));
        }
        if self.max_active_sessions == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_active_sessions cannot be 0".into(),
            ));
        }

        if self.session_sweep_interval_ms == 0 {
            return Err(ConfigError::InvalidInterval(
                "session_sweep_interval_ms cannot be 0".into(),
            ));
        }
        if self.session_idle_timeout_ms == 0 {
            return Err(ConfigError::InvalidInterval(
                "session_idle_timeout_ms cannot be 0".into(),
            ));
        }

        Ok(())
    }

    /// Load configuration from the process environment, then validate it.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            broker_address: lookup("BUSRPC_BROKER_ADDRESS").unwrap_or(defaults.broker_address),
            request_channel: lookup("BUSRPC_REQUEST_CHANNEL")
                .unwrap_or(defaults.request_channel),
            reply_channel_prefix: lookup("BUSRPC_REPLY_PREFIX")
                .unwrap_or(defaults.reply_channel_prefix),
            default_timeout_ms: parse_var(
                &lookup,
                "BUSRPC_DEFAULT_TIMEOUT_MS",
                defaults.default_timeout_ms,
            )?,
            max_timeout_ms: parse_var(&lookup, "BUSRPC_MAX_TIMEOUT_MS", defaults.max_timeout_ms)?,
            max_pending_requests: parse_var(
                &lookup,
                "BUSRPC_MAX_PENDING_REQUESTS",
                defaults.max_pending_requests,
            )?,
            max_active_sessions: parse_var(
                &lookup,
                "BUSRPC_MAX_ACTIVE_SESSIONS",
                defaults.max_active_sessions,
            )?,
            session_sweep_interval_ms: parse_var(
                &lookup,
                "BUSRPC_SESSION_SWEEP_INTERVAL_MS",
                defaults.session_sweep_interval_ms,
            )?,
            session_idle_timeout_ms: parse_var(
                &lookup,
                "BUSRPC_SESSION_IDLE_TIMEOUT_MS",
                defaults.session_idle_timeout_ms,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reply channel a given sender subscribes to.
    pub fn reply_channel(&self, sender_id: &SenderId) -> String {
        format!("{}{}", self.reply_channel_prefix, sender_id)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.session_sweep_interval_ms)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.session_idle_timeout_ms)
    }
}

fn parse_var<F, T>(lookup: &F, var: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnvValue {
                var: var.to_string(),
                value: raw,
            }),
        None => Ok(default),
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required string setting is blank
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("invalid limit: {0}")]
    InvalidLimit(String),

    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    /// An environment variable could not be parsed
    #[error("invalid value for {var}: {value:?}")]
    InvalidEnvValue { var: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_default_config_valid() {
        let config = RpcConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_pending_requests, 1_000);
        assert_eq!(config.max_active_sessions, 100);
    }

    #[test]
    fn test_reply_channel_naming() {
        let config = RpcConfig::default();
        let sender = SenderId::new("client-7").unwrap();
        assert_eq!(config.reply_channel(&sender), "rpc.replies.client-7");
    }

    #[test]
    fn test_invalid_timeouts() {
        let mut config = RpcConfig::default();
        config.max_timeout_ms = 300_001;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout(_))
        ));

        let mut config = RpcConfig::default();
        config.default_timeout_ms = config.max_timeout_ms + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout(_))
        ));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = RpcConfig::default();
        config.max_pending_requests = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidLimit(_))));

        let mut config = RpcConfig::default();
        config.session_sweep_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_empty_channel_rejected() {
        let mut config = RpcConfig::default();
        config.request_channel = "  ".into();
        assert_eq!(config.validate(), Err(ConfigError::Empty("request_channel")));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = RpcConfig::from_lookup(lookup_from(&[
            ("BUSRPC_REQUEST_CHANNEL", "orders.requests"),
            ("BUSRPC_MAX_PENDING_REQUESTS", "8"),
            ("BUSRPC_DEFAULT_TIMEOUT_MS", " 2500 "),
        ]))
        .unwrap();
        assert_eq!(config.request_channel, "orders.requests");
        assert_eq!(config.max_pending_requests, 8);
        assert_eq!(config.default_timeout_ms, 2_500);
        assert_eq!(config.reply_channel_prefix, "rpc.replies.");
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = RpcConfig::from_lookup(lookup_from(&[("BUSRPC_MAX_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidEnvValue {
                var: "BUSRPC_MAX_TIMEOUT_MS".into(),
                value: "soon".into(),
            }
        );
    }

    #[test]
    fn test_serde_defaults_fill_missing_fields() {
        let config: RpcConfig =
            serde_json::from_str(r#"{"request_channel":"custom"}"#).unwrap();
        assert_eq!(config.request_channel, "custom");
        assert_eq!(config.max_active_sessions, 100);
    }
}
