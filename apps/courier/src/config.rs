//! Environment-driven service configuration.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use courier_bridge::bridge::BridgeConfig;
use courier_bridge::status::StatusConfig;
use courier_worker::supervisor::WorkerConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TELEGRAM_BOT_TOKEN is not set")]
    MissingBotToken,

    #[error("TELEGRAM_ALLOWED_USER_ID is not set")]
    MissingAllowedUserId,

    #[error("invalid TELEGRAM_ALLOWED_USER_ID: {0}")]
    InvalidAllowedUserId(String),

    #[error("invalid COURIER_BIND_ADDR: {0}")]
    InvalidBindAddr(#[from] std::net::AddrParseError),

    #[error("invalid {var}: {value}")]
    InvalidNumber { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub allowed_user_id: i64,
    pub bind_addr: SocketAddr,
    pub worker: WorkerConfig,
    pub bridge: BridgeConfig,
    pub status: StatusConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = env::var("TELEGRAM_BOT_TOKEN")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingBotToken)?;

        let allowed_user_raw = env::var("TELEGRAM_ALLOWED_USER_ID")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingAllowedUserId)?;
        let allowed_user_id = allowed_user_raw
            .parse::<i64>()
            .map_err(|_| ConfigError::InvalidAllowedUserId(allowed_user_raw))?;

        let bind_addr = env::var("COURIER_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()?;

        let worker_defaults = WorkerConfig::default();
        let worker = WorkerConfig {
            program: env::var("COURIER_WORKER_CMD")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(worker_defaults.program),
            args: env::var("COURIER_WORKER_ARGS")
                .ok()
                .map(|value| {
                    value
                        .split_whitespace()
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or(worker_defaults.args),
            restart_delay: parse_duration_ms(
                "COURIER_WORKER_RESTART_DELAY_MS",
                env::var("COURIER_WORKER_RESTART_DELAY_MS").ok().as_deref(),
                worker_defaults.restart_delay,
            )?,
            ready_fallback: parse_duration_ms(
                "COURIER_WORKER_READY_TIMEOUT_MS",
                env::var("COURIER_WORKER_READY_TIMEOUT_MS").ok().as_deref(),
                worker_defaults.ready_fallback,
            )?,
        };

        let status_defaults = StatusConfig::default();
        let status = StatusConfig {
            edit_throttle: parse_duration_ms(
                "COURIER_STATUS_EDIT_INTERVAL_MS",
                env::var("COURIER_STATUS_EDIT_INTERVAL_MS").ok().as_deref(),
                status_defaults.edit_throttle,
            )?,
            keepalive_interval: parse_duration_ms(
                "COURIER_TYPING_INTERVAL_MS",
                env::var("COURIER_TYPING_INTERVAL_MS").ok().as_deref(),
                status_defaults.keepalive_interval,
            )?,
            ..status_defaults
        };

        let bridge_defaults = BridgeConfig::default();
        let bridge = BridgeConfig {
            max_chunk_len: parse_usize(
                "COURIER_MAX_CHUNK_LEN",
                env::var("COURIER_MAX_CHUNK_LEN").ok().as_deref(),
                bridge_defaults.max_chunk_len,
            )?,
            notify_crash: parse_bool(
                env::var("COURIER_NOTIFY_CRASH").ok().as_deref(),
                bridge_defaults.notify_crash,
            ),
        };

        Ok(Self {
            bot_token,
            allowed_user_id,
            bind_addr,
            worker,
            bridge,
            status,
        })
    }
}

fn parse_duration_ms(
    var: &'static str,
    value: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidNumber {
                var,
                value: raw.to_string(),
            }),
    }
}

fn parse_usize(
    var: &'static str,
    value: Option<&str>,
    default: usize,
) -> Result<usize, ConfigError> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(default),
        Some(raw) => raw.parse::<usize>().map_err(|_| ConfigError::InvalidNumber {
            var,
            value: raw.to_string(),
        }),
    }
}

fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(str::trim) {
        Some("0") | Some("false") | Some("no") => false,
        Some("1") | Some("true") | Some("yes") => true,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_falls_back_to_default_when_unset() {
        let parsed = parse_duration_ms("X", None, Duration::from_millis(5000)).unwrap();
        assert_eq!(parsed, Duration::from_millis(5000));
        let parsed = parse_duration_ms("X", Some("  "), Duration::from_millis(5000)).unwrap();
        assert_eq!(parsed, Duration::from_millis(5000));
    }

    #[test]
    fn duration_parses_milliseconds() {
        let parsed = parse_duration_ms("X", Some("250"), Duration::ZERO).unwrap();
        assert_eq!(parsed, Duration::from_millis(250));
    }

    #[test]
    fn duration_rejects_garbage() {
        let err = parse_duration_ms("COURIER_X", Some("soon"), Duration::ZERO).unwrap_err();
        assert!(err.to_string().contains("COURIER_X"));
        assert!(err.to_string().contains("soon"));
    }

    #[test]
    fn usize_parses_and_defaults() {
        assert_eq!(parse_usize("X", None, 4000).unwrap(), 4000);
        assert_eq!(parse_usize("X", Some("1024"), 4000).unwrap(), 1024);
        assert!(parse_usize("X", Some("-3"), 4000).is_err());
    }

    #[test]
    fn bool_accepts_common_spellings() {
        assert!(parse_bool(None, true));
        assert!(!parse_bool(Some("0"), true));
        assert!(!parse_bool(Some("false"), true));
        assert!(parse_bool(Some("yes"), false));
        assert!(parse_bool(Some("oui"), true)); // unknown keeps the default
    }
}
