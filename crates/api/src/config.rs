//! Application configuration loaded from environment variables.

use std::time::Duration;

use engine::EngineConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for structured log lines (default: human-readable)
/// - `DATABASE_URL`: Postgres connection string (unset: in-memory store)
/// - `TIP_PERCENT`: tip added to generated bills (default: `0`)
/// - `LOCK_TIMEOUT_MS`: session lock wait bound (default: `5000`)
/// - `SESSION_IDLE_TIMEOUT_SECS`: abandon waiting sessions older than this (unset: never)
/// - `IDLE_SWEEP_INTERVAL_SECS`: how often the idle sweep runs (default: `60`)
/// - `EVENT_CHANNEL_CAPACITY`: buffered events per restaurant (default: `1024`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub database_url: Option<String>,
    pub tip_percent: f64,
    pub lock_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub idle_sweep_interval: Duration,
    pub event_channel_capacity: usize,
}

fn var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: var("PORT").unwrap_or(defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_json: std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            tip_percent: var::<f64>("TIP_PERCENT")
                .filter(|p| p.is_finite() && *p >= 0.0)
                .unwrap_or(defaults.tip_percent),
            lock_timeout: var("LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            idle_timeout: var::<u64>("SESSION_IDLE_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            idle_sweep_interval: var::<u64>("IDLE_SWEEP_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_sweep_interval),
            event_channel_capacity: var("EVENT_CHANNEL_CAPACITY")
                .unwrap_or(defaults.event_channel_capacity),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Tip as basis points of the subtotal.
    pub fn tip_bps(&self) -> u32 {
        (self.tip_percent * 100.0).round() as u32
    }

    pub fn engine_config(&self) -> EngineConfig {
        let config = EngineConfig::default()
            .with_tip_bps(self.tip_bps())
            .with_lock_timeout(self.lock_timeout)
            .with_event_channel_capacity(self.event_channel_capacity);
        match self.idle_timeout {
            Some(window) => config.with_idle_window(window),
            None => config,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_json: false,
            database_url: None,
            tip_percent: 0.0,
            lock_timeout: Duration::from_millis(5000),
            idle_timeout: None,
            idle_sweep_interval: Duration::from_secs(60),
            event_channel_capacity: 1024,
        }
    }
}
