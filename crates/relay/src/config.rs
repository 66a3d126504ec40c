//! Worker configuration loaded from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{RelayError, Result};

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Relay and purge settings with sensible defaults.
///
/// Reads from environment variables:
/// - `DATABASE_URL`: PostgreSQL connection string (required by the binary)
/// - `RELAY_WORKERS`: concurrent relay workers (default: `2`)
/// - `RELAY_BATCH_SIZE`: events claimed per batch (default: `50`)
/// - `RELAY_POLL_INTERVAL_MS`: idle wait between batches (default: `500`)
/// - `RELAY_LEASE_SECS`: age after which a claim may be taken over (default: `300`)
/// - `PROCESSED_EVENT_TTL_HOURS`: lifetime of consumer markers (default: `168`)
/// - `PURGE_INTERVAL_SECS`: marker purge period (default: `3600`)
/// - `METRICS_ADDR`: Prometheus listener (default: `"0.0.0.0:9000"`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for JSON lines, anything else for text
///
/// Unparseable values fall back to their defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub database_url: Option<String>,
    pub workers: usize,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub lease: Duration,
    pub processed_event_ttl: Duration,
    pub purge_interval: Duration,
    pub metrics_addr: SocketAddr,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl RelayConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which returns the raw value of a
    /// variable if it is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            workers: parsed("RELAY_WORKERS")
                .filter(|n| *n > 0)
                .map_or(defaults.workers, |n| n as usize),
            batch_size: parsed("RELAY_BATCH_SIZE")
                .filter(|n| *n > 0)
                .map_or(defaults.batch_size, |n| n as usize),
            poll_interval: parsed("RELAY_POLL_INTERVAL_MS")
                .map_or(defaults.poll_interval, Duration::from_millis),
            lease: parsed("RELAY_LEASE_SECS").map_or(defaults.lease, Duration::from_secs),
            processed_event_ttl: parsed("PROCESSED_EVENT_TTL_HOURS")
                .map_or(defaults.processed_event_ttl, |h| Duration::from_secs(h * 3600)),
            purge_interval: parsed("PURGE_INTERVAL_SECS")
                .filter(|n| *n > 0)
                .map_or(defaults.purge_interval, Duration::from_secs),
            metrics_addr: lookup("METRICS_ADDR")
                .and_then(|addr| addr.parse().ok())
                .unwrap_or(defaults.metrics_addr),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
        }
    }

    /// Returns the database URL, which the worker binary cannot run without.
    pub fn database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| RelayError::Config("DATABASE_URL is not set".into()))
    }

    /// The claim lease as a chrono duration, as the outbox store takes it.
    pub fn lease(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lease).unwrap_or(chrono::Duration::seconds(300))
    }

    /// The processed-marker lifetime as a chrono duration.
    pub fn processed_event_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.processed_event_ttl).unwrap_or(chrono::Duration::hours(168))
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            workers: 2,
            batch_size: 50,
            poll_interval: Duration::from_millis(500),
            lease: Duration::from_secs(300),
            processed_event_ttl: Duration::from_secs(168 * 3600),
            purge_interval: Duration::from_secs(3600),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}
