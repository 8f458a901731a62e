//! Environment-style configuration.
//!
//! Every knob has a default so the bridge runs with an empty environment. Unparseable values
//! are logged and replaced by their default.

use crate::exchange::okx::{BASE_URL_OKX_REST, BASE_URL_OKX_WS};
use std::{str::FromStr, time::Duration};
use tracing::warn;
use url::Url;

/// Default sliding window length for liquidation clusters.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(120);

/// Default per-event notional (USD) below which a liquidation never contributes to a cluster.
pub const DEFAULT_MIN_CLUSTER_USD: f64 = 5_000.0;

/// Default cluster bucket width in quote currency.
pub const DEFAULT_BIN_SIZE: f64 = 10.0;

/// Default defensive cap on retained liquidation events per instrument.
pub const DEFAULT_MAX_EVENTS: usize = 100_000;

/// Complete `derivs-bridge` configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BridgeConfig {
    pub rest: RestConfig,
    pub stream: StreamConfig,
    pub window: WindowConfig,
}

/// [`ClusterWindow`](crate::cluster::ClusterWindow) configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowConfig {
    /// Events older than `now - window` are evicted.
    pub window: Duration,
    /// Events with an individual notional below this never enter a cluster bucket.
    pub min_cluster_usd: f64,
    /// Cluster bucket width.
    pub bin_size: f64,
    /// Maximum number of retained events, oldest evicted first.
    pub max_events: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            min_cluster_usd: DEFAULT_MIN_CLUSTER_USD,
            bin_size: DEFAULT_BIN_SIZE,
            max_events: DEFAULT_MAX_EVENTS,
        }
    }
}

impl WindowConfig {
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_min_cluster_usd(mut self, min_cluster_usd: f64) -> Self {
        self.min_cluster_usd = min_cluster_usd;
        self
    }

    pub fn with_bin_size(mut self, bin_size: f64) -> Self {
        self.bin_size = bin_size;
        self
    }

    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events;
        self
    }
}

/// [`StreamConnection`](crate::streams::connection::StreamConnection) configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Public WebSocket endpoint.
    pub url: String,
    /// Interval between keepalive pings.
    pub ping_interval: Duration,
    /// Time allowed for a pong (or any frame) after a ping before the session is dropped.
    pub pong_timeout: Duration,
    /// Fixed delay between reconnection attempts.
    pub reconnect_backoff: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: BASE_URL_OKX_WS.to_string(),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(30),
            reconnect_backoff: Duration::from_secs(3),
        }
    }
}

impl StreamConfig {
    /// Idle read deadline: no frame at all within a ping interval plus pong timeout means
    /// the peer is gone.
    pub fn read_timeout(&self) -> Duration {
        self.ping_interval + self.pong_timeout
    }

    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }
}

/// REST collaborator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RestConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub cache_ttl: Duration,
    /// Select the rubik statistics endpoints for open interest change and long/short ratio.
    pub use_rubik: bool,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: BASE_URL_OKX_REST.to_string(),
            timeout: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(10),
            use_rubik: false,
        }
    }
}

impl BridgeConfig {
    /// Build a [`BridgeConfig`] from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a [`BridgeConfig`] from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let window_default = WindowConfig::default();
        let stream_default = StreamConfig::default();
        let rest_default = RestConfig::default();

        let window = WindowConfig {
            window: secs_or(&lookup, "LIQ_WINDOW_SEC", window_default.window),
            min_cluster_usd: parse_or_where(
                &lookup,
                "LIQ_MIN_CLUSTER_USD",
                window_default.min_cluster_usd,
                |usd: &f64| usd.is_finite() && *usd >= 0.0,
            ),
            bin_size: parse_or_where(&lookup, "LIQ_BIN_SIZE", window_default.bin_size, |bin: &f64| {
                bin.is_finite() && *bin > 0.0
            }),
            max_events: parse_or_where(
                &lookup,
                "LIQ_MAX_EVENTS",
                window_default.max_events,
                |max: &usize| *max > 0,
            ),
        };

        let stream = StreamConfig {
            url: url_or(&lookup, "OKX_WS_PUBLIC", stream_default.url),
            ping_interval: secs_or(&lookup, "WS_PING_INTERVAL_SEC", stream_default.ping_interval),
            pong_timeout: secs_or(&lookup, "WS_PONG_TIMEOUT_SEC", stream_default.pong_timeout),
            reconnect_backoff: secs_or(
                &lookup,
                "WS_RECONNECT_BACKOFF_SEC",
                stream_default.reconnect_backoff,
            ),
        };

        let rest = RestConfig {
            base_url: url_or(&lookup, "OKX_BASE_URL", rest_default.base_url),
            timeout: secs_or(&lookup, "REST_TIMEOUT_SEC", rest_default.timeout),
            cache_ttl: secs_or(&lookup, "REST_CACHE_TTL_SEC", rest_default.cache_ttl),
            use_rubik: lookup("USE_RUBIK").is_some_and(|flag| flag.trim() == "1"),
        };

        Self {
            rest,
            stream,
            window,
        }
    }
}

/// Parse the value under `key`, falling back to `default` when absent or unparseable.
pub fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    parse_or_where(lookup, key, default, |_| true)
}

/// Parse the value under `key` as whole seconds.
pub fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    Duration::from_secs(parse_or_where(lookup, key, default.as_secs(), |secs: &u64| *secs > 0))
}

fn parse_or_where<F, T, P>(lookup: &F, key: &str, default: T, valid: P) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    P: Fn(&T) -> bool,
{
    let Some(raw) = lookup(key) else {
        return default;
    };

    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => value,
        _ => {
            warn!(key, value = %raw, "ignoring invalid configuration value, using default");
            default
        }
    }
}

fn url_or<F>(lookup: &F, key: &str, default: String) -> String
where
    F: Fn(&str) -> Option<String>,
{
    parse_or_where(lookup, key, default, |raw: &String| Url::parse(raw).is_ok())
}
