//! Feed, session and retail segment configuration.
//!
//! Every config has deployment defaults and can be overridden from environment variables.

use fnv::FnvHashSet;
use smol_str::SmolStr;
use std::{path::PathBuf, time::Duration};

/// Fixed contract multiplier used by the financial value transform.
pub const DEFAULT_CONTRACT_MULTIPLIER: f64 = 0.20;

/// Maximum number of points kept by the historical store.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Broker names treated as retail liquidity providers (passive segment).
pub const DEFAULT_RETAIL_PASSIVE: &[&str] = &[
    "GENIAL",
    "CM CAPITAL",
    "NOVA FUTURA",
    "SAFRA",
    "TORO",
    "INTER",
    "UBS",
    "GUIDE",
    "CLEAR",
    "IDEAL",
    "XP",
    "BTG",
    "AGORA",
];

/// Broker names treated as retail takers (aggressive segment).
pub const DEFAULT_RETAIL_AGGRESSIVE: &[&str] = &[
    "GENIAL",
    "CM CAPITAL",
    "NOVA FUTURA",
    "SAFRA",
    "TORO",
    "INTER",
    "CLEAR",
    "XP",
    "BTG",
    "AGORA",
];

/// Feed server connection configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Feed server host
    pub host: String,
    /// Feed server port
    pub port: u16,
    /// Size of the socket read buffer
    pub read_buffer_size: usize,
    /// Command sent immediately after the socket opens
    pub handshake_command: String,
    /// Maximum wait for the handshake reply
    pub handshake_timeout: Duration,
    /// Bounded wait of the single read performed per tick
    pub read_timeout: Duration,
    /// Maximum wait for the reply to a request command
    pub reply_timeout: Duration,
    /// Delay between closing a failed socket and connecting again
    pub reconnect_delay: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 557,
            read_buffer_size: 65536,
            handshake_command: "OPENFAST".to_string(),
            handshake_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_millis(50),
            reply_timeout: Duration::from_secs(2),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl FeedConfig {
    /// Create a new configuration for a custom server address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Read `FEED_HOST`, `FEED_PORT` and `RECONNECT_DELAY_SECS` from the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an injectable variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            host: lookup("FEED_HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "FEED_PORT", defaults.port),
            reconnect_delay: lookup("RECONNECT_DELAY_SECS")
                .and_then(|s| s.trim().parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconnect_delay),
            ..defaults
        }
    }

    /// Server address in `host:port` form
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Set the bounded wait of each tick read
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the request reply wait
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Set the handshake reply wait
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set reconnect delay
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// Session level configuration: subscription, valuation and history
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Asset subscribed with the broker balance and last price requests
    pub asset: String,
    /// Period argument of the broker balance request
    pub period: u32,
    /// Multiplier converting a net contract count into a notional value
    pub contract_multiplier: f64,
    /// Maximum number of history points
    pub history_capacity: usize,
    /// Location of the persisted history record, `None` keeps history in memory only
    pub history_path: Option<PathBuf>,
    /// Interval between ticks when driven by [`spawn_feed`](crate::spawn_feed)
    pub tick_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            asset: "WINJ25".to_string(),
            period: 0,
            contract_multiplier: DEFAULT_CONTRACT_MULTIPLIER,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            history_path: Some(PathBuf::from("historical_data.json")),
            tick_interval: Duration::from_millis(100),
        }
    }
}

impl SessionConfig {
    /// Read `FEED_ASSET`, `FEED_PERIOD`, `HISTORY_PATH` and `TICK_INTERVAL_MS` from the
    /// environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            asset: lookup("FEED_ASSET")
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.asset),
            period: parse_or(&lookup, "FEED_PERIOD", defaults.period),
            history_path: lookup("HISTORY_PATH")
                .map(PathBuf::from)
                .or(defaults.history_path),
            tick_interval: lookup("TICK_INTERVAL_MS")
                .and_then(|s| s.trim().parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_interval),
            ..defaults
        }
    }

    pub fn with_asset(mut self, asset: impl Into<String>) -> Self {
        self.asset = asset.into();
        self
    }

    pub fn with_period(mut self, period: u32) -> Self {
        self.period = period;
        self
    }

    pub fn with_history_path(mut self, path: Option<PathBuf>) -> Self {
        self.history_path = path;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }
}

/// The two retail broker name sets used for segment aggregation.
///
/// The sets are maintained independently and differ in composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetailSegments {
    passive: FnvHashSet<SmolStr>,
    aggressive: FnvHashSet<SmolStr>,
}

impl Default for RetailSegments {
    fn default() -> Self {
        Self::new(
            DEFAULT_RETAIL_PASSIVE.iter().copied(),
            DEFAULT_RETAIL_AGGRESSIVE.iter().copied(),
        )
    }
}

impl RetailSegments {
    pub fn new<P, A>(passive: P, aggressive: A) -> Self
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        A: IntoIterator,
        A::Item: AsRef<str>,
    {
        Self {
            passive: passive.into_iter().map(|name| SmolStr::new(name.as_ref())).collect(),
            aggressive: aggressive
                .into_iter()
                .map(|name| SmolStr::new(name.as_ref()))
                .collect(),
        }
    }

    /// Read comma separated `RETAIL_PASSIVE` / `RETAIL_AGGRESSIVE` overrides from the
    /// environment, keeping the default list for any variable that is unset.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            passive: lookup("RETAIL_PASSIVE")
                .map(|list| parse_names(&list))
                .unwrap_or(defaults.passive),
            aggressive: lookup("RETAIL_AGGRESSIVE")
                .map(|list| parse_names(&list))
                .unwrap_or(defaults.aggressive),
        }
    }

    /// Check if a broker name belongs to the retail passive segment
    pub fn is_retail_passive(&self, name: &str) -> bool {
        self.passive.contains(name)
    }

    /// Check if a broker name belongs to the retail aggressive segment
    pub fn is_retail_aggressive(&self, name: &str) -> bool {
        self.aggressive.contains(name)
    }
}

fn parse_names(list: &str) -> FnvHashSet<SmolStr> {
    list.split(',')
        .map(|name| name.trim().to_uppercase())
        .filter(|name| !name.is_empty())
        .map(SmolStr::from)
        .collect()
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}
