/// Broker Flow
///
/// Streaming client for a line-delimited market data feed that reports per-broker
/// aggregated trade balances. Derives retail exposure aggregates, values them at the last
/// traded price and keeps a bounded, persisted history of the results.
///
/// The library includes:
/// - Feed protocol client: connection, framing and line routing
/// - Broker aggregation keyed by broker code
/// - Retail segment classification and financial value transform
/// - Persisted time series of the derived values
/// - A session driving one tick at a time, plus a spawned feed task publishing snapshots
pub mod aggregator;
pub mod calc;
pub mod config;
pub mod error;
pub mod feed;
pub mod history;
pub mod session;
pub mod types;

// Re-export commonly used types for convenience
pub use aggregator::{BrokerAggregator, BrokerSnapshot};
pub use calc::{DerivedMetrics, MetricValues, financial_value};
pub use config::{FeedConfig, RetailSegments, SessionConfig};
pub use error::{ConnectionError, FrameError, HistoryError};
pub use feed::{Connection, ConnectionStatus, Connector, FeedMessage, FrameDecoder, TcpConnector};
pub use history::{HistoricalStore, HistoryPoint, HistorySeries};
pub use session::{FeedSession, FeedSnapshot, TickReport, spawn_feed};
pub use types::{BrokerRecord, MarketState};
