//! Feed session: one tick reads the socket, decodes and routes every complete line,
//! recomputes the retail exposure aggregates and records a history point.
//!
//! The session is the single writer of broker, market and history state. Consumers only
//! ever see copies, either through the query methods or the snapshots published by
//! [`spawn_feed`].

use std::time::Duration;

use chrono::Utc;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, warn};

use crate::{
    aggregator::{BrokerAggregator, BrokerSnapshot},
    calc::{DerivedMetrics, MetricValues},
    config::{FeedConfig, RetailSegments, SessionConfig},
    error::ConnectionError,
    feed::{Connection, ConnectionStatus, Connector, Dispatched, FrameDecoder, TcpConnector, dispatch},
    history::{HistoricalStore, HistorySeries},
    types::MarketState,
};

/// Reads an unterminated line may span before it is discarded
const MAX_PENDING_READS: usize = 16;

/// What a single tick (or request) changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Complete lines decoded
    pub lines: usize,
    /// Broker snapshots committed
    pub brokers_updated: usize,
    /// Lines discarded as malformed
    pub rejected: usize,
    /// Last price changed
    pub price_updated: bool,
    /// History point appended
    pub point_added: bool,
    /// Reconnect attempted
    pub reconnected: bool,
}

impl TickReport {
    /// Check if anything visible to consumers changed
    pub fn has_updates(&self) -> bool {
        self.brokers_updated > 0 || self.price_updated || self.point_added || self.reconnected
    }
}

/// Copy of everything a presentation layer needs
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    pub status: ConnectionStatus,
    pub market: MarketState,
    pub brokers: BrokerSnapshot,
    /// Contract sums of the last update cycle
    pub metrics: Option<DerivedMetrics>,
    /// Financial values of `metrics`, present once a last price is known
    pub values: Option<MetricValues>,
    pub history: HistorySeries,
}

/// Streaming aggregation session over one feed connection
#[derive(Debug)]
pub struct FeedSession<C: Connector = TcpConnector> {
    connection: Connection<C>,
    decoder: FrameDecoder,
    aggregator: BrokerAggregator,
    market: MarketState,
    history: HistoricalStore,
    config: SessionConfig,
    segments: RetailSegments,
    metrics: Option<DerivedMetrics>,
    status: ConnectionStatus,
    reconnects: u64,
}

impl FeedSession<TcpConnector> {
    /// Create a session connecting over plain TCP
    pub fn new(feed: FeedConfig, config: SessionConfig, segments: RetailSegments) -> Self {
        Self::with_connector(TcpConnector, feed, config, segments)
    }
}

impl<C: Connector> FeedSession<C> {
    /// Create a session with a custom [`Connector`]. History is loaded from
    /// `config.history_path` when set.
    pub fn with_connector(
        connector: C,
        feed: FeedConfig,
        config: SessionConfig,
        segments: RetailSegments,
    ) -> Self {
        let history = match &config.history_path {
            Some(path) => HistoricalStore::open(path, config.history_capacity),
            None => HistoricalStore::in_memory(config.history_capacity),
        };
        let max_pending = feed.read_buffer_size.saturating_mul(MAX_PENDING_READS);

        Self {
            connection: Connection::new(connector, feed),
            decoder: FrameDecoder::with_max_pending(max_pending),
            aggregator: BrokerAggregator::new(),
            market: MarketState::default(),
            history,
            config,
            segments,
            metrics: None,
            status: ConnectionStatus::Disconnected,
            reconnects: 0,
        }
    }

    /// Connect, handshake and subscribe to the configured asset.
    pub async fn start(&mut self) -> Result<TickReport, ConnectionError> {
        let mut report = TickReport::default();
        let result = match self.connection.connect().await {
            Ok(_) => self.subscribe(&mut report).await,
            Err(error) => Err(error),
        };

        match result {
            Ok(()) => self.status = ConnectionStatus::Connected,
            Err(_) => {
                self.connection.close();
                self.status = ConnectionStatus::Disconnected;
            }
        }
        self.run_cycle(&mut report);
        result.map(|()| report)
    }

    /// Perform one bounded read and process everything it completed.
    ///
    /// A transport failure (or a missing connection) triggers exactly one reconnect, which
    /// waits the configured delay and discards any partially received line.
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        let read = if self.connection.is_connected() {
            self.connection.read().await
        } else {
            Err(ConnectionError::NotConnected)
        };

        match read {
            Ok(bytes) => self.ingest(&bytes, &mut report),
            Err(error) => self.recover(error, &mut report).await,
        }

        self.run_cycle(&mut report);
        report
    }

    /// Send the broker balance request and process its reply.
    pub async fn request_broker_balance(
        &mut self,
        asset: &str,
        period: u32,
    ) -> Result<TickReport, ConnectionError> {
        let mut report = TickReport::default();
        let reply = self.connection.request_broker_balance(asset, period).await;
        self.after_request(reply, &mut report)?;
        self.run_cycle(&mut report);
        Ok(report)
    }

    /// Send the last price request and process its reply.
    pub async fn request_last_price(&mut self, asset: &str) -> Result<TickReport, ConnectionError> {
        let mut report = TickReport::default();
        let reply = self.connection.request_last_price(asset).await;
        self.after_request(reply, &mut report)?;
        self.run_cycle(&mut report);
        Ok(report)
    }

    fn after_request(
        &mut self,
        reply: Result<Vec<u8>, ConnectionError>,
        report: &mut TickReport,
    ) -> Result<(), ConnectionError> {
        match reply {
            Ok(bytes) => {
                self.ingest(&bytes, report);
                Ok(())
            }
            Err(error) => {
                // Next tick sees no connection and reconnects
                self.connection.close();
                self.status = ConnectionStatus::Disconnected;
                Err(error)
            }
        }
    }

    async fn subscribe(&mut self, report: &mut TickReport) -> Result<(), ConnectionError> {
        let asset = self.config.asset.clone();

        let reply = self
            .connection
            .request_broker_balance(&asset, self.config.period)
            .await?;
        self.ingest(&reply, report);

        let reply = self.connection.request_last_price(&asset).await?;
        self.ingest(&reply, report);

        info!(%asset, period = self.config.period, "subscribed to broker balance and last price");
        Ok(())
    }

    async fn recover(&mut self, error: ConnectionError, report: &mut TickReport) {
        if error.is_mid_stream() {
            error!(%error, "feed connection lost");
        } else {
            warn!(%error, "feed not connected");
        }

        let discarded = self.decoder.pending();
        if discarded > 0 {
            warn!(bytes = discarded, "discarding partially received line");
        }
        self.decoder.clear();

        self.status = ConnectionStatus::Reconnecting;
        self.reconnects += 1;
        report.reconnected = true;

        let result = match self.connection.reconnect().await {
            Ok(_) => self.subscribe(report).await,
            Err(error) => Err(error),
        };

        match result {
            Ok(()) => {
                info!(reconnects = self.reconnects, "feed connection restored");
                self.status = ConnectionStatus::Connected;
            }
            Err(error) => {
                error!(%error, "failed to reconnect to feed server");
                self.connection.close();
                self.status = ConnectionStatus::Disconnected;
            }
        }
    }

    fn ingest(&mut self, bytes: &[u8], report: &mut TickReport) {
        if bytes.is_empty() {
            return;
        }
        debug!(bytes = bytes.len(), "feed data received");

        for line in self.decoder.feed(bytes) {
            report.lines += 1;
            match dispatch(&line, Utc::now(), &mut self.aggregator, &mut self.market) {
                Dispatched::Broker(_) => report.brokers_updated += 1,
                Dispatched::Price(_) => report.price_updated = true,
                Dispatched::Rejected(_) => report.rejected += 1,
                Dispatched::Ignored => {}
            }
        }
    }

    /// Recompute the aggregates after new broker snapshots and record a history point
    /// once a last price is known.
    fn run_cycle(&mut self, report: &mut TickReport) {
        if report.brokers_updated == 0 {
            return;
        }

        let metrics = DerivedMetrics::compute(self.aggregator.records(), &self.segments);
        self.metrics = Some(metrics);

        let Some(price) = self.market.last_price else {
            debug!("no last price yet, skipping history point");
            return;
        };

        let values = metrics.values(Some(price), self.config.contract_multiplier);
        let timestamp = self.aggregator.latest_update().unwrap_or_else(Utc::now);
        self.history.add_point(timestamp, values);
        report.point_added = true;
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn feed_config(&self) -> &FeedConfig {
        self.connection.config()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Number of reconnects attempted since creation
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects
    }

    /// Bytes of a partially received line waiting for its terminator
    pub fn pending_bytes(&self) -> usize {
        self.decoder.pending()
    }

    /// Copy of the broker map
    pub fn brokers(&self) -> BrokerSnapshot {
        self.aggregator.snapshot()
    }

    pub fn market_state(&self) -> MarketState {
        self.market
    }

    /// Copy of the stored history, oldest first
    pub fn history(&self) -> HistorySeries {
        self.history.series()
    }

    /// Aggregates of the last update cycle
    pub fn metrics(&self) -> Option<DerivedMetrics> {
        self.metrics
    }

    /// Financial values of the last aggregates at the current last price
    pub fn values(&self) -> Option<MetricValues> {
        let metrics = self.metrics?;
        let price = self.market.last_price?;
        Some(metrics.values(Some(price), self.config.contract_multiplier))
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            status: self.status,
            market: self.market,
            brokers: self.brokers(),
            metrics: self.metrics,
            values: self.values(),
            history: self.history(),
        }
    }
}

/// Spawn a task that starts `session` and ticks it every `tick_interval`.
///
/// Returns the task handle and a receiver of the snapshots published whenever a tick
/// changes state. The task stops once every receiver is dropped.
pub fn spawn_feed<C>(mut session: FeedSession<C>) -> (JoinHandle<()>, watch::Receiver<FeedSnapshot>)
where
    C: Connector + 'static,
{
    let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());

    let handle = tokio::spawn(async move {
        info!(addr = %session.feed_config().addr(), "starting broker flow feed");

        if let Err(error) = session.start().await {
            error!(%error, "initial connection to feed server failed");
        }
        snapshot_tx.send_replace(session.snapshot());

        // interval panics on a zero period
        let period = session.config().tick_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let status = session.status();
            let report = session.tick().await;
            if !report.has_updates() && session.status() == status {
                if snapshot_tx.is_closed() {
                    break;
                }
                continue;
            }

            if snapshot_tx.send(session.snapshot()).is_err() {
                break;
            }
        }

        info!("feed consumers dropped, stopping broker flow feed");
    });

    (handle, snapshot_rx)
}
