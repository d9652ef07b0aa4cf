use broker_flow::{
    FeedConfig, FeedSession, FeedSnapshot, RetailSegments, SessionConfig, spawn_feed,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    // Initialize logging
    init_logging();

    let feed = FeedConfig::from_env();
    let config = SessionConfig::from_env();
    let segments = RetailSegments::from_env();

    info!(
        addr = %feed.addr(),
        asset = %config.asset,
        period = config.period,
        history = ?config.history_path,
        "Starting broker flow monitor"
    );

    let session = FeedSession::new(feed, config, segments);
    let (handle, mut snapshots) = spawn_feed(session);

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    warn!("Feed task stopped");
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                log_results(&snapshot);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    handle.abort();
}

/// Log the result table: last price, contract sums and their financial values.
fn log_results(snapshot: &FeedSnapshot) {
    let Some(metrics) = snapshot.metrics else {
        info!(
            status = %snapshot.status,
            brokers = snapshot.brokers.len(),
            "Waiting for broker data"
        );
        return;
    };

    let values = snapshot.values.unwrap_or_default();
    info!(
        status = %snapshot.status,
        brokers = snapshot.brokers.len(),
        last_price = ?snapshot.market.last_price,
        history = snapshot.history.len(),
        "Results"
    );
    for (label, contracts, value) in [
        ("Net passive total", metrics.net_passive_total, values.net_passive_total),
        ("Net passive retail", metrics.net_passive_retail, values.net_passive_retail),
        ("Net aggressive retail", metrics.net_aggressive_retail, values.net_aggressive_retail),
        ("Net retail combined", metrics.net_retail_combined, values.net_retail_combined),
    ] {
        info!(contracts, value = %format!("{value:.2}"), "{label}");
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
