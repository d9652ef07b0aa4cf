/// Core broker and market state types
///
/// These are the values decoded from the feed and handed out to consumers as copies.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Latest position snapshot reported for one broker code
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BrokerRecord {
    /// Broker code, unique key of the record
    pub code: SmolStr,
    /// Display name, used for retail segment classification
    pub name: SmolStr,
    /// Traded volume (contracts)
    pub volume: f64,
    /// Average traded price
    pub avg_price: f64,
    /// Volume bought by crossing the spread
    pub aggr_buy: f64,
    /// Volume sold by crossing the spread
    pub aggr_sell: f64,
    /// Net resting (non-aggressive) position
    pub passive_net: f64,
    /// Gross profit/loss
    pub gross_pl: f64,
    /// When the snapshot for this code was received
    pub last_update: DateTime<Utc>,
}

impl BrokerRecord {
    /// Net aggressive volume, always derived from the buy and sell sides.
    pub fn net_aggr(&self) -> f64 {
        self.aggr_buy - self.aggr_sell
    }
}

/// Quote state of the subscribed asset
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct MarketState {
    /// Last traded price, unset until the first LAST quote arrives
    pub last_price: Option<f64>,
}
