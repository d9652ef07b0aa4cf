//! Authoritative per-broker state keyed by broker code.

use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use smol_str::SmolStr;

use crate::types::BrokerRecord;

/// Point-in-time copy of the broker map handed to consumers
pub type BrokerSnapshot = FnvHashMap<SmolStr, BrokerRecord>;

/// Holds the latest snapshot of every broker code seen on the feed.
///
/// Records are replaced wholesale on every snapshot and never removed.
#[derive(Debug, Default)]
pub struct BrokerAggregator {
    brokers: FnvHashMap<SmolStr, BrokerRecord>,
}

impl BrokerAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the record stored under `record.code`.
    pub fn upsert(&mut self, record: BrokerRecord) {
        self.brokers.insert(record.code.clone(), record);
    }

    /// Copy of the current broker map
    pub fn snapshot(&self) -> BrokerSnapshot {
        self.brokers.clone()
    }

    pub fn get(&self, code: &str) -> Option<&BrokerRecord> {
        self.brokers.get(code)
    }

    /// Iterate the live records, used for metric computation within one cycle
    pub fn records(&self) -> impl Iterator<Item = &BrokerRecord> {
        self.brokers.values()
    }

    /// Most recent snapshot time across all brokers
    pub fn latest_update(&self) -> Option<DateTime<Utc>> {
        self.brokers.values().map(|record| record.last_update).max()
    }

    pub fn len(&self) -> usize {
        self.brokers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.brokers.is_empty()
    }
}
