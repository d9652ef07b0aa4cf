//! Retail exposure aggregates and their financial value transform
//!
//! All aggregates are recomputed from scratch every cycle from one broker snapshot and
//! one last price.

use serde::{Deserialize, Serialize};

use crate::{config::RetailSegments, types::BrokerRecord};

/// Net contract sums for one update cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct DerivedMetrics {
    /// Passive net over every broker
    pub net_passive_total: f64,
    /// Passive net over the retail passive segment
    pub net_passive_retail: f64,
    /// Net aggression over the retail aggressive segment
    pub net_aggressive_retail: f64,
    /// Retail passive plus retail aggressive
    pub net_retail_combined: f64,
}

/// Financial values of the four aggregates
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct MetricValues {
    pub net_passive_total: f64,
    pub net_passive_retail: f64,
    pub net_aggressive_retail: f64,
    pub net_retail_combined: f64,
}

impl DerivedMetrics {
    /// Sum the broker records into the four aggregates.
    pub fn compute<'a, I>(brokers: I, segments: &RetailSegments) -> Self
    where
        I: IntoIterator<Item = &'a BrokerRecord>,
    {
        let mut metrics = brokers
            .into_iter()
            .fold(Self::default(), |mut acc, record| {
                acc.net_passive_total += record.passive_net;
                if segments.is_retail_passive(&record.name) {
                    acc.net_passive_retail += record.passive_net;
                }
                if segments.is_retail_aggressive(&record.name) {
                    acc.net_aggressive_retail += record.net_aggr();
                }
                acc
            });

        metrics.net_retail_combined = metrics.net_passive_retail + metrics.net_aggressive_retail;
        metrics
    }

    /// Apply the financial value transform to every aggregate.
    pub fn values(&self, last_price: Option<f64>, multiplier: f64) -> MetricValues {
        let value = |net_contracts| financial_value(net_contracts, last_price, multiplier);
        MetricValues {
            net_passive_total: value(self.net_passive_total),
            net_passive_retail: value(self.net_passive_retail),
            net_aggressive_retail: value(self.net_aggressive_retail),
            net_retail_combined: value(self.net_retail_combined),
        }
    }
}

/// Notional value of a net contract count: `price * multiplier * contracts`
///
/// Zero while no price is known.
pub fn financial_value(net_contracts: f64, last_price: Option<f64>, multiplier: f64) -> f64 {
    last_price
        .map(|price| price * multiplier * net_contracts)
        .unwrap_or(0.0)
}
