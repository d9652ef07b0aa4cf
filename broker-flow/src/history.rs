//! Bounded, persisted time series of the retail exposure values
//!
//! Five parallel sequences (timestamps plus four values) share one length at all times.
//! The full buffer is rewritten to disk as a JSON document on every append.

use std::{
    collections::VecDeque,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::{calc::MetricValues, error::HistoryError};

/// One timestamped set of metric values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub values: MetricValues,
}

/// Parallel sequences of the stored history, oldest first.
///
/// This is both the query result handed to consumers and the persisted record layout.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct HistorySeries {
    #[serde(with = "iso_timestamps")]
    pub timestamps: Vec<DateTime<Utc>>,
    pub net_passive_total: Vec<f64>,
    pub net_passive_retail: Vec<f64>,
    pub net_aggressive_retail: Vec<f64>,
    pub net_retail_combined: Vec<f64>,
}

impl HistorySeries {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    fn validate(&self) -> Result<(), HistoryError> {
        let timestamps = self.timestamps.len();
        let series = [
            ("net_passive_total", self.net_passive_total.len()),
            ("net_passive_retail", self.net_passive_retail.len()),
            ("net_aggressive_retail", self.net_aggressive_retail.len()),
            ("net_retail_combined", self.net_retail_combined.len()),
        ];
        match series.into_iter().find(|(_, found)| *found != timestamps) {
            Some((series, found)) => Err(HistoryError::InconsistentLengths {
                series,
                timestamps,
                found,
            }),
            None => Ok(()),
        }
    }
}

/// Ring buffer of [`HistoryPoint`]s with FIFO eviction and JSON persistence
#[derive(Debug)]
pub struct HistoricalStore {
    capacity: usize,
    path: Option<PathBuf>,
    timestamps: VecDeque<DateTime<Utc>>,
    net_passive_total: VecDeque<f64>,
    net_passive_retail: VecDeque<f64>,
    net_aggressive_retail: VecDeque<f64>,
    net_retail_combined: VecDeque<f64>,
}

impl HistoricalStore {
    /// Store that never touches disk
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            capacity,
            path: None,
            timestamps: VecDeque::with_capacity(capacity),
            net_passive_total: VecDeque::with_capacity(capacity),
            net_passive_retail: VecDeque::with_capacity(capacity),
            net_aggressive_retail: VecDeque::with_capacity(capacity),
            net_retail_combined: VecDeque::with_capacity(capacity),
        }
    }

    /// Store persisted at `path`, populated from the existing record if there is one.
    ///
    /// A record that cannot be read or decoded is logged and the store starts empty.
    pub fn open(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let path = path.into();
        let mut store = Self::in_memory(capacity);

        match Self::load(&path) {
            Ok(Some(series)) => {
                store.extend(series);
                info!(path = %path.display(), points = store.len(), "historical data loaded");
            }
            Ok(None) => {
                info!(path = %path.display(), "no historical data found, starting empty");
            }
            Err(error) => {
                error!(path = %path.display(), %error, "failed to load historical data, starting empty");
            }
        }

        store.path = Some(path);
        store
    }

    /// Read and validate the persisted record at `path`, `None` when no record exists.
    pub fn load(path: &Path) -> Result<Option<HistorySeries>, HistoryError> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        let series: HistorySeries = serde_json::from_slice(&bytes)?;
        series.validate()?;
        Ok(Some(series))
    }

    fn extend(&mut self, series: HistorySeries) {
        let HistorySeries {
            timestamps,
            net_passive_total,
            net_passive_retail,
            net_aggressive_retail,
            net_retail_combined,
        } = series;

        let points = timestamps.into_iter().zip(
            net_passive_total.into_iter().zip(
                net_passive_retail
                    .into_iter()
                    .zip(net_aggressive_retail.into_iter().zip(net_retail_combined)),
            ),
        );
        for (timestamp, (passive_total, (passive_retail, (aggressive_retail, retail_combined)))) in points {
            self.push(
                timestamp,
                MetricValues {
                    net_passive_total: passive_total,
                    net_passive_retail: passive_retail,
                    net_aggressive_retail: aggressive_retail,
                    net_retail_combined: retail_combined,
                },
            );
        }
    }

    fn push(&mut self, timestamp: DateTime<Utc>, values: MetricValues) {
        if self.capacity == 0 {
            return;
        }
        if self.timestamps.len() >= self.capacity {
            self.timestamps.pop_front();
            self.net_passive_total.pop_front();
            self.net_passive_retail.pop_front();
            self.net_aggressive_retail.pop_front();
            self.net_retail_combined.pop_front();
        }
        self.timestamps.push_back(timestamp);
        self.net_passive_total.push_back(values.net_passive_total);
        self.net_passive_retail.push_back(values.net_passive_retail);
        self.net_aggressive_retail.push_back(values.net_aggressive_retail);
        self.net_retail_combined.push_back(values.net_retail_combined);
    }

    /// Append a point, evicting the oldest one when full, then persist the buffer.
    pub fn add_point(&mut self, timestamp: DateTime<Utc>, values: MetricValues) {
        self.push(timestamp, values);
        debug!(
            %timestamp,
            net_passive_total = values.net_passive_total,
            net_passive_retail = values.net_passive_retail,
            net_aggressive_retail = values.net_aggressive_retail,
            net_retail_combined = values.net_retail_combined,
            "history point added"
        );
        self.persist();
    }

    /// Write the full buffer to disk. Failures are logged; memory stays authoritative.
    pub fn persist(&self) {
        if let Err(error) = self.try_persist() {
            error!(%error, "failed to persist historical data");
        }
    }

    /// Write the full buffer to disk, replacing the previous record.
    pub fn try_persist(&self) -> Result<(), HistoryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, &self.series())?;
        writer.flush()?;
        drop(writer);
        fs::rename(&tmp, path)?;

        debug!(path = %path.display(), points = self.len(), "historical data saved");
        Ok(())
    }

    /// Copy of the stored sequences, oldest first
    pub fn series(&self) -> HistorySeries {
        HistorySeries {
            timestamps: self.timestamps.iter().copied().collect(),
            net_passive_total: self.net_passive_total.iter().copied().collect(),
            net_passive_retail: self.net_passive_retail.iter().copied().collect(),
            net_aggressive_retail: self.net_aggressive_retail.iter().copied().collect(),
            net_retail_combined: self.net_retail_combined.iter().copied().collect(),
        }
    }

    /// Stored points, oldest first
    pub fn points(&self) -> Vec<HistoryPoint> {
        (0..self.len())
            .map(|index| HistoryPoint {
                timestamp: self.timestamps[index],
                values: MetricValues {
                    net_passive_total: self.net_passive_total[index],
                    net_passive_retail: self.net_passive_retail[index],
                    net_aggressive_retail: self.net_aggressive_retail[index],
                    net_retail_combined: self.net_retail_combined[index],
                },
            })
            .collect()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// ISO-8601 timestamps: written as RFC 3339 UTC, read from RFC 3339 or offset-less
/// `YYYY-MM-DDTHH:MM:SS[.f]` (taken as UTC).
mod iso_timestamps {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error, ser::SerializeSeq};

    pub fn serialize<S>(timestamps: &[DateTime<Utc>], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(timestamps.len()))?;
        for timestamp in timestamps {
            seq.serialize_element(&timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|raw| parse(raw).ok_or_else(|| D::Error::custom(format!("invalid ISO-8601 timestamp: {raw}"))))
            .collect()
    }

    pub(super) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|timestamp| timestamp.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }
}
