//! Line classification and field decoding
//!
//! `BRKSLD` lines carry one broker snapshot at fixed field positions, `SQT` lines carry
//! quotes of which only the `LAST` subtype is consumed. Anything else is ignored.

use chrono::{DateTime, Utc};
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::{
    aggregator::BrokerAggregator,
    error::FrameError,
    types::{BrokerRecord, MarketState},
};

/// Field separator used by both commands and stream lines
pub const FIELD_SEPARATOR: char = '\u{1}';

/// Broker snapshot message prefix
pub const BROKER_BALANCE: &str = "BRKSLD";

/// Quote message prefix
pub const QUOTE: &str = "SQT";

/// Quote subtype carrying the last traded price
pub const LAST: &str = "LAST";

/// Minimum field count of a usable broker snapshot line
pub const BROKER_MIN_FIELDS: usize = 25;

/// Minimum field count of a usable LAST quote line
pub const QUOTE_MIN_FIELDS: usize = 4;

// Broker snapshot field positions
const CODE: usize = 3;
const NAME: usize = 4;
const VOLUME: usize = 5;
const AVG_PRICE: usize = 7;
const AGGR_BUY: usize = 8;
const AGGR_SELL: usize = 9;
const PASSIVE_NET: usize = 15;
const GROSS_PL: usize = 16;

// Quote field positions
const QUOTE_KIND: usize = 2;
const QUOTE_PRICE: usize = 3;

/// A decoded feed line
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    BrokerSnapshot(BrokerRecord),
    LastPrice(f64),
}

/// Outcome of routing one line
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    /// Broker snapshot committed for this code
    Broker(SmolStr),
    /// Last price updated
    Price(f64),
    /// Line carried nothing the core consumes
    Ignored,
    /// Line was malformed and discarded
    Rejected(FrameError),
}

/// Decode a single line received at `received`.
///
/// Returns `Ok(None)` for lines the core does not consume. Broker numeric fields that
/// fail to parse default to zero for that field only.
pub fn decode_line(line: &str, received: DateTime<Utc>) -> Result<Option<FeedMessage>, FrameError> {
    if line.starts_with(BROKER_BALANCE) {
        decode_broker_snapshot(line, received).map(|record| Some(FeedMessage::BrokerSnapshot(record)))
    } else if line.starts_with(QUOTE) {
        decode_quote(line)
    } else {
        Ok(None)
    }
}

fn decode_broker_snapshot(line: &str, received: DateTime<Utc>) -> Result<BrokerRecord, FrameError> {
    let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
    if fields.len() < BROKER_MIN_FIELDS {
        return Err(FrameError::InsufficientFields {
            kind: BROKER_BALANCE,
            found: fields.len(),
            required: BROKER_MIN_FIELDS,
        });
    }

    let code = SmolStr::new(fields[CODE]);
    let numeric = |index: usize, field: &'static str| parse_numeric(&fields, index, field, &code);

    Ok(BrokerRecord {
        name: SmolStr::new(fields[NAME]),
        volume: numeric(VOLUME, "volume"),
        avg_price: numeric(AVG_PRICE, "avg_price"),
        aggr_buy: numeric(AGGR_BUY, "aggr_buy"),
        aggr_sell: numeric(AGGR_SELL, "aggr_sell"),
        passive_net: numeric(PASSIVE_NET, "passive_net"),
        gross_pl: numeric(GROSS_PL, "gross_pl"),
        last_update: received,
        code: code.clone(),
    })
}

fn decode_quote(line: &str) -> Result<Option<FeedMessage>, FrameError> {
    let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
    if fields.len() < QUOTE_MIN_FIELDS || fields[QUOTE_KIND] != LAST {
        return Ok(None);
    }

    let raw = fields[QUOTE_PRICE];
    match raw.trim().parse::<f64>() {
        Ok(price) if price.is_finite() => Ok(Some(FeedMessage::LastPrice(price))),
        _ => Err(FrameError::InvalidPrice(raw.to_string())),
    }
}

/// Parse a broker numeric field. Missing or empty fields are zero, non-numeric values are
/// logged and zero.
fn parse_numeric(fields: &[&str], index: usize, field: &'static str, code: &str) -> f64 {
    let raw = fields.get(index).map(|s| s.trim()).unwrap_or_default();
    if raw.is_empty() {
        return 0.0;
    }

    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => value,
        _ => {
            warn!(%code, field, value = raw, "non-numeric broker field, defaulting to zero");
            0.0
        }
    }
}

/// Decode `line` and route it to the aggregator or the market state.
pub fn dispatch(
    line: &str,
    received: DateTime<Utc>,
    aggregator: &mut BrokerAggregator,
    market: &mut MarketState,
) -> Dispatched {
    match decode_line(line, received) {
        Ok(Some(FeedMessage::BrokerSnapshot(record))) => {
            debug!(code = %record.code, name = %record.name, "broker snapshot committed");
            let code = record.code.clone();
            aggregator.upsert(record);
            Dispatched::Broker(code)
        }
        Ok(Some(FeedMessage::LastPrice(price))) => {
            info!(price, "last price updated");
            market.last_price = Some(price);
            Dispatched::Price(price)
        }
        Ok(None) => Dispatched::Ignored,
        Err(error) => {
            warn!(%error, line = truncate(line, 100), "discarding feed line");
            Dispatched::Rejected(error)
        }
    }
}

/// Truncate a line to at most `max` characters for logging
pub(crate) fn truncate(line: &str, max: usize) -> &str {
    match line.char_indices().nth(max) {
        Some((index, _)) => &line[..index],
        None => line,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a broker snapshot line with `count` fields.
    pub(crate) fn broker_line(
        count: usize,
        code: &str,
        name: &str,
        aggr_buy: &str,
        aggr_sell: &str,
        passive_net: &str,
    ) -> String {
        let mut fields = vec!["0".to_string(); count];
        fields[0] = BROKER_BALANCE.to_string();
        let mut set = |index: usize, value: &str| {
            if index < count {
                fields[index] = value.to_string();
            }
        };
        set(CODE, code);
        set(NAME, name);
        set(VOLUME, "1500");
        set(AVG_PRICE, "128350.5");
        set(AGGR_BUY, aggr_buy);
        set(AGGR_SELL, aggr_sell);
        set(PASSIVE_NET, passive_net);
        set(GROSS_PL, "-2500");
        fields.join("\u{1}")
    }

    #[test]
    fn test_decode_broker_snapshot() {
        let now = Utc::now();
        let line = broker_line(25, "C1", "XP", "40", "15", "100");

        let Ok(Some(FeedMessage::BrokerSnapshot(record))) = decode_line(&line, now) else {
            panic!("expected broker snapshot");
        };
        assert_eq!(record.code, "C1");
        assert_eq!(record.name, "XP");
        assert_eq!(record.volume, 1500.0);
        assert_eq!(record.avg_price, 128350.5);
        assert_eq!(record.aggr_buy, 40.0);
        assert_eq!(record.aggr_sell, 15.0);
        assert_eq!(record.net_aggr(), 25.0);
        assert_eq!(record.passive_net, 100.0);
        assert_eq!(record.gross_pl, -2500.0);
        assert_eq!(record.last_update, now);
    }

    #[test]
    fn test_decode_broker_insufficient_fields() {
        let line = broker_line(24, "C1", "XP", "40", "15", "100");
        assert_eq!(
            decode_line(&line, Utc::now()),
            Err(FrameError::InsufficientFields {
                kind: BROKER_BALANCE,
                found: 24,
                required: 25
            })
        );
    }

    #[test]
    fn test_decode_broker_field_defaults() {
        struct TestCase {
            aggr_buy: &'static str,
            aggr_sell: &'static str,
            passive_net: &'static str,
            expected_buy: f64,
            expected_sell: f64,
            expected_passive: f64,
        }

        let tests = vec![
            TestCase {
                // TC0: empty aggressive fields default to zero
                aggr_buy: "",
                aggr_sell: "",
                passive_net: "10",
                expected_buy: 0.0,
                expected_sell: 0.0,
                expected_passive: 10.0,
            },
            TestCase {
                // TC1: non-numeric buy side zeroed, sell side kept
                aggr_buy: "abc",
                aggr_sell: "30",
                passive_net: "10",
                expected_buy: 0.0,
                expected_sell: 30.0,
                expected_passive: 10.0,
            },
            TestCase {
                // TC2: non-numeric passive net zeroed, other fields kept
                aggr_buy: "5",
                aggr_sell: "2",
                passive_net: "n/a",
                expected_buy: 5.0,
                expected_sell: 2.0,
                expected_passive: 0.0,
            },
            TestCase {
                // TC3: surrounding whitespace tolerated, NaN rejected
                aggr_buy: " 12 ",
                aggr_sell: "NaN",
                passive_net: "-7.5",
                expected_buy: 12.0,
                expected_sell: 0.0,
                expected_passive: -7.5,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let line = broker_line(25, "C1", "XP", test.aggr_buy, test.aggr_sell, test.passive_net);
            let Ok(Some(FeedMessage::BrokerSnapshot(record))) = decode_line(&line, Utc::now()) else {
                panic!("TC{} failed: expected broker snapshot", index);
            };
            assert_eq!(record.aggr_buy, test.expected_buy, "TC{} failed", index);
            assert_eq!(record.aggr_sell, test.expected_sell, "TC{} failed", index);
            assert_eq!(record.passive_net, test.expected_passive, "TC{} failed", index);
            assert_eq!(
                record.net_aggr(),
                test.expected_buy - test.expected_sell,
                "TC{} failed",
                index
            );
        }
    }

    #[test]
    fn test_decode_quote() {
        struct TestCase {
            line: &'static str,
            expected: Result<Option<FeedMessage>, FrameError>,
        }

        let tests = vec![
            TestCase {
                // TC0: LAST quote consumed
                line: "SQT\x01x\x01LAST\x01500",
                expected: Ok(Some(FeedMessage::LastPrice(500.0))),
            },
            TestCase {
                // TC1: other subtypes ignored
                line: "SQT\x01x\x01BID\x01499",
                expected: Ok(None),
            },
            TestCase {
                // TC2: non-numeric price rejected
                line: "SQT\x01x\x01LAST\x01abc",
                expected: Err(FrameError::InvalidPrice("abc".to_string())),
            },
            TestCase {
                // TC3: LAST without a price field ignored
                line: "SQT\x01x\x01LAST",
                expected: Ok(None),
            },
            TestCase {
                // TC4: short quote line ignored
                line: "SQT\x01x",
                expected: Ok(None),
            },
            TestCase {
                // TC5: unknown prefix ignored
                line: "HEARTBEAT\x01x\x01LAST\x01500",
                expected: Ok(None),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = decode_line(test.line, Utc::now());
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_dispatch_routes_lines() {
        let mut aggregator = BrokerAggregator::new();
        let mut market = MarketState::default();
        let now = Utc::now();

        let line = broker_line(25, "C1", "XP", "1", "0", "100");
        assert_eq!(
            dispatch(&line, now, &mut aggregator, &mut market),
            Dispatched::Broker(SmolStr::new("C1"))
        );
        assert_eq!(aggregator.len(), 1);

        assert_eq!(
            dispatch("SQT\x01x\x01LAST\x01500", now, &mut aggregator, &mut market),
            Dispatched::Price(500.0)
        );
        assert_eq!(market.last_price, Some(500.0));

        // Invalid price leaves the previous price in place
        assert!(matches!(
            dispatch("SQT\x01x\x01LAST\x01-", now, &mut aggregator, &mut market),
            Dispatched::Rejected(FrameError::InvalidPrice(_))
        ));
        assert_eq!(market.last_price, Some(500.0));

        // LAST quote too short to carry a price
        assert_eq!(
            dispatch("SQT\x01x\x01LAST", now, &mut aggregator, &mut market),
            Dispatched::Ignored
        );
        assert_eq!(market.last_price, Some(500.0));
    }

    #[test]
    fn test_dispatch_short_broker_line_leaves_aggregator_untouched() {
        let mut aggregator = BrokerAggregator::new();
        let mut market = MarketState::default();

        for count in 1..=24 {
            let line = broker_line(count, "C1", "XP", "1", "0", "100");
            let outcome = dispatch(&line, Utc::now(), &mut aggregator, &mut market);
            assert!(matches!(outcome, Dispatched::Rejected(_)), "{count} fields");
        }
        assert!(aggregator.is_empty());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("ab", 3), "ab");
        assert_eq!(truncate("ÁÉÍÓ", 2), "ÁÉ");
    }
}
