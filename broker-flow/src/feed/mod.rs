//! Feed protocol client
//!
//! Provides:
//! - TCP connection with handshake, subscription requests and delayed reconnect
//! - Newline framing of partial and batched reads
//! - `BRKSLD` / `SQT` line decoding and routing

mod connection;
mod decoder;
mod dispatch;

pub use connection::{
    Connection, ConnectionStatus, Connector, LINE_TERMINATOR, REQUEST_VERB, TcpConnector,
    broker_balance_command, last_price_command,
};
pub use decoder::{DEFAULT_MAX_PENDING, FrameDecoder};
pub use dispatch::{
    BROKER_BALANCE, BROKER_MIN_FIELDS, Dispatched, FIELD_SEPARATOR, FeedMessage, LAST, QUOTE,
    QUOTE_MIN_FIELDS, decode_line, dispatch,
};

#[cfg(test)]
pub(crate) use dispatch::tests::broker_line;
