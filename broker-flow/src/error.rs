use std::{io, time::Duration};
use thiserror::Error;

/// Transport failures raised by the [`Connection`](crate::feed::Connection).
///
/// Every variant is recoverable: the session answers them with a delayed reconnect.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("no handshake reply from {addr} within {timeout:?}")]
    HandshakeTimeout { addr: String, timeout: Duration },

    #[error("connection closed by peer before the handshake reply")]
    Closed,

    #[error("not connected")]
    NotConnected,

    #[error("transport io error: {0}")]
    Io(#[from] io::Error),
}

impl ConnectionError {
    /// Determine if the error happened on an established socket (as opposed to while
    /// establishing one).
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_mid_stream(&self) -> bool {
        match self {
            ConnectionError::Io(_) => true,
            _ => false,
        }
    }
}

/// Reasons a single feed line is discarded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    #[error("{kind} line with insufficient fields: {found} (required {required})")]
    InsufficientFields {
        kind: &'static str,
        found: usize,
        required: usize,
    },

    #[error("invalid LAST price: {0:?}")]
    InvalidPrice(String),
}

/// Failures reading or writing the persisted history record.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history io error: {0}")]
    Io(#[from] io::Error),

    #[error("history decode error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("history series {series} holds {found} values but there are {timestamps} timestamps")]
    InconsistentLengths {
        series: &'static str,
        timestamps: usize,
        found: usize,
    },
}
