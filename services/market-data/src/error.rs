//! Error taxonomy for the Market Data Service
//!
//! `StoreError` is raised by store backends; everything above the store speaks
//! `MarketDataError`. The transport layer uses [`MarketDataError::is_transient`]
//! to decide between redelivery and dead-lettering.

use std::time::Duration;

use thiserror::Error;

/// Failure talking to the external sorted-set/hash store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered, but not with what the command expects
    /// (wrong key type, unparseable reply). Retrying does not help.
    #[error("unexpected reply for key {key}: {message}")]
    Protocol { key: String, message: String },
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Top-level service error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarketDataError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("downstream write failed: {0}")]
    DownstreamWriteFailure(String),

    #[error("handler timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl MarketDataError {
    /// Transient errors are redelivered by the transport; everything else is
    /// dead-lettered or handled in place.
    pub fn is_transient(&self) -> bool {
        match self {
            MarketDataError::StoreUnavailable(e) => e.is_transient(),
            MarketDataError::Timeout(_) => true,
            _ => false,
        }
    }

    /// Short label for logs and dead-letter records.
    pub fn kind(&self) -> &'static str {
        match self {
            MarketDataError::StoreUnavailable(StoreError::Unavailable(_)) => "StoreUnavailable",
            MarketDataError::StoreUnavailable(StoreError::Protocol { .. }) => "StoreProtocol",
            MarketDataError::UnknownInstrument(_) => "UnknownInstrument",
            MarketDataError::MalformedEvent(_) => "MalformedEvent",
            MarketDataError::DownstreamWriteFailure(_) => "DownstreamWriteFailure",
            MarketDataError::Timeout(_) => "Timeout",
            MarketDataError::Config(_) => "Config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_converts_to_store_unavailable() {
        let err: MarketDataError = StoreError::Unavailable("connection refused".into()).into();
        assert!(matches!(err, MarketDataError::StoreUnavailable(_)));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(MarketDataError::StoreUnavailable(StoreError::Unavailable("x".into())).is_transient());
        assert!(MarketDataError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!MarketDataError::MalformedEvent("bad json".into()).is_transient());
        assert!(!MarketDataError::UnknownInstrument("XYZ".into()).is_transient());
        assert!(!MarketDataError::DownstreamWriteFailure("mirror".into()).is_transient());
    }

    #[test]
    fn test_protocol_error_is_not_retried() {
        let err: MarketDataError = StoreError::Protocol {
            key: "MarketData:High:BTCUSD".into(),
            message: "WRONGTYPE".into(),
        }
        .into();
        assert!(!err.is_transient());
        assert_eq!(err.kind(), "StoreProtocol");
    }

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(MarketDataError::Config("w".into()).kind(), "Config");
        assert_eq!(
            MarketDataError::MalformedEvent("x".into()).kind(),
            "MalformedEvent"
        );
    }
}
