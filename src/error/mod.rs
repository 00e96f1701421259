//! Error types for Windlass
//!
//! This module defines the main error type used throughout the consumer core
//! and the Kafka error-code taxonomy used to classify per-partition response
//! errors into retriable and fatal.

use thiserror::Error;

mod kafka_error_code;

pub use kafka_error_code::KafkaErrorCode;

/// Result type alias for Windlass operations
pub type Result<T> = std::result::Result<T, WindlassError>;

/// Main error type for Windlass.
///
/// The error is `Clone` because a single failure (for example a dead broker
/// connection) fans out to every partition that was batched into the failed
/// request, and because fatal partition errors are carried inside injected
/// error fetches until the user observes them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindlassError {
    /// A broker answered a request with a per-partition error code.
    #[error("broker responded with {0}")]
    Broker(KafkaErrorCode),

    /// The request never produced a usable response (connection failure,
    /// serialization failure, broker hangup mid-request).
    #[error("transport error: {0}")]
    Transport(String),

    /// The broker handle was permanently stopped.
    #[error("broker is dead")]
    BrokerDead,

    /// The client is closing; no further work will be done.
    #[error("client is shutting down")]
    ClientClosed,

    /// Epoch-qualified offset resolution detected log truncation: the
    /// broker's end offset for the requested epoch is below the offset the
    /// consumer wanted to resume at.
    #[error(
        "data loss detected: {topic}[{partition}] requested offset {requested}, \
         log truncated to {end_offset}"
    )]
    DataLoss {
        /// Topic the truncation was detected on
        topic: String,
        /// Partition the truncation was detected on
        partition: i32,
        /// The offset the consumer asked to resume at
        requested: i64,
        /// The broker's end offset for the requested epoch; consumption
        /// resumes here
        end_offset: i64,
    },

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The broker replied with something the protocol does not allow
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl WindlassError {
    /// Classify a wire error code, returning `None` for code 0 (no error).
    pub fn from_code(code: i16) -> Option<WindlassError> {
        match KafkaErrorCode::from_code(code) {
            KafkaErrorCode::None => None,
            code => Some(WindlassError::Broker(code)),
        }
    }

    /// Returns true if the operation that produced this error may be retried.
    ///
    /// Transport-level failures are always retriable: the next metadata
    /// update may route the request to a healthy broker. Data loss is not
    /// retriable; the user must observe it once, after which the cursor has
    /// already been moved to the safe offset.
    pub fn is_retriable(&self) -> bool {
        match self {
            WindlassError::Broker(code) => code.is_retriable(),
            WindlassError::Transport(_) => true,
            WindlassError::BrokerDead => true,
            WindlassError::ClientClosed => false,
            WindlassError::DataLoss { .. } => false,
            WindlassError::Config(_) => false,
            WindlassError::Protocol(_) => false,
        }
    }

    /// Returns true if this error is the data-loss signal.
    pub fn is_data_loss(&self) -> bool {
        matches!(self, WindlassError::DataLoss { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code_none_is_ok() {
        assert!(WindlassError::from_code(0).is_none());
        assert_eq!(
            WindlassError::from_code(6),
            Some(WindlassError::Broker(KafkaErrorCode::NotLeaderOrFollower))
        );
    }

    #[test]
    fn test_transport_errors_are_retriable() {
        assert!(WindlassError::Transport("connection reset".into()).is_retriable());
        assert!(WindlassError::BrokerDead.is_retriable());
    }

    #[test]
    fn test_data_loss_is_fatal_but_recognizable() {
        let err = WindlassError::DataLoss {
            topic: "orders".into(),
            partition: 2,
            requested: 1000,
            end_offset: 800,
        };
        assert!(!err.is_retriable());
        assert!(err.is_data_loss());
        let msg = err.to_string();
        assert!(msg.contains("orders[2]"));
        assert!(msg.contains("800"));
    }
}
