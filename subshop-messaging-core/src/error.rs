// subshop-messaging-core/src/error.rs
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("subscribe error: {0}")]
    Subscribe(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("handler error: {0}")]
    Handler(String),

    /// The messaging client was shut down with `close()`.
    #[error("messaging client closed")]
    Closed,
}

impl MessagingError {
    /// Connection-level failures are recovered by the reconnect loop; callers may retry.
    pub fn is_connection(&self) -> bool {
        matches!(self, MessagingError::Connection(_))
    }
}

/// Failure raised while processing a single delivery.
///
/// Every variant maps to exactly one acknowledgement decision, see
/// [`ProcessingError::is_permanent`].
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// The body could not be decoded into the expected schema.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A dependency is temporarily unavailable; the delivery should be requeued.
    #[error("transient processing failure: {0}")]
    Transient(String),

    /// Retrying can never succeed (unknown entity, invalid data, ...).
    #[error("permanent processing failure: {0}")]
    Permanent(String),
}

impl ProcessingError {
    pub fn transient(msg: impl Into<String>) -> Self {
        ProcessingError::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        ProcessingError::Permanent(msg.into())
    }

    /// `true` when the delivery must be rejected without requeue.
    pub fn is_permanent(&self) -> bool {
        match self {
            ProcessingError::Malformed(_) | ProcessingError::Permanent(_) => true,
            ProcessingError::Transient(_) => false,
        }
    }
}

impl From<serde_json::Error> for ProcessingError {
    fn from(err: serde_json::Error) -> Self {
        ProcessingError::Malformed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_total() {
        assert!(ProcessingError::Malformed("x".into()).is_permanent());
        assert!(ProcessingError::permanent("x").is_permanent());
        assert!(!ProcessingError::transient("x").is_permanent());
    }

    #[test]
    fn json_errors_are_malformed() {
        let err = serde_json::from_slice::<serde_json::Value>(b"{not json").unwrap_err();
        let err: ProcessingError = err.into();
        assert!(matches!(err, ProcessingError::Malformed(_)));
    }
}
