//! Error and result types for document store operations.
//!
//! Every fallible operation in the crate returns [`StoreResult<T>`]. The error
//! taxonomy separates retryable conditions ([`StoreError::Transient`]) from
//! failures that must surface immediately; [`StoreError::is_transient`] is the
//! single classification point consulted by the execution strategy.

use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors raised by the cluster access layer.
///
/// A `false` boolean result from a document operation is a distinct channel
/// from these errors: it reports a non-acknowledged store response, not a
/// failure. Callers must check both.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Authentication or bucket-open failure. Never retried by the connection
    /// manager itself; the execution strategy treats it as non-retryable.
    #[error("connection error: {0}")]
    Connection(String),
    /// The client wrapper was used after disposal.
    #[error("client wrapper has been disposed")]
    Disposed,
    /// A timeout, connection reset, or similar retryable condition.
    #[error("transient store error: {0}")]
    Transient(String),
    /// A transient failure that exhausted the retry policy.
    #[error("operation {operation} failed after {attempts} attempts: {source}")]
    OperationFailed {
        /// Name of the operation that was retried.
        operation: &'static str,
        /// Number of attempts made before giving up.
        attempts: u32,
        /// The final transient failure.
        #[source]
        source: Box<StoreError>,
    },
    /// The store reported a query-level failure (syntax, runtime). Assumed
    /// deterministic and never retried automatically.
    #[error("query execution failed: {0}")]
    QueryExecution(String),
    /// Malformed or absent key input to the identifier generator.
    #[error("invalid key part: {0}")]
    InvalidKey(String),
    /// Programmer-usage violation, e.g. resetting a single-pass enumerator.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    /// A cancellation signal was observed before the next attempt or advance.
    #[error("operation canceled")]
    Canceled,
    /// JSON encode/decode failure.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Infrastructure failure inside the access layer itself.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized `Result` type for cluster access operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Whether the execution strategy may re-invoke the failed operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<SerdeJsonError> for StoreError {
    fn from(err: SerdeJsonError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
