use std::{error, fmt, result};

/// Type alias for convenience when using the Result type with our Error.
pub type BexResult<T> = result::Result<T, BexError>;

/// Internal error representation with kind and optional source error.
///
/// Uses boxing to keep the public Error type size consistent and enable
/// rich error context without penalizing the success path.
struct ErrorInner {
    kind: ErrorKind,
    source: Option<Box<dyn error::Error + Send + Sync>>,
}

/// Error classification for batch export operations.
///
/// Kinds are tagged values, not strings: callers branch on them to decide
/// retries, per-row recovery, and finalize behavior.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The store failed with a transport or timeout error; retryable.
    StoreUnavailable,
    /// A statement was rejected by the store; not retryable.
    QueryExecutionFailed { query: String },
    /// The emitter could not write or flush; always fatal to the batch.
    Io,
    /// A finalize found the lease no longer owned by this worker.
    LostLease { master_id: i64 },
    /// The task was cooperatively cancelled.
    Cancelled,
    /// Emitter operation called out of order; a programming error.
    InvalidEmitterState {
        expected: &'static str,
        actual: &'static str,
    },
    /// A detail row could not be decoded or rendered; per-row, carried here
    /// only when the error policy escalates it to the whole batch.
    RowRejected { detail_id: i64, reason: String },
    /// Configuration parsing or validation failure.
    ConfigurationError { parameter: String, reason: String },
    /// A batch task panicked.
    BatchTaskPanicked,
}

/// A stable error type for the bex library.
///
/// Pairs an [`ErrorKind`] with an optional source error, supporting error
/// chaining and classification for retry decisions.
pub struct BexError(Box<ErrorInner>);

impl BexError {
    /// Creates a new error with the specified kind.
    pub fn new(kind: ErrorKind) -> Self {
        BexError(Box::new(ErrorInner { kind, source: None }))
    }

    /// Creates a new error with the specified kind and source error.
    pub fn with_source<E>(kind: ErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        BexError(Box::new(ErrorInner {
            kind,
            source: Some(source.into()),
        }))
    }

    /// Creates a lost-lease error for the given batch.
    pub fn lost_lease(master_id: i64) -> Self {
        Self::new(ErrorKind::LostLease { master_id })
    }

    /// Creates a cancellation error.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    /// Returns the error kind.
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }

    /// Returns true if this error is likely transient and worth retrying
    /// with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self.0.kind, ErrorKind::StoreUnavailable)
    }
}

impl fmt::Debug for BexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BexError")
            .field("kind", &self.0.kind)
            .field("source", &self.0.source)
            .finish()
    }
}

impl fmt::Display for BexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ErrorKind::*;

        match &self.0.kind {
            StoreUnavailable => write!(f, "store unavailable"),
            QueryExecutionFailed { query } => {
                write!(f, "query execution failed: {query}")
            }
            Io => write!(f, "i/o operation failed"),
            LostLease { master_id } => {
                write!(f, "lease on batch {master_id} is no longer held")
            }
            Cancelled => write!(f, "task cancelled"),
            InvalidEmitterState { expected, actual } => {
                write!(f, "emitter in state {actual}, expected {expected}")
            }
            RowRejected { detail_id, reason } => {
                write!(f, "detail {detail_id} rejected: {reason}")
            }
            ConfigurationError { parameter, reason } => {
                write!(f, "configuration error for parameter '{parameter}': {reason}")
            }
            BatchTaskPanicked => write!(f, "a batch task panicked"),
        }
    }
}

impl error::Error for BexError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.0
            .source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn error::Error + 'static))
    }
}

impl From<tokio_postgres::Error> for BexError {
    fn from(err: tokio_postgres::Error) -> Self {
        // A database-reported error means the statement reached the server
        // and was rejected; anything else is transport trouble.
        if err.as_db_error().is_some() {
            Self::with_source(
                ErrorKind::QueryExecutionFailed {
                    query: "unknown".to_string(),
                },
                err,
            )
        } else {
            Self::with_source(ErrorKind::StoreUnavailable, err)
        }
    }
}

impl From<sqlx::Error> for BexError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::with_source(ErrorKind::StoreUnavailable, err),
            sqlx::Error::Configuration(source) => Self::with_source(
                ErrorKind::ConfigurationError {
                    parameter: "database".to_string(),
                    reason: source.to_string(),
                },
                err,
            ),
            _ => Self::with_source(
                ErrorKind::QueryExecutionFailed {
                    query: "unknown".to_string(),
                },
                err,
            ),
        }
    }
}

impl From<std::io::Error> for BexError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(ErrorKind::Io, err)
    }
}

/// A per-row failure inside the streaming pipeline.
///
/// Row results are tagged values: the emitter consumes only successfully
/// transformed rows, while the batch processor aggregates these according
/// to the configured error policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    /// The detail row that failed.
    pub detail_id: i64,
    /// What went wrong with it.
    pub kind: RowErrorKind,
}

/// Classification of per-row failures.
#[derive(Debug, Clone, PartialEq)]
pub enum RowErrorKind {
    /// The semi-structured payload could not be decoded.
    Decode { reason: String },
    /// A rendered field contains the output delimiter.
    DelimiterConflict { field: &'static str },
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RowErrorKind::Decode { reason } => {
                write!(f, "detail {}: decode failed: {reason}", self.detail_id)
            }
            RowErrorKind::DelimiterConflict { field } => {
                write!(
                    f,
                    "detail {}: field '{field}' contains the delimiter",
                    self.detail_id
                )
            }
        }
    }
}

impl From<RowError> for BexError {
    /// Escalates a per-row failure into a batch-level error, used when the
    /// error policy is abort-batch.
    fn from(err: RowError) -> Self {
        BexError::new(ErrorKind::RowRejected {
            detail_id: err.detail_id,
            reason: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_unavailable_is_retryable() {
        assert!(BexError::new(ErrorKind::StoreUnavailable).is_retryable());
    }

    #[test]
    fn test_lost_lease_is_not_retryable() {
        assert!(!BexError::lost_lease(7).is_retryable());
    }

    #[test]
    fn test_row_error_escalation_keeps_detail_id() {
        let row_err = RowError {
            detail_id: 42,
            kind: RowErrorKind::DelimiterConflict {
                field: "description",
            },
        };

        let err: BexError = row_err.into();
        assert!(matches!(
            err.kind(),
            ErrorKind::RowRejected { detail_id: 42, .. }
        ));
    }
}
