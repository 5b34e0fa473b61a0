//! Error types for key-value backends.

use thiserror::Error;

/// Errors reported by a key-value backend.
///
/// These are transport-level failures: the store was unreachable or
/// misbehaved. A transaction *rollback* is not an error at this level; it
/// is reported through [`crate::TxnResult::ok`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KvError {
    /// The store could not be reached or the call failed in flight.
    #[error("kv transport error: {0}")]
    Transport(String),

    /// The call exceeded its deadline.
    #[error("kv operation timed out")]
    Timeout,

    /// The backend rejected the request.
    #[error("kv backend error: {0}")]
    Backend(String),
}
