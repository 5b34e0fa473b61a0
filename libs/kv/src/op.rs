//! Typed operations of the key-value transaction protocol.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum number of operations in a single transaction.
///
/// The store enforces this server-side; the client enforces it too so the
/// violation surfaces as a local, unambiguous error.
pub const MAX_OPS_PER_TXN: usize = 64;

/// Operation verbs supported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    /// Unconditionally write the value at the key.
    Set,

    /// Write the value iff the key's modify index matches the expected
    /// index. Index 0 means the key must not exist.
    Cas,

    /// Delete the key if present.
    Delete,
}

/// One operation within a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvOp {
    pub verb: Verb,
    pub key: String,

    /// Payload for `Set`/`Cas`; absent for `Delete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,

    /// Expected modify index for `Cas`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
}

impl KvOp {
    /// Builds an unconditional write.
    #[must_use]
    pub fn set(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            verb: Verb::Set,
            key: key.into(),
            value: Some(value),
            index: None,
        }
    }

    /// Builds a compare-and-set write against an expected modify index.
    #[must_use]
    pub fn cas(key: impl Into<String>, value: Vec<u8>, index: u64) -> Self {
        Self {
            verb: Verb::Cas,
            key: key.into(),
            value: Some(value),
            index: Some(index),
        }
    }

    /// Builds a delete.
    #[must_use]
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            verb: Verb::Delete,
            key: key.into(),
            value: None,
            index: None,
        }
    }
}

/// Failure of one operation within a rolled-back transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnOpError {
    /// Position of the failed operation within the submitted transaction.
    pub op_index: usize,

    /// Store-provided description of the failure.
    pub message: String,
}

impl fmt::Display for TxnOpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op {}: {}", self.op_index, self.message)
    }
}

/// Per-operation results of a transaction call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxnResponse {
    /// Failures that caused a rollback; empty on success.
    pub errors: Vec<TxnOpError>,
}

/// Outcome of a transaction call that reached the store.
///
/// `ok == false` means the store rolled the transaction back: no op was
/// applied, and `response.errors` enumerates the failures. That outcome
/// must not be retried.
#[derive(Debug, Clone)]
pub struct TxnResult {
    pub ok: bool,
    pub response: TxnResponse,
}

impl TxnResult {
    /// A fully-applied result with no op failures.
    #[must_use]
    pub fn committed() -> Self {
        Self {
            ok: true,
            response: TxnResponse::default(),
        }
    }

    /// A rolled-back result carrying the op failures.
    #[must_use]
    pub fn rolled_back(errors: Vec<TxnOpError>) -> Self {
        Self {
            ok: false,
            response: TxnResponse { errors },
        }
    }
}

/// Renders rollback failures into one human-readable line.
#[must_use]
pub fn txn_errors_to_string(errors: &[TxnOpError]) -> String {
    let rendered: Vec<String> = errors.iter().map(TxnOpError::to_string).collect();
    rendered.join("; ")
}
