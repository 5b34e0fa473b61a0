//! Backend ports for the key-value store.

use async_trait::async_trait;

use crate::error::KvError;
use crate::op::{KvOp, TxnResult};

/// A backend that can execute transactions.
///
/// This is the only write surface the controller uses; every mutation goes
/// through a transaction, even single-op ones.
#[async_trait]
pub trait Txner: Send + Sync {
    /// Submits the ops as one atomic transaction.
    ///
    /// `Err` is transport-level only. A rollback is reported through
    /// [`TxnResult::ok`] being false.
    async fn txn(&self, ops: Vec<KvOp>) -> Result<TxnResult, KvError>;
}

/// A key with its stored value and modify index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Vec<u8>,

    /// Incremented on every write to the key; the comparand for
    /// [`crate::Verb::Cas`].
    pub modify_index: u64,
}

/// A backend that can also serve reads.
#[async_trait]
pub trait KvClient: Txner {
    /// Reads a single key.
    async fn get(&self, key: &str) -> Result<Option<KvPair>, KvError>;

    /// Lists all keys under a prefix, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>, KvError>;
}
