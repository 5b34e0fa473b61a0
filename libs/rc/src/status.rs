//! Controller status records: the node-transfer marker.
//!
//! A status record at `status/rc/<rc_id>` carries the optional
//! [`NodeTransfer`] describing an in-flight transfer. Creation is a
//! compare-and-set against the record's modify index so that at most one
//! transfer can ever be started per controller.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use herd_id::{NodeName, RcId};
use herd_kv::{KvClient, KvError, KvOp, Transaction, TransactionError};

/// Errors from the status store.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error(transparent)]
    Kv(#[from] KvError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("could not encode status record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("stored status record at '{key}' is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// An in-flight node transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTransfer {
    /// The ineligible node the pod is moving off.
    pub old_node: NodeName,

    /// The freshly allocated replacement.
    pub new_node: NodeName,
}

/// Status of one replication controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RcStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_transfer: Option<NodeTransfer>,
}

/// Builds the storage key for a controller's status record.
#[must_use]
pub fn status_key(rc_id: &RcId) -> String {
    format!("status/rc/{rc_id}")
}

/// The status-store port.
#[async_trait]
pub trait RcStatusStore: Send + Sync {
    /// Reads the status record with its modify index, or `None` when no
    /// record exists (modify index 0 for CAS purposes).
    async fn get(&self, rc_id: &RcId) -> Result<Option<(RcStatus, u64)>, StatusError>;

    /// Appends a compare-and-set write of the status record against the
    /// expected modify index (0 = the record must not exist).
    fn cas_txn(
        &self,
        txn: &Transaction,
        rc_id: &RcId,
        expected_index: u64,
        status: &RcStatus,
    ) -> Result<(), StatusError>;

    /// Appends an op deleting the status record.
    fn clear_txn(&self, txn: &Transaction, rc_id: &RcId) -> Result<(), StatusError>;
}

/// Status store backed by the key-value store.
pub struct KvRcStatusStore<C> {
    client: Arc<C>,
}

impl<C> KvRcStatusStore<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: KvClient + 'static> RcStatusStore for KvRcStatusStore<C> {
    async fn get(&self, rc_id: &RcId) -> Result<Option<(RcStatus, u64)>, StatusError> {
        let key = status_key(rc_id);
        match self.client.get(&key).await? {
            Some(pair) => {
                let status: RcStatus =
                    serde_json::from_slice(&pair.value).map_err(|source| StatusError::Corrupt {
                        key: key.clone(),
                        source,
                    })?;
                Ok(Some((status, pair.modify_index)))
            }
            None => Ok(None),
        }
    }

    fn cas_txn(
        &self,
        txn: &Transaction,
        rc_id: &RcId,
        expected_index: u64,
        status: &RcStatus,
    ) -> Result<(), StatusError> {
        let bytes = serde_json::to_vec(status).map_err(StatusError::Encode)?;
        txn.add(KvOp::cas(status_key(rc_id), bytes, expected_index))?;
        Ok(())
    }

    fn clear_txn(&self, txn: &Transaction, rc_id: &RcId) -> Result<(), StatusError> {
        txn.add(KvOp::delete(status_key(rc_id)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serde_roundtrip() {
        let status = RcStatus {
            node_transfer: Some(NodeTransfer {
                old_node: NodeName::new("node1").unwrap(),
                new_node: NodeName::new("node2").unwrap(),
            }),
        };

        let bytes = serde_json::to_vec(&status).unwrap();
        let back: RcStatus = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(status, back);
    }

    #[test]
    fn empty_status_omits_the_transfer_field() {
        let bytes = serde_json::to_vec(&RcStatus::default()).unwrap();
        assert_eq!(bytes, b"{}");
    }
}
