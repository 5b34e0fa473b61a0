//! Auditing transactions.
//!
//! An [`AuditingTransaction`] tracks the node-set a controller's placement
//! will have once the transaction commits. At commit time it appends one
//! audit-log entry describing the before/after node-sets, then delegates to
//! the underlying commit. The audit op counts against the transaction op
//! limit, so callers must stop adding scheduling ops one short of it; the
//! reconciler's batching keeps every batch far below that.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use herd_id::{NodeName, RcId, Ulid};
use herd_kv::{CommitOutcome, KvOp, Transaction, TransactionError, Txner};

/// Prefix of audit-log entries.
pub const AUDIT_TREE_PREFIX: &str = "audit/rc/";

/// Errors from the auditing wrapper.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("could not encode audit record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

/// The audit-log entry written alongside every placement change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementChangeRecord {
    pub rc_id: RcId,
    pub previous_nodes: Vec<NodeName>,
    pub current_nodes: Vec<NodeName>,
    pub recorded_at: DateTime<Utc>,
}

/// A transaction that records the placement transition it performs.
pub struct AuditingTransaction {
    txn: Transaction,
    _guard: herd_kv::CancelGuard,
    rc_id: RcId,
    previous: BTreeSet<NodeName>,
    current: BTreeSet<NodeName>,
}

impl AuditingTransaction {
    /// Opens an auditing transaction seeded with the current placement.
    #[must_use]
    pub fn new(rc_id: RcId, current_nodes: impl IntoIterator<Item = NodeName>) -> Self {
        let (txn, guard) = Transaction::new();
        let nodes: BTreeSet<NodeName> = current_nodes.into_iter().collect();
        Self {
            txn,
            _guard: guard,
            rc_id,
            previous: nodes.clone(),
            current: nodes,
        }
    }

    /// The underlying transaction, for appending scheduling ops.
    #[must_use]
    pub fn txn(&self) -> &Transaction {
        &self.txn
    }

    /// Records that `node` will hold a pod once this commits.
    pub fn add_node(&mut self, node: NodeName) {
        self.current.insert(node);
    }

    /// Records that `node` will no longer hold a pod once this commits.
    pub fn remove_node(&mut self, node: &NodeName) {
        self.current.remove(node);
    }

    /// The node-set as it will exist after commit, sorted. Used to seed
    /// the next transaction when batching.
    #[must_use]
    pub fn nodes(&self) -> Vec<NodeName> {
        self.current.iter().cloned().collect()
    }

    /// Appends the audit-log op and commits.
    ///
    /// The audit entry is written unconditionally, as the last op of the
    /// transaction, even when no scheduling ops were added and the
    /// node-set is unchanged (a failing pass still records the placement
    /// it committed to).
    pub async fn commit(self, txner: &dyn Txner) -> Result<CommitOutcome, AuditError> {
        let record = PlacementChangeRecord {
            rc_id: self.rc_id,
            previous_nodes: self.previous.iter().cloned().collect(),
            current_nodes: self.current.iter().cloned().collect(),
            recorded_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&record).map_err(AuditError::Encode)?;
        self.txn
            .add(KvOp::set(format!("{AUDIT_TREE_PREFIX}{}", Ulid::new()), bytes))?;

        Ok(self.txn.commit(txner).await?)
    }
}
