//! Controller error taxonomy.
//!
//! Any error aborts the current reconciliation pass and is reported on the
//! controller's error channel; the next tick starts clean. Partial commits
//! are a normal outcome because passes are idempotent.

use herd_id::NodeName;
use herd_kv::TransactionError;
use herd_manifest::ManifestError;
use thiserror::Error;

use crate::alerter::AlertError;
use crate::audit::AuditError;
use crate::health::HealthError;
use crate::labels::LabelError;
use crate::scheduler::SchedulerError;
use crate::status::StatusError;
use crate::store::StoreError;

fn join_nodes(nodes: &[NodeName]) -> String {
    let names: Vec<&str> = nodes.iter().map(NodeName::as_str).collect();
    names.join(", ")
}

/// Errors that abort a reconciliation pass.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Not enough eligible nodes to meet the desired replica count. The
    /// pass alerts, commits what it scheduled, and fails.
    #[error(
        "insufficient eligible capacity: {desired} replicas desired, {current} current, \
         {eligible} eligible; scheduled on {scheduled} nodes instead"
    )]
    InsufficientCapacity {
        desired: usize,
        current: usize,
        eligible: usize,
        scheduled: usize,
    },

    /// The allocation service could not provide a replacement node.
    #[error("node allocation failed: {reason}")]
    AllocationFailed { reason: String },

    /// A pinned workload holds ineligible nodes; transfers are forbidden,
    /// so this is surfaced to operators instead of auto-healed.
    #[error(
        "pinned workload has {} ineligible nodes: {}",
        nodes.len(),
        join_nodes(nodes)
    )]
    PinnedIneligible { nodes: Vec<NodeName> },

    /// Fewer pods exist than the unschedule loop expected to drain.
    /// Mathematically impossible unless the record is corrupt.
    #[error("cannot unschedule enough nodes: {desired} replicas desired, {current} current")]
    CannotUnscheduleEnough { desired: usize, current: usize },

    /// The definition watcher reported a failure.
    #[error("definition watcher error: {0}")]
    Watcher(String),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error("pod store error: {0}")]
    Store(#[from] StoreError),

    #[error("label store error: {0}")]
    Label(#[from] LabelError),

    #[error("status store error: {0}")]
    Status(#[from] StatusError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("health checker error: {0}")]
    Health(#[from] HealthError),

    #[error("alert delivery error: {0}")]
    Alert(#[from] AlertError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
}
