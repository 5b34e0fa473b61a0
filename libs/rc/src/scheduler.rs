//! The scheduler port: node eligibility and allocation.

use async_trait::async_trait;
use thiserror::Error;

use herd_id::NodeName;
use herd_manifest::Manifest;

use crate::labels::LabelSelector;

/// Errors from the scheduling/allocation service.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("allocation backend error: {0}")]
    Backend(String),
}

/// Decides which nodes are appropriate for a pod, taking node labels,
/// existing load, and capacity reservations into account.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Returns the nodes the manifest may currently be scheduled on. May
    /// be empty.
    async fn eligible_nodes(
        &self,
        manifest: &Manifest,
        selector: &LabelSelector,
    ) -> Result<Vec<NodeName>, SchedulerError>;

    /// Requests `count` additional nodes be made eligible. Returns the
    /// newly eligible nodes, which subsequently appear in
    /// [`Self::eligible_nodes`]. May return fewer than requested; callers
    /// treat a short result as failure.
    async fn allocate_nodes(
        &self,
        manifest: &Manifest,
        selector: &LabelSelector,
        count: usize,
    ) -> Result<Vec<NodeName>, SchedulerError>;

    /// Releases the reservations held for the given nodes. Idempotent.
    async fn deallocate_nodes(
        &self,
        selector: &LabelSelector,
        nodes: &[NodeName],
    ) -> Result<(), SchedulerError>;
}
