//! The alerting port.
//!
//! Alerts surface conditions an operator must act on: insufficient
//! capacity, allocation failures, and ineligible placements on pinned
//! workloads. Delivery failures are logged by callers, never fatal.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use herd_id::{PodId, RcId};

/// Errors delivering an alert.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert delivery failed: {0}")]
    Delivery(String),
}

/// Context attached to every alert, sufficient to debug a controller
/// without access to its logs.
#[derive(Debug, Clone, Serialize)]
pub struct AlertInfo {
    pub description: String,

    /// Deduplication key for the alerting system; the controller id, so
    /// repeated alerts for one controller collapse into one incident.
    pub incident_key: String,

    pub rc_id: RcId,

    /// Hostname of the process running the controller.
    pub hostname: String,

    pub pod_id: PodId,

    pub node_selector: String,
}

/// Delivers alerts to operators.
#[async_trait]
pub trait Alerter: Send + Sync {
    async fn alert(&self, info: AlertInfo) -> Result<(), AlertError>;
}

/// An alerter that discards everything. Used where alerting is not wired
/// up.
pub struct NopAlerter;

#[async_trait]
impl Alerter for NopAlerter {
    async fn alert(&self, info: AlertInfo) -> Result<(), AlertError> {
        debug!(incident_key = %info.incident_key, "Discarding alert (no alerter configured)");
        Ok(())
    }
}
