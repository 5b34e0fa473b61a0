//! The health-checker port.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use herd_id::{NodeName, PodId};

/// Errors from the health checker.
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("health backend error: {0}")]
    Backend(String),
}

/// Health of a service instance on one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Passing,
    Warning,
    Critical,
    Unknown,
}

/// Health-check result for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResult {
    pub status: HealthStatus,
}

/// Reports per-node health for a service.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Returns the health of the service on every node reporting it.
    /// Nodes with no check registered are absent from the map.
    async fn service(
        &self,
        pod_id: &PodId,
    ) -> Result<BTreeMap<NodeName, HealthResult>, HealthError>;
}
