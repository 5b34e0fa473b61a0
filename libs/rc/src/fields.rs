//! The replication controller record.
//!
//! The record is mutated externally (the definition watcher applies
//! updates) while the reconciler reads it, so all access goes through
//! [`SharedRcFields`]: a mutex-guarded handle whose readers take whole
//! snapshots and never hold the lock across I/O.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use herd_id::RcId;
use herd_manifest::Manifest;

use crate::labels::LabelSelector;

/// How replacement nodes may be obtained for a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    /// Nodes are not interchangeable; transfers are forbidden and
    /// ineligible placements are surfaced to operators.
    Pinned,

    /// Nodes are interchangeable; the controller may transfer pods onto
    /// freshly allocated replacements.
    Cattle,
}

/// Desired state of one replication controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RcFields {
    pub id: RcId,

    /// The manifest every replica runs. Opaque to the controller apart
    /// from its id and content hash.
    pub manifest: Manifest,

    /// Which nodes the workload may run on.
    pub node_selector: LabelSelector,

    pub replicas_desired: usize,

    /// A disabled controller takes no action (and cancels any in-flight
    /// node transfer).
    pub disabled: bool,

    /// User labels applied to every pod this controller schedules, in
    /// addition to the reserved ownership labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_labels: BTreeMap<String, String>,

    pub allocation_strategy: AllocationStrategy,
}

/// Shared, mutex-guarded access to an [`RcFields`] record.
#[derive(Debug, Clone)]
pub struct SharedRcFields {
    inner: Arc<Mutex<RcFields>>,
}

impl SharedRcFields {
    #[must_use]
    pub fn new(fields: RcFields) -> Self {
        Self {
            inner: Arc::new(Mutex::new(fields)),
        }
    }

    /// Takes a whole-record snapshot under the lock.
    #[must_use]
    pub fn snapshot(&self) -> RcFields {
        self.inner.lock().clone()
    }

    /// Returns the controller id without cloning the record.
    #[must_use]
    pub fn id(&self) -> RcId {
        self.inner.lock().id
    }

    /// Applies a mutation under the lock. Used by the definition watcher;
    /// the closure must not block.
    pub fn update(&self, apply: impl FnOnce(&mut RcFields)) {
        let mut fields = self.inner.lock();
        apply(&mut fields);
    }
}
