//! # herd-rc
//!
//! The replication controller: a per-workload control loop that reconciles
//! a desired replica count against the pods actually scheduled across the
//! fleet, using a transactional key-value store as the source of truth for
//! intent.
//!
//! Each pass diffs desired against current placement, schedules or
//! unschedules pods in deterministic order, and repairs stale pod
//! manifests. For cattle workloads it also transfers pods off nodes that
//! have silently become ineligible. All writes are batched into store
//! transactions that stay under the store's per-transaction op limit.
//!
//! External collaborators (the store client, label store, health checker,
//! allocation service, alert delivery, and the definition watcher) are
//! ports; see the module docs for their contracts.

pub mod alerter;
pub mod audit;
pub mod config;
pub mod error;
pub mod fields;
pub mod health;
pub mod labels;
pub mod placement;
pub mod reconciler;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod transfer;
pub mod watch;

pub use alerter::{AlertInfo, Alerter, NopAlerter};
pub use audit::AuditingTransaction;
pub use config::ControllerConfig;
pub use error::ControllerError;
pub use fields::{AllocationStrategy, RcFields, SharedRcFields};
pub use health::{HealthChecker, HealthResult, HealthStatus};
pub use labels::{KvLabeler, LabelSelector, LabelType, Labeler, RC_ID_LABEL};
pub use placement::{current_pods, PodLocation};
pub use reconciler::{Ports, ReplicationController};
pub use scheduler::Scheduler;
pub use status::{KvRcStatusStore, NodeTransfer, RcStatus, RcStatusStore};
pub use store::{KvPodStore, PodStore, PodTree};
pub use watch::RcWatcher;
