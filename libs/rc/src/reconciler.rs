//! The reconciliation loop.
//!
//! `meet_desires` runs once per tick: diff desired replicas against current
//! placement, schedule or unschedule in deterministic order, hand
//! ineligible nodes to the transfer engine, and repair stale manifests.
//! Every write goes through an auditing transaction batched to stay clear
//! of the store's per-transaction op ceiling.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use herd_id::{NodeName, RcId};
use herd_kv::{CommitOutcome, Transaction, TransactionError, Txner};

use crate::alerter::{AlertInfo, Alerter};
use crate::audit::AuditingTransaction;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::fields::{RcFields, SharedRcFields};
use crate::health::HealthChecker;
use crate::labels::{pod_label_key, LabelType, Labeler, POD_ID_LABEL, RC_ID_LABEL};
use crate::placement::{current_pods, PodLocation};
use crate::scheduler::Scheduler;
use crate::status::RcStatusStore;
use crate::store::{PodStore, PodTree};
use crate::transfer::TransferWaiter;
use crate::watch::RcWatcher;

/// Scheduling actions per transaction batch. Each action appends two ops
/// and the audit entry adds one more, which keeps every batch far below
/// the store's op ceiling.
pub(crate) const SCHEDULES_PER_BATCH: usize = 5;

/// The external collaborators a controller is wired to.
pub struct Ports {
    pub txner: Arc<dyn Txner>,
    pub pod_store: Arc<dyn PodStore>,
    pub status_store: Arc<dyn RcStatusStore>,
    pub scheduler: Arc<dyn Scheduler>,
    pub labeler: Arc<dyn Labeler>,
    pub alerter: Arc<dyn Alerter>,
    pub health_checker: Arc<dyn HealthChecker>,
    pub watcher: Arc<dyn RcWatcher>,
}

/// One replication controller.
pub struct ReplicationController {
    pub(crate) fields: SharedRcFields,
    pub(crate) config: ControllerConfig,

    pub(crate) txner: Arc<dyn Txner>,
    pub(crate) pod_store: Arc<dyn PodStore>,
    pub(crate) status_store: Arc<dyn RcStatusStore>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) labeler: Arc<dyn Labeler>,
    pub(crate) alerter: Arc<dyn Alerter>,
    pub(crate) health_checker: Arc<dyn HealthChecker>,
    pub(crate) watcher: Arc<dyn RcWatcher>,

    /// The at-most-one transfer waiter task for this controller.
    pub(crate) transfer: Mutex<Option<TransferWaiter>>,

    /// Weak handle back to the owning `Arc`, for spawning tasks that
    /// outlive the current call.
    pub(crate) self_handle: Weak<Self>,
}

impl ReplicationController {
    #[must_use]
    pub fn new(fields: RcFields, config: ControllerConfig, ports: Ports) -> Arc<Self> {
        Arc::new_cyclic(|self_handle| Self {
            fields: SharedRcFields::new(fields),
            config,
            txner: ports.txner,
            pod_store: ports.pod_store,
            status_store: ports.status_store,
            scheduler: ports.scheduler,
            labeler: ports.labeler,
            alerter: ports.alerter,
            health_checker: ports.health_checker,
            watcher: ports.watcher,
            transfer: Mutex::new(None),
            self_handle: self_handle.clone(),
        })
    }

    /// The controller's id.
    #[must_use]
    pub fn id(&self) -> RcId {
        self.fields.id()
    }

    /// Handle to the mutable definition record this controller reconciles.
    /// The definition watcher applies updates through it.
    #[must_use]
    pub fn fields(&self) -> SharedRcFields {
        self.fields.clone()
    }

    /// Every pod currently owned by this controller, sorted by node.
    pub async fn current_pods(&self) -> Result<Vec<PodLocation>, ControllerError> {
        Ok(current_pods(self.id(), &*self.labeler).await?)
    }

    /// Runs a single reconciliation pass.
    pub async fn meet_desires(&self) -> Result<(), ControllerError> {
        let fields = self.fields.snapshot();
        info!(
            rc_id = %fields.id,
            replicas_desired = fields.replicas_desired,
            disabled = fields.disabled,
            "Handling controller update"
        );

        // Being disabled is a normal state, not an error. An in-flight
        // node transfer does not survive it.
        if fields.disabled {
            return self.cancel_node_transfer(&fields).await;
        }

        let mut current = self.current_pods().await?;
        let eligible = self.eligible_nodes(&fields).await?;

        let mut nodes_changed = false;
        if fields.replicas_desired > current.len() {
            self.add_pods(&fields, &current, &eligible).await?;
            nodes_changed = true;
        } else if current.len() > fields.replicas_desired {
            self.remove_pods(&fields, &current, &eligible).await?;
            nodes_changed = true;
        } else {
            debug!(rc_id = %fields.id, "Replica count already met, taking no action");
        }

        if nodes_changed {
            current = self.current_pods().await?;
        }

        let ineligible = check_for_ineligible(&current, &eligible);
        if !ineligible.is_empty() {
            self.transfer_nodes(&fields, ineligible).await?;
        }

        self.ensure_consistency(&fields, &current).await
    }

    pub(crate) async fn eligible_nodes(
        &self,
        fields: &RcFields,
    ) -> Result<Vec<NodeName>, ControllerError> {
        Ok(self
            .scheduler
            .eligible_nodes(&fields.manifest, &fields.node_selector)
            .await?)
    }

    async fn add_pods(
        &self,
        fields: &RcFields,
        current: &[PodLocation],
        eligible: &[NodeName],
    ) -> Result<(), ControllerError> {
        let current_nodes: BTreeSet<NodeName> =
            current.iter().map(|pod| pod.node.clone()).collect();
        let eligible_nodes: BTreeSet<NodeName> = eligible.iter().cloned().collect();

        // Deterministic scheduling order: candidates sorted by hostname.
        let candidates: Vec<NodeName> = eligible_nodes
            .difference(&current_nodes)
            .cloned()
            .collect();

        let to_schedule = fields.replicas_desired - current.len();
        info!(
            rc_id = %fields.id,
            count = to_schedule,
            candidates = candidates.len(),
            "Scheduling additional replicas"
        );

        let mut txn = AuditingTransaction::new(fields.id, current_nodes);
        for i in 0..to_schedule {
            if i % SCHEDULES_PER_BATCH == 0 && i > 0 {
                let nodes = txn.nodes();
                self.commit_audited(txn).await?;
                txn = AuditingTransaction::new(fields.id, nodes);
            }

            let Some(node) = candidates.get(i) else {
                let err = ControllerError::InsufficientCapacity {
                    desired: fields.replicas_desired,
                    current: current.len(),
                    eligible: eligible.len(),
                    scheduled: i,
                };
                self.send_alert(fields, err.to_string()).await;
                self.commit_audited(txn).await?;
                return Err(err);
            };

            self.schedule(&mut txn, fields, node)?;
        }

        self.commit_audited(txn).await
    }

    async fn remove_pods(
        &self,
        fields: &RcFields,
        current: &[PodLocation],
        eligible: &[NodeName],
    ) -> Result<(), ControllerError> {
        let current_nodes: BTreeSet<NodeName> =
            current.iter().map(|pod| pod.node.clone()).collect();
        let eligible_nodes: BTreeSet<NodeName> = eligible.iter().cloned().collect();

        // Prefer unscheduling nodes that are no longer eligible. Both sets
        // drain in sorted order so equal inputs make equal choices.
        let mut preferred: VecDeque<NodeName> = current_nodes
            .difference(&eligible_nodes)
            .cloned()
            .collect();
        let mut rest: VecDeque<NodeName> = current_nodes
            .intersection(&eligible_nodes)
            .cloned()
            .collect();

        let to_unschedule = current.len() - fields.replicas_desired;
        info!(
            rc_id = %fields.id,
            count = to_unschedule,
            ineligible_first = preferred.len(),
            "Unscheduling excess replicas"
        );

        let mut txn = AuditingTransaction::new(fields.id, current_nodes);
        for i in 0..to_unschedule {
            if i % SCHEDULES_PER_BATCH == 0 && i > 0 {
                let nodes = txn.nodes();
                self.commit_audited(txn).await?;
                txn = AuditingTransaction::new(fields.id, nodes);
            }

            let Some(node) = preferred.pop_front().or_else(|| rest.pop_front()) else {
                // Impossible unless the record went backwards mid-pass.
                self.commit_audited(txn).await?;
                return Err(ControllerError::CannotUnscheduleEnough {
                    desired: fields.replicas_desired,
                    current: current.len(),
                });
            };

            self.unschedule(&mut txn, fields, &node).await?;
        }

        self.commit_audited(txn).await
    }

    /// Rewrites the intent record of every placement whose stored manifest
    /// hash differs from the controller's current manifest hash. Labels
    /// are untouched: they are already present by construction.
    async fn ensure_consistency(
        &self,
        fields: &RcFields,
        current: &[PodLocation],
    ) -> Result<(), ControllerError> {
        let manifest_sha = fields.manifest.sha()?;

        let (mut txn, mut _guard) = Transaction::new();
        for (i, pod) in current.iter().enumerate() {
            if i % SCHEDULES_PER_BATCH == 0 && i > 0 {
                self.commit_plain(&txn).await?;
                (txn, _guard) = Transaction::new();
            }

            let intent = self
                .pod_store
                .pod(PodTree::Intent, &pod.node, &pod.pod_id)
                .await?;
            if let Some(stored) = &intent {
                match stored.sha() {
                    Ok(stored_sha) if stored_sha == manifest_sha => continue,
                    Ok(stored_sha) => {
                        info!(
                            rc_id = %fields.id,
                            node = %pod.node,
                            stored_sha = %stored_sha,
                            "Found inconsistent scheduled manifest"
                        );
                    }
                    Err(err) => {
                        warn!(
                            rc_id = %fields.id,
                            node = %pod.node,
                            error = %err,
                            "Could not hash stored manifest, rewriting intent"
                        );
                    }
                }
            }

            self.pod_store
                .set_pod_txn(&txn, PodTree::Intent, &pod.node, &fields.manifest)?;
        }

        self.commit_plain(&txn).await
    }

    fn schedule(
        &self,
        txn: &mut AuditingTransaction,
        fields: &RcFields,
        node: &NodeName,
    ) -> Result<(), ControllerError> {
        self.schedule_no_audit(txn.txn(), fields, node)?;
        txn.add_node(node.clone());
        Ok(())
    }

    /// Appends the label write and intent write that place the pod on
    /// `node`, without touching any audit node-set.
    pub(crate) fn schedule_no_audit(
        &self,
        txn: &Transaction,
        fields: &RcFields,
        node: &NodeName,
    ) -> Result<(), ControllerError> {
        info!(rc_id = %fields.id, node = %node, "Scheduling pod");

        let label_key = pod_label_key(node, fields.manifest.id());
        self.labeler.set_labels_txn(
            txn,
            LabelType::Pod,
            &label_key,
            computed_pod_labels(fields),
        )?;
        self.pod_store
            .set_pod_txn(txn, PodTree::Intent, node, &fields.manifest)?;
        Ok(())
    }

    pub(crate) async fn unschedule(
        &self,
        txn: &mut AuditingTransaction,
        fields: &RcFields,
        node: &NodeName,
    ) -> Result<(), ControllerError> {
        info!(rc_id = %fields.id, node = %node, "Unscheduling pod");

        self.pod_store
            .delete_pod_txn(txn.txn(), PodTree::Intent, node, fields.manifest.id())?;

        let label_keys: Vec<String> = computed_pod_labels(fields).into_keys().collect();
        let label_key = pod_label_key(node, fields.manifest.id());
        self.labeler
            .remove_labels_txn(txn.txn(), LabelType::Pod, &label_key, &label_keys)
            .await?;

        txn.remove_node(node);
        Ok(())
    }

    pub(crate) async fn commit_audited(
        &self,
        txn: AuditingTransaction,
    ) -> Result<(), ControllerError> {
        match txn.commit(&*self.txner).await? {
            CommitOutcome::Committed(_) => Ok(()),
            CommitOutcome::RolledBack(errors) => Err(TransactionError::Rollback(errors).into()),
        }
    }

    pub(crate) async fn commit_plain(&self, txn: &Transaction) -> Result<(), ControllerError> {
        match txn.commit(&*self.txner).await? {
            CommitOutcome::Committed(_) => Ok(()),
            CommitOutcome::RolledBack(errors) => Err(TransactionError::Rollback(errors).into()),
        }
    }

    /// Sends an alert with full controller context; delivery failures are
    /// logged, never propagated.
    pub(crate) async fn send_alert(&self, fields: &RcFields, description: String) {
        let info = AlertInfo {
            description,
            incident_key: fields.id.to_string(),
            rc_id: fields.id,
            hostname: self.config.hostname.clone(),
            pod_id: fields.manifest.id().clone(),
            node_selector: fields.node_selector.to_string(),
        };
        if let Err(err) = self.alerter.alert(info).await {
            error!(rc_id = %fields.id, error = %err, "Unable to send alert");
        }
    }
}

/// The label map applied to every pod this controller schedules: the
/// user's labels plus the reserved ownership labels.
pub(crate) fn computed_pod_labels(fields: &RcFields) -> BTreeMap<String, String> {
    let mut labels = fields.pod_labels.clone();
    labels.insert(POD_ID_LABEL.to_string(), fields.manifest.id().to_string());
    labels.insert(RC_ID_LABEL.to_string(), fields.id.to_string());
    labels
}

/// Current nodes that are no longer eligible, sorted.
pub(crate) fn check_for_ineligible(
    current: &[PodLocation],
    eligible: &[NodeName],
) -> Vec<NodeName> {
    let eligible: BTreeSet<&NodeName> = eligible.iter().collect();
    current
        .iter()
        .map(|pod| &pod.node)
        .filter(|node| !eligible.contains(*node))
        .cloned()
        .collect()
}
