//! The node-transfer engine.
//!
//! When a cattle workload holds a node that has silently become
//! ineligible, the controller moves the pod: it allocates a replacement,
//! writes the replacement's intent *without* the ownership label (so
//! placement accounting does not count it yet), waits for the node agent
//! to report the pod real and the health checker to report it passing, and
//! then finalizes in one audited transaction.
//!
//! The in-flight transfer is persisted as the controller's status record,
//! created with a compare-and-set so at most one transfer exists per
//! controller. Each step is resumable: if any step fails, the next
//! reconciliation tick picks the transfer up where it stopped.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use herd_id::NodeName;
use herd_kv::Transaction;

use crate::audit::AuditingTransaction;
use crate::error::ControllerError;
use crate::fields::{AllocationStrategy, RcFields};
use crate::health::HealthStatus;
use crate::labels::{pod_label_key, LabelType};
use crate::placement::current_pods;
use crate::reconciler::{computed_pod_labels, ReplicationController};
use crate::status::{NodeTransfer, RcStatus};
use crate::store::PodTree;

/// The background task waiting for a replacement node to become ready.
pub(crate) struct TransferWaiter {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReplicationController {
    /// Entry point from the reconciler: some current nodes are no longer
    /// eligible.
    pub(crate) async fn transfer_nodes(
        &self,
        fields: &RcFields,
        ineligible: Vec<NodeName>,
    ) -> Result<(), ControllerError> {
        let expected_index = match self.status_store.get(&fields.id).await? {
            Some((status, index)) => {
                if let Some(transfer) = status.node_transfer {
                    info!(
                        rc_id = %fields.id,
                        old_node = %transfer.old_node,
                        new_node = %transfer.new_node,
                        "Node transfer already in progress"
                    );
                    self.ensure_waiter(transfer);
                    return Ok(());
                }
                index
            }
            None => 0,
        };

        if fields.allocation_strategy != AllocationStrategy::Cattle {
            let err = ControllerError::PinnedIneligible { nodes: ineligible };
            self.send_alert(fields, err.to_string()).await;
            return Err(err);
        }

        let transfer = self
            .allocate_replacement(fields, &ineligible, expected_index)
            .await?;
        self.schedule_without_label(fields, &transfer.new_node)
            .await?;
        self.ensure_waiter(transfer);
        Ok(())
    }

    /// Releases the old node's reservation, allocates a replacement, and
    /// persists the transfer with a compare-and-set on the status record.
    async fn allocate_replacement(
        &self,
        fields: &RcFields,
        ineligible: &[NodeName],
        expected_index: u64,
    ) -> Result<NodeTransfer, ControllerError> {
        // One transfer at a time; `ineligible` is sorted.
        let Some(old_node) = ineligible.first().cloned() else {
            return Err(ControllerError::AllocationFailed {
                reason: "no ineligible node to transfer from".to_string(),
            });
        };

        if let Err(err) = self
            .scheduler
            .deallocate_nodes(&fields.node_selector, std::slice::from_ref(&old_node))
            .await
        {
            warn!(rc_id = %fields.id, node = %old_node, error = %err, "Could not deallocate old node");
            return Err(err.into());
        }

        let allocated = match self
            .scheduler
            .allocate_nodes(&fields.manifest, &fields.node_selector, 1)
            .await
        {
            Ok(nodes) => nodes,
            Err(err) => {
                let failure = ControllerError::AllocationFailed {
                    reason: err.to_string(),
                };
                self.send_alert(fields, failure.to_string()).await;
                return Err(failure);
            }
        };
        let Some(new_node) = allocated.into_iter().next() else {
            let failure = ControllerError::AllocationFailed {
                reason: "requested 1 replacement node, received 0".to_string(),
            };
            self.send_alert(fields, failure.to_string()).await;
            return Err(failure);
        };

        let transfer = NodeTransfer { old_node, new_node };
        info!(
            rc_id = %fields.id,
            old_node = %transfer.old_node,
            new_node = %transfer.new_node,
            "Beginning node transfer"
        );

        let status = RcStatus {
            node_transfer: Some(transfer.clone()),
        };
        let (txn, _guard) = Transaction::new();
        self.status_store
            .cas_txn(&txn, &fields.id, expected_index, &status)?;
        // A CAS race surfaces as a rollback; the next tick observes
        // whichever transfer won and retries.
        txn.must_commit(&*self.txner).await?;

        Ok(transfer)
    }

    /// Writes the replacement's intent without the ownership label, so the
    /// replacement is invisible to placement accounting until finalize.
    async fn schedule_without_label(
        &self,
        fields: &RcFields,
        new_node: &NodeName,
    ) -> Result<(), ControllerError> {
        info!(rc_id = %fields.id, node = %new_node, "Scheduling replacement pod without ownership label");

        let (txn, _guard) = Transaction::new();
        self.pod_store
            .set_pod_txn(&txn, PodTree::Intent, new_node, &fields.manifest)?;
        self.commit_plain(&txn).await
    }

    /// Spawns the waiter task unless one is already running.
    pub(crate) fn ensure_waiter(&self, transfer: NodeTransfer) {
        let Some(controller) = self.self_handle.upgrade() else {
            return;
        };

        let mut slot = self.transfer.lock();
        if let Some(waiter) = slot.as_ref() {
            if !waiter.task.is_finished() {
                return;
            }
        }

        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            controller.run_transfer_waiter(transfer, stop_rx).await;
        });
        *slot = Some(TransferWaiter { stop, task });
    }

    /// Polls until the replacement is real and healthy, then finalizes.
    async fn run_transfer_waiter(
        self: Arc<Self>,
        transfer: NodeTransfer,
        mut stop: watch::Receiver<bool>,
    ) {
        let poll = self.config.transfer_poll_interval;
        info!(
            new_node = %transfer.new_node,
            "Waiting for replacement node to become real and healthy"
        );

        loop {
            let fields = self.fields.snapshot();
            if fields.disabled || fields.replicas_desired == 0 {
                info!(rc_id = %fields.id, "Abandoning node transfer wait");
                return;
            }

            match self.transfer_ready(&fields, &transfer).await {
                Ok(true) => break,
                Ok(false) => {}
                Err(err) => {
                    warn!(rc_id = %fields.id, error = %err, "Transfer readiness check failed");
                }
            }

            tokio::select! {
                _ = stop.changed() => return,
                () = tokio::time::sleep(poll) => {}
            }
        }

        if let Err(err) = self.finalize_transfer(&transfer).await {
            // The status record still holds the transfer; the next
            // reconciliation tick retries finalization.
            error!(
                old_node = %transfer.old_node,
                new_node = %transfer.new_node,
                error = %err,
                "Could not finalize node transfer"
            );
        }
    }

    /// True once the node agent has written the reality record and the
    /// health checker reports the replacement passing.
    async fn transfer_ready(
        &self,
        fields: &RcFields,
        transfer: &NodeTransfer,
    ) -> Result<bool, ControllerError> {
        let pod_id = fields.manifest.id();

        let reality = self
            .pod_store
            .pod(PodTree::Reality, &transfer.new_node, pod_id)
            .await?;
        if reality.is_none() {
            return Ok(false);
        }

        let health = self.health_checker.service(pod_id).await?;
        Ok(health
            .get(&transfer.new_node)
            .map_or(false, |result| result.status == HealthStatus::Passing))
    }

    /// One audited transaction: label the replacement, unschedule the old
    /// node, clear the transfer record.
    async fn finalize_transfer(&self, transfer: &NodeTransfer) -> Result<(), ControllerError> {
        let fields = self.fields.snapshot();
        let current = current_pods(fields.id, &*self.labeler).await?;

        let mut txn = AuditingTransaction::new(fields.id, current.into_iter().map(|pod| pod.node));

        let label_key = pod_label_key(&transfer.new_node, fields.manifest.id());
        self.labeler.set_labels_txn(
            txn.txn(),
            LabelType::Pod,
            &label_key,
            computed_pod_labels(&fields),
        )?;
        txn.add_node(transfer.new_node.clone());

        self.unschedule(&mut txn, &fields, &transfer.old_node)
            .await?;
        self.status_store.clear_txn(txn.txn(), &fields.id)?;

        self.commit_audited(txn).await?;
        info!(
            rc_id = %fields.id,
            old_node = %transfer.old_node,
            new_node = %transfer.new_node,
            "Node transfer complete"
        );
        Ok(())
    }

    /// Stops the waiter and rolls back an interrupted transfer: the
    /// label-less replacement intent is deleted and the transfer record
    /// cleared in one transaction. Called when the controller is disabled.
    pub(crate) async fn cancel_node_transfer(
        &self,
        fields: &RcFields,
    ) -> Result<(), ControllerError> {
        if let Some(waiter) = self.transfer.lock().take() {
            let _ = waiter.stop.send(true);
        }

        let Some((status, _)) = self.status_store.get(&fields.id).await? else {
            return Ok(());
        };
        let Some(transfer) = status.node_transfer else {
            return Ok(());
        };

        info!(
            rc_id = %fields.id,
            new_node = %transfer.new_node,
            "Rolling back interrupted node transfer"
        );

        let (txn, _guard) = Transaction::new();
        self.pod_store.delete_pod_txn(
            &txn,
            PodTree::Intent,
            &transfer.new_node,
            fields.manifest.id(),
        )?;
        self.status_store.clear_txn(&txn, &fields.id)?;
        txn.must_commit(&*self.txner).await?;
        Ok(())
    }
}
