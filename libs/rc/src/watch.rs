//! The watch orchestrator.
//!
//! A controller reconciles on every change to its definition record. The
//! definition watcher is a port: it applies updates to the shared record
//! and ticks a channel. `watch_desires` fans the tick channel and the
//! watcher's error channel into one outgoing error channel.

use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::error::ControllerError;
use crate::fields::SharedRcFields;
use crate::reconciler::ReplicationController;

/// The definition-watcher port.
pub trait RcWatcher: Send + Sync {
    /// Starts watching the controller's definition record.
    ///
    /// The watcher applies every observed update to `fields` and then
    /// ticks the change channel; watch failures go to the error channel.
    /// When `quit` fires, the watcher closes both channels.
    fn watch(
        &self,
        fields: SharedRcFields,
        quit: watch::Receiver<bool>,
    ) -> (mpsc::Receiver<()>, mpsc::Receiver<ControllerError>);
}

impl ReplicationController {
    /// Watches the definition record and runs a reconciliation pass on
    /// every change.
    ///
    /// Returns the error channel, which carries both reconciliation
    /// failures and watcher failures. The caller must keep consuming it:
    /// the loop blocks while an unconsumed error is in flight. After
    /// `quit` fires and both upstream channels drain, the returned channel
    /// closes.
    pub fn watch_desires(&self, quit: watch::Receiver<bool>) -> mpsc::Receiver<ControllerError> {
        let (mut changes, mut watcher_errors) = self.watcher.watch(self.fields.clone(), quit);
        let (err_tx, err_rx) = mpsc::channel(self.config.error_channel_capacity);

        let Some(controller) = self.self_handle.upgrade() else {
            return err_rx;
        };
        let meet_tx = err_tx.clone();
        tokio::spawn(async move {
            while changes.recv().await.is_some() {
                if let Err(err) = controller.meet_desires().await {
                    if meet_tx.send(err).await.is_err() {
                        return;
                    }
                }
            }
            debug!("Definition change channel closed");
        });

        tokio::spawn(async move {
            while let Some(err) = watcher_errors.recv().await {
                if err_tx.send(err).await.is_err() {
                    return;
                }
            }
            debug!("Watcher error channel closed");
        });

        // Once both tasks finish, every sender is dropped and the error
        // channel closes.
        err_rx
    }
}
