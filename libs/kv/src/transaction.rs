//! The scoped transaction facade.
//!
//! A [`Transaction`] buffers up to [`MAX_OPS_PER_TXN`] ops and submits them
//! as one atomic call when committed. Handles are scoped: every transaction
//! comes with a [`CancelGuard`] whose drop releases the buffer if commit
//! never happened.
//!
//! Derived handles (see [`Transaction::child`]) share the *same underlying
//! buffer*, not a copy: appends through either handle mutate the shared
//! buffer, both handles observe the same length at all times, and commit is
//! exactly-once on the shared buffer. Cancelling any guard in the scope
//! ends the transaction for every handle.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::warn;

use crate::client::Txner;
use crate::error::KvError;
use crate::op::{txn_errors_to_string, KvOp, TxnOpError, TxnResponse, MAX_OPS_PER_TXN};

/// Fixed delay between transport-error retries in
/// [`Transaction::commit_with_retries`].
const COMMIT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Errors from the transaction facade.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// The buffer already holds the maximum number of operations.
    #[error("transaction already holds {MAX_OPS_PER_TXN} operations")]
    TooManyOperations,

    /// The transaction was already committed.
    #[error("transaction has already been committed")]
    AlreadyCommitted,

    /// The handle's transaction has been cancelled and its buffer released.
    #[error("no transaction: the buffer has been released")]
    NoTransaction,

    /// The store rolled the transaction back. Must not be retried.
    #[error("transaction rolled back: {}", txn_errors_to_string(.0))]
    Rollback(Vec<TxnOpError>),

    /// The store could not be reached.
    #[error("transaction transport failure: {0}")]
    Transport(#[from] KvError),

    /// The scope was cancelled before the commit completed.
    #[error("transaction cancelled before commit completed")]
    Cancelled,
}

/// Result of a commit that reached a decision.
#[derive(Debug)]
pub enum CommitOutcome {
    /// Every op applied.
    Committed(TxnResponse),

    /// The store applied nothing; the op failures are enclosed. Retrying
    /// would fail the same way.
    RolledBack(Vec<TxnOpError>),
}

impl CommitOutcome {
    /// Returns true if the transaction applied.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

#[derive(Debug, Default)]
struct Buffer {
    ops: Vec<KvOp>,
    committed: bool,
    released: bool,
}

impl Buffer {
    fn live(&self) -> Result<(), TransactionError> {
        if self.released {
            return Err(TransactionError::NoTransaction);
        }
        if self.committed {
            return Err(TransactionError::AlreadyCommitted);
        }
        Ok(())
    }
}

/// A scoped handle onto a transaction buffer.
#[derive(Clone)]
pub struct Transaction {
    buffer: Arc<Mutex<Buffer>>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

/// Releases the transaction when dropped (or cancelled explicitly), unless
/// it has already been committed.
pub struct CancelGuard {
    buffer: Arc<Mutex<Buffer>>,
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl CancelGuard {
    /// Cancels the transaction now. Equivalent to dropping the guard.
    pub fn cancel(self) {}
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        {
            let mut buffer = self.buffer.lock();
            if !buffer.committed {
                buffer.released = true;
                buffer.ops.clear();
            }
        }
        let _ = self.cancel_tx.send(true);
    }
}

impl Transaction {
    /// Opens a fresh transaction with an empty buffer.
    #[must_use]
    pub fn new() -> (Self, CancelGuard) {
        let buffer = Arc::new(Mutex::new(Buffer::default()));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel_tx = Arc::new(cancel_tx);
        let guard = CancelGuard {
            buffer: Arc::clone(&buffer),
            cancel_tx: Arc::clone(&cancel_tx),
        };
        (
            Self {
                buffer,
                cancel_tx,
                cancel_rx,
            },
            guard,
        )
    }

    /// Derives a handle sharing this transaction's buffer and cancellation
    /// scope.
    ///
    /// Appends through the child are visible through the parent and vice
    /// versa. Dropping either guard ends the transaction for both handles.
    #[must_use]
    pub fn child(&self) -> (Self, CancelGuard) {
        let guard = CancelGuard {
            buffer: Arc::clone(&self.buffer),
            cancel_tx: Arc::clone(&self.cancel_tx),
        };
        (self.clone(), guard)
    }

    /// Appends one operation to the buffer.
    pub fn add(&self, op: KvOp) -> Result<(), TransactionError> {
        let mut buffer = self.buffer.lock();
        buffer.live()?;
        if buffer.ops.len() >= MAX_OPS_PER_TXN {
            return Err(TransactionError::TooManyOperations);
        }
        buffer.ops.push(op);
        Ok(())
    }

    /// Number of buffered operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.lock().ops.len()
    }

    /// True if no operations are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes the op snapshot and freezes the buffer, failing if the
    /// transaction already ended.
    fn freeze(&self) -> Result<Vec<KvOp>, TransactionError> {
        let mut buffer = self.buffer.lock();
        buffer.live()?;
        buffer.committed = true;
        Ok(buffer.ops.clone())
    }

    /// Commits the buffered operations as one transaction call.
    ///
    /// An empty buffer commits successfully without contacting the store.
    /// Whatever the outcome, the transaction is marked committed and the
    /// buffer frozen; further appends fail.
    pub async fn commit(&self, txner: &dyn Txner) -> Result<CommitOutcome, TransactionError> {
        let ops = self.freeze()?;
        if ops.is_empty() {
            return Ok(CommitOutcome::Committed(TxnResponse::default()));
        }

        let result = txner.txn(ops).await?;
        if result.ok {
            Ok(CommitOutcome::Committed(result.response))
        } else {
            Ok(CommitOutcome::RolledBack(result.response.errors))
        }
    }

    /// Commits and treats a rollback as an error.
    ///
    /// For callers whose ops carry no preconditions that could legitimately
    /// fail.
    pub async fn must_commit(&self, txner: &dyn Txner) -> Result<TxnResponse, TransactionError> {
        match self.commit(txner).await? {
            CommitOutcome::Committed(response) => Ok(response),
            CommitOutcome::RolledBack(errors) => Err(TransactionError::Rollback(errors)),
        }
    }

    /// Commits, retrying transport errors with a fixed back-off.
    ///
    /// Returns immediately on success or rollback. Cancellation of the
    /// scope is the only other exit: the in-flight call (or back-off sleep)
    /// is abandoned and `Cancelled` is returned.
    pub async fn commit_with_retries(
        &self,
        txner: &dyn Txner,
    ) -> Result<CommitOutcome, TransactionError> {
        let ops = self.freeze()?;
        if ops.is_empty() {
            return Ok(CommitOutcome::Committed(TxnResponse::default()));
        }

        let mut cancelled = self.cancel_rx.clone();
        loop {
            if *cancelled.borrow() {
                return Err(TransactionError::Cancelled);
            }

            let attempt = tokio::select! {
                _ = cancelled.changed() => return Err(TransactionError::Cancelled),
                attempt = txner.txn(ops.clone()) => attempt,
            };

            match attempt {
                Ok(result) if result.ok => return Ok(CommitOutcome::Committed(result.response)),
                Ok(result) => return Ok(CommitOutcome::RolledBack(result.response.errors)),
                Err(err) => {
                    warn!(error = %err, "transaction commit failed, will retry");
                    tokio::select! {
                        _ = cancelled.changed() => return Err(TransactionError::Cancelled),
                        () = tokio::time::sleep(COMMIT_RETRY_DELAY) => {}
                    }
                }
            }
        }
    }
}
