//! # herd-kv
//!
//! The transactional key-value protocol the controller writes intent
//! through, and a scoped transaction facade over it.
//!
//! The store exposes exactly one write operation: a transaction of at most
//! [`MAX_OPS_PER_TXN`] typed ops that either applies atomically or rolls
//! back. [`Transaction`] buffers ops client-side so the limit surfaces as a
//! local error instead of a remote rollback, and so callers can batch
//! proactively.
//!
//! Backends implement [`Txner`] (transactions only) or [`KvClient`]
//! (transactions plus reads). [`MemoryKv`] is the in-process backend used
//! by tests and development tooling.

mod client;
mod error;
mod memory;
mod op;
mod transaction;

pub use client::{KvClient, KvPair, Txner};
pub use error::KvError;
pub use memory::MemoryKv;
pub use op::{txn_errors_to_string, KvOp, TxnOpError, TxnResponse, TxnResult, Verb, MAX_OPS_PER_TXN};
pub use transaction::{CancelGuard, CommitOutcome, Transaction, TransactionError};
