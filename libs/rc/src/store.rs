//! The pod-intent store port and its KV-backed implementation.
//!
//! Pod manifests live in two subtrees: `intent/` is written by the
//! controller and describes what should run; `reality/` is written by node
//! agents once a pod is actually running. The controller writes intent
//! transactionally and reads both trees.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use herd_id::{NodeName, PodId};
use herd_kv::{KvClient, KvError, KvOp, Transaction, TransactionError};
use herd_manifest::{Manifest, ManifestError};

/// Errors from the pod store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Kv(#[from] KvError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// The two pod subtrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodTree {
    /// What should run; written by the controller.
    Intent,

    /// What is actually running; written by node agents.
    Reality,
}

impl PodTree {
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            PodTree::Intent => "intent",
            PodTree::Reality => "reality",
        }
    }
}

/// Builds the storage key for a pod record.
#[must_use]
pub fn pod_key(tree: PodTree, node: &NodeName, pod_id: &PodId) -> String {
    format!("{}/{node}/{pod_id}", tree.prefix())
}

/// The pod-store port.
#[async_trait]
pub trait PodStore: Send + Sync {
    /// Appends an op writing the pod's manifest under the tree.
    fn set_pod_txn(
        &self,
        txn: &Transaction,
        tree: PodTree,
        node: &NodeName,
        manifest: &Manifest,
    ) -> Result<(), StoreError>;

    /// Appends an op deleting the pod record under the tree.
    fn delete_pod_txn(
        &self,
        txn: &Transaction,
        tree: PodTree,
        node: &NodeName,
        pod_id: &PodId,
    ) -> Result<(), StoreError>;

    /// Reads the stored manifest for a pod, or `None` when no record
    /// exists.
    async fn pod(
        &self,
        tree: PodTree,
        node: &NodeName,
        pod_id: &PodId,
    ) -> Result<Option<Manifest>, StoreError>;
}

/// Pod store backed by the key-value store.
pub struct KvPodStore<C> {
    client: Arc<C>,
}

impl<C> KvPodStore<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: KvClient + 'static> PodStore for KvPodStore<C> {
    fn set_pod_txn(
        &self,
        txn: &Transaction,
        tree: PodTree,
        node: &NodeName,
        manifest: &Manifest,
    ) -> Result<(), StoreError> {
        let bytes = manifest.canonical_bytes()?;
        txn.add(KvOp::set(pod_key(tree, node, manifest.id()), bytes))?;
        Ok(())
    }

    fn delete_pod_txn(
        &self,
        txn: &Transaction,
        tree: PodTree,
        node: &NodeName,
        pod_id: &PodId,
    ) -> Result<(), StoreError> {
        txn.add(KvOp::delete(pod_key(tree, node, pod_id)))?;
        Ok(())
    }

    async fn pod(
        &self,
        tree: PodTree,
        node: &NodeName,
        pod_id: &PodId,
    ) -> Result<Option<Manifest>, StoreError> {
        let key = pod_key(tree, node, pod_id);
        match self.client.get(&key).await? {
            Some(pair) => Ok(Some(Manifest::from_slice(&pair.value)?)),
            None => Ok(None),
        }
    }
}
