//! Pod labels: the selector predicate, the label-store port, and the
//! KV-backed implementation.
//!
//! Placement is label-driven: every pod the controller schedules gets a
//! label map at the pod label key `<node>/<pod_id>` containing the user's
//! labels plus the two reserved ownership labels. `current_pods` is a label
//! match on [`RC_ID_LABEL`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use herd_id::{NodeName, PodId};
use herd_kv::{KvClient, KvError, KvOp, Transaction, TransactionError};

/// Label applied to every pod owned by a replication controller.
pub const RC_ID_LABEL: &str = "replication_controller_id";

/// Label carrying the pod id of a scheduled pod.
pub const POD_ID_LABEL: &str = "pod_id";

/// Errors from the label store.
#[derive(Debug, Error)]
pub enum LabelError {
    #[error(transparent)]
    Kv(#[from] KvError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("could not encode label map: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("stored label map at '{key}' is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed pod label key '{0}'")]
    BadKey(String),
}

/// Which labeled resource kind an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelType {
    Pod,
    Node,
}

impl LabelType {
    fn tree(self) -> &'static str {
        match self {
            LabelType::Pod => "pod",
            LabelType::Node => "node",
        }
    }
}

/// An equality-based label predicate: matches a label map iff every
/// required `key=value` pair is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    requirements: BTreeMap<String, String>,
}

impl LabelSelector {
    /// The selector matching every label map.
    #[must_use]
    pub fn everything() -> Self {
        Self::default()
    }

    /// Adds an equality requirement.
    #[must_use]
    pub fn require(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements.insert(key.into(), value.into());
        self
    }

    /// True iff every requirement is satisfied by `labels`.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .requirements
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        f.write_str(&rendered.join(","))
    }
}

/// Builds the pod label key for a placement.
#[must_use]
pub fn pod_label_key(node: &NodeName, pod_id: &PodId) -> String {
    format!("{node}/{pod_id}")
}

/// Splits a pod label key back into its node and pod id.
pub fn split_pod_label_key(key: &str) -> Result<(NodeName, PodId), LabelError> {
    let Some((node, pod_id)) = key.split_once('/') else {
        return Err(LabelError::BadKey(key.to_string()));
    };
    let node = NodeName::new(node).map_err(|_| LabelError::BadKey(key.to_string()))?;
    let pod_id = PodId::new(pod_id).map_err(|_| LabelError::BadKey(key.to_string()))?;
    Ok((node, pod_id))
}

/// One labeled resource returned by a selector query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatch {
    /// The label key, e.g. `<node>/<pod_id>` for pods.
    pub key: String,

    pub labels: BTreeMap<String, String>,
}

/// The label-store port.
///
/// Writes are transactional: the `*_txn` methods append ops to the given
/// transaction and take effect only when it commits. Queries are
/// synchronous reads of committed state.
#[async_trait]
pub trait Labeler: Send + Sync {
    /// Appends an op replacing the label map at `key`.
    fn set_labels_txn(
        &self,
        txn: &Transaction,
        typ: LabelType,
        key: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<(), LabelError>;

    /// Appends an op removing the listed labels from the map at `key`.
    /// Labels not listed are preserved; the entry is removed outright only
    /// once no labels remain.
    async fn remove_labels_txn(
        &self,
        txn: &Transaction,
        typ: LabelType,
        key: &str,
        label_keys: &[String],
    ) -> Result<(), LabelError>;

    /// Returns every labeled resource of the given type matching the
    /// selector.
    async fn matches(
        &self,
        selector: &LabelSelector,
        typ: LabelType,
    ) -> Result<Vec<LabelMatch>, LabelError>;
}

/// Label store backed by the key-value store: label maps are JSON values
/// under `labels/<type>/<key>`.
pub struct KvLabeler<C> {
    client: Arc<C>,
}

impl<C> KvLabeler<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    fn storage_key(typ: LabelType, key: &str) -> String {
        format!("labels/{}/{key}", typ.tree())
    }

    fn tree_prefix(typ: LabelType) -> String {
        format!("labels/{}/", typ.tree())
    }
}

#[async_trait]
impl<C: KvClient + 'static> Labeler for KvLabeler<C> {
    fn set_labels_txn(
        &self,
        txn: &Transaction,
        typ: LabelType,
        key: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<(), LabelError> {
        let bytes = serde_json::to_vec(&labels).map_err(LabelError::Encode)?;
        txn.add(KvOp::set(Self::storage_key(typ, key), bytes))?;
        Ok(())
    }

    async fn remove_labels_txn(
        &self,
        txn: &Transaction,
        typ: LabelType,
        key: &str,
        label_keys: &[String],
    ) -> Result<(), LabelError> {
        let storage_key = Self::storage_key(typ, key);

        let mut labels: BTreeMap<String, String> = match self.client.get(&storage_key).await? {
            Some(pair) => {
                serde_json::from_slice(&pair.value).map_err(|source| LabelError::Corrupt {
                    key: storage_key.clone(),
                    source,
                })?
            }
            None => BTreeMap::new(),
        };
        for label_key in label_keys {
            labels.remove(label_key);
        }

        if labels.is_empty() {
            txn.add(KvOp::delete(storage_key))?;
        } else {
            let bytes = serde_json::to_vec(&labels).map_err(LabelError::Encode)?;
            txn.add(KvOp::set(storage_key, bytes))?;
        }
        Ok(())
    }

    async fn matches(
        &self,
        selector: &LabelSelector,
        typ: LabelType,
    ) -> Result<Vec<LabelMatch>, LabelError> {
        let prefix = Self::tree_prefix(typ);
        let pairs = self.client.list(&prefix).await?;

        let mut matches = Vec::new();
        for pair in pairs {
            let labels: BTreeMap<String, String> =
                serde_json::from_slice(&pair.value).map_err(|source| LabelError::Corrupt {
                    key: pair.key.clone(),
                    source,
                })?;
            if selector.matches(&labels) {
                let key = pair
                    .key
                    .strip_prefix(&prefix)
                    .unwrap_or(&pair.key)
                    .to_string();
                matches.push(LabelMatch { key, labels });
            }
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn everything_matches_anything() {
        assert!(LabelSelector::everything().matches(&labels(&[])));
        assert!(LabelSelector::everything().matches(&labels(&[("a", "1")])));
    }

    #[test]
    fn selector_requires_all_pairs() {
        let selector = LabelSelector::everything()
            .require("app", "web")
            .require("env", "prod");

        assert!(selector.matches(&labels(&[("app", "web"), ("env", "prod"), ("x", "y")])));
        assert!(!selector.matches(&labels(&[("app", "web")])));
        assert!(!selector.matches(&labels(&[("app", "web"), ("env", "staging")])));
    }

    #[test]
    fn pod_label_key_roundtrip() {
        let node = NodeName::new("node1.example.com").unwrap();
        let pod_id = PodId::new("web").unwrap();

        let key = pod_label_key(&node, &pod_id);
        assert_eq!(key, "node1.example.com/web");

        let (parsed_node, parsed_pod) = split_pod_label_key(&key).unwrap();
        assert_eq!(parsed_node, node);
        assert_eq!(parsed_pod, pod_id);
    }

    #[test]
    fn split_rejects_keys_without_separator() {
        assert!(matches!(
            split_pod_label_key("no-separator"),
            Err(LabelError::BadKey(_))
        ));
    }

    use herd_kv::MemoryKv;

    async fn seeded_labeler() -> (Arc<MemoryKv>, KvLabeler<MemoryKv>) {
        let kv = Arc::new(MemoryKv::new());
        let labeler = KvLabeler::new(Arc::clone(&kv));

        let (txn, _guard) = Transaction::new();
        labeler
            .set_labels_txn(
                &txn,
                LabelType::Pod,
                "n1/web",
                labels(&[("team", "infra"), ("pod_id", "web"), ("env", "prod")]),
            )
            .unwrap();
        txn.must_commit(kv.as_ref()).await.unwrap();

        (kv, labeler)
    }

    #[tokio::test]
    async fn remove_labels_strips_only_the_listed_keys() {
        let (kv, labeler) = seeded_labeler().await;

        let (txn, _guard) = Transaction::new();
        labeler
            .remove_labels_txn(&txn, LabelType::Pod, "n1/web", &["pod_id".to_string()])
            .await
            .unwrap();
        txn.must_commit(kv.as_ref()).await.unwrap();

        let pair = kv.get("labels/pod/n1/web").await.unwrap().unwrap();
        let stored: BTreeMap<String, String> = serde_json::from_slice(&pair.value).unwrap();
        assert_eq!(stored, labels(&[("team", "infra"), ("env", "prod")]));
    }

    #[tokio::test]
    async fn removing_every_label_deletes_the_entry() {
        let (kv, labeler) = seeded_labeler().await;

        let keys: Vec<String> = ["team", "pod_id", "env"]
            .iter()
            .map(|k| k.to_string())
            .collect();
        let (txn, _guard) = Transaction::new();
        labeler
            .remove_labels_txn(&txn, LabelType::Pod, "n1/web", &keys)
            .await
            .unwrap();
        txn.must_commit(kv.as_ref()).await.unwrap();

        assert!(kv.get("labels/pod/n1/web").await.unwrap().is_none());
    }
}
