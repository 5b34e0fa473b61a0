//! In-memory key-value backend.
//!
//! Serves as the store for tests and development tooling. Implements the
//! same transaction contract as the real store: atomic all-or-nothing
//! apply, per-key modify indexes, compare-and-set against those indexes,
//! and the server-side op limit.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::client::{KvClient, KvPair, Txner};
use crate::error::KvError;
use crate::op::{KvOp, TxnOpError, TxnResult, Verb, MAX_OPS_PER_TXN};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    modify_index: u64,
}

#[derive(Debug, Default)]
struct Inner {
    data: HashMap<String, Entry>,
    next_index: u64,
    committed: Vec<Vec<KvOp>>,
}

/// An in-memory [`KvClient`].
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every op batch that has been committed, in order.
    pub async fn committed_batches(&self) -> Vec<Vec<KvOp>> {
        self.inner.read().await.committed.clone()
    }

    /// Forgets the committed-batch history (the data is untouched).
    pub async fn clear_committed_batches(&self) {
        self.inner.write().await.committed.clear();
    }
}

#[async_trait]
impl Txner for MemoryKv {
    async fn txn(&self, ops: Vec<KvOp>) -> Result<TxnResult, KvError> {
        if ops.len() > MAX_OPS_PER_TXN {
            return Err(KvError::Backend(format!(
                "transaction holds {} operations, limit is {MAX_OPS_PER_TXN}",
                ops.len()
            )));
        }

        let mut inner = self.inner.write().await;

        // Validation pass: nothing is applied if any op fails.
        let mut errors = Vec::new();
        for (op_index, op) in ops.iter().enumerate() {
            match op.verb {
                Verb::Set | Verb::Cas if op.value.is_none() => {
                    errors.push(TxnOpError {
                        op_index,
                        message: format!("{:?} op for '{}' is missing a value", op.verb, op.key),
                    });
                }
                Verb::Cas => {
                    let current = inner
                        .data
                        .get(&op.key)
                        .map(|entry| entry.modify_index)
                        .unwrap_or(0);
                    let expected = op.index.unwrap_or(0);
                    if current != expected {
                        errors.push(TxnOpError {
                            op_index,
                            message: format!(
                                "cas failed for '{}': expected index {expected}, have {current}",
                                op.key
                            ),
                        });
                    }
                }
                Verb::Set | Verb::Delete => {}
            }
        }
        if !errors.is_empty() {
            return Ok(TxnResult::rolled_back(errors));
        }

        for op in &ops {
            match op.verb {
                Verb::Set | Verb::Cas => {
                    inner.next_index += 1;
                    let entry = Entry {
                        value: op.value.clone().unwrap_or_default(),
                        modify_index: inner.next_index,
                    };
                    inner.data.insert(op.key.clone(), entry);
                }
                Verb::Delete => {
                    inner.data.remove(&op.key);
                }
            }
        }
        inner.committed.push(ops);

        Ok(TxnResult::committed())
    }
}

#[async_trait]
impl KvClient for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<KvPair>, KvError> {
        let inner = self.inner.read().await;
        Ok(inner.data.get(key).map(|entry| KvPair {
            key: key.to_string(),
            value: entry.value.clone(),
            modify_index: entry.modify_index,
        }))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>, KvError> {
        let inner = self.inner.read().await;
        let mut pairs: Vec<KvPair> = inner
            .data
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| KvPair {
                key: key.clone(),
                value: entry.value.clone(),
                modify_index: entry.modify_index,
            })
            .collect();
        pairs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let kv = MemoryKv::new();
        let result = kv
            .txn(vec![KvOp::set("a/1", b"one".to_vec())])
            .await
            .unwrap();
        assert!(result.ok);

        let pair = kv.get("a/1").await.unwrap().unwrap();
        assert_eq!(pair.value, b"one");
        assert_eq!(pair.modify_index, 1);

        kv.txn(vec![KvOp::delete("a/1")]).await.unwrap();
        assert!(kv.get("a/1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cas_mismatch_rolls_back_the_whole_batch() {
        let kv = MemoryKv::new();
        kv.txn(vec![KvOp::set("a/1", b"one".to_vec())])
            .await
            .unwrap();

        // Second op's expected index is stale; the first op must not apply.
        let result = kv
            .txn(vec![
                KvOp::set("a/2", b"two".to_vec()),
                KvOp::cas("a/1", b"updated".to_vec(), 99),
            ])
            .await
            .unwrap();
        assert!(!result.ok);
        assert_eq!(result.response.errors.len(), 1);
        assert_eq!(result.response.errors[0].op_index, 1);

        assert!(kv.get("a/2").await.unwrap().is_none());
        assert_eq!(kv.get("a/1").await.unwrap().unwrap().value, b"one");
    }

    #[tokio::test]
    async fn cas_index_zero_means_create_only() {
        let kv = MemoryKv::new();
        let result = kv
            .txn(vec![KvOp::cas("a/1", b"one".to_vec(), 0)])
            .await
            .unwrap();
        assert!(result.ok);

        let result = kv
            .txn(vec![KvOp::cas("a/1", b"clobber".to_vec(), 0)])
            .await
            .unwrap();
        assert!(!result.ok, "create-only cas must fail on an existing key");
    }

    #[tokio::test]
    async fn list_returns_sorted_prefix_matches() {
        let kv = MemoryKv::new();
        kv.txn(vec![
            KvOp::set("b/2", b"x".to_vec()),
            KvOp::set("a/2", b"x".to_vec()),
            KvOp::set("a/1", b"x".to_vec()),
        ])
        .await
        .unwrap();

        let keys: Vec<String> = kv
            .list("a/")
            .await
            .unwrap()
            .into_iter()
            .map(|pair| pair.key)
            .collect();
        assert_eq!(keys, ["a/1", "a/2"]);
    }

    #[tokio::test]
    async fn oversized_batches_are_rejected() {
        let kv = MemoryKv::new();
        let ops: Vec<KvOp> = (0..=MAX_OPS_PER_TXN)
            .map(|i| KvOp::set(format!("k/{i}"), Vec::new()))
            .collect();
        assert!(matches!(kv.txn(ops).await, Err(KvError::Backend(_))));
    }
}
