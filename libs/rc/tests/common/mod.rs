#![allow(dead_code)]

//! Shared fakes and wiring for controller tests.
//!
//! The store side is real: every test runs against a `MemoryKv` with the
//! KV-backed pod store, label store, and status store on top. Only the
//! collaborators the controller can't own (scheduler, health checker,
//! alerter, definition watcher) are fakes.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use herd_id::{NodeName, PodId, RcId};
use herd_kv::{KvClient, KvOp, MemoryKv, Transaction, Txner};
use herd_manifest::{LaunchableStanza, Manifest};
use herd_rc::alerter::{AlertError, AlertInfo, Alerter};
use herd_rc::health::{HealthChecker, HealthError, HealthResult, HealthStatus};
use herd_rc::scheduler::{Scheduler, SchedulerError};
use herd_rc::status::status_key;
use herd_rc::store::pod_key;
use herd_rc::{
    AllocationStrategy, ControllerConfig, ControllerError, KvLabeler, KvPodStore, KvRcStatusStore,
    LabelSelector, Ports, RcFields, RcStatus, RcWatcher, ReplicationController, SharedRcFields,
};

/// Installs a test-writer tracing subscriber so failures come with the
/// controller's own log lines. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,herd_rc=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn node(name: &str) -> NodeName {
    NodeName::new(name).unwrap()
}

pub fn pod_id(name: &str) -> PodId {
    PodId::new(name).unwrap()
}

pub fn web_manifest() -> Manifest {
    Manifest::new(pod_id("web")).with_launchable(
        "app",
        LaunchableStanza {
            launchable_type: "hoist".to_string(),
            launchable_id: "app".to_string(),
            location: "https://artifacts.example.com/web_abc123.tar.gz".to_string(),
        },
    )
}

pub fn cattle_fields(replicas_desired: usize) -> RcFields {
    RcFields {
        id: RcId::new(),
        manifest: web_manifest(),
        node_selector: LabelSelector::everything(),
        replicas_desired,
        disabled: false,
        pod_labels: BTreeMap::new(),
        allocation_strategy: AllocationStrategy::Cattle,
    }
}

/// Scheduler fake: a mutable eligible set plus a queue of nodes the
/// allocation service would hand out.
#[derive(Default)]
pub struct FakeScheduler {
    eligible: Mutex<Vec<NodeName>>,
    allocatable: Mutex<VecDeque<NodeName>>,
    allocate_calls: AtomicUsize,
    deallocated: Mutex<Vec<NodeName>>,
}

impl FakeScheduler {
    pub fn new(eligible: &[&str]) -> Self {
        let scheduler = Self::default();
        scheduler.set_eligible(eligible);
        scheduler
    }

    pub fn set_eligible(&self, nodes: &[&str]) {
        *self.eligible.lock() = nodes.iter().map(|name| node(name)).collect();
    }

    pub fn queue_allocation(&self, name: &str) {
        self.allocatable.lock().push_back(node(name));
    }

    pub fn allocate_calls(&self) -> usize {
        self.allocate_calls.load(Ordering::SeqCst)
    }

    pub fn deallocated(&self) -> Vec<NodeName> {
        self.deallocated.lock().clone()
    }
}

#[async_trait]
impl Scheduler for FakeScheduler {
    async fn eligible_nodes(
        &self,
        _manifest: &Manifest,
        _selector: &LabelSelector,
    ) -> Result<Vec<NodeName>, SchedulerError> {
        Ok(self.eligible.lock().clone())
    }

    async fn allocate_nodes(
        &self,
        _manifest: &Manifest,
        _selector: &LabelSelector,
        count: usize,
    ) -> Result<Vec<NodeName>, SchedulerError> {
        self.allocate_calls.fetch_add(1, Ordering::SeqCst);

        let mut allocated = Vec::new();
        {
            let mut allocatable = self.allocatable.lock();
            for _ in 0..count {
                match allocatable.pop_front() {
                    Some(name) => allocated.push(name),
                    None => break,
                }
            }
        }

        let mut eligible = self.eligible.lock();
        for name in &allocated {
            if !eligible.contains(name) {
                eligible.push(name.clone());
            }
        }
        Ok(allocated)
    }

    async fn deallocate_nodes(
        &self,
        _selector: &LabelSelector,
        nodes: &[NodeName],
    ) -> Result<(), SchedulerError> {
        self.deallocated.lock().extend(nodes.iter().cloned());
        Ok(())
    }
}

/// Health-checker fake with per-node statuses.
#[derive(Default)]
pub struct FakeHealth {
    statuses: Mutex<BTreeMap<NodeName, HealthStatus>>,
}

impl FakeHealth {
    pub fn set(&self, name: &str, status: HealthStatus) {
        self.statuses.lock().insert(node(name), status);
    }
}

#[async_trait]
impl HealthChecker for FakeHealth {
    async fn service(
        &self,
        _pod_id: &PodId,
    ) -> Result<BTreeMap<NodeName, HealthResult>, HealthError> {
        Ok(self
            .statuses
            .lock()
            .iter()
            .map(|(name, status)| (name.clone(), HealthResult { status: *status }))
            .collect())
    }
}

/// Alerter fake recording everything it is asked to deliver.
#[derive(Default)]
pub struct RecordingAlerter {
    alerts: Mutex<Vec<AlertInfo>>,
}

impl RecordingAlerter {
    pub fn alerts(&self) -> Vec<AlertInfo> {
        self.alerts.lock().clone()
    }
}

#[async_trait]
impl Alerter for RecordingAlerter {
    async fn alert(&self, info: AlertInfo) -> Result<(), AlertError> {
        self.alerts.lock().push(info);
        Ok(())
    }
}

/// Watcher fake whose channels the test owns. `watch` hands out the
/// receivers prepared at construction.
pub struct ChannelWatcher {
    prepared: Mutex<Option<(mpsc::Receiver<()>, mpsc::Receiver<ControllerError>)>>,
}

impl ChannelWatcher {
    pub fn new(
        changes: mpsc::Receiver<()>,
        errors: mpsc::Receiver<ControllerError>,
    ) -> Self {
        Self {
            prepared: Mutex::new(Some((changes, errors))),
        }
    }
}

impl RcWatcher for ChannelWatcher {
    fn watch(
        &self,
        _fields: SharedRcFields,
        _quit: watch::Receiver<bool>,
    ) -> (mpsc::Receiver<()>, mpsc::Receiver<ControllerError>) {
        self.prepared
            .lock()
            .take()
            .expect("watch() called more than once")
    }
}

/// Watcher fake for tests that drive `meet_desires` directly: both
/// channels are born closed.
pub struct IdleWatcher;

impl RcWatcher for IdleWatcher {
    fn watch(
        &self,
        _fields: SharedRcFields,
        _quit: watch::Receiver<bool>,
    ) -> (mpsc::Receiver<()>, mpsc::Receiver<ControllerError>) {
        let (_, changes) = mpsc::channel(1);
        let (_, errors) = mpsc::channel(1);
        (changes, errors)
    }
}

/// A fully wired controller over an in-memory store.
pub struct TestRig {
    pub kv: Arc<MemoryKv>,
    pub scheduler: Arc<FakeScheduler>,
    pub health: Arc<FakeHealth>,
    pub alerter: Arc<RecordingAlerter>,
    pub controller: Arc<ReplicationController>,
}

pub fn rig_with_watcher(
    fields: RcFields,
    eligible: &[&str],
    watcher: Arc<dyn RcWatcher>,
) -> TestRig {
    let kv = Arc::new(MemoryKv::new());
    let scheduler = Arc::new(FakeScheduler::new(eligible));
    let health = Arc::new(FakeHealth::default());
    let alerter = Arc::new(RecordingAlerter::default());

    let ports = Ports {
        txner: kv.clone(),
        pod_store: Arc::new(KvPodStore::new(kv.clone())),
        status_store: Arc::new(KvRcStatusStore::new(kv.clone())),
        scheduler: scheduler.clone(),
        labeler: Arc::new(KvLabeler::new(kv.clone())),
        alerter: alerter.clone(),
        health_checker: health.clone(),
        watcher,
    };

    let config = ControllerConfig {
        hostname: "testhost".to_string(),
        transfer_poll_interval: Duration::from_millis(10),
        error_channel_capacity: 1,
    };

    let controller = ReplicationController::new(fields, config, ports);
    TestRig {
        kv,
        scheduler,
        health,
        alerter,
        controller,
    }
}

pub fn rig(fields: RcFields, eligible: &[&str]) -> TestRig {
    rig_with_watcher(fields, eligible, Arc::new(IdleWatcher))
}

impl TestRig {
    /// The stored intent manifest for a node, if any.
    pub async fn intent_manifest(&self, name: &str) -> Option<Manifest> {
        let key = pod_key(herd_rc::PodTree::Intent, &node(name), &pod_id("web"));
        let pair = self.kv.get(&key).await.unwrap()?;
        Some(Manifest::from_slice(&pair.value).unwrap())
    }

    /// The stored pod label map for a node, if any.
    pub async fn pod_labels(&self, name: &str) -> Option<BTreeMap<String, String>> {
        let key = format!("labels/pod/{}/web", name);
        let pair = self.kv.get(&key).await.unwrap()?;
        Some(serde_json::from_slice(&pair.value).unwrap())
    }

    /// The controller's status record, if any.
    pub async fn status(&self) -> Option<RcStatus> {
        let key = status_key(&self.controller.id());
        let pair = self.kv.get(&key).await.unwrap()?;
        Some(serde_json::from_slice(&pair.value).unwrap())
    }

    /// Simulates the node agent: writes the reality record for a node.
    pub async fn write_reality(&self, name: &str, manifest: &Manifest) {
        let (txn, _guard) = Transaction::new();
        txn.add(KvOp::set(
            pod_key(herd_rc::PodTree::Reality, &node(name), manifest.id()),
            manifest.canonical_bytes().unwrap(),
        ))
        .unwrap();
        txn.must_commit(self.kv.as_ref() as &dyn Txner).await.unwrap();
    }

    /// Sorted node names of the controller's current pods.
    pub async fn current_nodes(&self) -> Vec<String> {
        self.controller
            .current_pods()
            .await
            .unwrap()
            .into_iter()
            .map(|pod| pod.node.to_string())
            .collect()
    }
}

/// Polls until `check` passes or the deadline expires.
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
