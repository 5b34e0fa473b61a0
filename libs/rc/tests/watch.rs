//! Watch-orchestrator behavior: reconcile on change ticks, forward both
//! kinds of error, close the outgoing channel after the upstream channels
//! drain.

mod common;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use herd_rc::ControllerError;

use common::{cattle_fields, rig_with_watcher, wait_until, ChannelWatcher};

#[tokio::test]
async fn reconciles_on_every_change_tick() {
    let (changes_tx, changes_rx) = mpsc::channel(4);
    let (_errors_tx, errors_rx) = mpsc::channel(4);
    let watcher = Arc::new(ChannelWatcher::new(changes_rx, errors_rx));

    let rig = rig_with_watcher(cattle_fields(1), &["n1"], watcher);
    let (_quit_tx, quit_rx) = watch::channel(false);
    let _err_rx = rig.controller.watch_desires(quit_rx);

    changes_tx.send(()).await.unwrap();

    wait_until("the change tick to schedule a pod", || async {
        rig.current_nodes().await == ["n1"]
    })
    .await;
}

#[tokio::test]
async fn forwards_reconciliation_errors() {
    let (changes_tx, changes_rx) = mpsc::channel(4);
    let (_errors_tx, errors_rx) = mpsc::channel(4);
    let watcher = Arc::new(ChannelWatcher::new(changes_rx, errors_rx));

    // One replica desired, nowhere to put it.
    let rig = rig_with_watcher(cattle_fields(1), &[], watcher);
    let (_quit_tx, quit_rx) = watch::channel(false);
    let mut err_rx = rig.controller.watch_desires(quit_rx);

    changes_tx.send(()).await.unwrap();

    let err = err_rx.recv().await.expect("expected a pass failure");
    assert!(matches!(err, ControllerError::InsufficientCapacity { .. }));
}

#[tokio::test]
async fn forwards_watcher_errors_unchanged() {
    let (_changes_tx, changes_rx) = mpsc::channel(4);
    let (errors_tx, errors_rx) = mpsc::channel(4);
    let watcher = Arc::new(ChannelWatcher::new(changes_rx, errors_rx));

    let rig = rig_with_watcher(cattle_fields(1), &["n1"], watcher);
    let (_quit_tx, quit_rx) = watch::channel(false);
    let mut err_rx = rig.controller.watch_desires(quit_rx);

    errors_tx
        .send(ControllerError::Watcher("watch flaked".to_string()))
        .await
        .unwrap();

    let err = err_rx.recv().await.expect("expected the watcher error");
    assert!(matches!(err, ControllerError::Watcher(_)));
}

#[tokio::test]
async fn error_channel_closes_after_both_upstreams_drain() {
    let (changes_tx, changes_rx) = mpsc::channel(4);
    let (errors_tx, errors_rx) = mpsc::channel(4);
    let watcher = Arc::new(ChannelWatcher::new(changes_rx, errors_rx));

    let rig = rig_with_watcher(cattle_fields(1), &["n1"], watcher);
    let (_quit_tx, quit_rx) = watch::channel(false);
    let mut err_rx = rig.controller.watch_desires(quit_rx);

    changes_tx.send(()).await.unwrap();

    // The watcher observing quit closes both of its channels.
    drop(changes_tx);
    drop(errors_tx);

    // All remaining work drains, then the channel closes.
    assert!(err_rx.recv().await.is_none());
    assert_eq!(rig.current_nodes().await, ["n1"]);
}
