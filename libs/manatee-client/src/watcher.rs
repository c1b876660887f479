// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Live view of a single ZooKeeper node.
//!
//! ZooKeeper watches are one-shot: a watch fires at most once and must
//! be re-armed by a fresh read. [`watch`] chains those one-shot reads
//! into a continuous view of one node (its data, data version, and
//! children) for a node whose existence itself may fluctuate. The
//! initial snapshot resolves before any change is delivered, and every
//! resolved read after it is delivered.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use zookeeper_client as zk;

/// Delay before retrying a ZooKeeper read that failed with anything
/// other than `NoNode`.
pub(crate) const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Point-in-time view of one ZooKeeper node. All fields `None` means
/// the node does not exist.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeView {
    /// Node contents, or `None` if the node does not exist.
    pub data: Option<Vec<u8>>,
    /// Data version from the node's stat.
    pub version: Option<i32>,
    /// Child node names, unordered, or `None` if the node does not
    /// exist.
    pub children: Option<Vec<String>>,
}

/// View state shared by the data and children chains.
struct Shared {
    view: Mutex<NodeView>,
    tx: mpsc::UnboundedSender<NodeView>,
}

impl Shared {
    /// Apply `f` without delivering, for seeding the initial snapshot.
    fn mutate(&self, f: impl FnOnce(&mut NodeView)) {
        let mut view = self.view.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut view);
    }

    /// Apply `f` and deliver the updated view.
    fn update(&self, f: impl FnOnce(&mut NodeView)) {
        let view = {
            let mut view = self.view.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut view);
            view.clone()
        };
        let _ = self.tx.send(view);
    }

    fn version(&self) -> Option<i32> {
        self.view
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .version
    }

    fn snapshot(&self) -> NodeView {
        self.view
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Begin watching `path`.
///
/// Resolves the initial [`NodeView`] snapshot, including the initial
/// children read when the node exists, before any change is delivered
/// on the returned channel. Transient read errors during the snapshot
/// are retried every [`RETRY_DELAY`]; an absent node is a normal state,
/// not an error. Returns `None` only if `cancel` fires before the
/// snapshot resolves.
pub async fn watch(
    client: &zk::Client,
    path: &str,
    cancel: CancellationToken,
) -> Option<(NodeView, mpsc::UnboundedReceiver<NodeView>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        view: Mutex::new(NodeView::default()),
        tx,
    });

    // Initial data read. This decides whether the node exists and
    // leaves a one-shot watch armed either way.
    let mut exists = false;
    let pending = loop {
        if cancel.is_cancelled() {
            return None;
        }
        match client.get_and_watch_data(path).await {
            Ok((data, stat, watcher)) => {
                shared.mutate(|view| {
                    view.data = Some(data);
                    view.version = Some(stat.version);
                });
                exists = true;
                break watcher;
            }
            Err(zk::Error::NoNode) => {
                // The node is absent; arm an existence watch so its
                // creation wakes the data chain.
                match client.check_and_watch_stat(path).await {
                    Ok((None, watcher)) => break watcher,
                    Ok((Some(_), watcher)) => {
                        // Created between the two calls. Read the data
                        // without arming another watch; the existence
                        // watch just installed fires on the next change.
                        match client.get_data(path).await {
                            Ok((data, stat)) => {
                                shared.mutate(|view| {
                                    view.data = Some(data);
                                    view.version = Some(stat.version);
                                });
                                exists = true;
                                break watcher;
                            }
                            // Gone again; the existence watch reports it.
                            Err(zk::Error::NoNode) => break watcher,
                            Err(e) => {
                                warn!(path = %path, error = %e, "initial data read failed, retrying");
                                if !sleep_unless_cancelled(&cancel, RETRY_DELAY).await {
                                    return None;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(path = %path, error = %e, "existence check failed, retrying");
                        if !sleep_unless_cancelled(&cancel, RETRY_DELAY).await {
                            return None;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(path = %path, error = %e, "initial data read failed, retrying");
                if !sleep_unless_cancelled(&cancel, RETRY_DELAY).await {
                    return None;
                }
            }
        }
    };

    // Initial children read, only when the node exists. Its one-shot
    // children watch seeds the children chain.
    let mut children_watch = None;
    if exists {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            match client.get_and_watch_children(path).await {
                Ok((children, _stat, watcher)) => {
                    shared.mutate(|view| view.children = Some(children));
                    children_watch = Some(watcher);
                    break;
                }
                Err(zk::Error::NoNode) => {
                    // Deleted again already; the pending data watch
                    // fires and the data chain takes it from there.
                    break;
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "initial children read failed, retrying");
                    if !sleep_unless_cancelled(&cancel, RETRY_DELAY).await {
                        return None;
                    }
                }
            }
        }
    }

    let snapshot = shared.snapshot();
    let mut children = ChildrenChain {
        client: client.clone(),
        path: path.to_string(),
        shared: Arc::clone(&shared),
        parent: cancel.clone(),
        current: None,
    };
    if let Some(watcher) = children_watch {
        children.start(Some(watcher));
    }
    tokio::spawn(data_chain(
        client.clone(),
        path.to_string(),
        shared,
        cancel,
        pending,
        children,
    ));
    Some((snapshot, rx))
}

/// The data chain: each one-shot watch firing re-enters the read,
/// which re-arms the next watch. Node absence switches the chain onto
/// an existence watch, and an absent-to-present transition re-seeds
/// the children chain, whose watches do not survive node deletion.
async fn data_chain(
    client: zk::Client,
    path: String,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    first: zk::OneshotWatcher,
    mut children: ChildrenChain,
) {
    let mut pending = Some(first);
    loop {
        if let Some(watcher) = pending.take() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = watcher.changed() => {
                    debug!(path = %path, event_type = ?event.event_type, "data watch fired");
                }
            }
        }
        if cancel.is_cancelled() {
            return;
        }
        match client.get_and_watch_data(&path).await {
            Ok((data, stat, watcher)) => {
                let created = shared.version().is_none();
                shared.update(|view| {
                    view.data = Some(data);
                    view.version = Some(stat.version);
                });
                if created {
                    children.start(None);
                }
                pending = Some(watcher);
            }
            Err(zk::Error::NoNode) => {
                shared.update(|view| {
                    view.data = None;
                    view.version = None;
                    view.children = None;
                });
                match client.check_and_watch_stat(&path).await {
                    Ok((stat, watcher)) => {
                        // Recreated between the two reads? Repair the
                        // missed update without arming another watch;
                        // the existence watch just installed still
                        // fires.
                        if stat.is_some() {
                            match client.get_data(&path).await {
                                Ok((data, stat)) => {
                                    shared.update(|view| {
                                        view.data = Some(data);
                                        view.version = Some(stat.version);
                                    });
                                    children.start(None);
                                }
                                Err(zk::Error::NoNode) => {
                                    // Gone again; the existence watch
                                    // reports it.
                                }
                                Err(e) => {
                                    warn!(path = %path, error = %e, "data read failed, retrying");
                                    if !sleep_unless_cancelled(&cancel, RETRY_DELAY).await {
                                        return;
                                    }
                                    continue;
                                }
                            }
                        }
                        pending = Some(watcher);
                    }
                    Err(e) => {
                        warn!(path = %path, error = %e, "existence check failed, retrying");
                        if !sleep_unless_cancelled(&cancel, RETRY_DELAY).await {
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(path = %path, error = %e, "data read failed, retrying");
                if !sleep_unless_cancelled(&cancel, RETRY_DELAY).await {
                    return;
                }
            }
        }
    }
}

/// Handle for (re)starting the children chain. Only the data chain
/// touches this, so restarts never race each other.
struct ChildrenChain {
    client: zk::Client,
    path: String,
    shared: Arc<Shared>,
    parent: CancellationToken,
    current: Option<CancellationToken>,
}

impl ChildrenChain {
    /// Stop any previous incarnation and start a fresh chain,
    /// optionally resuming from an already-armed children watch.
    fn start(&mut self, watcher: Option<zk::OneshotWatcher>) {
        if let Some(token) = self.current.take() {
            token.cancel();
        }
        let token = self.parent.child_token();
        self.current = Some(token.clone());
        tokio::spawn(children_chain(
            self.client.clone(),
            self.path.clone(),
            Arc::clone(&self.shared),
            token,
            watcher,
        ));
    }
}

/// The children chain: each one-shot children watch firing re-enters
/// the read. The chain ends itself on node deletion and is re-seeded
/// by the data chain when the node reappears.
async fn children_chain(
    client: zk::Client,
    path: String,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    mut pending: Option<zk::OneshotWatcher>,
) {
    loop {
        if let Some(watcher) = pending.take() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = watcher.changed() => {
                    debug!(path = %path, event_type = ?event.event_type, "children watch fired");
                }
            }
        }
        if cancel.is_cancelled() {
            return;
        }
        match client.get_and_watch_children(&path).await {
            Ok((children, _stat, watcher)) => {
                shared.update(|view| view.children = Some(children));
                pending = Some(watcher);
            }
            Err(zk::Error::NoNode) => return,
            Err(e) => {
                warn!(path = %path, error = %e, "children read failed, retrying");
                if !sleep_unless_cancelled(&cancel, RETRY_DELAY).await {
                    return;
                }
            }
        }
    }
}

/// Sleep for `delay`, returning `false` if cancelled first.
pub(crate) async fn sleep_unless_cancelled(
    cancel: &CancellationToken,
    delay: Duration,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_absent_by_default() {
        let view = NodeView::default();
        assert!(view.data.is_none());
        assert!(view.version.is_none());
        assert!(view.children.is_none());
    }

    #[test]
    fn test_shared_update_delivers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shared = Shared {
            view: Mutex::new(NodeView::default()),
            tx,
        };
        shared.mutate(|view| view.version = Some(0));
        // Seeding must not deliver.
        assert!(rx.try_recv().is_err());

        shared.update(|view| view.data = Some(b"x".to_vec()));
        let view = rx.try_recv().unwrap();
        assert_eq!(view.data.as_deref(), Some(b"x".as_ref()));
        assert_eq!(view.version, Some(0));
    }
}
