// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! The Manatee shard client.
//!
//! Owns a ZooKeeper session, watches the shard's cluster-state node
//! and election directory, and publishes the derived peer topology.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zookeeper_client as zk;

use crate::config::ClientConfig;
use crate::error::ManateeClientError;
use crate::topology::{self, ClusterState};
use crate::watcher::{self, NodeView};

/// Events published by a [`ManateeClient`], in emission order.
#[derive(Debug)]
pub enum ShardEvent {
    /// The first watch setup completed. Emitted exactly once per
    /// client lifetime, before any `Topology`, and sticky across
    /// session rebuilds.
    Ready,
    /// The derived peer ordering changed: primary first, then the
    /// synchronous standby if any, then asynchronous standbys in
    /// order. Never repeats the previous emission element-wise.
    Topology(Vec<String>),
    /// The client hit an unrecoverable condition. Construct a new
    /// client to continue observing the shard.
    Error(ManateeClientError),
    /// The client has shut down. Emitted exactly once, last.
    Close,
}

/// Shard-topology discovery client.
///
/// Create with [`ManateeClient::new`], consume [`ShardEvent`]s from the
/// returned receiver, and call [`ManateeClient::close`] to shut down.
/// The ZooKeeper session is established, watched, and rebuilt on
/// expiry in the background.
pub struct ManateeClient {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ManateeClient {
    /// Start a client for the configured shard. Events arrive on the
    /// returned channel in emission order, beginning with
    /// [`ShardEvent::Ready`] once the first watch setup completes.
    pub fn new(config: ClientConfig) -> (Self, mpsc::UnboundedReceiver<ShardEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(session_loop(config, tx, cancel.clone()));
        (
            ManateeClient {
                cancel,
                task: Some(task),
            },
            rx,
        )
    }

    /// Shut down: stop all watch chains, release the ZooKeeper handle,
    /// and emit [`ShardEvent::Close`]. Consuming `self` makes a second
    /// close unrepresentable.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ManateeClient {
    fn drop(&mut self) {
        // Stops the session without a rendezvous. Call `close()` to
        // wait for the `Close` event instead.
        self.cancel.cancel();
    }
}

/// Shard state carried across sessions: the reconciliation inputs, the
/// debounce reference, and the once-latches.
struct ShardState {
    tx: mpsc::UnboundedSender<ShardEvent>,
    inited: bool,
    errored: bool,
    cluster_state: Option<ClusterState>,
    actives: Option<Vec<String>>,
    urls: Vec<String>,
}

impl ShardState {
    fn new(tx: mpsc::UnboundedSender<ShardEvent>) -> Self {
        ShardState {
            tx,
            inited: false,
            errored: false,
            cluster_state: None,
            actives: None,
            urls: Vec::new(),
        }
    }

    fn emit(&self, event: ShardEvent) {
        let _ = self.tx.send(event);
    }

    /// Latch `inited` and publish the sticky `Ready` followed by the
    /// first `Topology`. The event channel buffers both, so consumers
    /// that subscribe at construction observe them in order.
    fn init(&mut self) {
        if self.inited {
            return;
        }
        self.inited = true;
        self.emit(ShardEvent::Ready);
        self.emit(ShardEvent::Topology(self.urls.clone()));
    }

    /// A view of the cluster-state node resolved.
    fn handle_cluster_state(&mut self, view: &NodeView) {
        match &view.data {
            None => {
                if !self.inited {
                    // Absent at startup is a normal state.
                    return;
                }
                debug!("cluster state node removed");
                self.cluster_state = None;
                if self.actives.is_some() {
                    self.update_topology();
                }
            }
            Some(data) => match serde_json::from_slice::<ClusterState>(data) {
                Ok(state) => {
                    self.cluster_state = Some(state);
                    self.update_topology();
                }
                Err(e) => {
                    warn!(error = %e, "unparseable cluster state");
                    if !self.errored {
                        self.errored = true;
                        self.emit(ShardEvent::Error(
                            ManateeClientError::InvalidClusterState,
                        ));
                    }
                }
            },
        }
    }

    /// A view of the election directory resolved.
    fn handle_active(&mut self, view: &NodeView) {
        match &view.children {
            None => {
                self.actives = None;
            }
            Some(children) => {
                self.actives = Some(children.clone());
                // The cluster state wins while it is present; election
                // changes only matter once it is gone.
                if self.cluster_state.is_none() {
                    self.update_topology();
                }
            }
        }
    }

    /// Re-run the reducer and emit the result unless it matches the
    /// previous emission element-wise.
    fn update_topology(&mut self) {
        let urls = topology::reduce(self.cluster_state.as_ref(), self.actives.as_deref());
        if urls == self.urls {
            return;
        }
        debug!(topology = ?urls, "topology changed");
        self.urls = urls;
        if self.inited {
            self.emit(ShardEvent::Topology(self.urls.clone()));
        }
    }
}

/// Exponential backoff for session (re)connect attempts.
struct ExponentialBackoff {
    current: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    fn new() -> Self {
        Self {
            current: Duration::from_millis(100),
            max: Duration::from_secs(60),
        }
    }

    fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = (self.current * 2).min(self.max);
        result
    }

    fn reset(&mut self) {
        self.current = Duration::from_millis(100);
    }
}

async fn session_loop(
    config: ClientConfig,
    tx: mpsc::UnboundedSender<ShardEvent>,
    cancel: CancellationToken,
) {
    let mut shard = ShardState::new(tx);
    let state_path = config.state_path();
    let election_path = config.election_path();
    let connect_string = config.connect_string.to_string();
    let mut backoff = ExponentialBackoff::new();

    'session: while !cancel.is_cancelled() {
        info!(connect_string = %connect_string, path = %config.path, "connecting to ZooKeeper");
        let client = match zk::Client::connector()
            .with_session_timeout(config.options.session_timeout)
            .with_connection_timeout(config.options.connection_timeout)
            .connect(&connect_string)
            .await
        {
            Ok(client) => {
                backoff.reset();
                client
            }
            Err(e) => {
                warn!(error = %e, "failed to connect to ZooKeeper");
                if !watcher::sleep_unless_cancelled(&cancel, backoff.next_backoff()).await {
                    break 'session;
                }
                continue 'session;
            }
        };

        // One watch setup per session: the cluster-state node first,
        // then the election directory. The watchers retry transient
        // errors internally, so reaching `init` means both initial
        // reads resolved.
        let session = cancel.child_token();
        let Some((view, mut state_rx)) =
            watcher::watch(&client, &state_path, session.clone()).await
        else {
            break 'session;
        };
        shard.handle_cluster_state(&view);
        let Some((view, mut election_rx)) =
            watcher::watch(&client, &election_path, session.clone()).await
        else {
            session.cancel();
            break 'session;
        };
        shard.handle_active(&view);
        shard.init();
        info!(path = %config.path, "watching shard");

        let mut session_states = client.state_watcher();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    session.cancel();
                    break 'session;
                }
                Some(view) = state_rx.recv() => shard.handle_cluster_state(&view),
                Some(view) = election_rx.recv() => shard.handle_active(&view),
                state = session_states.changed() => match state {
                    zk::SessionState::Expired | zk::SessionState::Closed => {
                        warn!(state = ?state, "ZooKeeper session lost, rebuilding");
                        session.cancel();
                        continue 'session;
                    }
                    zk::SessionState::AuthFailed => {
                        error!("ZooKeeper authentication failed");
                    }
                    state => {
                        debug!(state = ?state, "ZooKeeper session state changed");
                    }
                },
            }
        }
    }
    shard.emit(ShardEvent::Close);
}
