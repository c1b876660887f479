// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Manatee primary resolver.
//!
//! Tracks only the replication primary of a Manatee shard and
//! publishes it as [`ResolverEvent::Added`]/[`ResolverEvent::Removed`]
//! pairs keyed by opaque backend keys, the shape connection-pool
//! consumers expect. The resolver is a small lifecycle machine over a
//! [`ManateeClient`]: it restarts the client a second after a failure
//! and tears it down cleanly on [`PrimaryResolver::stop`].

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::{Host, Url};

use manatee_client::{ClientConfig, ManateeClient, ShardEvent};

/// Number of random bytes in a backend key; renders as 12 unpadded
/// base64 characters.
const KEY_LEN: usize = 9;

/// Delay before restarting the underlying client after it fails.
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Opaque identity of one published backend. Fresh for every newly
/// observed primary and never reused, even when the same address
/// recurs across time.
pub type BackendKey = String;

/// The published primary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backend {
    /// Always `"primary"`.
    pub name: String,
    pub address: IpAddr,
    pub port: u16,
}

/// Messages published by the resolver.
#[derive(Clone, Debug)]
pub enum ResolverEvent {
    /// A new primary was observed.
    Added { key: BackendKey, backend: Backend },
    /// A previously published primary is gone. For a primary
    /// transition this always follows the `Added` for the
    /// replacement.
    Removed { key: BackendKey },
}

/// Resolver lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Stopped,
    Starting,
    Running,
    Failed,
    Stopping,
}

struct Inner {
    state: State,
    primary: Option<(BackendKey, Backend)>,
    /// Primary published before a failure, remembered so the removal
    /// notice can follow the post-restart add.
    previous: Option<(BackendKey, Backend)>,
    last_error: Option<String>,
}

/// Resolves the Manatee primary for one shard.
///
/// Create with [`PrimaryResolver::new`], then [`start`] it; events
/// arrive on the receiver returned by `new`. [`stop`] tears down the
/// underlying client and waits for it to release its ZooKeeper
/// handle.
///
/// [`start`]: PrimaryResolver::start
/// [`stop`]: PrimaryResolver::stop
pub struct PrimaryResolver {
    config: ClientConfig,
    inner: Arc<Mutex<Inner>>,
    tx: mpsc::UnboundedSender<ResolverEvent>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl PrimaryResolver {
    pub fn new(config: ClientConfig) -> (Self, mpsc::UnboundedReceiver<ResolverEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let resolver = PrimaryResolver {
            config,
            inner: Arc::new(Mutex::new(Inner {
                state: State::Stopped,
                primary: None,
                previous: None,
                last_error: None,
            })),
            tx,
            cancel: None,
            task: None,
        };
        (resolver, rx)
    }

    /// Begin resolving.
    ///
    /// # Panics
    ///
    /// Calling `start` on a resolver that is not stopped is a
    /// programming error.
    pub fn start(&mut self) {
        {
            let mut inner = lock(&self.inner);
            assert!(
                inner.state == State::Stopped,
                "start() requires a stopped resolver"
            );
            inner.state = State::Starting;
        }
        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());
        self.task = Some(tokio::spawn(run(
            self.config.clone(),
            Arc::clone(&self.inner),
            self.tx.clone(),
            cancel,
        )));
    }

    /// Stop resolving and release the underlying client.
    ///
    /// # Panics
    ///
    /// Calling `stop` on a resolver that is neither running nor failed
    /// is a programming error.
    pub async fn stop(&mut self) {
        {
            let inner = lock(&self.inner);
            assert!(
                matches!(inner.state, State::Running | State::Failed),
                "stop() requires a running or failed resolver"
            );
        }
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Number of currently published backends: zero or one.
    pub fn count(&self) -> usize {
        lock(&self.inner).primary.iter().count()
    }

    /// The currently published backends, keyed by backend key.
    pub fn list(&self) -> HashMap<BackendKey, Backend> {
        lock(&self.inner)
            .primary
            .iter()
            .cloned()
            .collect()
    }

    /// The most recent error observed from the underlying client, if
    /// any.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner).last_error.clone()
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn set_state(inner: &Mutex<Inner>, state: State) {
    let mut guard = lock(inner);
    debug!(from = ?guard.state, to = ?state, "resolver state transition");
    guard.state = state;
}

/// What ended one client's event stream.
enum Outcome {
    Stop,
    Failed,
}

/// The resolver lifecycle task: one [`ManateeClient`] per start cycle,
/// rebuilt after [`RESTART_DELAY`] when a cycle ends in failure.
async fn run(
    config: ClientConfig,
    inner: Arc<Mutex<Inner>>,
    tx: mpsc::UnboundedSender<ResolverEvent>,
    cancel: CancellationToken,
) {
    loop {
        set_state(&inner, State::Starting);
        let (client, mut events) = ManateeClient::new(config.clone());
        let outcome = drive(&inner, &tx, &mut events, &cancel).await;
        match outcome {
            Outcome::Stop => {
                set_state(&inner, State::Stopping);
                // Waits for the client to emit `Close`, so the
                // ZooKeeper handle is released before we report
                // ourselves stopped.
                client.close().await;
                set_state(&inner, State::Stopped);
                return;
            }
            Outcome::Failed => {
                client.close().await;
                if !sleep_unless_cancelled(&cancel, RESTART_DELAY).await {
                    set_state(&inner, State::Stopped);
                    return;
                }
            }
        }
    }
}

/// Consume one client's events until it fails or we are stopped.
async fn drive(
    inner: &Mutex<Inner>,
    tx: &mpsc::UnboundedSender<ResolverEvent>,
    events: &mut mpsc::UnboundedReceiver<ShardEvent>,
    cancel: &CancellationToken,
) -> Outcome {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Outcome::Stop,
            event = events.recv() => match event {
                Some(ShardEvent::Ready) => {
                    info!("manatee client ready");
                    set_state(inner, State::Running);
                }
                Some(ShardEvent::Topology(urls)) => handle_topology(inner, tx, &urls),
                Some(ShardEvent::Error(e)) => {
                    warn!(error = %e, "manatee client failed");
                    let mut guard = lock(inner);
                    guard.last_error = Some(e.to_string());
                    guard.state = State::Failed;
                    // Unpublish, but remember the key for the removal
                    // notice that follows the post-restart add.
                    if let Some(previous) = guard.primary.take() {
                        guard.previous = Some(previous);
                    }
                    return Outcome::Failed;
                }
                Some(ShardEvent::Close) | None => {
                    // The client went away underneath us; treat it
                    // like a failure and restart.
                    warn!("manatee client closed unexpectedly");
                    let mut guard = lock(inner);
                    guard.state = State::Failed;
                    if let Some(previous) = guard.primary.take() {
                        guard.previous = Some(previous);
                    }
                    return Outcome::Failed;
                }
            }
        }
    }
}

/// A topology update while running. The first entry, when present, is
/// the primary: a `tcp://` URL with a literal IP host and a port, per
/// the shard client's contract.
fn handle_topology(
    inner: &Mutex<Inner>,
    tx: &mpsc::UnboundedSender<ResolverEvent>,
    urls: &[String],
) {
    let Some(first) = urls.first() else {
        // The shard is momentarily unowned. Keep publishing the last
        // known primary rather than flapping the pool.
        debug!("topology update with no primary");
        return;
    };
    let backend = match parse_primary(first) {
        Ok(backend) => backend,
        Err(reason) => {
            // Contract violation by the producer.
            error!(url = %first, reason = %reason, "malformed primary URL");
            return;
        }
    };

    let mut guard = lock(inner);
    if guard
        .primary
        .as_ref()
        .is_some_and(|(_, current)| *current == backend)
    {
        return;
    }
    let key = backend_key();
    let previous = guard
        .primary
        .replace((key.clone(), backend.clone()))
        .or_else(|| guard.previous.take());
    drop(guard);

    info!(address = %backend.address, port = backend.port, "new manatee primary");
    let _ = tx.send(ResolverEvent::Added { key, backend });
    if let Some((previous_key, _)) = previous {
        let _ = tx.send(ResolverEvent::Removed { key: previous_key });
    }
}

/// Parse a peer URL into the backend it names. The host must be a
/// literal IPv4 or IPv6 address, never a DNS name: resolution here
/// would race the topology it came from.
fn parse_primary(url: &str) -> Result<Backend, String> {
    let parsed = Url::parse(url).map_err(|e| e.to_string())?;
    if parsed.scheme() != "tcp" {
        return Err(format!("scheme \"{}\" is not tcp", parsed.scheme()));
    }
    let address = match parsed.host() {
        Some(Host::Ipv4(addr)) => IpAddr::V4(addr),
        Some(Host::Ipv6(addr)) => IpAddr::V6(addr),
        // `tcp` is not a special scheme for the URL parser, so IPv4
        // literals surface as domains.
        Some(Host::Domain(domain)) => domain
            .parse::<IpAddr>()
            .map_err(|_| format!("host \"{}\" is not an IP literal", domain))?,
        None => return Err("missing host".to_string()),
    };
    let port = parsed.port().ok_or_else(|| "missing port".to_string())?;
    Ok(Backend {
        name: "primary".to_string(),
        address,
        port,
    })
}

/// Generate a fresh opaque backend key: [`KEY_LEN`] random bytes
/// rendered as unpadded base64.
fn backend_key() -> BackendKey {
    let bytes: [u8; KEY_LEN] = rand::random();
    STANDARD.encode(bytes)
}

async fn sleep_unless_cancelled(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inner() -> Mutex<Inner> {
        Mutex::new(Inner {
            state: State::Running,
            primary: None,
            previous: None,
            last_error: None,
        })
    }

    fn u(host: &str) -> String {
        format!("tcp://{}:5432", host)
    }

    #[test]
    fn test_backend_key_shape() {
        let key = backend_key();
        assert_eq!(key.len(), 12);
        assert!(!key.contains('='));
        assert_ne!(key, backend_key());
    }

    #[test]
    fn test_parse_primary_ipv4() {
        let backend = parse_primary("tcp://1.1.1.1:5432").unwrap();
        assert_eq!(backend.name, "primary");
        assert_eq!(backend.address, "1.1.1.1".parse::<IpAddr>().unwrap());
        assert_eq!(backend.port, 5432);
    }

    #[test]
    fn test_parse_primary_ipv6() {
        let backend = parse_primary("tcp://[2001:db8::1]:5432").unwrap();
        assert_eq!(backend.address, "2001:db8::1".parse::<IpAddr>().unwrap());
        assert_eq!(backend.port, 5432);
    }

    #[test]
    fn test_parse_primary_rejects_dns_name() {
        assert!(parse_primary("tcp://pg0.coal.example.com:5432").is_err());
    }

    #[test]
    fn test_parse_primary_rejects_wrong_scheme() {
        assert!(parse_primary("http://1.1.1.1:5432").is_err());
    }

    #[test]
    fn test_parse_primary_requires_port() {
        assert!(parse_primary("tcp://1.1.1.1").is_err());
    }

    #[test]
    fn test_added_then_removed_on_transition() {
        let inner = inner();
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle_topology(&inner, &tx, &[u("1.1.1.1"), u("2.2.2.2")]);
        let k1 = match rx.try_recv().unwrap() {
            ResolverEvent::Added { key, backend } => {
                assert_eq!(backend.address, "1.1.1.1".parse::<IpAddr>().unwrap());
                assert_eq!(backend.port, 5432);
                key
            }
            other => panic!("expected Added, got {:?}", other),
        };
        assert!(rx.try_recv().is_err());

        handle_topology(&inner, &tx, &[u("9.9.9.9")]);
        let k2 = match rx.try_recv().unwrap() {
            ResolverEvent::Added { key, backend } => {
                assert_eq!(backend.address, "9.9.9.9".parse::<IpAddr>().unwrap());
                key
            }
            other => panic!("expected Added, got {:?}", other),
        };
        // The removal of the old primary follows the add of its
        // replacement.
        match rx.try_recv().unwrap() {
            ResolverEvent::Removed { key } => assert_eq!(key, k1),
            other => panic!("expected Removed, got {:?}", other),
        }
        assert_eq!(k1.len(), 12);
        assert_eq!(k2.len(), 12);
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_unchanged_primary_ignored() {
        let inner = inner();
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle_topology(&inner, &tx, &[u("1.1.1.1")]);
        assert!(matches!(
            rx.try_recv().unwrap(),
            ResolverEvent::Added { .. }
        ));

        // Same primary, different standbys: nothing to publish.
        handle_topology(&inner, &tx, &[u("1.1.1.1"), u("4.4.4.4")]);
        assert!(rx.try_recv().is_err());
        assert_eq!(lock(&inner).primary.iter().count(), 1);
    }

    #[test]
    fn test_empty_topology_keeps_primary() {
        let inner = inner();
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle_topology(&inner, &tx, &[u("1.1.1.1")]);
        assert!(matches!(
            rx.try_recv().unwrap(),
            ResolverEvent::Added { .. }
        ));

        handle_topology(&inner, &tx, &[]);
        assert!(rx.try_recv().is_err());
        assert!(lock(&inner).primary.is_some());
    }

    #[test]
    fn test_malformed_primary_ignored() {
        let inner = inner();
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle_topology(&inner, &tx, &["tcp://not a url".to_string()]);
        assert!(rx.try_recv().is_err());
        assert!(lock(&inner).primary.is_none());
    }

    #[test]
    fn test_removal_spans_a_failure() {
        let inner = inner();
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle_topology(&inner, &tx, &[u("1.1.1.1")]);
        let k1 = match rx.try_recv().unwrap() {
            ResolverEvent::Added { key, .. } => key,
            other => panic!("expected Added, got {:?}", other),
        };

        // Failure entry: unpublish but remember.
        {
            let mut guard = lock(&inner);
            guard.state = State::Failed;
            if let Some(previous) = guard.primary.take() {
                guard.previous = Some(previous);
            }
        }

        // First primary observed after restart gets a fresh key, and
        // the pre-failure key is removed after it is added.
        handle_topology(&inner, &tx, &[u("1.1.1.1")]);
        let k2 = match rx.try_recv().unwrap() {
            ResolverEvent::Added { key, .. } => key,
            other => panic!("expected Added, got {:?}", other),
        };
        assert_ne!(k1, k2);
        match rx.try_recv().unwrap() {
            ResolverEvent::Removed { key } => assert_eq!(key, k1),
            other => panic!("expected Removed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_queries_before_start() {
        let config = ClientConfig::new(
            "127.0.0.1:2181".parse().unwrap(),
            "/manatee/1.moray.coal.example.com",
        );
        let (resolver, _events) = PrimaryResolver::new(config);
        assert_eq!(resolver.count(), 0);
        assert!(resolver.list().is_empty());
        assert!(resolver.last_error().is_none());
    }
}
