// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Shard-topology discovery for Manatee-managed PostgreSQL replication
//! sets.
//!
//! A Manatee shard advertises itself in ZooKeeper twice over: an
//! explicit cluster-state document at `<shardPath>/state` and an
//! ephemeral-sequential election directory at `<shardPath>/election`.
//! [`ManateeClient`] watches both, reconciles them (the cluster state
//! wins whenever it is present; the sorted election directory is the
//! fallback), and publishes the ordered peer list (primary,
//! synchronous standby, asynchronous standbys) as
//! [`ShardEvent::Topology`] whenever the derived ordering actually
//! changes.
//!
//! # Example
//!
//! ```ignore
//! use manatee_client::{ClientConfig, ManateeClient, ShardEvent};
//!
//! let config = ClientConfig::new(
//!     "10.0.0.1:2181,10.0.0.2:2181".parse()?,
//!     "/manatee/1.moray.coal.example.com",
//! );
//! let (client, mut events) = ManateeClient::new(config);
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ShardEvent::Topology(urls) => println!("peers: {:?}", urls),
//!         ShardEvent::Error(e) => break,
//!         _ => {}
//!     }
//! }
//! client.close().await;
//! ```

pub mod config;
pub mod error;
pub mod peer;
pub mod topology;
pub mod watcher;

mod client;

pub use client::{ManateeClient, ShardEvent};
pub use config::{ClientConfig, ZkConnectString, ZkOptions};
pub use error::ManateeClientError;
pub use topology::{ClusterState, PeerState};
pub use watcher::NodeView;
