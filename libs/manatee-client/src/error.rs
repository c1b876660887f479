// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

use thiserror::Error;
use zookeeper_client as zk;

/// Errors surfaced by the Manatee client API and its `Error` event.
#[derive(Debug, Error)]
pub enum ManateeClientError {
    #[error("Empty ZooKeeper connect string")]
    EmptyConnectString,

    #[error("Invalid ZooKeeper address: {0}")]
    InvalidAddress(String),

    #[error("ZooKeeper error: {0}")]
    ZooKeeper(#[from] zk::Error),

    /// The cluster-state node held bytes that did not parse as a
    /// Manatee cluster-state document. Unrecoverable for this client
    /// instance; construct a new client to continue.
    #[error("error parsing manatee cluster state")]
    InvalidClusterState,
}
