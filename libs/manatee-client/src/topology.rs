// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! The Manatee cluster-state document and the topology reducer.

use serde::Deserialize;

use crate::peer;

/// Partial structure of the Manatee cluster-state JSON document stored
/// at `<shardPath>/state`.
///
/// Manatee writes several more fields per peer (`ip`, `id`, `zoneId`,
/// `backupUrl`, ...) and at the top level (`generation`, `initWal`,
/// `deposed`, ...); only the fields that contribute to the published
/// topology are parsed and everything else is ignored.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClusterState {
    pub primary: Option<PeerState>,
    pub sync: Option<PeerState>,
    #[serde(default, rename = "async")]
    pub async_peers: Vec<PeerState>,
}

/// One peer entry in the cluster-state document.
#[derive(Clone, Debug, Deserialize)]
pub struct PeerState {
    #[serde(rename = "pgUrl")]
    pub pg_url: Option<String>,
}

/// Reduce the two ZooKeeper sources of truth to the published peer
/// ordering: primary, then the synchronous standby, then asynchronous
/// standbys in their declared order.
///
/// The cluster-state document wins whenever it is present. The sorted
/// election directory is the fallback ordering source; with neither,
/// the topology is empty.
pub fn reduce(state: Option<&ClusterState>, actives: Option<&[String]>) -> Vec<String> {
    if let Some(state) = state {
        let mut urls = Vec::new();
        if let Some(url) = state.primary.as_ref().and_then(|p| p.pg_url.clone()) {
            urls.push(url);
        }
        if let Some(url) = state.sync.as_ref().and_then(|p| p.pg_url.clone()) {
            urls.push(url);
        }
        for peer in &state.async_peers {
            if let Some(url) = &peer.pg_url {
                urls.push(url.clone());
            }
        }
        urls
    } else if let Some(actives) = actives {
        peer::sort_children(actives)
            .iter()
            .map(|name| peer::decode_child(name))
            .collect()
    } else {
        Vec::new()
    }
}
