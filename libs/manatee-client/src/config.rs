// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Client configuration.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ManateeClientError;

/// A parsed ZooKeeper connect string (comma-separated list of
/// host:port pairs).
#[derive(Clone, Debug)]
pub struct ZkConnectString(Vec<SocketAddr>);

impl ZkConnectString {
    /// Parse a connect string like "host1:port1,host2:port2".
    pub fn parse(s: &str) -> Result<Self, ManateeClientError> {
        if s.is_empty() {
            return Err(ManateeClientError::EmptyConnectString);
        }

        let addrs: Result<Vec<SocketAddr>, _> = s
            .split(',')
            .map(|addr| {
                SocketAddr::from_str(addr.trim())
                    .map_err(|_| ManateeClientError::InvalidAddress(addr.to_string()))
            })
            .collect();

        Ok(ZkConnectString(addrs?))
    }
}

impl fmt::Display for ZkConnectString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addrs: Vec<String> = self.0.iter().map(|a| a.to_string()).collect();
        write!(f, "{}", addrs.join(","))
    }
}

impl FromStr for ZkConnectString {
    type Err = ManateeClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Tunables forwarded to the ZooKeeper session.
#[derive(Clone, Debug)]
pub struct ZkOptions {
    pub session_timeout: Duration,
    pub connection_timeout: Duration,
}

impl Default for ZkOptions {
    fn default() -> Self {
        ZkOptions {
            session_timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration for a [`crate::ManateeClient`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// The shard's ZooKeeper path, e.g.
    /// `/manatee/1.moray.coal.example.com`.
    pub path: String,
    /// The ZooKeeper ensemble to connect to.
    pub connect_string: ZkConnectString,
    /// Session tunables.
    pub options: ZkOptions,
}

impl ClientConfig {
    pub fn new(connect_string: ZkConnectString, path: impl Into<String>) -> Self {
        ClientConfig {
            path: path.into(),
            connect_string,
            options: ZkOptions::default(),
        }
    }

    /// The cluster-state node under the shard path.
    pub(crate) fn state_path(&self) -> String {
        format!("{}/state", self.path)
    }

    /// The election directory under the shard path.
    pub(crate) fn election_path(&self) -> String {
        format!("{}/election", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_string_parse() {
        let cs = ZkConnectString::parse("127.0.0.1:2181").unwrap();
        assert_eq!(cs.to_string(), "127.0.0.1:2181");

        let cs = ZkConnectString::parse("10.0.0.1:2181, 10.0.0.2:2181").unwrap();
        assert_eq!(cs.to_string(), "10.0.0.1:2181,10.0.0.2:2181");
    }

    #[test]
    fn test_connect_string_empty() {
        assert!(matches!(
            ZkConnectString::parse(""),
            Err(ManateeClientError::EmptyConnectString)
        ));
    }

    #[test]
    fn test_connect_string_invalid() {
        assert!(matches!(
            ZkConnectString::parse("not-a-valid-address"),
            Err(ManateeClientError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_derived_paths() {
        let config = ClientConfig::new(
            "127.0.0.1:2181".parse().unwrap(),
            "/manatee/1.moray.coal.example.com",
        );
        assert_eq!(config.state_path(), "/manatee/1.moray.coal.example.com/state");
        assert_eq!(
            config.election_path(),
            "/manatee/1.moray.coal.example.com/election"
        );
    }
}
