// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Election node name handling.
//!
//! Manatee peers register under `<shardPath>/election` as ephemeral
//! sequential ZooKeeper nodes. Two legacy-compatible encodings are in
//! use:
//!
//! * `<host>-<seq>`, decoding to `tcp://<host>`
//! * `<host>:<pgPort>:<backupPort>:<hbPort>-<seq>`, decoding to
//!   `tcp://<host>:<pgPort>`
//!
//! The suffix after the last `-` is the ten-digit sequence number
//! ZooKeeper appended at creation; it orders the peers.

/// Decode an election node name into a peer URL.
///
/// Only the portion before the final `-` is decoded. Colon-separated
/// fields past the PostgreSQL port are non-PG ports and are ignored.
pub fn decode_child(name: &str) -> String {
    let prefix = match name.rsplit_once('-') {
        Some((prefix, _seq)) => prefix,
        None => name,
    };
    let mut fields = prefix.split(':');
    let host = fields.next().unwrap_or_default();
    match fields.next() {
        Some(pg_port) => format!("tcp://{}:{}", host, pg_port),
        None => format!("tcp://{}", host),
    }
}

/// Sort election node names ascending by their trailing sequence
/// number.
///
/// The sort is stable. A non-numeric tail is a bug in the producer;
/// such names sort after every well-formed one.
pub fn sort_children(children: &[String]) -> Vec<String> {
    let mut sorted = children.to_vec();
    sorted.sort_by_key(|name| sequence_of(name));
    sorted
}

fn sequence_of(name: &str) -> i64 {
    name.rsplit_once('-')
        .and_then(|(_prefix, seq)| seq.parse().ok())
        .unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use quickcheck::quickcheck;

    use super::*;

    #[test]
    fn test_decode_host_only() {
        assert_eq!(
            decode_child("10.77.77.28-0000000001"),
            "tcp://10.77.77.28"
        );
    }

    #[test]
    fn test_decode_host_and_ports() {
        assert_eq!(
            decode_child("10.77.77.28:5432:12345-0000000042"),
            "tcp://10.77.77.28:5432"
        );
    }

    #[test]
    fn test_decode_extra_port_fields_ignored() {
        assert_eq!(
            decode_child("10.77.77.28:5432:12345:8080-0000000042"),
            "tcp://10.77.77.28:5432"
        );
    }

    #[test]
    fn test_decode_hostname_peer() {
        assert_eq!(
            decode_child("pg0.coal.example.com:5432:12345-0000000007"),
            "tcp://pg0.coal.example.com:5432"
        );
    }

    #[test]
    fn test_sort_by_sequence() {
        let children = vec![
            "10.0.0.3:5432:12345-0000000030".to_string(),
            "10.0.0.1:5432:12345-0000000010".to_string(),
            "10.0.0.2:5432:12345-0000000020".to_string(),
        ];
        let sorted = sort_children(&children);
        assert_eq!(
            sorted,
            vec![
                "10.0.0.1:5432:12345-0000000010".to_string(),
                "10.0.0.2:5432:12345-0000000020".to_string(),
                "10.0.0.3:5432:12345-0000000030".to_string(),
            ]
        );
    }

    #[test]
    fn test_sort_does_not_compare_lexically() {
        // Sequence 9 sorts before sequence 10 even though "10" sorts
        // before "9" as a string.
        let children = vec![
            "a-0000000010".to_string(),
            "b-0000000009".to_string(),
        ];
        let sorted = sort_children(&children);
        assert_eq!(sorted[0], "b-0000000009");
    }

    quickcheck! {
        fn decode_preserves_host_and_pg_port(
            a: u8,
            b: u8,
            c: u8,
            d: u8,
            pg_port: u16,
            seq: u32
        ) -> bool {
            let host = format!("{}.{}.{}.{}", a, b, c, d);
            let name = format!("{}:{}:12345-{:010}", host, pg_port, seq);
            decode_child(&name) == format!("tcp://{}:{}", host, pg_port)
        }

        fn sort_orders_by_sequence(seqs: Vec<u32>) -> bool {
            let children: Vec<String> = seqs
                .iter()
                .map(|seq| format!("10.0.0.1:5432:12345-{:010}", seq))
                .collect();
            let mut expected = seqs;
            expected.sort_unstable();
            sort_children(&children)
                .iter()
                .zip(expected)
                .all(|(name, seq)| name.ends_with(&format!("-{:010}", seq)))
        }
    }
}
