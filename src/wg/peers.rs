//! Peer view builder
//!
//! Turns a raw dump into [`PeerRecord`]s and, as a separate step, merges
//! them with stored metadata into [`EnrichedPeer`]s.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::Serialize;

use super::DumpSnapshot;
use crate::store::PeerMetadata;

/// Label shown for the bootstrap admin peer when none is stored
pub const ADMIN_BOOTSTRAP_LABEL: &str = "admin-bootstrap";

// Column positions of a peer row in `wg show all dump`
const COL_INTERFACE: usize = 0;
const COL_PUBLIC_KEY: usize = 1;
const COL_ENDPOINT: usize = 3;
const COL_ALLOWED_IPS: usize = 4;
const COL_HANDSHAKE: usize = 5;
const COL_RX: usize = 6;
const COL_TX: usize = 7;
const MIN_PEER_COLUMNS: usize = 6;

/// One peer as reported by the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerRecord {
    pub interface: String,
    pub public_key: String,
    pub endpoint: Option<String>,
    pub allowed_ips: String,
    /// Unix time of the last handshake, 0 if never
    pub last_handshake_epoch: i64,
    pub handshake_age_seconds: Option<i64>,
    pub handshake_age_human: Option<String>,
    pub is_active: bool,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

impl PeerRecord {
    /// Address part of the first allowed-IP entry
    pub fn primary_ip(&self) -> &str {
        let first = self.allowed_ips.split(',').next().unwrap_or("");
        first.split('/').next().unwrap_or("").trim()
    }

    /// Address parts of every allowed-IP entry
    pub fn assigned_ips(&self) -> impl Iterator<Item = &str> {
        self.allowed_ips
            .split(',')
            .filter_map(|entry| entry.split('/').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    }
}

/// Parse every peer row of a dump.
///
/// The first line describes the interface and is ignored; rows with fewer
/// than six columns are skipped. An unparsable handshake counts as "never".
pub fn parse_dump(text: &str, now: i64, threshold_secs: u64) -> Vec<PeerRecord> {
    text.trim()
        .lines()
        .skip(1)
        .filter_map(|line| parse_row(line, now, threshold_secs))
        .collect()
}

fn parse_row(line: &str, now: i64, threshold_secs: u64) -> Option<PeerRecord> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < MIN_PEER_COLUMNS {
        return None;
    }

    let last_handshake: i64 = parts[COL_HANDSHAKE].parse().unwrap_or(0);
    let (age, is_active) = if last_handshake == 0 {
        (None, false)
    } else {
        let age = now - last_handshake;
        (Some(age.max(0)), age < threshold_secs as i64)
    };

    let endpoint = match parts[COL_ENDPOINT] {
        "(none)" => None,
        ep => Some(ep.to_string()),
    };
    let counter = |col: usize| parts.get(col).and_then(|v| v.parse().ok()).unwrap_or(0);

    Some(PeerRecord {
        interface: parts[COL_INTERFACE].to_string(),
        public_key: parts[COL_PUBLIC_KEY].to_string(),
        endpoint,
        allowed_ips: parts[COL_ALLOWED_IPS].to_string(),
        last_handshake_epoch: last_handshake,
        handshake_age_seconds: age,
        handshake_age_human: age.map(format_age),
        is_active,
        rx_bytes: counter(COL_RX),
        tx_bytes: counter(COL_TX),
    })
}

/// Tunnel health derived from the cached dump
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub vpn_up: bool,
    pub peers_total: usize,
    pub peers_active: usize,
    pub timestamp: i64,
}

impl HealthSummary {
    pub fn from_dump(dump: Option<&DumpSnapshot>, now: i64, threshold_secs: u64) -> Self {
        let Some(dump) = dump.filter(|d| !d.is_empty()) else {
            return Self {
                vpn_up: false,
                peers_total: 0,
                peers_active: 0,
                timestamp: now,
            };
        };

        let peers = parse_dump(&dump.text, now, threshold_secs);
        Self {
            vpn_up: true,
            peers_total: peers.len(),
            peers_active: peers.iter().filter(|p| p.is_active).count(),
            timestamp: now,
        }
    }
}

/// A peer merged with its stored metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichedPeer {
    #[serde(flatten)]
    pub peer: PeerRecord,
    pub label: String,
    pub created_at: Option<i64>,
    pub is_admin: bool,
}

/// Merge peers with metadata; the admin peer gets a default label
pub fn enrich(
    peers: Vec<PeerRecord>,
    metadata: &BTreeMap<String, PeerMetadata>,
    admin_ip: Ipv4Addr,
) -> Vec<EnrichedPeer> {
    let admin_ip = admin_ip.to_string();

    peers
        .into_iter()
        .map(|peer| {
            let meta = metadata.get(&peer.public_key);
            let is_admin = peer.primary_ip() == admin_ip;

            let mut label = meta.map(|m| m.label.clone()).unwrap_or_default();
            if label.is_empty() && is_admin {
                label = ADMIN_BOOTSTRAP_LABEL.to_string();
            }

            EnrichedPeer {
                created_at: meta.and_then(|m| m.created_at),
                label,
                is_admin,
                peer,
            }
        })
        .collect()
}

/// Per-peer transfer counters for the traffic view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrafficEntry {
    pub public_key: String,
    pub public_key_short: String,
    pub label: String,
    pub created_at: Option<i64>,
    pub is_admin: bool,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_human: String,
    pub tx_human: String,
}

impl From<&EnrichedPeer> for TrafficEntry {
    fn from(p: &EnrichedPeer) -> Self {
        Self {
            public_key: p.peer.public_key.clone(),
            public_key_short: short_key(&p.peer.public_key),
            label: p.label.clone(),
            created_at: p.created_at,
            is_admin: p.is_admin,
            rx_bytes: p.peer.rx_bytes,
            tx_bytes: p.peer.tx_bytes,
            rx_human: format_bytes(p.peer.rx_bytes),
            tx_human: format_bytes(p.peer.tx_bytes),
        }
    }
}

/// First 16 characters of a key followed by an ellipsis
pub fn short_key(key: &str) -> String {
    let prefix: String = key.chars().take(16).collect();
    format!("{}…", prefix)
}

/// "42s", "5m" or "3h"
pub fn format_age(seconds: i64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m", seconds / 60)
    } else {
        format!("{}h", seconds / 3600)
    }
}

/// Bytes with a binary unit, one decimal
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if value < 1024.0 {
            return format!("{:.1} {}", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.1} TB", value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wg::testing::INTERFACE_LINE;
    use chrono::DateTime;
    use std::sync::Arc;

    const NOW: i64 = 1_700_000_000;
    const KEY_A: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";
    const KEY_B: &str = "TrMvSoP4jYQlY6RIzBgbssQqY3vxI2Pi+y71lOWWXX0=";
    const KEY_C: &str = "HIgo9xNzJMWLKASShiTqIybxZ0U3wGLiUeJ1PKf8ykw=";

    fn dump() -> String {
        format!(
            "{}\n\
             wg0\t{}\t(none)\t198.51.100.7:40000\t10.66.66.2/32\t{}\t100\t200\t25\n\
             wg0\t{}\t(none)\t(none)\t10.66.66.10/32\t0\t0\t0\toff\n\
             wg0\t{}\t(none)\t203.0.113.4:51000\t10.66.66.11/32,fd00::b/128\t{}\t5\t6\toff\n\
             garbage line\n",
            INTERFACE_LINE,
            KEY_A,
            NOW - 30,
            KEY_B,
            KEY_C,
            NOW - 600,
        )
    }

    #[test]
    fn test_parse_dump_activity() {
        let peers = parse_dump(&dump(), NOW, 120);
        assert_eq!(peers.len(), 3);

        assert_eq!(peers[0].public_key, KEY_A);
        assert_eq!(peers[0].handshake_age_seconds, Some(30));
        assert_eq!(peers[0].handshake_age_human.as_deref(), Some("30s"));
        assert!(peers[0].is_active);
        assert_eq!(peers[0].endpoint.as_deref(), Some("198.51.100.7:40000"));
        assert_eq!((peers[0].rx_bytes, peers[0].tx_bytes), (100, 200));

        assert_eq!(peers[1].handshake_age_seconds, None);
        assert!(!peers[1].is_active);
        assert!(peers[1].endpoint.is_none());

        assert_eq!(peers[2].handshake_age_seconds, Some(600));
        assert!(!peers[2].is_active);
        assert_eq!(
            peers[2].assigned_ips().collect::<Vec<_>>(),
            vec!["10.66.66.11", "fd00::b"]
        );
    }

    #[test]
    fn test_activity_matches_threshold_rule() {
        for age in [0i64, 1, 59, 119, 120, 121, 5000] {
            let line = format!(
                "{}\nwg0\t{}\t(none)\t(none)\t10.0.0.9/32\t{}\n",
                INTERFACE_LINE,
                KEY_A,
                NOW - age
            );
            let peer = &parse_dump(&line, NOW, 120)[0];
            assert_eq!(peer.is_active, age < 120, "age {age}");
        }
    }

    #[test]
    fn test_unparsable_handshake_counts_as_never() {
        let line = format!(
            "{}\nwg0\t{}\t(none)\t(none)\t10.0.0.9/32\tsoon\n",
            INTERFACE_LINE, KEY_A
        );
        let peer = &parse_dump(&line, NOW, 120)[0];
        assert_eq!(peer.last_handshake_epoch, 0);
        assert!(!peer.is_active);
    }

    #[test]
    fn test_health_summary() {
        let snapshot = DumpSnapshot {
            text: Arc::from(dump()),
            captured_at: DateTime::from_timestamp(NOW, 0).unwrap(),
        };
        let health = HealthSummary::from_dump(Some(&snapshot), NOW, 120);
        assert!(health.vpn_up);
        assert_eq!((health.peers_total, health.peers_active), (3, 1));

        let down = HealthSummary::from_dump(None, NOW, 120);
        assert!(!down.vpn_up);
        assert_eq!(down.peers_total, 0);

        let only_interface = DumpSnapshot {
            text: Arc::from(INTERFACE_LINE),
            captured_at: DateTime::from_timestamp(NOW, 0).unwrap(),
        };
        let empty = HealthSummary::from_dump(Some(&only_interface), NOW, 120);
        assert!(empty.vpn_up);
        assert_eq!(empty.peers_total, 0);

        let blank = DumpSnapshot {
            text: Arc::from("\n"),
            captured_at: DateTime::from_timestamp(NOW, 0).unwrap(),
        };
        assert!(!HealthSummary::from_dump(Some(&blank), NOW, 120).vpn_up);
    }

    #[test]
    fn test_enrich_admin_and_labels() {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            KEY_C.to_string(),
            PeerMetadata { label: "laptop".into(), created_at: Some(NOW - 86400) },
        );

        let peers = enrich(parse_dump(&dump(), NOW, 120), &metadata, Ipv4Addr::new(10, 66, 66, 2));

        assert!(peers[0].is_admin);
        assert_eq!(peers[0].label, ADMIN_BOOTSTRAP_LABEL);
        assert_eq!(peers[0].created_at, None);

        assert!(!peers[1].is_admin);
        assert_eq!(peers[1].label, "");

        assert_eq!(peers[2].label, "laptop");
        assert_eq!(peers[2].created_at, Some(NOW - 86400));
    }

    #[test]
    fn test_admin_keeps_stored_label() {
        let mut metadata = BTreeMap::new();
        metadata.insert(KEY_A.to_string(), PeerMetadata { label: "ops".into(), created_at: None });
        let peers = enrich(parse_dump(&dump(), NOW, 120), &metadata, Ipv4Addr::new(10, 66, 66, 2));
        assert_eq!(peers[0].label, "ops");
        assert!(peers[0].is_admin);
    }

    #[test]
    fn test_fresh_peer_with_empty_store() {
        let line = format!(
            "{}\nwg0\t{}\t(none)\t(none)\t10.66.66.10/32\t{}\n",
            INTERFACE_LINE,
            KEY_B,
            NOW - 30
        );
        let admin = Ipv4Addr::new(10, 66, 66, 2);
        let peers = enrich(parse_dump(&line, NOW, 120), &BTreeMap::new(), admin);
        assert_eq!(peers.len(), 1);
        assert!(peers[0].peer.is_active);
        assert_eq!(peers[0].label, "");
        assert!(!peers[0].is_admin);
    }

    #[test]
    fn test_traffic_entry() {
        let admin = Ipv4Addr::new(10, 66, 66, 2);
        let peers = enrich(parse_dump(&dump(), NOW, 120), &BTreeMap::new(), admin);
        let entry = TrafficEntry::from(&peers[0]);
        assert_eq!(entry.public_key_short, "xTIBA5rboUvnH4ht…");
        assert_eq!(entry.rx_human, "100.0 B");
        assert_eq!(entry.label, ADMIN_BOOTSTRAP_LABEL);
    }

    #[test]
    fn test_formatters() {
        assert_eq!(format_age(59), "59s");
        assert_eq!(format_age(61), "1m");
        assert_eq!(format_age(7300), "2h");
        assert_eq!(format_bytes(512), "512.0 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.0 GB");
        assert_eq!(format_bytes(3 * 1024u64.pow(4)), "3.0 TB");
    }
}
