//! Latency probe and interface counters

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use crate::wg::command::run_plain;

const PING_TIMEOUT: Duration = Duration::from_secs(3);

static PING_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time[=<]([\d.]+)\s*ms").expect("valid regex"));

/// Tunnel interface counters from sysfs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub load_1m: f64,
    pub load_5m: f64,
    pub load_15m: f64,
    pub cpu_cores: usize,
    pub ping_ms: Option<f64>,
    pub wg_rx_bytes: u64,
    pub wg_tx_bytes: u64,
    pub wg_rx_dropped: u64,
    pub wg_tx_dropped: u64,
    pub active_peers: usize,
    pub total_peers: usize,
    pub timestamp: i64,
}

/// Round-trip time from `ping` output
pub fn parse_ping_ms(output: &str) -> Option<f64> {
    PING_TIME
        .captures(output)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Single ICMP echo; `None` when unreachable or slow
pub async fn ping(target: &str) -> Option<f64> {
    match run_plain("ping", &["-c", "1", "-W", "1", target], None, PING_TIMEOUT).await {
        Ok(out) => parse_ping_ms(&out),
        Err(e) => {
            tracing::debug!("Ping to {} failed: {}", target, e);
            None
        }
    }
}

/// Read `<dir>/statistics/*`; unreadable counters are zero
pub async fn read_interface_counters(dir: &Path) -> InterfaceCounters {
    let stats = dir.join("statistics");
    InterfaceCounters {
        rx_bytes: read_counter(&stats.join("rx_bytes")).await,
        tx_bytes: read_counter(&stats.join("tx_bytes")).await,
        rx_dropped: read_counter(&stats.join("rx_dropped")).await,
        tx_dropped: read_counter(&stats.join("tx_dropped")).await,
    }
}

async fn read_counter(path: &Path) -> u64 {
    match tokio::fs::read_to_string(path).await {
        Ok(s) => s.trim().parse().unwrap_or(0),
        Err(e) => {
            tracing::debug!("Counter {:?} unavailable: {}", path, e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_ping_output() {
        let out = "PING 1.1.1.1 (1.1.1.1) 56(84) bytes of data.\n\
                   64 bytes from 1.1.1.1: icmp_seq=1 ttl=57 time=12.4 ms\n";
        assert_eq!(parse_ping_ms(out), Some(12.4));
        assert_eq!(parse_ping_ms("64 bytes from ::1: icmp_seq=1 time<1 ms"), Some(1.0));
        assert_eq!(parse_ping_ms("1 packets transmitted, 0 received"), None);
    }

    #[tokio::test]
    async fn test_interface_counters() {
        let dir = tempdir().unwrap();
        let stats = dir.path().join("statistics");
        std::fs::create_dir(&stats).unwrap();
        std::fs::write(stats.join("rx_bytes"), "1048576\n").unwrap();
        std::fs::write(stats.join("tx_bytes"), "2048\n").unwrap();
        std::fs::write(stats.join("rx_dropped"), "3\n").unwrap();

        let c = read_interface_counters(dir.path()).await;
        assert_eq!(c.rx_bytes, 1_048_576);
        assert_eq!(c.tx_bytes, 2048);
        assert_eq!(c.rx_dropped, 3);
        assert_eq!(c.tx_dropped, 0);

        let missing = read_interface_counters(&dir.path().join("wg9")).await;
        assert_eq!(missing, InterfaceCounters::default());
    }
}
