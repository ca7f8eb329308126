//! Host telemetry and auth-log analysis
//!
//! Everything here degrades instead of failing: a probe that cannot run
//! reports zeros, `unknown` or an empty list and logs why.

pub mod geo;
mod logs;
mod performance;
mod services;
mod ssh;
mod system;
mod timeline;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use geo::{GeoIp, GeoLookup, NoGeo};
pub use logs::AuthLogs;
pub use performance::{
    parse_ping_ms, read_interface_counters, InterfaceCounters, PerformanceMetrics,
};
pub use services::{ServiceState, ServiceStatus};
pub use ssh::{classify, extract_events, EventLevel, SshEvent};
pub use system::{
    cpu_percent, format_uptime, parse_proc_stat, CpuCounters, CpuSampler, DiskStats, MemoryStats,
    SystemStats,
};
pub use timeline::{build_timeline, TimelineDay, TimelineLogin, TzOffset};

use crate::clock::Clock;
use crate::config::{AegisConfig, ServiceConfig};
use crate::wg::command::Privileged;

const LOG_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Host and tunnel-interface metrics
pub struct Telemetry {
    cpu: CpuSampler,
    interface: String,
    sysfs_net: PathBuf,
    ping_target: String,
    reboot_required_path: PathBuf,
    services: Vec<ServiceConfig>,
    clock: Arc<dyn Clock>,
}

impl Telemetry {
    pub fn new(config: &AegisConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cpu: CpuSampler::default(),
            interface: config.wireguard.interface.clone(),
            sysfs_net: PathBuf::from("/sys/class/net"),
            ping_target: config.monitor.ping_target.clone(),
            reboot_required_path: config.monitor.reboot_required_path.clone(),
            services: config.services(),
            clock,
        }
    }

    pub async fn system_stats(&self) -> SystemStats {
        let cpu_percent = self.cpu.sample().await;
        let reboot_required = tokio::fs::try_exists(&self.reboot_required_path)
            .await
            .unwrap_or(false);

        SystemStats {
            cpu_percent,
            memory: system::memory(),
            disk: system::root_disk(),
            uptime: system::uptime(),
            reboot_required,
            timestamp: self.clock.now().timestamp(),
        }
    }

    pub async fn services(&self) -> Vec<ServiceState> {
        services::probe_all(&self.services).await
    }

    /// Load, latency and interface counters; peer counts come from the caller's dump view
    pub async fn performance(&self, active_peers: usize, total_peers: usize) -> PerformanceMetrics {
        let iface_dir = self.sysfs_net.join(&self.interface);
        let (ping_ms, counters) = tokio::join!(
            performance::ping(&self.ping_target),
            read_interface_counters(&iface_dir),
        );
        let (load_1m, load_5m, load_15m) = system::load_average();

        PerformanceMetrics {
            load_1m,
            load_5m,
            load_15m,
            cpu_cores: system::cpu_cores(),
            ping_ms,
            wg_rx_bytes: counters.rx_bytes,
            wg_tx_bytes: counters.tx_bytes,
            wg_rx_dropped: counters.rx_dropped,
            wg_tx_dropped: counters.tx_dropped,
            active_peers,
            total_peers,
            timestamp: self.clock.now().timestamp(),
        }
    }
}

/// sshd activity from the auth logs
pub struct LogAnalyzer {
    logs: AuthLogs,
    event_tail_lines: usize,
    timeline_tail_lines: usize,
    default_limit: usize,
    geo: Arc<dyn GeoLookup>,
    clock: Arc<dyn Clock>,
}

impl LogAnalyzer {
    pub fn new(config: &AegisConfig, geo: Arc<dyn GeoLookup>, clock: Arc<dyn Clock>) -> Self {
        let privileged = Privileged::new(config.use_sudo(), LOG_READ_TIMEOUT);
        Self::with_logs(
            AuthLogs::new(config.monitor.auth_logs.clone(), privileged),
            config,
            geo,
            clock,
        )
    }

    pub fn with_logs(
        logs: AuthLogs,
        config: &AegisConfig,
        geo: Arc<dyn GeoLookup>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            logs,
            event_tail_lines: config.monitor.event_tail_lines,
            timeline_tail_lines: config.monitor.timeline_tail_lines,
            default_limit: config.monitor.event_limit,
            geo,
            clock,
        }
    }

    /// Recent sshd events, newest first
    pub async fn events(&self, limit: Option<usize>) -> Vec<SshEvent> {
        let lines = self.logs.tail(self.event_tail_lines).await;
        extract_events(&lines, self.geo.as_ref(), limit.unwrap_or(self.default_limit))
    }

    pub async fn timeline(&self, offset: TzOffset) -> Vec<TimelineDay> {
        let lines = self.logs.tail(self.timeline_tail_lines).await;
        build_timeline(&lines, self.clock.now(), offset, self.geo.as_ref())
    }
}

/// MaxMind lookups when a database path is configured
pub fn geo_from_config(config: &AegisConfig) -> Arc<dyn GeoLookup> {
    if config.monitor.geo_db_path.as_os_str().is_empty() {
        Arc::new(NoGeo)
    } else {
        Arc::new(GeoIp::new(config.monitor.geo_db_path.clone()))
    }
}
