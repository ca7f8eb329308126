//! Host resource sampling
//!
//! Memory, disk, load and uptime are point-in-time reads through `sysinfo`.
//! CPU utilisation is the busy share between two `/proc/stat` samples; the
//! previous sample lives in a [`CpuSampler`] owned by the caller.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use sysinfo::{CpuRefreshKind, Disks, RefreshKind, System};

const MB: f64 = 1024.0 * 1024.0;
const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Aggregate CPU jiffies from the first line of /proc/stat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuCounters {
    pub total: u64,
    pub idle: u64,
}

/// Parse the aggregate `cpu` line of /proc/stat
pub fn parse_proc_stat(text: &str) -> Option<CpuCounters> {
    let line = text.lines().next()?;
    let mut fields = line.split_whitespace();
    if fields.next()? != "cpu" {
        return None;
    }
    let values: Vec<u64> = fields.take(5).map(|f| f.parse().ok()).collect::<Option<_>>()?;
    if values.len() < 4 {
        return None;
    }
    let (user, nice, system, idle) = (values[0], values[1], values[2], values[3]);
    let iowait = values.get(4).copied().unwrap_or(0);
    Some(CpuCounters {
        total: user + nice + system + idle + iowait,
        idle,
    })
}

/// Busy percentage between two samples, one decimal
pub fn cpu_percent(prev: CpuCounters, cur: CpuCounters) -> f64 {
    let d_total = cur.total.saturating_sub(prev.total);
    let d_idle = cur.idle.saturating_sub(prev.idle);
    if d_total == 0 {
        return 0.0;
    }
    let busy = 1.0 - (d_idle as f64 / d_total as f64);
    round1(busy.clamp(0.0, 1.0) * 100.0)
}

/// Keeps the previous CPU sample between calls
pub struct CpuSampler {
    proc_stat: PathBuf,
    prev: Mutex<Option<CpuCounters>>,
}

impl CpuSampler {
    pub fn new(proc_stat: PathBuf) -> Self {
        Self {
            proc_stat,
            prev: Mutex::new(None),
        }
    }

    /// Record `cur` and return utilisation since the previous sample (0 for the first)
    pub fn observe(&self, cur: CpuCounters) -> f64 {
        let mut prev = match self.prev.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let percent = prev.map_or(0.0, |p| cpu_percent(p, cur));
        *prev = Some(cur);
        percent
    }

    /// Read /proc/stat and observe it; read failures yield 0
    pub async fn sample(&self) -> f64 {
        match tokio::fs::read_to_string(&self.proc_stat).await {
            Ok(text) => match parse_proc_stat(&text) {
                Some(counters) => self.observe(counters),
                None => {
                    tracing::warn!("Unrecognised CPU line in {:?}", self.proc_stat);
                    0.0
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {:?}: {}", self.proc_stat, e);
                0.0
            }
        }
    }
}

impl Default for CpuSampler {
    fn default() -> Self {
        Self::new(PathBuf::from("/proc/stat"))
    }
}

/// Memory usage
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    pub total_mb: f64,
    pub used_mb: f64,
    pub free_mb: f64,
    pub percent: f64,
}

impl MemoryStats {
    pub fn from_bytes(total: u64, used: u64) -> Self {
        let used = used.min(total);
        Self {
            total_mb: round1(total as f64 / MB),
            used_mb: round1(used as f64 / MB),
            free_mb: round1((total - used) as f64 / MB),
            percent: percent(used, total),
        }
    }
}

/// Root filesystem usage
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiskStats {
    pub total_gb: f64,
    pub used_gb: f64,
    pub percent: f64,
}

impl DiskStats {
    pub fn from_bytes(total: u64, available: u64) -> Self {
        let used = total.saturating_sub(available);
        Self {
            total_gb: round1(total as f64 / GB),
            used_gb: round1(used as f64 / GB),
            percent: percent(used, total),
        }
    }
}

/// Host resource snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub cpu_percent: f64,
    pub memory: MemoryStats,
    pub disk: DiskStats,
    pub uptime: String,
    pub reboot_required: bool,
    pub timestamp: i64,
}

pub fn memory() -> MemoryStats {
    let mut sys = System::new();
    sys.refresh_memory();
    let total = sys.total_memory();
    if total == 0 {
        tracing::warn!("Memory counters unavailable");
        return MemoryStats::default();
    }
    MemoryStats::from_bytes(total, sys.used_memory())
}

pub fn root_disk() -> DiskStats {
    let disks = Disks::new_with_refreshed_list();
    match disks.iter().find(|d| d.mount_point() == Path::new("/")) {
        Some(disk) => DiskStats::from_bytes(disk.total_space(), disk.available_space()),
        None => {
            tracing::warn!("Root filesystem not found in disk list");
            DiskStats::default()
        }
    }
}

/// Uptime as "3d 4h 12m", or "unknown"
pub fn uptime() -> String {
    match System::uptime() {
        0 => "unknown".to_string(),
        secs => format_uptime(secs),
    }
}

pub fn format_uptime(seconds: u64) -> String {
    let d = seconds / 86400;
    let h = (seconds % 86400) / 3600;
    let m = (seconds % 3600) / 60;

    let mut parts = Vec::new();
    if d > 0 {
        parts.push(format!("{}d", d));
    }
    if h > 0 {
        parts.push(format!("{}h", h));
    }
    parts.push(format!("{}m", m));
    parts.join(" ")
}

/// 1, 5 and 15 minute load averages
pub fn load_average() -> (f64, f64, f64) {
    let load = System::load_average();
    (round2(load.one), round2(load.five), round2(load.fifteen))
}

pub fn cpu_cores() -> usize {
    let sys = System::new_with_specifics(RefreshKind::new().with_cpu(CpuRefreshKind::new()));
    sys.cpus().len().max(1)
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round1(part as f64 / whole as f64 * 100.0)
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
