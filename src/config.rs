//! Aegis Configuration
//!
//! This module provides configuration structures for the Aegis
//! gateway control plane.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main Aegis configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AegisConfig {
    /// WireGuard daemon configuration
    #[serde(default)]
    pub wireguard: WireguardConfig,

    /// Peer metadata store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Host and log monitoring configuration
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// WireGuard daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireguardConfig {
    /// Tunnel interface name
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Network address of the tunnel subnet (e.g. "10.66.66.0")
    #[serde(default)]
    pub subnet_base: Option<Ipv4Addr>,

    /// Public endpoint handed to clients (host:port)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// File holding the server's own public key
    #[serde(default = "default_server_public_key_path")]
    pub server_public_key_path: PathBuf,

    /// Daemon config file (defaults to /etc/wireguard/<interface>.conf)
    #[serde(default)]
    pub config_path: Option<PathBuf>,

    /// Address of the peer created during bootstrap (defaults to subnet base + 2)
    #[serde(default)]
    pub admin_peer_ip: Option<Ipv4Addr>,

    /// Maximum seconds since the last handshake for a peer to count as active
    #[serde(default = "default_handshake_threshold_secs")]
    pub handshake_threshold_secs: u64,

    /// Lifetime of a cached `wg show all dump` in milliseconds
    #[serde(default = "default_dump_ttl_ms")]
    pub dump_ttl_ms: u64,

    /// Prefix privileged commands with sudo (defaults to true unless running as root)
    #[serde(default)]
    pub use_sudo: Option<bool>,

    /// Timeout for daemon commands in seconds
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

/// Peer metadata store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON file mapping public keys to labels
    #[serde(default = "default_labels_path")]
    pub labels_path: PathBuf,
}

/// Host and log monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Authentication logs, newest rotation first
    #[serde(default = "default_auth_logs")]
    pub auth_logs: Vec<PathBuf>,

    /// Lines tailed per log file for the event feed
    #[serde(default = "default_event_tail_lines")]
    pub event_tail_lines: usize,

    /// Lines tailed per log file for the login timeline
    #[serde(default = "default_timeline_tail_lines")]
    pub timeline_tail_lines: usize,

    /// Default number of events returned
    #[serde(default = "default_event_limit")]
    pub event_limit: usize,

    /// MaxMind GeoLite2 City database
    #[serde(default = "default_geo_db_path")]
    pub geo_db_path: PathBuf,

    /// Host pinged for the latency probe
    #[serde(default = "default_ping_target")]
    pub ping_target: String,

    /// Marker file created by the package manager when a reboot is pending
    #[serde(default = "default_reboot_required_path")]
    pub reboot_required_path: PathBuf,

    /// systemd units to probe (defaults to the gateway's own services)
    #[serde(default)]
    pub services: Option<Vec<ServiceConfig>>,
}

/// A systemd unit shown on the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Unit name passed to systemctl
    pub name: String,
    /// Display label
    pub label: String,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,

    /// Enable CORS
    #[serde(default)]
    pub cors_enabled: bool,

    /// Shared token expected in the x-aegis-token header (auth disabled when unset)
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_interface() -> String {
    "wg0".to_string()
}

fn default_server_public_key_path() -> PathBuf {
    PathBuf::from("/etc/wireguard/server_public.key")
}

fn default_handshake_threshold_secs() -> u64 {
    120
}

fn default_dump_ttl_ms() -> u64 {
    2000
}

fn default_command_timeout_secs() -> u64 {
    10
}

fn default_labels_path() -> PathBuf {
    PathBuf::from("/opt/aegis/peer_labels.json")
}

fn default_auth_logs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/var/log/auth.log"),
        PathBuf::from("/var/log/auth.log.1"),
    ]
}

fn default_event_tail_lines() -> usize {
    2000
}

fn default_timeline_tail_lines() -> usize {
    5000
}

fn default_event_limit() -> usize {
    60
}

fn default_geo_db_path() -> PathBuf {
    PathBuf::from("/opt/aegis/GeoLite2-City.mmdb")
}

fn default_ping_target() -> String {
    "1.1.1.1".to_string()
}

fn default_reboot_required_path() -> PathBuf {
    PathBuf::from("/var/run/reboot-required")
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for WireguardConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            subnet_base: None,
            endpoint: None,
            server_public_key_path: default_server_public_key_path(),
            config_path: None,
            admin_peer_ip: None,
            handshake_threshold_secs: default_handshake_threshold_secs(),
            dump_ttl_ms: default_dump_ttl_ms(),
            use_sudo: None,
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            labels_path: default_labels_path(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            auth_logs: default_auth_logs(),
            event_tail_lines: default_event_tail_lines(),
            timeline_tail_lines: default_timeline_tail_lines(),
            event_limit: default_event_limit(),
            geo_db_path: default_geo_db_path(),
            ping_target: default_ping_target(),
            reboot_required_path: default_reboot_required_path(),
            services: None,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
            cors_enabled: false,
            auth_token: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl AegisConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: AegisConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        let wg = &self.wireguard;

        if wg.interface.is_empty() {
            return Err(crate::Error::Config("wireguard.interface cannot be empty".into()));
        }

        if let Some(base) = wg.subnet_base {
            if base.octets()[3] != 0 {
                return Err(crate::Error::Config(format!(
                    "wireguard.subnet_base must be a network address ending in .0, got {}",
                    base
                )));
            }
        }

        if let Some(endpoint) = &wg.endpoint {
            if !endpoint.contains(':') {
                return Err(crate::Error::Config(format!(
                    "wireguard.endpoint must be host:port, got {}",
                    endpoint
                )));
            }
        }

        if wg.handshake_threshold_secs == 0 {
            return Err(crate::Error::Config(
                "wireguard.handshake_threshold_secs must be positive".into(),
            ));
        }

        if self.api.enabled && self.api.bind_address.is_empty() {
            return Err(crate::Error::Config("api.bind_address cannot be empty".into()));
        }

        Ok(())
    }

    /// Path of the daemon config file
    pub fn wg_config_path(&self) -> PathBuf {
        self.wireguard
            .config_path
            .clone()
            .unwrap_or_else(|| {
                PathBuf::from(format!("/etc/wireguard/{}.conf", self.wireguard.interface))
            })
    }

    /// Address of the bootstrap admin peer
    pub fn admin_peer_ip(&self) -> Ipv4Addr {
        if let Some(ip) = self.wireguard.admin_peer_ip {
            return ip;
        }
        match self.wireguard.subnet_base {
            Some(base) => host_in_subnet(base, 2),
            None => Ipv4Addr::new(10, 66, 66, 2),
        }
    }

    /// DNS server handed to clients (first host of the subnet)
    pub fn dns_ip(&self) -> Ipv4Addr {
        match self.wireguard.subnet_base {
            Some(base) => host_in_subnet(base, 1),
            None => Ipv4Addr::new(10, 66, 66, 1),
        }
    }

    /// Whether privileged commands need a sudo prefix
    pub fn use_sudo(&self) -> bool {
        self.wireguard
            .use_sudo
            .unwrap_or_else(|| !nix::unistd::Uid::effective().is_root())
    }

    /// Get the dump cache lifetime as Duration
    pub fn dump_ttl(&self) -> Duration {
        Duration::from_millis(self.wireguard.dump_ttl_ms)
    }

    /// Get the daemon command timeout as Duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.wireguard.command_timeout_secs)
    }

    /// Services probed for the dashboard
    pub fn services(&self) -> Vec<ServiceConfig> {
        if let Some(services) = &self.monitor.services {
            return services.clone();
        }
        let iface = &self.wireguard.interface;
        vec![
            ServiceConfig {
                name: format!("wg-quick@{}", iface),
                label: format!("wireguard ({})", iface),
            },
            ServiceConfig { name: "aegis-api".into(), label: "aegis api".into() },
            ServiceConfig { name: "unbound".into(), label: "unbound dns".into() },
            ServiceConfig { name: "ssh".into(), label: "openssh".into() },
            ServiceConfig {
                name: "netfilter-persistent".into(),
                label: "iptables persist".into(),
            },
        ]
    }
}

/// Address `base + host` within an IPv4 subnet
pub fn host_in_subnet(base: Ipv4Addr, host: u32) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(base).wrapping_add(host))
}

/// Commented default configuration written by `aegis init`
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Aegis gateway control plane

[wireguard]
interface = "wg0"
# Network address of the tunnel subnet; required for provisioning
subnet_base = "10.66.66.0"
# Public endpoint handed to provisioned clients
endpoint = "203.0.113.10:51820"
server_public_key_path = "/etc/wireguard/server_public.key"
# config_path = "/etc/wireguard/wg0.conf"
# admin_peer_ip = "10.66.66.2"
handshake_threshold_secs = 120
dump_ttl_ms = 2000
command_timeout_secs = 10

[store]
labels_path = "/opt/aegis/peer_labels.json"

[monitor]
auth_logs = ["/var/log/auth.log", "/var/log/auth.log.1"]
event_tail_lines = 2000
timeline_tail_lines = 5000
event_limit = 60
geo_db_path = "/opt/aegis/GeoLite2-City.mmdb"
ping_target = "1.1.1.1"

[api]
enabled = true
bind_address = "127.0.0.1:8000"
cors_enabled = false
# auth_token = "change-me"

[logging]
level = "info"
format = "pretty"
"#;
