//! Aegis - WireGuard VPN Gateway Control Plane
//!
//! Manages peers on a single WireGuard interface and reports on the host
//! it runs on.
//!
//! # Architecture
//!
//! All peer state is derived from the daemon's own dump, read through a
//! short-lived cache so several dashboard views share one subprocess call.
//! Peer labels and creation times live in a small JSON store keyed by
//! public key. Changes are applied to the live interface first and then
//! persisted to the daemon config file; the config file is edited as a
//! parsed sequence of sections rather than by pattern substitution.
//!
//! # Features
//!
//! - Peer listing with handshake activity, labels and admin detection
//! - Provisioning with address allocation, client config and QR code
//! - Manual peer add/remove
//! - Host telemetry (CPU, memory, disk, load, latency, services)
//! - sshd event feed and seven-day login timeline with geo annotation
//! - HTTP API for the dashboard

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod gateway;
pub mod monitor;
pub mod store;
pub mod wg;

pub use config::AegisConfig;
pub use error::{Error, Result};
pub use gateway::Gateway;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::config::AegisConfig;
    pub use crate::error::{Error, Result};
    pub use crate::gateway::Gateway;
    pub use crate::monitor::{SshEvent, TimelineDay, TzOffset};
    pub use crate::store::{MetadataStore, PeerMetadata};
    pub use crate::wg::{DumpCache, EnrichedPeer, PeerRecord, ProvisionedPeer, Wireguard};
}
