//! Gateway facade
//!
//! Wires the dump cache, metadata store, config file, provisioner and
//! monitors together and exposes the operations the API serves.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::AegisConfig;
use crate::error::Result;
use crate::monitor::{
    geo_from_config, GeoLookup, LogAnalyzer, PerformanceMetrics, ServiceState, SshEvent,
    SystemStats, Telemetry, TimelineDay, TzOffset,
};
use crate::store::{MetadataStore, PeerMetadata};
use crate::wg::command::Privileged;
use crate::wg::{
    enrich, parse_dump, ConfFile, DumpCache, EnrichedPeer, HealthSummary, PeerRecord,
    ProvisionedPeer, Provisioner, TrafficEntry, WgCli, Wireguard,
};

/// The control plane for one tunnel interface
pub struct Gateway {
    dumps: Arc<DumpCache>,
    store: Arc<MetadataStore>,
    provisioner: Provisioner,
    telemetry: Telemetry,
    logs: LogAnalyzer,
    clock: Arc<dyn Clock>,
    admin_ip: Ipv4Addr,
    handshake_threshold_secs: u64,
}

impl Gateway {
    /// Gateway driving the real `wg` tooling
    pub fn new(config: &AegisConfig) -> Self {
        let privileged = Privileged::new(config.use_sudo(), config.command_timeout());
        let backend = Arc::new(WgCli::new(config.wireguard.interface.clone(), privileged));
        Self::with_backend(config, backend, geo_from_config(config), Arc::new(SystemClock))
    }

    pub fn with_backend(
        config: &AegisConfig,
        backend: Arc<dyn Wireguard>,
        geo: Arc<dyn GeoLookup>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let use_sudo = config.use_sudo();
        let privileged = Privileged::new(use_sudo, config.command_timeout());

        let dumps = Arc::new(DumpCache::new(backend.clone(), clock.clone(), config.dump_ttl()));
        let conf = Arc::new(ConfFile::new(config.wg_config_path(), privileged, use_sudo));
        let store = Arc::new(MetadataStore::new(config.store.labels_path.clone()));
        let provisioner = Provisioner::new(
            config,
            backend,
            dumps.clone(),
            conf,
            store.clone(),
            clock.clone(),
        );

        Self {
            dumps,
            store,
            provisioner,
            telemetry: Telemetry::new(config, clock.clone()),
            logs: LogAnalyzer::new(config, geo, clock.clone()),
            clock,
            admin_ip: config.admin_peer_ip(),
            handshake_threshold_secs: config.wireguard.handshake_threshold_secs,
        }
    }

    fn now(&self) -> i64 {
        self.clock.now().timestamp()
    }

    /// Peers from the cached dump; empty when the daemon cannot be read
    async fn raw_peers(&self) -> Vec<PeerRecord> {
        match self.dumps.get().await {
            Some(dump) => parse_dump(&dump.text, self.now(), self.handshake_threshold_secs),
            None => Vec::new(),
        }
    }

    pub async fn health(&self) -> HealthSummary {
        let dump = self.dumps.get().await;
        HealthSummary::from_dump(dump.as_ref(), self.now(), self.handshake_threshold_secs)
    }

    /// Peers merged with their labels and creation stamps
    pub async fn peers(&self) -> Vec<EnrichedPeer> {
        let peers = self.raw_peers().await;
        let metadata = self.store.read_all().await;
        enrich(peers, &metadata, self.admin_ip)
    }

    pub async fn labels(&self) -> BTreeMap<String, PeerMetadata> {
        self.store.read_all().await
    }

    pub async fn set_label(&self, public_key: &str, label: &str) -> Result<()> {
        self.store.set_label(public_key, label).await
    }

    pub async fn add_peer(&self, public_key: &str, allowed_ip: &str) -> Result<()> {
        self.provisioner.add_peer(public_key, allowed_ip).await
    }

    pub async fn remove_peer(&self, public_key: &str) -> Result<bool> {
        self.provisioner.remove_peer(public_key).await
    }

    pub async fn provision(&self) -> Result<ProvisionedPeer> {
        self.provisioner.provision().await
    }

    pub async fn traffic(&self) -> Vec<TrafficEntry> {
        self.peers().await.iter().map(TrafficEntry::from).collect()
    }

    pub async fn system_stats(&self) -> SystemStats {
        self.telemetry.system_stats().await
    }

    pub async fn services(&self) -> Vec<ServiceState> {
        self.telemetry.services().await
    }

    pub async fn performance(&self) -> PerformanceMetrics {
        let health = self.health().await;
        self.telemetry
            .performance(health.peers_active, health.peers_total)
            .await
    }

    pub async fn ssh_events(&self, limit: Option<usize>) -> Vec<SshEvent> {
        self.logs.events(limit).await
    }

    pub async fn ssh_timeline(&self, offset: TzOffset) -> Vec<TimelineDay> {
        self.logs.timeline(offset).await
    }
}
