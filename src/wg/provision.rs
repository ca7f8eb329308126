//! Peer provisioning workflow
//!
//! Steps run in order: keypair, address allocation, live apply, config
//! persist, metadata stamp, server key read, client config, QR render.
//! Anything failing up to and including the live apply leaves no trace.
//! Past that point the peer is already live and a failure is reported as
//! [`Error::ProvisionDrift`]; nothing is rolled back.

use std::io::Cursor;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::QrCode;
use serde::Serialize;
use tokio::sync::Mutex;

use super::{
    allocate, parse_dump, validate_cidr, validate_public_key, ConfFile, DumpCache, KeyPair,
    Wireguard,
};
use crate::clock::Clock;
use crate::config::AegisConfig;
use crate::error::{Error, Result};
use crate::store::MetadataStore;

/// Keepalive written into client configs, in seconds
pub const CLIENT_KEEPALIVE_SECS: u32 = 25;

/// Client-side tunnel configuration for a provisioned peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub private_key: String,
    pub address: String,
    pub dns: Ipv4Addr,
    pub server_public_key: String,
    pub endpoint: String,
}

impl ClientConfig {
    pub fn render(&self) -> String {
        format!(
            "[Interface]\n\
             PrivateKey = {}\n\
             Address = {}\n\
             DNS = {}\n\
             \n\
             [Peer]\n\
             PublicKey = {}\n\
             Endpoint = {}\n\
             AllowedIPs = 0.0.0.0/0\n\
             PersistentKeepalive = {}",
            self.private_key,
            self.address,
            self.dns,
            self.server_public_key,
            self.endpoint,
            CLIENT_KEEPALIVE_SECS,
        )
    }
}

/// Result of a successful provisioning
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionedPeer {
    pub public_key: String,
    pub allowed_ip: String,
    /// Client config text
    pub config: String,
    /// PNG of the config as a QR code, base64 encoded
    pub qr: String,
}

/// Render `text` as a QR code PNG, base64 encoded
pub fn render_qr_png_base64(text: &str) -> Result<String> {
    let code = QrCode::new(text.as_bytes()).map_err(|e| Error::QrEncode(e.to_string()))?;
    let image = code.render::<Luma<u8>>().build();

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(image)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| Error::QrEncode(e.to_string()))?;

    Ok(BASE64.encode(png))
}

/// Orchestrates peer provisioning
pub struct Provisioner {
    backend: Arc<dyn Wireguard>,
    dumps: Arc<DumpCache>,
    conf: Arc<ConfFile>,
    store: Arc<MetadataStore>,
    clock: Arc<dyn Clock>,
    subnet_base: Option<Ipv4Addr>,
    endpoint: Option<String>,
    server_public_key_path: PathBuf,
    dns: Ipv4Addr,
    handshake_threshold_secs: u64,
    /// One provisioning at a time, so two requests never allocate the same address
    lock: Mutex<()>,
}

impl Provisioner {
    pub fn new(
        config: &AegisConfig,
        backend: Arc<dyn Wireguard>,
        dumps: Arc<DumpCache>,
        conf: Arc<ConfFile>,
        store: Arc<MetadataStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            dumps,
            conf,
            store,
            clock,
            subnet_base: config.wireguard.subnet_base,
            endpoint: config.wireguard.endpoint.clone(),
            server_public_key_path: config.wireguard.server_public_key_path.clone(),
            dns: config.dns_ip(),
            handshake_threshold_secs: config.wireguard.handshake_threshold_secs,
            lock: Mutex::new(()),
        }
    }

    pub async fn provision(&self) -> Result<ProvisionedPeer> {
        let _guard = self.lock.lock().await;

        if self.subnet_base.is_none() {
            return Err(Error::SubnetNotConfigured);
        }
        let endpoint = self
            .endpoint
            .clone()
            .ok_or_else(|| Error::Config("wireguard.endpoint is not configured".into()))?;

        // 1. keypair
        let keys = self.backend.generate_keypair().await?;

        // 2. address, from a dump taken now rather than the cached one
        let snapshot = self
            .dumps
            .refresh()
            .await
            .map_err(|e| Error::DaemonUnavailable(e.to_string()))?;
        let peers = parse_dump(
            &snapshot.text,
            self.clock.now().timestamp(),
            self.handshake_threshold_secs,
        );
        let allowed_ip = allocate(self.subnet_base, &peers)?;

        // 3. live apply
        self.backend.set_peer(&keys.public_key, &allowed_ip).await?;

        // 4. persist
        self.conf
            .add_peer(&keys.public_key, &allowed_ip)
            .await
            .map_err(|e| drift(&keys, &allowed_ip, "config persist", e))?;

        self.store
            .set_metadata(&keys.public_key, None, Some(self.clock.now().timestamp()))
            .await
            .map_err(|e| drift(&keys, &allowed_ip, "metadata stamp", e))?;

        // 5. server key
        let server_public_key = tokio::fs::read_to_string(&self.server_public_key_path)
            .await
            .map_err(|e| drift(&keys, &allowed_ip, "server public key read", e.into()))?
            .trim()
            .to_string();

        // 6. client config
        let config = ClientConfig {
            private_key: keys.private_key.clone(),
            address: allowed_ip.clone(),
            dns: self.dns,
            server_public_key,
            endpoint,
        }
        .render();

        // 7. QR
        let qr = render_qr_png_base64(&config)
            .map_err(|e| drift(&keys, &allowed_ip, "QR render", e))?;

        tracing::info!(public_key = %keys.public_key, allowed_ip = %allowed_ip, "Peer provisioned");

        Ok(ProvisionedPeer {
            public_key: keys.public_key,
            allowed_ip,
            config,
            qr,
        })
    }

    /// Register a peer whose key and address the caller already has.
    ///
    /// Same ordering as provisioning: live first, then config, then the
    /// creation stamp. Shares the provisioning lock so an allocation never
    /// races a manual add.
    pub async fn add_peer(&self, public_key: &str, allowed_ip: &str) -> Result<()> {
        validate_public_key(public_key)?;
        validate_cidr(allowed_ip)?;

        let _guard = self.lock.lock().await;

        self.backend.set_peer(public_key, allowed_ip).await?;
        self.conf.add_peer(public_key, allowed_ip).await?;
        self.store
            .set_metadata(public_key, None, Some(self.clock.now().timestamp()))
            .await?;
        Ok(())
    }

    /// Remove a peer from the live interface and the config file.
    /// Stored metadata is kept.
    pub async fn remove_peer(&self, public_key: &str) -> Result<bool> {
        validate_public_key(public_key)?;

        let _guard = self.lock.lock().await;

        self.backend.remove_peer(public_key).await?;
        self.conf.remove_peer(public_key).await
    }
}

fn drift(keys: &KeyPair, allowed_ip: &str, stage: &'static str, cause: Error) -> Error {
    tracing::error!(
        public_key = %keys.public_key,
        allowed_ip,
        stage,
        error = %cause,
        "Provisioning failed after live apply; daemon is ahead of persisted state"
    );
    Error::ProvisionDrift {
        public_key: keys.public_key.clone(),
        allowed_ip: allowed_ip.to_string(),
        stage,
        reason: cause.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::wg::command::Privileged;
    use crate::wg::testing::FakeWireguard;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    const NOW: i64 = 1_700_000_000;
    const SERVER_KEY: &str = "HIgo9xNzJMWLKASShiTqIybxZ0U3wGLiUeJ1PKf8ykw=";
    const ADMIN_KEY: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";

    struct Fixture {
        dir: TempDir,
        fake: Arc<FakeWireguard>,
        store: Arc<MetadataStore>,
        provisioner: Provisioner,
    }

    fn fixture(subnet: Option<Ipv4Addr>) -> Fixture {
        let dir = tempdir().unwrap();
        let conf_path = dir.path().join("wg0.conf");
        let key_path = dir.path().join("server_public.key");
        std::fs::write(&conf_path, "[Interface]\nPrivateKey = S\n").unwrap();
        std::fs::write(&key_path, format!("{}\n", SERVER_KEY)).unwrap();

        let mut config = AegisConfig::default();
        config.wireguard.subnet_base = subnet;
        config.wireguard.endpoint = Some("203.0.113.1:51820".into());
        config.wireguard.server_public_key_path = key_path;

        let fake = Arc::new(FakeWireguard::with_peers(&[(ADMIN_KEY, "10.66.66.2/32", NOW - 10)]));
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_epoch(NOW));
        let dumps = Arc::new(DumpCache::new(fake.clone(), clock.clone(), Duration::from_secs(2)));
        let conf = Arc::new(ConfFile::new(
            conf_path,
            Privileged::new(false, Duration::from_secs(5)),
            false,
        ));
        let store = Arc::new(MetadataStore::new(dir.path().join("labels.json")));

        let provisioner =
            Provisioner::new(&config, fake.clone(), dumps, conf, store.clone(), clock);
        Fixture { dir, fake, store, provisioner }
    }

    #[tokio::test]
    async fn test_provision_end_to_end() {
        let f = fixture(Some(Ipv4Addr::new(10, 66, 66, 0)));

        let peer = f.provisioner.provision().await.unwrap();
        assert_eq!(peer.allowed_ip, "10.66.66.10/32");
        assert!(peer.config.contains("Address = 10.66.66.10/32\n"));
        assert!(peer.config.contains("DNS = 10.66.66.1\n"));
        assert!(peer.config.contains(&format!("PublicKey = {}\n", SERVER_KEY)));
        assert!(peer.config.contains("Endpoint = 203.0.113.1:51820\n"));
        assert!(peer.config.ends_with("PersistentKeepalive = 25"));

        // live, persisted and stamped
        assert!(f.fake.peers.lock().unwrap().iter().any(|(k, _, _)| k == &peer.public_key));
        let conf = std::fs::read_to_string(f.dir.path().join("wg0.conf")).unwrap();
        assert!(conf.contains(&format!(
            "PublicKey = {}\nAllowedIPs = 10.66.66.10/32\n",
            peer.public_key
        )));
        assert_eq!(f.store.read_all().await[&peer.public_key].created_at, Some(NOW));

        let png = BASE64.decode(&peer.qr).unwrap();
        assert_eq!(&png[..4], b"\x89PNG");
    }

    #[tokio::test]
    async fn test_back_to_back_provisions_get_distinct_addresses() {
        let f = fixture(Some(Ipv4Addr::new(10, 66, 66, 0)));

        let first = f.provisioner.provision().await.unwrap();
        let second = f.provisioner.provision().await.unwrap();

        assert_eq!(first.allowed_ip, "10.66.66.10/32");
        assert_eq!(second.allowed_ip, "10.66.66.11/32");
        assert_ne!(first.public_key, second.public_key);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_provisions_get_distinct_addresses() {
        let f = fixture(Some(Ipv4Addr::new(10, 66, 66, 0)));

        let (a, b, c, d) = tokio::join!(
            f.provisioner.provision(),
            f.provisioner.provision(),
            f.provisioner.provision(),
            f.provisioner.provision(),
        );
        let mut ips: Vec<String> = [a, b, c, d]
            .into_iter()
            .map(|p| p.unwrap().allowed_ip)
            .collect();
        ips.sort();
        ips.dedup();
        assert_eq!(ips.len(), 4);

        let conf = std::fs::read_to_string(f.dir.path().join("wg0.conf")).unwrap();
        assert_eq!(conf.matches("[Peer]").count(), 4);
        assert_eq!(f.store.read_all().await.len(), 4);
    }

    #[tokio::test]
    async fn test_live_apply_failure_leaves_no_trace() {
        let f = fixture(Some(Ipv4Addr::new(10, 66, 66, 0)));
        f.fake.fail_set.store(true, Ordering::SeqCst);

        let err = f.provisioner.provision().await.unwrap_err();
        assert!(matches!(err, Error::Command { .. }));

        let conf = std::fs::read_to_string(f.dir.path().join("wg0.conf")).unwrap();
        assert_eq!(conf, "[Interface]\nPrivateKey = S\n");
        assert!(f.store.read_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_after_apply_reports_drift() {
        let f = fixture(Some(Ipv4Addr::new(10, 66, 66, 0)));
        std::fs::remove_file(f.dir.path().join("server_public.key")).unwrap();

        let err = f.provisioner.provision().await.unwrap_err();
        match err {
            Error::ProvisionDrift { stage, allowed_ip, .. } => {
                assert_eq!(stage, "server public key read");
                assert_eq!(allowed_ip, "10.66.66.10/32");
            }
            other => panic!("unexpected error: {other}"),
        }
        // the peer stays live and persisted
        assert_eq!(f.fake.peers.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_requires_subnet() {
        let f = fixture(None);
        assert!(matches!(f.provisioner.provision().await.unwrap_err(), Error::SubnetNotConfigured));
        assert_eq!(f.fake.keys_issued.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unreachable_daemon_aborts_before_apply() {
        let f = fixture(Some(Ipv4Addr::new(10, 66, 66, 0)));
        f.fake.fail_dump.store(true, Ordering::SeqCst);
        assert!(matches!(
            f.provisioner.provision().await.unwrap_err(),
            Error::DaemonUnavailable(_)
        ));
        assert_eq!(f.fake.peers.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_manual_add_and_remove() {
        let f = fixture(Some(Ipv4Addr::new(10, 66, 66, 0)));
        let key = crate::wg::testing::fake_key('B', 1);

        f.provisioner.add_peer(&key, "10.66.66.50/32").await.unwrap();
        let conf = std::fs::read_to_string(f.dir.path().join("wg0.conf")).unwrap();
        assert!(conf.contains(&format!("PublicKey = {}\nAllowedIPs = 10.66.66.50/32\n", key)));
        assert_eq!(f.store.read_all().await[&key].created_at, Some(NOW));

        assert!(f.provisioner.remove_peer(&key).await.unwrap());
        let conf = std::fs::read_to_string(f.dir.path().join("wg0.conf")).unwrap();
        assert!(!conf.contains(&key));
        assert!(!f.fake.peers.lock().unwrap().iter().any(|(k, _, _)| k == &key));
        // metadata outlives the peer
        assert!(f.store.read_all().await.contains_key(&key));
    }

    #[tokio::test]
    async fn test_manual_add_rejects_bad_input() {
        let f = fixture(Some(Ipv4Addr::new(10, 66, 66, 0)));
        assert!(matches!(
            f.provisioner.add_peer("short=", "10.66.66.50/32").await.unwrap_err(),
            Error::InvalidPublicKey
        ));
        assert!(matches!(
            f.provisioner.add_peer(ADMIN_KEY, "10.66.66.300/32").await.unwrap_err(),
            Error::InvalidCidr(_)
        ));
        assert_eq!(f.fake.peers.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_client_config_render() {
        let config = ClientConfig {
            private_key: "PRIV".into(),
            address: "10.66.66.10/32".into(),
            dns: Ipv4Addr::new(10, 66, 66, 1),
            server_public_key: "SERVER".into(),
            endpoint: "vpn.example.com:51820".into(),
        };
        assert_eq!(
            config.render(),
            "[Interface]\nPrivateKey = PRIV\nAddress = 10.66.66.10/32\nDNS = 10.66.66.1\n\n\
             [Peer]\nPublicKey = SERVER\nEndpoint = vpn.example.com:51820\nAllowedIPs = 0.0.0.0/0\nPersistentKeepalive = 25"
        );
    }
}
