//! WireGuard Module
//!
//! Everything that touches the tunnel daemon: the command seam, the
//! cached dump, peer parsing and enrichment, address allocation, the
//! on-disk config mutator and the provisioning workflow.

pub mod command;
mod alloc;
mod conf;
mod dump;
mod peers;
mod provision;
mod validate;

pub use alloc::{allocate, AllocationRange, ALLOCATION_RANGE};
pub use conf::{ConfFile, Section, SectionKind, WgConf};
pub use dump::{DumpCache, DumpSnapshot};
pub use peers::{
    enrich, format_age, format_bytes, parse_dump, short_key, EnrichedPeer, HealthSummary,
    PeerRecord, TrafficEntry, ADMIN_BOOTSTRAP_LABEL,
};
pub use provision::{render_qr_png_base64, ClientConfig, ProvisionedPeer, Provisioner};
pub use validate::{validate_cidr, validate_public_key};

use async_trait::async_trait;

use crate::error::Result;
use command::{run_plain, Privileged};

/// A freshly generated WireGuard keypair (base64 encoded)
#[derive(Clone)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// Commands understood by the tunnel daemon
#[async_trait]
pub trait Wireguard: Send + Sync {
    /// Raw `wg show all dump` output
    async fn dump(&self) -> Result<String>;

    /// Add or update a peer on the live interface
    async fn set_peer(&self, public_key: &str, allowed_ip: &str) -> Result<()>;

    /// Remove a peer from the live interface
    async fn remove_peer(&self, public_key: &str) -> Result<()>;

    /// Generate a new private key
    async fn generate_private_key(&self) -> Result<String>;

    /// Derive the public key for a private key
    async fn public_key_for(&self, private_key: &str) -> Result<String>;

    /// Generate a private key and derive its public half
    async fn generate_keypair(&self) -> Result<KeyPair> {
        let private_key = self.generate_private_key().await?;
        let public_key = self.public_key_for(&private_key).await?;
        Ok(KeyPair { private_key, public_key })
    }
}

/// [`Wireguard`] backed by the `wg` command line tool
pub struct WgCli {
    interface: String,
    privileged: Privileged,
}

impl WgCli {
    pub fn new(interface: String, privileged: Privileged) -> Self {
        Self { interface, privileged }
    }
}

#[async_trait]
impl Wireguard for WgCli {
    async fn dump(&self) -> Result<String> {
        self.privileged.run("wg", &["show", "all", "dump"], None).await
    }

    async fn set_peer(&self, public_key: &str, allowed_ip: &str) -> Result<()> {
        self.privileged
            .run(
                "wg",
                &["set", &self.interface, "peer", public_key, "allowed-ips", allowed_ip],
                None,
            )
            .await?;
        tracing::info!(
            interface = %self.interface,
            public_key,
            allowed_ip,
            "Peer applied to live interface"
        );
        Ok(())
    }

    async fn remove_peer(&self, public_key: &str) -> Result<()> {
        self.privileged
            .run("wg", &["set", &self.interface, "peer", public_key, "remove"], None)
            .await?;
        tracing::info!(interface = %self.interface, public_key, "Peer removed from live interface");
        Ok(())
    }

    async fn generate_private_key(&self) -> Result<String> {
        let out = run_plain("wg", &["genkey"], None, self.privileged.timeout()).await?;
        Ok(out.trim().to_string())
    }

    async fn public_key_for(&self, private_key: &str) -> Result<String> {
        let out = run_plain("wg", &["pubkey"], Some(private_key), self.privileged.timeout()).await?;
        Ok(out.trim().to_string())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::error::Error;

    pub(crate) const INTERFACE_LINE: &str =
        "wg0\tSERVERPRIVATEKEYAAAAAAAAAAAAAAAAAAAAAAAAAAA=\tSERVERPUBLICKEYAAAAAAAAAAAAAAAAAAAAAAAAAAAA=\t51820\toff";

    /// In-memory daemon that keeps a peer table and counts dump calls
    #[derive(Default)]
    pub(crate) struct FakeWireguard {
        /// (public key, allowed ip, last handshake)
        pub peers: Mutex<Vec<(String, String, i64)>>,
        pub dump_calls: AtomicUsize,
        pub fail_dump: AtomicBool,
        /// `wg show all dump` with no interface up prints nothing
        pub empty_dump: AtomicBool,
        pub fail_set: AtomicBool,
        pub keys_issued: AtomicUsize,
    }

    impl FakeWireguard {
        pub(crate) fn with_peers(peers: &[(&str, &str, i64)]) -> Self {
            let fake = Self::default();
            *fake.peers.lock().unwrap() = peers
                .iter()
                .map(|(k, ip, hs)| (k.to_string(), ip.to_string(), *hs))
                .collect();
            fake
        }

        pub(crate) fn dump_calls(&self) -> usize {
            self.dump_calls.load(Ordering::SeqCst)
        }

        pub(crate) fn render(&self) -> String {
            let mut out = String::from(INTERFACE_LINE);
            out.push('\n');
            for (key, ip, hs) in self.peers.lock().unwrap().iter() {
                out.push_str(&format!(
                    "wg0\t{}\t(none)\t198.51.100.7:40000\t{}\t{}\t1024\t2048\t25\n",
                    key, ip, hs
                ));
            }
            out
        }
    }

    /// A syntactically valid key derived from a counter
    pub(crate) fn fake_key(tag: char, n: usize) -> String {
        format!("{}{:0>41}A=", tag, n)
    }

    #[async_trait]
    impl Wireguard for FakeWireguard {
        async fn dump(&self) -> Result<String> {
            self.dump_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_dump.load(Ordering::SeqCst) {
                return Err(Error::Command {
                    command: "wg show all dump".into(),
                    message: "Unable to access interface: Operation not permitted".into(),
                });
            }
            if self.empty_dump.load(Ordering::SeqCst) {
                return Ok(String::new());
            }
            Ok(self.render())
        }

        async fn set_peer(&self, public_key: &str, allowed_ip: &str) -> Result<()> {
            if self.fail_set.load(Ordering::SeqCst) {
                return Err(Error::Command {
                    command: "wg set".into(),
                    message: "Operation not permitted".into(),
                });
            }
            let mut peers = self.peers.lock().unwrap();
            peers.retain(|(k, _, _)| k != public_key);
            peers.push((public_key.to_string(), allowed_ip.to_string(), 0));
            Ok(())
        }

        async fn remove_peer(&self, public_key: &str) -> Result<()> {
            self.peers.lock().unwrap().retain(|(k, _, _)| k != public_key);
            Ok(())
        }

        async fn generate_private_key(&self) -> Result<String> {
            let n = self.keys_issued.fetch_add(1, Ordering::SeqCst);
            Ok(fake_key('P', n))
        }

        async fn public_key_for(&self, private_key: &str) -> Result<String> {
            Ok(format!("Q{}", &private_key[1..]))
        }
    }
}
