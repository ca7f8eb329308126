//! Short-lived cache over `wg show all dump`
//!
//! Health, peer listing and traffic views are typically requested together
//! on every dashboard refresh. They all read through one [`DumpCache`] so a
//! single privileged subprocess serves them for `ttl`. Writes do not
//! invalidate the cache; a freshly added or removed peer may stay invisible
//! to readers for up to `ttl`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::Wireguard;
use crate::clock::Clock;
use crate::error::Result;

/// A captured dump and the moment it was taken
#[derive(Debug, Clone)]
pub struct DumpSnapshot {
    pub text: Arc<str>,
    pub captured_at: DateTime<Utc>,
}

impl DumpSnapshot {
    /// No interface output at all, which the daemon prints when the tunnel is down
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// TTL-bounded single-slot cache of the daemon dump
pub struct DumpCache {
    backend: Arc<dyn Wireguard>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    slot: RwLock<Option<DumpSnapshot>>,
}

impl DumpCache {
    pub fn new(backend: Arc<dyn Wireguard>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            backend,
            clock,
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// The cached dump if still fresh, otherwise a new capture.
    ///
    /// A failed or empty capture never populates the cache and yields `None`.
    pub async fn get(&self) -> Option<DumpSnapshot> {
        let now = self.clock.now();
        if let Some(snapshot) = self.slot.read().await.as_ref() {
            if self.is_fresh(snapshot, now) {
                tracing::trace!("Dump cache hit");
                return Some(snapshot.clone());
            }
        }

        match self.refresh().await {
            Ok(snapshot) if snapshot.is_empty() => {
                tracing::debug!("WireGuard dump is empty; no interface up");
                None
            }
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!("Failed to capture WireGuard dump: {}", e);
                None
            }
        }
    }

    /// Capture a new dump regardless of the cached one and store it.
    ///
    /// An empty capture is returned but not stored.
    pub async fn refresh(&self) -> Result<DumpSnapshot> {
        let text = self.backend.dump().await?;
        let snapshot = DumpSnapshot {
            text: Arc::from(text),
            captured_at: self.clock.now(),
        };
        if snapshot.is_empty() {
            *self.slot.write().await = None;
            return Ok(snapshot);
        }
        // Two refreshes racing both write here; last one wins.
        *self.slot.write().await = Some(snapshot.clone());
        tracing::debug!("Dump cache refreshed");
        Ok(snapshot)
    }

    fn is_fresh(&self, snapshot: &DumpSnapshot, now: DateTime<Utc>) -> bool {
        match (now - snapshot.captured_at).to_std() {
            Ok(age) => age < self.ttl,
            // captured "in the future": the clock stepped backwards
            Err(_) => false,
        }
    }
}
