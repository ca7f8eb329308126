//! Peer label store
//!
//! A JSON object on disk: `{pubkey: {"label": str, "created_at": int|null}}`.
//! Older installs wrote `{pubkey: "label"}`; such entries are upgraded by
//! [`migrate`] every time the file is read, so the file itself may stay in
//! the legacy shape until the next write.
//!
//! Every mutation is a read-modify-write of the whole file under one lock.
//! Reads take no lock; writes replace the file atomically so a concurrent
//! reader never sees a truncated file.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::fsutil::write_atomic;

/// Stored metadata for one peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMetadata {
    pub label: String,
    pub created_at: Option<i64>,
}

/// An entry as it may appear on disk
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StoredEntry {
    Legacy(String),
    Record {
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        created_at: Option<i64>,
    },
}

impl From<StoredEntry> for PeerMetadata {
    fn from(entry: StoredEntry) -> Self {
        match entry {
            StoredEntry::Legacy(label) => PeerMetadata { label, created_at: None },
            StoredEntry::Record { label, created_at } => PeerMetadata {
                label: label.unwrap_or_default(),
                created_at,
            },
        }
    }
}

/// Upgrade raw file contents to the current record shape.
///
/// Values that are neither a string nor a record are dropped.
pub fn migrate(raw: BTreeMap<String, serde_json::Value>) -> BTreeMap<String, PeerMetadata> {
    raw.into_iter()
        .filter_map(|(key, value)| match serde_json::from_value::<StoredEntry>(value) {
            Ok(entry) => Some((key, entry.into())),
            Err(_) => {
                tracing::warn!(public_key = %key, "Dropping unrecognised peer metadata entry");
                None
            }
        })
        .collect()
}

/// File-backed peer metadata store
pub struct MetadataStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl MetadataStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// All metadata, migrated. A missing or corrupt file reads as empty.
    pub async fn read_all(&self) -> BTreeMap<String, PeerMetadata> {
        migrate(self.read_raw().await)
    }

    /// Set or clear a peer's label.
    ///
    /// Clearing keeps the record (with an empty label) when it carries a
    /// creation time, and deletes it otherwise.
    pub async fn set_label(&self, public_key: &str, label: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.read_all().await;
        let label = label.trim();
        let created_at = data.get(public_key).and_then(|m| m.created_at);

        if !label.is_empty() {
            data.insert(
                public_key.to_string(),
                PeerMetadata { label: label.to_string(), created_at },
            );
        } else if created_at.is_some() {
            data.insert(
                public_key.to_string(),
                PeerMetadata { label: String::new(), created_at },
            );
        } else {
            data.remove(public_key);
        }

        self.write(&data).await?;
        tracing::info!(public_key, label, "Peer label updated");
        Ok(())
    }

    /// Set only the fields given, keeping whatever else is stored
    pub async fn set_metadata(
        &self,
        public_key: &str,
        label: Option<&str>,
        created_at: Option<i64>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.read_all().await;
        let entry = data.entry(public_key.to_string()).or_default();

        if let Some(label) = label {
            entry.label = label.to_string();
        }
        if let Some(created_at) = created_at {
            entry.created_at = Some(created_at);
        }

        self.write(&data).await?;
        tracing::debug!(public_key, ?created_at, "Peer metadata updated");
        Ok(())
    }

    async fn read_raw(&self) -> BTreeMap<String, serde_json::Value> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Label store {:?} not found, starting empty", self.path);
                return BTreeMap::new();
            }
            Err(e) => {
                tracing::warn!("Failed to read label store {:?}: {}", self.path, e);
                return BTreeMap::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Label store {:?} is corrupt, treating as empty: {}", self.path, e);
                BTreeMap::new()
            }
        }
    }

    async fn write(&self, data: &BTreeMap<String, PeerMetadata>) -> Result<()> {
        let json = serde_json::to_vec_pretty(data)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &json))
            .await
            .map_err(|e| Error::Internal(format!("label store writer panicked: {}", e)))?
    }
}
