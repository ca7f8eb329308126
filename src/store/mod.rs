//! Peer Metadata Storage
//!
//! Durable labels and creation times for peers, keyed by public key.

mod labels;

pub use labels::{migrate, MetadataStore, PeerMetadata, StoredEntry};
