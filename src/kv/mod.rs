//! Key-Value Backend Module
//!
//! The topology document lives under a single key in a replicated store
//! that offers versioned reads and compare-and-swap writes. Everything the
//! topology layer needs from that store is the [`KvStore`] trait.

mod memory;
mod sqlite;

pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::config::{Backend, StoreConfig};

/// A stored value together with the revision it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: String,
    pub revision: u64,
}

/// Backend failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    /// Another writer changed the key since it was read
    #[error("revision mismatch on '{key}': expected {expected:?}, found {actual:?}")]
    RevisionMismatch {
        key: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    /// Transport or backend failure
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Versioned key-value store with single-key compare-and-swap.
///
/// Revisions start at 0 when a key is created and grow by exactly one on
/// every successful `put`.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a key. `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Versioned>, KvError>;

    /// Conditionally write a key and return its new revision.
    ///
    /// `expected_revision = None` requires the key to be absent;
    /// `Some(rev)` requires the stored revision to equal `rev`.
    async fn put(
        &self,
        key: &str,
        value: String,
        expected_revision: Option<u64>,
    ) -> Result<u64, KvError>;

    /// Remove a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, KvError>;
}

/// Open the backend selected by the configuration
pub fn open_backend(config: &StoreConfig) -> crate::Result<Arc<dyn KvStore>> {
    match config.backend {
        Backend::Memory => {
            info!("using in-memory topology store, nothing will be persisted");
            Ok(MemoryKvStore::new())
        }
        Backend::Sqlite => {
            let path = config.path.as_deref().ok_or_else(|| {
                crate::Error::Config("store.path is required for the sqlite backend".into())
            })?;
            info!(path = %path.display(), "opening sqlite topology store");
            Ok(SqliteKvStore::open(path)?)
        }
    }
}
