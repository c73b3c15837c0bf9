//! WolfTopo - Topology Manager for Sharded Storage Clusters
//!
//! Keeps the membership topology of a sharded, replicated storage cluster
//! as a single versioned document in a key-value store with
//! compare-and-swap writes, so any number of administrative clients can
//! change it concurrently without a coordinator.
//!
//! # Architecture
//!
//! - [`topology`]: the typed document, its edits and invariants
//! - [`store`]: the optimistic read-modify-write loop over a [`kv::KvStore`]
//! - [`projector`]: per-instance and sharding configuration derived from a
//!   snapshot
//! - [`api`]: HTTP admin API over a store handle
//!
//! # Features
//!
//! - Lock-free concurrent administration with bounded retries and backoff
//! - Soft deletion: expelled instances stay in the document for audit
//! - Replication links with validation inside each replicaset
//! - Layered runtime options (topology < replicaset < instance)
//! - SQLite and in-memory backends

pub mod api;
pub mod config;
pub mod error;
pub mod kv;
pub mod projector;
pub mod store;
pub mod topology;

pub use config::WolfTopoConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfTopoConfig;
    pub use crate::error::{EntityKind, Error, Result};
    pub use crate::kv::{KvStore, MemoryKvStore, SqliteKvStore};
    pub use crate::projector::{InstanceConf, ShardingConfig};
    pub use crate::store::{RetryPolicy, StoreOptions, TopologyStore};
    pub use crate::topology::{
        InstanceOptions, ReplicasetOptions, TopologyDocument, TopologyOptions, TopologyPatch,
    };
}
