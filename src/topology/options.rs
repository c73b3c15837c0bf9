//! Option sets stored in the topology document
//!
//! Cluster-wide options, per-replicaset and per-instance option sets, and
//! the layered runtime options that end up in each node's configuration.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::document::{MasterMode, Role};

/// Bucket discovery mode of the sharding router
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    #[default]
    On,
    Off,
    Once,
}

impl std::fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryMode::On => write!(f, "on"),
            DiscoveryMode::Off => write!(f, "off"),
            DiscoveryMode::Once => write!(f, "once"),
        }
    }
}

/// Node runtime options keyed by option name.
///
/// Layers are merged key by key; in a patch, a `null` value removes the key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeOptions(BTreeMap<String, Value>);

impl RuntimeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Overlay `other` on top of `self`; keys in `other` win
    pub fn overlay(&mut self, other: &RuntimeOptions) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Apply a patch: `null` values delete, everything else overwrites
    pub fn apply_patch(&mut self, patch: &RuntimeOptions) {
        for (key, value) in &patch.0 {
            if value.is_null() {
                self.0.remove(key);
            } else {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for RuntimeOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Relative capacity between availability zones: `from -> to -> weight`
pub type ZoneWeights = BTreeMap<String, BTreeMap<String, f64>>;

/// Cluster-wide options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyOptions {
    /// Total number of buckets; frozen once the cluster is bootstrapped
    pub bucket_count: u64,
    pub rebalancer_disbalance_threshold: u64,
    pub rebalancer_max_receiving: u64,
    pub rebalancer_max_sending: u64,
    pub discovery_mode: DiscoveryMode,
    /// Seconds
    pub sync_timeout: f64,
    /// Seconds
    pub collect_bucket_garbage_interval: f64,
    pub is_bootstrapped: bool,
    /// Lowest-priority layer of every instance's runtime options
    pub runtime_defaults: RuntimeOptions,
}

impl Default for TopologyOptions {
    fn default() -> Self {
        Self {
            bucket_count: 3000,
            rebalancer_disbalance_threshold: 1,
            rebalancer_max_receiving: 100,
            rebalancer_max_sending: 1,
            discovery_mode: DiscoveryMode::On,
            sync_timeout: 1.0,
            collect_bucket_garbage_interval: 0.5,
            is_bootstrapped: false,
            runtime_defaults: RuntimeOptions::new(),
        }
    }
}

/// Partial update of [`TopologyOptions`]; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyPatch {
    pub bucket_count: Option<u64>,
    pub rebalancer_disbalance_threshold: Option<u64>,
    pub rebalancer_max_receiving: Option<u64>,
    pub rebalancer_max_sending: Option<u64>,
    pub discovery_mode: Option<DiscoveryMode>,
    pub sync_timeout: Option<f64>,
    pub collect_bucket_garbage_interval: Option<f64>,
    pub is_bootstrapped: Option<bool>,
    pub runtime_defaults: Option<RuntimeOptions>,
}

impl TopologyOptions {
    /// Apply a patch without validating it
    pub fn apply(&mut self, patch: &TopologyPatch) {
        if let Some(v) = patch.bucket_count {
            self.bucket_count = v;
        }
        if let Some(v) = patch.rebalancer_disbalance_threshold {
            self.rebalancer_disbalance_threshold = v;
        }
        if let Some(v) = patch.rebalancer_max_receiving {
            self.rebalancer_max_receiving = v;
        }
        if let Some(v) = patch.rebalancer_max_sending {
            self.rebalancer_max_sending = v;
        }
        if let Some(v) = patch.discovery_mode {
            self.discovery_mode = v;
        }
        if let Some(v) = patch.sync_timeout {
            self.sync_timeout = v;
        }
        if let Some(v) = patch.collect_bucket_garbage_interval {
            self.collect_bucket_garbage_interval = v;
        }
        if let Some(v) = patch.is_bootstrapped {
            self.is_bootstrapped = v;
        }
        if let Some(runtime) = &patch.runtime_defaults {
            self.runtime_defaults.apply_patch(runtime);
        }
    }
}

/// Replicaset option set.
///
/// As input every field is optional; the resolved form returned by reads has
/// every field populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicasetOptions {
    pub master_mode: Option<MasterMode>,
    pub failover_priority: Option<Vec<String>>,
    pub weight: Option<f64>,
    pub runtime_defaults: Option<RuntimeOptions>,
}

impl ReplicasetOptions {
    pub const DEFAULT_WEIGHT: f64 = 1.0;

    /// Fill every unspecified field with its default
    pub fn resolve(&self) -> ReplicasetOptions {
        ReplicasetOptions {
            master_mode: Some(self.master_mode.unwrap_or_default()),
            failover_priority: Some(self.failover_priority.clone().unwrap_or_default()),
            weight: Some(self.weight.unwrap_or(Self::DEFAULT_WEIGHT)),
            runtime_defaults: Some(self.runtime_defaults.clone().unwrap_or_default()),
        }
    }
}

/// Instance option set, same conventions as [`ReplicasetOptions`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceOptions {
    pub advertise_uri: Option<String>,
    /// Empty string clears the zone
    pub zone: Option<String>,
    pub roles: Option<BTreeSet<Role>>,
    pub is_master: Option<bool>,
    pub runtime_overrides: Option<RuntimeOptions>,
}

impl InstanceOptions {
    /// Roles of an instance created without explicit roles
    pub fn default_roles() -> BTreeSet<Role> {
        BTreeSet::from([Role::Storage])
    }
}
