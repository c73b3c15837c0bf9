//! Cluster-wide projections: role listings and the sharding configuration
//! consumed by the data-plane runtime.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::topology::{DiscoveryMode, Role, TopologyDocument, ZoneWeights};

/// An instance as seen by routing and storage listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub name: String,
    pub uri: String,
    pub is_master: bool,
    pub replicaset_name: String,
}

/// One replica inside a shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardReplica {
    pub uri: String,
    pub name: String,
    pub is_master: bool,
    pub zone: Option<String>,
}

/// One shard (replicaset) of the sharding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardConfig {
    pub weight: f64,
    pub replicas: BTreeMap<String, ShardReplica>,
}

/// Startup configuration of the sharding runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardingConfig {
    pub bucket_count: u64,
    pub rebalancer_disbalance_threshold: u64,
    pub rebalancer_max_receiving: u64,
    pub rebalancer_max_sending: u64,
    pub discovery_mode: DiscoveryMode,
    pub sync_timeout: f64,
    pub collect_bucket_garbage_interval: f64,
    pub weights: ZoneWeights,
    pub sharding: BTreeMap<String, ShardConfig>,
}

fn members_with_role(doc: &TopologyDocument, role: Role) -> Vec<ClusterMember> {
    let mut members: Vec<ClusterMember> = doc
        .instances()
        .filter(|(rs, i)| !rs.is_expelled() && i.is_enabled() && i.has_role(role))
        .map(|(rs, i)| ClusterMember {
            name: i.name.clone(),
            uri: i.advertise_uri.clone(),
            is_master: i.is_master,
            replicaset_name: rs.name.clone(),
        })
        .collect();
    members.sort_by(|a, b| a.name.cmp(&b.name));
    members
}

/// Enabled router instances, sorted by name
pub fn get_routers(doc: &TopologyDocument) -> Vec<ClusterMember> {
    members_with_role(doc, Role::Router)
}

/// Enabled storage instances, sorted by name
pub fn get_storages(doc: &TopologyDocument) -> Vec<ClusterMember> {
    members_with_role(doc, Role::Storage)
}

/// Enabled masters of every active replicaset
pub fn get_replicaset_masters(doc: &TopologyDocument) -> BTreeMap<String, Vec<String>> {
    doc.replicasets
        .values()
        .filter(|rs| !rs.is_expelled())
        .map(|rs| {
            let masters = rs
                .masters()
                .filter(|i| i.is_enabled())
                .map(|i| i.name.clone())
                .collect();
            (rs.name.clone(), masters)
        })
        .collect()
}

/// Build the sharding configuration from enabled instances.
///
/// Replicasets without any enabled instance are left out.
pub fn get_sharding_config(doc: &TopologyDocument) -> ShardingConfig {
    let sharding = doc
        .replicasets
        .values()
        .filter(|rs| !rs.is_expelled())
        .filter_map(|rs| {
            let replicas: BTreeMap<String, ShardReplica> = rs
                .instances
                .values()
                .filter(|i| i.is_enabled())
                .map(|i| {
                    (
                        i.name.clone(),
                        ShardReplica {
                            uri: i.advertise_uri.clone(),
                            name: i.name.clone(),
                            is_master: i.is_master,
                            zone: i.zone.clone(),
                        },
                    )
                })
                .collect();
            if replicas.is_empty() {
                return None;
            }
            Some((
                rs.name.clone(),
                ShardConfig {
                    weight: rs.weight,
                    replicas,
                },
            ))
        })
        .collect();

    let options = &doc.options;
    ShardingConfig {
        bucket_count: options.bucket_count,
        rebalancer_disbalance_threshold: options.rebalancer_disbalance_threshold,
        rebalancer_max_receiving: options.rebalancer_max_receiving,
        rebalancer_max_sending: options.rebalancer_max_sending,
        discovery_mode: options.discovery_mode,
        sync_timeout: options.sync_timeout,
        collect_bucket_garbage_interval: options.collect_bucket_garbage_interval,
        weights: doc.weights.clone(),
        sharding,
    }
}
