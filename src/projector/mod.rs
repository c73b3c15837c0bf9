//! Config Projector
//!
//! Pure functions deriving node and sharding configuration from a topology
//! snapshot. Nothing here touches the store, so any independently fetched
//! snapshot can be projected without coordination.

mod instance;
mod sharding;

pub use instance::{get_instance_conf, InstanceConf};
pub use sharding::{
    get_replicaset_masters, get_routers, get_sharding_config, get_storages, ClusterMember,
    ShardConfig, ShardReplica, ShardingConfig,
};
