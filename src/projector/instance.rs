//! Per-instance runtime configuration

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::topology::{InstanceStatus, Role, RuntimeOptions, TopologyDocument};

/// Configuration a single node should run with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConf {
    pub name: String,
    pub replicaset_name: String,
    pub advertise_uri: String,
    /// Address the node listens on
    pub listen: String,
    pub zone: Option<String>,
    pub roles: BTreeSet<Role>,
    pub is_master: bool,
    pub read_only: bool,
    pub status: InstanceStatus,
    /// URIs of enabled upstreams, ordered by upstream name
    pub replication: Vec<String>,
    pub failover_priority: Vec<String>,
    /// topology defaults < replicaset defaults < instance overrides
    pub runtime: RuntimeOptions,
}

/// Build the runtime configuration of `instance_name`.
///
/// Expelled instances still resolve (with `status = expelled`) so their
/// record can be inspected.
pub fn get_instance_conf(doc: &TopologyDocument, instance_name: &str) -> Result<InstanceConf> {
    let (rs, instance) = doc.instance(instance_name)?;

    let mut runtime = doc.options.runtime_defaults.clone();
    runtime.overlay(&rs.runtime_defaults);
    runtime.overlay(&instance.runtime_overrides);

    let replication = doc
        .upstreams(instance_name)?
        .into_iter()
        .filter(|upstream| upstream.is_enabled())
        .map(|upstream| upstream.advertise_uri.clone())
        .collect();

    Ok(InstanceConf {
        name: instance.name.clone(),
        replicaset_name: rs.name.clone(),
        advertise_uri: instance.advertise_uri.clone(),
        listen: instance.advertise_uri.clone(),
        zone: instance.zone.clone(),
        roles: instance.roles.clone(),
        is_master: instance.is_master,
        read_only: !instance.is_master,
        status: instance.status,
        replication,
        failover_priority: rs.failover_order().into_iter().map(str::to_string).collect(),
        runtime,
    })
}
