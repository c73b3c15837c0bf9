//! Topology Document
//!
//! The single versioned record describing a cluster: replicasets, their
//! instances, replication links and cluster-wide options. Every edit is a
//! method on [`TopologyDocument`] that validates its input against the
//! current snapshot; [`TopologyDocument::check_invariants`] re-checks the
//! whole document before it is written back.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::links;
use super::options::{
    InstanceOptions, ReplicasetOptions, RuntimeOptions, TopologyOptions, TopologyPatch,
    ZoneWeights,
};
use super::validate;
use crate::error::{EntityKind, Error, Result};

/// How masters are designated inside a replicaset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasterMode {
    /// Exactly one manually designated master
    #[default]
    Single,
    /// Several manually designated masters
    Multimaster,
    /// Masters chosen by an external election mechanism
    Auto,
}

impl std::fmt::Display for MasterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MasterMode::Single => write!(f, "single"),
            MasterMode::Multimaster => write!(f, "multimaster"),
            MasterMode::Auto => write!(f, "auto"),
        }
    }
}

/// Role of an instance in the sharded cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Storage,
    Router,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Storage => write!(f, "storage"),
            Role::Router => write!(f, "router"),
        }
    }
}

/// Instance status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    #[default]
    Enabled,
    /// Temporarily unreachable; kept out of derived configuration
    Disabled,
    /// Removed from the cluster; the record stays for audit
    Expelled,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::Enabled => write!(f, "enabled"),
            InstanceStatus::Disabled => write!(f, "disabled"),
            InstanceStatus::Expelled => write!(f, "expelled"),
        }
    }
}

/// Replicaset status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicasetStatus {
    #[default]
    Active,
    Expelled,
}

/// One addressable cluster node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Unique across the whole document
    pub name: String,
    pub advertise_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    pub roles: BTreeSet<Role>,
    #[serde(default)]
    pub is_master: bool,
    #[serde(default)]
    pub runtime_overrides: RuntimeOptions,
    #[serde(default)]
    pub status: InstanceStatus,
    /// Upstream instances this one replicates from
    #[serde(default)]
    pub links: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expelled_at: Option<DateTime<Utc>>,
}

impl Instance {
    pub fn is_expelled(&self) -> bool {
        self.status == InstanceStatus::Expelled
    }

    pub fn is_enabled(&self) -> bool {
        self.status == InstanceStatus::Enabled
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Resolved option set of this instance
    pub fn options(&self) -> InstanceOptions {
        InstanceOptions {
            advertise_uri: Some(self.advertise_uri.clone()),
            zone: self.zone.clone(),
            roles: Some(self.roles.clone()),
            is_master: Some(self.is_master),
            runtime_overrides: Some(self.runtime_overrides.clone()),
        }
    }
}

/// A named group of instances replicating the same dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replicaset {
    pub name: String,
    #[serde(default)]
    pub master_mode: MasterMode,
    #[serde(default)]
    pub failover_priority: Vec<String>,
    pub weight: f64,
    #[serde(default)]
    pub runtime_defaults: RuntimeOptions,
    #[serde(default)]
    pub status: ReplicasetStatus,
    #[serde(default)]
    pub instances: BTreeMap<String, Instance>,
}

impl Replicaset {
    fn new(name: &str, options: &ReplicasetOptions) -> Self {
        let resolved = options.resolve();
        Self {
            name: name.to_string(),
            master_mode: resolved.master_mode.unwrap_or_default(),
            failover_priority: resolved.failover_priority.unwrap_or_default(),
            weight: resolved.weight.unwrap_or(ReplicasetOptions::DEFAULT_WEIGHT),
            runtime_defaults: resolved.runtime_defaults.unwrap_or_default(),
            status: ReplicasetStatus::Active,
            instances: BTreeMap::new(),
        }
    }

    pub fn is_expelled(&self) -> bool {
        self.status == ReplicasetStatus::Expelled
    }

    /// Resolved option set of this replicaset
    pub fn options(&self) -> ReplicasetOptions {
        ReplicasetOptions {
            master_mode: Some(self.master_mode),
            failover_priority: Some(self.failover_priority.clone()),
            weight: Some(self.weight),
            runtime_defaults: Some(self.runtime_defaults.clone()),
        }
    }

    /// Instances that have not been expelled
    pub fn live_instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values().filter(|i| !i.is_expelled())
    }

    /// Non-expelled instances flagged as master
    pub fn masters(&self) -> impl Iterator<Item = &Instance> {
        self.live_instances().filter(|i| i.is_master)
    }

    /// Failover order: explicit priority first, remaining live instances by name
    pub fn failover_order(&self) -> Vec<&str> {
        let mut order: Vec<&str> = self
            .failover_priority
            .iter()
            .filter(|name| self.instances.get(*name).is_some_and(|i| !i.is_expelled()))
            .map(String::as_str)
            .collect();
        for instance in self.live_instances() {
            if !order.contains(&instance.name.as_str()) {
                order.push(&instance.name);
            }
        }
        order
    }
}

/// The versioned topology of one cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyDocument {
    /// Assigned by the store; overwritten with the stored revision on every read
    #[serde(default)]
    pub revision: u64,
    pub name: String,
    #[serde(default)]
    pub options: TopologyOptions,
    #[serde(default)]
    pub replicasets: BTreeMap<String, Replicaset>,
    #[serde(default)]
    pub weights: ZoneWeights,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TopologyDocument {
    /// Create an empty document
    pub fn new(name: impl Into<String>, options: TopologyOptions) -> Self {
        Self {
            revision: 0,
            name: name.into(),
            options,
            replicasets: BTreeMap::new(),
            weights: ZoneWeights::new(),
            updated_at: None,
        }
    }

    // ============ Lookups ============

    /// All instances with their owning replicaset, expelled ones included
    pub fn instances(&self) -> impl Iterator<Item = (&Replicaset, &Instance)> {
        self.replicasets
            .values()
            .flat_map(|rs| rs.instances.values().map(move |i| (rs, i)))
    }

    /// Name of the replicaset owning `instance`
    pub fn locate(&self, instance: &str) -> Option<&str> {
        self.replicasets
            .values()
            .find(|rs| rs.instances.contains_key(instance))
            .map(|rs| rs.name.as_str())
    }

    pub fn replicaset(&self, name: &str) -> Result<&Replicaset> {
        self.replicasets
            .get(name)
            .ok_or_else(|| Error::not_found(EntityKind::Replicaset, name))
    }

    pub(crate) fn replicaset_mut(&mut self, name: &str) -> Result<&mut Replicaset> {
        self.replicasets
            .get_mut(name)
            .ok_or_else(|| Error::not_found(EntityKind::Replicaset, name))
    }

    /// Look up an instance together with its replicaset
    pub fn instance(&self, name: &str) -> Result<(&Replicaset, &Instance)> {
        self.instances()
            .find(|(_, i)| i.name == name)
            .ok_or_else(|| Error::not_found(EntityKind::Instance, name))
    }

    pub(crate) fn instance_mut(&mut self, name: &str) -> Result<&mut Instance> {
        self.replicasets
            .values_mut()
            .find_map(|rs| rs.instances.get_mut(name))
            .ok_or_else(|| Error::not_found(EntityKind::Instance, name))
    }

    // ============ Edits ============

    /// Create a replicaset
    pub fn add_replicaset(&mut self, name: &str, options: &ReplicasetOptions) -> Result<()> {
        validate::require_identifier("replicaset name", name)?;
        if !validate::check_unique(self, EntityKind::Replicaset, name) {
            return Err(Error::conflict(EntityKind::Replicaset, name));
        }
        if let Some(weight) = options.weight {
            validate::check_weight("weight", weight)?;
        }

        let replicaset = Replicaset::new(name, options);
        // A fresh replicaset has no members to prioritise
        validate::check_failover_priority(&replicaset, &replicaset.failover_priority)?;
        self.replicasets.insert(name.to_string(), replicaset);
        Ok(())
    }

    /// Add an instance to an existing replicaset
    pub fn add_instance(
        &mut self,
        replicaset: &str,
        name: &str,
        options: &InstanceOptions,
    ) -> Result<()> {
        validate::require_identifier("instance name", name)?;
        if !validate::check_unique(self, EntityKind::Instance, name) {
            return Err(Error::conflict(EntityKind::Instance, name));
        }

        let rs = self.replicaset_mut(replicaset)?;
        if rs.is_expelled() {
            return Err(Error::validation(
                "replicaset",
                format!("replicaset '{}' is expelled", replicaset),
            ));
        }

        let advertise_uri = options
            .advertise_uri
            .clone()
            .ok_or_else(|| Error::validation("advertise_uri", "required for a new instance"))?;
        validate::check_uri(&advertise_uri)?;

        let roles = options
            .roles
            .clone()
            .unwrap_or_else(InstanceOptions::default_roles);
        if roles.is_empty() {
            return Err(Error::validation("roles", "at least one role is required"));
        }

        let is_master = options.is_master.unwrap_or(false);
        if is_master {
            check_can_become_master(rs, name)?;
        }

        rs.instances.insert(
            name.to_string(),
            Instance {
                name: name.to_string(),
                advertise_uri,
                zone: options.zone.clone().filter(|z| !z.is_empty()),
                roles,
                is_master,
                runtime_overrides: options.runtime_overrides.clone().unwrap_or_default(),
                status: InstanceStatus::Enabled,
                links: BTreeSet::new(),
                expelled_at: None,
            },
        );
        Ok(())
    }

    /// Change instance properties; unset fields are left untouched
    pub fn update_instance(&mut self, name: &str, options: &InstanceOptions) -> Result<()> {
        let owner = self
            .locate(name)
            .ok_or_else(|| Error::not_found(EntityKind::Instance, name))?
            .to_string();
        let rs = self.replicaset_mut(&owner)?;

        if options.is_master == Some(true) {
            check_can_become_master(rs, name)?;
        }

        let instance = rs
            .instances
            .get_mut(name)
            .ok_or_else(|| Error::not_found(EntityKind::Instance, name))?;
        if instance.is_expelled() {
            return Err(Error::validation(
                "instance",
                format!("instance '{}' is expelled", name),
            ));
        }

        if let Some(uri) = &options.advertise_uri {
            validate::check_uri(uri)?;
            instance.advertise_uri = uri.clone();
        }
        if let Some(zone) = &options.zone {
            instance.zone = Some(zone.clone()).filter(|z| !z.is_empty());
        }
        if let Some(roles) = &options.roles {
            if roles.is_empty() {
                return Err(Error::validation("roles", "at least one role is required"));
            }
            instance.roles = roles.clone();
        }
        if let Some(is_master) = options.is_master {
            instance.is_master = is_master;
        }
        if let Some(runtime) = &options.runtime_overrides {
            instance.runtime_overrides.apply_patch(runtime);
        }
        Ok(())
    }

    /// Change replicaset properties; unset fields are left untouched
    pub fn update_replicaset(&mut self, name: &str, options: &ReplicasetOptions) -> Result<()> {
        let rs = self.replicaset_mut(name)?;
        if rs.is_expelled() {
            return Err(Error::validation(
                "replicaset",
                format!("replicaset '{}' is expelled", name),
            ));
        }

        if let Some(mode) = options.master_mode {
            validate::check_master_mode_transition(rs, mode)?;
            rs.master_mode = mode;
        }
        if let Some(priority) = &options.failover_priority {
            validate::check_failover_priority(rs, priority)?;
            rs.failover_priority = priority.clone();
        }
        if let Some(weight) = options.weight {
            validate::check_weight("weight", weight)?;
            rs.weight = weight;
        }
        if let Some(runtime) = &options.runtime_defaults {
            rs.runtime_defaults.apply_patch(runtime);
        }
        Ok(())
    }

    /// Change cluster-wide options
    pub fn update_options(&mut self, patch: &TopologyPatch) -> Result<()> {
        let old = self.options.clone();
        self.options.apply(patch);
        validate::check_topology_options(&self.options)?;
        validate::check_immutable_options(&old, &self.options)
    }

    /// Set the relative weight between two zones
    pub fn set_zone_weight(&mut self, from: &str, to: &str, weight: f64) -> Result<()> {
        if from.is_empty() || to.is_empty() {
            return Err(Error::validation("zone", "zone name cannot be empty"));
        }
        validate::check_weight("zone weight", weight)?;
        self.weights
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string(), weight);
        Ok(())
    }

    /// Soft-delete an instance.
    ///
    /// The record is kept with `status = expelled`; it loses master status,
    /// its failover slot and every inbound replication link.
    pub fn expel_instance(&mut self, name: &str) -> Result<()> {
        let owner = self
            .locate(name)
            .ok_or_else(|| Error::not_found(EntityKind::Instance, name))?
            .to_string();
        let rs = self.replicaset_mut(&owner)?;
        let instance = rs
            .instances
            .get_mut(name)
            .ok_or_else(|| Error::not_found(EntityKind::Instance, name))?;
        if instance.is_expelled() {
            return Ok(());
        }

        instance.status = InstanceStatus::Expelled;
        instance.is_master = false;
        instance.expelled_at = Some(Utc::now());
        rs.failover_priority.retain(|n| n != name);
        self.drop_links_to(name);
        Ok(())
    }

    /// Soft-delete a replicaset; only allowed once all its instances are expelled
    pub fn expel_replicaset(&mut self, name: &str) -> Result<()> {
        let rs = self.replicaset_mut(name)?;
        let live: Vec<&str> = rs.live_instances().map(|i| i.name.as_str()).collect();
        if !live.is_empty() {
            return Err(Error::validation(
                "replicaset",
                format!(
                    "replicaset '{}' still has active instances: {}",
                    name,
                    live.join(", ")
                ),
            ));
        }
        rs.status = ReplicasetStatus::Expelled;
        rs.failover_priority.clear();
        Ok(())
    }

    /// Toggle an instance between enabled and disabled
    pub fn set_instance_status(&mut self, name: &str, status: InstanceStatus) -> Result<()> {
        if status == InstanceStatus::Expelled {
            return Err(Error::validation(
                "status",
                "use instance deletion to expel an instance",
            ));
        }
        let instance = self.instance_mut(name)?;
        if instance.is_expelled() {
            return Err(Error::validation(
                "status",
                format!("instance '{}' is expelled", name),
            ));
        }
        instance.status = status;
        Ok(())
    }

    // ============ Invariants ============

    /// Check every document-level invariant
    pub fn check_invariants(&self) -> Result<()> {
        let mut owners: HashMap<&str, &str> = HashMap::new();

        for (key, rs) in &self.replicasets {
            if key != &rs.name {
                return Err(Error::validation(
                    "replicaset name",
                    format!("entry '{}' is stored under key '{}'", rs.name, key),
                ));
            }
            validate::require_identifier("replicaset name", &rs.name)?;
            validate::check_weight("weight", rs.weight)?;
            validate::check_failover_priority(rs, &rs.failover_priority)?;

            for (key, instance) in &rs.instances {
                if key != &instance.name {
                    return Err(Error::validation(
                        "instance name",
                        format!("entry '{}' is stored under key '{}'", instance.name, key),
                    ));
                }
                validate::require_identifier("instance name", &instance.name)?;
                if let Some(other) = owners.insert(&instance.name, &rs.name) {
                    return Err(Error::validation(
                        "instance name",
                        format!(
                            "'{}' appears in replicasets '{}' and '{}'",
                            instance.name, other, rs.name
                        ),
                    ));
                }
                if instance.is_expelled() && instance.is_master {
                    return Err(Error::validation(
                        "is_master",
                        format!("expelled instance '{}' cannot be master", instance.name),
                    ));
                }
            }

            if rs.master_mode == MasterMode::Single {
                let masters: Vec<&str> = rs.masters().map(|i| i.name.as_str()).collect();
                if masters.len() > 1 {
                    return Err(Error::validation(
                        "is_master",
                        format!(
                            "replicaset '{}' is in single master mode but has masters {}",
                            rs.name,
                            masters.join(", ")
                        ),
                    ));
                }
            }
        }

        for (from, targets) in &self.weights {
            for (to, weight) in targets {
                validate::check_weight(&format!("weights.{}.{}", from, to), *weight)?;
            }
        }

        links::check_links(self)
    }
}

/// Reject a second master in a single-master replicaset
fn check_can_become_master(rs: &Replicaset, candidate: &str) -> Result<()> {
    if rs.master_mode != MasterMode::Single {
        return Ok(());
    }
    match rs.masters().find(|m| m.name != candidate) {
        Some(current) => Err(Error::validation(
            "is_master",
            format!(
                "replicaset '{}' already has master '{}' in single master mode",
                rs.name, current.name
            ),
        )),
        None => Ok(()),
    }
}
