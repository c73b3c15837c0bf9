//! Topology Module
//!
//! The typed schema of the topology document, its edits and the rules
//! they have to respect.

mod document;
mod links;
mod options;
pub mod validate;

pub use document::{
    Instance, InstanceStatus, MasterMode, Replicaset, ReplicasetStatus, Role, TopologyDocument,
};
pub use options::{
    DiscoveryMode, InstanceOptions, ReplicasetOptions, RuntimeOptions, TopologyOptions,
    TopologyPatch, ZoneWeights,
};
pub use validate::validate_identifier;
