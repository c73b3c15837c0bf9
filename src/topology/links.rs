//! Replication link graph
//!
//! A link `instance -> upstream` means `instance` replicates from
//! `upstream`. Links never leave a replicaset and never point at the
//! instance itself; cycles between different instances are normal
//! (master-master pairs).

use super::document::{Instance, TopologyDocument};
use crate::error::{EntityKind, Error, Result};

impl TopologyDocument {
    /// Add a replication link; adding an existing link is a no-op
    pub fn add_link(&mut self, instance: &str, upstream: &str) -> Result<()> {
        if instance == upstream {
            return Err(Error::validation(
                "links",
                format!("instance '{}' cannot replicate from itself", instance),
            ));
        }

        let (rs, downstream) = self.instance(instance)?;
        let (upstream_rs, target) = self.instance(upstream)?;
        if rs.name != upstream_rs.name {
            return Err(Error::validation(
                "links",
                format!(
                    "upstream '{}' belongs to replicaset '{}', not '{}'",
                    upstream, upstream_rs.name, rs.name
                ),
            ));
        }
        for endpoint in [downstream, target] {
            if endpoint.is_expelled() {
                return Err(Error::validation(
                    "links",
                    format!("instance '{}' is expelled", endpoint.name),
                ));
            }
        }

        self.instance_mut(instance)?.links.insert(upstream.to_string());
        Ok(())
    }

    /// Remove a replication link
    pub fn remove_link(&mut self, instance: &str, upstream: &str) -> Result<()> {
        let downstream = self.instance_mut(instance)?;
        if downstream.links.remove(upstream) {
            Ok(())
        } else {
            Err(Error::not_found(
                EntityKind::Link,
                format!("{} -> {}", instance, upstream),
            ))
        }
    }

    /// Drop every link pointing at `name`
    pub(crate) fn drop_links_to(&mut self, name: &str) {
        for rs in self.replicasets.values_mut() {
            for instance in rs.instances.values_mut() {
                instance.links.remove(name);
            }
        }
    }

    /// Upstream instances of `instance`, in link order
    pub fn upstreams(&self, instance: &str) -> Result<Vec<&Instance>> {
        let (rs, downstream) = self.instance(instance)?;
        Ok(downstream
            .links
            .iter()
            .filter_map(|name| rs.instances.get(name))
            .collect())
    }
}

/// Every link stays inside its replicaset and is not a self-loop
pub(crate) fn check_links(doc: &TopologyDocument) -> Result<()> {
    for (rs, instance) in doc.instances() {
        for upstream in &instance.links {
            if upstream == &instance.name {
                return Err(Error::validation(
                    "links",
                    format!("instance '{}' links to itself", instance.name),
                ));
            }
            if !rs.instances.contains_key(upstream) {
                return Err(Error::validation(
                    "links",
                    format!(
                        "instance '{}' links to '{}' outside replicaset '{}'",
                        instance.name, upstream, rs.name
                    ),
                ));
            }
        }
    }
    Ok(())
}
