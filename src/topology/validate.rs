//! Validation rules
//!
//! Pure checks shared by the document edits and the mutation loop.

use std::collections::HashSet;

use super::document::{MasterMode, Replicaset, TopologyDocument};
use super::options::TopologyOptions;
use crate::error::{EntityKind, Error, Result};

/// Maximum identifier length
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// True iff `s` matches `[A-Za-z_][A-Za-z0-9_-]*` and is at most 63 bytes
pub fn validate_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let first_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    first_ok
        && s.len() <= MAX_IDENTIFIER_LEN
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// [`validate_identifier`] as a `Result`
pub fn require_identifier(field: &str, s: &str) -> Result<()> {
    if validate_identifier(s) {
        Ok(())
    } else {
        Err(Error::validation(
            field,
            format!(
                "'{}' must match [A-Za-z_][A-Za-z0-9_-]* and be at most {} characters",
                s, MAX_IDENTIFIER_LEN
            ),
        ))
    }
}

/// True iff no replicaset (or instance) in `doc` is already called `name`.
///
/// Expelled entries keep their names reserved.
pub fn check_unique(doc: &TopologyDocument, kind: EntityKind, name: &str) -> bool {
    match kind {
        EntityKind::Replicaset => !doc.replicasets.contains_key(name),
        EntityKind::Instance => doc.locate(name).is_none(),
        EntityKind::Topology | EntityKind::Link => true,
    }
}

/// Switching to `single` requires at most one current master
pub fn check_master_mode_transition(replicaset: &Replicaset, new_mode: MasterMode) -> Result<()> {
    if new_mode != MasterMode::Single || replicaset.master_mode == MasterMode::Single {
        return Ok(());
    }
    let masters: Vec<&str> = replicaset.masters().map(|i| i.name.as_str()).collect();
    if masters.len() > 1 {
        return Err(Error::validation(
            "master_mode",
            format!(
                "cannot switch replicaset '{}' to single master mode with masters {}",
                replicaset.name,
                masters.join(", ")
            ),
        ));
    }
    Ok(())
}

/// Reject changes to options frozen by bootstrap
pub fn check_immutable_options(old: &TopologyOptions, new: &TopologyOptions) -> Result<()> {
    if !old.is_bootstrapped {
        return Ok(());
    }
    if new.bucket_count != old.bucket_count {
        return Err(Error::validation(
            "bucket_count",
            format!(
                "cannot change from {} to {} after the cluster is bootstrapped",
                old.bucket_count, new.bucket_count
            ),
        ));
    }
    if !new.is_bootstrapped {
        return Err(Error::validation(
            "is_bootstrapped",
            "a bootstrapped cluster cannot be reset",
        ));
    }
    Ok(())
}

/// Sanity checks on cluster-wide option values
pub fn check_topology_options(options: &TopologyOptions) -> Result<()> {
    if options.bucket_count == 0 {
        return Err(Error::validation("bucket_count", "must be positive"));
    }
    if options.rebalancer_max_sending == 0 {
        return Err(Error::validation("rebalancer_max_sending", "must be positive"));
    }
    check_seconds("sync_timeout", options.sync_timeout)?;
    check_seconds(
        "collect_bucket_garbage_interval",
        options.collect_bucket_garbage_interval,
    )
}

fn check_seconds(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::validation(field, format!("must be a positive number of seconds, got {}", value)))
    }
}

/// Weights are finite and non-negative
pub fn check_weight(field: &str, weight: f64) -> Result<()> {
    if weight.is_finite() && weight >= 0.0 {
        Ok(())
    } else {
        Err(Error::validation(field, format!("must be a non-negative number, got {}", weight)))
    }
}

/// An advertise URI is `host:port` or any non-blank string without whitespace
pub fn check_uri(uri: &str) -> Result<()> {
    if uri.is_empty() || uri.chars().any(char::is_whitespace) {
        return Err(Error::validation(
            "advertise_uri",
            format!("'{}' is not a valid URI", uri),
        ));
    }
    Ok(())
}

/// Failover priority lists distinct, non-expelled members of the replicaset
pub fn check_failover_priority(replicaset: &Replicaset, priority: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for name in priority {
        if !seen.insert(name.as_str()) {
            return Err(Error::validation(
                "failover_priority",
                format!("'{}' listed more than once", name),
            ));
        }
        match replicaset.instances.get(name) {
            Some(instance) if !instance.is_expelled() => {}
            Some(_) => {
                return Err(Error::validation(
                    "failover_priority",
                    format!("instance '{}' is expelled", name),
                ))
            }
            None => {
                return Err(Error::validation(
                    "failover_priority",
                    format!("'{}' is not a member of replicaset '{}'", name, replicaset.name),
                ))
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::options::{InstanceOptions, ReplicasetOptions};
    use rand::Rng;

    const FIRST: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ_";
    const REST: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_-";

    fn random_identifier(rng: &mut impl Rng) -> String {
        let len = rng.gen_range(0..MAX_IDENTIFIER_LEN);
        let mut s = String::with_capacity(len + 1);
        s.push(FIRST[rng.gen_range(0..FIRST.len())] as char);
        for _ in 0..len {
            s.push(REST[rng.gen_range(0..REST.len())] as char);
        }
        s
    }

    #[test]
    fn test_generated_identifiers_accepted() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let id = random_identifier(&mut rng);
            assert!(validate_identifier(&id), "{:?} should be valid", id);
        }
    }

    #[test]
    fn test_identifier_boundaries() {
        assert!(validate_identifier("a"));
        assert!(validate_identifier("_"));
        assert!(validate_identifier("storage-1_a"));
        assert!(validate_identifier(&"x".repeat(63)));

        assert!(!validate_identifier(""));
        assert!(!validate_identifier("1storage"));
        assert!(!validate_identifier("-storage"));
        assert!(!validate_identifier("rs/1"));
        assert!(!validate_identifier("has space"));
        assert!(!validate_identifier("ünicode"));
        assert!(!validate_identifier(&"x".repeat(64)));
    }

    #[test]
    fn test_immutable_bucket_count() {
        let old = TopologyOptions {
            bucket_count: 3000,
            is_bootstrapped: true,
            ..Default::default()
        };
        let changed = TopologyOptions {
            bucket_count: 4000,
            ..old.clone()
        };
        assert!(matches!(
            check_immutable_options(&old, &changed),
            Err(Error::Validation { ref field, .. }) if field == "bucket_count"
        ));

        let unbootstrapped = TopologyOptions {
            is_bootstrapped: false,
            ..old.clone()
        };
        assert!(check_immutable_options(&old, &unbootstrapped).is_err());

        // Before bootstrap anything goes, including the bootstrap flip itself
        let fresh = TopologyOptions::default();
        let bootstrapped = TopologyOptions {
            bucket_count: 30000,
            is_bootstrapped: true,
            ..Default::default()
        };
        assert!(check_immutable_options(&fresh, &bootstrapped).is_ok());
    }

    #[test]
    fn test_check_unique() {
        let mut doc = TopologyDocument::new("t", TopologyOptions::default());
        doc.add_replicaset("rs1", &ReplicasetOptions::default()).unwrap();
        doc.add_instance(
            "rs1",
            "i1",
            &InstanceOptions {
                advertise_uri: Some("h:1".into()),
                ..Default::default()
            },
        )
        .unwrap();

        assert!(!check_unique(&doc, EntityKind::Replicaset, "rs1"));
        assert!(check_unique(&doc, EntityKind::Replicaset, "rs2"));
        assert!(!check_unique(&doc, EntityKind::Instance, "i1"));
        assert!(check_unique(&doc, EntityKind::Instance, "i2"));
        // Separate namespaces
        assert!(check_unique(&doc, EntityKind::Instance, "rs1"));
    }

    #[test]
    fn test_weights_and_timeouts() {
        assert!(check_weight("weight", 0.0).is_ok());
        assert!(check_weight("weight", -1.0).is_err());
        assert!(check_weight("weight", f64::NAN).is_err());
        assert!(check_topology_options(&TopologyOptions::default()).is_ok());
        assert!(check_topology_options(&TopologyOptions {
            sync_timeout: 0.0,
            ..Default::default()
        })
        .is_err());
        assert!(check_uri("").is_err());
        assert!(check_uri("localhost:3301").is_ok());
    }
}
