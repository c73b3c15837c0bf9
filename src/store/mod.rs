//! Topology Store
//!
//! The only gateway for changing a topology document. Every write is a
//! read-modify-write round against the backend's compare-and-swap:
//!
//! 1. read the document and its revision,
//! 2. apply the transform to a private copy and validate the result,
//! 3. write it back conditioned on the revision read in step 1,
//! 4. on a revision mismatch re-read and re-apply, with backoff.
//!
//! There is no in-process locking; any number of handles, in any number of
//! processes, may target the same document.

mod retry;

pub use retry::{compute_backoff_with_jitter, BackoffStep, RetryPolicy};

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{EntityKind, Error, Result};
use crate::kv::{KvError, KvStore, Versioned};
use crate::projector::{self, ClusterMember, InstanceConf, ShardingConfig};
use crate::topology::{
    validate, InstanceOptions, InstanceStatus, ReplicasetOptions, TopologyDocument,
    TopologyOptions, TopologyPatch,
};
use retry::Backoff;

/// Default key prefix for topology documents
pub const DEFAULT_KEY_PREFIX: &str = "/wolftopo/";

/// Backend-facing options of a store handle
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Documents live under `{key_prefix}{name}`
    pub key_prefix: String,
    pub retry: RetryPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Handle bound to one topology document
#[derive(Clone)]
pub struct TopologyStore {
    backend: Arc<dyn KvStore>,
    name: String,
    key: String,
    policy: RetryPolicy,
}

impl std::fmt::Debug for TopologyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyStore")
            .field("name", &self.name)
            .field("key", &self.key)
            .finish()
    }
}

impl TopologyStore {
    /// Open a handle, creating an empty document if none exists yet.
    ///
    /// Idempotent: an existing document is reused as is and
    /// `bootstrap_options` is ignored.
    pub async fn open(
        backend: Arc<dyn KvStore>,
        name: &str,
        options: StoreOptions,
        bootstrap_options: TopologyOptions,
    ) -> Result<Self> {
        validate::require_identifier("topology name", name)?;
        validate::check_topology_options(&bootstrap_options)?;

        let store = Self {
            backend,
            name: name.to_string(),
            key: format!("{}{}", options.key_prefix, name),
            policy: options.retry,
        };

        if let Some(doc) = store.read().await? {
            debug!(topology = %store.name, revision = doc.revision, "using existing topology document");
            return Ok(store);
        }

        let doc = TopologyDocument::new(name, bootstrap_options);
        let value = serde_json::to_string(&doc)?;
        let created = store
            .with_transport_retry("bootstrap", || {
                store.backend.put(&store.key, value.clone(), None)
            })
            .await;

        match created {
            Ok(revision) => {
                info!(topology = %store.name, revision, "bootstrapped empty topology document")
            }
            Err(KvError::RevisionMismatch { .. }) => {
                debug!(topology = %store.name, "topology document created concurrently, reusing it")
            }
            Err(e) => return Err(e.into()),
        }
        Ok(store)
    }

    /// Name of the topology this handle is bound to
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend key of the document
    pub fn key(&self) -> &str {
        &self.key
    }

    // ============ Mutation loop ============

    /// Apply `transform` through the compare-and-swap loop.
    ///
    /// The transform edits a fresh copy of the current document and may run
    /// several times if other writers interfere. A transform error aborts
    /// immediately without writing. Uses the policy deadline when one is
    /// configured.
    pub async fn mutate<F>(&self, transform: F) -> Result<TopologyDocument>
    where
        F: FnMut(&mut TopologyDocument) -> Result<()> + Send,
    {
        self.execute(transform, true).await
    }

    /// [`mutate`](Self::mutate) bounded by an explicit deadline.
    ///
    /// On expiry the document is left as it was before the call.
    pub async fn mutate_with_deadline<F>(
        &self,
        transform: F,
        deadline: Duration,
    ) -> Result<TopologyDocument>
    where
        F: FnMut(&mut TopologyDocument) -> Result<()> + Send,
    {
        self.run_with_deadline(transform, true, deadline).await
    }

    async fn execute<F>(&self, transform: F, check_graph: bool) -> Result<TopologyDocument>
    where
        F: FnMut(&mut TopologyDocument) -> Result<()> + Send,
    {
        match self.policy.deadline {
            Some(deadline) => self.run_with_deadline(transform, check_graph, deadline).await,
            None => self.run_mutation(transform, check_graph).await,
        }
    }

    async fn run_with_deadline<F>(
        &self,
        transform: F,
        check_graph: bool,
        deadline: Duration,
    ) -> Result<TopologyDocument>
    where
        F: FnMut(&mut TopologyDocument) -> Result<()> + Send,
    {
        match tokio::time::timeout(deadline, self.run_mutation(transform, check_graph)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(topology = %self.name, ?deadline, "topology mutation deadline exceeded");
                Err(Error::DeadlineExceeded(deadline))
            }
        }
    }

    async fn run_mutation<F>(&self, mut transform: F, check_graph: bool) -> Result<TopologyDocument>
    where
        F: FnMut(&mut TopologyDocument) -> Result<()> + Send,
    {
        let mut backoff = Backoff::new(&self.policy);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let current = self.fetch().await?;

            let mut next = current.clone();
            transform(&mut next)?;
            validate::check_immutable_options(&current.options, &next.options)?;
            if check_graph {
                next.check_invariants()?;
            }

            if next == current {
                debug!(topology = %self.name, revision = current.revision, "mutation left document unchanged");
                return Ok(current);
            }

            next.revision = current.revision + 1;
            next.updated_at = Some(Utc::now());
            let value = serde_json::to_string(&next)?;

            let written = self
                .with_transport_retry("put", || {
                    self.backend.put(&self.key, value.clone(), Some(current.revision))
                })
                .await;

            match written {
                Ok(revision) => {
                    next.revision = revision;
                    debug!(topology = %self.name, revision, attempt, "topology document updated");
                    return Ok(next);
                }
                Err(KvError::RevisionMismatch { actual, .. }) => {
                    if attempt >= self.policy.max_attempts {
                        warn!(topology = %self.name, attempts = attempt, "giving up after repeated revision conflicts");
                        return Err(Error::ConcurrencyExhausted { attempts: attempt });
                    }
                    let delay = backoff.next_delay();
                    debug!(
                        topology = %self.name,
                        attempt,
                        expected = current.revision,
                        actual = ?actual,
                        backoff_ms = delay.as_millis() as u64,
                        "revision conflict, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Run one backend call, retrying transport failures only
    async fn with_transport_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        mut call: F,
    ) -> std::result::Result<T, KvError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, KvError>>,
    {
        let mut backoff = Backoff::new(&self.policy);
        let mut failures = 0u32;

        loop {
            match call().await {
                Err(KvError::Unavailable(reason)) => {
                    failures += 1;
                    if failures > self.policy.transport_retries {
                        warn!(topology = %self.name, operation, failures, %reason, "store unavailable");
                        return Err(KvError::Unavailable(reason));
                    }
                    let delay = backoff.next_delay();
                    debug!(topology = %self.name, operation, failures, %reason, "transport failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn read(&self) -> Result<Option<TopologyDocument>> {
        let stored = self
            .with_transport_retry("get", || self.backend.get(&self.key))
            .await?;
        stored.map(decode).transpose()
    }

    async fn fetch(&self) -> Result<TopologyDocument> {
        self.read()
            .await?
            .ok_or_else(|| Error::not_found(EntityKind::Topology, &self.name))
    }

    // ============ Named operations ============

    pub async fn new_replicaset(
        &self,
        name: &str,
        options: ReplicasetOptions,
    ) -> Result<TopologyDocument> {
        let doc = self.mutate(|doc| doc.add_replicaset(name, &options)).await?;
        info!(topology = %self.name, replicaset = name, revision = doc.revision, "replicaset created");
        Ok(doc)
    }

    pub async fn new_instance(
        &self,
        replicaset: &str,
        name: &str,
        options: InstanceOptions,
    ) -> Result<TopologyDocument> {
        let doc = self
            .mutate(|doc| doc.add_instance(replicaset, name, &options))
            .await?;
        info!(topology = %self.name, replicaset, instance = name, revision = doc.revision, "instance added");
        Ok(doc)
    }

    pub async fn new_instance_link(&self, instance: &str, upstream: &str) -> Result<TopologyDocument> {
        self.mutate(|doc| doc.add_link(instance, upstream)).await
    }

    pub async fn delete_instance_link(
        &self,
        instance: &str,
        upstream: &str,
    ) -> Result<TopologyDocument> {
        self.mutate(|doc| doc.remove_link(instance, upstream)).await
    }

    /// Soft-delete: the instance is marked expelled, never removed
    pub async fn delete_instance(&self, name: &str) -> Result<TopologyDocument> {
        let doc = self.mutate(|doc| doc.expel_instance(name)).await?;
        info!(topology = %self.name, instance = name, revision = doc.revision, "instance expelled");
        Ok(doc)
    }

    /// Soft-delete a replicaset that has no live instances left
    pub async fn delete_replicaset(&self, name: &str) -> Result<TopologyDocument> {
        let doc = self.mutate(|doc| doc.expel_replicaset(name)).await?;
        info!(topology = %self.name, replicaset = name, revision = doc.revision, "replicaset expelled");
        Ok(doc)
    }

    pub async fn set_instance_property(
        &self,
        name: &str,
        options: InstanceOptions,
    ) -> Result<TopologyDocument> {
        self.mutate(|doc| doc.update_instance(name, &options)).await
    }

    pub async fn set_replicaset_property(
        &self,
        name: &str,
        options: ReplicasetOptions,
    ) -> Result<TopologyDocument> {
        self.mutate(|doc| doc.update_replicaset(name, &options)).await
    }

    pub async fn set_topology_property(&self, patch: TopologyPatch) -> Result<TopologyDocument> {
        self.mutate(|doc| doc.update_options(&patch)).await
    }

    pub async fn set_zone_weight(&self, from: &str, to: &str, weight: f64) -> Result<TopologyDocument> {
        self.mutate(|doc| doc.set_zone_weight(from, to, weight)).await
    }

    /// Mark an instance enabled again
    pub async fn set_instance_reachable(&self, name: &str) -> Result<TopologyDocument> {
        self.execute(|doc| doc.set_instance_status(name, InstanceStatus::Enabled), false)
            .await
    }

    /// Mark an instance disabled
    pub async fn set_instance_unreachable(&self, name: &str) -> Result<TopologyDocument> {
        self.execute(|doc| doc.set_instance_status(name, InstanceStatus::Disabled), false)
            .await
    }

    /// Remove the document from the backend. Destructive.
    pub async fn destroy(&self) -> Result<()> {
        let existed = self
            .with_transport_retry("delete", || self.backend.delete(&self.key))
            .await?;
        if !existed {
            return Err(Error::not_found(EntityKind::Topology, &self.name));
        }
        warn!(topology = %self.name, "topology document deleted");
        Ok(())
    }

    // ============ Reads ============

    /// Current snapshot of the document
    pub async fn get_topology(&self) -> Result<TopologyDocument> {
        self.fetch().await
    }

    pub async fn get_topology_options(&self) -> Result<TopologyOptions> {
        Ok(self.fetch().await?.options)
    }

    /// Resolved options of a replicaset
    pub async fn get_replicaset_options(&self, name: &str) -> Result<ReplicasetOptions> {
        Ok(self.fetch().await?.replicaset(name)?.options())
    }

    /// Resolved options of an instance
    pub async fn get_instance_options(&self, name: &str) -> Result<InstanceOptions> {
        Ok(self.fetch().await?.instance(name)?.1.options())
    }

    pub async fn get_instance_conf(&self, name: &str) -> Result<InstanceConf> {
        projector::get_instance_conf(&self.fetch().await?, name)
    }

    pub async fn get_routers(&self) -> Result<Vec<ClusterMember>> {
        Ok(projector::get_routers(&self.fetch().await?))
    }

    pub async fn get_storages(&self) -> Result<Vec<ClusterMember>> {
        Ok(projector::get_storages(&self.fetch().await?))
    }

    pub async fn get_sharding_config(&self) -> Result<ShardingConfig> {
        Ok(projector::get_sharding_config(&self.fetch().await?))
    }

    /// Enabled masters per active replicaset
    pub async fn get_replicaset_masters(&self) -> Result<BTreeMap<String, Vec<String>>> {
        Ok(projector::get_replicaset_masters(&self.fetch().await?))
    }
}

fn decode(stored: Versioned) -> Result<TopologyDocument> {
    let mut doc: TopologyDocument = serde_json::from_str(&stored.value)?;
    doc.revision = stored.revision;
    Ok(doc)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::kv::MemoryKvStore;
    use crate::topology::Role;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 16,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(8),
            transport_retries: 3,
            deadline: None,
        }
    }

    fn fast_options() -> StoreOptions {
        StoreOptions {
            retry: fast_policy(),
            ..Default::default()
        }
    }

    async fn open(kv: Arc<dyn KvStore>) -> TopologyStore {
        TopologyStore::open(kv, "test", fast_options(), TopologyOptions::default())
            .await
            .unwrap()
    }

    fn instance(uri: &str) -> InstanceOptions {
        InstanceOptions {
            advertise_uri: Some(uri.to_string()),
            ..Default::default()
        }
    }

    fn master(uri: &str) -> InstanceOptions {
        InstanceOptions {
            is_master: Some(true),
            ..instance(uri)
        }
    }

    /// Lets another writer slip in before each conditional put
    struct RacingStore {
        inner: Arc<MemoryKvStore>,
        races: AtomicU32,
    }

    impl RacingStore {
        fn new(races: u32) -> Arc<Self> {
            Arc::new(Self {
                inner: MemoryKvStore::new(),
                races: AtomicU32::new(races),
            })
        }
    }

    #[async_trait]
    impl KvStore for RacingStore {
        async fn get(&self, key: &str) -> std::result::Result<Option<Versioned>, KvError> {
            self.inner.get(key).await
        }

        async fn put(
            &self,
            key: &str,
            value: String,
            expected_revision: Option<u64>,
        ) -> std::result::Result<u64, KvError> {
            let race = expected_revision.is_some()
                && self
                    .races
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            if race {
                if let Some(current) = self.inner.get(key).await? {
                    self.inner
                        .put(key, current.value, Some(current.revision))
                        .await?;
                }
            }
            self.inner.put(key, value, expected_revision).await
        }

        async fn delete(&self, key: &str) -> std::result::Result<bool, KvError> {
            self.inner.delete(key).await
        }
    }

    /// Reads and writes that take a while
    struct SlowStore {
        inner: Arc<MemoryKvStore>,
        delay: Duration,
    }

    #[async_trait]
    impl KvStore for SlowStore {
        async fn get(&self, key: &str) -> std::result::Result<Option<Versioned>, KvError> {
            tokio::time::sleep(self.delay).await;
            self.inner.get(key).await
        }

        async fn put(
            &self,
            key: &str,
            value: String,
            expected_revision: Option<u64>,
        ) -> std::result::Result<u64, KvError> {
            tokio::time::sleep(self.delay).await;
            self.inner.put(key, value, expected_revision).await
        }

        async fn delete(&self, key: &str) -> std::result::Result<bool, KvError> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_open_bootstraps_once() {
        let kv = MemoryKvStore::new();
        let store = open(kv.clone()).await;
        assert_eq!(store.key(), "/wolftopo/test");
        assert_eq!(kv.revision("/wolftopo/test").await, Some(0));

        store.new_replicaset("rs1", ReplicasetOptions::default()).await.unwrap();

        let again = TopologyStore::open(
            kv.clone(),
            "test",
            fast_options(),
            TopologyOptions {
                bucket_count: 10,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let doc = again.get_topology().await.unwrap();
        assert_eq!(doc.revision, 1);
        assert_eq!(doc.options.bucket_count, 3000);
        assert!(doc.replicasets.contains_key("rs1"));
    }

    #[tokio::test]
    async fn test_open_rejects_bad_name() {
        let result = TopologyStore::open(
            MemoryKvStore::new(),
            "bad name",
            StoreOptions::default(),
            TopologyOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(Error::Validation { .. })));
    }

    #[tokio::test]
    async fn test_successful_mutation_bumps_revision_by_one() {
        let store = open(MemoryKvStore::new()).await;

        let doc = store.new_replicaset("rs1", ReplicasetOptions::default()).await.unwrap();
        assert_eq!(doc.revision, 1);
        assert!(doc.updated_at.is_some());

        let doc = store.new_instance("rs1", "a", master("a:3301")).await.unwrap();
        assert_eq!(doc.revision, 2);

        let read = store.get_topology().await.unwrap();
        assert_eq!(read, doc);
    }

    #[tokio::test]
    async fn test_rejected_mutation_leaves_document_untouched() {
        let kv = MemoryKvStore::new();
        let store = open(kv.clone()).await;
        store.new_replicaset("rs1", ReplicasetOptions::default()).await.unwrap();
        store.new_instance("rs1", "a", master("a:3301")).await.unwrap();
        let before = store.get_topology().await.unwrap();

        let second_master = store.new_instance("rs1", "b", master("b:3301")).await;
        assert!(matches!(second_master, Err(Error::Validation { .. })));

        let duplicate = store.new_replicaset("rs1", ReplicasetOptions::default()).await;
        assert!(matches!(duplicate, Err(Error::NameConflict { .. })));

        let unknown_rs = store.new_instance("nope", "c", instance("c:3301")).await;
        assert!(matches!(unknown_rs, Err(Error::NotFound { .. })));

        assert_eq!(store.get_topology().await.unwrap(), before);
        assert_eq!(kv.revision(store.key()).await, Some(before.revision));
    }

    #[tokio::test]
    async fn test_bucket_count_frozen_after_bootstrap() {
        let store = open(MemoryKvStore::new()).await;
        store
            .set_topology_property(TopologyPatch {
                bucket_count: Some(6000),
                ..Default::default()
            })
            .await
            .unwrap();
        let doc = store
            .set_topology_property(TopologyPatch {
                is_bootstrapped: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();

        let result = store
            .set_topology_property(TopologyPatch {
                bucket_count: Some(100),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        let after = store.get_topology().await.unwrap();
        assert_eq!(after.revision, doc.revision);
        assert_eq!(after.options.bucket_count, 6000);
    }

    #[tokio::test]
    async fn test_unchanged_transform_skips_write() {
        let kv = MemoryKvStore::new();
        let store = open(kv.clone()).await;
        store.new_replicaset("rs1", ReplicasetOptions::default()).await.unwrap();
        store.new_instance("rs1", "a", instance("a:3301")).await.unwrap();
        store.delete_instance("a").await.unwrap();
        let revision = kv.revision(store.key()).await;

        let doc = store.delete_instance("a").await.unwrap();
        assert_eq!(Some(doc.revision), revision);
        assert_eq!(kv.revision(store.key()).await, revision);

        let doc = store.mutate(|_| Ok(())).await.unwrap();
        assert_eq!(Some(doc.revision), revision);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_both_land() {
        let inner = MemoryKvStore::new();
        let kv: Arc<dyn KvStore> = Arc::new(SlowStore {
            inner: inner.clone(),
            delay: Duration::from_millis(5),
        });
        let store = open(kv).await;

        let a = store.clone();
        let b = store.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.new_replicaset("a", ReplicasetOptions::default()).await }),
            tokio::spawn(async move { b.new_replicaset("b", ReplicasetOptions::default()).await }),
        );
        ra.unwrap().unwrap();
        rb.unwrap().unwrap();

        let doc = store.get_topology().await.unwrap();
        assert!(doc.replicasets.contains_key("a"));
        assert!(doc.replicasets.contains_key("b"));
        assert_eq!(doc.revision, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_concurrent_instances() {
        let store = open(MemoryKvStore::new()).await;
        store.new_replicaset("rs1", ReplicasetOptions::default()).await.unwrap();

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let name = format!("i{}", i);
                    let uri = format!("10.0.0.{}:3301", i);
                    store.new_instance("rs1", &name, instance(&uri)).await
                })
            })
            .collect();
        for result in futures::future::join_all(handles).await {
            result.unwrap().unwrap();
        }

        let doc = store.get_topology().await.unwrap();
        assert_eq!(doc.replicasets["rs1"].instances.len(), 10);
        assert_eq!(doc.revision, 11);
    }

    #[tokio::test]
    async fn test_conflict_is_retried() {
        let kv = RacingStore::new(2);
        let store = open(kv.clone()).await;
        // bootstrap used a create-put, which does not race
        assert_eq!(kv.races.load(Ordering::SeqCst), 2);

        let doc = store.new_replicaset("rs1", ReplicasetOptions::default()).await.unwrap();
        assert!(doc.replicasets.contains_key("rs1"));
        // two competing writes plus ours
        assert_eq!(doc.revision, 3);
    }

    #[tokio::test]
    async fn test_conflicts_exhaust_attempts() {
        let kv = RacingStore::new(u32::MAX);
        let store = TopologyStore::open(
            kv,
            "test",
            StoreOptions {
                retry: RetryPolicy {
                    max_attempts: 3,
                    ..fast_policy()
                },
                ..Default::default()
            },
            TopologyOptions::default(),
        )
        .await
        .unwrap();

        let result = store.new_replicaset("rs1", ReplicasetOptions::default()).await;
        assert!(matches!(result, Err(Error::ConcurrencyExhausted { attempts: 3 })));
        assert!(store.get_topology().await.unwrap().replicasets.is_empty());
    }

    #[tokio::test]
    async fn test_transport_failures_retried_then_surface() {
        let kv = MemoryKvStore::new();
        let store = open(kv.clone()).await;

        kv.fail_next(2);
        store.new_replicaset("rs1", ReplicasetOptions::default()).await.unwrap();

        kv.fail_next(100);
        let result = store.new_replicaset("rs2", ReplicasetOptions::default()).await;
        assert!(matches!(result, Err(Error::StoreUnavailable(_))));

        kv.fail_next(0);
        let doc = store.get_topology().await.unwrap();
        assert_eq!(doc.replicasets.len(), 1);
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let inner = MemoryKvStore::new();
        let fast = open(inner.clone()).await;
        let slow_kv: Arc<dyn KvStore> = Arc::new(SlowStore {
            inner: inner.clone(),
            delay: Duration::from_millis(200),
        });
        let slow = TopologyStore::open(slow_kv, "test", fast_options(), TopologyOptions::default())
            .await
            .unwrap();

        let result = slow
            .mutate_with_deadline(
                |doc| doc.add_replicaset("rs1", &ReplicasetOptions::default()),
                Duration::from_millis(50),
            )
            .await;
        assert!(matches!(result, Err(Error::DeadlineExceeded(_))));

        let doc = fast.get_topology().await.unwrap();
        assert_eq!(doc.revision, 0);
        assert!(doc.replicasets.is_empty());
    }

    #[tokio::test]
    async fn test_policy_deadline_applies_to_named_operations() {
        let inner = MemoryKvStore::new();
        open(inner.clone()).await;
        let slow_kv: Arc<dyn KvStore> = Arc::new(SlowStore {
            inner,
            delay: Duration::from_millis(200),
        });
        let store = TopologyStore::open(
            slow_kv,
            "test",
            StoreOptions {
                retry: RetryPolicy {
                    deadline: Some(Duration::from_millis(50)),
                    ..fast_policy()
                },
                ..Default::default()
            },
            TopologyOptions::default(),
        )
        .await
        .unwrap();

        let result = store.new_replicaset("rs1", ReplicasetOptions::default()).await;
        assert!(matches!(result, Err(Error::DeadlineExceeded(_))));
    }

    #[tokio::test]
    async fn test_reachability_toggles() {
        let store = open(MemoryKvStore::new()).await;
        store.new_replicaset("rs1", ReplicasetOptions::default()).await.unwrap();
        store.new_instance("rs1", "a", master("a:3301")).await.unwrap();
        store
            .new_instance(
                "rs1",
                "r",
                InstanceOptions {
                    roles: Some([Role::Router].into_iter().collect()),
                    ..instance("r:3301")
                },
            )
            .await
            .unwrap();

        store.set_instance_unreachable("r").await.unwrap();
        assert!(store.get_routers().await.unwrap().is_empty());
        let conf = store.get_instance_conf("r").await.unwrap();
        assert_eq!(conf.status, InstanceStatus::Disabled);

        store.set_instance_reachable("r").await.unwrap();
        assert_eq!(store.get_routers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_links_and_projection_through_store() {
        let store = open(MemoryKvStore::new()).await;
        store.new_replicaset("rs1", ReplicasetOptions::default()).await.unwrap();
        store.new_instance("rs1", "a", master("a:3301")).await.unwrap();
        store.new_instance("rs1", "b", instance("b:3301")).await.unwrap();

        store.new_instance_link("b", "a").await.unwrap();
        assert_eq!(
            store.get_instance_conf("b").await.unwrap().replication,
            vec!["a:3301"]
        );

        store.delete_instance_link("b", "a").await.unwrap();
        assert!(store.get_instance_conf("b").await.unwrap().replication.is_empty());

        let missing = store.delete_instance_link("b", "a").await;
        assert!(matches!(missing, Err(Error::NotFound { .. })));

        let masters = store.get_replicaset_masters().await.unwrap();
        assert_eq!(masters["rs1"], vec!["a".to_string()]);
        assert_eq!(store.get_sharding_config().await.unwrap().sharding.len(), 1);
        assert_eq!(store.get_storages().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_option_reads() {
        let store = open(MemoryKvStore::new()).await;
        store
            .new_replicaset(
                "rs1",
                ReplicasetOptions {
                    weight: Some(2.5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store.new_instance("rs1", "a", master("a:3301")).await.unwrap();
        store
            .set_instance_property(
                "a",
                InstanceOptions {
                    zone: Some("dc1".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .set_replicaset_property(
                "rs1",
                ReplicasetOptions {
                    weight: Some(3.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store.set_zone_weight("dc1", "dc2", 10.0).await.unwrap();

        assert_eq!(store.get_replicaset_options("rs1").await.unwrap().weight, Some(3.0));
        assert_eq!(
            store.get_instance_options("a").await.unwrap().zone.as_deref(),
            Some("dc1")
        );
        assert_eq!(store.get_topology_options().await.unwrap().bucket_count, 3000);
        assert_eq!(store.get_sharding_config().await.unwrap().weights["dc1"]["dc2"], 10.0);
    }

    #[tokio::test]
    async fn test_expel_replicaset_after_instances() {
        let store = open(MemoryKvStore::new()).await;
        store.new_replicaset("rs1", ReplicasetOptions::default()).await.unwrap();
        store.new_instance("rs1", "a", instance("a:3301")).await.unwrap();

        let busy = store.delete_replicaset("rs1").await;
        assert!(matches!(busy, Err(Error::Validation { .. })));

        store.delete_instance("a").await.unwrap();
        let doc = store.delete_replicaset("rs1").await.unwrap();
        assert!(doc.replicasets["rs1"].is_expelled());

        let reuse = store.new_replicaset("rs1", ReplicasetOptions::default()).await;
        assert!(matches!(reuse, Err(Error::NameConflict { .. })));
    }

    #[tokio::test]
    async fn test_destroy() {
        let kv = MemoryKvStore::new();
        let store = open(kv.clone()).await;
        store.destroy().await.unwrap();

        assert!(matches!(store.get_topology().await, Err(Error::NotFound { .. })));
        assert!(matches!(store.destroy().await, Err(Error::NotFound { .. })));

        // opening again starts from scratch
        let store = open(kv).await;
        assert_eq!(store.get_topology().await.unwrap().revision, 0);
    }
}
