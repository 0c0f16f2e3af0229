//! Reverse index from exposed name to owning specification.
//!
//! ```text
//! exposed name            -> {spec names}
//! "api.svc.cluster.local" -> {"order-svc"}
//! NO_FQDN_KEY             -> {"batch-job", ...}
//! ```
//!
//! A single writer (the sync coordinator) replaces all keys of one
//! specification under one write lock, so readers see either the old or the new
//! key set of a specification, never a mix. Keys are stored lowercase; lookups
//! expect normalized names.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use crate::cluster::Specification;
use crate::error::DnsError;
use crate::metrics;

/// Key under which specifications without any exposed name are indexed.
pub const NO_FQDN_KEY: &str = "__no_fqdn__";

/// Number of deleted uids remembered to reject stale re-adds.
const TOMBSTONE_CAPACITY: usize = 1024;

/// Thread-safe exposed-name index.
#[derive(Debug, Clone)]
pub struct SpecIndex {
    inner: Arc<RwLock<SpecIndexInner>>,
    ready: Arc<watch::Sender<bool>>,
}

#[derive(Debug, Default)]
struct SpecIndexInner {
    /// exposed name -> spec names
    by_name: HashMap<String, BTreeSet<String>>,

    /// spec name -> (keys contributed, spec)
    specs: HashMap<String, IndexedSpec>,

    /// tombstone keys of deleted specifications, oldest first
    tombstones: VecDeque<String>,
}

#[derive(Debug)]
struct IndexedSpec {
    keys: Vec<String>,
    spec: Arc<Specification>,
}

impl Default for SpecIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SpecIndex {
    /// Create an empty, not-ready index.
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            inner: Arc::new(RwLock::new(SpecIndexInner::default())),
            ready: Arc::new(ready),
        }
    }

    /// Insert or replace a specification's keys.
    ///
    /// Returns `false` if the specification was previously deleted (it is
    /// tombstoned) and was therefore not indexed.
    pub fn upsert(&self, spec: Specification) -> bool {
        let keys = index_keys(&spec);
        let mut inner = self.inner.write();

        if inner.tombstones.contains(&tombstone_key(&spec)) {
            debug!(spec = %spec.name, uid = %spec.uid, "ignoring upsert of deleted spec");
            return false;
        }

        debug!(spec = %spec.name, keys = ?keys, "indexing spec");
        let name = spec.name.clone();
        inner.unlink(&name);
        for key in &keys {
            inner
                .by_name
                .entry(key.clone())
                .or_default()
                .insert(name.clone());
        }
        inner.specs.insert(
            name,
            IndexedSpec {
                keys,
                spec: Arc::new(spec),
            },
        );
        true
    }

    /// Remove every key contributed by `name`.
    pub fn remove(&self, name: &str) -> bool {
        let mut inner = self.inner.write();
        let removed = inner.unlink(name);
        if removed {
            debug!(spec = name, "removed spec from index");
        }
        removed
    }

    /// Remove a deleted specification and tombstone it.
    pub fn remove_deleted(&self, spec: &Specification) -> bool {
        let mut inner = self.inner.write();
        let tombstone = tombstone_key(spec);
        if !inner.tombstones.contains(&tombstone) {
            if inner.tombstones.len() == TOMBSTONE_CAPACITY {
                inner.tombstones.pop_front();
            }
            inner.tombstones.push_back(tombstone);
        }
        let removed = inner.unlink(&spec.name);
        debug!(spec = %spec.name, removed, "deleted spec");
        removed
    }

    /// Drop every specification whose name is not in `keep`.
    /// Returns the number of specifications removed.
    pub fn retain(&self, keep: &HashSet<String>) -> usize {
        let mut inner = self.inner.write();
        let stale: Vec<String> = inner
            .specs
            .keys()
            .filter(|name| !keep.contains(*name))
            .cloned()
            .collect();
        for name in &stale {
            inner.unlink(name);
        }
        if !stale.is_empty() {
            debug!(removed = ?stale, "pruned stale specs");
        }
        stale.len()
    }

    /// Names of the specifications declaring `exposed_name`. Empty on miss.
    pub fn lookup(&self, exposed_name: &str) -> BTreeSet<String> {
        if exposed_name == NO_FQDN_KEY {
            return BTreeSet::new();
        }
        let inner = self.inner.read();
        inner.by_name.get(exposed_name).cloned().unwrap_or_default()
    }

    /// The one specification answering for `exposed_name`.
    ///
    /// When several specifications declare the same name, the one with the
    /// lexicographically smallest name wins.
    pub fn resolve(&self, exposed_name: &str) -> Option<Arc<Specification>> {
        if exposed_name == NO_FQDN_KEY {
            return None;
        }
        let inner = self.inner.read();
        let name = inner.by_name.get(exposed_name)?.iter().next()?;
        inner.specs.get(name).map(|s| s.spec.clone())
    }

    /// True if `name` is indexed.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().specs.contains_key(name)
    }

    /// Check if the index has completed its initial sync.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Mark the initial sync as complete.
    pub fn mark_ready(&self) {
        self.ready.send_replace(true);
        debug!(specs = self.specs_count(), "spec index ready");
    }

    /// Wait up to `timeout` for the initial sync.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), DnsError> {
        if self.is_ready() {
            return Ok(());
        }
        let mut rx = self.ready.subscribe();
        let ready = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|ready| *ready)).await,
            Ok(Ok(_))
        );
        if ready {
            Ok(())
        } else {
            Err(DnsError::NotReady)
        }
    }

    /// Get count of indexed specifications.
    pub fn specs_count(&self) -> usize {
        self.inner.read().specs.len()
    }

    /// Get count of distinct keys (including the no-name key).
    pub fn names_count(&self) -> usize {
        self.inner.read().by_name.len()
    }

    /// Emit current index metrics.
    pub fn emit_metrics(&self) {
        let inner = self.inner.read();
        metrics::record_index_counts(inner.specs.len(), inner.by_name.len());
        metrics::record_ready_state(self.is_ready());
    }
}

impl SpecIndexInner {
    /// Detach all keys of `name`. Returns true if it was indexed.
    fn unlink(&mut self, name: &str) -> bool {
        let Some(old) = self.specs.remove(name) else {
            return false;
        };
        for key in old.keys {
            if let Some(names) = self.by_name.get_mut(&key) {
                names.remove(name);
                if names.is_empty() {
                    self.by_name.remove(&key);
                }
            }
        }
        true
    }
}

/// Identity a deletion is remembered by: the uid, or namespace and name for
/// specifications without one.
fn tombstone_key(spec: &Specification) -> String {
    if spec.uid.is_empty() {
        format!("{}/{}", spec.namespace, spec.name)
    } else {
        spec.uid.clone()
    }
}

/// Keys a specification is indexed under.
fn index_keys(spec: &Specification) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for name in spec.exposed_names() {
        let name = name.to_ascii_lowercase();
        if !keys.contains(&name) {
            keys.push(name);
        }
    }
    if keys.is_empty() {
        keys.push(NO_FQDN_KEY.to_string());
    }
    keys
}
