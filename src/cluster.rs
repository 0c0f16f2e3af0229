//! Cluster-state source: specifications, bindings and their change feed.
//!
//! The resolver never writes cluster state. It consumes two capabilities:
//!
//! - [`SpecWatcher`]: a stream of specification changes, preceded by a full
//!   listing and a [`WatchEvent::Synced`] marker.
//! - [`BindingLister`]: a label-selector list over bindings, served from a
//!   local cache.
//!
//! [`MemoryCluster`] implements both in-process and can be seeded from a JSON
//! snapshot.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// Namespace holding the specifications served by this resolver.
pub const RESERVED_NAMESPACE: &str = "gaia-reserved";
/// Namespace holding merged and selected bindings.
pub const MERGED_NAMESPACE: &str = "gaia-merged";
/// Binding label naming the owning specification.
pub const SPEC_LABEL: &str = "apps.gaia.io/description";
/// Binding label carrying the scheduler status.
pub const STATUS_LABEL: &str = "apps.gaia.io/status-scheduler";
/// Status label value of a finalized binding.
pub const STATUS_SELECTED: &str = "selected";

const EVENT_BUFFER: usize = 1024;

/// Errors raised by a cluster-state source.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The source cannot serve the request right now.
    #[error("cluster state unavailable: {0}")]
    Unavailable(String),

    /// The watcher fell behind and dropped change events.
    #[error("watch lagged, {0} events dropped")]
    Lagged(u64),

    /// Reading a snapshot failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Decoding a snapshot failed.
    #[error("invalid snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// Lifecycle phase of a specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecPhase {
    /// Waiting for the scheduler.
    #[default]
    Pending,
    /// Placed onto fields; the only phase this resolver serves.
    Scheduled,
    /// Scheduling failed.
    Failed,
    /// Any phase this resolver does not know about.
    #[serde(other)]
    Unknown,
}

/// A named sub-unit of a specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    /// Component identifier, used as the key of binding replica maps.
    pub name: String,
    /// Exposed name this component answers to.
    #[serde(default)]
    pub fqdn: Option<String>,
}

impl Component {
    /// Exposed name, if one is declared and non-empty.
    pub fn exposed_name(&self) -> Option<&str> {
        self.fqdn.as_deref().filter(|f| !f.is_empty())
    }
}

/// A deployable application blueprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specification {
    /// Namespace of the object.
    pub namespace: String,
    /// Name of the object.
    pub name: String,
    /// Identity of this incarnation of the object.
    #[serde(default)]
    pub uid: String,
    /// Lifecycle phase.
    #[serde(default)]
    pub phase: SpecPhase,
    /// Deletion marker (tombstone).
    #[serde(default)]
    pub deleting: bool,
    /// Ordered components.
    #[serde(default)]
    pub components: Vec<Component>,
}

impl Specification {
    /// True when the scheduler has placed this specification.
    pub fn is_scheduled(&self) -> bool {
        self.phase == SpecPhase::Scheduled
    }

    /// Exposed names declared across all components, in component order.
    pub fn exposed_names(&self) -> impl Iterator<Item = &str> {
        self.components.iter().filter_map(Component::exposed_name)
    }

    /// First component answering to `fqdn`, ignoring ASCII case.
    pub fn component_for(&self, fqdn: &str) -> Option<&Component> {
        self.components
            .iter()
            .find(|c| c.exposed_name().is_some_and(|f| f.eq_ignore_ascii_case(fqdn)))
    }
}

/// Scheduler status of a binding, carried in its [`STATUS_LABEL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStatus {
    /// Candidate plan, not yet chosen.
    Merged,
    /// Finalized plan.
    Selected,
    /// Any other (or missing) status.
    Unknown,
}

impl BindingStatus {
    fn from_label(value: Option<&str>) -> Self {
        match value {
            Some("merged") => BindingStatus::Merged,
            Some(STATUS_SELECTED) => BindingStatus::Selected,
            _ => BindingStatus::Unknown,
        }
    }
}

/// Replica assignment of one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldReplicas {
    /// Field (deployment target) name.
    pub field: String,
    /// Component identifier -> replica count.
    #[serde(default)]
    pub replicas: BTreeMap<String, i32>,
}

/// Where, and with how many replicas, each component of a specification runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    /// Namespace of the object.
    pub namespace: String,
    /// Name of the object.
    pub name: String,
    /// Object labels, matched by [`LabelSelector`].
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Per-field replica assignments, in order.
    #[serde(default)]
    pub fields: Vec<FieldReplicas>,
}

impl Binding {
    /// Scheduler status read from the status label.
    pub fn status(&self) -> BindingStatus {
        BindingStatus::from_label(self.labels.get(STATUS_LABEL).map(String::as_str))
    }

    /// True when this binding has been finalized by the scheduler.
    pub fn is_selected(&self) -> bool {
        self.status() == BindingStatus::Selected
    }
}

/// Equality-based label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    terms: BTreeMap<String, String>,
}

impl LabelSelector {
    /// Empty selector (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `key=value` requirement.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.terms.insert(key.into(), value.into());
        self
    }

    /// Selector used to find the selected bindings of a specification.
    pub fn selected_bindings_of(spec_name: &str) -> Self {
        Self::new()
            .with(SPEC_LABEL, spec_name)
            .with(STATUS_LABEL, STATUS_SELECTED)
    }

    /// True if every requirement is present in `labels`.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.terms.iter().all(|(k, v)| labels.get(k) == Some(v))
    }
}

/// A specification change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecEvent {
    /// Object created.
    Added(Specification),
    /// Object changed.
    Updated(Specification),
    /// Object removed.
    Deleted(Specification),
}

impl SpecEvent {
    /// The specification carried by this event.
    pub fn spec(&self) -> &Specification {
        match self {
            SpecEvent::Added(s) | SpecEvent::Updated(s) | SpecEvent::Deleted(s) => s,
        }
    }

    /// Take the specification out of this event.
    pub fn into_spec(self) -> Specification {
        match self {
            SpecEvent::Added(s) | SpecEvent::Updated(s) | SpecEvent::Deleted(s) => s,
        }
    }

    /// True for deletions, including add/update events carrying the tombstone marker.
    pub fn is_delete(&self) -> bool {
        matches!(self, SpecEvent::Deleted(_)) || self.spec().deleting
    }
}

/// Item of a specification watch stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A specification change (or a listing entry before `Synced`).
    Spec(SpecEvent),
    /// The initial listing is complete; live changes follow.
    Synced,
}

/// Stream of watch events.
pub type WatchStream = BoxStream<'static, Result<WatchEvent, ClusterError>>;

/// Source of specification changes.
#[async_trait]
pub trait SpecWatcher: Send + Sync {
    /// Open a watch: a full listing as `Added` events, then `Synced`, then live changes.
    async fn watch(&self) -> Result<WatchStream, ClusterError>;
}

/// Cached label-selector listing of bindings.
pub trait BindingLister: Send + Sync {
    /// List bindings in `namespace` whose labels match `selector`.
    fn list_bindings(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Binding>, ClusterError>;
}

/// Serialized cluster state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    /// Specifications.
    #[serde(default)]
    pub specifications: Vec<Specification>,
    /// Bindings.
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

/// In-process cluster state with a broadcast change feed.
#[derive(Debug, Clone)]
pub struct MemoryCluster {
    inner: Arc<RwLock<MemoryClusterInner>>,
    events: broadcast::Sender<SpecEvent>,
}

#[derive(Debug, Default)]
struct MemoryClusterInner {
    /// (namespace, name) -> Specification
    specs: BTreeMap<(String, String), Specification>,
    bindings: Vec<Binding>,
    /// Sequence for uids assigned to specifications stored without one.
    uid_seq: u64,
}

impl MemoryClusterInner {
    /// Store `spec`, giving it a uid if it has none. An update keeps the uid
    /// of the object it replaces.
    fn store_spec(&mut self, mut spec: Specification) -> (Specification, bool) {
        let key = (spec.namespace.clone(), spec.name.clone());
        let existing = self.specs.get(&key);
        let is_update = existing.is_some();
        if spec.uid.is_empty() {
            spec.uid = match existing {
                Some(current) => current.uid.clone(),
                None => {
                    self.uid_seq += 1;
                    format!("{}/{}#{}", spec.namespace, spec.name, self.uid_seq)
                }
            };
        }
        self.specs.insert(key, spec.clone());
        (spec, is_update)
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    /// Create an empty cluster.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(RwLock::new(MemoryClusterInner::default())),
            events,
        }
    }

    /// Create a cluster seeded from a snapshot.
    pub fn from_snapshot(snapshot: ClusterSnapshot) -> Self {
        let cluster = Self::new();
        {
            let mut inner = cluster.inner.write();
            for spec in snapshot.specifications {
                inner.store_spec(spec);
            }
            inner.bindings = snapshot.bindings;
        }
        cluster
    }

    /// Load a JSON snapshot from disk.
    pub fn load_snapshot(path: &Path) -> Result<Self, ClusterError> {
        let raw = std::fs::read(path)?;
        let snapshot: ClusterSnapshot = serde_json::from_slice(&raw)?;
        debug!(
            path = %path.display(),
            specs = snapshot.specifications.len(),
            bindings = snapshot.bindings.len(),
            "loaded cluster snapshot"
        );
        Ok(Self::from_snapshot(snapshot))
    }

    /// Create or replace a specification and publish the change.
    pub fn apply_spec(&self, spec: Specification) {
        let mut inner = self.inner.write();
        let event = match inner.store_spec(spec) {
            (spec, true) => SpecEvent::Updated(spec),
            (spec, false) => SpecEvent::Added(spec),
        };
        // No receivers is fine; the next watch replays from the map.
        let _ = self.events.send(event);
    }

    /// Remove a specification and publish the deletion.
    pub fn delete_spec(&self, namespace: &str, name: &str) -> Option<Specification> {
        let mut inner = self.inner.write();
        let mut spec = inner
            .specs
            .remove(&(namespace.to_string(), name.to_string()))?;
        spec.deleting = true;
        let _ = self.events.send(SpecEvent::Deleted(spec.clone()));
        Some(spec)
    }

    /// Insert or replace a binding (matched by namespace and name).
    pub fn upsert_binding(&self, binding: Binding) {
        let mut inner = self.inner.write();
        match inner
            .bindings
            .iter_mut()
            .find(|b| b.namespace == binding.namespace && b.name == binding.name)
        {
            Some(existing) => *existing = binding,
            None => inner.bindings.push(binding),
        }
    }

    /// Remove a binding.
    pub fn remove_binding(&self, namespace: &str, name: &str) {
        self.inner
            .write()
            .bindings
            .retain(|b| !(b.namespace == namespace && b.name == name));
    }

    /// Get a specification.
    pub fn get_spec(&self, namespace: &str, name: &str) -> Option<Specification> {
        self.inner
            .read()
            .specs
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl SpecWatcher for MemoryCluster {
    async fn watch(&self) -> Result<WatchStream, ClusterError> {
        // Subscribe and list under one lock so no change falls between them.
        let (rx, listing) = {
            let inner = self.inner.read();
            let listing: Vec<Specification> = inner.specs.values().cloned().collect();
            (self.events.subscribe(), listing)
        };

        let initial = stream::iter(
            listing
                .into_iter()
                .map(|s| Ok(WatchEvent::Spec(SpecEvent::Added(s))))
                .chain(std::iter::once(Ok(WatchEvent::Synced))),
        );

        let live = stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(event) => Some((Ok(WatchEvent::Spec(event)), rx)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    Some((Err(ClusterError::Lagged(n)), rx))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });

        Ok(initial.chain(live).boxed())
    }
}

impl BindingLister for MemoryCluster {
    fn list_bindings(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Binding>, ClusterError> {
        Ok(self
            .inner
            .read()
            .bindings
            .iter()
            .filter(|b| b.namespace == namespace && selector.matches(&b.labels))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_spec(name: &str, fqdn: Option<&str>) -> Specification {
        Specification {
            namespace: RESERVED_NAMESPACE.to_string(),
            name: name.to_string(),
            uid: format!("uid-{name}"),
            phase: SpecPhase::Scheduled,
            deleting: false,
            components: vec![Component {
                name: "api".to_string(),
                fqdn: fqdn.map(String::from),
            }],
        }
    }

    fn make_binding(name: &str, spec: &str, status: &str) -> Binding {
        Binding {
            namespace: MERGED_NAMESPACE.to_string(),
            name: name.to_string(),
            labels: [
                (SPEC_LABEL.to_string(), spec.to_string()),
                (STATUS_LABEL.to_string(), status.to_string()),
            ]
            .into_iter()
            .collect(),
            fields: vec![],
        }
    }

    #[test]
    fn test_empty_fqdn_is_not_exposed() {
        let spec = make_spec("order-svc", Some(""));
        assert_eq!(spec.exposed_names().count(), 0);
        assert!(spec.component_for("").is_none());
    }

    #[test]
    fn test_component_for_matches_fqdn() {
        let spec = make_spec("order-svc", Some("api.svc.cluster.local"));
        let component = spec.component_for("api.svc.cluster.local").unwrap();
        assert_eq!(component.name, "api");
    }

    #[test]
    fn test_event_with_tombstone_is_delete() {
        let mut spec = make_spec("order-svc", None);
        assert!(!SpecEvent::Updated(spec.clone()).is_delete());
        spec.deleting = true;
        assert!(SpecEvent::Updated(spec).is_delete());
    }

    #[test]
    fn test_list_bindings_filters_by_selector() {
        let cluster = MemoryCluster::new();
        cluster.upsert_binding(make_binding("rb-1", "order-svc", "selected"));
        cluster.upsert_binding(make_binding("rb-2", "order-svc", "merged"));
        cluster.upsert_binding(make_binding("rb-3", "other", "selected"));

        let found = cluster
            .list_bindings(
                MERGED_NAMESPACE,
                &LabelSelector::selected_bindings_of("order-svc"),
            )
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "rb-1");
        assert!(found[0].is_selected());

        let wrong_ns = cluster
            .list_bindings(
                RESERVED_NAMESPACE,
                &LabelSelector::selected_bindings_of("order-svc"),
            )
            .unwrap();
        assert!(wrong_ns.is_empty());
    }

    #[tokio::test]
    async fn test_watch_replays_then_synced_then_live() {
        let cluster = MemoryCluster::new();
        cluster.apply_spec(make_spec("a", Some("a.example")));

        let mut stream = cluster.watch().await.unwrap();
        assert!(matches!(
            stream.next().await,
            Some(Ok(WatchEvent::Spec(SpecEvent::Added(ref s)))) if s.name == "a"
        ));
        assert!(matches!(stream.next().await, Some(Ok(WatchEvent::Synced))));

        cluster.apply_spec(make_spec("a", Some("b.example")));
        assert!(matches!(
            stream.next().await,
            Some(Ok(WatchEvent::Spec(SpecEvent::Updated(_))))
        ));

        cluster.delete_spec(RESERVED_NAMESPACE, "a");
        match stream.next().await {
            Some(Ok(WatchEvent::Spec(event))) => assert!(event.is_delete()),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_parses() {
        let json = r#"{
            "specifications": [{
                "namespace": "gaia-reserved",
                "name": "order-svc",
                "phase": "scheduled",
                "components": [{"name": "api", "fqdn": "api.svc.cluster.local"}]
            }],
            "bindings": [{
                "namespace": "gaia-merged",
                "name": "rb-1",
                "labels": {
                    "apps.gaia.io/description": "order-svc",
                    "apps.gaia.io/status-scheduler": "selected"
                },
                "fields": [{"field": "cn-east", "replicas": {"api": 2}}]
            }]
        }"#;
        let snapshot: ClusterSnapshot = serde_json::from_str(json).unwrap();
        let cluster = MemoryCluster::from_snapshot(snapshot);
        let spec = cluster.get_spec(RESERVED_NAMESPACE, "order-svc").unwrap();
        assert!(spec.is_scheduled());
        assert_eq!(spec.exposed_names().collect::<Vec<_>>(), vec!["api.svc.cluster.local"]);

        let bindings = cluster
            .list_bindings(
                MERGED_NAMESPACE,
                &LabelSelector::selected_bindings_of("order-svc"),
            )
            .unwrap();
        assert_eq!(bindings[0].status(), BindingStatus::Selected);
    }

    #[test]
    fn test_specs_without_uid_get_one() {
        let mut spec = make_spec("order-svc", Some("api.svc.cluster.local"));
        spec.uid.clear();
        let cluster = MemoryCluster::from_snapshot(ClusterSnapshot {
            specifications: vec![spec.clone()],
            bindings: vec![],
        });
        let stored = cluster.get_spec(RESERVED_NAMESPACE, "order-svc").unwrap();
        assert!(!stored.uid.is_empty());

        // Updates keep the identity; re-creation gets a fresh one.
        cluster.apply_spec(spec.clone());
        let updated = cluster.get_spec(RESERVED_NAMESPACE, "order-svc").unwrap();
        assert_eq!(updated.uid, stored.uid);

        cluster.delete_spec(RESERVED_NAMESPACE, "order-svc");
        cluster.apply_spec(spec);
        let recreated = cluster.get_spec(RESERVED_NAMESPACE, "order-svc").unwrap();
        assert!(!recreated.uid.is_empty());
        assert_ne!(recreated.uid, stored.uid);
    }

    #[test]
    fn test_unknown_phase_deserializes() {
        let phase: SpecPhase = serde_json::from_str(r#""rescheduling""#).unwrap();
        assert_eq!(phase, SpecPhase::Unknown);
    }
}
