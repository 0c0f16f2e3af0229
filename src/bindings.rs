//! Binding-based field resolution.
//!
//! ```text
//! exposed name → spec (index) → component identifier (spec)
//!   → selected bindings labeled with the spec (merged namespace)
//!   → fields whose replica count for the component is > 0
//! ```

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cluster::{Binding, BindingLister, ClusterError, LabelSelector};
use crate::index::SpecIndex;

/// Hard failures of field resolution.
#[derive(Debug, Error)]
pub enum BindingError {
    /// Listing bindings failed.
    #[error("listing bindings of {spec}: {source}")]
    List {
        /// Specification name.
        spec: String,
        /// Underlying source error.
        #[source]
        source: ClusterError,
    },

    /// No selected binding schedules the component anywhere.
    #[error("no active fields for component {component} of {spec}")]
    NoActiveFields {
        /// Specification name.
        spec: String,
        /// Component identifier.
        component: String,
    },
}

/// Why an exposed name could not be mapped to a component. Soft misses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMiss {
    /// No scheduled specification declares the name.
    NoSpec,
    /// The specification no longer has a component with that name.
    NoComponent,
}

/// The component a query resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentTarget {
    /// Owning specification name.
    pub spec: String,
    /// Component identifier.
    pub component: String,
    /// The exposed name that matched.
    pub exposed_name: String,
}

/// Map the first matching key to its owning specification and component.
///
/// Keys are tried in order; the first key with an index hit decides the
/// outcome.
pub fn locate_component(index: &SpecIndex, keys: &[&str]) -> Result<ComponentTarget, TargetMiss> {
    let Some((key, spec)) = keys
        .iter()
        .find_map(|key| index.resolve(key).map(|spec| (*key, spec)))
    else {
        return Err(TargetMiss::NoSpec);
    };

    let component = spec.component_for(key).ok_or(TargetMiss::NoComponent)?;

    Ok(ComponentTarget {
        spec: spec.name.clone(),
        component: component.name.clone(),
        exposed_name: key.to_string(),
    })
}

/// Finds the fields running a component.
#[derive(Clone)]
pub struct BindingResolver {
    lister: Arc<dyn BindingLister>,
    namespace: String,
}

impl BindingResolver {
    /// Create a resolver listing bindings in `namespace`.
    pub fn new(lister: Arc<dyn BindingLister>, namespace: impl Into<String>) -> Self {
        Self {
            lister,
            namespace: namespace.into(),
        }
    }

    /// Fields with a positive replica count for `component` of `spec`.
    ///
    /// Order follows the binding list; a field appearing in several bindings
    /// appears several times.
    pub fn active_fields(&self, spec: &str, component: &str) -> Result<Vec<String>, BindingError> {
        let selector = LabelSelector::selected_bindings_of(spec);
        let bindings = self
            .lister
            .list_bindings(&self.namespace, &selector)
            .map_err(|source| {
                warn!(spec, error = %source, "binding listing failed");
                BindingError::List {
                    spec: spec.to_string(),
                    source,
                }
            })?;

        let fields = collect_active_fields(&bindings, component);
        debug!(spec, component, bindings = bindings.len(), fields = ?fields, "resolved fields");

        if fields.is_empty() {
            return Err(BindingError::NoActiveFields {
                spec: spec.to_string(),
                component: component.to_string(),
            });
        }
        Ok(fields)
    }
}

/// Collect fields with `replicas[component] > 0` across selected bindings.
pub fn collect_active_fields(bindings: &[Binding], component: &str) -> Vec<String> {
    bindings
        .iter()
        .filter(|b| b.is_selected())
        .flat_map(|b| b.fields.iter())
        .filter(|f| f.replicas.get(component).is_some_and(|n| *n > 0))
        .map(|f| f.field.clone())
        .collect()
}
