//! Type registry: the catalog of permitted event shapes.
//!
//! A cheap-to-clone handle over shared state. Constructed once at startup and
//! handed to the validation gate and the store; mutated only through
//! `register_or_update`. There is no removal.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::types::EventTypeSpec;

/// Outcome of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryChange {
    Created,
    Updated,
    Unchanged,
}

#[derive(Clone, Default)]
pub struct TypeRegistry {
    specs: Arc<RwLock<HashMap<String, Arc<EventTypeSpec>>>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: impl IntoIterator<Item = EventTypeSpec>) -> Self {
        let registry = Self::new();
        for spec in specs {
            registry.register_or_update(spec);
        }
        registry
    }

    /// What `register_or_update(spec)` would do, without doing it.
    pub fn diff(&self, spec: &EventTypeSpec) -> RegistryChange {
        match self.lookup(&spec.event_type) {
            None => RegistryChange::Created,
            Some(current) if current.same_contract(spec) => RegistryChange::Unchanged,
            Some(_) => RegistryChange::Updated,
        }
    }

    /// Upsert by type name. Identical content is a no-op; changed content
    /// replaces the contract but keeps the original `created_at`.
    pub fn register_or_update(&self, spec: EventTypeSpec) -> RegistryChange {
        let mut specs = self.specs.write().unwrap_or_else(PoisonError::into_inner);
        match specs.get(&spec.event_type) {
            Some(current) if current.same_contract(&spec) => RegistryChange::Unchanged,
            Some(current) => {
                let spec = EventTypeSpec {
                    created_at: current.created_at,
                    ..spec
                };
                specs.insert(spec.event_type.clone(), Arc::new(spec));
                RegistryChange::Updated
            }
            None => {
                specs.insert(spec.event_type.clone(), Arc::new(spec));
                RegistryChange::Created
            }
        }
    }

    pub fn lookup(&self, event_type: &str) -> Option<Arc<EventTypeSpec>> {
        self.specs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .cloned()
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.lookup(event_type).is_some()
    }

    /// All registered specs, sorted by type name.
    pub fn snapshot(&self) -> Vec<Arc<EventTypeSpec>> {
        let mut specs: Vec<_> = self
            .specs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        specs.sort_by(|a, b| a.event_type.cmp(&b.event_type));
        specs
    }

    pub fn len(&self) -> usize {
        self.specs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.len())
            .finish()
    }
}
