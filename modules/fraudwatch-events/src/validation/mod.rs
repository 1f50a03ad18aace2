//! Validation gate: decides whether a candidate event may enter the log.
//!
//! Pure and deterministic over `(type, payload, registry state)`. Checks run
//! in a fixed order: type resolution, generation pin, required keys, then the
//! refined rule registered for the type (if any). Legacy types stop after
//! resolution.

mod fields;
pub mod rules;

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{EventStoreError, Result};
use crate::registry::TypeRegistry;
use crate::types::{EventTypeSpec, SCHEMA_GENERATION_KEY};

pub use fields::{Fields, Nested};

/// A per-type structural check applied after the generic ones.
pub trait PayloadRule: Send + Sync {
    fn check(&self, fields: &Fields<'_>) -> Result<()>;
}

pub struct ValidationGate {
    registry: TypeRegistry,
    rules: HashMap<String, Box<dyn PayloadRule>>,
}

impl ValidationGate {
    /// A gate with no refined rules. Versioned types still get the generic checks.
    pub fn new(registry: TypeRegistry) -> Self {
        Self {
            registry,
            rules: HashMap::new(),
        }
    }

    /// A gate carrying the refined rules for every built-in versioned type.
    pub fn standard(registry: TypeRegistry) -> Self {
        let rules = rules::standard_rules()
            .into_iter()
            .map(|(event_type, rule)| (event_type.to_string(), rule))
            .collect();
        Self { registry, rules }
    }

    pub fn with_rule(mut self, event_type: impl Into<String>, rule: impl PayloadRule + 'static) -> Self {
        self.rules.insert(event_type.into(), Box::new(rule));
        self
    }

    pub fn has_rule(&self, event_type: &str) -> bool {
        self.rules.contains_key(event_type)
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn validate(&self, event_type: &str, payload: &Value) -> Result<()> {
        let spec = self
            .registry
            .lookup(event_type)
            .ok_or_else(|| EventStoreError::Referential {
                event_type: event_type.to_string(),
            })?;

        if !spec.versioned {
            return Ok(());
        }

        // Without an object there is no generation to match.
        let object = payload.as_object().ok_or_else(|| EventStoreError::SchemaVersion {
            event_type: spec.event_type.clone(),
            expected: spec.schema_generation.clone(),
            found: None,
        })?;
        let fields = Fields::new(event_type, object);

        check_generation(&spec, &fields)?;
        for key in &spec.required_keys {
            fields.value(key)?;
        }
        if let Some(rule) = self.rules.get(event_type) {
            rule.check(&fields)?;
        }
        Ok(())
    }
}

fn check_generation(spec: &EventTypeSpec, fields: &Fields<'_>) -> Result<()> {
    let found = fields.get(SCHEMA_GENERATION_KEY).map(|v| match v.as_str() {
        Some(s) => s.to_string(),
        None => v.to_string(),
    });
    if found.as_deref() == Some(spec.schema_generation.as_str()) {
        return Ok(());
    }
    Err(EventStoreError::SchemaVersion {
        event_type: spec.event_type.clone(),
        expected: spec.schema_generation.clone(),
        found,
    })
}
