//! Typed access to payload fields, reporting dotted paths on failure.

use serde_json::{Map, Value};

use crate::error::{EventStoreError, Result};

/// A view over one JSON object inside a payload, scoped to an event type.
///
/// Nested views carry their path so errors read like
/// `basis.legal_breaches[1].observed_quote`.
#[derive(Clone, Copy)]
pub struct Fields<'a> {
    event_type: &'a str,
    prefix: Option<&'a str>,
    object: &'a Map<String, Value>,
}

/// Owned path prefixes for nested views. Kept separate so `Fields` stays `Copy`.
pub struct Nested<'a> {
    event_type: &'a str,
    path: String,
    object: &'a Map<String, Value>,
}

impl<'a> Nested<'a> {
    pub fn fields(&self) -> Fields<'_> {
        Fields {
            event_type: self.event_type,
            prefix: Some(&self.path),
            object: self.object,
        }
    }
}

impl<'a> Fields<'a> {
    pub fn new(event_type: &'a str, object: &'a Map<String, Value>) -> Self {
        Self {
            event_type,
            prefix: None,
            object,
        }
    }

    pub fn path(&self, key: &str) -> String {
        match self.prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key.to_string(),
        }
    }

    /// The value under `key`, treating JSON `null` as absent.
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.object.get(key).filter(|v| !v.is_null())
    }

    pub fn value(&self, key: &str) -> Result<&'a Value> {
        self.get(key)
            .ok_or_else(|| self.missing(key))
    }

    /// A non-empty string under `key`, if there is one.
    pub fn non_empty_str(&self, key: &str) -> Option<&'a str> {
        self.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Required non-empty string. Blank strings count as missing.
    pub fn string(&self, key: &str) -> Result<&'a str> {
        let value = self.value(key)?;
        let s = value
            .as_str()
            .ok_or_else(|| self.invalid(key, "must be a string"))?;
        if s.trim().is_empty() {
            return Err(self.missing(key));
        }
        Ok(s)
    }

    /// Required string drawn from `allowed`.
    pub fn one_of(&self, key: &str, allowed: &[&str]) -> Result<&'a str> {
        let value = self.value(key)?;
        match value.as_str() {
            Some(s) if allowed.contains(&s) => Ok(s),
            other => Err(EventStoreError::Enumeration {
                event_type: self.event_type.to_string(),
                field: self.path(key),
                value: other.map(str::to_string).unwrap_or_else(|| value.to_string()),
                allowed: allowed.iter().map(|s| s.to_string()).collect(),
            }),
        }
    }

    pub fn object(&self, key: &str) -> Result<Nested<'a>> {
        let value = self.value(key)?;
        let object = value
            .as_object()
            .ok_or_else(|| self.invalid(key, "must be a JSON object"))?;
        Ok(Nested {
            event_type: self.event_type,
            path: self.path(key),
            object,
        })
    }

    pub fn list(&self, key: &str) -> Result<&'a [Value]> {
        let value = self.value(key)?;
        value
            .as_array()
            .map(Vec::as_slice)
            .ok_or_else(|| self.invalid(key, "must be a list"))
    }

    pub fn non_empty_list(&self, key: &str) -> Result<&'a [Value]> {
        let items = self.list(key)?;
        if items.is_empty() {
            return Err(self.invalid(key, "must not be empty"));
        }
        Ok(items)
    }

    /// Absent (or null) is fine; anything present must be a list.
    pub fn optional_list(&self, key: &str) -> Result<&'a [Value]> {
        match self.get(key) {
            None => Ok(&[]),
            Some(_) => self.list(key),
        }
    }

    /// Element `index` of the list under `key`, which must be an object.
    pub fn element(&self, key: &str, index: usize, item: &'a Value) -> Result<Nested<'a>> {
        let path = format!("{}[{index}]", self.path(key));
        let object = item.as_object().ok_or_else(|| {
            EventStoreError::invalid(self.event_type, path.clone(), "must be a JSON object")
        })?;
        Ok(Nested {
            event_type: self.event_type,
            path,
            object,
        })
    }

    /// Required number in `[0, 1]`.
    pub fn confidence(&self, key: &str) -> Result<f64> {
        let value = self.value(key)?;
        match value.as_f64() {
            Some(c) if (0.0..=1.0).contains(&c) => Ok(c),
            Some(_) => Err(self.invalid(key, "must be between 0 and 1")),
            None => Err(self.invalid(key, "must be a number")),
        }
    }

    pub fn missing(&self, key: &str) -> EventStoreError {
        EventStoreError::missing(self.event_type, self.path(key))
    }

    pub fn invalid(&self, key: &str, reason: &str) -> EventStoreError {
        EventStoreError::invalid(self.event_type, self.path(key), reason)
    }

    pub fn conditional(&self, key: &str, rule: &str) -> EventStoreError {
        EventStoreError::conditional(self.event_type, self.path(key), rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn null_counts_as_missing() {
        let obj = object(json!({"conv_id": null}));
        let fields = Fields::new("ChatPlanIssued", &obj);
        let err = fields.string("conv_id").unwrap_err();
        assert!(matches!(err, EventStoreError::MissingField { ref field, .. } if field == "conv_id"));
    }

    #[test]
    fn wrong_type_is_invalid_not_missing() {
        let obj = object(json!({"reason": 5}));
        let fields = Fields::new("ExplorationDecision", &obj);
        assert!(matches!(
            fields.string("reason").unwrap_err(),
            EventStoreError::InvalidField { .. }
        ));
    }

    #[test]
    fn one_of_reports_offending_value() {
        let obj = object(json!({"scope": "device"}));
        let fields = Fields::new("ManualAssessment", &obj);
        match fields.one_of("scope", &["conversation", "account"]).unwrap_err() {
            EventStoreError::Enumeration { field, value, allowed, .. } => {
                assert_eq!(field, "scope");
                assert_eq!(value, "device");
                assert_eq!(allowed, vec!["conversation", "account"]);
            }
            other => panic!("expected Enumeration, got {other:?}"),
        }
    }

    #[test]
    fn nested_paths_include_list_index() {
        let obj = object(json!({"basis": {"legal_breaches": [{}, {"uri": "x"}]}}));
        let fields = Fields::new("ScoreChat", &obj);
        let basis = fields.object("basis").unwrap();
        let basis = basis.fields();
        let items = basis.list("legal_breaches").unwrap();
        let second = basis.element("legal_breaches", 1, &items[1]).unwrap();
        let err = second.fields().string("requirement").unwrap_err();
        assert!(err.to_string().contains("basis.legal_breaches[1].requirement"));
    }

    #[test]
    fn confidence_bounds() {
        let obj = object(json!({"a": 0.0, "b": 1.0, "c": 1.5, "d": "high"}));
        let fields = Fields::new("JuryAssessment", &obj);
        assert!(fields.confidence("a").is_ok());
        assert!(fields.confidence("b").is_ok());
        assert!(fields.confidence("c").is_err());
        assert!(fields.confidence("d").is_err());
    }
}
