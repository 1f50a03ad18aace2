use uuid::Uuid;

/// Result type alias for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;

#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    #[error("Unknown event type: {event_type}")]
    Referential { event_type: String },

    #[error("{event_type}: schema_generation must be {expected:?}, found {found:?}")]
    SchemaVersion {
        event_type: String,
        expected: String,
        found: Option<String>,
    },

    #[error("{event_type}: missing required field `{field}`")]
    MissingField { event_type: String, field: String },

    #[error("{event_type}: `{field}` = {value:?} is not one of {allowed:?}")]
    Enumeration {
        event_type: String,
        field: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("{event_type}: `{field}` {rule}")]
    ConditionalRequirement {
        event_type: String,
        field: String,
        rule: String,
    },

    #[error("{event_type}: `{field}` {reason}")]
    InvalidField {
        event_type: String,
        field: String,
        reason: String,
    },

    #[error("Event {event_id} is immutable: {reason}")]
    ImmutabilityViolation { event_id: Uuid, reason: String },

    #[error("Event id {0} is already taken")]
    EventIdConflict(Uuid),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    pub(crate) fn missing(event_type: &str, field: impl Into<String>) -> Self {
        Self::MissingField {
            event_type: event_type.to_string(),
            field: field.into(),
        }
    }

    pub(crate) fn invalid(
        event_type: &str,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            event_type: event_type.to_string(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn conditional(
        event_type: &str,
        field: impl Into<String>,
        rule: impl Into<String>,
    ) -> Self {
        Self::ConditionalRequirement {
            event_type: event_type.to_string(),
            field: field.into(),
            rule: rule.into(),
        }
    }

    /// Only id collisions are worth retrying; the caller regenerates the id.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EventIdConflict(_))
    }

    /// True for rejections produced by the validation gate.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Referential { .. }
                | Self::SchemaVersion { .. }
                | Self::MissingField { .. }
                | Self::Enumeration { .. }
                | Self::ConditionalRequirement { .. }
                | Self::InvalidField { .. }
        )
    }
}
