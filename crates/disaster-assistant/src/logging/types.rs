use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Activity type categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    TurnReceived,
    SessionCreated,
    TurnCompleted,
    TurnFailed,
    SessionsEvicted,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TurnReceived => "turn_received",
            Self::SessionCreated => "session_created",
            Self::TurnCompleted => "turn_completed",
            Self::TurnFailed => "turn_failed",
            Self::SessionsEvicted => "sessions_evicted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Success,
    Error,
    Warning,
    Info,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

/// Complete activity log entry
#[derive(Debug, Clone, Serialize)]
pub struct ActivityLog {
    pub session_id: String,

    pub activity_type: ActivityType,
    pub activity_status: ActivityStatus,

    // Turn context
    pub route: Option<String>,
    pub message_content: Option<String>,
    pub response_content: Option<String>,

    pub processing_time_ms: Option<u64>,

    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,

    pub custom_fields: Option<HashMap<String, Value>>,
}

impl ActivityLog {
    /// Create builder for fluent API
    pub fn builder(session_id: impl Into<String>, activity_type: ActivityType) -> ActivityLogBuilder {
        ActivityLogBuilder::new(session_id.into(), activity_type)
    }
}

pub struct ActivityLogBuilder {
    log: ActivityLog,
}

impl ActivityLogBuilder {
    pub fn new(session_id: String, activity_type: ActivityType) -> Self {
        Self {
            log: ActivityLog {
                session_id,
                activity_type,
                activity_status: ActivityStatus::Success,
                route: None,
                message_content: None,
                response_content: None,
                processing_time_ms: None,
                error_message: None,
                created_at: Utc::now(),
                custom_fields: None,
            },
        }
    }

    pub fn status(mut self, status: ActivityStatus) -> Self {
        self.log.activity_status = status;
        self
    }

    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.log.route = Some(route.into());
        self
    }

    pub fn message(mut self, content: impl Into<String>) -> Self {
        self.log.message_content = Some(content.into());
        self
    }

    pub fn response(mut self, content: impl Into<String>) -> Self {
        self.log.response_content = Some(content.into());
        self
    }

    pub fn processing_time(mut self, ms: u64) -> Self {
        self.log.processing_time_ms = Some(ms);
        self
    }

    /// Marks the entry as failed.
    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.log.error_message = Some(message.into());
        self.log.activity_status = ActivityStatus::Error;
        self
    }

    pub fn custom(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.log
            .custom_fields
            .get_or_insert_with(HashMap::new)
            .insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> ActivityLog {
        self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_error_flips_status() {
        let log = ActivityLog::builder("s1", ActivityType::TurnFailed)
            .route("rag")
            .error("no response")
            .build();

        assert_eq!(log.activity_status, ActivityStatus::Error);
        assert_eq!(log.route.as_deref(), Some("rag"));
        assert_eq!(log.activity_type.as_str(), "turn_failed");
    }

    #[test]
    fn test_custom_fields_accumulate() {
        let log = ActivityLog::builder("s1", ActivityType::TurnCompleted)
            .custom("score", 0.8)
            .custom("approved", true)
            .build();

        let fields = log.custom_fields.unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["approved"], Value::Bool(true));
    }
}
