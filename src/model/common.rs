use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Id = String;

/// Database primary key of LIMS entities (users, libraries, ...)
pub type EntityId = i64;

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

/// RFC 3339 timestamp of the current instant
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashCategory {
    Info,
    Success,
    Warning,
    Error,
}

impl FlashCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlashCategory::Info => "info",
            FlashCategory::Success => "success",
            FlashCategory::Warning => "warning",
            FlashCategory::Error => "error",
        }
    }
}

/// A user-facing message that survives until it is rendered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub message: String,
    pub category: FlashCategory,
}

impl Flash {
    pub fn new(message: impl Into<String>, category: FlashCategory) -> Self {
        Self {
            message: message.into(),
            category,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message, FlashCategory::Error)
    }
}
