use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status reported by a server-side task.
///
/// The wire form is a lowercase snake_case string; [`TaskStatus::from_wire`]
/// is the only place that mapping lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum TaskStatus {
    Starting,
    Initializing,
    Extracting,
    Saving,
    Filtering,
    Processing,
    Running,
    Completed,
    Error,
    Cancelled,
    NotFound,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 11] = [
        TaskStatus::Starting,
        TaskStatus::Initializing,
        TaskStatus::Extracting,
        TaskStatus::Saving,
        TaskStatus::Filtering,
        TaskStatus::Processing,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Error,
        TaskStatus::Cancelled,
        TaskStatus::NotFound,
    ];

    pub fn from_wire(raw: &str) -> Option<Self> {
        let status = match raw.trim().to_ascii_lowercase().as_str() {
            "starting" => TaskStatus::Starting,
            "initializing" => TaskStatus::Initializing,
            "extracting" => TaskStatus::Extracting,
            "saving" => TaskStatus::Saving,
            "filtering" => TaskStatus::Filtering,
            "processing" => TaskStatus::Processing,
            "running" => TaskStatus::Running,
            "completed" => TaskStatus::Completed,
            "error" => TaskStatus::Error,
            "cancelled" => TaskStatus::Cancelled,
            "not_found" => TaskStatus::NotFound,
            _ => return None,
        };
        Some(status)
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            TaskStatus::Starting => "starting",
            TaskStatus::Initializing => "initializing",
            TaskStatus::Extracting => "extracting",
            TaskStatus::Saving => "saving",
            TaskStatus::Filtering => "filtering",
            TaskStatus::Processing => "processing",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::NotFound => "not_found",
        }
    }

    /// `completed`, `error` and `cancelled` end a task for good.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Error | TaskStatus::Cancelled
        )
    }

    /// The server knows the task and it is still doing work.
    pub fn is_active(self) -> bool {
        !self.is_terminal() && self != TaskStatus::NotFound
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

impl FromStr for TaskStatus {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, RecordError> {
        TaskStatus::from_wire(s).ok_or_else(|| RecordError::UnknownStatus(s.to_string()))
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = RecordError;

    fn try_from(value: String) -> Result<Self, RecordError> {
        value.parse()
    }
}

impl From<TaskStatus> for &'static str {
    fn from(status: TaskStatus) -> Self {
        status.as_wire()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("unknown task status {0:?}")]
    UnknownStatus(String),
    #[error("malformed status payload: {0}")]
    Malformed(String),
}

/// One moment of task progress as exchanged with the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: TaskStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StatusRecord {
    pub fn new(status: TaskStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            progress: None,
            details: None,
            processed_count: None,
            total_count: None,
            error_message: None,
        }
    }

    /// Record used when the server answers a status query without knowing the id.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(TaskStatus::NotFound, message)
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self.normalized()
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_counts(mut self, processed: u64, total: u64) -> Self {
        self.processed_count = Some(processed);
        self.total_count = Some(total);
        self
    }

    pub fn with_error(mut self, error_message: impl Into<String>) -> Self {
        self.error_message = Some(error_message.into());
        self.normalized()
    }

    /// Parses and normalizes one JSON payload.
    pub fn parse(payload: &str) -> Result<Self, RecordError> {
        let value: serde_json::Value =
            serde_json::from_str(payload).map_err(|err| RecordError::Malformed(err.to_string()))?;
        Self::from_value(value)
    }

    pub fn parse_bytes(payload: &[u8]) -> Result<Self, RecordError> {
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|err| RecordError::Malformed(err.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, RecordError> {
        // Surface unknown statuses on their own, serde would bury them in a generic message.
        if let Some(raw) = value.get("status").and_then(serde_json::Value::as_str) {
            raw.parse::<TaskStatus>()?;
        }
        serde_json::from_value::<StatusRecord>(value)
            .map(StatusRecord::normalized)
            .map_err(|err| RecordError::Malformed(err.to_string()))
    }

    /// Clamps progress into [0, 100] and drops fields the status does not allow.
    pub fn normalized(mut self) -> Self {
        self.progress = self
            .progress
            .filter(|value| value.is_finite())
            .map(|value| value.clamp(0.0, 100.0));
        if self.status != TaskStatus::Error {
            self.error_message = None;
        }
        self
    }

    /// Text shown to the user when the task failed.
    pub fn failure_text(&self) -> &str {
        self.error_message.as_deref().unwrap_or(&self.message)
    }
}
