use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmSeverity {
    Info,
    Warning,
    Error,
}

impl AlarmSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmSeverity::Info => "info",
            AlarmSeverity::Warning => "warning",
            AlarmSeverity::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Some(AlarmSeverity::Info),
            "warning" | "warn" => Some(AlarmSeverity::Warning),
            "error" | "critical" => Some(AlarmSeverity::Error),
            _ => None,
        }
    }
}

impl fmt::Display for AlarmSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: String,
    pub severity: AlarmSeverity,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged: bool,
}

impl Alarm {
    /// New unacknowledged alarm with a generated id
    pub fn new(
        severity: AlarmSeverity,
        title: impl Into<String>,
        message: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            severity,
            title: title.into(),
            message: message.into(),
            created_at,
            acknowledged: false,
        }
    }
}
