//! Uniform access to telemetry regardless of where it comes from.

pub mod live;
pub mod simulated;

pub use live::{LiveSource, LiveState, MqttFeed};
pub use simulated::{SimulatedSource, TickOutcome};

use crate::error::Result;
use crate::export;
use crate::models::{Alarm, HeatingData};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Simulation,
    Mqtt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub kind: SourceKind,
    pub connected: bool,
    pub last_error: Option<String>,
}

pub trait DataSource: Send {
    /// Latest snapshot, if any arrived yet
    fn current(&self) -> Option<HeatingData>;

    /// Snapshots with `start <= timestamp <= end`, oldest first
    fn history(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<HeatingData>;

    fn alarms(&self) -> Vec<Alarm>;

    /// Returns false when no alarm has this id
    fn acknowledge(&mut self, id: &str) -> bool;

    fn status(&self) -> ConnectionStatus;

    /// History of the range as semicolon-separated text
    fn export_csv(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<String> {
        export::export_csv(&self.history(start, end))
    }
}
