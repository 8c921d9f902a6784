//! Threshold rules over snapshots.
//!
//! A condition raises one alarm when it becomes active; it has to clear
//! before it can alarm again.

use crate::models::{Alarm, AlarmSeverity, HeatingData, OperatingMode};
use crate::settings::MonitoringState;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringRules {
    #[serde(default = "default_min_cop")]
    pub min_cop: f64,
    #[serde(default = "default_max_flow_temp")]
    pub max_flow_temp: f64,
}

fn default_min_cop() -> f64 {
    2.5
}

fn default_max_flow_temp() -> f64 {
    52.0
}

impl Default for MonitoringRules {
    fn default() -> Self {
        Self {
            min_cop: default_min_cop(),
            max_flow_temp: default_max_flow_temp(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Fault,
    LowCop,
    HighFlowTemp,
    InvertedBuffer,
    Defrost,
}

impl Condition {
    pub const ALL: [Condition; 5] = [
        Condition::Fault,
        Condition::LowCop,
        Condition::HighFlowTemp,
        Condition::InvertedBuffer,
        Condition::Defrost,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Condition::Fault => "fault",
            Condition::LowCop => "low_cop",
            Condition::HighFlowTemp => "high_flow_temp",
            Condition::InvertedBuffer => "inverted_buffer",
            Condition::Defrost => "defrost",
        }
    }

    pub fn severity(&self) -> AlarmSeverity {
        match self {
            Condition::Fault => AlarmSeverity::Error,
            Condition::LowCop | Condition::HighFlowTemp | Condition::InvertedBuffer => {
                AlarmSeverity::Warning
            }
            Condition::Defrost => AlarmSeverity::Info,
        }
    }

    fn is_active(&self, rules: &MonitoringRules, d: &HeatingData) -> bool {
        match self {
            Condition::Fault => d.mode == OperatingMode::Fault || d.fault_code.is_some(),
            Condition::LowCop => d.mode == OperatingMode::Heating && d.cop < rules.min_cop,
            Condition::HighFlowTemp => d.flow_temp > rules.max_flow_temp,
            Condition::InvertedBuffer => {
                d.buffer_bottom > d.buffer_middle || d.buffer_middle > d.buffer_top
            }
            Condition::Defrost => d.mode == OperatingMode::Defrosting,
        }
    }

    fn alarm(&self, rules: &MonitoringRules, d: &HeatingData) -> Alarm {
        let (title, message) = match self {
            Condition::Fault => (
                "Heat pump fault".to_string(),
                format!(
                    "Heat pump reports a fault (code {})",
                    d.fault_code.as_deref().unwrap_or("unknown")
                ),
            ),
            Condition::LowCop => (
                "Low efficiency".to_string(),
                format!("COP {:.2} below {:.2}", d.cop, rules.min_cop),
            ),
            Condition::HighFlowTemp => (
                "High flow temperature".to_string(),
                format!(
                    "Flow temperature {:.1} °C above {:.1} °C",
                    d.flow_temp, rules.max_flow_temp
                ),
            ),
            Condition::InvertedBuffer => (
                "Buffer stratification inverted".to_string(),
                format!(
                    "Buffer top/middle/bottom {:.1}/{:.1}/{:.1} °C",
                    d.buffer_top, d.buffer_middle, d.buffer_bottom
                ),
            ),
            Condition::Defrost => (
                "Defrost cycle".to_string(),
                format!("Defrost started at {:.1} °C outside", d.outside_temp),
            ),
        };
        Alarm::new(self.severity(), title, message, d.timestamp)
    }
}

pub struct Monitor {
    rules: MonitoringRules,
    state: MonitoringState,
}

impl Monitor {
    pub fn new(rules: MonitoringRules, state: MonitoringState) -> Self {
        Self { rules, state }
    }

    pub fn state(&self) -> &MonitoringState {
        &self.state
    }

    /// Check one snapshot; returns alarms for conditions that just became active.
    pub fn evaluate(&mut self, data: &HeatingData) -> Vec<Alarm> {
        let mut raised = Vec::new();
        for condition in Condition::ALL {
            let key = condition.key();
            if condition.is_active(&self.rules, data) {
                if self.state.active_conditions.insert(key.to_string()) {
                    debug!(condition = key, "monitoring condition became active");
                    raised.push(condition.alarm(&self.rules, data));
                }
            } else if self.state.active_conditions.remove(key) {
                debug!(condition = key, "monitoring condition cleared");
            }
        }

        self.state.last_check = Some(data.timestamp);
        self.state.checks += 1;
        self.state.alarms_raised += raised.len() as u64;
        raised
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new(MonitoringRules::default(), MonitoringState::default())
    }
}
