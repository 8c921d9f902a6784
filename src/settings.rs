//! Records kept in the local store: heating control, e-mail notification
//! and monitoring state.

use crate::models::{Alarm, AlarmSeverity};
use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const COMFORT_BOOST: f64 = 1.0;
pub const ROOM_TEMP_RANGE: (f64, f64) = (5.0, 30.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    #[default]
    Auto,
    Eco,
    Comfort,
    Off,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub weekdays: Vec<Weekday>,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub target_temp: f64,
}

impl ScheduleEntry {
    fn covers(&self, weekday: Weekday, time: NaiveTime) -> bool {
        self.weekdays.contains(&weekday) && time >= self.start && time < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatingControl {
    pub mode: ControlMode,
    pub target_room_temp: f64,
    /// Degrees below target used by eco mode and outside schedule windows
    pub eco_offset: f64,
    #[serde(default)]
    pub schedule: Vec<ScheduleEntry>,
}

impl Default for HeatingControl {
    fn default() -> Self {
        Self {
            mode: ControlMode::Auto,
            target_room_temp: 21.0,
            eco_offset: 3.0,
            schedule: Vec::new(),
        }
    }
}

impl HeatingControl {
    /// Room temperature target at `now`; `None` when heating is off.
    pub fn target_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<f64> {
        let target = match self.mode {
            ControlMode::Off => return None,
            ControlMode::Comfort => self.target_room_temp + COMFORT_BOOST,
            ControlMode::Eco => self.target_room_temp - self.eco_offset,
            ControlMode::Auto => {
                let weekday = now.weekday();
                let time = now.time();
                self.schedule
                    .iter()
                    .find(|e| e.covers(weekday, time))
                    .map(|e| e.target_temp)
                    .unwrap_or(self.target_room_temp - self.eco_offset)
            }
        };
        Some(target.clamp(ROOM_TEMP_RANGE.0, ROOM_TEMP_RANGE.1))
    }

    pub fn validate(&self) -> Result<(), String> {
        let (lo, hi) = ROOM_TEMP_RANGE;
        if !(lo..=hi).contains(&self.target_room_temp) {
            return Err(format!("target_room_temp must be within {lo}..={hi}"));
        }
        if self.eco_offset < 0.0 {
            return Err("eco_offset cannot be negative".to_string());
        }
        for (i, entry) in self.schedule.iter().enumerate() {
            if entry.start >= entry.end {
                return Err(format!("schedule entry {i}: start must be before end"));
            }
            if entry.weekdays.is_empty() {
                return Err(format!("schedule entry {i}: no weekdays"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailConfig {
    pub enabled: bool,
    #[serde(default)]
    pub recipients: Vec<String>,
    pub min_severity: AlarmSeverity,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            recipients: Vec::new(),
            min_severity: AlarmSeverity::Error,
        }
    }
}

impl EmailConfig {
    pub fn should_notify(&self, alarm: &Alarm) -> bool {
        self.enabled && !self.recipients.is_empty() && alarm.severity >= self.min_severity
    }
}

/// Persisted between runs so a condition that was already alarmed is not
/// raised again after a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoringState {
    pub last_check: Option<DateTime<Utc>>,
    pub checks: u64,
    pub alarms_raised: u64,
    #[serde(default)]
    pub active_conditions: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn workday_morning() -> ScheduleEntry {
        ScheduleEntry {
            weekdays: vec![Weekday::Mon, Weekday::Tue],
            start: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            target_temp: 22.5,
        }
    }

    #[test]
    fn test_auto_mode_uses_schedule() {
        let control = HeatingControl {
            schedule: vec![workday_morning()],
            ..Default::default()
        };
        // 2024-01-15 is a Monday
        let inside = Utc.with_ymd_and_hms(2024, 1, 15, 7, 30, 0).unwrap();
        let outside = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let sunday = Utc.with_ymd_and_hms(2024, 1, 14, 7, 30, 0).unwrap();

        assert_eq!(control.target_at(&inside), Some(22.5));
        assert_eq!(control.target_at(&outside), Some(18.0));
        assert_eq!(control.target_at(&sunday), Some(18.0));
    }

    #[test]
    fn test_fixed_modes() {
        let now = Utc::now();
        let mut control = HeatingControl::default();
        control.mode = ControlMode::Comfort;
        assert_eq!(control.target_at(&now), Some(22.0));
        control.mode = ControlMode::Off;
        assert_eq!(control.target_at(&now), None);
    }

    #[test]
    fn test_validate_rejects_inverted_window() {
        let mut entry = workday_morning();
        std::mem::swap(&mut entry.start, &mut entry.end);
        let control = HeatingControl {
            schedule: vec![entry],
            ..Default::default()
        };
        assert!(control.validate().is_err());
        assert!(HeatingControl::default().validate().is_ok());
    }

    #[test]
    fn test_email_severity_filter() {
        let config = EmailConfig {
            enabled: true,
            recipients: vec!["ops@example.org".into()],
            min_severity: AlarmSeverity::Warning,
        };
        let now = Utc::now();
        assert!(config.should_notify(&Alarm::new(AlarmSeverity::Error, "t", "m", now)));
        assert!(!config.should_notify(&Alarm::new(AlarmSeverity::Info, "t", "m", now)));
        assert!(!EmailConfig::default().should_notify(&Alarm::new(AlarmSeverity::Error, "t", "m", now)));
    }
}
