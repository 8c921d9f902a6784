use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating mode reported by the heat pump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    Heating,
    Standby,
    Fault,
    Defrosting,
}

impl OperatingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::Heating => "heating",
            OperatingMode::Standby => "standby",
            OperatingMode::Fault => "fault",
            OperatingMode::Defrosting => "defrosting",
        }
    }

    /// Parse a mode name as published on the status topic
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heating" | "heizen" => Some(OperatingMode::Heating),
            "standby" => Some(OperatingMode::Standby),
            "fault" | "stoerung" => Some(OperatingMode::Fault),
            "defrosting" | "abtauen" => Some(OperatingMode::Defrosting),
            _ => None,
        }
    }

    /// Compressor is running in these modes
    pub fn is_running(&self) -> bool {
        matches!(self, OperatingMode::Heating | OperatingMode::Defrosting)
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One snapshot of the installation's sensors.
///
/// The serialized form keeps the field names used on the MQTT topics and in
/// stored monitoring state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatingData {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "aussentemperatur")]
    pub outside_temp: f64,
    #[serde(rename = "vorlauftemperatur")]
    pub flow_temp: f64,
    #[serde(rename = "ruecklauftemperatur")]
    pub return_temp: f64,
    #[serde(rename = "puffer_oben")]
    pub buffer_top: f64,
    #[serde(rename = "puffer_mitte")]
    pub buffer_middle: f64,
    #[serde(rename = "puffer_unten")]
    pub buffer_bottom: f64,
    /// Circulation pump speed in percent
    #[serde(rename = "pumpe_drehzahl")]
    pub pump_speed: f64,
    /// Electrical power draw in kW
    #[serde(rename = "stromverbrauch")]
    pub power_kw: f64,
    pub cop: f64,
    #[serde(rename = "laufzeit_stunden")]
    pub runtime_hours: f64,
    #[serde(rename = "fehlercode", default, skip_serializing_if = "Option::is_none")]
    pub fault_code: Option<String>,
    #[serde(rename = "betriebsmodus")]
    pub mode: OperatingMode,
}

impl HeatingData {
    /// A zeroed standby snapshot used as merge base before any value arrived
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            outside_temp: 0.0,
            flow_temp: 0.0,
            return_temp: 0.0,
            buffer_top: 0.0,
            buffer_middle: 0.0,
            buffer_bottom: 0.0,
            pump_speed: 0.0,
            power_kw: 0.0,
            cop: 0.0,
            runtime_hours: 0.0,
            fault_code: None,
            mode: OperatingMode::Standby,
        }
    }

    /// Flow minus return temperature
    pub fn spread(&self) -> f64 {
        self.flow_temp - self.return_temp
    }

    /// Estimated thermal output in kW
    pub fn thermal_output_kw(&self) -> f64 {
        self.power_kw * self.cop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse_accepts_both_vocabularies() {
        assert_eq!(OperatingMode::parse("Heating"), Some(OperatingMode::Heating));
        assert_eq!(OperatingMode::parse(" abtauen "), Some(OperatingMode::Defrosting));
        assert_eq!(OperatingMode::parse("boost"), None);
    }

    #[test]
    fn test_serialized_keys() {
        let data = HeatingData::empty(Utc::now());
        let json = serde_json::to_value(&data).unwrap();

        assert!(json.get("aussentemperatur").is_some());
        assert!(json.get("stromverbrauch").is_some());
        assert_eq!(json["betriebsmodus"], "standby");
        assert!(json.get("fehlercode").is_none());
    }
}
