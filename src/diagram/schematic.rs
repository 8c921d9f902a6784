//! Elements of the heating-circuit schematic and their detail panels.

use crate::models::HeatingData;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    HeatPump,
    BufferTank,
    Pump,
    Valve,
    Sensor,
    HeatingCircuit,
    Pipe,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SchematicElement {
    pub id: &'static str,
    pub label: &'static str,
    pub kind: ElementKind,
}

/// Every element id present in `assets/schematic.svg`
pub const ELEMENTS: &[SchematicElement] = &[
    SchematicElement {
        id: "heat_pump",
        label: "Heat pump",
        kind: ElementKind::HeatPump,
    },
    SchematicElement {
        id: "buffer_tank",
        label: "Buffer tank",
        kind: ElementKind::BufferTank,
    },
    SchematicElement {
        id: "circulation_pump",
        label: "Circulation pump",
        kind: ElementKind::Pump,
    },
    SchematicElement {
        id: "mixing_valve",
        label: "Mixing valve",
        kind: ElementKind::Valve,
    },
    SchematicElement {
        id: "heating_circuit",
        label: "Heating circuit",
        kind: ElementKind::HeatingCircuit,
    },
    SchematicElement {
        id: "sensor_outside",
        label: "Outside sensor",
        kind: ElementKind::Sensor,
    },
    SchematicElement {
        id: "sensor_flow",
        label: "Flow sensor",
        kind: ElementKind::Sensor,
    },
    SchematicElement {
        id: "sensor_return",
        label: "Return sensor",
        kind: ElementKind::Sensor,
    },
    SchematicElement {
        id: "pipe_flow",
        label: "Flow line",
        kind: ElementKind::Pipe,
    },
    SchematicElement {
        id: "pipe_return",
        label: "Return line",
        kind: ElementKind::Pipe,
    },
];

pub fn element(id: &str) -> Option<&'static SchematicElement> {
    ELEMENTS.iter().find(|e| e.id == id)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailLine {
    pub label: &'static str,
    pub value: String,
}

fn line(label: &'static str, value: String) -> DetailLine {
    DetailLine { label, value }
}

fn celsius(v: f64) -> String {
    format!("{:.1} °C", v)
}

/// Detail panel content for an element. Without data only the label is shown.
pub fn detail(id: &str, data: Option<&HeatingData>) -> Option<Vec<DetailLine>> {
    let element = element(id)?;
    let mut lines = vec![line("Element", element.label.to_string())];
    let Some(d) = data else {
        return Some(lines);
    };

    match id {
        "heat_pump" => {
            lines.push(line("Mode", d.mode.to_string()));
            lines.push(line("Power", format!("{:.2} kW", d.power_kw)));
            lines.push(line("COP", format!("{:.2}", d.cop)));
            lines.push(line("Thermal output", format!("{:.2} kW", d.thermal_output_kw())));
            lines.push(line("Runtime", format!("{:.1} h", d.runtime_hours)));
            if let Some(code) = &d.fault_code {
                lines.push(line("Fault", code.clone()));
            }
        }
        "buffer_tank" => {
            lines.push(line("Top", celsius(d.buffer_top)));
            lines.push(line("Middle", celsius(d.buffer_middle)));
            lines.push(line("Bottom", celsius(d.buffer_bottom)));
        }
        "circulation_pump" => {
            lines.push(line("Speed", format!("{:.0} %", d.pump_speed)));
        }
        "mixing_valve" | "heating_circuit" => {
            lines.push(line("Flow", celsius(d.flow_temp)));
            lines.push(line("Return", celsius(d.return_temp)));
            lines.push(line("Spread", format!("{:.1} K", d.spread())));
        }
        "sensor_outside" => lines.push(line("Temperature", celsius(d.outside_temp))),
        "sensor_flow" | "pipe_flow" => lines.push(line("Temperature", celsius(d.flow_temp))),
        "sensor_return" | "pipe_return" => {
            lines.push(line("Temperature", celsius(d.return_temp)))
        }
        _ => {}
    }
    Some(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OperatingMode;
    use chrono::Utc;

    #[test]
    fn test_element_ids_unique() {
        let mut ids: Vec<_> = ELEMENTS.iter().map(|e| e.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), ELEMENTS.len());
    }

    #[test]
    fn test_detail_lines() {
        let mut data = HeatingData::empty(Utc::now());
        data.buffer_top = 48.3;
        data.mode = OperatingMode::Heating;

        let buffer = detail("buffer_tank", Some(&data)).unwrap();
        assert_eq!(buffer[1], line("Top", "48.3 °C".into()));
        assert_eq!(detail("buffer_tank", None).unwrap().len(), 1);
        assert!(detail("chimney", Some(&data)).is_none());
    }
}
