use crate::error::{AppError, Result};
use crate::models::HeatingData;

pub const DELIMITER: u8 = b';';

pub const COLUMNS: [&str; 13] = [
    "zeitstempel",
    "aussentemperatur",
    "vorlauftemperatur",
    "ruecklauftemperatur",
    "puffer_oben",
    "puffer_mitte",
    "puffer_unten",
    "pumpe_drehzahl",
    "stromverbrauch",
    "cop",
    "laufzeit_stunden",
    "betriebsmodus",
    "fehlercode",
];

/// Render records as semicolon-separated text: one header row, then one row
/// per record, every row with [`COLUMNS`]`.len()` fields.
pub fn export_csv(records: &[HeatingData]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(DELIMITER)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer.write_record(COLUMNS)?;
    for r in records {
        writer.write_record(row(r))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Other(anyhow::anyhow!("flushing csv buffer: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| AppError::Other(e.into()))
}

fn row(r: &HeatingData) -> [String; 13] {
    [
        r.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        format!("{:.1}", r.outside_temp),
        format!("{:.1}", r.flow_temp),
        format!("{:.1}", r.return_temp),
        format!("{:.1}", r.buffer_top),
        format!("{:.1}", r.buffer_middle),
        format!("{:.1}", r.buffer_bottom),
        format!("{:.0}", r.pump_speed),
        format!("{:.2}", r.power_kw),
        format!("{:.2}", r.cop),
        format!("{:.1}", r.runtime_hours),
        r.mode.as_str().to_string(),
        r.fault_code.clone().unwrap_or_default(),
    ]
}
