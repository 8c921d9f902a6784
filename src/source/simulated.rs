use super::{ConnectionStatus, DataSource, SourceKind};
use crate::alarms::AlarmList;
use crate::models::{Alarm, HeatingData};
use crate::services::Monitor;
use crate::simulator::{Simulator, SimulatorConfig};
use chrono::{DateTime, Local, TimeZone, Utc};
use std::time::Duration;
use tracing::debug;

/// Result of one simulator tick
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub data: HeatingData,
    /// Alarms raised by this tick and appended to the list
    pub new_alarms: Vec<Alarm>,
}

pub struct SimulatedSource {
    simulator: Simulator,
    history_config: SimulatorConfig,
    monitor: Monitor,
    alarms: AlarmList,
    latest: Option<HeatingData>,
}

impl SimulatedSource {
    pub fn new(config: &SimulatorConfig, tick_length: Duration, monitor: Monitor) -> Self {
        // history is re-synthesised per query; a fixed seed keeps it stable
        let history_config = SimulatorConfig {
            seed: Some(config.seed.unwrap_or_else(rand::random)),
            ..config.clone()
        };
        Self {
            simulator: Simulator::new(config, tick_length),
            history_config,
            monitor,
            alarms: AlarmList::new(),
            latest: None,
        }
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Generate the next snapshot and run the monitoring rules over it.
    pub fn tick<Tz: TimeZone>(&mut self, now: &DateTime<Tz>) -> TickOutcome {
        let data = self.simulator.generate(now);
        let new_alarms: Vec<Alarm> = self
            .monitor
            .evaluate(&data)
            .into_iter()
            .filter(|a| self.alarms.push(a.clone()))
            .collect();

        debug!(
            mode = %data.mode,
            outside = data.outside_temp,
            flow = data.flow_temp,
            cop = data.cop,
            "simulated snapshot"
        );
        self.latest = Some(data.clone());
        TickOutcome { data, new_alarms }
    }
}

/// Sampling resolution for a history query of the given span
pub fn resolution_for_span(span: chrono::Duration) -> u32 {
    if span <= chrono::Duration::hours(24) {
        5
    } else if span <= chrono::Duration::days(7) {
        30
    } else {
        120
    }
}

impl DataSource for SimulatedSource {
    fn current(&self) -> Option<HeatingData> {
        self.latest.clone()
    }

    fn history(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<HeatingData> {
        if end <= start {
            return Vec::new();
        }
        let span = end - start;
        let resolution = resolution_for_span(span);
        let hours = ((span.num_minutes() + 59) / 60) as u32;
        Simulator::history(
            &self.history_config,
            hours,
            resolution,
            &end.with_timezone(&Local),
        )
        .into_iter()
        .filter(|d| d.timestamp >= start)
        .collect()
    }

    fn alarms(&self) -> Vec<Alarm> {
        self.alarms.all().to_vec()
    }

    fn acknowledge(&mut self, id: &str) -> bool {
        self.alarms.acknowledge(id)
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            kind: SourceKind::Simulation,
            connected: true,
            last_error: None,
        }
    }
}
