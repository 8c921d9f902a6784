//! Synthetic telemetry for installations without a live feed.
//!
//! Produces one plausible [`HeatingData`] snapshot per call: a daily outside
//! temperature cycle, a heating curve for the flow temperature, stratified
//! buffer readings and a Carnot-based COP. All state (tick counter, runtime,
//! RNG) lives in [`Simulator`], so two simulators built with the same seed
//! and fed the same clock produce the same series.

use crate::models::{HeatingData, OperatingMode};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::time::Duration;

pub const OUTSIDE_TEMP_RANGE: (f64, f64) = (-25.0, 40.0);
/// Flow temperature while the compressor runs
pub const HEATING_FLOW_RANGE: (f64, f64) = (30.0, 55.0);
/// Flow temperature in any mode, standby idle included
pub const FLOW_TEMP_RANGE: (f64, f64) = (25.5, 55.0);
pub const RETURN_TEMP_RANGE: (f64, f64) = (20.0, 51.0);
pub const COP_RANGE: (f64, f64) = (2.0, 6.0);
pub const POWER_RANGE_KW: (f64, f64) = (0.0, 5.0);
pub const PUMP_SPEED_RANGE: (f64, f64) = (0.0, 100.0);

const DAILY_MIN_HOUR: f64 = 6.0;
const DAILY_MAX_HOUR: f64 = 15.0;
const DAILY_AMPLITUDE: f64 = 5.0;

const IDLE_FLOW_TEMP: f64 = 27.0;
const CARNOT_EFFICIENCY: f64 = 0.45;
const KELVIN: f64 = 273.15;
const DEFROST_POWER_KW: f64 = 2.5;
const INITIAL_RUNTIME_HOURS: f64 = 4250.0;

const DAY_START_HOUR: u32 = 6;
const DAY_END_HOUR: u32 = 22;
const DEFROST_PERIOD_TICKS: u64 = 200;
const DEFROST_TICKS: u64 = 5;
const DUTY_BLOCK_TICKS: u64 = 12;
const DAY_STANDBY_SHARE: u64 = 2;
const NIGHT_STANDBY_SHARE: u64 = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Fixed RNG seed; random when absent
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_baseline_outside_temp")]
    pub baseline_outside_temp: f64,
}

fn default_baseline_outside_temp() -> f64 {
    3.0
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: None,
            baseline_outside_temp: default_baseline_outside_temp(),
        }
    }
}

pub struct Simulator {
    rng: StdRng,
    tick: u64,
    runtime_hours: f64,
    tick_length: Duration,
    baseline_outside_temp: f64,
}

impl Simulator {
    pub fn new(config: &SimulatorConfig, tick_length: Duration) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            tick: 0,
            runtime_hours: INITIAL_RUNTIME_HOURS,
            tick_length,
            baseline_outside_temp: config.baseline_outside_temp,
        }
    }

    pub fn with_seed(seed: u64, config: &SimulatorConfig, tick_length: Duration) -> Self {
        let config = SimulatorConfig {
            seed: Some(seed),
            ..config.clone()
        };
        Self::new(&config, tick_length)
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn runtime_hours(&self) -> f64 {
        self.runtime_hours
    }

    /// Produce the snapshot for wall-clock `now` and advance the internal counters.
    /// The local hour of `now` drives the daily cycle and the mode duty cycle.
    pub fn generate<Tz: TimeZone>(&mut self, now: &DateTime<Tz>) -> HeatingData {
        let hour = now.hour();
        let hour_of_day = hour as f64 + now.minute() as f64 / 60.0;
        let mode = operating_mode(self.tick, hour);
        self.tick = self.tick.wrapping_add(1);

        let outside = clamp(
            outside_temperature_base(hour_of_day, self.baseline_outside_temp) + self.jitter(0.5),
            OUTSIDE_TEMP_RANGE,
        );
        let heating_flow = clamp(heating_curve(outside) + self.jitter(0.5), HEATING_FLOW_RANGE);
        let flow = match mode {
            OperatingMode::Standby => IDLE_FLOW_TEMP + self.jitter(1.5),
            OperatingMode::Defrosting => clamp(heating_flow - 5.0, HEATING_FLOW_RANGE),
            OperatingMode::Heating | OperatingMode::Fault => heating_flow,
        };
        let return_temp = flow - self.rng.gen_range(4.0..=5.5);

        let buffer_base = flow - 2.0;
        let buffer_top = buffer_base + self.rng.gen_range(0.0..=0.5);
        let buffer_middle = buffer_base - 3.0 + self.jitter(0.5);
        let buffer_bottom = buffer_base - 7.0 + self.jitter(0.5);

        let cop = carnot_cop(flow, outside);
        let (power_kw, pump_speed) = match mode {
            OperatingMode::Heating | OperatingMode::Fault => {
                (thermal_load_kw(outside) / cop, self.rng.gen_range(60.0..=80.0))
            }
            OperatingMode::Standby => (self.rng.gen_range(0.05..=0.1), 0.0),
            OperatingMode::Defrosting => (DEFROST_POWER_KW, 100.0),
        };

        if mode.is_running() {
            self.runtime_hours += self.tick_length.as_secs_f64() / 3600.0;
        }

        HeatingData {
            timestamp: now.with_timezone(&Utc),
            outside_temp: round_to(outside, 1),
            flow_temp: round_to(flow, 1),
            return_temp: round_to(return_temp, 1),
            buffer_top: round_to(buffer_top, 1),
            buffer_middle: round_to(buffer_middle, 1),
            buffer_bottom: round_to(buffer_bottom, 1),
            pump_speed: round_to(pump_speed, 0),
            power_kw: round_to(clamp(power_kw, POWER_RANGE_KW), 2),
            cop: round_to(cop, 2),
            runtime_hours: round_to(self.runtime_hours, 2),
            fault_code: None,
            mode,
        }
    }

    /// Back-fill `hours` of history at `resolution_minutes` spacing, oldest first,
    /// ending at `end`. Uses a fresh simulator whose tick length is the resolution.
    pub fn history<Tz: TimeZone>(
        config: &SimulatorConfig,
        hours: u32,
        resolution_minutes: u32,
        end: &DateTime<Tz>,
    ) -> Vec<HeatingData> {
        if resolution_minutes == 0 {
            return Vec::new();
        }
        let count = (hours as u64 * 60 / resolution_minutes as u64) as i64;
        let step = ChronoDuration::minutes(resolution_minutes as i64);
        let mut sim = Simulator::new(
            config,
            Duration::from_secs(resolution_minutes as u64 * 60),
        );

        (0..count)
            .map(|i| {
                let ts = end.clone() - step * (count - 1 - i) as i32;
                sim.generate(&ts)
            })
            .collect()
    }

    fn jitter(&mut self, amplitude: f64) -> f64 {
        self.rng.gen_range(-amplitude..=amplitude)
    }
}

/// Daily outside temperature without jitter: minimum at 06:00, maximum at 15:00.
pub fn outside_temperature_base(hour_of_day: f64, baseline: f64) -> f64 {
    baseline + DAILY_AMPLITUDE * daily_cycle(hour_of_day)
}

/// -1 at the daily minimum, +1 at the daily maximum.
fn daily_cycle(hour_of_day: f64) -> f64 {
    let h = hour_of_day.rem_euclid(24.0);
    let rising = DAILY_MAX_HOUR - DAILY_MIN_HOUR;
    let phase = if (DAILY_MIN_HOUR..DAILY_MAX_HOUR).contains(&h) {
        PI * (h - DAILY_MIN_HOUR) / rising
    } else {
        let since_max = (h - DAILY_MAX_HOUR).rem_euclid(24.0);
        PI + PI * since_max / (24.0 - rising)
    };
    -phase.cos()
}

/// Colder outside, hotter flow. Unclamped.
pub fn heating_curve(outside: f64) -> f64 {
    35.0 + (20.0 - outside) * 0.6
}

fn thermal_load_kw(outside: f64) -> f64 {
    (0.35 * (20.0 - outside)).clamp(2.0, 10.0)
}

/// Carnot COP scaled by a fixed efficiency, clamped to [`COP_RANGE`].
///
/// When the lift between flow and outside temperature vanishes the ideal COP
/// diverges; the upper bound is returned instead.
pub fn carnot_cop(flow_temp: f64, outside_temp: f64) -> f64 {
    let t_flow = flow_temp + KELVIN;
    let t_outside = outside_temp + KELVIN;
    let lift = t_flow - t_outside;
    if lift <= 1e-6 || !lift.is_finite() {
        return COP_RANGE.1;
    }
    clamp(t_flow / lift * CARNOT_EFFICIENCY, COP_RANGE)
}

/// Mode for a given tick and local hour. Pure: no randomness.
///
/// Daytime ticks near the end of every defrost period are defrosting; the
/// rest follow a duty cycle with more standby at night.
pub fn operating_mode(tick: u64, hour: u32) -> OperatingMode {
    let daytime = (DAY_START_HOUR..DAY_END_HOUR).contains(&hour);
    if daytime && tick % DEFROST_PERIOD_TICKS >= DEFROST_PERIOD_TICKS - DEFROST_TICKS {
        return OperatingMode::Defrosting;
    }
    let standby_share = if daytime {
        DAY_STANDBY_SHARE
    } else {
        NIGHT_STANDBY_SHARE
    };
    if (tick / DUTY_BLOCK_TICKS) % 10 < standby_share {
        OperatingMode::Standby
    } else {
        OperatingMode::Heating
    }
}

fn clamp(v: f64, (lo, hi): (f64, f64)) -> f64 {
    v.clamp(lo, hi)
}

fn round_to(v: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (v * factor).round() / factor
}
