//! Telemetry from the installation's MQTT broker.
//!
//! Every sensor publishes on its own topic. Incoming values are merged into
//! the latest snapshot field by field (last write wins); the time of each
//! field's last update is kept so stale values can be reported.
//!
//! History holds one row per update cycle: merges arriving within
//! `sample_every` of the row that opened the cycle overwrite that row.

use super::{ConnectionStatus, DataSource, SourceKind};
use crate::alarms::AlarmList;
use crate::config::MqttConfig;
use crate::error::{AppError, Result};
use crate::models::{Alarm, AlarmSeverity, HeatingData, OperatingMode};
use crate::mqtt;
use crate::services::Monitor;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

const RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    OutsideTemp,
    FlowTemp,
    ReturnTemp,
    BufferTop,
    BufferMiddle,
    BufferBottom,
    PumpSpeed,
    PowerKw,
    Cop,
    RuntimeHours,
    Mode,
    FaultCode,
}

impl Field {
    pub const ALL: [Field; 12] = [
        Field::OutsideTemp,
        Field::FlowTemp,
        Field::ReturnTemp,
        Field::BufferTop,
        Field::BufferMiddle,
        Field::BufferBottom,
        Field::PumpSpeed,
        Field::PowerKw,
        Field::Cop,
        Field::RuntimeHours,
        Field::Mode,
        Field::FaultCode,
    ];
}

/// Fields read by the monitoring rules. The fault code is optional, most
/// controllers only publish it while a fault is active.
pub const MONITORED_FIELDS: [Field; 6] = [
    Field::Mode,
    Field::Cop,
    Field::FlowTemp,
    Field::BufferTop,
    Field::BufferMiddle,
    Field::BufferBottom,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Field(Field),
    Alarms,
}

/// Topic suffixes below the configured prefix
pub const TOPIC_TABLE: [(&str, Channel); 13] = [
    ("sensors/aussentemperatur", Channel::Field(Field::OutsideTemp)),
    ("sensors/vorlauftemperatur", Channel::Field(Field::FlowTemp)),
    ("sensors/ruecklauftemperatur", Channel::Field(Field::ReturnTemp)),
    ("sensors/puffer_oben", Channel::Field(Field::BufferTop)),
    ("sensors/puffer_mitte", Channel::Field(Field::BufferMiddle)),
    ("sensors/puffer_unten", Channel::Field(Field::BufferBottom)),
    ("sensors/pumpe_drehzahl", Channel::Field(Field::PumpSpeed)),
    ("sensors/stromverbrauch", Channel::Field(Field::PowerKw)),
    ("sensors/cop", Channel::Field(Field::Cop)),
    ("sensors/laufzeit", Channel::Field(Field::RuntimeHours)),
    ("status/betriebsmodus", Channel::Field(Field::Mode)),
    ("status/fehlercode", Channel::Field(Field::FaultCode)),
    ("alarms", Channel::Alarms),
];

pub fn subscription_topics(prefix: &str) -> Vec<String> {
    TOPIC_TABLE
        .iter()
        .map(|(suffix, _)| format!("{}{}", prefix, suffix))
        .collect()
}

pub fn resolve_topic(prefix: &str, topic: &str) -> Option<Channel> {
    let suffix = topic.strip_prefix(prefix)?;
    TOPIC_TABLE
        .iter()
        .find(|(s, _)| *s == suffix)
        .map(|(_, channel)| *channel)
}

/// What a message changed
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Field(Field),
    Alarm(Alarm),
    Ignored,
}

#[derive(Debug, Deserialize)]
struct AlarmMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    title: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    timestamp: Option<Value>,
}

#[derive(Debug)]
pub struct LiveState {
    snapshot: Option<HeatingData>,
    updated_at: HashMap<Field, DateTime<Utc>>,
    history: VecDeque<HeatingData>,
    history_capacity: usize,
    sample_every: ChronoDuration,
    cycle_start: Option<DateTime<Utc>>,
    alarms: AlarmList,
    connected: bool,
    last_error: Option<String>,
    clients_created: u64,
}

impl LiveState {
    pub fn new(history_capacity: usize, sample_every: ChronoDuration) -> Self {
        Self {
            snapshot: None,
            updated_at: HashMap::new(),
            history: VecDeque::new(),
            history_capacity,
            sample_every,
            cycle_start: None,
            alarms: AlarmList::new(),
            connected: false,
            last_error: None,
            clients_created: 0,
        }
    }

    pub fn snapshot(&self) -> Option<&HeatingData> {
        self.snapshot.as_ref()
    }

    pub fn alarms(&self) -> &AlarmList {
        &self.alarms
    }

    pub fn alarms_mut(&mut self) -> &mut AlarmList {
        &mut self.alarms
    }

    /// Apply one message. Unparseable payloads are dropped.
    pub fn apply(&mut self, channel: Channel, payload: &[u8], now: DateTime<Utc>) -> Applied {
        let text = match std::str::from_utf8(payload) {
            Ok(t) => t.trim(),
            Err(_) => {
                debug!(?channel, "non-utf8 payload; dropping");
                return Applied::Ignored;
            }
        };
        match channel {
            Channel::Alarms => match parse_alarm(text, now) {
                Some(alarm) if self.alarms.push(alarm.clone()) => Applied::Alarm(alarm),
                Some(_) => Applied::Ignored,
                None => {
                    debug!("malformed alarm payload; dropping");
                    Applied::Ignored
                }
            },
            Channel::Field(field) => {
                if self.merge(field, text, now) {
                    Applied::Field(field)
                } else {
                    debug!(?field, payload = %text, "unparseable value; dropping");
                    Applied::Ignored
                }
            }
        }
    }

    fn merge(&mut self, field: Field, text: &str, now: DateTime<Utc>) -> bool {
        let mut next = self
            .snapshot
            .clone()
            .unwrap_or_else(|| HeatingData::empty(now));
        let text = text.trim_matches('"');

        match field {
            Field::Mode => match OperatingMode::parse(text) {
                Some(mode) => next.mode = mode,
                None => return false,
            },
            Field::FaultCode => {
                next.fault_code = match text {
                    "" | "0" => None,
                    code => Some(code.to_string()),
                };
            }
            numeric => {
                let value = match text.parse::<f64>() {
                    Ok(v) if v.is_finite() => v,
                    _ => return false,
                };
                let slot = match numeric {
                    Field::OutsideTemp => &mut next.outside_temp,
                    Field::FlowTemp => &mut next.flow_temp,
                    Field::ReturnTemp => &mut next.return_temp,
                    Field::BufferTop => &mut next.buffer_top,
                    Field::BufferMiddle => &mut next.buffer_middle,
                    Field::BufferBottom => &mut next.buffer_bottom,
                    Field::PumpSpeed => &mut next.pump_speed,
                    Field::PowerKw => &mut next.power_kw,
                    Field::Cop => &mut next.cop,
                    Field::RuntimeHours => &mut next.runtime_hours,
                    Field::Mode | Field::FaultCode => return false,
                };
                *slot = value;
            }
        }

        next.timestamp = now;
        self.updated_at.insert(field, now);
        self.record(next.clone());
        self.snapshot = Some(next);
        true
    }

    fn record(&mut self, row: HeatingData) {
        let same_cycle = matches!(
            self.cycle_start,
            Some(start) if row.timestamp >= start && row.timestamp - start < self.sample_every
        );
        if same_cycle {
            if let Some(last) = self.history.back_mut() {
                *last = row;
                return;
            }
        }
        self.cycle_start = Some(row.timestamp);
        self.history.push_back(row);
        while self.history.len() > self.history_capacity {
            self.history.pop_front();
        }
    }

    /// The snapshot once every monitored field has been received at least once
    pub fn monitorable(&self) -> Option<&HeatingData> {
        if MONITORED_FIELDS
            .iter()
            .all(|f| self.updated_at.contains_key(f))
        {
            self.snapshot.as_ref()
        } else {
            None
        }
    }

    /// Time of the most recent field update
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.updated_at.values().max().copied()
    }

    /// Fields not refreshed within `max_age` of `now`, including fields never received
    pub fn stale_fields(&self, now: DateTime<Utc>, max_age: ChronoDuration) -> Vec<Field> {
        Field::ALL
            .into_iter()
            .filter(|f| match self.updated_at.get(f) {
                Some(at) => now - *at > max_age,
                None => true,
            })
            .collect()
    }

    pub fn history(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<HeatingData> {
        self.history
            .iter()
            .filter(|d| d.timestamp >= start && d.timestamp <= end)
            .cloned()
            .collect()
    }

    pub fn mark_connected(&mut self) {
        self.connected = true;
        self.last_error = None;
    }

    pub fn mark_error(&mut self, error: impl Into<String>) {
        self.connected = false;
        self.last_error = Some(error.into());
    }

    pub fn mark_disconnected(&mut self) {
        self.connected = false;
    }

    /// A fresh client starts without the previous client's error
    pub fn mark_client_created(&mut self) {
        self.clients_created += 1;
        self.connected = false;
        self.last_error = None;
    }

    pub fn clients_created(&self) -> u64 {
        self.clients_created
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            kind: SourceKind::Mqtt,
            connected: self.connected,
            last_error: self.last_error.clone(),
        }
    }
}

fn parse_alarm(text: &str, now: DateTime<Utc>) -> Option<Alarm> {
    let msg: AlarmMessage = serde_json::from_str(text).ok()?;
    let severity = msg
        .kind
        .as_deref()
        .and_then(AlarmSeverity::parse)
        .unwrap_or(AlarmSeverity::Info);
    let created_at = msg.timestamp.as_ref().and_then(parse_timestamp).unwrap_or(now);
    let mut alarm = Alarm::new(severity, msg.title, msg.message, created_at);
    if let Some(id) = msg.id.filter(|id| !id.is_empty()) {
        alarm.id = id;
    }
    Some(alarm)
}

/// RFC 3339 text or unix milliseconds
fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// Handle to the live state shared with the [`MqttFeed`] task
#[derive(Clone)]
pub struct LiveSource {
    state: Arc<Mutex<LiveState>>,
    reconnect: Arc<Notify>,
}

impl LiveSource {
    /// `sample_every` is the update interval; history keeps one row per interval
    pub fn new(history_capacity: usize, sample_every: ChronoDuration) -> Self {
        Self {
            state: Arc::new(Mutex::new(LiveState::new(history_capacity, sample_every))),
            reconnect: Arc::new(Notify::new()),
        }
    }

    /// Feed task writing into this source
    pub fn feed(&self, config: MqttConfig) -> MqttFeed {
        MqttFeed {
            config,
            state: Arc::clone(&self.state),
            reconnect: Arc::clone(&self.reconnect),
        }
    }

    /// Tear down the MQTT client and connect with a fresh one
    pub fn force_reconnect(&self) {
        self.reconnect.notify_one();
    }

    pub fn stale_fields(&self, now: DateTime<Utc>, max_age: ChronoDuration) -> Vec<Field> {
        lock(&self.state).stale_fields(now, max_age)
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        lock(&self.state).last_update()
    }

    /// MQTT clients the feed has created so far
    pub fn clients_created(&self) -> u64 {
        lock(&self.state).clients_created()
    }

    /// Run the monitoring rules against the merged snapshot and keep the
    /// alarms they raise. Nothing is evaluated until every monitored field
    /// has arrived; placeholder zeros would trip the rules.
    pub fn evaluate(&self, monitor: &mut Monitor) -> Vec<Alarm> {
        let mut state = lock(&self.state);
        let Some(snapshot) = state.monitorable().cloned() else {
            return Vec::new();
        };
        monitor
            .evaluate(&snapshot)
            .into_iter()
            .filter(|a| state.alarms.push(a.clone()))
            .collect()
    }

    /// Apply a message as if it arrived on `topic`
    pub fn ingest(&self, prefix: &str, topic: &str, payload: &[u8], now: DateTime<Utc>) -> Applied {
        match resolve_topic(prefix, topic) {
            Some(channel) => lock(&self.state).apply(channel, payload, now),
            None => Applied::Ignored,
        }
    }
}

fn lock(state: &Mutex<LiveState>) -> MutexGuard<'_, LiveState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DataSource for LiveSource {
    fn current(&self) -> Option<HeatingData> {
        lock(&self.state).snapshot.clone()
    }

    fn history(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<HeatingData> {
        lock(&self.state).history(start, end)
    }

    fn alarms(&self) -> Vec<Alarm> {
        lock(&self.state).alarms.all().to_vec()
    }

    fn acknowledge(&mut self, id: &str) -> bool {
        lock(&self.state).alarms.acknowledge(id)
    }

    fn status(&self) -> ConnectionStatus {
        lock(&self.state).status()
    }
}

/// Owns the MQTT client and event loop. Reconnects after errors are left to
/// the client library: polling the event loop again dials the broker anew.
pub struct MqttFeed {
    config: MqttConfig,
    state: Arc<Mutex<LiveState>>,
    reconnect: Arc<Notify>,
}

impl MqttFeed {
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let topics = subscription_topics(&self.config.topic_prefix);
        let qos = mqtt::qos(self.config.qos);

        loop {
            let (client, mut eventloop) = mqtt::new(mqtt::build_options(&self.config));
            lock(&self.state).mark_client_created();
            info!(
                host = %self.config.host,
                port = self.config.port,
                "connecting to MQTT broker"
            );

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        self.stop(&client);
                        return Ok(());
                    }
                    _ = self.reconnect.notified() => {
                        info!("reconnect requested; recreating MQTT client");
                        lock(&self.state).mark_disconnected();
                        break;
                    }
                    event = eventloop.poll() => match event {
                        Ok(mqtt::Event::Incoming(mqtt::Incoming::ConnAck(_))) => {
                            lock(&self.state).mark_connected();
                            // clean sessions lose subscriptions, so subscribe on every connect
                            for topic in &topics {
                                if let Err(e) = client.try_subscribe(topic.clone(), qos) {
                                    warn!(topic = %topic, error = %e, "subscribe failed");
                                }
                            }
                            info!("connected; subscribed to {} topic(s)", topics.len());
                        }
                        Ok(mqtt::Event::Incoming(mqtt::Incoming::Publish(p))) => {
                            self.handle_publish(&p.topic, &p.payload);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!("mqtt error: {e}; retrying after short delay");
                            lock(&self.state).mark_error(AppError::Mqtt(e.to_string()).to_string());
                            tokio::select! {
                                biased;
                                _ = shutdown.changed() => {
                                    self.stop(&client);
                                    return Ok(());
                                }
                                _ = self.reconnect.notified() => {
                                    info!("reconnect requested; recreating MQTT client");
                                    lock(&self.state).mark_disconnected();
                                    break;
                                }
                                _ = tokio::time::sleep(RETRY_DELAY) => {}
                            }
                        }
                    }
                }
            }
        }
    }

    fn stop(&self, client: &mqtt::AsyncClient) {
        let _ = client.try_disconnect();
        lock(&self.state).mark_disconnected();
        info!("mqtt feed stopped");
    }

    fn handle_publish(&self, topic_bytes: &[u8], payload: &[u8]) {
        let topic = match std::str::from_utf8(topic_bytes) {
            Ok(s) => s,
            Err(_) => {
                warn!(?topic_bytes, "non-utf8 topic; skipping message");
                return;
            }
        };
        let Some(channel) = resolve_topic(&self.config.topic_prefix, topic) else {
            debug!(topic = %topic, "message on unmapped topic");
            return;
        };
        match lock(&self.state).apply(channel, payload, Utc::now()) {
            Applied::Alarm(alarm) => {
                warn!(id = %alarm.id, severity = %alarm.severity, title = %alarm.title, "alarm received")
            }
            Applied::Field(field) => debug!(topic = %topic, ?field, "field updated"),
            Applied::Ignored => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "heatpump/";

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap() + ChronoDuration::seconds(secs)
    }

    fn state(capacity: usize) -> LiveState {
        LiveState::new(capacity, ChronoDuration::seconds(5))
    }

    #[test]
    fn test_resolve_topic() {
        assert_eq!(
            resolve_topic(PREFIX, "heatpump/sensors/cop"),
            Some(Channel::Field(Field::Cop))
        );
        assert_eq!(resolve_topic(PREFIX, "heatpump/alarms"), Some(Channel::Alarms));
        assert_eq!(resolve_topic(PREFIX, "other/sensors/cop"), None);
        assert_eq!(resolve_topic(PREFIX, "heatpump/sensors/unknown"), None);
        assert_eq!(subscription_topics(PREFIX).len(), TOPIC_TABLE.len());
    }

    #[test]
    fn test_merge_last_write_wins_per_field() {
        let mut state = state(10);
        state.apply(Channel::Field(Field::OutsideTemp), b"-3.5", at(0));
        state.apply(Channel::Field(Field::FlowTemp), b" 44.2\n", at(1));
        state.apply(Channel::Field(Field::OutsideTemp), b"-2.0", at(2));

        let snap = state.snapshot().unwrap();
        assert_eq!(snap.outside_temp, -2.0);
        assert_eq!(snap.flow_temp, 44.2);
        assert_eq!(snap.timestamp, at(2));

        // all three merges fall into one update cycle
        let history = state.history(at(0), at(2));
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outside_temp, -2.0);
        assert_eq!(history[0].flow_temp, 44.2);
    }

    #[test]
    fn test_bad_values_are_dropped() {
        let mut state = state(10);
        assert_eq!(
            state.apply(Channel::Field(Field::Cop), b"n/a", at(0)),
            Applied::Ignored
        );
        assert_eq!(
            state.apply(Channel::Field(Field::Mode), b"turbo", at(0)),
            Applied::Ignored
        );
        assert!(state.snapshot().is_none());
    }

    #[test]
    fn test_mode_and_fault_code() {
        let mut state = state(10);
        state.apply(Channel::Field(Field::Mode), b"\"defrosting\"", at(0));
        state.apply(Channel::Field(Field::FaultCode), b"E07", at(1));
        let snap = state.snapshot().unwrap().clone();
        assert_eq!(snap.mode, OperatingMode::Defrosting);
        assert_eq!(snap.fault_code.as_deref(), Some("E07"));

        state.apply(Channel::Field(Field::FaultCode), b"", at(2));
        assert_eq!(state.snapshot().unwrap().fault_code, None);
    }

    #[test]
    fn test_alarm_payloads() {
        let mut state = state(10);
        let payload = br#"{"id":"a-1","type":"error","title":"High pressure","message":"HP switch tripped","timestamp":"2024-01-15T11:59:00Z"}"#;
        match state.apply(Channel::Alarms, payload, at(0)) {
            Applied::Alarm(alarm) => {
                assert_eq!(alarm.id, "a-1");
                assert_eq!(alarm.severity, AlarmSeverity::Error);
                assert_eq!(alarm.created_at, at(-60));
            }
            other => panic!("unexpected {other:?}"),
        }
        // duplicate id and malformed json are swallowed
        assert_eq!(state.apply(Channel::Alarms, payload, at(1)), Applied::Ignored);
        assert_eq!(state.apply(Channel::Alarms, b"{not json", at(1)), Applied::Ignored);
        assert_eq!(state.alarms().len(), 1);
    }

    #[test]
    fn test_stale_fields() {
        let mut state = state(10);
        state.apply(Channel::Field(Field::OutsideTemp), b"1.0", at(0));
        state.apply(Channel::Field(Field::FlowTemp), b"40.0", at(100));

        let stale = state.stale_fields(at(110), ChronoDuration::seconds(60));
        assert!(stale.contains(&Field::OutsideTemp));
        assert!(!stale.contains(&Field::FlowTemp));
        assert!(stale.contains(&Field::Cop));
    }

    #[test]
    fn test_history_capacity_bounded() {
        let mut state = state(3);
        for i in 0..10 {
            state.apply(Channel::Field(Field::Cop), format!("3.{i}").as_bytes(), at(i * 5));
        }
        let history = state.history(at(0), at(50));
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].timestamp, at(35));
    }

    #[test]
    fn test_history_one_row_per_cycle() {
        let mut state = state(100);
        for cycle in 0..4 {
            let t = cycle * 5;
            state.apply(Channel::Field(Field::OutsideTemp), b"2.0", at(t));
            state.apply(Channel::Field(Field::FlowTemp), format!("4{cycle}.0").as_bytes(), at(t));
            state.apply(Channel::Field(Field::Cop), b"3.5", at(t + 1));
        }
        let history = state.history(at(0), at(30));
        assert_eq!(history.len(), 4);
        assert_eq!(history[2].flow_temp, 42.0);
        assert_eq!(history[2].cop, 3.5);
        assert_eq!(history[2].timestamp, at(11));
    }

    #[test]
    fn test_monitorable_after_all_monitored_fields() {
        let mut state = state(10);
        state.apply(Channel::Field(Field::Mode), b"heating", at(0));
        state.apply(Channel::Field(Field::BufferBottom), b"33.0", at(0));
        assert!(state.snapshot().is_some());
        assert!(state.monitorable().is_none());

        for (field, value) in [
            (Field::Cop, "3.9"),
            (Field::FlowTemp, "41.0"),
            (Field::BufferTop, "45.0"),
            (Field::BufferMiddle, "40.0"),
        ] {
            assert!(state.monitorable().is_none());
            state.apply(Channel::Field(field), value.as_bytes(), at(1));
        }
        // fault code never arrived and is not required
        assert_eq!(state.monitorable().unwrap().cop, 3.9);
        assert_eq!(state.last_update(), Some(at(1)));
    }

    #[test]
    fn test_connection_flags() {
        let mut state = state(1);
        state.mark_error("connection refused");
        assert_eq!(state.status().last_error.as_deref(), Some("connection refused"));
        assert!(!state.status().connected);
        state.mark_connected();
        assert!(state.status().connected);
        assert_eq!(state.status().last_error, None);

        state.mark_error("broker gone");
        state.mark_client_created();
        assert_eq!(state.clients_created(), 1);
        assert_eq!(state.status().last_error, None);
        assert!(!state.status().connected);
    }
}
