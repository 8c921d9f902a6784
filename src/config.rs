use crate::auth::UserConfig;
use crate::error::{AppError, Result};
use crate::services::prices::DEFAULT_PRICE_URL;
use crate::services::weather::DEFAULT_WEATHER_URL;
use crate::services::MonitoringRules;
use crate::simulator::SimulatorConfig;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub monitoring: MonitoringRules,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    #[default]
    Simulation,
    Mqtt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub mode: SourceMode,
    /// Simulator tick interval
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,
}

fn default_update_interval_secs() -> u64 {
    5
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            mode: SourceMode::default(),
            update_interval_secs: default_update_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: Option<u64>,
    pub clean_session: Option<bool>,
    /// Prepended to every topic of the fixed topic table
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_qos")]
    pub qos: u8,
    /// History rows kept, one per update cycle; the default holds a day at 5 s
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_topic_prefix() -> String {
    "heatpump/".into()
}
fn default_qos() -> u8 {
    1
}
fn default_history_capacity() -> usize {
    17280
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_session_timeout_mins")]
    pub session_timeout_mins: u64,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

fn default_session_timeout_mins() -> u64 {
    30
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_timeout_mins: default_session_timeout_mins(),
            users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_dir")]
    pub dir: String,
}

fn default_storage_dir() -> String {
    "data".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_latitude")]
    pub latitude: f64,
    #[serde(default = "default_longitude")]
    pub longitude: f64,
    #[serde(default = "default_weather_url")]
    pub weather_url: String,
    #[serde(default = "default_price_url")]
    pub price_url: String,
    #[serde(default = "default_weather_interval_mins")]
    pub weather_interval_mins: u64,
    #[serde(default = "default_price_interval_mins")]
    pub price_interval_mins: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Length of the cheapest-window suggestion
    #[serde(default = "default_window_hours")]
    pub window_hours: usize,
}

fn default_true() -> bool {
    true
}
fn default_latitude() -> f64 {
    52.52
}
fn default_longitude() -> f64 {
    13.41
}
fn default_weather_url() -> String {
    DEFAULT_WEATHER_URL.into()
}
fn default_price_url() -> String {
    DEFAULT_PRICE_URL.into()
}
fn default_weather_interval_mins() -> u64 {
    10
}
fn default_price_interval_mins() -> u64 {
    15
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_window_hours() -> usize {
    3
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            latitude: default_latitude(),
            longitude: default_longitude(),
            weather_url: default_weather_url(),
            price_url: default_price_url(),
            weather_interval_mins: default_weather_interval_mins(),
            price_interval_mins: default_price_interval_mins(),
            request_timeout_secs: default_request_timeout_secs(),
            window_hours: default_window_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Write the recent history as CSV here on shutdown
    pub history_path: Option<String>,
    #[serde(default = "default_history_hours")]
    pub history_hours: u32,
}

fn default_history_hours() -> u32 {
    24
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            history_path: None,
            history_hours: default_history_hours(),
        }
    }
}

impl Config {
    /// Load YAML from disk, substitute $(VAR)/${VAR} with env vars, then parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Parse YAML text. Afterwards, if MQTT_HOST env is set, it overrides `mqtt.host`.
    pub fn parse(raw: &str) -> Result<Self> {
        let expanded = expand_env_placeholders(raw)?;
        let mut cfg: Self = serde_yaml::from_str(&expanded)?;

        if let (Some(mqtt), Ok(host)) = (cfg.mqtt.as_mut(), std::env::var("MQTT_HOST")) {
            mqtt.host = host;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.source.mode == SourceMode::Mqtt && self.mqtt.is_none() {
            return Err(AppError::Config(
                "source.mode is mqtt but no mqtt section is configured".to_string(),
            ));
        }
        if let Some(mqtt) = &self.mqtt {
            if mqtt.host.is_empty() {
                return Err(AppError::Config("mqtt.host cannot be empty".to_string()));
            }
            if mqtt.port == 0 {
                return Err(AppError::Config("mqtt.port cannot be 0".to_string()));
            }
        }
        if self.source.update_interval_secs == 0 {
            return Err(AppError::Config(
                "source.update_interval_secs must be positive".to_string(),
            ));
        }
        if self.services.weather_interval_mins == 0 || self.services.price_interval_mins == 0 {
            return Err(AppError::Config(
                "service poll intervals must be positive".to_string(),
            ));
        }
        if self.auth.session_timeout_mins == 0 {
            return Err(AppError::Config(
                "auth.session_timeout_mins must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expand $(VAR) and ${VAR} placeholders using environment variables.
/// "$$" becomes a literal "$"; a lone "$" is kept as-is.
fn expand_env_placeholders(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut it = input.chars().peekable();

    while let Some(c) = it.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let close = match it.peek().copied() {
            Some('$') => {
                it.next();
                out.push('$');
                continue;
            }
            Some('(') => ')',
            Some('{') => '}',
            _ => {
                out.push('$');
                continue;
            }
        };
        it.next();
        let var = read_until(&mut it, close).ok_or_else(|| {
            AppError::Config(format!("unterminated env placeholder: missing '{}'", close))
        })?;
        let val = std::env::var(&var)
            .map_err(|_| AppError::Config(format!("missing environment variable: {}", var)))?;
        out.push_str(&val);
    }

    Ok(out)
}

/// Read characters until we hit `end`, consuming the delimiter.
fn read_until<I>(it: &mut std::iter::Peekable<I>, end: char) -> Option<String>
where
    I: Iterator<Item = char>,
{
    let mut buf = String::new();
    for ch in it.by_ref() {
        if ch == end {
            return Some(buf);
        }
        buf.push(ch);
    }
    None
}
