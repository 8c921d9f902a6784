use chrono::{DateTime, Local, Utc};
use heatpump_dashboard::auth::{Authenticator, SessionStore};
use heatpump_dashboard::config::{Config, SourceMode};
use heatpump_dashboard::models::Alarm;
use heatpump_dashboard::services::{
    recommend, Monitor, PriceClient, PricePoint, WeatherClient, WeatherReport,
};
use heatpump_dashboard::settings::{EmailConfig, HeatingControl, MonitoringState};
use heatpump_dashboard::source::{DataSource, LiveSource, SimulatedSource};
use heatpump_dashboard::storage::{
    LocalStore, EMAIL_CONFIG_KEY, HEATING_CONTROL_KEY, MONITORING_STATE_KEY, SIMULATION_MODE_KEY,
};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Fields not refreshed for this long are reported as stale
const STALE_AFTER_MINS: i64 = 5;

enum Feed {
    Simulated(SimulatedSource),
    Live {
        source: LiveSource,
        monitor: Monitor,
        task: JoinHandle<heatpump_dashboard::Result<()>>,
        last_forced_reconnect: Option<DateTime<Utc>>,
    },
}

impl Feed {
    fn source(&self) -> &dyn DataSource {
        match self {
            Feed::Simulated(s) => s as &dyn DataSource,
            Feed::Live { source, .. } => source as &dyn DataSource,
        }
    }

    fn monitoring_state(&self) -> &MonitoringState {
        match self {
            Feed::Simulated(s) => s.monitor().state(),
            Feed::Live { monitor, .. } => monitor.state(),
        }
    }

    /// One update-interval step; returns the alarms it raised
    fn step(&mut self) -> Vec<Alarm> {
        match self {
            Feed::Simulated(sim) => sim.tick(&Local::now()).new_alarms,
            Feed::Live {
                source,
                monitor,
                last_forced_reconnect,
                ..
            } => {
                let now = Utc::now();
                let max_age = chrono::Duration::minutes(STALE_AFTER_MINS);
                let stale = source.stale_fields(now, max_age);
                if !stale.is_empty() {
                    debug!(?stale, "live fields not refreshed recently");
                }
                // a feed that delivered data once and then went quiet gets a fresh client
                let silent = source.last_update().is_some_and(|at| now - at > max_age);
                let recently_forced = last_forced_reconnect.is_some_and(|at| now - at <= max_age);
                if silent && !recently_forced {
                    warn!(minutes = STALE_AFTER_MINS, "no live data received; reconnecting");
                    source.force_reconnect();
                    *last_forced_reconnect = Some(now);
                }
                source.evaluate(monitor)
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cfg_path =
        std::env::var("APP_CONFIG").unwrap_or_else(|_| "config/config.example.yaml".into());
    let cfg = Config::load(&cfg_path)?;
    info!(path = %cfg_path, users = cfg.auth.users.len(), "loaded config");

    let store = LocalStore::open(&cfg.storage.dir)?;
    info!(dir = %store.dir().display(), "opened local store");

    let mode = match store.get::<bool>(SIMULATION_MODE_KEY) {
        Some(true) => SourceMode::Simulation,
        Some(false) if cfg.mqtt.is_some() => SourceMode::Mqtt,
        Some(false) => {
            warn!("stored mode is mqtt but no mqtt section is configured; simulating");
            SourceMode::Simulation
        }
        None => cfg.source.mode,
    };

    let email: EmailConfig = store.get_or_default(EMAIL_CONFIG_KEY);
    let control: HeatingControl = store.get_or_default(HEATING_CONTROL_KEY);
    let control = match control.validate() {
        Ok(()) => control,
        Err(e) => {
            warn!(error = %e, "stored heating control invalid; using defaults");
            HeatingControl::default()
        }
    };
    info!(
        mode = ?control.mode,
        target = ?control.target_at(&Local::now()),
        "heating control"
    );

    let auth = Authenticator::new(cfg.auth.users.clone());
    let sessions = SessionStore::new(
        store.clone(),
        chrono::Duration::minutes(cfg.auth.session_timeout_mins as i64),
    );
    match sessions.restore(Utc::now()) {
        Some(session) => info!(
            user = %session.user.username,
            role = ?session.user.role,
            "restored session"
        ),
        None => info!(users = auth.user_count(), "no active session; login required"),
    }

    let monitor = Monitor::new(
        cfg.monitoring.clone(),
        store.get_or_default(MONITORING_STATE_KEY),
    );
    let tick_length = Duration::from_secs(cfg.source.update_interval_secs);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut feed = match (mode, cfg.mqtt.as_ref()) {
        (SourceMode::Mqtt, Some(mqtt_cfg)) => {
            let source = LiveSource::new(
                mqtt_cfg.history_capacity,
                chrono::Duration::seconds(cfg.source.update_interval_secs as i64),
            );
            let task = tokio::spawn(source.feed(mqtt_cfg.clone()).run(shutdown_rx));
            info!(prefix = %mqtt_cfg.topic_prefix, "using live MQTT data");
            Feed::Live {
                source,
                monitor,
                task,
                last_forced_reconnect: None,
            }
        }
        _ => {
            info!(interval_secs = cfg.source.update_interval_secs, "using simulated data");
            Feed::Simulated(SimulatedSource::new(&cfg.simulator, tick_length, monitor))
        }
    };

    let http_timeout = Duration::from_secs(cfg.services.request_timeout_secs);
    let clients = if cfg.services.enabled {
        Some((
            WeatherClient::new(
                &cfg.services.weather_url,
                cfg.services.latitude,
                cfg.services.longitude,
                http_timeout,
            )?,
            PriceClient::new(&cfg.services.price_url, http_timeout)?,
        ))
    } else {
        info!("weather and price services disabled");
        None
    };
    let mut forecast: Option<WeatherReport> = None;
    let mut prices: Vec<PricePoint> = Vec::new();

    let mut tick = tokio::time::interval(tick_length);
    let mut weather_tick =
        tokio::time::interval(Duration::from_secs(cfg.services.weather_interval_mins * 60));
    let mut price_tick =
        tokio::time::interval(Duration::from_secs(cfg.services.price_interval_mins * 60));

    let sig = tokio::signal::ctrl_c();
    tokio::pin!(sig);
    loop {
        tokio::select! {
            biased;
            _ = &mut sig => {
                info!("shutdown requested");
                break;
            }
            _ = tick.tick() => {
                for alarm in feed.step() {
                    info!(
                        id = %alarm.id,
                        severity = %alarm.severity,
                        title = %alarm.title,
                        "alarm raised"
                    );
                    if email.should_notify(&alarm) {
                        info!(recipients = email.recipients.len(), id = %alarm.id, "alarm notification due");
                    }
                }
            }
            _ = weather_tick.tick(), if clients.is_some() => {
                if let Some((weather, _)) = &clients {
                    match weather.fetch().await {
                        Ok(report) => {
                            info!(
                                temperature = report.current.temperature,
                                coldest = ?report.coldest_day().map(|d| d.temp_min),
                                "weather updated"
                            );
                            forecast = Some(report);
                        }
                        Err(e) => warn!(error = %e, "weather fetch failed; keeping last forecast"),
                    }
                }
            }
            _ = price_tick.tick(), if clients.is_some() => {
                if let Some((_, price_client)) = &clients {
                    let now = Utc::now();
                    match price_client.fetch(now).await {
                        Ok(points) => {
                            prices = points;
                            let advice = recommend(&prices, forecast.as_ref(), now, cfg.services.window_hours);
                            info!(
                                action = ?advice.action,
                                current = ?advice.current_price_ct_kwh,
                                mean = advice.mean_price_ct_kwh,
                                cheapest_from = ?advice.cheapest_window_start,
                                buffer_target = advice.buffer_target_temp,
                                "price recommendation"
                            );
                        }
                        Err(e) => warn!(error = %e, "price fetch failed; keeping last prices"),
                    }
                }
            }
        }
    }

    let _ = shutdown_tx.send(true);

    if let Some(path) = &cfg.export.history_path {
        let end = Utc::now();
        let start = end - chrono::Duration::hours(cfg.export.history_hours as i64);
        match feed.source().export_csv(start, end) {
            Ok(text) => match std::fs::write(path, text) {
                Ok(()) => info!(path = %path, "history exported"),
                Err(e) => warn!(path = %path, error = %e, "writing history export failed"),
            },
            Err(e) => warn!(error = %e, "history export failed"),
        }
    }

    if let Err(e) = store.set(MONITORING_STATE_KEY, feed.monitoring_state()) {
        warn!(error = %e, "persisting monitoring state failed");
    }

    if let Feed::Live { task, .. } = feed {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "mqtt feed ended with error"),
            Err(e) => warn!(error = %e, "mqtt feed task panicked"),
        }
    }

    Ok(())
}
