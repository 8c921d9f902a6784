use crate::config::MqttConfig;
use std::time::Duration;
use uuid::Uuid;

// Use the MQTT v5 API surface only
use rumqttc::v5 as mqtt5;
use rumqttc::Transport;

pub type MqttOptions = mqtt5::MqttOptions;
pub type AsyncClient = mqtt5::AsyncClient;
pub type EventLoop = mqtt5::EventLoop;
pub type Event = mqtt5::Event;
pub type Incoming = mqtt5::Incoming;
pub type QoS = mqtt5::mqttbytes::QoS;

pub fn build_options(cfg: &MqttConfig) -> MqttOptions {
    let client_id = format!("heatpump-dashboard-{}", Uuid::new_v4());
    let mut opts = MqttOptions::new(client_id, &cfg.host, cfg.port);
    opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs.unwrap_or(30)));
    opts.set_clean_start(cfg.clean_session.unwrap_or(true));
    if let (Some(u), Some(p)) = (&cfg.username, &cfg.password) {
        opts.set_credentials(u.clone(), p.clone());
    }
    if cfg.port == 8883 {
        opts.set_transport(Transport::tls_with_default_config());
    }
    opts
}

pub fn new(options: MqttOptions) -> (AsyncClient, EventLoop) {
    mqtt5::AsyncClient::new(options, 50)
}

pub fn qos(v: u8) -> QoS {
    match v {
        2 => QoS::ExactlyOnce,
        0 => QoS::AtMostOnce,
        _ => QoS::AtLeastOnce,
    }
}
