//! Broker session factory.

use rumqttc::{AsyncClient, EventLoop, MqttOptions};
use std::time::Duration;

use crate::config::Settings;

/// Build the shared broker session.
///
/// The session is persistent (`clean_session = false`) so the broker
/// retains QoS 1 messages on our subscriptions while the service restarts.
pub fn session(settings: &Settings) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new("server", &settings.mqtt_hostname, settings.mqtt_port);
    options.set_credentials(&settings.mqtt_identifier, &settings.mqtt_password);
    options.set_keep_alive(Duration::from_secs(30));
    options.set_clean_session(false);
    AsyncClient::new(options, 128)
}
