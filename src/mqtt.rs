use anyhow::{Context, Result};
use log::{debug, info, warn};
use rumqttc::{Client, Connection, Event, MqttOptions, Outgoing, QoS};
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::meter::{MeterReport, ReportSink};

/// Publishes meter reports as JSON with QoS 0 (fire-and-forget).
/// The MQTT event loop runs on its own thread so publishing never blocks sampling.
pub struct MqttPublisher {
    client: Client,
    topic: String,
}

impl MqttPublisher {
    pub fn connect(config: &Config, host: &str) -> Self {
        let mut opts = MqttOptions::new(&config.mqtt_client_id, host, config.mqtt_port);
        opts.set_keep_alive(Duration::from_secs(60));

        let (client, connection) = Client::new(opts, 10);
        info!("Publishing readings to {} on {}:{}", config.mqtt_topic, host, config.mqtt_port);
        thread::spawn(move || drive(connection));

        Self {
            client,
            topic: config.mqtt_topic.clone(),
        }
    }
}

/// rumqttc requires driving the event loop to actually send packets
fn drive(mut connection: Connection) {
    for event in connection.iter() {
        match event {
            Ok(Event::Outgoing(Outgoing::Publish(_))) => debug!("Report published"),
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT connection error: {}", e);
                thread::sleep(Duration::from_secs(5));
            }
        }
    }
}

impl ReportSink for MqttPublisher {
    fn publish(&mut self, report: &MeterReport) -> Result<()> {
        let payload = serde_json::to_string(report).context("Failed to serialize report to JSON")?;
        self.client
            .try_publish(&self.topic, QoS::AtMostOnce, false, payload.into_bytes())
            .context("Failed to queue MQTT publish")
    }
}
