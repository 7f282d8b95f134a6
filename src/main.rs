mod accumulator;
mod adc;
mod channel;
mod config;
mod error;
mod meter;
mod metering;
mod mqtt;
mod pairing;
mod probe;
mod protocol;
mod rrd;
mod store;

use anyhow::Result;
use clap::Parser;
use log::{debug, info};
use std::time::Duration;

use channel::{ChannelConfig, ChannelInit};
use meter::ReportSink;
use metering::{MeterContext, MeterSettings};
use pairing::ChannelRegistry;

fn main() -> Result<()> {
    let config = config::Config::parse();

    let level = if config.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    info!("Starting powermeter");

    // reject malformed channel strings before touching any hardware
    let channel_configs = config
        .channels
        .iter()
        .map(|s| s.parse::<ChannelConfig>())
        .collect::<Result<Vec<_>, _>>()?;

    let timeout = Duration::from_millis(config.adc_timeout_ms);
    let mut adc = match &config.adc_port {
        Some(path) => {
            info!("Using specified port: {}", path);
            protocol::SerialAdc::open(path, config.adc_baud, timeout)?
        }
        None => {
            info!("No port specified, searching for {} ...", config.adc_device_id);
            let result = probe::find_adc_port(&config.adc_device_id, config.adc_baud)?;
            info!("Sampling {} on {}", result.device_id, result.path);
            protocol::SerialAdc::from_probe(result.port, timeout)?
        }
    };

    let mut channels = Vec::with_capacity(channel_configs.len());
    for channel_config in channel_configs {
        match channel_config.init(&mut adc, config.calibration_samples as usize, config.read_retries)? {
            ChannelInit::Operational(channel) => {
                debug!(
                    "Channel {} ({}, phase {}): {}",
                    channel.id,
                    channel.role.unit(),
                    channel.phase,
                    channel
                );
                channels.push(channel);
            }
            ChannelInit::CalibrationRequested(stats) => {
                println!("{}", stats);
                return Ok(());
            }
        }
    }

    let registry = ChannelRegistry::new(channels)?;
    let store = rrd::RrdStore::new(&config.rrd_file, &config.graph_dir);
    let reports = config
        .mqtt_host
        .as_deref()
        .map(|host| Box::new(mqtt::MqttPublisher::connect(&config, host)) as Box<dyn ReportSink>);
    let settings = MeterSettings {
        frequency: config.frequency,
        policy: config.persist_policy,
        graph_period: Duration::from_secs(config.graph_period),
        read_retries: config.read_retries,
    };

    let mut meter = MeterContext::new(adc, registry, store, reports, settings)?;
    info!(
        "Metering {} power measurement unit(s) over {} cycle windows",
        meter.series().len(),
        config.frequency
    );
    meter.run()?;
    Ok(())
}
