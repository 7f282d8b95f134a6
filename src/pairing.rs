use std::collections::BTreeMap;

use log::debug;

use crate::accumulator::PowerAccumulator;
use crate::channel::Channel;
use crate::error::MeterError;

/// All operational channels, ordered by ADC channel id.
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    channels: Vec<Channel>,
}

/// A current channel paired with the voltage channel of its phase.
#[derive(Debug, Clone)]
pub struct PowerMeasurementUnit {
    /// Index of the voltage channel in the registry
    pub voltage: usize,
    /// Index of the current channel in the registry
    pub current: usize,
    pub description: String,
    pub colour: String,
    pub accumulator: PowerAccumulator,
}

impl ChannelRegistry {
    pub fn new(mut channels: Vec<Channel>) -> Result<Self, MeterError> {
        channels.sort_by_key(|c| c.id);
        if let Some(pair) = channels.windows(2).find(|w| w[0].id == w[1].id) {
            return Err(MeterError::invalid(
                &pair[1].to_string(),
                format!("channel id {} is configured more than once", pair[1].id),
            ));
        }
        Ok(Self { channels })
    }

    pub fn into_channels(self) -> Vec<Channel> {
        self.channels
    }

    /// Build one power measurement unit per current channel, in channel id order.
    pub fn pair(&self, frequency: u32) -> Result<Vec<PowerMeasurementUnit>, MeterError> {
        // phase -> index of its voltage channel
        let mut phase_voltage: BTreeMap<i32, usize> = BTreeMap::new();
        for (idx, c) in self.channels.iter().enumerate().filter(|(_, c)| c.is_voltage()) {
            if let Some(&existing) = phase_voltage.get(&c.phase) {
                return Err(MeterError::DuplicateVoltageChannel {
                    phase: c.phase,
                    first: self.channels[existing].id,
                    second: c.id,
                });
            }
            phase_voltage.insert(c.phase, idx);
        }

        let mut units = Vec::new();
        for (idx, c) in self.channels.iter().enumerate().filter(|(_, c)| !c.is_voltage()) {
            let voltage = *phase_voltage
                .get(&c.phase)
                .ok_or(MeterError::UnpairedCurrentChannel {
                    channel: c.id,
                    phase: c.phase,
                })?;
            debug!(
                "Power measurement {:?} on channels {} (voltage) and {} (current)",
                c.description, self.channels[voltage], c
            );
            units.push(PowerMeasurementUnit {
                voltage,
                current: idx,
                description: c.description.clone(),
                colour: c.colour.clone(),
                accumulator: PowerAccumulator::new(frequency),
            });
        }
        Ok(units)
    }
}
