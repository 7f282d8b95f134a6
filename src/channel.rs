use std::fmt;
use std::str::FromStr;

use log::debug;

use crate::adc::{read_with_retry, Adc};
use crate::error::MeterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Voltage,
    Current,
}

impl Role {
    pub fn token(self) -> &'static str {
        match self {
            Role::Voltage => "V",
            Role::Current => "C",
        }
    }

    /// Physical unit of the calibrated value.
    pub fn unit(self) -> &'static str {
        match self {
            Role::Voltage => "V",
            Role::Current => "A",
        }
    }
}

/// One ADC input line with its calibration and display metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: u32,
    pub phase: i32,
    pub role: Role,
    pub zero: f64,
    pub gain: f64,
    pub colour: String,
    pub description: String,
    last_value: Option<f64>,
}

/// A parsed channel argument, before any hardware is touched.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelConfig {
    Operational(Channel),
    /// `id:zero:?` asks for an RMS measurement burst instead of metering.
    Calibration { id: u32, zero: f64 },
}

/// Outcome of constructing a channel from its configuration string.
#[derive(Debug)]
pub enum ChannelInit {
    Operational(Channel),
    CalibrationRequested(CalibrationStats),
}

impl Channel {
    pub fn new(
        id: u32,
        phase: i32,
        role: Role,
        zero: f64,
        gain: f64,
        colour: &str,
        description: &str,
    ) -> Self {
        Self {
            id,
            phase,
            role,
            zero,
            gain,
            colour: colour.to_string(),
            description: description.to_string(),
            last_value: None,
        }
    }

    pub fn is_voltage(&self) -> bool {
        self.role == Role::Voltage
    }

    pub fn calibrate_value(&self, raw: f64) -> f64 {
        (raw - self.zero) * self.gain
    }

    /// Sample the ADC and cache the calibrated value.
    pub fn read<A: Adc + ?Sized>(&mut self, adc: &mut A, retries: u32) -> Result<f64, MeterError> {
        let raw = read_with_retry(adc, self.id, retries)?;
        let value = self.calibrate_value(raw);
        self.last_value = Some(value);
        Ok(value)
    }

    /// Cached value from the latest read, reading the ADC only if nothing is cached yet.
    pub fn get<A: Adc + ?Sized>(&mut self, adc: &mut A, retries: u32) -> Result<f64, MeterError> {
        match self.last_value {
            Some(value) => Ok(value),
            None => self.read(adc, retries),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}:{}",
            self.id,
            self.phase,
            self.role.token(),
            self.zero,
            self.gain,
            self.colour,
            self.description
        )
    }
}

impl ChannelConfig {
    /// Build the channel. A calibration config runs the measurement burst
    /// right away and hands back its statistics.
    pub fn init<A: Adc + ?Sized>(
        self,
        adc: &mut A,
        calibration_samples: usize,
        retries: u32,
    ) -> Result<ChannelInit, MeterError> {
        match self {
            ChannelConfig::Operational(channel) => Ok(ChannelInit::Operational(channel)),
            ChannelConfig::Calibration { id, zero } => {
                let stats = calibrate(adc, id, zero, calibration_samples, retries)?;
                Ok(ChannelInit::CalibrationRequested(stats))
            }
        }
    }
}

impl FromStr for ChannelConfig {
    type Err = MeterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(':').collect();
        match fields.as_slice() {
            [id, zero, "?"] => Ok(ChannelConfig::Calibration {
                id: parse_field(s, "channel id", id)?,
                zero: parse_field(s, "zero", zero)?,
            }),
            [id, phase, role, zero, gain, colour, description] => {
                let role = match *role {
                    "V" => Role::Voltage,
                    "C" => Role::Current,
                    other => {
                        return Err(MeterError::invalid(
                            s,
                            format!("{:?} not \"V\" or \"C\" for voltage and current respectively", other),
                        ))
                    }
                };
                Ok(ChannelConfig::Operational(Channel::new(
                    parse_field(s, "channel id", id)?,
                    parse_field(s, "phase", phase)?,
                    role,
                    parse_field(s, "zero", zero)?,
                    parse_field(s, "gain", gain)?,
                    colour,
                    description,
                )))
            }
            _ => Err(MeterError::invalid(
                s,
                format!(
                    "expected id:phase:V|C:zero:gain:colour:description or id:zero:?, got {} fields",
                    fields.len()
                ),
            )),
        }
    }
}

fn parse_field<T: FromStr>(config: &str, name: &str, value: &str) -> Result<T, MeterError> {
    value
        .trim()
        .parse()
        .map_err(|_| MeterError::invalid(config, format!("{} {:?} is not a valid number", name, value)))
}

/// Summary of a calibration burst on an uncalibrated (gain 1) channel.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationStats {
    pub channel: u32,
    pub samples: usize,
    pub mean: f64,
    pub rms: f64,
    pub max: f64,
    pub min: f64,
}

impl CalibrationStats {
    pub fn peak_to_peak(&self) -> f64 {
        self.max - self.min
    }

    /// Midpoint between the extremes, a good estimate for the zero offset.
    pub fn mean_peak_to_peak(&self) -> f64 {
        (self.max + self.min) / 2.0
    }
}

impl fmt::Display for CalibrationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Channel {} calibration: measured {:.2} units RMS", self.channel, self.rms)?;
        writeln!(f, "num_measurements = {}", self.samples)?;
        writeln!(f, "mean    = {}", self.mean)?;
        writeln!(f, "rms     = {}", self.rms)?;
        writeln!(f, "max     = {}", self.max)?;
        writeln!(f, "min     = {}", self.min)?;
        writeln!(f, "PP      = {}", self.peak_to_peak())?;
        write!(f, "mean PP = {}", self.mean_peak_to_peak())
    }
}

/// Take `samples` readings of `(raw - zero)` and summarise them.
pub fn calibrate<A: Adc + ?Sized>(
    adc: &mut A,
    id: u32,
    zero: f64,
    samples: usize,
    retries: u32,
) -> Result<CalibrationStats, MeterError> {
    if samples == 0 {
        return Err(MeterError::invalid(
            &format!("{}:{}:?", id, zero),
            "calibration needs at least one sample",
        ));
    }
    debug!("Calibrating channel {} over {} samples", id, samples);

    let mut channel = Channel::new(id, 0, Role::Voltage, zero, 1.0, "", "calibration");
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut max = f64::NEG_INFINITY;
    let mut min = f64::INFINITY;
    for _ in 0..samples {
        let x = channel.read(adc, retries)?;
        sum += x;
        sum_sq += x * x;
        max = max.max(x);
        min = min.min(x);
    }

    let n = samples as f64;
    Ok(CalibrationStats {
        channel: id,
        samples,
        mean: sum / n,
        rms: (sum_sq / n).sqrt(),
        max,
        min,
    })
}
