use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeterError {
    #[error("Invalid channel configuration {config:?}: {reason}")]
    InvalidConfiguration { config: String, reason: String },
    #[error(
        "Only a single voltage channel per phase is allowed: phase {phase} has voltage channels {first} and {second}"
    )]
    DuplicateVoltageChannel { phase: i32, first: u32, second: u32 },
    #[error("Current channel {channel} on phase {phase} has no associated voltage channel")]
    UnpairedCurrentChannel { channel: u32, phase: i32 },
    #[error("ADC read on channel {channel} failed: {reason}")]
    HardwareReadFault { channel: u32, reason: String },
    #[error("ADC read on channel {channel} timed out after {timeout:?}")]
    HardwareReadTimeout { channel: u32, timeout: Duration },
}

impl MeterError {
    pub fn invalid(config: &str, reason: impl Into<String>) -> Self {
        MeterError::InvalidConfiguration {
            config: config.to_string(),
            reason: reason.into(),
        }
    }

    /// Hardware errors are worth another attempt; configuration errors never are.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MeterError::HardwareReadFault { .. } | MeterError::HardwareReadTimeout { .. }
        )
    }
}
