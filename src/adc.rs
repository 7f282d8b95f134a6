use log::warn;

use crate::error::MeterError;

/// Source of raw samples, one value per ADC input line.
pub trait Adc {
    fn read(&mut self, channel: u32) -> Result<f64, MeterError>;
}

/// Read one sample, retrying transient hardware errors up to `retries` extra times.
pub fn read_with_retry<A: Adc + ?Sized>(
    adc: &mut A,
    channel: u32,
    retries: u32,
) -> Result<f64, MeterError> {
    let mut attempt = 0;
    loop {
        match adc.read(channel) {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < retries => {
                attempt += 1;
                warn!("{} (retry {}/{})", e, attempt, retries);
            }
            Err(e) => return Err(e),
        }
    }
}
