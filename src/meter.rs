use serde::Serialize;

use crate::accumulator::Reading;

/// Latest reading of one power measurement unit.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UnitReading {
    pub index: usize,
    pub description: String,
    /// Whether this reading was completed on the current tick
    pub fresh: bool,
    /// Real power (W)
    pub real_power: f64,
    /// RMS voltage (V)
    pub rms_voltage: f64,
    /// RMS current (A)
    pub rms_current: f64,
    /// Apparent power (VA), calculated: Vrms × Irms
    pub apparent_power: f64,
    /// Real / apparent power, absent when no current flows
    pub power_factor: Option<f64>,
}

impl UnitReading {
    pub fn new(index: usize, description: &str, reading: Reading, fresh: bool) -> Self {
        Self {
            index,
            description: description.to_string(),
            fresh,
            real_power: reading.real_power,
            rms_voltage: reading.rms_voltage,
            rms_current: reading.rms_current,
            apparent_power: reading.apparent_power(),
            power_factor: reading.power_factor(),
        }
    }

    /// Round to two decimals for reporting.
    pub fn rounded(&self) -> Self {
        Self {
            real_power: round2(self.real_power),
            rms_voltage: round2(self.rms_voltage),
            rms_current: round2(self.rms_current),
            apparent_power: round2(self.apparent_power),
            power_factor: self.power_factor.map(round2),
            ..self.clone()
        }
    }
}

#[derive(Debug, Serialize, Default)]
pub struct MeterReport {
    pub timestamp: String,
    pub units: Vec<UnitReading>,
}

/// Receives a report every time readings are persisted.
pub trait ReportSink {
    fn publish(&mut self, report: &MeterReport) -> anyhow::Result<()>;
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_reading_derives_apparent_power_and_factor() {
        let r = UnitReading::new(
            0,
            "load",
            Reading {
                real_power: 400.0,
                rms_voltage: 230.0,
                rms_current: 2.0,
            },
            true,
        );
        assert!((r.apparent_power - 460.0).abs() < 1e-9);
        assert!((r.power_factor.unwrap() - 0.8696).abs() < 1e-3);
    }

    #[test]
    fn rounding_keeps_two_decimals() {
        let r = UnitReading::new(
            2,
            "dryer",
            Reading {
                real_power: 1058.4567,
                rms_voltage: 162.6345,
                rms_current: 3.25271,
            },
            false,
        )
        .rounded();
        assert_eq!(r.real_power, 1058.46);
        assert_eq!(r.rms_voltage, 162.63);
        assert_eq!(r.rms_current, 3.25);
        assert_eq!(r.index, 2);
        assert!(!r.fresh);
    }

    #[test]
    fn report_serializes_missing_power_factor_as_null() {
        let report = MeterReport {
            timestamp: "2024-01-01 00:00:00".to_string(),
            units: vec![UnitReading::new(0, "idle", Reading::default(), true)],
        };
        let json: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(json["units"][0]["power_factor"], serde_json::Value::Null);
        assert_eq!(json["units"][0]["fresh"], true);
        assert_eq!(json["units"][0]["description"], "idle");
    }
}
