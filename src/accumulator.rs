use serde::Serialize;

/// Result of one completed measurement window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Reading {
    /// Average of v·i over the window (W)
    pub real_power: f64,
    /// RMS voltage (V)
    pub rms_voltage: f64,
    /// RMS current (A)
    pub rms_current: f64,
}

impl Reading {
    /// Vrms × Irms (VA)
    pub fn apparent_power(&self) -> f64 {
        self.rms_voltage * self.rms_current
    }

    /// Real over apparent power, `None` when no current is flowing.
    pub fn power_factor(&self) -> Option<f64> {
        let apparent = self.apparent_power();
        if apparent > 0.0 {
            Some(self.real_power / apparent)
        } else {
            None
        }
    }
}

/// Running sums over whole AC cycles, delimited by rising zero-crossings
/// of the voltage. A window closes after `frequency` crossings.
#[derive(Debug, Clone)]
pub struct PowerAccumulator {
    frequency: u32,
    sum_p: f64,
    sum_v2: f64,
    sum_i2: f64,
    samples: u64,
    cycles: u32,
    prev_voltage: f64,
    last: Reading,
}

impl PowerAccumulator {
    pub fn new(frequency: u32) -> Self {
        Self {
            frequency,
            sum_p: 0.0,
            sum_v2: 0.0,
            sum_i2: 0.0,
            samples: 0,
            cycles: 0,
            prev_voltage: 0.0,
            last: Reading::default(),
        }
    }

    /// Feed one synchronized voltage/current pair. Returns the latest
    /// completed reading and whether it was completed by this sample.
    pub fn step(&mut self, voltage: f64, current: f64) -> (Reading, bool) {
        self.sum_p += voltage * current;
        self.sum_v2 += voltage * voltage;
        self.sum_i2 += current * current;
        self.samples += 1;

        if self.prev_voltage <= 0.0 && voltage > 0.0 {
            self.cycles += 1;
        }
        self.prev_voltage = voltage;

        if self.cycles < self.frequency {
            return (self.last, false);
        }

        let n = self.samples as f64;
        self.last = Reading {
            real_power: self.sum_p / n,
            rms_voltage: (self.sum_v2 / n).sqrt(),
            rms_current: (self.sum_i2 / n).sqrt(),
        };
        self.reset_window();
        (self.last, true)
    }

    fn reset_window(&mut self) {
        self.sum_p = 0.0;
        self.sum_v2 = 0.0;
        self.sum_i2 = 0.0;
        self.samples = 0;
        self.cycles = 0;
    }
}
