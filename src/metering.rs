use chrono::{DateTime, Local, Utc};
use log::{debug, error, warn};
use std::time::Duration;

use crate::accumulator::Reading;
use crate::adc::Adc;
use crate::channel::Channel;
use crate::config::PersistPolicy;
use crate::error::MeterError;
use crate::meter::{MeterReport, ReportSink, UnitReading};
use crate::pairing::{ChannelRegistry, PowerMeasurementUnit};
use crate::store::{Observation, SeriesDef, TimeSeriesStore};

pub const GRAPH_WINDOWS: [&str; 4] = ["1day", "1week", "1month", "1year"];
pub const GRAPH_TITLE: &str = "power consumption";

#[derive(Debug, Clone, Copy)]
pub struct MeterSettings {
    /// Rising zero-crossings per measurement window
    pub frequency: u32,
    pub policy: PersistPolicy,
    /// Minimum time between graph renders
    pub graph_period: Duration,
    pub read_retries: u32,
}

/// Wall-clock gate for graph rendering.
#[derive(Debug, Clone)]
pub struct GraphThrottle {
    period: Duration,
    last: DateTime<Utc>,
}

impl GraphThrottle {
    pub fn new(period: Duration, now: DateTime<Utc>) -> Self {
        Self { period, last: now }
    }

    /// True, and restarts the period, if at least one period has passed.
    pub fn due(&mut self, now: DateTime<Utc>) -> bool {
        let elapsed = match (now - self.last).to_std() {
            Ok(elapsed) => elapsed,
            // clock stepped backwards
            Err(_) => {
                self.last = now;
                return false;
            }
        };
        if elapsed < self.period {
            return false;
        }
        self.last = now;
        true
    }
}

/// Everything the metering loop needs, built once from validated configuration.
pub struct MeterContext<A: Adc, S: TimeSeriesStore> {
    adc: A,
    channels: Vec<Channel>,
    units: Vec<PowerMeasurementUnit>,
    series: Vec<SeriesDef>,
    store: S,
    reports: Option<Box<dyn ReportSink>>,
    settings: MeterSettings,
    graphs: GraphThrottle,
    latest: Vec<(Reading, bool)>,
}

impl<A: Adc, S: TimeSeriesStore> MeterContext<A, S> {
    pub fn new(
        adc: A,
        registry: ChannelRegistry,
        mut store: S,
        reports: Option<Box<dyn ReportSink>>,
        settings: MeterSettings,
    ) -> Result<Self, MeterError> {
        let units = registry.pair(settings.frequency)?;
        let series: Vec<SeriesDef> = units
            .iter()
            .enumerate()
            .map(|(i, u)| SeriesDef {
                name: format!("ch{}", i),
                colour: u.colour.clone(),
                description: u.description.clone(),
            })
            .collect();

        if let Err(e) = store.create(&series) {
            error!("Failed to create store: {:#}", e);
        }

        debug!("Meter initialized with {} power measurement unit(s)", units.len());
        Ok(Self {
            adc,
            channels: registry.into_channels(),
            latest: Vec::with_capacity(units.len()),
            units,
            series,
            store,
            reports,
            settings,
            graphs: GraphThrottle::new(settings.graph_period, Utc::now()),
        })
    }

    /// Sample every channel once, then feed each unit from that snapshot.
    /// Returns the latest reading of every unit and whether it is fresh.
    pub fn tick(&mut self) -> Result<&[(Reading, bool)], MeterError> {
        let retries = self.settings.read_retries;
        for channel in &mut self.channels {
            channel.read(&mut self.adc, retries)?;
        }

        self.latest.clear();
        for (i, unit) in self.units.iter_mut().enumerate() {
            let voltage = self.channels[unit.voltage].get(&mut self.adc, retries)?;
            let current = self.channels[unit.current].get(&mut self.adc, retries)?;
            let (reading, fresh) = unit.accumulator.step(voltage, current);
            if fresh {
                debug!(
                    "Meter {}: {:6.1}W, {:5.1}VRMS, {:5.1}ARMS",
                    i, reading.real_power, reading.rms_voltage, reading.rms_current
                );
            }
            self.latest.push((reading, fresh));
        }

        let persist = match self.settings.policy {
            PersistPolicy::Primary => self.latest.first().map_or(false, |&(_, fresh)| fresh),
            PersistPolicy::Any => self.latest.iter().any(|&(_, fresh)| fresh),
        };
        if persist {
            self.persist();
        }
        Ok(&self.latest)
    }

    fn persist(&mut self) {
        let observation = Observation {
            timestamp: Local::now(),
            values: self.latest.iter().map(|(r, _)| r.real_power).collect(),
            fresh: self.latest.iter().map(|&(_, fresh)| fresh).collect(),
        };
        debug!("rrd update: {:?} (fresh {:?})", observation.values, observation.fresh);
        if let Err(e) = self.store.append(&observation) {
            error!("Failed to update store: {:#}", e);
        }

        if let Some(sink) = self.reports.as_mut() {
            let report = MeterReport {
                timestamp: observation.timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
                units: self
                    .latest
                    .iter()
                    .zip(&self.units)
                    .enumerate()
                    .map(|(i, (&(reading, fresh), unit))| {
                        UnitReading::new(i, &unit.description, reading, fresh).rounded()
                    })
                    .collect(),
            };
            if let Err(e) = sink.publish(&report) {
                error!("Failed to publish: {:#}", e);
            }
        }
    }

    /// Re-render all graph windows if the graph period has elapsed.
    pub fn maybe_render(&mut self) -> bool {
        self.maybe_render_at(Utc::now())
    }

    pub fn maybe_render_at(&mut self, now: DateTime<Utc>) -> bool {
        if !self.graphs.due(now) {
            return false;
        }
        debug!("Rendering graphs");
        for window in GRAPH_WINDOWS {
            if let Err(e) = self.store.render(window, GRAPH_TITLE, &self.series) {
                warn!("Failed to render {} graph: {:#}", window, e);
            }
        }
        true
    }

    /// Meter until a fatal hardware error.
    pub fn run(&mut self) -> Result<(), MeterError> {
        loop {
            self.tick()?;
            self.maybe_render();
        }
    }

    pub fn series(&self) -> &[SeriesDef] {
        &self.series
    }
}
