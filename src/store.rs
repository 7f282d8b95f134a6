use anyhow::Result;
use chrono::{DateTime, Local};

/// One gauge series in the store, one per power measurement unit.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesDef {
    pub name: String,
    pub colour: String,
    pub description: String,
}

/// One row: the latest real power of every unit, in unit order.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub timestamp: DateTime<Local>,
    pub values: Vec<f64>,
    /// Which units completed a window on the tick that produced this row.
    pub fresh: Vec<bool>,
}

/// Time-series persistence and graph rendering.
pub trait TimeSeriesStore {
    /// Create the store for `series`. A no-op if it already exists.
    fn create(&mut self, series: &[SeriesDef]) -> Result<()>;

    fn append(&mut self, observation: &Observation) -> Result<()>;

    /// Render a graph of the last `window` (e.g. `1day`).
    fn render(&mut self, window: &str, title: &str, series: &[SeriesDef]) -> Result<()>;
}
