use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::store::{Observation, SeriesDef, TimeSeriesStore};

const RRDTOOL: &str = "rrdtool";

/// 1s step, averages and maxima kept from 10 days at 1s resolution up to 10 years at 1d.
const ARCHIVES: &[&str] = &[
    "RRA:AVERAGE:0.5:1s:10d",
    "RRA:AVERAGE:0.5:1m:90d",
    "RRA:AVERAGE:0.5:1h:18M",
    "RRA:AVERAGE:0.5:1d:10y",
    "RRA:MAX:0.5:1s:10d",
    "RRA:MAX:0.5:1m:90d",
    "RRA:MAX:0.5:1h:18M",
    "RRA:MAX:0.5:1d:10y",
];

const GRAPH_STYLE: &[&str] = &[
    "--lazy",
    "--border",
    "0",
    "-v",
    "W",
    "--color",
    "BACK#101010",
    "--color",
    "CANVAS#000000",
    "--color",
    "FONT#ffffff",
    "--font",
    "LEGEND:7",
];

/// Round-robin database driven through the `rrdtool` command line.
/// Updates and graphs are spawned in the background and reaped later.
pub struct RrdStore {
    path: PathBuf,
    graph_dir: PathBuf,
    pending: Vec<(String, Child)>,
}

impl RrdStore {
    pub fn new(path: impl Into<PathBuf>, graph_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            graph_dir: graph_dir.into(),
            pending: Vec::new(),
        }
    }

    fn spawn(&mut self, what: &str, args: Vec<String>) -> Result<()> {
        self.reap();
        let child = Command::new(RRDTOOL)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn {} {}", RRDTOOL, what))?;
        self.pending.push((what.to_string(), child));
        Ok(())
    }

    /// Collect finished rrdtool processes, logging the ones that failed.
    fn reap(&mut self) {
        self.pending.retain_mut(|(what, child)| match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    warn!("{} {} exited with {}", RRDTOOL, what, status);
                }
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!("Failed to poll {} {}: {}", RRDTOOL, what, e);
                false
            }
        });
    }
}

impl TimeSeriesStore for RrdStore {
    fn create(&mut self, series: &[SeriesDef]) -> Result<()> {
        if self.path.is_file() {
            debug!("Using existing RRD {}", self.path.display());
            return Ok(());
        }
        info!("Creating RRD in {}", self.path.display());
        let status = Command::new(RRDTOOL)
            .args(create_args(&self.path, series))
            .status()
            .with_context(|| format!("Failed to run {} create", RRDTOOL))?;
        if !status.success() {
            bail!("{} create {} exited with {}", RRDTOOL, self.path.display(), status);
        }
        Ok(())
    }

    fn append(&mut self, observation: &Observation) -> Result<()> {
        let args = update_args(&self.path, observation);
        self.spawn("update", args)
    }

    fn render(&mut self, window: &str, title: &str, series: &[SeriesDef]) -> Result<()> {
        let image = self.graph_dir.join(format!("graph_{}.png", window));
        let args = graph_args(&self.path, &image, window, title, series);
        self.spawn("graph", args)
    }
}

pub fn create_args(path: &Path, series: &[SeriesDef]) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        path.display().to_string(),
        "--step".to_string(),
        "1s".to_string(),
    ];
    args.extend(ARCHIVES.iter().map(|a| a.to_string()));
    args.extend(series.iter().map(|s| format!("DS:{}:GAUGE:5m:0:U", s.name)));
    args
}

pub fn update_args(path: &Path, observation: &Observation) -> Vec<String> {
    let mut row = format!("{:.3}", observation.timestamp.timestamp_millis() as f64 / 1000.0);
    for v in &observation.values {
        row.push_str(&format!(":{:.2}", v));
    }
    vec!["update".to_string(), path.display().to_string(), row]
}

pub fn graph_args(path: &Path, image: &Path, window: &str, title: &str, series: &[SeriesDef]) -> Vec<String> {
    let mut args = vec![
        "graph".to_string(),
        image.display().to_string(),
        "-s".to_string(),
        format!("-{}", window),
        "-t".to_string(),
        title.to_string(),
    ];
    args.extend(GRAPH_STYLE.iter().map(|a| a.to_string()));
    for s in series {
        args.push(format!("DEF:{0}={1}:{0}:AVERAGE", s.name, path.display()));
        args.push(format!("LINE1:{}{}:{}", s.name, s.colour, s.description));
    }
    if series.len() > 1 {
        // RPN: ch0,ch1,+,ch2,+,...
        let mut rpn = series[0].name.clone();
        for s in &series[1..] {
            rpn.push_str(&format!(",{},+", s.name));
        }
        args.push(format!("CDEF:sum={}", rpn));
        args.push("LINE1:sum#ffffff:sum".to_string());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn series(n: usize) -> Vec<SeriesDef> {
        (0..n)
            .map(|i| SeriesDef {
                name: format!("ch{}", i),
                colour: format!("#00000{}", i),
                description: format!("load {}", i),
            })
            .collect()
    }

    #[test]
    fn create_declares_one_gauge_per_series() {
        let args = create_args(Path::new("power.rrd"), &series(2));
        assert_eq!(&args[..4], &["create", "power.rrd", "--step", "1s"]);
        assert_eq!(args.len(), 4 + ARCHIVES.len() + 2);
        assert_eq!(args[args.len() - 2], "DS:ch0:GAUGE:5m:0:U");
        assert_eq!(args[args.len() - 1], "DS:ch1:GAUGE:5m:0:U");
    }

    #[test]
    fn update_row_joins_values_with_timestamp() {
        let observation = Observation {
            timestamp: Local.timestamp_millis_opt(1_700_000_000_250).unwrap(),
            values: vec![1058.0, -3.456],
            fresh: vec![true, false],
        };
        let args = update_args(Path::new("power.rrd"), &observation);
        assert_eq!(args, vec!["update", "power.rrd", "1700000000.250:1058.00:-3.46"]);
    }

    #[test]
    fn graph_sums_all_series() {
        let args = graph_args(
            Path::new("power.rrd"),
            Path::new("www/graph_1day.png"),
            "1day",
            "power consumption",
            &series(3),
        );
        assert_eq!(&args[..6], &["graph", "www/graph_1day.png", "-s", "-1day", "-t", "power consumption"]);
        assert!(args.contains(&"DEF:ch1=power.rrd:ch1:AVERAGE".to_string()));
        assert!(args.contains(&"LINE1:ch2#000002:load 2".to_string()));
        assert!(args.contains(&"CDEF:sum=ch0,ch1,+,ch2,+".to_string()));
        assert_eq!(args.last().unwrap(), "LINE1:sum#ffffff:sum");
    }

    #[test]
    fn graph_single_series_has_no_sum() {
        let args = graph_args(Path::new("p.rrd"), Path::new("g.png"), "1week", "t", &series(1));
        assert!(!args.iter().any(|a| a.starts_with("CDEF:sum")));
    }

    #[test]
    fn create_skips_existing_file() {
        let dir = std::env::temp_dir().join(format!("powermeter-rrd-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("existing.rrd");
        std::fs::write(&path, b"not really an rrd").unwrap();
        let mut store = RrdStore::new(&path, &dir);
        store.create(&series(1)).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"not really an rrd");
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
