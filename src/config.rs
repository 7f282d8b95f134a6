use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// When a tick's readings are written to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PersistPolicy {
    /// Only when the first power measurement unit completes a window
    Primary,
    /// Whenever any unit completes a window
    Any,
}

#[derive(Parser, Debug)]
#[command(name = "powermeter", about = "AC power measurement")]
pub struct Config {
    /// Channel configuration: id:phase:<V/C>:zero:gain:#RRGGBB[AA]:description,
    /// or id:zero:? to measure a channel's RMS and exit
    #[arg(required = true, num_args = 1..)]
    pub channels: Vec<String>,

    /// Be verbose
    #[arg(short, long)]
    pub verbose: bool,

    /// Line frequency (50/60Hz), i.e. cycles per measurement window
    #[arg(short, long, default_value_t = 50, value_parser = clap::value_parser!(u32).range(1..))]
    pub frequency: u32,

    /// Name of the rrd file
    #[arg(long = "rrdfile", default_value = "power.rrd")]
    pub rrd_file: PathBuf,

    /// Directory to store generated graphs
    #[arg(long = "graphdir", default_value = "www/")]
    pub graph_dir: PathBuf,

    /// Plot graph at most every N seconds
    #[arg(long = "graphperiod", default_value_t = 60)]
    pub graph_period: u64,

    /// Which completed windows trigger a store update
    #[arg(long, value_enum, default_value_t = PersistPolicy::Primary)]
    pub persist_policy: PersistPolicy,

    /// Serial port of the ADC bridge (if omitted, searches the USB serial ports)
    #[arg(long)]
    pub adc_port: Option<String>,

    /// Device identifier substring to match in the ADC bridge's identification reply
    #[arg(long, default_value = "MCP3008")]
    pub adc_device_id: String,

    /// ADC bridge baud rate
    #[arg(long, default_value_t = 115_200)]
    pub adc_baud: u32,

    /// ADC read timeout in milliseconds
    #[arg(long, default_value_t = 500)]
    pub adc_timeout_ms: u64,

    /// Extra attempts for a failed ADC read before giving up
    #[arg(long, default_value_t = 3)]
    pub read_retries: u32,

    /// Number of samples taken for an id:zero:? calibration run
    #[arg(long, default_value_t = 5000, value_parser = clap::value_parser!(u32).range(1..))]
    pub calibration_samples: u32,

    /// MQTT broker hostname (readings are only published when set)
    #[arg(long)]
    pub mqtt_host: Option<String>,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    pub mqtt_port: u16,

    /// MQTT client ID
    #[arg(long, default_value = "powermeter")]
    pub mqtt_client_id: String,

    /// MQTT topic to publish to
    #[arg(long, default_value = "tele/powermeter")]
    pub mqtt_topic: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::try_parse_from(["powermeter", "0:0:V:0:1:#fff:mains"]).unwrap();
        assert_eq!(config.channels, vec!["0:0:V:0:1:#fff:mains"]);
        assert_eq!(config.frequency, 50);
        assert_eq!(config.graph_period, 60);
        assert_eq!(config.rrd_file, PathBuf::from("power.rrd"));
        assert_eq!(config.graph_dir, PathBuf::from("www/"));
        assert_eq!(config.persist_policy, PersistPolicy::Primary);
        assert_eq!(config.calibration_samples, 5000);
        assert!(!config.verbose);
        assert!(config.mqtt_host.is_none());
    }

    #[test]
    fn short_flags_and_policy() {
        let config = Config::try_parse_from([
            "powermeter",
            "-v",
            "-f",
            "60",
            "--persist-policy",
            "any",
            "--graphperiod",
            "30",
            "0:0:V:0:1:#fff:mains",
            "1:0:C:0:0.1:#f00:load",
        ])
        .unwrap();
        assert!(config.verbose);
        assert_eq!(config.frequency, 60);
        assert_eq!(config.persist_policy, PersistPolicy::Any);
        assert_eq!(config.graph_period, 30);
        assert_eq!(config.channels.len(), 2);
    }

    #[test]
    fn requires_a_channel() {
        assert!(Config::try_parse_from(["powermeter"]).is_err());
    }

    #[test]
    fn rejects_zero_frequency() {
        assert!(Config::try_parse_from(["powermeter", "-f", "0", "0:0:V:0:1:#fff:m"]).is_err());
    }
}
