//! Command line flags. Anything given here overrides the configuration file.

use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;

use rhd_types::{ConfigError, Port, PortConfig};

use crate::config::DaemonConfig;

#[derive(Parser, Debug)]
#[command(name = "rhd_daemon", about = "RHD2000 acquisition daemon for the Rhythm USB board")]
pub struct Cli {
    /// JSON configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Use the emulated board instead of real hardware
    #[arg(long)]
    pub mock: bool,

    /// Sampling rate in Hz, snapped to the nearest supported rate
    #[arg(long)]
    pub rate: Option<u32>,

    /// Frames per run-cycle period
    #[arg(long)]
    pub period: Option<usize>,

    /// Frames to keep in the board FIFO ahead of the reader
    #[arg(long)]
    pub latency: Option<usize>,

    /// Port settings as PORT=mask[,lower[,upper[,dsp[,cable]]]], e.g. A=0xffff,1,7500
    #[arg(long = "port", value_name = "PORT=SETTINGS")]
    pub ports: Vec<PortArg>,

    /// Stop after this many seconds; runs until interrupted otherwise
    #[arg(long)]
    pub seconds: Option<f64>,

    /// Record to CSV files in this directory
    #[arg(long, value_name = "DIR")]
    pub record: Option<PathBuf>,
}

/// One `--port` argument.
#[derive(Debug, Clone, PartialEq)]
pub struct PortArg {
    pub port: Port,
    pub config: PortConfig,
}

impl FromStr for PortArg {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (port, settings) = s
            .split_once('=')
            .ok_or_else(|| ConfigError::Parse(format!("'{}' is not PORT=SETTINGS", s)))?;
        Ok(Self {
            port: port.parse()?,
            config: settings.parse()?,
        })
    }
}

impl Cli {
    /// Applies the flags on top of `config`.
    pub fn apply(&self, config: &mut DaemonConfig) {
        if let Some(rate) = self.rate {
            config.acquisition.sampling_rate = rate;
        }
        if let Some(period) = self.period {
            config.acquisition.period_frames = period;
        }
        if let Some(latency) = self.latency {
            config.acquisition.extra_latency_frames = latency;
        }
        for arg in &self.ports {
            config.acquisition.ports[arg.port.index()] = arg.config;
        }
        if let Some(dir) = &self.record {
            config.recording = Some(dir.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_argument_parses() {
        let arg: PortArg = "b=0xff,0.5,5000,0,1.8".parse().unwrap();
        assert_eq!(arg.port, Port::B);
        assert_eq!(arg.config.power_mask, 0xff);
        assert_eq!(arg.config.lower_hz, 0.5);
        assert_eq!(arg.config.upper_hz, 5000.0);
        assert_eq!(arg.config.dsp_hz, 0.0);
        assert_eq!(arg.config.cable_m, 1.8);

        assert!("A".parse::<PortArg>().is_err());
        assert!("E=0xff".parse::<PortArg>().is_err());
        assert!("A=".parse::<PortArg>().is_err());
    }

    #[test]
    fn flags_override_the_file() {
        let cli = Cli::try_parse_from([
            "rhd_daemon",
            "--mock",
            "--rate",
            "20000",
            "--period",
            "512",
            "--port",
            "A=0xffff,1,7500",
            "--port",
            "D=0",
            "--record",
            "/tmp/out",
        ])
        .unwrap();
        assert!(cli.mock);

        let mut config = DaemonConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.acquisition.sampling_rate, 20_000);
        assert_eq!(config.acquisition.period_frames, 512);
        assert_eq!(config.acquisition.extra_latency_frames, 0);
        assert_eq!(config.acquisition.ports[0].power_mask, 0xffff);
        assert_eq!(config.acquisition.ports[0].upper_hz, 7500.0);
        assert_eq!(config.acquisition.ports[1], PortConfig::default());
        assert_eq!(config.acquisition.ports[3].power_mask, 0);
        assert_eq!(config.recording, Some(PathBuf::from("/tmp/out")));
    }

    #[test]
    fn bad_port_flag_is_a_usage_error() {
        assert!(Cli::try_parse_from(["rhd_daemon", "--port", "Q=1"]).is_err());
    }
}
