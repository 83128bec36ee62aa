use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use rhd_sensor::mock_board::MockConfig;
use rhd_types::AcquisitionConfig;

/// Configuration for the daemon
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Sampling rate, period and per-port amplifier settings
    #[serde(flatten)]
    pub acquisition: AcquisitionConfig,
    /// Find amplifiers and MISO delays by scanning. When off, the configured
    /// cable lengths set the delays and every port with a non-zero power
    /// mask is enabled.
    #[serde(default = "default_scan_ports")]
    pub scan_ports: bool,
    /// Directory for CSV recordings, None to only monitor
    #[serde(default)]
    pub recording: Option<PathBuf>,
    /// Periods the recorder may queue before the run-cycle skips periods
    #[serde(default = "default_queue_periods")]
    pub queue_periods: usize,
    /// Channel whose mean is logged while monitoring, e.g. "A1_0"
    #[serde(default)]
    pub monitor_channel: Option<String>,
    /// What is plugged into the emulated board
    #[serde(default)]
    pub mock: MockConfig,
}

fn default_scan_ports() -> bool { true }
fn default_queue_periods() -> usize { 8 }

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            acquisition: AcquisitionConfig::default(),
            scan_ports: default_scan_ports(),
            recording: None,
            queue_periods: default_queue_periods(),
            monitor_channel: None,
            mock: MockConfig::default(),
        }
    }
}

/// Loads the daemon configuration from a JSON file.
pub fn load_config(path: &Path) -> Result<DaemonConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Could not read configuration file at '{}'", path.display()))?;
    let config: DaemonConfig = serde_json::from_str(&contents)
        .with_context(|| format!("Could not parse configuration file at '{}'", path.display()))?;
    tracing::info!("Loaded configuration from {}", path.display());
    Ok(config)
}
