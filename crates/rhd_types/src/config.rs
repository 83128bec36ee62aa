//! Configuration types for the acquisition stack

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::layout::MAX_PORTS;

/// Amplifier settings for one port. Both chips on the port share them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortConfig {
    /// One bit per amplifier channel, bit 0 is channel 0
    #[serde(default = "default_power_mask")]
    pub power_mask: u32,
    /// Lower analog cutoff in Hz
    #[serde(default = "default_lower_hz")]
    pub lower_hz: f64,
    /// Upper analog cutoff in Hz
    #[serde(default = "default_upper_hz")]
    pub upper_hz: f64,
    /// DSP offset-removal cutoff in Hz, 0 disables it
    #[serde(default = "default_dsp_hz")]
    pub dsp_hz: f64,
    /// Length of the SPI cable in meters
    #[serde(default = "default_cable_m")]
    pub cable_m: f64,
}

fn default_power_mask() -> u32 { 0xffff_ffff }
fn default_lower_hz() -> f64 { 100.0 }
fn default_upper_hz() -> f64 { 3000.0 }
fn default_dsp_hz() -> f64 { 1.0 }
fn default_cable_m() -> f64 { 0.91 }

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            power_mask: default_power_mask(),
            lower_hz: default_lower_hz(),
            upper_hz: default_upper_hz(),
            dsp_hz: default_dsp_hz(),
            cable_m: default_cable_m(),
        }
    }
}

impl FromStr for PortConfig {
    type Err = ConfigError;

    /// Parses `mask[,lower[,upper[,dsp[,cable]]]]`. Missing trailing fields
    /// keep their defaults; the mask may be decimal or `0x` hex.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut config = PortConfig::default();
        let mut fields = s.split(',').map(str::trim);

        let mask = fields
            .next()
            .filter(|f| !f.is_empty())
            .ok_or_else(|| ConfigError::Parse("empty port configuration".to_string()))?;
        config.power_mask = parse_mask(mask)?;

        let slots = [
            &mut config.lower_hz,
            &mut config.upper_hz,
            &mut config.dsp_hz,
            &mut config.cable_m,
        ];
        for slot in slots {
            match fields.next() {
                Some(field) => {
                    *slot = field
                        .parse()
                        .map_err(|_| ConfigError::Parse(format!("'{}' is not a number", field)))?;
                }
                None => break,
            }
        }
        if let Some(extra) = fields.next() {
            return Err(ConfigError::Parse(format!("unexpected field '{}'", extra)));
        }
        Ok(config)
    }
}

fn parse_mask(s: &str) -> Result<u32, ConfigError> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| ConfigError::Parse(format!("'{}' is not a channel mask", s)))
}

/// Board-wide acquisition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Requested sampling rate in Hz, snapped to the nearest supported rate
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: u32,
    /// Frames per run-cycle period
    #[serde(default = "default_period_frames")]
    pub period_frames: usize,
    /// Frames kept in the board FIFO ahead of the reader
    #[serde(default)]
    pub extra_latency_frames: usize,
    #[serde(default = "default_ports")]
    pub ports: [PortConfig; MAX_PORTS],
}

fn default_sampling_rate() -> u32 { 30_000 }
fn default_period_frames() -> usize { 1024 }
fn default_ports() -> [PortConfig; MAX_PORTS] { [PortConfig::default(); MAX_PORTS] }

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sampling_rate: default_sampling_rate(),
            period_frames: default_period_frames(),
            extra_latency_frames: 0,
            ports: default_ports(),
        }
    }
}
