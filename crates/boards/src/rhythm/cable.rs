//! MISO sampling delay per port.
//!
//! The FPGA samples each MISO line a whole number of data-clock ticks after
//! driving SCLK. The delay has to cover the round trip over the cable plus
//! fixed pin and chip delays.

use log::debug;

use rhd_sensor::endpoints::WIRE_IN_MISO_DELAY;
use rhd_sensor::Transport;
use rhd_types::layout::MAX_MISO_DELAY;
use rhd_types::{ConfigError, DaqError, Port};

use super::driver::BoardController;

const SPEED_OF_LIGHT: f64 = 299_792_458.0;
/// Signal velocity on the SPI cable, m/s
const CABLE_VELOCITY: f64 = 0.67 * SPEED_OF_LIGHT;
const LVDS_OUTPUT_DELAY: f64 = 1.9e-9;
const RHD2000_DELAY: f64 = 9.0e-9;
const LVDS_INPUT_DELAY: f64 = 1.4e-9;
const MISO_SETTLE_TIME: f64 = 10.0e-9;
const FIXED_DELAY: f64 = LVDS_OUTPUT_DELAY + RHD2000_DELAY + LVDS_INPUT_DELAY + MISO_SETTLE_TIME;
/// Data clock ticks per amplifier sample.
const TICKS_PER_SAMPLE: f64 = 2800.0;

/// Length of the standard 3 ft SPI cable.
pub const DEFAULT_CABLE_M: f64 = 0.91;
pub const FEET_TO_METERS: f64 = 0.3048;

fn tick(sampling_rate: u32) -> f64 {
    1.0 / (TICKS_PER_SAMPLE * f64::from(sampling_rate))
}

/// MISO delay in ticks for a cable of `meters` at `sampling_rate`.
pub fn delay_for_cable(meters: f64, sampling_rate: u32) -> Result<u32, ConfigError> {
    if !meters.is_finite() || meters < 0.0 {
        return Err(ConfigError::OutOfRange {
            what: "cable length",
            value: meters,
            min: 0.0,
            max: f64::INFINITY,
        });
    }
    let round_trip = 2.0 * meters / CABLE_VELOCITY + FIXED_DELAY;
    // zero is too early even for a zero-length cable
    let delay = ((round_trip / tick(sampling_rate)).ceil() as u32).max(1);
    if delay >= MAX_MISO_DELAY {
        return Err(ConfigError::CableTooLong { meters, delay });
    }
    Ok(delay)
}

/// Longest cable that `delay` ticks cover at `sampling_rate`.
pub fn meters_for_delay(delay: u32, sampling_rate: u32) -> f64 {
    (0.5 * CABLE_VELOCITY * (f64::from(delay) * tick(sampling_rate) - FIXED_DELAY)).max(0.0)
}

impl<T: Transport> BoardController<T> {
    /// Sets the MISO delay of `port` for a cable of `meters`. The length is
    /// kept so the delay follows later sampling-rate changes.
    pub fn set_cable_length(&mut self, port: Port, meters: f64) -> Result<u32, DaqError> {
        let delay = delay_for_cable(meters, self.sampling_rate)?;
        self.write_miso_delay(port, delay)?;
        self.cable_m[port.index()] = meters;
        Ok(delay)
    }

    pub fn set_cable_feet(&mut self, port: Port, feet: f64) -> Result<u32, DaqError> {
        self.set_cable_length(port, feet * FEET_TO_METERS)
    }

    /// Sets a raw MISO delay and records the cable length it corresponds to.
    pub fn set_cable_delay(&mut self, port: Port, delay: u32) -> Result<(), DaqError> {
        if delay >= MAX_MISO_DELAY {
            return Err(ConfigError::OutOfRange {
                what: "MISO delay",
                value: f64::from(delay),
                min: 0.0,
                max: f64::from(MAX_MISO_DELAY - 1),
            }
            .into());
        }
        self.write_miso_delay(port, delay)?;
        self.cable_m[port.index()] = meters_for_delay(delay, self.sampling_rate);
        Ok(())
    }

    pub fn cable_delay(&self, port: Port) -> u32 {
        self.miso_delays[port.index()]
    }

    pub fn cable_length(&self, port: Port) -> f64 {
        self.cable_m[port.index()]
    }

    /// Recomputes every port's delay from its stored cable length.
    pub(super) fn apply_cable_lengths(&mut self) -> Result<(), DaqError> {
        for port in Port::ALL {
            let delay = delay_for_cable(self.cable_m[port.index()], self.sampling_rate)?;
            self.write_miso_delay(port, delay)?;
        }
        Ok(())
    }

    pub(super) fn write_miso_delay(&mut self, port: Port, delay: u32) -> Result<(), DaqError> {
        let shift = 4 * port.index();
        self.transport
            .set_wire_in(WIRE_IN_MISO_DELAY, delay << shift, 0xf << shift);
        self.transport.update_wire_ins()?;
        self.miso_delays[port.index()] = delay;
        debug!("Port {}: MISO delay {}", port, delay);
        Ok(())
    }
}
