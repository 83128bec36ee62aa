//! Intan Rhythm eval board on an Opal Kelly XEM6010
//!
//! The controller owns one [`RegisterImage`](rhd_sensor::RegisterImage) per
//! MISO line and keeps the FPGA command RAM, stream enables and the channel
//! table consistent with them.

mod cable;
mod calibration;
mod clock;
mod dac;
mod driver;

#[cfg(test)]
mod tests;

pub use cable::{delay_for_cable, meters_for_delay, DEFAULT_CABLE_M, FEET_TO_METERS};
pub use calibration::{choose_delay, ScanReport};
pub use dac::{dac_source_word, DAC_COUNT};
pub use clock::{snap_sampling_rate, SUPPORTED_SAMPLING_RATES};
pub use driver::BoardController;
