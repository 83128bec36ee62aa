//! Data clock synthesiser.
//!
//! The SPI state machine runs at `100 MHz * M / D / 2` and spends 2800 clock
//! cycles per amplifier sample (35 commands of 80 cycles each).

use log::{debug, info};

use rhd_sensor::endpoints::{
    DATA_CLK_LOCKED, DCM_PROG_DONE, TRIG_IN_DCM_PROG, WIRE_IN_DATA_FREQ_PLL, WIRE_OUT_DATA_CLK_LOCKED,
};
use rhd_sensor::Transport;
use rhd_types::DaqError;

use super::driver::BoardController;

/// Per-channel sampling rates the synthesiser can produce, in Hz.
pub const SUPPORTED_SAMPLING_RATES: [u32; 16] = [
    1_000, 1_250, 1_500, 2_000, 2_500, 3_000, 4_000, 5_000, 6_250, 8_000, 10_000, 12_500, 15_000, 20_000,
    25_000, 30_000,
];

// (upper bound of the request, M, D)
const SYNTH_TABLE: [(u32, u32, u32); 15] = [
    (1_125, 7, 125),
    (1_375, 7, 100),
    (1_750, 21, 250),
    (2_250, 14, 125),
    (2_750, 35, 250),
    // 3333 Hz is skipped, it is not a whole number of samples per second
    (3_500, 21, 125),
    (4_500, 28, 125),
    (5_265, 7, 25),
    (7_125, 7, 20),
    (9_000, 112, 250),
    (11_250, 14, 25),
    (13_750, 7, 10),
    (17_500, 21, 25),
    (22_500, 28, 25),
    (27_500, 35, 25),
];
const FASTEST: (u32, u32) = (42, 25);

/// Snaps a requested rate to the nearest supported band.
/// Returns the resulting rate with its synthesiser `M` and `D`.
pub fn snap_sampling_rate(requested: u32) -> (u32, u32, u32) {
    let (m, d) = SYNTH_TABLE
        .iter()
        .find(|(bound, _, _)| requested < *bound)
        .map(|&(_, m, d)| (m, d))
        .unwrap_or(FASTEST);
    // 1e5 * M / D / 2 / 2.8 without leaving integers
    let rate = 100_000 * m * 10 / (d * 56);
    (rate, m, d)
}

impl<T: Transport> BoardController<T> {
    /// Reprograms the data clock for the supported rate nearest `requested`.
    /// Cable delays are recomputed for the new rate and every register image
    /// is re-biased.
    pub fn set_sampling_rate(&mut self, requested: u32) -> Result<u32, DaqError> {
        self.ensure_stopped()?;
        let (rate, m, d) = snap_sampling_rate(requested);
        if rate == self.sampling_rate {
            return Ok(rate);
        }

        self.wait_for_bits("DCM programming done", WIRE_OUT_DATA_CLK_LOCKED, DCM_PROG_DONE)?;
        self.transport
            .set_wire_in(WIRE_IN_DATA_FREQ_PLL, 256 * m + d, 0xffff);
        self.transport.update_wire_ins()?;
        self.transport.activate_trigger(TRIG_IN_DCM_PROG, 0)?;
        self.wait_for_bits("data clock lock", WIRE_OUT_DATA_CLK_LOCKED, DATA_CLK_LOCKED)?;
        debug!("Data clock M={} D={}", m, d);

        self.sampling_rate = rate;
        for image in &mut self.images {
            image.set_sampling_rate(rate);
        }
        self.apply_cable_lengths()?;
        if rate != requested {
            info!("Sampling rate {} Hz snapped to {} Hz", requested, rate);
        }
        Ok(rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_band_lands_on_a_supported_rate() {
        for requested in (500..40_000).step_by(250) {
            let (rate, _, _) = snap_sampling_rate(requested);
            assert!(SUPPORTED_SAMPLING_RATES.contains(&rate), "{} -> {}", requested, rate);
        }
    }

    #[test]
    fn supported_rates_are_fixed_points() {
        for rate in SUPPORTED_SAMPLING_RATES {
            assert_eq!(snap_sampling_rate(rate).0, rate);
        }
    }

    #[test]
    fn band_edges() {
        assert_eq!(snap_sampling_rate(0), (1_000, 7, 125));
        assert_eq!(snap_sampling_rate(1_124).0, 1_000);
        assert_eq!(snap_sampling_rate(1_125).0, 1_250);
        assert_eq!(snap_sampling_rate(3_333).0, 3_000);
        assert_eq!(snap_sampling_rate(14_000).0, 15_000);
        assert_eq!(snap_sampling_rate(17_499).0, 15_000);
        assert_eq!(snap_sampling_rate(17_500).0, 20_000);
        assert_eq!(snap_sampling_rate(100_000), (30_000, 42, 25));
    }
}
