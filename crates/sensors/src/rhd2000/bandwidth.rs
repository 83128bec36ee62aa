//! Empirical fits between amplifier cutoff frequencies and the on-chip
//! bandwidth-setting resistors, plus the resistor DAC arithmetic.
//!
//! The fits come from Intan's RHD2000 datasheet. Going from a frequency to
//! a resistance uses the published polynomial in `log10(f)`; going back
//! solves the quadratic for its smaller root.

use std::f64::consts::PI;

pub const UPPER_CUTOFF_MIN: f64 = 100.0;
pub const UPPER_CUTOFF_MAX: f64 = 30_000.0;
pub const LOWER_CUTOFF_MIN: f64 = 0.1;
pub const LOWER_CUTOFF_MAX: f64 = 1_500.0;

pub const RH1_BASE: f64 = 2_200.0;
pub const RH1_DAC1_UNIT: f64 = 600.0;
pub const RH1_DAC2_UNIT: f64 = 29_400.0;

pub const RH2_BASE: f64 = 8_700.0;
pub const RH2_DAC1_UNIT: f64 = 763.0;
pub const RH2_DAC2_UNIT: f64 = 38_400.0;

pub const RL_BASE: f64 = 3_500.0;
pub const RL_DAC1_UNIT: f64 = 175.0;
pub const RL_DAC2_UNIT: f64 = 12_700.0;
pub const RL_DAC3_UNIT: f64 = 3_000_000.0;

/// Below this RL the lower-cutoff fit is not valid.
const RL_FIT_FLOOR: f64 = 5_100.0;

/// RH1 resistance (ohms) for an upper cutoff in Hz.
pub fn rh1_from_upper_cutoff(hz: f64) -> f64 {
    let lf = hz.log10();
    0.9730 * 10f64.powf(8.0968 - 1.1892 * lf + 0.04767 * lf * lf)
}

/// RH2 resistance (ohms) for an upper cutoff in Hz.
pub fn rh2_from_upper_cutoff(hz: f64) -> f64 {
    let lf = hz.log10();
    1.0191 * 10f64.powf(8.1009 - 1.0821 * lf + 0.03383 * lf * lf)
}

/// RL resistance (ohms) for a lower cutoff in Hz.
pub fn rl_from_lower_cutoff(hz: f64) -> f64 {
    let lf = hz.log10();
    if hz < 4.0 {
        1.0061 * 10f64.powf(4.9391 - 1.2088 * lf + 0.5698 * lf * lf + 0.1442 * lf * lf * lf)
    } else {
        1.0061 * 10f64.powf(4.7351 - 0.5916 * lf + 0.08482 * lf * lf)
    }
}

/// Smaller root of `a·x² + b·x + c` raised to a power of ten.
fn quadratic_cutoff(a: f64, b: f64, c: f64) -> f64 {
    10f64.powf((-b - (b * b - 4.0 * a * c).sqrt()) / (2.0 * a))
}

/// Upper cutoff in Hz realised by a pair of RH1/RH2 resistances.
pub fn upper_cutoff_from_resistors(rh1: f64, rh2: f64) -> f64 {
    let rh1_cut = quadratic_cutoff(0.04767, -1.1892, 8.0968 - (rh1 / 0.9730).log10());
    let rh2_cut = quadratic_cutoff(0.03383, -1.0821, 8.1009 - (rh2 / 1.0191).log10());
    (rh1_cut * rh2_cut).sqrt()
}

/// Lower cutoff in Hz realised by an RL resistance.
pub fn lower_cutoff_from_resistor(rl: f64) -> f64 {
    let rl = rl.max(RL_FIT_FLOOR);
    if rl < 30_000.0 {
        quadratic_cutoff(0.08482, -0.5916, 4.7351 - (rl / 1.0061).log10())
    } else {
        quadratic_cutoff(0.3303, -1.2100, 4.9873 - (rl / 1.0061).log10())
    }
}

/// Splits a target resistance into a coarse and a fine DAC code.
///
/// The coarse code is floored so the remainder is never negative; the fine
/// code is rounded. Both are clamped to their register fields.
pub fn split_resistance(target: f64, base: f64, fine_unit: f64, coarse_unit: f64, fine_max: u8, coarse_max: u8) -> (u8, u8) {
    let coarse = ((target - base) / coarse_unit).floor().clamp(0.0, f64::from(coarse_max));
    let fine = ((target - base - coarse * coarse_unit) / fine_unit)
        .round()
        .clamp(0.0, f64::from(fine_max));
    (fine as u8, coarse as u8)
}

/// DSP high-pass cutoff in Hz for a filter code.
pub fn dsp_cutoff_from_code(code: u8, sampling_rate: f64) -> f64 {
    let x = 2f64.powi(i32::from(code));
    sampling_rate * (x / (x - 1.0)).ln() / (2.0 * PI)
}

/// Nearest DSP filter code for a cutoff, before clamping.
pub fn dsp_code_from_cutoff(hz: f64, sampling_rate: f64) -> f64 {
    let q = (2.0 * PI * hz / sampling_rate).exp();
    (q / (q - 1.0)).log2().round()
}
