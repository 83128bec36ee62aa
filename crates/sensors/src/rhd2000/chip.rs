//! In-memory image of one RHD2000 register file.
//!
//! The image is the single source of truth for how a chip should be
//! programmed. Setters translate physical quantities into register fields,
//! the sequence builders turn the image into command lists for the FPGA, and
//! [`RegisterImage::ingest`] checks what the chip reports back.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace};
use serde::Serialize;

use rhd_types::layout::{AMPLIFIER_CHANNELS, MAX_COMMAND_LENGTH, REGISTER_SEQUENCE_LENGTH};
use rhd_types::{ConfigError, ProtocolError};

use super::bandwidth::*;
use super::command::Command;
use super::registers::*;

/// Chip variant reported in ROM register 63.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChipModel {
    Rhd2132,
    Rhd2216,
    Rhd2164,
    Unknown(u8),
}

impl From<u8> for ChipModel {
    fn from(id: u8) -> Self {
        match id {
            1 => ChipModel::Rhd2132,
            2 => ChipModel::Rhd2216,
            4 => ChipModel::Rhd2164,
            other => ChipModel::Unknown(other),
        }
    }
}

impl fmt::Display for ChipModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChipModel::Rhd2132 => f.write_str("RHD2132"),
            ChipModel::Rhd2216 => f.write_str("RHD2216"),
            ChipModel::Rhd2164 => f.write_str("RHD2164"),
            ChipModel::Unknown(id) => write!(f, "RHD2000 (id {})", id),
        }
    }
}

/// What a connected chip says about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChipIdentity {
    pub model: ChipModel,
    pub revision: u8,
    pub amplifiers: u8,
    pub unipolar: bool,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterImage {
    registers: [u8; REGISTER_COUNT],
    sampling_rate: u32,
}

// Frame (in aux-slot words) at which the result of each readback group
// appears, for the register-program sequence. Command k answers in frame k+1.
const RAM_READBACK_FRAME: usize = RAM_REGISTER_COUNT + 1;
const COMPANY_ID_FRAME: usize = 2 * RAM_REGISTER_COUNT + 1;
const CHIP_NAME_FRAME: usize = COMPANY_ID_FRAME + 5;
const LAST_READBACK_FRAME: usize = CHIP_NAME_FRAME + 8 + 5 - 1;

impl RegisterImage {
    /// A register file with power-on defaults, biased for `sampling_rate`, a
    /// 1 Hz DSP cutoff and a 1 Hz - 10 kHz analog band.
    pub fn new(sampling_rate: u32) -> Self {
        let mut registers = [0u8; REGISTER_COUNT];
        registers[..RAM_REGISTER_COUNT].copy_from_slice(&RAM_REGISTER_DEFAULTS);
        let mut image = Self {
            registers,
            sampling_rate,
        };
        image.apply_sampling_rate_registers();
        image.apply_dsp_cutoff(1.0);
        image.apply_upper_cutoff(10_000.0);
        image.apply_lower_cutoff(1.0);
        image
    }

    pub fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    /// Re-targets the image at a new sampling rate. The bias registers follow
    /// the rate and an enabled DSP filter keeps its cutoff in Hz.
    pub fn set_sampling_rate(&mut self, sampling_rate: u32) {
        if sampling_rate == self.sampling_rate {
            return;
        }
        let dsp = self.dsp_enabled().then(|| self.dsp_cutoff());
        self.sampling_rate = sampling_rate;
        self.apply_sampling_rate_registers();
        if let Some(hz) = dsp {
            self.apply_dsp_cutoff(hz);
        }
    }

    pub fn register(&self, reg: u8) -> u8 {
        self.registers[usize::from(reg)]
    }

    pub fn registers(&self) -> &[u8; REGISTER_COUNT] {
        &self.registers
    }

    fn set_field(&mut self, reg: u8, mask: u8, value: u8) {
        let r = &mut self.registers[usize::from(reg)];
        *r = (*r & !mask) | (value & mask);
    }

    fn field(&self, reg: u8, mask: u8) -> u8 {
        self.registers[usize::from(reg)] & mask
    }

    fn apply_sampling_rate_registers(&mut self) {
        let (mux_bias, buffer_bias) = sampling_rate_biases(self.sampling_rate);
        let reg1 = usize::from(ADC_BUFFER_BIAS_REG);
        self.registers[reg1] = (buffer_bias & ADC_BUFFER_BIAS_MASK) | (self.registers[reg1] & 0xe0);
        self.registers[usize::from(MUX_BIAS_REG)] = mux_bias;
    }

    // --- analog bandwidth ---

    pub fn rh1(&self) -> f64 {
        RH1_BASE
            + RH1_DAC1_UNIT * f64::from(self.field(RH1_DAC1_REG, RH1_DAC1_MASK))
            + RH1_DAC2_UNIT * f64::from(self.field(RH1_DAC2_REG, RH1_DAC2_MASK))
    }

    pub fn rh2(&self) -> f64 {
        RH2_BASE
            + RH2_DAC1_UNIT * f64::from(self.field(RH2_DAC1_REG, RH2_DAC1_MASK))
            + RH2_DAC2_UNIT * f64::from(self.field(RH2_DAC2_REG, RH2_DAC2_MASK))
    }

    pub fn rl(&self) -> f64 {
        let dac3 = if self.field(RL_DAC3_REG, RL_DAC3_MASK) != 0 { 1.0 } else { 0.0 };
        RL_BASE
            + RL_DAC1_UNIT * f64::from(self.field(RL_DAC1_REG, RL_DAC1_MASK))
            + RL_DAC2_UNIT * f64::from(self.field(RL_DAC2_REG, RL_DAC2_MASK))
            + RL_DAC3_UNIT * dac3
    }

    /// Upper analog cutoff realised by the current RH1/RH2 codes.
    pub fn upper_cutoff(&self) -> f64 {
        upper_cutoff_from_resistors(self.rh1(), self.rh2())
    }

    pub fn set_upper_cutoff(&mut self, hz: f64) -> Result<(), ConfigError> {
        check_range("upper cutoff", hz, UPPER_CUTOFF_MIN, UPPER_CUTOFF_MAX)?;
        self.apply_upper_cutoff(hz);
        Ok(())
    }

    fn apply_upper_cutoff(&mut self, hz: f64) {
        let (dac1, dac2) = split_resistance(
            rh1_from_upper_cutoff(hz),
            RH1_BASE,
            RH1_DAC1_UNIT,
            RH1_DAC2_UNIT,
            RH1_DAC1_MASK,
            RH1_DAC2_MASK,
        );
        self.set_field(RH1_DAC1_REG, RH1_DAC1_MASK, dac1);
        self.set_field(RH1_DAC2_REG, RH1_DAC2_MASK, dac2);

        let (dac1, dac2) = split_resistance(
            rh2_from_upper_cutoff(hz),
            RH2_BASE,
            RH2_DAC1_UNIT,
            RH2_DAC2_UNIT,
            RH2_DAC1_MASK,
            RH2_DAC2_MASK,
        );
        self.set_field(RH2_DAC1_REG, RH2_DAC1_MASK, dac1);
        self.set_field(RH2_DAC2_REG, RH2_DAC2_MASK, dac2);
    }

    /// Lower analog cutoff realised by the current RL codes.
    pub fn lower_cutoff(&self) -> f64 {
        lower_cutoff_from_resistor(self.rl())
    }

    pub fn set_lower_cutoff(&mut self, hz: f64) -> Result<(), ConfigError> {
        check_range("lower cutoff", hz, LOWER_CUTOFF_MIN, LOWER_CUTOFF_MAX)?;
        self.apply_lower_cutoff(hz);
        Ok(())
    }

    fn apply_lower_cutoff(&mut self, hz: f64) {
        let dac3 = hz < 0.15;
        let target = rl_from_lower_cutoff(hz) - if dac3 { RL_DAC3_UNIT } else { 0.0 };
        let (dac1, dac2) = split_resistance(target, RL_BASE, RL_DAC1_UNIT, RL_DAC2_UNIT, RL_DAC1_MASK, RL_DAC2_MASK);
        self.set_field(RL_DAC1_REG, RL_DAC1_MASK, dac1);
        self.set_field(RL_DAC2_REG, RL_DAC2_MASK, dac2);
        self.set_field(RL_DAC3_REG, RL_DAC3_MASK, if dac3 { RL_DAC3_MASK } else { 0 });
    }

    // --- DSP offset removal ---

    pub fn dsp_enabled(&self) -> bool {
        self.field(DSP_REG, DSP_ENABLE) != 0
    }

    pub fn dsp_cutoff(&self) -> f64 {
        dsp_cutoff_from_code(self.field(DSP_REG, DSP_CUTOFF_MASK), f64::from(self.sampling_rate))
    }

    /// Sets the DSP high-pass cutoff to the nearest achievable code. Zero or
    /// negative values switch the filter off; cutoffs past the highest code
    /// get that code.
    pub fn set_dsp_cutoff(&mut self, hz: f64) -> Result<(), ConfigError> {
        if hz.is_nan() {
            return Err(ConfigError::OutOfRange {
                what: "DSP cutoff",
                value: hz,
                min: f64::NEG_INFINITY,
                max: f64::INFINITY,
            });
        }
        self.apply_dsp_cutoff(hz);
        Ok(())
    }

    fn apply_dsp_cutoff(&mut self, hz: f64) {
        if hz <= 0.0 {
            self.set_field(DSP_REG, DSP_ENABLE, 0);
            return;
        }
        // very high cutoffs overflow to NaN, which max() maps to code 1
        let code = dsp_code_from_cutoff(hz, f64::from(self.sampling_rate))
            .max(1.0)
            .min(f64::from(DSP_MAX_CODE)) as u8;
        self.set_field(DSP_REG, DSP_ENABLE | DSP_CUTOFF_MASK, DSP_ENABLE | code);
    }

    // --- amplifier power ---

    pub fn power_mask(&self) -> u32 {
        let start = usize::from(AMP_POWER_REG);
        LittleEndian::read_u32(&self.registers[start..start + 4])
    }

    pub fn set_power_mask(&mut self, mask: u32) {
        let start = usize::from(AMP_POWER_REG);
        LittleEndian::write_u32(&mut self.registers[start..start + 4], mask);
    }

    pub fn set_channel_power(&mut self, channel: usize, powered: bool) -> Result<(), ConfigError> {
        if channel >= AMPLIFIER_CHANNELS {
            return Err(ConfigError::ChannelOutOfRange(channel));
        }
        let bit = 1u32 << channel;
        let mask = if powered {
            self.power_mask() | bit
        } else {
            self.power_mask() & !bit
        };
        self.set_power_mask(mask);
        Ok(())
    }

    pub fn channel_powered(&self, channel: usize) -> bool {
        channel < AMPLIFIER_CHANNELS && self.power_mask() & (1 << channel) != 0
    }

    pub fn amps_powered(&self) -> usize {
        self.power_mask().count_ones() as usize
    }

    // --- identity ---

    /// True when the company-id ROM registers read "INTAN".
    pub fn connected(&self) -> bool {
        let start = usize::from(COMPANY_ID_REGS.start);
        &self.registers[start..start + COMPANY_ID.len()] == COMPANY_ID
    }

    pub fn chip_identity(&self) -> Option<ChipIdentity> {
        if !self.connected() {
            return None;
        }
        let start = usize::from(CHIP_NAME_REGS.start);
        let end = usize::from(CHIP_NAME_REGS.end);
        let name = self.registers[start..end]
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| char::from(b))
            .collect::<String>();
        Some(ChipIdentity {
            model: ChipModel::from(self.register(CHIP_ID_REG)),
            revision: self.register(REVISION_REG),
            amplifiers: self.register(AMP_COUNT_REG),
            unipolar: self.register(UNIPOLAR_REG) != 0,
            name: name.trim_end().to_string(),
        })
    }

    // --- command sequences ---

    /// Programs every RAM register this slot owns and reads the whole file
    /// back, optionally followed by an ADC calibration.
    pub fn build_register_program_sequence(&self, calibrate: bool) -> Vec<Command> {
        let mut commands = Vec::with_capacity(REGISTER_SEQUENCE_LENGTH);
        // the chip may still be powering up
        commands.push(Command::Read(CHIP_ID_REG));
        commands.push(Command::Read(CHIP_ID_REG));

        for reg in 0..RAM_REGISTER_COUNT as u8 {
            if !is_foreign_register(reg) {
                commands.push(Command::Write(reg, self.register(reg)));
            }
        }
        commands.extend((0..RAM_REGISTER_COUNT as u8).map(Command::Read));
        commands.extend(COMPANY_ID_REGS.map(Command::Read));
        commands.extend(CHIP_NAME_REGS.map(Command::Read));
        commands.extend(CHIP_INFO_REGS.map(Command::Read));

        if calibrate {
            commands.push(Command::Calibrate);
        }
        commands.resize(REGISTER_SEQUENCE_LENGTH, Command::Read(CHIP_ID_REG));
        commands
    }

    /// Samples the three auxiliary inputs continuously while stepping the
    /// temperature sensor through its two-phase measurement and reading the
    /// supply voltage.
    pub fn build_aux_sample_sequence(&self) -> Vec<Command> {
        let mut commands = Vec::with_capacity(REGISTER_SEQUENCE_LENGTH);
        let off = (self.register(SENSOR_REG) | TEMP_ENABLE) & !(TEMP_SENSOR_1 | TEMP_SENSOR_2);
        let first = off | TEMP_SENSOR_1;
        let both = first | TEMP_SENSOR_2;
        let second = both & !TEMP_SENSOR_1;

        let phases = [
            Command::Write(SENSOR_REG, off),
            Command::Write(SENSOR_REG, first),
            Command::Write(SENSOR_REG, both),
            Command::Convert(TEMP_SENSOR_CHANNEL),
            Command::Write(SENSOR_REG, second),
            Command::Convert(TEMP_SENSOR_CHANNEL),
            Command::Write(SENSOR_REG, off),
            Command::Convert(SUPPLY_SENSOR_CHANNEL),
        ];
        for action in phases {
            commands.extend(AUX_INPUT_CHANNELS.map(Command::Convert));
            commands.push(action);
        }
        while commands.len() < REGISTER_SEQUENCE_LENGTH {
            commands.extend(AUX_INPUT_CHANNELS.map(Command::Convert));
            commands.push(Command::Read(CHIP_ID_REG));
        }
        commands.truncate(REGISTER_SEQUENCE_LENGTH);
        commands
    }

    /// Drives the impedance-check DAC through `values`, which are centred on
    /// zero and span -128..=127.
    pub fn build_dac_sequence(&self, values: &[f64]) -> Result<Vec<Command>, ConfigError> {
        if values.is_empty() || values.len() > MAX_COMMAND_LENGTH {
            return Err(ConfigError::SequenceLength(values.len()));
        }
        Ok(values
            .iter()
            .map(|v| {
                let level = v.round().clamp(-128.0, 127.0) as i32 + ZCHECK_DAC_BIAS;
                Command::Write(ZCHECK_DAC_REG, level as u8)
            })
            .collect())
    }

    // --- readback ---

    /// Parses the aux-slot results of a register-program sequence.
    ///
    /// `frames` holds consecutive acquisition frames; the result for this
    /// chip sits at byte `offset` of each frame and frames are `stride` bytes
    /// apart. The company id is always updated. If it reads "INTAN" the RAM
    /// readbacks must match the image and the remaining ROM registers are
    /// copied in.
    pub fn ingest(&mut self, frames: &[u8], offset: usize, stride: usize) -> Result<(), ProtocolError> {
        let needed = offset + stride * LAST_READBACK_FRAME + 2;
        if frames.len() < needed {
            return Err(ProtocolError::ShortBuffer {
                needed,
                got: frames.len(),
            });
        }
        let word = |t: usize| LittleEndian::read_u16(&frames[offset + stride * t..]);

        let mut company = [0u8; COMPANY_ID.len()];
        for (i, byte) in company.iter_mut().enumerate() {
            *byte = word(COMPANY_ID_FRAME + i) as u8;
        }
        if &company != COMPANY_ID {
            trace!("No amplifier answered at byte offset {}", offset);
            self.store_company_id(&company);
            return Ok(());
        }

        for reg in 0..RAM_REGISTER_COUNT as u8 {
            if is_foreign_register(reg) {
                continue;
            }
            let actual = word(RAM_READBACK_FRAME + usize::from(reg));
            let expected = self.register(reg);
            if actual != u16::from(expected) {
                return Err(ProtocolError::RegisterMismatch {
                    register: reg,
                    expected,
                    actual,
                });
            }
        }

        self.store_company_id(&company);
        let rom = CHIP_NAME_REGS.chain(CHIP_INFO_REGS);
        for (i, reg) in rom.enumerate() {
            self.registers[usize::from(reg)] = word(CHIP_NAME_FRAME + i) as u8;
        }
        debug!("Amplifier at byte offset {} verified: {}", offset, self);
        Ok(())
    }

    fn store_company_id(&mut self, company: &[u8]) {
        let start = usize::from(COMPANY_ID_REGS.start);
        self.registers[start..start + company.len()].copy_from_slice(company);
    }
}

fn check_range(what: &'static str, hz: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if hz.is_nan() || hz < min || hz > max {
        return Err(ConfigError::OutOfRange {
            what,
            value: hz,
            min,
            max,
        });
    }
    Ok(())
}

impl fmt::Display for RegisterImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(identity) = self.chip_identity() else {
            return f.write_str("no amplifier connected");
        };
        write!(
            f,
            "{} (rev={}, amps={}/{}): bandw: {:.2} - {:.0} Hz; dsp cut: ",
            identity.model,
            identity.revision,
            self.amps_powered(),
            identity.amplifiers,
            self.lower_cutoff(),
            self.upper_cutoff()
        )?;
        if self.dsp_enabled() {
            write!(f, "{:.2} Hz", self.dsp_cutoff())
        } else {
            f.write_str("disabled")
        }
    }
}

