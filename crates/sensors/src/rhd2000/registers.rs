//! Register map and low-level register helpers for the RHD2000 chip.

pub const REGISTER_COUNT: usize = 64;
pub const RAM_REGISTER_COUNT: usize = 18;

// RAM register defaults. Rate-dependent bias, DSP and bandwidth fields are
// filled in by RegisterImage::new.
pub const RAM_REGISTER_DEFAULTS: [u8; RAM_REGISTER_COUNT] = [
    0xde, // 0: mostly fixed values; fast settle [5] off
    0x40, // 1: ADC buffer bias [5:0] from sampling rate
    0x00, // 2: mux bias [5:0] from sampling rate
    0x02, // 3: digout HiZ [1]
    0x80, // 4: DSP enable [4], cutoff [3:0]
    0x40, // 5: impedance check DAC disabled
    0x80, // 6: zcheck DAC mid-scale
    0x00, // 7: zcheck DAC disconnected
    0x00, // 8: offchip RH1 [7] off; RH1 DAC1 [5:0]
    0x80, // 9: ADC aux1 [7] on; RH1 DAC2 [4:0]
    0x00, // 10: offchip RH2 [7] off; RH2 DAC1 [5:0]
    0x80, // 11: ADC aux2 [7] on; RH2 DAC2 [4:0]
    0x00, // 12: offchip RL [7] off; RL DAC1 [6:0]
    0x80, // 13: ADC aux3 [7] on; RL DAC3 [6], DAC2 [5:0]
    0xff, // 14: amps 0-7
    0xff, // 15: amps 8-15
    0xff, // 16: amps 16-23
    0xff, // 17: amps 24-31
];

pub const ADC_CONFIG_REG: u8 = 0;
pub const ADC_BUFFER_BIAS_REG: u8 = 1;
pub const ADC_BUFFER_BIAS_MASK: u8 = 0x3f;
pub const MUX_BIAS_REG: u8 = 2;

pub const SENSOR_REG: u8 = 3;
pub const TEMP_ENABLE: u8 = 1 << 2;
pub const TEMP_SENSOR_1: u8 = 1 << 3;
pub const TEMP_SENSOR_2: u8 = 1 << 4;

pub const DSP_REG: u8 = 4;
pub const DSP_ENABLE: u8 = 0x10;
pub const DSP_CUTOFF_MASK: u8 = 0x0f;
pub const DSP_MAX_CODE: u8 = 15;

pub const ZCHECK_DAC_REG: u8 = 6;
/// Mid-scale value of the impedance-check DAC.
pub const ZCHECK_DAC_BIAS: i32 = 128;

pub const RH1_DAC1_REG: u8 = 8;
pub const RH1_DAC1_MASK: u8 = 0x3f;
pub const RH1_DAC2_REG: u8 = 9;
pub const RH1_DAC2_MASK: u8 = 0x1f;
pub const RH2_DAC1_REG: u8 = 10;
pub const RH2_DAC1_MASK: u8 = 0x3f;
pub const RH2_DAC2_REG: u8 = 11;
pub const RH2_DAC2_MASK: u8 = 0x1f;
pub const RL_DAC1_REG: u8 = 12;
pub const RL_DAC1_MASK: u8 = 0x7f;
pub const RL_DAC2_REG: u8 = 13;
pub const RL_DAC2_MASK: u8 = 0x3f;
pub const RL_DAC3_REG: u8 = 13;
pub const RL_DAC3_MASK: u8 = 0x40;

/// First of four little-endian amplifier power registers.
pub const AMP_POWER_REG: u8 = 14;

// ROM
pub const COMPANY_ID_REGS: std::ops::Range<u8> = 40..45;
pub const CHIP_NAME_REGS: std::ops::Range<u8> = 48..56;
pub const CHIP_INFO_REGS: std::ops::Range<u8> = 59..64;
pub const REVISION_REG: u8 = 60;
pub const UNIPOLAR_REG: u8 = 61;
pub const AMP_COUNT_REG: u8 = 62;
pub const CHIP_ID_REG: u8 = 63;
pub const COMPANY_ID: &[u8; 5] = b"INTAN";

// Converter channels
pub const AUX_INPUT_CHANNELS: std::ops::Range<u8> = 32..35;
pub const SUPPLY_SENSOR_CHANNEL: u8 = 48;
pub const TEMP_SENSOR_CHANNEL: u8 = 49;

/// RAM registers whose contents are owned by other command slots.
pub fn is_foreign_register(reg: u8) -> bool {
    reg == SENSOR_REG || reg == ZCHECK_DAC_REG
}

/// ADC buffer bias and mux bias for a sampling rate.
pub fn sampling_rate_biases(sampling_rate: u32) -> (u8, u8) {
    // (rate below, mux bias, adc buffer bias)
    const TABLE: [(u32, u8, u8); 8] = [
        (3334, 40, 32),
        (4001, 40, 16),
        (5001, 40, 8),
        (6251, 32, 8),
        (8001, 26, 8),
        (10001, 18, 4),
        (12501, 16, 3),
        (15001, 7, 3),
    ];
    TABLE
        .iter()
        .find(|(below, _, _)| sampling_rate < *below)
        .map(|&(_, mux, buffer)| (mux, buffer))
        .unwrap_or((4, 2))
}
