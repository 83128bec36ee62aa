//! Opal Kelly endpoint map of the Rhythm FPGA interface.

pub const RHYTHM_BOARD_ID: u32 = 500;

// Wire-ins
pub const WIRE_IN_RESET_RUN: u8 = 0x00;
pub const WIRE_IN_MAX_TIME_STEP_LSB: u8 = 0x01;
pub const WIRE_IN_MAX_TIME_STEP_MSB: u8 = 0x02;
pub const WIRE_IN_DATA_FREQ_PLL: u8 = 0x03;
pub const WIRE_IN_MISO_DELAY: u8 = 0x04;
pub const WIRE_IN_CMD_RAM_ADDR: u8 = 0x05;
pub const WIRE_IN_CMD_RAM_BANK: u8 = 0x06;
pub const WIRE_IN_CMD_RAM_DATA: u8 = 0x07;
pub const WIRE_IN_AUX_CMD_BANK: [u8; 3] = [0x08, 0x09, 0x0a];
pub const WIRE_IN_AUX_CMD_LENGTH: [u8; 3] = [0x0b, 0x0c, 0x0d];
pub const WIRE_IN_AUX_CMD_LOOP: [u8; 3] = [0x0e, 0x0f, 0x10];
pub const WIRE_IN_LED_DISPLAY: u8 = 0x11;
pub const WIRE_IN_DATA_STREAM_SEL_1234: u8 = 0x12;
pub const WIRE_IN_DATA_STREAM_SEL_5678: u8 = 0x13;
pub const WIRE_IN_DATA_STREAM_EN: u8 = 0x14;
pub const WIRE_IN_TTL_OUT: u8 = 0x15;
pub const WIRE_IN_DAC_SOURCE: [u8; 8] = [0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d];
pub const WIRE_IN_DAC_MANUAL_1: u8 = 0x1e;
pub const WIRE_IN_DAC_MANUAL_2: u8 = 0x1f;

// Trigger-ins
pub const TRIG_IN_DCM_PROG: u8 = 0x40;
pub const TRIG_IN_SPI_START: u8 = 0x41;
pub const TRIG_IN_RAM_WRITE: u8 = 0x42;

// Wire-outs
pub const WIRE_OUT_NUM_WORDS_LSB: u8 = 0x20;
pub const WIRE_OUT_NUM_WORDS_MSB: u8 = 0x21;
pub const WIRE_OUT_SPI_RUNNING: u8 = 0x22;
pub const WIRE_OUT_TTL_IN: u8 = 0x23;
pub const WIRE_OUT_DATA_CLK_LOCKED: u8 = 0x24;
pub const WIRE_OUT_BOARD_ID: u8 = 0x3e;
pub const WIRE_OUT_BOARD_VERSION: u8 = 0x3f;

// Pipe-outs
pub const PIPE_OUT_DATA: u8 = 0xa0;

// WIRE_IN_RESET_RUN fields
pub const RESET: u32 = 1 << 0;
pub const CONTINUOUS_RUN: u32 = 1 << 1;
pub const DSP_SETTLE: u32 = 1 << 2;
pub const DAC_NOISE_SLICE_SHIFT: u32 = 6;
pub const DAC_NOISE_SLICE_MASK: u32 = 0x1fc0;
pub const DAC_GAIN_SHIFT: u32 = 13;
pub const DAC_GAIN_MASK: u32 = 0xe000;

// WIRE_OUT_DATA_CLK_LOCKED fields
pub const DATA_CLK_LOCKED: u32 = 1 << 0;
pub const DCM_PROG_DONE: u32 = 1 << 1;

// DAC source word fields
pub const DAC_SOURCE_ENABLE: u32 = 0x0200;
pub const DAC_SOURCE_STREAM_SHIFT: u32 = 5;
pub const DAC_SOURCE_CHANNEL_MASK: u32 = 0x001f;
/// Manual DAC value written at reset.
pub const DAC_MANUAL_RESET: u32 = 0x00ef;

pub const ALL_BITS: u32 = 0xffff_ffff;
