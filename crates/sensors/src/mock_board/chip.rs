//! Emulated RHD2000 answering MOSI commands.

use rhd_types::Stream;
use serde::{Deserialize, Serialize};

use crate::rhd2000::registers::{
    AMP_COUNT_REG, CHIP_ID_REG, CHIP_NAME_REGS, COMPANY_ID, COMPANY_ID_REGS, REGISTER_COUNT, REVISION_REG,
    SUPPLY_SENSOR_CHANNEL, TEMP_SENSOR_CHANNEL,
};
use crate::rhd2000::Command;

/// An amplifier plugged into one MISO position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockAmplifier {
    pub stream: Stream,
    /// MISO delays at which the chip's replies are sampled cleanly
    pub working_delays: Vec<u32>,
}

pub(crate) struct MockChip {
    registers: [u8; REGISTER_COUNT],
    working_delays: Option<Vec<u32>>,
    /// Result of the previous command in each aux slot.
    last: [u16; 3],
}

impl MockChip {
    pub fn absent() -> Self {
        Self {
            registers: [0; REGISTER_COUNT],
            working_delays: None,
            last: [0; 3],
        }
    }

    pub fn rhd2132(working_delays: Vec<u32>) -> Self {
        let mut registers = [0u8; REGISTER_COUNT];
        let id = usize::from(COMPANY_ID_REGS.start);
        registers[id..id + COMPANY_ID.len()].copy_from_slice(COMPANY_ID);
        let name = usize::from(CHIP_NAME_REGS.start);
        registers[name..name + 7].copy_from_slice(b"RHD2132");
        registers[usize::from(REVISION_REG)] = 1;
        registers[usize::from(AMP_COUNT_REG)] = 32;
        registers[usize::from(CHIP_ID_REG)] = 1;
        Self {
            registers,
            working_delays: Some(working_delays),
            last: [0; 3],
        }
    }

    pub fn present(&self) -> bool {
        self.working_delays.is_some()
    }

    pub fn register(&self, reg: u8) -> u8 {
        self.registers[usize::from(reg)]
    }

    pub fn power_mask(&self) -> u32 {
        u32::from_le_bytes([self.registers[14], self.registers[15], self.registers[16], self.registers[17]])
    }

    /// Word the FPGA samples for aux `slot` at MISO `delay`.
    pub fn aux_word(&self, slot: usize, delay: u32) -> u16 {
        match &self.working_delays {
            Some(delays) if delays.contains(&delay) => self.last[slot],
            // sampled a bit early: everything shifts by one
            Some(_) => (self.last[slot] << 1) | 1,
            None => 0xffff,
        }
    }

    pub fn execute(&mut self, slot: usize, word: u16) {
        let result = match Command::decode(word) {
            Command::Read(reg) => u16::from(self.registers[usize::from(reg)]),
            Command::Write(reg, value) => {
                self.registers[usize::from(reg)] = value;
                0xff00 | u16::from(value)
            }
            Command::Convert(ch) if ch == TEMP_SENSOR_CHANNEL => 0x4100,
            Command::Convert(ch) if ch == SUPPLY_SENSOR_CHANNEL => 0xb000,
            Command::Convert(_) => 0x8000,
            Command::Calibrate | Command::Clear => 0,
            Command::Invalid(_) => 0xffff,
        };
        self.last[slot] = result;
    }

    pub fn restart(&mut self) {
        self.last = [0; 3];
    }
}
