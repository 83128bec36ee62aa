//! Intan RHD2000 amplifier chip model.

pub mod bandwidth;
pub mod chip;
pub mod command;
pub mod registers;

#[cfg(test)]
mod tests;

pub use chip::{ChipIdentity, ChipModel, RegisterImage};
pub use command::Command;

/// Encodes a command list into the words uploaded to FPGA command RAM.
pub fn encode_sequence(commands: &[Command]) -> Vec<u16> {
    commands.iter().map(|c| c.encode()).collect()
}
