//! SPI command words understood by the RHD2000.

use std::fmt;

/// One 16-bit command sent to the chip on MOSI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Sample converter channel n.
    Convert(u8),
    /// Start ADC self-calibration.
    Calibrate,
    /// Clear ADC calibration.
    Clear,
    /// Read register n.
    Read(u8),
    /// Write a value to register n.
    Write(u8, u8),
    /// A word that decodes to no command.
    Invalid(u16),
}

const CALIBRATE_WORD: u16 = 0x5500;
const CLEAR_WORD: u16 = 0x6a00;
const KIND_MASK: u16 = 0xc000;
const ADDR_MASK: u16 = 0x3f00;

impl Command {
    pub fn encode(self) -> u16 {
        match self {
            Command::Convert(ch) => (u16::from(ch) << 8) & ADDR_MASK,
            Command::Calibrate => CALIBRATE_WORD,
            Command::Clear => CLEAR_WORD,
            Command::Read(reg) => 0xc000 | ((u16::from(reg) << 8) & ADDR_MASK),
            Command::Write(reg, value) => 0x8000 | ((u16::from(reg) << 8) & ADDR_MASK) | u16::from(value),
            Command::Invalid(word) => word,
        }
    }

    pub fn decode(word: u16) -> Self {
        let addr = ((word & ADDR_MASK) >> 8) as u8;
        match word & KIND_MASK {
            0x0000 => Command::Convert(addr),
            0xc000 => Command::Read(addr),
            0x8000 => Command::Write(addr, (word & 0x00ff) as u8),
            _ if word == CALIBRATE_WORD => Command::Calibrate,
            _ if word == CLEAR_WORD => Command::Clear,
            _ => Command::Invalid(word),
        }
    }
}

impl From<Command> for u16 {
    fn from(command: Command) -> u16 {
        command.encode()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Convert(ch) => write!(f, "CONVERT({})", ch),
            Command::Calibrate => f.write_str("CALIBRATE"),
            Command::Clear => f.write_str("CLEAR"),
            Command::Read(reg) => write!(f, "READ({})", reg),
            Command::Write(reg, value) => write!(f, "WRITE({},0x{:02x})", reg, value),
            Command::Invalid(word) => write!(f, "INVALID COMMAND: 0x{:04x}", word),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodings() {
        assert_eq!(Command::Convert(5).encode(), 0x0500);
        assert_eq!(Command::Read(63).encode(), 0xff00);
        assert_eq!(Command::Write(8, 0x2a).encode(), 0x882a);
        assert_eq!(Command::Calibrate.encode(), 0x5500);
        assert_eq!(Command::Clear.encode(), 0x6a00);
    }

    #[test]
    fn decodes_what_it_encodes() {
        for command in [
            Command::Convert(49),
            Command::Read(40),
            Command::Write(3, 0x1e),
            Command::Calibrate,
            Command::Clear,
        ] {
            assert_eq!(Command::decode(command.encode()), command);
        }
        assert_eq!(Command::decode(0x4000), Command::Invalid(0x4000));
    }

    #[test]
    fn prints_like_the_datasheet() {
        assert_eq!(Command::Convert(32).to_string(), "CONVERT(32)");
        assert_eq!(Command::Write(14, 0xff).to_string(), "WRITE(14,0xff)");
        assert_eq!(Command::Write(6, 0x05).to_string(), "WRITE(6,0x05)");
        assert_eq!(Command::Read(63).to_string(), "READ(63)");
        assert_eq!(Command::Invalid(0x4001).to_string(), "INVALID COMMAND: 0x4001");
    }
}
