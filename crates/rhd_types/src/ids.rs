//! Ports, streams and auxiliary command slots
//!
//! Each port is one SPI cable carrying two daisy-chained amplifier chips. The
//! FPGA samples each chip on its own MISO line, so a port owns two streams.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::layout::{AUX_SLOTS, MAX_PORTS, MAX_STREAMS, STREAMS_PER_PORT};

const PORT_NAMES: [&str; MAX_PORTS] = ["A", "B", "C", "D"];
const STREAM_NAMES: [&str; MAX_STREAMS] = ["A1", "A2", "B1", "B2", "C1", "C2", "D1", "D2"];
const AUX_SLOT_NAMES: [&str; AUX_SLOTS] = ["AuxCmd1", "AuxCmd2", "AuxCmd3"];

/// Prefix used for the board's own ADC inputs in channel names.
pub const EVAL_ADC_NAME: &str = "EV";

/// One of the four SPI ports of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Port {
    A,
    B,
    C,
    D,
}

impl Port {
    pub const ALL: [Port; MAX_PORTS] = [Port::A, Port::B, Port::C, Port::D];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Result<Self, ConfigError> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or(ConfigError::InvalidPort(index))
    }

    /// The two MISO streams carried by this port's cable.
    pub fn streams(self) -> [Stream; STREAMS_PER_PORT] {
        let first = self.index() * STREAMS_PER_PORT;
        [Stream::ALL[first], Stream::ALL[first + 1]]
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(PORT_NAMES[self.index()])
    }
}

impl FromStr for Port {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PORT_NAMES
            .iter()
            .position(|name| name.eq_ignore_ascii_case(s.trim()))
            .map(|i| Self::ALL[i])
            .ok_or_else(|| ConfigError::UnknownName(s.to_string()))
    }
}

/// One MISO data stream, i.e. one amplifier chip position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stream {
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
    D1,
    D2,
}

impl Stream {
    pub const ALL: [Stream; MAX_STREAMS] = [
        Stream::A1,
        Stream::A2,
        Stream::B1,
        Stream::B2,
        Stream::C1,
        Stream::C2,
        Stream::D1,
        Stream::D2,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Result<Self, ConfigError> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or(ConfigError::InvalidStream(index))
    }

    pub fn port(self) -> Port {
        Port::ALL[self.index() / STREAMS_PER_PORT]
    }

    /// Bit of this stream in an enable mask.
    pub fn mask(self) -> u8 {
        1 << self.index()
    }

    /// Streams whose bit is set in `mask`, in ascending order.
    pub fn in_mask(mask: u8) -> impl Iterator<Item = Stream> {
        Self::ALL.into_iter().filter(move |s| mask & s.mask() != 0)
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(STREAM_NAMES[self.index()])
    }
}

impl FromStr for Stream {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        STREAM_NAMES
            .iter()
            .position(|name| name.eq_ignore_ascii_case(s.trim()))
            .map(|i| Self::ALL[i])
            .ok_or_else(|| ConfigError::UnknownName(s.to_string()))
    }
}

/// Auxiliary command slots. Each port runs one command list per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuxSlot {
    /// Drives the impedance-test DAC.
    Aux1,
    /// Samples the auxiliary inputs, temperature and supply.
    Aux2,
    /// Programs and reads back the register file.
    Aux3,
}

impl AuxSlot {
    pub const ALL: [AuxSlot; AUX_SLOTS] = [AuxSlot::Aux1, AuxSlot::Aux2, AuxSlot::Aux3];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for AuxSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(AUX_SLOT_NAMES[self.index()])
    }
}

/// Where a channel-table entry's samples come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelSource {
    Amplifier(Stream),
    EvalAdc,
}

impl fmt::Display for ChannelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelSource::Amplifier(stream) => stream.fmt(f),
            ChannelSource::EvalAdc => f.write_str(EVAL_ADC_NAME),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_owns_two_streams() {
        assert_eq!(Port::A.streams(), [Stream::A1, Stream::A2]);
        assert_eq!(Port::D.streams(), [Stream::D1, Stream::D2]);
        for stream in Stream::ALL {
            assert!(stream.port().streams().contains(&stream));
        }
    }

    #[test]
    fn names_round_trip() {
        assert_eq!("b2".parse::<Stream>().unwrap(), Stream::B2);
        assert_eq!("C".parse::<Port>().unwrap(), Port::C);
        assert_eq!(Stream::C1.to_string(), "C1");
        assert_eq!(ChannelSource::EvalAdc.to_string(), "EV");
        assert!("E".parse::<Port>().is_err());
    }

    #[test]
    fn streams_in_mask_are_ascending() {
        let streams: Vec<_> = Stream::in_mask(0b1000_0101).collect();
        assert_eq!(streams, vec![Stream::A1, Stream::B1, Stream::D2]);
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        assert_eq!(Port::from_index(4), Err(ConfigError::InvalidPort(4)));
        assert_eq!(Stream::from_index(8), Err(ConfigError::InvalidStream(8)));
    }
}
