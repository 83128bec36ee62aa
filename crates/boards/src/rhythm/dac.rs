//! Analog outputs. Each of the eight DACs can follow one amplifier channel.

use log::debug;

use rhd_sensor::endpoints::{
    DAC_GAIN_MASK, DAC_GAIN_SHIFT, DAC_NOISE_SLICE_MASK, DAC_NOISE_SLICE_SHIFT, DAC_SOURCE_CHANNEL_MASK,
    DAC_SOURCE_ENABLE, DAC_SOURCE_STREAM_SHIFT, WIRE_IN_DAC_SOURCE, WIRE_IN_RESET_RUN, ALL_BITS,
};
use rhd_sensor::Transport;
use rhd_types::{ChannelSource, ConfigError, DaqError};

use super::driver::BoardController;

pub const DAC_COUNT: usize = 8;
const MAX_DAC_GAIN: u32 = 7;
const MAX_DAC_CLIP: u32 = 127;

/// Source word routing amplifier `channel` of physical stream `stream`.
pub fn dac_source_word(stream: usize, channel: usize) -> u32 {
    DAC_SOURCE_ENABLE | ((stream as u32) << DAC_SOURCE_STREAM_SHIFT) | (channel as u32 & DAC_SOURCE_CHANNEL_MASK)
}

impl<T: Transport> BoardController<T> {
    /// Routes channel table entry `table_index` to analog output `dac`.
    pub fn dac_monitor(&mut self, dac: usize, table_index: usize) -> Result<(), DaqError> {
        let table = self.channel_table();
        let entry = table
            .get(table_index)
            .ok_or_else(|| ConfigError::InvalidDac(format!("no channel at table index {}", table_index)))?;
        let ChannelSource::Amplifier(stream) = entry.source else {
            return Err(ConfigError::InvalidDac(format!("{} is not an amplifier channel", entry.name)).into());
        };
        self.set_dac_source(dac, dac_source_word(stream.index(), entry.channel))
    }

    pub fn dac_disable(&mut self, dac: usize) -> Result<(), DaqError> {
        self.set_dac_source(dac, 0)
    }

    /// Current source word of `dac`, 0 when disabled.
    pub fn dac_source(&self, dac: usize) -> Option<u32> {
        self.dac_sources.get(dac).copied()
    }

    fn set_dac_source(&mut self, dac: usize, word: u32) -> Result<(), DaqError> {
        if dac >= DAC_COUNT {
            return Err(ConfigError::InvalidDac(format!("DAC {} does not exist", dac)).into());
        }
        if self.dac_sources[dac] == word {
            return Ok(());
        }
        self.transport.set_wire_in(WIRE_IN_DAC_SOURCE[dac], word, ALL_BITS);
        self.transport.update_wire_ins()?;
        self.dac_sources[dac] = word;
        if word & DAC_SOURCE_ENABLE != 0 {
            debug!(
                "Stream {} channel {} -> DAC {}",
                (word >> DAC_SOURCE_STREAM_SHIFT) & 0xf,
                word & DAC_SOURCE_CHANNEL_MASK,
                dac
            );
        } else {
            debug!("DAC {} disabled", dac);
        }
        Ok(())
    }

    /// Sets the DAC output gain (`2^gain`) and the noise slicer clip level.
    pub fn dac_configure(&mut self, gain: u32, clip: u32) -> Result<(), DaqError> {
        if gain > MAX_DAC_GAIN {
            return Err(ConfigError::InvalidDac(format!("gain {} exceeds {}", gain, MAX_DAC_GAIN)).into());
        }
        if clip > MAX_DAC_CLIP {
            return Err(ConfigError::InvalidDac(format!("clip {} exceeds {}", clip, MAX_DAC_CLIP)).into());
        }
        self.transport
            .set_wire_in(WIRE_IN_RESET_RUN, gain << DAC_GAIN_SHIFT, DAC_GAIN_MASK);
        self.transport
            .set_wire_in(WIRE_IN_RESET_RUN, clip << DAC_NOISE_SLICE_SHIFT, DAC_NOISE_SLICE_MASK);
        self.transport.update_wire_ins()?;
        Ok(())
    }
}
