//! Channel table: where each recorded channel lives inside a frame.

use std::fmt;

use serde::Serialize;

use crate::ids::{ChannelSource, Stream};
use crate::layout::{amplifier_word, eval_adc_word, frame_word, AMPLIFIER_CHANNELS, EVAL_ADC_CHANNELS, MAX_STREAMS};

/// One recorded channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelEntry {
    pub source: ChannelSource,
    /// Amplifier or ADC input number on the source
    pub channel: usize,
    /// Byte offset of the sample within a frame
    pub byte_offset: usize,
    pub name: String,
}

/// Snapshot of the recorded channels for one stream configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ChannelTable {
    entries: Vec<ChannelEntry>,
    active_streams: usize,
}

impl ChannelTable {
    /// Builds the table for the streams set in `enabled` and each stream's
    /// amplifier power mask. Powered amplifiers come first in ascending
    /// stream and channel order, followed by the board ADC inputs.
    pub fn build(enabled: u8, power_masks: &[u32; MAX_STREAMS]) -> Self {
        let active_streams = enabled.count_ones() as usize;
        let mut entries = Vec::new();

        for (ordinal, stream) in Stream::in_mask(enabled).enumerate() {
            let mask = power_masks[stream.index()];
            for channel in (0..AMPLIFIER_CHANNELS).filter(|c| mask & (1 << c) != 0) {
                entries.push(ChannelEntry {
                    source: ChannelSource::Amplifier(stream),
                    channel,
                    byte_offset: 2 * amplifier_word(channel, ordinal, active_streams),
                    name: format!("{}_{}", stream, channel),
                });
            }
        }
        for channel in 0..EVAL_ADC_CHANNELS {
            entries.push(ChannelEntry {
                source: ChannelSource::EvalAdc,
                channel,
                byte_offset: 2 * eval_adc_word(channel, active_streams),
                name: format!("{}_{}", ChannelSource::EvalAdc, channel),
            });
        }
        Self {
            entries,
            active_streams,
        }
    }

    pub fn entries(&self) -> &[ChannelEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ChannelEntry> {
        self.entries.get(index)
    }

    /// Number of streams the offsets were computed for.
    pub fn active_streams(&self) -> usize {
        self.active_streams
    }

    pub fn find(&self, name: &str) -> Option<(usize, &ChannelEntry)> {
        self.entries.iter().enumerate().find(|(_, e)| e.name == name)
    }

    /// Raw sample of entry `index` in a single frame.
    pub fn sample(&self, frame: &[u8], index: usize) -> Option<u16> {
        let entry = self.entries.get(index)?;
        frame_word(frame, entry.byte_offset / 2)
    }
}

impl fmt::Display for ChannelTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.entries.iter().map(|e| e.name.as_str()).collect();
        write!(f, "{} channels: {}", self.entries.len(), names.join(" "))
    }
}
