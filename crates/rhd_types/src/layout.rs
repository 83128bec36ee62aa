//! Geometry of the Rhythm USB frame and of the FPGA command RAM.
//!
//! A frame is a sequence of little-endian 16-bit words:
//!
//! ```text
//! [magic: 4][timestamp: 2]
//! [aux slot k, stream s: 3 * n]
//! [amplifier c, stream s: 32 * n]
//! [filler: n]
//! [board ADC: 8][TTL in][TTL out]
//! ```
//!
//! where `n` is the number of enabled streams. Every offset helper below
//! returns a word index; multiply by two for bytes.

/// Sync word at the start of every frame.
pub const FRAME_MAGIC: u64 = 0xC691_1999_2702_1942;

pub const MAGIC_WORDS: usize = 4;
pub const TIMESTAMP_WORDS: usize = 2;
pub const HEADER_WORDS: usize = MAGIC_WORDS + TIMESTAMP_WORDS;
/// Byte offset of the frame timestamp.
pub const TIMESTAMP_OFFSET: usize = MAGIC_WORDS * 2;

pub const AUX_SLOTS: usize = 3;
pub const AMPLIFIER_CHANNELS: usize = 32;
pub const FILLER_WORDS: usize = 1;
/// Words each enabled stream contributes to a frame.
pub const WORDS_PER_STREAM: usize = AUX_SLOTS + AMPLIFIER_CHANNELS + FILLER_WORDS;
pub const EVAL_ADC_CHANNELS: usize = 8;
pub const TTL_WORDS: usize = 2;

pub const MAX_PORTS: usize = 4;
pub const STREAMS_PER_PORT: usize = 2;
pub const MAX_STREAMS: usize = MAX_PORTS * STREAMS_PER_PORT;

/// Commands in a register-program or aux-sample sequence.
pub const REGISTER_SEQUENCE_LENGTH: usize = 60;
/// Capacity of one command RAM bank.
pub const MAX_COMMAND_LENGTH: usize = 1024;
pub const COMMAND_BANKS: usize = 16;

/// Depth of the board FIFO in 16-bit words.
pub const FIFO_CAPACITY_WORDS: usize = 67_108_864;
/// MISO sampling delays are in 0..MAX_MISO_DELAY.
pub const MAX_MISO_DELAY: u32 = 16;
pub const MAX_SAMPLING_RATE: u32 = 30_000;

/// Words in one frame with `active_streams` enabled.
pub const fn frame_words(active_streams: usize) -> usize {
    HEADER_WORDS + WORDS_PER_STREAM * active_streams + EVAL_ADC_CHANNELS + TTL_WORDS
}

/// Bytes in one frame with `active_streams` enabled.
pub const fn frame_size(active_streams: usize) -> usize {
    2 * frame_words(active_streams)
}

/// Word index of aux slot `slot` for the stream at `ordinal`.
pub const fn aux_word(slot: usize, ordinal: usize, active_streams: usize) -> usize {
    HEADER_WORDS + slot * active_streams + ordinal
}

/// Word index of amplifier `channel` for the stream at `ordinal`.
pub const fn amplifier_word(channel: usize, ordinal: usize, active_streams: usize) -> usize {
    HEADER_WORDS + (channel + AUX_SLOTS) * active_streams + ordinal
}

/// Word index of board ADC input `adc`.
pub const fn eval_adc_word(adc: usize, active_streams: usize) -> usize {
    HEADER_WORDS + WORDS_PER_STREAM * active_streams + adc
}

/// Magic header of a frame, if the slice is long enough to hold one.
pub fn frame_magic(frame: &[u8]) -> Option<u64> {
    let bytes = frame.get(..MAGIC_WORDS * 2)?;
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}

/// Timestamp of a frame, if the slice is long enough to hold one.
pub fn frame_timestamp(frame: &[u8]) -> Option<u32> {
    let bytes = frame.get(TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + TIMESTAMP_WORDS * 2)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

/// Little-endian word at `word` of a frame.
pub fn frame_word(frame: &[u8], word: usize) -> Option<u16> {
    let bytes = frame.get(word * 2..word * 2 + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}
