//! Common types and traits for acquisition devices

use std::sync::Arc;

use rhd_types::{ChannelTable, DaqError};

/// What the run-cycle needs from an acquisition board.
pub trait AcquisitionDevice: Send {
    /// Starts acquiring. `max_frames == 0` runs until [`stop`](Self::stop).
    fn start(&mut self, max_frames: usize) -> Result<(), DaqError>;

    fn stop(&mut self) -> Result<(), DaqError>;

    fn running(&mut self) -> Result<bool, DaqError>;

    /// Complete frames waiting in the board FIFO.
    fn frames_ready(&mut self) -> Result<usize, DaqError>;

    /// Reads `frames` frames into `buffer`, blocking until they arrive.
    /// Returns the number of frames read.
    fn read(&mut self, buffer: &mut [u8], frames: usize) -> Result<usize, DaqError>;

    /// Bytes per frame in the current stream configuration.
    fn frame_size(&self) -> usize;

    fn sampling_rate(&self) -> u32;

    /// Number of recorded channels.
    fn channel_count(&self) -> usize {
        self.channel_table().len()
    }

    fn channel_table(&self) -> Arc<ChannelTable>;
}
