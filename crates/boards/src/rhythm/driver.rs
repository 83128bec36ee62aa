use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use rhd_sensor::endpoints::*;
use rhd_sensor::rhd2000::{encode_sequence, Command, RegisterImage};
use rhd_sensor::{AcquisitionDevice, Transport};
use rhd_types::layout::{
    frame_size, COMMAND_BANKS, FIFO_CAPACITY_WORDS, MAX_COMMAND_LENGTH, MAX_PORTS, MAX_STREAMS,
    REGISTER_SEQUENCE_LENGTH,
};
use rhd_types::{
    AuxSlot, ChannelTable, ConfigError, DaqError, Port, ProtocolError, Stream, TransportError,
};

use super::cable::DEFAULT_CABLE_M;

/// Sleep between status polls during setup and calibration.
pub(super) const POLL_INTERVAL: Duration = Duration::from_micros(200);
/// Status polls before a wait is abandoned.
pub(super) const POLL_LIMIT: usize = 5_000;

/// Driver for the Rhythm FPGA interface and the amplifiers behind it.
pub struct BoardController<T: Transport> {
    pub(super) transport: T,
    pub(super) sampling_rate: u32,
    board_version: u32,
    pub(super) enabled_streams: u8,
    active_streams: usize,
    pub(super) images: [RegisterImage; MAX_STREAMS],
    pub(super) cable_m: [f64; MAX_PORTS],
    pub(super) miso_delays: [u32; MAX_PORTS],
    pub(super) dac_sources: [u32; 8],
    table: Arc<ChannelTable>,
}

impl<T: Transport> BoardController<T> {
    /// Takes over an open transport with the Rhythm bitstream loaded, stops
    /// and resets the board, programs `sampling_rate` and uploads the
    /// register program of every port.
    pub fn open(mut transport: T, sampling_rate: u32) -> Result<Self, DaqError> {
        if !transport.is_open() {
            return Err(TransportError::NotOpen.into());
        }
        transport.update_wire_outs()?;
        let board_id = transport.wire_out(WIRE_OUT_BOARD_ID);
        if board_id != RHYTHM_BOARD_ID {
            return Err(ProtocolError::WrongFirmware { board_id }.into());
        }
        let board_version = transport.wire_out(WIRE_OUT_BOARD_VERSION);
        info!("Rhythm board version {} found", board_version);

        let mut board = Self {
            transport,
            // forces the first set_sampling_rate to program the clock
            sampling_rate: 0,
            board_version,
            enabled_streams: 0,
            active_streams: 0,
            images: std::array::from_fn(|_| RegisterImage::new(sampling_rate)),
            cable_m: [DEFAULT_CABLE_M; MAX_PORTS],
            miso_delays: [0; MAX_PORTS],
            dac_sources: [0; 8],
            table: Arc::new(ChannelTable::default()),
        };
        board.stop()?;
        board.reset_board()?;
        board.set_sampling_rate(sampling_rate)?;
        for port in Port::ALL {
            board.upload_register_program(port, false)?;
        }
        board.rebuild_channel_table();
        info!("Rhythm board ready at {} Hz", board.sampling_rate);
        Ok(board)
    }

    /// Returns the board to its power-on state and loads the DAC and
    /// auxiliary-sampling command lists.
    pub fn reset_board(&mut self) -> Result<(), DaqError> {
        self.transport.set_wire_in(WIRE_IN_RESET_RUN, RESET, RESET);
        self.transport.update_wire_ins()?;
        self.transport.set_wire_in(WIRE_IN_RESET_RUN, 0, ALL_BITS);
        self.transport
            .set_wire_in(WIRE_IN_RESET_RUN, CONTINUOUS_RUN | DSP_SETTLE, CONTINUOUS_RUN | DSP_SETTLE);
        self.transport
            .set_wire_in(WIRE_IN_RESET_RUN, 0, DAC_NOISE_SLICE_MASK | DAC_GAIN_MASK);
        self.transport.update_wire_ins()?;

        // stream i reads MISO line i
        for (i, stream) in Stream::ALL.iter().enumerate() {
            let (wire, shift) = match i {
                0..=3 => (WIRE_IN_DATA_STREAM_SEL_1234, 4 * i),
                _ => (WIRE_IN_DATA_STREAM_SEL_5678, 4 * (i - 4)),
            };
            self.transport
                .set_wire_in(wire, (stream.index() as u32) << shift, 0xf << shift);
        }
        self.transport
            .set_wire_in(WIRE_IN_DATA_STREAM_EN, u32::from(self.enabled_streams), ALL_BITS);
        self.transport.set_wire_in(WIRE_IN_LED_DISPLAY, 0, ALL_BITS);
        for wire in WIRE_IN_DAC_SOURCE {
            self.transport.set_wire_in(wire, 0, ALL_BITS);
        }
        self.dac_sources = [0; 8];
        self.transport
            .set_wire_in(WIRE_IN_DAC_MANUAL_1, DAC_MANUAL_RESET, ALL_BITS);
        self.transport
            .set_wire_in(WIRE_IN_DAC_MANUAL_2, DAC_MANUAL_RESET, ALL_BITS);
        self.transport.set_wire_in(WIRE_IN_TTL_OUT, 0, ALL_BITS);
        self.transport.update_wire_ins()?;

        let image = &self.images[0];
        let dac_zero = image.build_dac_sequence(&[0.0; REGISTER_SEQUENCE_LENGTH])?;
        let aux_sample = image.build_aux_sample_sequence();
        self.upload_command_list(&dac_zero, AuxSlot::Aux1, 0)?;
        self.upload_command_list(&aux_sample, AuxSlot::Aux2, 0)?;
        for port in Port::ALL {
            self.select_aux_bank(port, AuxSlot::Aux1, 0)?;
            self.select_aux_bank(port, AuxSlot::Aux2, 0)?;
        }
        debug!("Board reset");
        Ok(())
    }

    // --- configuration ---

    pub(super) fn ensure_stopped(&mut self) -> Result<(), DaqError> {
        if self.running()? {
            return Err(ConfigError::Running.into());
        }
        Ok(())
    }

    /// Applies filter settings and an amplifier power mask to both chips on
    /// `port` and uploads the new register program. Nothing changes unless
    /// every setting is valid.
    pub fn configure_port(
        &mut self,
        port: Port,
        lower_hz: f64,
        upper_hz: f64,
        dsp_hz: f64,
        power_mask: u32,
    ) -> Result<(), DaqError> {
        self.ensure_stopped()?;

        let [first, second] = port.streams();
        let mut scratch = self.images[first.index()].clone();
        scratch.set_lower_cutoff(lower_hz)?;
        scratch.set_upper_cutoff(upper_hz)?;
        scratch.set_dsp_cutoff(dsp_hz)?;
        scratch.set_power_mask(power_mask);

        let mask_changed = port
            .streams()
            .iter()
            .any(|s| self.images[s.index()].power_mask() != power_mask);
        for stream in [first, second] {
            let image = &mut self.images[stream.index()];
            image.set_lower_cutoff(lower_hz)?;
            image.set_upper_cutoff(upper_hz)?;
            image.set_dsp_cutoff(dsp_hz)?;
            image.set_power_mask(power_mask);
        }
        if mask_changed {
            self.rebuild_channel_table();
        }
        self.upload_register_program(port, false)?;
        info!(
            "Port {}: {:.2} - {:.0} Hz, dsp {:.2} Hz, power {:#010x}",
            port,
            scratch.lower_cutoff(),
            scratch.upper_cutoff(),
            scratch.dsp_cutoff(),
            power_mask
        );
        Ok(())
    }

    /// Register image of the amplifier on `stream`.
    pub fn image(&self, stream: Stream) -> &RegisterImage {
        &self.images[stream.index()]
    }

    pub fn enable_stream(&mut self, stream: Stream, on: bool) -> Result<(), DaqError> {
        let mask = if on {
            self.enabled_streams | stream.mask()
        } else {
            self.enabled_streams & !stream.mask()
        };
        self.enable_streams(mask)
    }

    pub fn enable_streams(&mut self, mask: u8) -> Result<(), DaqError> {
        self.enabled_streams = mask;
        self.active_streams = mask.count_ones() as usize;
        self.transport
            .set_wire_in(WIRE_IN_DATA_STREAM_EN, u32::from(mask), ALL_BITS);
        self.transport.update_wire_ins()?;
        self.rebuild_channel_table();
        debug!("Streams enabled: {:#04x}", mask);
        Ok(())
    }

    pub fn enabled_streams(&self) -> u8 {
        self.enabled_streams
    }

    pub fn stream_enabled(&self, stream: Stream) -> bool {
        self.enabled_streams & stream.mask() != 0
    }

    pub fn active_streams(&self) -> usize {
        self.active_streams
    }

    pub fn rebuild_channel_table(&mut self) {
        let masks = std::array::from_fn(|i| self.images[i].power_mask());
        self.table = Arc::new(ChannelTable::build(self.enabled_streams, &masks));
    }

    pub fn channel_table(&self) -> Arc<ChannelTable> {
        Arc::clone(&self.table)
    }

    pub fn board_version(&self) -> u32 {
        self.board_version
    }

    pub fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    pub fn frame_size(&self) -> usize {
        frame_size(self.active_streams)
    }

    // --- command RAM ---

    pub(super) fn upload_register_program(&mut self, port: Port, calibrate: bool) -> Result<(), DaqError> {
        let commands = self.images[port.streams()[0].index()].build_register_program_sequence(calibrate);
        self.upload_command_list(&commands, AuxSlot::Aux3, port.index())?;
        self.select_aux_bank(port, AuxSlot::Aux3, port.index())
    }

    /// Writes `commands` into bank `bank` of `slot` and makes the slot cycle
    /// through all of them.
    pub fn upload_command_list(&mut self, commands: &[Command], slot: AuxSlot, bank: usize) -> Result<(), DaqError> {
        if commands.is_empty() || commands.len() > MAX_COMMAND_LENGTH {
            return Err(ConfigError::SequenceLength(commands.len()).into());
        }
        if bank >= COMMAND_BANKS {
            return Err(ConfigError::OutOfRange {
                what: "command bank",
                value: bank as f64,
                min: 0.0,
                max: (COMMAND_BANKS - 1) as f64,
            }
            .into());
        }
        for (index, word) in encode_sequence(commands).into_iter().enumerate() {
            self.transport
                .set_wire_in(WIRE_IN_CMD_RAM_DATA, u32::from(word), ALL_BITS);
            self.transport
                .set_wire_in(WIRE_IN_CMD_RAM_ADDR, index as u32, ALL_BITS);
            self.transport
                .set_wire_in(WIRE_IN_CMD_RAM_BANK, bank as u32, ALL_BITS);
            self.transport.update_wire_ins()?;
            self.transport
                .activate_trigger(TRIG_IN_RAM_WRITE, slot.index() as u32)?;
        }
        // the gateware takes the index of the last command
        let slot = slot.index();
        self.transport.set_wire_in(WIRE_IN_AUX_CMD_LOOP[slot], 0, ALL_BITS);
        self.transport
            .set_wire_in(WIRE_IN_AUX_CMD_LENGTH[slot], (commands.len() - 1) as u32, ALL_BITS);
        self.transport.update_wire_ins()?;
        debug!("Uploaded {} commands to AuxCmd{} bank {}", commands.len(), slot + 1, bank);
        Ok(())
    }

    /// Points `port` at `bank` of `slot`.
    pub fn select_aux_bank(&mut self, port: Port, slot: AuxSlot, bank: usize) -> Result<(), DaqError> {
        if bank >= COMMAND_BANKS {
            return Err(ConfigError::OutOfRange {
                what: "command bank",
                value: bank as f64,
                min: 0.0,
                max: (COMMAND_BANKS - 1) as f64,
            }
            .into());
        }
        let shift = 4 * port.index();
        self.transport
            .set_wire_in(WIRE_IN_AUX_CMD_BANK[slot.index()], (bank as u32) << shift, 0xf << shift);
        self.transport.update_wire_ins()?;
        Ok(())
    }

    // --- status ---

    /// Polls wire-out `addr` until all of `bits` are set.
    pub(super) fn wait_for_bits(&mut self, what: &'static str, addr: u8, bits: u32) -> Result<(), DaqError> {
        for _ in 0..POLL_LIMIT {
            self.transport.update_wire_outs()?;
            if self.transport.wire_out(addr) & bits == bits {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
        error!("Timed out waiting for {}", what);
        Err(TransportError::Timeout(what).into())
    }

    /// Waits for a bounded run to finish.
    pub(super) fn wait_while_running(&mut self) -> Result<(), DaqError> {
        for _ in 0..POLL_LIMIT {
            if !self.running()? {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
        Err(TransportError::Timeout("bounded acquisition").into())
    }

    pub fn words_in_fifo(&mut self) -> Result<usize, DaqError> {
        self.transport.update_wire_outs()?;
        let lsb = self.transport.wire_out(WIRE_OUT_NUM_WORDS_LSB);
        let msb = self.transport.wire_out(WIRE_OUT_NUM_WORDS_MSB);
        Ok(((msb << 16) | (lsb & 0xffff)) as usize)
    }

    // --- acquisition ---

    /// Starts the SPI engine. `max_frames == 0` runs until [`stop`](Self::stop).
    pub fn start(&mut self, max_frames: usize) -> Result<(), DaqError> {
        if max_frames == 0 {
            self.transport
                .set_wire_in(WIRE_IN_RESET_RUN, CONTINUOUS_RUN, CONTINUOUS_RUN);
        } else {
            let frames = u32::try_from(max_frames).map_err(|_| ConfigError::OutOfRange {
                what: "bounded run length",
                value: max_frames as f64,
                min: 1.0,
                max: f64::from(u32::MAX),
            })?;
            self.transport.set_wire_in(WIRE_IN_RESET_RUN, 0, CONTINUOUS_RUN);
            self.transport
                .set_wire_in(WIRE_IN_MAX_TIME_STEP_LSB, frames & 0xffff, ALL_BITS);
            self.transport
                .set_wire_in(WIRE_IN_MAX_TIME_STEP_MSB, frames >> 16, ALL_BITS);
        }
        self.transport.update_wire_ins()?;
        self.transport.activate_trigger(TRIG_IN_SPI_START, 0)?;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), DaqError> {
        self.transport.set_wire_in(WIRE_IN_MAX_TIME_STEP_LSB, 0, ALL_BITS);
        self.transport.set_wire_in(WIRE_IN_MAX_TIME_STEP_MSB, 0, ALL_BITS);
        self.transport.set_wire_in(WIRE_IN_RESET_RUN, 0, CONTINUOUS_RUN);
        self.transport.update_wire_ins()?;
        Ok(())
    }

    pub fn running(&mut self) -> Result<bool, DaqError> {
        self.transport.update_wire_outs()?;
        Ok(self.transport.wire_out(WIRE_OUT_SPI_RUNNING) & 0x1 != 0)
    }

    pub fn frames_ready(&mut self) -> Result<usize, DaqError> {
        let words = self.words_in_fifo()?;
        Ok(2 * words / self.frame_size())
    }

    /// Reads `frames` frames from the FIFO into `buffer`. A failed transfer
    /// reads nothing and returns 0.
    pub fn read(&mut self, buffer: &mut [u8], frames: usize) -> Result<usize, DaqError> {
        let frame_size = self.frame_size();
        let bytes = frames * frame_size;
        if buffer.len() < bytes {
            return Err(ProtocolError::ShortBuffer {
                needed: bytes,
                got: buffer.len(),
            }
            .into());
        }
        match self.transport.read_pipe(PIPE_OUT_DATA, &mut buffer[..bytes]) {
            Ok(n) => Ok(n / frame_size),
            Err(e) => {
                warn!("Pipe read of {} frames failed: {}", frames, e);
                Ok(0)
            }
        }
    }

    // --- front panel ---

    pub fn set_leds(&mut self, value: u8) -> Result<(), DaqError> {
        self.transport
            .set_wire_in(WIRE_IN_LED_DISPLAY, u32::from(value), 0xff);
        self.transport.update_wire_ins()?;
        Ok(())
    }

    pub fn ttl_out(&mut self, value: u16, mask: u16) -> Result<(), DaqError> {
        self.transport
            .set_wire_in(WIRE_IN_TTL_OUT, u32::from(value), u32::from(mask));
        self.transport.update_wire_ins()?;
        Ok(())
    }

    pub fn ttl_in(&mut self) -> Result<u16, DaqError> {
        self.transport.update_wire_outs()?;
        Ok((self.transport.wire_out(WIRE_OUT_TTL_IN) & 0xffff) as u16)
    }

    /// The transport, for callers that need to reach past the controller.
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport> fmt::Display for BoardController<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RHD2000 Rhythm controller:")?;
        writeln!(f, " Rhythm version: {}", self.board_version)?;
        writeln!(f, " Sampling rate: {} Hz", self.sampling_rate)?;
        writeln!(f, " FIFO capacity: {} words", FIFO_CAPACITY_WORDS)?;
        writeln!(f, " Channels: {}", self.table.len())?;
        write!(f, " MISO lines:")?;
        for stream in Stream::ALL {
            write!(f, "\n {}: {}", stream, self.images[stream.index()])?;
            if self.stream_enabled(stream) {
                write!(f, " (cable {:.2} m)", self.cable_m[stream.port().index()])?;
            } else {
                write!(f, " (off)")?;
            }
        }
        Ok(())
    }
}

impl<T: Transport> AcquisitionDevice for BoardController<T> {
    fn start(&mut self, max_frames: usize) -> Result<(), DaqError> {
        BoardController::start(self, max_frames)
    }

    fn stop(&mut self) -> Result<(), DaqError> {
        BoardController::stop(self)
    }

    fn running(&mut self) -> Result<bool, DaqError> {
        BoardController::running(self)
    }

    fn frames_ready(&mut self) -> Result<usize, DaqError> {
        BoardController::frames_ready(self)
    }

    fn read(&mut self, buffer: &mut [u8], frames: usize) -> Result<usize, DaqError> {
        BoardController::read(self, buffer, frames)
    }

    fn frame_size(&self) -> usize {
        BoardController::frame_size(self)
    }

    fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    fn channel_table(&self) -> Arc<ChannelTable> {
        BoardController::channel_table(self)
    }
}
