//! Emulated Rhythm eval board.
//!
//! `MockBoard` implements [`Transport`] against an in-memory model of the
//! Rhythm gateware: wire-ins and triggers, the three banks of auxiliary
//! command RAM, per-port MISO delays, the data stream enable mask and the
//! FIFO. Amplifiers answer their auxiliary command lists one frame late, as
//! real chips do, and only at the MISO delays listed in their
//! [`MockAmplifier`] entry.
//!
//! Continuous runs are paced by the wall clock at the programmed sampling
//! rate. Bounded runs complete the moment they are triggered. Faults can be
//! injected through the handle while a controller owns a clone of it.

mod chip;

use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use rhd_types::layout::{
    frame_size, AMPLIFIER_CHANNELS, AUX_SLOTS, COMMAND_BANKS, EVAL_ADC_CHANNELS, FIFO_CAPACITY_WORDS, FILLER_WORDS,
    FRAME_MAGIC, MAX_COMMAND_LENGTH, MAX_PORTS, MAX_STREAMS, STREAMS_PER_PORT,
};
use rhd_types::{Stream, TransportError};

use crate::endpoints::*;
use crate::transport::Transport;

pub use chip::MockAmplifier;
use chip::MockChip;

const WIRE_INS: usize = 0x20;
const RESET_SAMPLING_RATE: f64 = 30_000.0;
/// Amplifier noise, ADC counts rms
const NOISE_COUNTS: f64 = 8.0;

/// What is plugged into the emulated board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockConfig {
    #[serde(default = "default_amplifiers")]
    pub amplifiers: Vec<MockAmplifier>,
    #[serde(default = "default_board_version")]
    pub board_version: u32,
    /// Seed for the amplifier noise
    #[serde(default)]
    pub seed: u64,
}

fn default_amplifiers() -> Vec<MockAmplifier> {
    vec![
        MockAmplifier {
            stream: Stream::A1,
            working_delays: vec![2, 3, 4],
        },
        MockAmplifier {
            stream: Stream::A2,
            working_delays: vec![2, 3, 4],
        },
    ]
}

fn default_board_version() -> u32 { 1 }

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            amplifiers: default_amplifiers(),
            board_version: default_board_version(),
            seed: 0,
        }
    }
}

/// Counters for what the host asked of the board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    pub starts: usize,
    pub stops: usize,
    pub ram_writes: usize,
    pub frames_generated: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RunMode {
    Idle,
    Continuous { since: Instant, acquired: u64 },
}

struct MockInner {
    open: bool,
    disconnected: bool,
    clock_stuck: bool,
    board_version: u32,
    latched: [u32; WIRE_INS],
    wires: [u32; WIRE_INS],
    command_ram: Vec<u16>,
    command_index: [[usize; AUX_SLOTS]; MAX_PORTS],
    chips: Vec<MockChip>,
    mode: RunMode,
    fifo: VecDeque<u8>,
    last_frame: Vec<u8>,
    timestamp: u32,
    skip_timestamp: bool,
    stats: MockStats,
    rng: StdRng,
}

/// Cloneable handle to an emulated board.
#[derive(Clone)]
pub struct MockBoard {
    inner: Arc<Mutex<MockInner>>,
}

impl MockBoard {
    pub fn new(config: MockConfig) -> Self {
        let mut chips: Vec<MockChip> = (0..MAX_STREAMS).map(|_| MockChip::absent()).collect();
        for amp in &config.amplifiers {
            chips[amp.stream.index()] = MockChip::rhd2132(amp.working_delays.clone());
        }
        info!(
            "Mock Rhythm board with amplifiers on {:?}",
            config.amplifiers.iter().map(|a| a.stream).collect::<Vec<_>>()
        );
        let inner = MockInner {
            open: true,
            disconnected: false,
            clock_stuck: false,
            board_version: config.board_version,
            latched: [0; WIRE_INS],
            wires: [0; WIRE_INS],
            command_ram: vec![0; AUX_SLOTS * COMMAND_BANKS * MAX_COMMAND_LENGTH],
            command_index: [[0; AUX_SLOTS]; MAX_PORTS],
            chips,
            mode: RunMode::Idle,
            fifo: VecDeque::new(),
            last_frame: Vec::new(),
            timestamp: 0,
            skip_timestamp: false,
            stats: MockStats::default(),
            rng: StdRng::seed_from_u64(config.seed),
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockInner> {
        // a panicking test thread must not wedge the others
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stats(&self) -> MockStats {
        self.lock().stats
    }

    /// Current value of a wire-in as seen by the gateware.
    pub fn wire_in(&self, addr: u8) -> u32 {
        self.lock().wires[usize::from(addr)]
    }

    /// Register `reg` of the emulated amplifier on `stream`.
    pub fn chip_register(&self, stream: Stream, reg: u8) -> u8 {
        self.lock().chips[stream.index()].register(reg)
    }

    /// Command word at `index` of `slot`/`bank` command RAM.
    pub fn command_ram(&self, slot: usize, bank: usize, index: usize) -> u16 {
        self.lock().command_ram[ram_index(slot, bank, index)]
    }

    /// The next acquired frame carries a timestamp one higher than it should.
    pub fn glitch_timestamp(&self) {
        self.lock().skip_timestamp = true;
    }

    /// Acquisition stops on its own, as if the board lost power to the SPI
    /// engine. Reads keep returning the last frame.
    pub fn halt(&self) {
        let mut inner = self.lock();
        inner.catch_up(Instant::now());
        inner.mode = RunMode::Idle;
        warn!("Mock board halted");
    }

    /// Every later transfer fails.
    pub fn disconnect(&self) {
        let mut inner = self.lock();
        inner.disconnected = true;
        inner.open = false;
        warn!("Mock board disconnected");
    }

    /// The data clock never reports lock after reprogramming.
    pub fn stick_clock(&self, stuck: bool) {
        self.lock().clock_stuck = stuck;
    }
}

fn ram_index(slot: usize, bank: usize, index: usize) -> usize {
    (slot * COMMAND_BANKS + bank) * MAX_COMMAND_LENGTH + index
}

impl MockInner {
    fn sampling_rate(&self) -> f64 {
        let pll = self.wires[usize::from(WIRE_IN_DATA_FREQ_PLL)];
        let (m, d) = (f64::from(pll >> 8), f64::from(pll & 0xff));
        if m == 0.0 || d == 0.0 {
            RESET_SAMPLING_RATE
        } else {
            1e5 * m / d / 2.0 / 2.8
        }
    }

    fn enabled_streams(&self) -> u8 {
        (self.wires[usize::from(WIRE_IN_DATA_STREAM_EN)] & 0xff) as u8
    }

    fn miso_delay(&self, port: usize) -> u32 {
        (self.wires[usize::from(WIRE_IN_MISO_DELAY)] >> (4 * port)) & 0xf
    }

    fn frame_size(&self) -> usize {
        frame_size(self.enabled_streams().count_ones() as usize)
    }

    fn apply_wire_ins(&mut self) {
        let was_continuous = self.wires[usize::from(WIRE_IN_RESET_RUN)] & CONTINUOUS_RUN != 0;
        self.wires = self.latched;
        let reset_run = self.wires[usize::from(WIRE_IN_RESET_RUN)];

        if reset_run & RESET != 0 {
            self.fifo.clear();
            self.timestamp = 0;
            self.mode = RunMode::Idle;
            debug!("Mock board reset");
        }
        if was_continuous && reset_run & CONTINUOUS_RUN == 0 {
            if let RunMode::Continuous { .. } = self.mode {
                self.catch_up(Instant::now());
                self.mode = RunMode::Idle;
                self.stats.stops += 1;
            }
        }
    }

    fn trigger(&mut self, addr: u8, bit: u32) {
        match addr {
            TRIG_IN_SPI_START => self.spi_start(),
            TRIG_IN_RAM_WRITE => {
                let slot = bit as usize;
                let bank = self.wires[usize::from(WIRE_IN_CMD_RAM_BANK)] as usize;
                let index = self.wires[usize::from(WIRE_IN_CMD_RAM_ADDR)] as usize;
                if slot < AUX_SLOTS && bank < COMMAND_BANKS && index < MAX_COMMAND_LENGTH {
                    self.command_ram[ram_index(slot, bank, index)] =
                        self.wires[usize::from(WIRE_IN_CMD_RAM_DATA)] as u16;
                    self.stats.ram_writes += 1;
                }
            }
            // the emulated clock locks immediately
            TRIG_IN_DCM_PROG => {}
            _ => {}
        }
    }

    fn spi_start(&mut self) {
        self.stats.starts += 1;
        self.timestamp = 0;
        self.command_index = [[0; AUX_SLOTS]; MAX_PORTS];
        for chip in &mut self.chips {
            chip.restart();
        }
        let reset_run = self.wires[usize::from(WIRE_IN_RESET_RUN)];
        if reset_run & CONTINUOUS_RUN != 0 {
            self.mode = RunMode::Continuous {
                since: Instant::now(),
                acquired: 0,
            };
        } else {
            let frames = (self.wires[usize::from(WIRE_IN_MAX_TIME_STEP_LSB)] & 0xffff)
                | (self.wires[usize::from(WIRE_IN_MAX_TIME_STEP_MSB)] << 16);
            for _ in 0..frames {
                self.acquire_frame();
            }
            self.mode = RunMode::Idle;
        }
    }

    /// Acquires every frame a continuous run should have produced by `now`.
    fn catch_up(&mut self, now: Instant) {
        let RunMode::Continuous { since, acquired } = self.mode else {
            return;
        };
        let due = (now.duration_since(since).as_secs_f64() * self.sampling_rate()) as u64;
        for _ in acquired..due {
            self.acquire_frame();
        }
        self.mode = RunMode::Continuous {
            since,
            acquired: due.max(acquired),
        };
    }

    fn words_in_fifo(&self) -> usize {
        self.fifo.len() / 2
    }

    fn acquire_frame(&mut self) {
        let enabled = self.enabled_streams();
        let active = enabled.count_ones() as usize;
        let mut frame = Vec::with_capacity(self.frame_size());

        if self.skip_timestamp {
            self.skip_timestamp = false;
            self.timestamp = self.timestamp.wrapping_add(1);
        }
        frame.extend_from_slice(&FRAME_MAGIC.to_le_bytes());
        frame.extend_from_slice(&self.timestamp.to_le_bytes());

        // Aux results from the previous frame go out first, then every chip
        // runs its port's next command in each slot.
        for slot in 0..AUX_SLOTS {
            for stream in Stream::in_mask(enabled) {
                let delay = self.miso_delay(stream.port().index());
                frame.extend_from_slice(&self.chips[stream.index()].aux_word(slot, delay).to_le_bytes());
            }
        }
        for port in 0..MAX_PORTS {
            for slot in 0..AUX_SLOTS {
                let word = self.next_command(port, slot);
                for chip in &mut self.chips[port * STREAMS_PER_PORT..(port + 1) * STREAMS_PER_PORT] {
                    chip.execute(slot, word);
                }
            }
        }

        let t = self.stats.frames_generated as f64 / self.sampling_rate();
        for channel in 0..AMPLIFIER_CHANNELS {
            for stream in Stream::in_mask(enabled) {
                let sample = self.amplifier_sample(stream, channel, t);
                frame.extend_from_slice(&sample.to_le_bytes());
            }
        }
        for _ in 0..active * FILLER_WORDS {
            frame.extend_from_slice(&0u16.to_le_bytes());
        }
        for adc in 0..EVAL_ADC_CHANNELS {
            frame.extend_from_slice(&(0x8000 + (adc as u16) * 0x100).to_le_bytes());
        }
        frame.extend_from_slice(&0u16.to_le_bytes());
        let ttl_out = self.wires[usize::from(WIRE_IN_TTL_OUT)] as u16;
        frame.extend_from_slice(&ttl_out.to_le_bytes());

        if self.words_in_fifo() + frame.len() / 2 > FIFO_CAPACITY_WORDS {
            warn!("Mock FIFO overflow, dropping frame {}", self.timestamp);
        } else {
            self.fifo.extend(frame.iter().copied());
        }
        self.last_frame = frame;
        self.timestamp = self.timestamp.wrapping_add(1);
        self.stats.frames_generated += 1;
    }

    fn next_command(&mut self, port: usize, slot: usize) -> u16 {
        let bank = ((self.wires[usize::from(WIRE_IN_AUX_CMD_BANK[slot])] >> (4 * port)) & 0xf) as usize;
        let last = self.wires[usize::from(WIRE_IN_AUX_CMD_LENGTH[slot])] as usize;
        let loop_to = self.wires[usize::from(WIRE_IN_AUX_CMD_LOOP[slot])] as usize;
        let index = self.command_index[port][slot].min(MAX_COMMAND_LENGTH - 1);
        self.command_index[port][slot] = if index >= last { loop_to } else { index + 1 };
        self.command_ram[ram_index(slot, bank, index)]
    }

    fn amplifier_sample(&mut self, stream: Stream, channel: usize, t: f64) -> u16 {
        let chip = &self.chips[stream.index()];
        if !chip.present() {
            return 0xffff;
        }
        if chip.power_mask() & (1 << channel) == 0 {
            return 0x8000;
        }
        // 10 Hz tone with a per-channel phase, plus noise
        let phase = 2.0 * PI * channel as f64 / AMPLIFIER_CHANNELS as f64;
        let value = 32768.0 + 400.0 * (2.0 * PI * 10.0 * t + phase).sin() + NOISE_COUNTS * self.rng.sample::<f64, _>(StandardNormal);
        value.round().clamp(0.0, 65535.0) as u16
    }

    fn drain(&mut self, buf: &mut [u8]) {
        let n = buf.len().min(self.fifo.len());
        for (dst, src) in buf[..n].iter_mut().zip(self.fifo.drain(..n)) {
            *dst = src;
        }
        // An underrun repeats the last frame, like the gateware does.
        if n < buf.len() && !self.last_frame.is_empty() {
            for (dst, src) in buf[n..].iter_mut().zip(self.last_frame.iter().cycle()) {
                *dst = *src;
            }
        }
    }
}

impl Transport for MockBoard {
    fn is_open(&self) -> bool {
        self.lock().open
    }

    fn set_wire_in(&mut self, addr: u8, value: u32, mask: u32) {
        let mut inner = self.lock();
        if let Some(wire) = inner.latched.get_mut(usize::from(addr)) {
            *wire = (*wire & !mask) | (value & mask);
        }
    }

    fn update_wire_ins(&mut self) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.disconnected {
            return Err(TransportError::Transfer("device disconnected".into()));
        }
        inner.apply_wire_ins();
        Ok(())
    }

    fn update_wire_outs(&mut self) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.disconnected {
            return Err(TransportError::Transfer("device disconnected".into()));
        }
        inner.catch_up(Instant::now());
        Ok(())
    }

    fn wire_out(&self, addr: u8) -> u32 {
        let inner = self.lock();
        let words = inner.words_in_fifo() as u32;
        match addr {
            WIRE_OUT_NUM_WORDS_LSB => words & 0xffff,
            WIRE_OUT_NUM_WORDS_MSB => words >> 16,
            WIRE_OUT_SPI_RUNNING => u32::from(matches!(inner.mode, RunMode::Continuous { .. })),
            WIRE_OUT_TTL_IN => 0,
            WIRE_OUT_DATA_CLK_LOCKED if inner.clock_stuck => DCM_PROG_DONE,
            WIRE_OUT_DATA_CLK_LOCKED => DCM_PROG_DONE | DATA_CLK_LOCKED,
            WIRE_OUT_BOARD_ID => RHYTHM_BOARD_ID,
            WIRE_OUT_BOARD_VERSION => inner.board_version,
            _ => 0,
        }
    }

    fn activate_trigger(&mut self, addr: u8, bit: u32) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.disconnected {
            return Err(TransportError::Transfer("device disconnected".into()));
        }
        inner.trigger(addr, bit);
        Ok(())
    }

    fn read_pipe(&mut self, addr: u8, buf: &mut [u8]) -> Result<usize, TransportError> {
        if addr != PIPE_OUT_DATA {
            return Err(TransportError::Transfer(format!("no pipe at {:#04x}", addr)));
        }
        loop {
            let wait = {
                let mut inner = self.lock();
                if inner.disconnected {
                    return Err(TransportError::Transfer("device disconnected".into()));
                }
                inner.catch_up(Instant::now());
                let missing = buf.len().saturating_sub(inner.fifo.len());
                match inner.mode {
                    RunMode::Continuous { .. } if missing > 0 => {
                        let frames = missing.div_ceil(inner.frame_size()) as f64;
                        Duration::from_secs_f64(frames / inner.sampling_rate())
                    }
                    _ => {
                        inner.drain(buf);
                        return Ok(buf.len());
                    }
                }
            };
            thread::sleep(wait);
        }
    }
}
