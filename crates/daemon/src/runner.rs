//! The real-time run-cycle.
//!
//! One [`StreamRunner`] owns the acquisition device while streaming. Every
//! cycle reads one period of frames, checks the last frame of the period
//! against the expected timestamp and hands the period to a [`PeriodSink`].
//! A frame that is out of sequence while the board is still running is an
//! xrun: acquisition is stopped and restarted once, and the sink is told how
//! long the gap was. Anything else ends the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use rhd_sensor::AcquisitionDevice;
use rhd_types::layout::{frame_magic, frame_timestamp, FRAME_MAGIC};
use rhd_types::{ChannelTable, ConfigError, DaqError, ProtocolError, TransportError};

const LATENCY_POLL_INTERVAL: Duration = Duration::from_micros(500);
const LATENCY_POLL_LIMIT: usize = 4000;
/// Reads allowed when draining stale frames before a start
const FLUSH_LIMIT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    Recovering,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerStats {
    /// Validated periods handed to the sink
    pub cycles: u64,
    /// Stop/start recoveries
    pub xruns: u64,
    /// Cycles that began after their anchor had passed
    pub delayed_cycles: u64,
    /// Periods read and thrown away
    pub null_cycles: u64,
}

/// One period of raw frames, borrowed from the runner's buffer.
pub struct Period<'a> {
    data: &'a [u8],
    frames: usize,
    frame_size: usize,
    first_timestamp: u32,
    table: &'a ChannelTable,
}

impl<'a> Period<'a> {
    /// Wraps whole frames of `frame_size` bytes laid out as `table`
    /// describes. A trailing partial frame is ignored.
    pub fn new(data: &'a [u8], frame_size: usize, first_timestamp: u32, table: &'a ChannelTable) -> Self {
        let frames = if frame_size == 0 { 0 } else { data.len() / frame_size };
        Self {
            data: &data[..frames * frame_size],
            frames,
            frame_size,
            first_timestamp,
            table,
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Board timestamp of the first frame in the period.
    pub fn first_timestamp(&self) -> u32 {
        self.first_timestamp
    }

    pub fn table(&self) -> &'a ChannelTable {
        self.table
    }

    pub fn frame(&self, frame: usize) -> Option<&'a [u8]> {
        if frame >= self.frames {
            return None;
        }
        let start = frame * self.frame_size;
        self.data.get(start..start + self.frame_size)
    }

    /// Raw sample of channel table entry `entry` in `frame`.
    pub fn sample(&self, frame: usize, entry: usize) -> Option<u16> {
        self.table.sample(self.frame(frame)?, entry)
    }
}

/// Where the run-cycle sends its periods.
pub trait PeriodSink {
    /// A period of `frames` frames is due at `anchor`.
    fn period_expected(&mut self, _anchor: Instant, _frames: usize) {}

    fn deliver(&mut self, period: &Period<'_>);

    /// The schedule slipped by `delay`, either a late cycle or an xrun.
    fn delayed(&mut self, delay: Duration);

    /// False while the consumer cannot take samples. The runner then reads
    /// and discards periods to keep the board FIFO from overflowing.
    fn wants_samples(&self) -> bool {
        true
    }
}

pub struct StreamRunner<D: AcquisitionDevice> {
    device: D,
    state: RunState,
    period: usize,
    period_usecs: u64,
    extra_latency: usize,
    table: Arc<ChannelTable>,
    buffer: Vec<u8>,
    anchor: Instant,
    expected: u32,
    stats: RunnerStats,
}

impl<D: AcquisitionDevice> StreamRunner<D> {
    /// Creates a stopped runner reading `period` frames per cycle.
    pub fn new(device: D, period: usize, extra_latency: usize) -> Result<Self, DaqError> {
        let rate = device.sampling_rate();
        if period == 0 || u32::try_from(period).is_err() {
            return Err(ConfigError::OutOfRange {
                what: "period length",
                value: period as f64,
                min: 1.0,
                max: f64::from(u32::MAX),
            }
            .into());
        }
        if rate == 0 {
            return Err(ConfigError::OutOfRange {
                what: "sampling rate",
                value: 0.0,
                min: 1.0,
                max: f64::from(u32::MAX),
            }
            .into());
        }
        let period_usecs = period as u64 * 1_000_000 / u64::from(rate);
        info!(
            "Run-cycle: {} frames per period ({:.3} ms), {} frames extra latency",
            period,
            period_usecs as f64 / 1000.0,
            extra_latency
        );
        let table = device.channel_table();
        Ok(Self {
            device,
            state: RunState::Stopped,
            period,
            period_usecs,
            extra_latency,
            table,
            buffer: Vec::new(),
            anchor: Instant::now(),
            expected: 0,
            stats: RunnerStats::default(),
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn stats(&self) -> RunnerStats {
        self.stats
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn period_usecs(&self) -> u64 {
        self.period_usecs
    }

    /// Timestamp the first frame of the next period should carry.
    pub fn expected_timestamp(&self) -> u32 {
        self.expected
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Gives the device back once the runner is done with it.
    pub fn into_device(self) -> D {
        self.device
    }

    fn period_duration(&self) -> Duration {
        Duration::from_micros(self.period_usecs)
    }

    /// Starts continuous acquisition from an empty FIFO.
    pub fn start(&mut self) -> Result<(), DaqError> {
        if self.state != RunState::Stopped {
            return Err(ConfigError::Running.into());
        }
        self.table = self.device.channel_table();
        self.buffer = vec![0; self.period * self.device.frame_size()];
        if let Err(e) = self.begin() {
            self.abort();
            return Err(e);
        }
        self.state = RunState::Running;
        info!("Streaming {} channels", self.table.len());
        Ok(())
    }

    fn begin(&mut self) -> Result<(), DaqError> {
        self.flush()?;
        self.device.start(0)?;
        self.wait_for_latency()?;
        self.anchor = Instant::now();
        self.expected = 0;
        Ok(())
    }

    /// Reads until the FIFO holds no complete frame.
    fn flush(&mut self) -> Result<(), DaqError> {
        let frame_size = self.device.frame_size();
        for _ in 0..FLUSH_LIMIT {
            let stale = self.device.frames_ready()?;
            if stale == 0 {
                return Ok(());
            }
            debug!("Discarding {} stale frames", stale);
            let mut scratch = vec![0u8; stale * frame_size];
            if self.device.read(&mut scratch, stale)? == 0 {
                break;
            }
        }
        warn!("FIFO still holds frames after flushing");
        Ok(())
    }

    fn wait_for_latency(&mut self) -> Result<(), DaqError> {
        if self.extra_latency == 0 {
            return Ok(());
        }
        for _ in 0..LATENCY_POLL_LIMIT {
            if self.device.frames_ready()? >= self.extra_latency {
                return Ok(());
            }
            thread::sleep(LATENCY_POLL_INTERVAL);
        }
        Err(TransportError::Timeout("FIFO latency fill").into())
    }

    /// Moves the anchor one period on. Returns how late the cycle is, if it
    /// is; the anchor is then reset to now.
    fn advance_anchor(&mut self) -> Option<Duration> {
        self.anchor += self.period_duration();
        let now = Instant::now();
        if now > self.anchor {
            let late = now - self.anchor;
            self.anchor = now;
            Some(late)
        } else {
            None
        }
    }

    /// Reads one period into the buffer. Anything short of a full period is
    /// fatal.
    fn read_period(&mut self) -> Result<(), DaqError> {
        let got = self.device.read(&mut self.buffer, self.period)?;
        if got < self.period {
            return Err(TransportError::ShortRead {
                requested: self.period,
                got,
            }
            .into());
        }
        Ok(())
    }

    /// Runs one cycle: read a period, validate it and deliver it to `sink`.
    pub fn run_cycle<S: PeriodSink + ?Sized>(&mut self, sink: &mut S) -> Result<(), DaqError> {
        if self.state != RunState::Running {
            return Err(ConfigError::NotStreaming.into());
        }
        if let Some(late) = self.advance_anchor() {
            self.stats.delayed_cycles += 1;
            warn!("Cycle started {} us late", late.as_micros());
            sink.delayed(late);
        }
        sink.period_expected(self.anchor, self.period);

        if let Err(e) = self.read_period() {
            error!("Run-cycle aborted: {}", e);
            self.abort();
            return Err(e);
        }

        let frame_size = self.device.frame_size();
        let last = &self.buffer[(self.period - 1) * frame_size..self.period * frame_size];
        let wanted = self.expected.wrapping_add(self.period as u32 - 1);
        let magic = frame_magic(last).unwrap_or(0);
        let found = frame_timestamp(last).unwrap_or(0);
        if magic == FRAME_MAGIC && found == wanted {
            let period = Period::new(&self.buffer, frame_size, self.expected, &self.table);
            sink.deliver(&period);
            self.expected = self.expected.wrapping_add(self.period as u32);
            self.stats.cycles += 1;
            return Ok(());
        }

        let still_running = match self.device.running() {
            Ok(running) => running,
            Err(e) => {
                error!("Run-cycle aborted: {}", e);
                self.abort();
                return Err(e);
            }
        };
        if !still_running {
            let e = if magic != FRAME_MAGIC {
                ProtocolError::BadMagic {
                    frame: self.period - 1,
                    found: magic,
                }
            } else {
                ProtocolError::LostSync {
                    expected: wanted,
                    found,
                }
            };
            error!("Board stopped streaming: {}", e);
            self.abort();
            return Err(e.into());
        }

        warn!(
            "xrun: expected timestamp {}, found {} (magic {:#018x}), restarting acquisition",
            wanted, found, magic
        );
        self.recover(sink)
    }

    fn recover<S: PeriodSink + ?Sized>(&mut self, sink: &mut S) -> Result<(), DaqError> {
        self.state = RunState::Recovering;
        self.stats.xruns += 1;
        let old_anchor = self.anchor;
        let restarted = self.device.stop().and_then(|_| self.begin());
        if let Err(e) = restarted {
            error!("Could not restart acquisition: {}", e);
            self.abort();
            return Err(e);
        }
        let delay = self.anchor.saturating_duration_since(old_anchor);
        sink.delayed(delay);
        self.state = RunState::Running;
        info!("Acquisition restarted after {} us", delay.as_micros());
        Ok(())
    }

    /// Reads and discards one period without validating it. The schedule and
    /// the expected timestamp still move on so the next cycle stays in sync.
    pub fn null_cycle(&mut self) -> Result<(), DaqError> {
        if self.state != RunState::Running {
            return Err(ConfigError::NotStreaming.into());
        }
        if let Some(late) = self.advance_anchor() {
            self.stats.delayed_cycles += 1;
            debug!("Null cycle started {} us late", late.as_micros());
        }
        if let Err(e) = self.read_period() {
            error!("Run-cycle aborted: {}", e);
            self.abort();
            return Err(e);
        }
        self.expected = self.expected.wrapping_add(self.period as u32);
        self.stats.null_cycles += 1;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), DaqError> {
        if self.state == RunState::Stopped {
            return Ok(());
        }
        self.state = RunState::Stopped;
        self.device.stop()?;
        info!(
            "Streaming stopped after {} cycles ({} xruns, {} delayed, {} null)",
            self.stats.cycles, self.stats.xruns, self.stats.delayed_cycles, self.stats.null_cycles
        );
        Ok(())
    }

    /// Best-effort stop after a fatal error.
    fn abort(&mut self) {
        self.state = RunState::Stopped;
        if let Err(e) = self.device.stop() {
            warn!("Could not stop the board: {}", e);
        }
    }

    /// Streams into `sink` until `stop` is set. Periods the sink does not
    /// want are read through [`null_cycle`](Self::null_cycle).
    pub fn run<S: PeriodSink + ?Sized>(&mut self, sink: &mut S, stop: &AtomicBool) -> Result<RunnerStats, DaqError> {
        if self.state == RunState::Stopped {
            self.start()?;
        }
        while !stop.load(Ordering::Relaxed) {
            if sink.wants_samples() {
                self.run_cycle(sink)?;
            } else {
                self.null_cycle()?;
            }
        }
        self.stop()?;
        Ok(self.stats)
    }
}
