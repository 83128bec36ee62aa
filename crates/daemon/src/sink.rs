//! Period sinks: where the daemon sends what the run-cycle reads.

use std::fs::create_dir_all;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use flume::{Sender, TrySendError};
use tracing::{debug, info, warn};

use rhd_types::ChannelTable;

use crate::runner::{Period, PeriodSink};

/// Logs a summary line every `report_every` periods.
pub struct MonitorSink {
    report_every: u64,
    channel: Option<usize>,
    periods: u64,
    delays: u64,
    worst_delay: Duration,
}

impl MonitorSink {
    /// `channel` is the channel table index whose mean is logged.
    pub fn new(report_every: u64, channel: Option<usize>) -> Self {
        Self {
            report_every: report_every.max(1),
            channel,
            periods: 0,
            delays: 0,
            worst_delay: Duration::ZERO,
        }
    }

    pub fn periods(&self) -> u64 {
        self.periods
    }

    pub fn delays(&self) -> u64 {
        self.delays
    }
}

impl PeriodSink for MonitorSink {
    fn deliver(&mut self, period: &Period<'_>) {
        self.periods += 1;
        if self.periods % self.report_every != 0 {
            return;
        }
        let mean = self.channel.and_then(|entry| {
            let samples: Vec<f64> = (0..period.frames())
                .filter_map(|f| period.sample(f, entry))
                .map(f64::from)
                .collect();
            (!samples.is_empty()).then(|| samples.iter().sum::<f64>() / samples.len() as f64)
        });
        match (self.channel.and_then(|i| period.table().get(i)), mean) {
            (Some(entry), Some(mean)) => info!(
                "{} periods, timestamp {}, {} mean {:.1}, {} delays (worst {} us)",
                self.periods,
                period.first_timestamp(),
                entry.name,
                mean,
                self.delays,
                self.worst_delay.as_micros()
            ),
            _ => info!(
                "{} periods, timestamp {}, {} delays (worst {} us)",
                self.periods,
                period.first_timestamp(),
                self.delays,
                self.worst_delay.as_micros()
            ),
        }
    }

    fn delayed(&mut self, delay: Duration) {
        self.delays += 1;
        self.worst_delay = self.worst_delay.max(delay);
    }
}

/// One period of samples, channel-major within each frame.
struct Block {
    first_timestamp: u32,
    frames: usize,
    samples: Vec<u16>,
}

/// Records every channel of every frame to a CSV file. Rows are written on a
/// separate thread; while its queue is full the sink asks for null cycles.
pub struct CsvSink {
    path: PathBuf,
    tx: Option<Sender<Block>>,
    writer: Option<JoinHandle<Result<u64>>>,
    channels: usize,
    dropped: u64,
    delays: u64,
}

impl CsvSink {
    /// Creates `dir` if needed and starts a timestamped recording in it.
    pub fn create(dir: &Path, table: &ChannelTable, queue_periods: usize) -> Result<Self> {
        create_dir_all(dir).with_context(|| format!("Failed to create recordings directory {:?}", dir))?;
        let name = format!("rhd_{}.csv", Local::now().format("%Y-%m-%d_%H-%M-%S"));
        let path = dir.join(name);
        let mut writer =
            csv::Writer::from_path(&path).with_context(|| format!("Failed to create CSV file {:?}", path))?;

        let header = std::iter::once("timestamp").chain(table.entries().iter().map(|e| e.name.as_str()));
        writer.write_record(header).context("Failed to write CSV header")?;

        let (tx, rx) = flume::bounded::<Block>(queue_periods.max(1));
        let channels = table.len();
        let writer = thread::Builder::new()
            .name("csv_writer".into())
            .spawn(move || -> Result<u64> {
                let mut rows = 0u64;
                let mut record = Vec::with_capacity(channels + 1);
                for block in rx.iter() {
                    for (frame, samples) in block.samples.chunks(channels.max(1)).take(block.frames).enumerate() {
                        record.clear();
                        record.push(block.first_timestamp.wrapping_add(frame as u32).to_string());
                        record.extend(samples.iter().map(u16::to_string));
                        writer.write_record(&record).context("Failed to write CSV row")?;
                        rows += 1;
                    }
                }
                writer.flush().context("Failed to flush CSV file")?;
                Ok(rows)
            })
            .context("Failed to spawn CSV writer thread")?;

        info!("Recording {} channels to {:?}", channels, path);
        Ok(Self {
            path,
            tx: Some(tx),
            writer: Some(writer),
            channels,
            dropped: 0,
            delays: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Periods that did not fit in the writer queue.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn delays(&self) -> u64 {
        self.delays
    }

    /// Waits for the writer to drain its queue. Returns the number of rows
    /// written.
    pub fn finish(mut self) -> Result<u64> {
        self.tx.take();
        let writer = self.writer.take().ok_or_else(|| anyhow!("CSV writer already finished"))?;
        let rows = writer.join().map_err(|_| anyhow!("CSV writer thread panicked"))??;
        info!("Wrote {} rows to {:?}", rows, self.path);
        Ok(rows)
    }
}

impl PeriodSink for CsvSink {
    fn deliver(&mut self, period: &Period<'_>) {
        let Some(tx) = &self.tx else {
            return;
        };
        let mut samples = Vec::with_capacity(period.frames() * self.channels);
        for frame in 0..period.frames() {
            samples.extend((0..self.channels).map(|entry| period.sample(frame, entry).unwrap_or(0)));
        }
        let block = Block {
            first_timestamp: period.first_timestamp(),
            frames: period.frames(),
            samples,
        };
        match tx.try_send(block) {
            Ok(()) => {}
            Err(TrySendError::Full(block)) => {
                self.dropped += 1;
                warn!("CSV writer is behind, dropped period at {}", block.first_timestamp);
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("CSV writer has stopped, recording ends");
                self.tx = None;
            }
        }
    }

    fn delayed(&mut self, delay: Duration) {
        self.delays += 1;
        debug!("Recording gap of {} us", delay.as_micros());
    }

    fn wants_samples(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| !tx.is_full())
    }
}
