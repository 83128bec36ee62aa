//! Board bring-up and the acquisition thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use thread_priority::ThreadPriority;
use tracing::{info, warn};

use boards::BoardController;
use rhd_sensor::{AcquisitionDevice, Transport};
use rhd_types::{AcquisitionConfig, DaqError, Port};

use crate::config::DaemonConfig;
use crate::runner::{RunnerStats, StreamRunner};
use crate::sink::{CsvSink, MonitorSink};

/// Opens the board, applies the per-port amplifier settings and finds the
/// connected amplifiers.
pub fn bring_up<T: Transport>(
    transport: T,
    config: &AcquisitionConfig,
    scan: bool,
) -> Result<BoardController<T>, DaqError> {
    let mut board = BoardController::open(transport, config.sampling_rate)?;
    for port in Port::ALL {
        let settings = &config.ports[port.index()];
        board.configure_port(
            port,
            settings.lower_hz,
            settings.upper_hz,
            settings.dsp_hz,
            settings.power_mask,
        )?;
    }

    if scan {
        let report = board.scan_ports()?;
        if report.enabled_streams == 0 {
            warn!("No amplifiers found, only the board ADCs will be recorded");
        }
    } else {
        let mut enabled = 0u8;
        for port in Port::ALL {
            let settings = &config.ports[port.index()];
            board.set_cable_length(port, settings.cable_m)?;
            if settings.power_mask != 0 {
                for stream in port.streams() {
                    enabled |= stream.mask();
                }
            }
        }
        board.enable_streams(enabled)?;
        board.set_leds(enabled)?;
    }
    info!("{}", board);
    Ok(board)
}

/// Runs `device` on a high-priority thread until `stop` is set, recording to
/// CSV when the configuration asks for it.
pub fn spawn_acquisition<D>(
    device: D,
    config: &DaemonConfig,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<Result<RunnerStats>>>
where
    D: AcquisitionDevice + 'static,
{
    let acquisition = &config.acquisition;
    let table = device.channel_table();
    let mut runner = StreamRunner::new(device, acquisition.period_frames, acquisition.extra_latency_frames)?;

    let recorder = match &config.recording {
        Some(dir) => Some(CsvSink::create(dir, &table, config.queue_periods)?),
        None => None,
    };
    let channel = match &config.monitor_channel {
        Some(name) => Some(
            table
                .find(name)
                .map(|(index, _)| index)
                .with_context(|| format!("No channel named {} is being recorded", name))?,
        ),
        None => (!table.is_empty()).then_some(0),
    };
    // one summary line a second
    let mut monitor = MonitorSink::new(1_000_000 / runner.period_usecs().max(1), channel);

    let handle = thread::Builder::new()
        .name("rhd_acq".into())
        .spawn(move || -> Result<RunnerStats> {
            if let Err(e) = thread_priority::set_current_thread_priority(ThreadPriority::Max) {
                warn!("Failed to set acquisition thread priority: {:?}", e);
            }
            info!("Acquisition thread started with high priority.");
            match recorder {
                Some(mut sink) => {
                    let result = runner.run(&mut sink, &stop);
                    let dropped = sink.dropped();
                    let rows = sink.finish()?;
                    if dropped > 0 {
                        warn!("{} periods did not reach the recording", dropped);
                    }
                    info!("Recorded {} frames", rows);
                    Ok(result?)
                }
                None => Ok(runner.run(&mut monitor, &stop)?),
            }
        })
        .context("Failed to spawn acquisition thread")?;
    Ok(handle)
}

/// Why [`wait_for_shutdown`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// The acquisition thread ended on its own
    Finished,
    Interrupted,
    Deadline,
}

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Blocks until `acquisition` ends, `interrupted` is raised or `deadline`
/// passes, whichever comes first.
pub fn wait_for_shutdown<T>(
    acquisition: &JoinHandle<T>,
    interrupted: &AtomicBool,
    deadline: Option<Instant>,
) -> Shutdown {
    loop {
        if acquisition.is_finished() {
            return Shutdown::Finished;
        }
        if interrupted.load(Ordering::SeqCst) {
            return Shutdown::Interrupted;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Shutdown::Deadline;
        }
        thread::sleep(SHUTDOWN_POLL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parked(release: Arc<AtomicBool>) -> JoinHandle<()> {
        thread::spawn(move || {
            while !release.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
        })
    }

    #[test]
    fn interrupt_ends_the_wait() {
        let release = Arc::new(AtomicBool::new(false));
        let handle = parked(release.clone());
        let interrupted = Arc::new(AtomicBool::new(false));
        let flag = interrupted.clone();
        let raiser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            flag.store(true, Ordering::SeqCst);
        });

        assert_eq!(wait_for_shutdown(&handle, &interrupted, None), Shutdown::Interrupted);
        raiser.join().unwrap();
        release.store(true, Ordering::SeqCst);
        handle.join().unwrap();
    }

    #[test]
    fn deadline_ends_the_wait() {
        let release = Arc::new(AtomicBool::new(false));
        let handle = parked(release.clone());
        let interrupted = AtomicBool::new(false);
        let started = Instant::now();
        let deadline = Some(started + Duration::from_millis(30));

        assert_eq!(wait_for_shutdown(&handle, &interrupted, deadline), Shutdown::Deadline);
        assert!(started.elapsed() >= Duration::from_millis(30));
        release.store(true, Ordering::SeqCst);
        handle.join().unwrap();
    }

    #[test]
    fn finished_thread_ends_the_wait() {
        let handle = thread::spawn(|| ());
        let interrupted = AtomicBool::new(false);
        assert_eq!(wait_for_shutdown(&handle, &interrupted, None), Shutdown::Finished);
    }
}
