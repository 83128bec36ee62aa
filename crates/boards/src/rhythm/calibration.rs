//! Port scan: finds which MISO lines have an amplifier and the sampling
//! delay each port needs.
//!
//! Every port runs its register program with an ADC calibration at each of
//! the 16 possible MISO delays. A stream "works" at a delay when the company
//! id and the RAM readback come through intact.

use std::fmt;

use log::{debug, info, warn};

use rhd_sensor::Transport;
use rhd_types::layout::{
    aux_word, frame_magic, MAX_MISO_DELAY, MAX_PORTS, MAX_SAMPLING_RATE, MAX_STREAMS, FRAME_MAGIC,
    REGISTER_SEQUENCE_LENGTH,
};
use rhd_types::{AuxSlot, DaqError, Port, ProtocolError, Stream, TransportError};

use super::driver::BoardController;

/// Outcome of [`BoardController::scan_ports`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Delays at which each stream answered, ascending
    pub working_delays: [Vec<u32>; MAX_STREAMS],
    /// Chosen delay per stream, 0 for streams that never answered
    pub stream_delays: [u32; MAX_STREAMS],
    /// Delay applied to each port
    pub port_delays: [u32; MAX_PORTS],
    pub enabled_streams: u8,
}

impl ScanReport {
    pub fn found(&self, stream: Stream) -> bool {
        self.enabled_streams & stream.mask() != 0
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let found: Vec<String> = Stream::in_mask(self.enabled_streams)
            .map(|s| format!("{}@{}", s, self.stream_delays[s.index()]))
            .collect();
        write!(f, "amplifiers: [{}]; port delays: {:?}", found.join(", "), self.port_delays)
    }
}

/// Picks a stream's delay from the delays it answered at. The first working
/// delay sits on the timing edge, so the second is preferred when there is
/// one.
pub fn choose_delay(working: &[u32]) -> Option<u32> {
    match working {
        [] => None,
        [only] => Some(*only),
        [_, second, ..] => Some(*second),
    }
}

/// Port timing in effect before a scan.
struct SavedTiming {
    sampling_rate: u32,
    cable_m: [f64; MAX_PORTS],
    miso_delays: [u32; MAX_PORTS],
}

impl<T: Transport> BoardController<T> {
    /// Scans all ports for amplifiers, sets each port's MISO delay and
    /// enables exactly the streams that answered.
    ///
    /// Runs at the fastest sampling rate and restores the current one
    /// afterwards. On failure no stream is left enabled and every port is
    /// back at the cable length and delay it had before the scan.
    pub fn scan_ports(&mut self) -> Result<ScanReport, DaqError> {
        self.ensure_stopped()?;
        let saved = SavedTiming {
            sampling_rate: self.sampling_rate,
            cable_m: self.cable_m,
            miso_delays: self.miso_delays,
        };
        let result = self.run_scan(saved.sampling_rate);
        if let Err(e) = &result {
            warn!("Port scan failed: {}", e);
            self.abandon_scan(&saved);
        }
        result
    }

    fn run_scan(&mut self, sampling_rate: u32) -> Result<ScanReport, DaqError> {
        self.set_sampling_rate(MAX_SAMPLING_RATE)?;
        self.enable_streams(0xff)?;
        let frame_bytes = self.frame_size();
        for port in Port::ALL {
            self.upload_register_program(port, true)?;
        }

        let mut report = ScanReport::default();
        let mut buffer = vec![0u8; frame_bytes * REGISTER_SEQUENCE_LENGTH];
        for delay in 0..MAX_MISO_DELAY {
            for port in Port::ALL {
                self.set_cable_delay(port, delay)?;
            }
            self.read_bounded_run(&mut buffer)?;

            for stream in Stream::ALL {
                // both chips on a port were sent the first chip's program
                let mut candidate = self.images[stream.port().streams()[0].index()].clone();
                let offset = 2 * aux_word(AuxSlot::Aux3.index(), stream.index(), MAX_STREAMS);
                match candidate.ingest(&buffer, offset, frame_bytes) {
                    Ok(()) if candidate.connected() => report.working_delays[stream.index()].push(delay),
                    Ok(()) => {}
                    Err(ProtocolError::RegisterMismatch { register, .. }) => {
                        debug!("{} garbled at delay {} (register {})", stream, delay, register);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        for stream in Stream::ALL {
            if let Some(delay) = choose_delay(&report.working_delays[stream.index()]) {
                report.stream_delays[stream.index()] = delay;
                report.enabled_streams |= stream.mask();
            }
        }
        for port in Port::ALL {
            let [a, b] = port.streams();
            let delay = report.stream_delays[a.index()].max(report.stream_delays[b.index()]);
            report.port_delays[port.index()] = delay;
            self.set_cable_delay(port, delay)?;
        }
        self.enable_streams(report.enabled_streams)?;
        self.set_leds(report.enabled_streams)?;

        self.set_sampling_rate(sampling_rate)?;
        for port in Port::ALL {
            self.upload_register_program(port, false)?;
        }

        // one more pass at the final delays fills in each chip's identity
        if report.enabled_streams != 0 {
            self.read_bounded_run(&mut buffer)?;
            let active = self.active_streams();
            let frame_bytes = self.frame_size();
            for (ordinal, stream) in Stream::in_mask(report.enabled_streams).enumerate() {
                let offset = 2 * aux_word(AuxSlot::Aux3.index(), ordinal, active);
                self.images[stream.index()].ingest(&buffer, offset, frame_bytes)?;
                info!("{}: {}", stream, self.images[stream.index()]);
            }
        }
        info!("Port scan done, {}", report);
        Ok(report)
    }

    /// Runs one register sequence worth of frames and reads them into
    /// `buffer`, checking the first two frame headers.
    fn read_bounded_run(&mut self, buffer: &mut [u8]) -> Result<(), DaqError> {
        let frames = REGISTER_SEQUENCE_LENGTH;
        let frame_bytes = self.frame_size();
        self.start(frames)?;
        self.wait_while_running()?;

        let ready = self.frames_ready()?;
        if ready != frames {
            debug!("Bounded run left {} frames in the FIFO, expected {}", ready, frames);
        }
        let got = self.read(buffer, frames)?;
        if got < frames {
            return Err(TransportError::ShortRead {
                requested: frames,
                got,
            }
            .into());
        }

        let found = frame_magic(buffer).unwrap_or(0);
        if found != FRAME_MAGIC {
            return Err(ProtocolError::BadMagic { frame: 0, found }.into());
        }
        if frame_magic(&buffer[frame_bytes..]) != Some(FRAME_MAGIC) {
            return Err(ProtocolError::BadFrameSize {
                frame: 1,
                expected: frame_bytes,
            }
            .into());
        }
        Ok(())
    }

    fn abandon_scan(&mut self, saved: &SavedTiming) {
        if let Err(e) = self.stop() {
            warn!("Could not stop board after failed scan: {}", e);
        }
        if let Err(e) = self.enable_streams(0) {
            warn!("Could not clear stream enables: {}", e);
        }
        self.cable_m = saved.cable_m;
        if let Err(e) = self.set_sampling_rate(saved.sampling_rate) {
            warn!("Could not restore sampling rate {} Hz: {}", saved.sampling_rate, e);
        }
        for port in Port::ALL {
            if let Err(e) = self.write_miso_delay(port, saved.miso_delays[port.index()]) {
                warn!("Could not restore MISO delay of port {}: {}", port, e);
                break;
            }
        }
        for port in Port::ALL {
            if let Err(e) = self.upload_register_program(port, false) {
                warn!("Could not restore register program of port {}: {}", port, e);
                break;
            }
        }
    }
}
