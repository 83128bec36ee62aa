use std::thread;
use std::time::Duration;

use rhd_sensor::endpoints::*;
use rhd_sensor::mock_board::{MockAmplifier, MockBoard, MockConfig};
use rhd_sensor::rhd2000::ChipModel;
use rhd_sensor::Transport;
use rhd_types::layout::{frame_magic, frame_size, frame_timestamp, FRAME_MAGIC};
use rhd_types::{ConfigError, DaqError, Port, Stream, TransportError};

use super::*;

fn amp(stream: Stream, working_delays: &[u32]) -> MockAmplifier {
    MockAmplifier {
        stream,
        working_delays: working_delays.to_vec(),
    }
}

fn board_with(amplifiers: Vec<MockAmplifier>, rate: u32) -> (MockBoard, BoardController<MockBoard>) {
    let mock = MockBoard::new(MockConfig {
        amplifiers,
        ..MockConfig::default()
    });
    let board = BoardController::open(mock.clone(), rate).unwrap();
    (mock, board)
}

fn default_board() -> (MockBoard, BoardController<MockBoard>) {
    let mock = MockBoard::new(MockConfig::default());
    let board = BoardController::open(mock.clone(), 30_000).unwrap();
    (mock, board)
}

#[test]
fn open_programs_clock_and_command_ram() {
    let (mock, board) = default_board();
    assert_eq!(board.sampling_rate(), 30_000);
    assert_eq!(mock.wire_in(WIRE_IN_DATA_FREQ_PLL), 256 * 42 + 25);
    assert_eq!(board.cable_delay(Port::A), 3);
    assert_eq!(mock.wire_in(WIRE_IN_MISO_DELAY), 0x3333);

    // register program of port B sits in AuxCmd3 bank 1 and starts with READ(63)
    assert_eq!(mock.command_ram(2, 1, 0), 0xff00);
    assert_eq!((mock.wire_in(WIRE_IN_AUX_CMD_BANK[2]) >> 4) & 0xf, 1);
    for slot in 0..3 {
        assert_eq!(mock.wire_in(WIRE_IN_AUX_CMD_LENGTH[slot]), 59);
        assert_eq!(mock.wire_in(WIRE_IN_AUX_CMD_LOOP[slot]), 0);
    }
    // DAC slot holds WRITE(6, 128)
    assert_eq!(mock.command_ram(0, 0, 0), 0x8000 | 6 << 8 | 128);
    assert_eq!(mock.wire_in(WIRE_IN_DAC_MANUAL_1), 0x00ef);
    assert_eq!(board.enabled_streams(), 0);
    assert_eq!(board.channel_table().len(), 8);
}

#[test]
fn open_requires_an_open_transport() {
    let mock = MockBoard::new(MockConfig::default());
    mock.disconnect();
    assert!(matches!(
        BoardController::open(mock, 30_000),
        Err(DaqError::Transport(TransportError::NotOpen))
    ));
}

#[test]
fn scan_finds_default_amplifiers() {
    let (mock, mut board) = default_board();
    let report = board.scan_ports().unwrap();

    assert_eq!(report.working_delays[Stream::A1.index()], vec![2, 3, 4]);
    assert_eq!(report.enabled_streams, Stream::A1.mask() | Stream::A2.mask());
    assert_eq!(report.stream_delays[Stream::A1.index()], 3);
    assert_eq!(report.port_delays, [3, 0, 0, 0]);
    assert!(report.found(Stream::A2));
    assert!(!report.found(Stream::B1));

    assert_eq!(board.cable_delay(Port::A), 3);
    assert_eq!(board.enabled_streams(), 0x03);
    assert_eq!(board.channel_table().len(), 2 * 32 + 8);
    assert_eq!(mock.wire_in(WIRE_IN_LED_DISPLAY), 0x03);
    assert_eq!(mock.wire_in(WIRE_IN_DATA_STREAM_EN), 0x03);

    let identity = board.image(Stream::A2).chip_identity().unwrap();
    assert_eq!(identity.model, ChipModel::Rhd2132);
    assert_eq!(identity.amplifiers, 32);
    assert!(!board.image(Stream::B1).connected());
    // the scan leaves the non-calibrating program behind
    assert!(!board.running().unwrap());
}

#[test]
fn scan_prefers_second_working_delay() {
    let (_mock, mut board) = board_with(
        vec![
            amp(Stream::B1, &[4, 5, 6]),
            amp(Stream::C1, &[7]),
            amp(Stream::C2, &[7]),
        ],
        30_000,
    );
    let report = board.scan_ports().unwrap();

    assert_eq!(report.stream_delays[Stream::B1.index()], 5);
    assert_eq!(report.stream_delays[Stream::B2.index()], 0);
    assert_eq!(report.stream_delays[Stream::C1.index()], 7);
    assert_eq!(report.port_delays, [0, 5, 7, 0]);
    assert_eq!(
        report.enabled_streams,
        Stream::B1.mask() | Stream::C1.mask() | Stream::C2.mask()
    );
    assert_eq!(board.cable_delay(Port::B), 5);
    assert_eq!(board.cable_delay(Port::C), 7);

    // offsets follow the three enabled streams
    let table = board.channel_table();
    assert_eq!(table.active_streams(), 3);
    let (_, c2_0) = table.find("C2_0").unwrap();
    assert_eq!(c2_0.byte_offset, 2 * (6 + 3 * 3 + 2));
}

#[test]
fn scan_without_amplifiers_enables_nothing() {
    let (_mock, mut board) = board_with(Vec::new(), 30_000);
    let report = board.scan_ports().unwrap();
    assert_eq!(report.enabled_streams, 0);
    assert_eq!(report.port_delays, [0; 4]);
    assert_eq!(board.channel_table().len(), 8);
}

#[test]
fn scan_restores_sampling_rate() {
    let (mock, mut board) = board_with(vec![amp(Stream::D2, &[2, 3])], 10_000);
    let report = board.scan_ports().unwrap();
    assert_eq!(report.enabled_streams, Stream::D2.mask());
    assert_eq!(board.sampling_rate(), 10_000);
    assert_eq!(mock.wire_in(WIRE_IN_DATA_FREQ_PLL), 256 * 14 + 25);
    assert_eq!(board.image(Stream::D2).sampling_rate(), 10_000);
}

#[test]
fn failed_scan_leaves_no_stream_enabled() {
    // the scan has to reprogram the clock, which never locks
    let (mock, mut board) = board_with(MockConfig::default().amplifiers, 10_000);
    board.enable_streams(0x0f).unwrap();
    mock.stick_clock(true);
    assert!(board.scan_ports().is_err());
    assert_eq!(board.enabled_streams(), 0);
    assert_eq!(mock.wire_in(WIRE_IN_DATA_STREAM_EN), 0);
}

/// Passes everything through to the mock until the pipe has been read
/// `reads_left` times, then fails every pipe read.
struct FailingPipe {
    inner: MockBoard,
    reads_left: usize,
}

impl Transport for FailingPipe {
    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn set_wire_in(&mut self, addr: u8, value: u32, mask: u32) {
        self.inner.set_wire_in(addr, value, mask)
    }

    fn update_wire_ins(&mut self) -> Result<(), TransportError> {
        self.inner.update_wire_ins()
    }

    fn update_wire_outs(&mut self) -> Result<(), TransportError> {
        self.inner.update_wire_outs()
    }

    fn wire_out(&self, addr: u8) -> u32 {
        self.inner.wire_out(addr)
    }

    fn activate_trigger(&mut self, addr: u8, bit: u32) -> Result<(), TransportError> {
        self.inner.activate_trigger(addr, bit)
    }

    fn read_pipe(&mut self, addr: u8, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.reads_left == 0 {
            return Err(TransportError::NotOpen);
        }
        self.reads_left -= 1;
        self.inner.read_pipe(addr, buf)
    }
}

#[test]
fn failed_scan_restores_cable_timing() {
    for (rate, delay, wire) in [(30_000, 3, 0x3333), (10_000, 1, 0x1111)] {
        let mock = MockBoard::new(MockConfig::default());
        let transport = FailingPipe {
            inner: mock.clone(),
            reads_left: 5,
        };
        let mut board = BoardController::open(transport, rate).unwrap();
        assert_eq!(board.cable_delay(Port::A), delay);

        let err = board.scan_ports().unwrap_err();
        assert!(
            matches!(err, DaqError::Transport(TransportError::ShortRead { got: 0, .. })),
            "{:?}",
            err
        );
        assert_eq!(board.sampling_rate(), rate);
        assert_eq!(board.enabled_streams(), 0);
        for port in Port::ALL {
            assert_eq!(board.cable_delay(port), delay, "port {}", port);
            assert_eq!(board.cable_length(port), DEFAULT_CABLE_M);
        }
        assert_eq!(mock.wire_in(WIRE_IN_MISO_DELAY), wire);
    }
}

#[test]
fn configure_port_while_running_is_rejected() {
    let (_mock, mut board) = default_board();
    board.enable_stream(Stream::A1, true).unwrap();
    let before = board.image(Stream::A1).clone();
    board.start(0).unwrap();

    let result = board.configure_port(Port::A, 10.0, 5_000.0, 0.0, 0xff);
    assert!(matches!(result, Err(DaqError::Config(ConfigError::Running))));
    assert_eq!(board.image(Stream::A1), &before);

    board.stop().unwrap();
    assert!(!board.running().unwrap());
    board.configure_port(Port::A, 10.0, 5_000.0, 0.0, 0xff).unwrap();
    assert!(!board.image(Stream::A1).dsp_enabled());
}

#[test]
fn invalid_port_settings_change_nothing() {
    let (mock, mut board) = default_board();
    let before = board.image(Stream::B2).clone();
    let writes = mock.stats().ram_writes;

    let result = board.configure_port(Port::B, 1.0, 40_000.0, 1.0, 0);
    assert!(matches!(result, Err(DaqError::Config(ConfigError::OutOfRange { .. }))));
    assert_eq!(board.image(Stream::B2), &before);
    assert_eq!(mock.stats().ram_writes, writes);
}

#[test]
fn configure_port_updates_both_chips_and_table() {
    let (mock, mut board) = default_board();
    board.enable_streams(Stream::A1.mask() | Stream::A2.mask()).unwrap();
    assert_eq!(board.channel_table().len(), 64 + 8);

    board.configure_port(Port::A, 1.0, 3_000.0, 1.0, 0x0000_000f).unwrap();
    assert_eq!(board.image(Stream::A1).power_mask(), 0x0f);
    assert_eq!(board.image(Stream::A2).power_mask(), 0x0f);
    assert_eq!(board.channel_table().len(), 8 + 8);
    // the uploaded program writes the new mask into register 14
    let program = board.image(Stream::A1).build_register_program_sequence(false);
    let words = rhd_sensor::rhd2000::encode_sequence(&program);
    for (i, word) in words.iter().enumerate() {
        assert_eq!(mock.command_ram(2, 0, i), *word);
    }
}

#[test]
fn channel_table_rebuild_is_idempotent() {
    let (_mock, mut board) = default_board();
    board.enable_streams(0b0101_0011).unwrap();
    let first = board.channel_table();
    board.rebuild_channel_table();
    assert_eq!(*first, *board.channel_table());
}

#[test]
fn enabling_streams_resizes_frames() {
    let (mock, mut board) = default_board();
    board.enable_stream(Stream::C2, true).unwrap();
    board.enable_stream(Stream::A1, true).unwrap();
    assert_eq!(board.active_streams(), 2);
    assert_eq!(board.frame_size(), frame_size(2));
    board.enable_stream(Stream::C2, false).unwrap();
    assert_eq!(board.enabled_streams(), Stream::A1.mask());
    assert_eq!(mock.wire_in(WIRE_IN_DATA_STREAM_EN), 0x01);
    assert_eq!(board.channel_table().len(), 32 + 8);
}

#[test]
fn dac_monitor_routes_table_entries() {
    let (mock, mut board) = default_board();
    board.enable_streams(Stream::A1.mask() | Stream::B2.mask()).unwrap();
    let (index, _) = board.channel_table().find("B2_5").unwrap();

    board.dac_monitor(0, index).unwrap();
    let word = 0x0200 | (Stream::B2.index() as u32) << 5 | 5;
    assert_eq!(board.dac_source(0), Some(word));
    assert_eq!(mock.wire_in(WIRE_IN_DAC_SOURCE[0]), word);

    let (ev, _) = board.channel_table().find("EV_0").unwrap();
    assert!(board.dac_monitor(1, ev).is_err());
    assert!(board.dac_monitor(8, index).is_err());

    board.dac_disable(0).unwrap();
    assert_eq!(mock.wire_in(WIRE_IN_DAC_SOURCE[0]), 0);
}

#[test]
fn dac_configure_sets_gain_and_clip() {
    let (mock, mut board) = default_board();
    board.dac_configure(3, 100).unwrap();
    let reset_run = mock.wire_in(WIRE_IN_RESET_RUN);
    assert_eq!((reset_run & DAC_GAIN_MASK) >> DAC_GAIN_SHIFT, 3);
    assert_eq!((reset_run & DAC_NOISE_SLICE_MASK) >> DAC_NOISE_SLICE_SHIFT, 100);
    assert!(board.dac_configure(8, 0).is_err());
    assert!(board.dac_configure(0, 128).is_err());
}

#[test]
fn sampling_rate_snaps_and_follows_through() {
    let (mock, mut board) = default_board();
    assert_eq!(board.set_sampling_rate(14_000).unwrap(), 15_000);
    assert_eq!(mock.wire_in(WIRE_IN_DATA_FREQ_PLL), 256 * 21 + 25);
    assert_eq!(board.image(Stream::C1).sampling_rate(), 15_000);
    assert_eq!(board.cable_delay(Port::A), delay_for_cable(DEFAULT_CABLE_M, 15_000).unwrap());
}

#[test]
fn stuck_clock_times_out() {
    let (mock, mut board) = default_board();
    mock.stick_clock(true);
    assert!(matches!(
        board.set_sampling_rate(1_000),
        Err(DaqError::Transport(TransportError::Timeout(_)))
    ));
}

#[test]
fn cable_length_limits() {
    let (_mock, mut board) = default_board();
    assert_eq!(board.set_cable_feet(Port::D, 3.0).unwrap(), 3);
    assert!(matches!(
        board.set_cable_length(Port::D, 30.0),
        Err(DaqError::Config(ConfigError::CableTooLong { .. }))
    ));
    assert_eq!(board.cable_delay(Port::D), 3);
}

#[test]
fn continuous_run_streams_consecutive_frames() {
    let (_mock, mut board) = default_board();
    board.enable_streams(Stream::A1.mask()).unwrap();
    board.start(0).unwrap();
    thread::sleep(Duration::from_millis(5));
    assert!(board.running().unwrap());
    assert!(board.frames_ready().unwrap() > 0);

    let frames = 16;
    let mut buffer = vec![0u8; frames * board.frame_size()];
    assert_eq!(board.read(&mut buffer, frames).unwrap(), frames);
    for (i, frame) in buffer.chunks(board.frame_size()).enumerate() {
        assert_eq!(frame_magic(frame), Some(FRAME_MAGIC));
        assert_eq!(frame_timestamp(frame), Some(i as u32));
    }
    board.stop().unwrap();
    assert!(!board.running().unwrap());
}

#[test]
fn read_failure_returns_zero_frames() {
    let (mock, mut board) = default_board();
    board.enable_streams(Stream::A1.mask()).unwrap();
    mock.disconnect();
    let mut buffer = vec![0u8; 4 * board.frame_size()];
    assert_eq!(board.read(&mut buffer, 4).unwrap(), 0);
    assert!(board.read(&mut buffer[..10], 4).is_err());
}

#[test]
fn summary_lists_every_miso_line() {
    let (_mock, mut board) = default_board();
    board.scan_ports().unwrap();
    let text = board.to_string();
    assert!(text.contains("Sampling rate: 30000 Hz"));
    assert!(text.contains("A1: RHD2132"));
    assert!(text.contains("D2: no amplifier connected (off)"));
}
