use super::bandwidth::*;
use super::registers::*;
use super::*;
use proptest::prelude::*;
use rhd_types::{ConfigError, ProtocolError};

/// Runs a command list against a register file the way the chip does and
/// lays the results out one frame late, `stride` bytes apart.
fn play(commands: &[Command], chip: &mut [u8; REGISTER_COUNT], offset: usize, stride: usize) -> Vec<u8> {
    let mut frames = vec![0u8; stride * (commands.len() + 1)];
    for (k, command) in commands.iter().enumerate() {
        let result: u16 = match *command {
            Command::Read(reg) => u16::from(chip[usize::from(reg)]),
            Command::Write(reg, value) => {
                chip[usize::from(reg)] = value;
                0xff00 | u16::from(value)
            }
            Command::Convert(_) => 0x8000,
            _ => 0,
        };
        let at = offset + stride * (k + 1);
        frames[at..at + 2].copy_from_slice(&result.to_le_bytes());
    }
    frames
}

fn rhd2132_rom() -> [u8; REGISTER_COUNT] {
    let mut chip = [0u8; REGISTER_COUNT];
    chip[40..45].copy_from_slice(b"INTAN");
    chip[48..55].copy_from_slice(b"RHD2132");
    chip[60] = 1;
    chip[62] = 32;
    chip[63] = 1;
    chip
}

#[test]
fn constructor_applies_rate_and_band_defaults() {
    let image = RegisterImage::new(30_000);
    assert_eq!(image.register(0), 0xde);
    assert_eq!(image.register(1), 0x42);
    assert_eq!(image.register(2), 4);
    assert_eq!(image.power_mask(), 0xffff_ffff);
    assert!(image.dsp_enabled());
    assert!((image.upper_cutoff() - 10_000.0).abs() < 1_000.0);
    assert!((image.lower_cutoff() - 1.0).abs() < 0.25);
    assert!(!image.connected());
    assert_eq!(image.to_string(), "no amplifier connected");
}

#[test]
fn slow_rates_use_larger_bias() {
    let image = RegisterImage::new(1_000);
    assert_eq!(image.register(1) & ADC_BUFFER_BIAS_MASK, 32);
    assert_eq!(image.register(2), 40);
}

#[test]
fn rejected_cutoffs_leave_image_untouched() {
    let mut image = RegisterImage::new(30_000);
    let before = image.clone();
    assert!(matches!(
        image.set_upper_cutoff(30_001.0),
        Err(ConfigError::OutOfRange { .. })
    ));
    assert!(image.set_upper_cutoff(99.0).is_err());
    assert!(image.set_lower_cutoff(0.05).is_err());
    assert!(image.set_lower_cutoff(2_000.0).is_err());
    assert!(image.set_lower_cutoff(f64::NAN).is_err());
    assert!(image.set_dsp_cutoff(f64::NAN).is_err());
    assert_eq!(image, before);
}

#[test]
fn upper_cutoff_only_touches_its_fields() {
    let mut image = RegisterImage::new(30_000);
    image.set_upper_cutoff(3_000.0).unwrap();
    // ADC enable bits share registers 9 and 11
    assert_eq!(image.register(9) & 0x80, 0x80);
    assert_eq!(image.register(11) & 0x80, 0x80);
}

#[test]
fn lowest_lower_cutoff_uses_dac3() {
    let mut image = RegisterImage::new(30_000);
    image.set_lower_cutoff(0.1).unwrap();
    assert_eq!(image.register(RL_DAC3_REG) & RL_DAC3_MASK, RL_DAC3_MASK);
    assert_eq!(image.register(RL_DAC2_REG) & 0x80, 0x80);
    image.set_lower_cutoff(10.0).unwrap();
    assert_eq!(image.register(RL_DAC3_REG) & RL_DAC3_MASK, 0);
}

#[test]
fn dsp_cutoff_snaps_and_disables() {
    let mut image = RegisterImage::new(30_000);
    image.set_dsp_cutoff(1.0).unwrap();
    assert_eq!(image.register(DSP_REG) & DSP_CUTOFF_MASK, 12);
    assert!((image.dsp_cutoff() - 1.166).abs() < 0.01);

    image.set_dsp_cutoff(0.0).unwrap();
    assert!(!image.dsp_enabled());

    // far below the smallest step clamps to the largest code
    image.set_dsp_cutoff(0.001).unwrap();
    assert_eq!(image.register(DSP_REG) & DSP_CUTOFF_MASK, 15);
    // near Nyquist clamps to code 1
    image.set_dsp_cutoff(14_000.0).unwrap();
    assert_eq!(image.register(DSP_REG) & DSP_CUTOFF_MASK, 1);
    // and so does anything past it
    image.set_dsp_cutoff(20_000.0).unwrap();
    assert!(image.dsp_enabled());
    assert_eq!(image.register(DSP_REG) & DSP_CUTOFF_MASK, 1);
    image.set_dsp_cutoff(f64::INFINITY).unwrap();
    assert_eq!(image.register(DSP_REG) & DSP_CUTOFF_MASK, 1);
}

#[test]
fn dsp_cutoff_follows_rate_change() {
    let mut image = RegisterImage::new(30_000);
    image.set_dsp_cutoff(10.0).unwrap();
    let before = image.dsp_cutoff();
    image.set_sampling_rate(15_000);
    assert_eq!(image.register(2), 7);
    assert!((image.dsp_cutoff() - before).abs() / before < 0.5);
}

#[test]
fn channel_power_bits() {
    let mut image = RegisterImage::new(30_000);
    image.set_power_mask(0);
    image.set_channel_power(0, true).unwrap();
    image.set_channel_power(31, true).unwrap();
    assert_eq!(image.power_mask(), 0x8000_0001);
    assert_eq!(image.register(17), 0x80);
    assert_eq!(image.amps_powered(), 2);
    image.set_channel_power(0, false).unwrap();
    assert!(!image.channel_powered(0));
    assert_eq!(image.set_channel_power(32, true), Err(ConfigError::ChannelOutOfRange(32)));
}

#[test]
fn register_program_layout() {
    let image = RegisterImage::new(30_000);
    for calibrate in [false, true] {
        let seq = image.build_register_program_sequence(calibrate);
        assert_eq!(seq.len(), 60);
        assert_eq!(&seq[..2], &[Command::Read(63), Command::Read(63)]);

        let writes: Vec<u8> = seq
            .iter()
            .filter_map(|c| match c {
                Command::Write(reg, _) => Some(*reg),
                _ => None,
            })
            .collect();
        assert_eq!(writes.len(), 16);
        assert!(!writes.contains(&3) && !writes.contains(&6));

        assert_eq!(seq[18], Command::Read(0));
        assert_eq!(seq[35], Command::Read(17));
        assert_eq!(seq[36], Command::Read(40));
        assert_eq!(seq[41], Command::Read(48));
        assert_eq!(seq[53], Command::Read(63));

        let calibrations = seq.iter().filter(|c| **c == Command::Calibrate).count();
        assert_eq!(calibrations, usize::from(calibrate));
        assert!(seq[55..].iter().all(|c| *c == Command::Read(63)));
    }
}

#[test]
fn aux_sample_sequence_steps_the_temperature_sensor() {
    let image = RegisterImage::new(30_000);
    let seq = image.build_aux_sample_sequence();
    assert_eq!(seq.len(), 60);
    for group in seq.chunks(4) {
        assert_eq!(&group[..3], &[Command::Convert(32), Command::Convert(33), Command::Convert(34)]);
    }
    let actions: Vec<Command> = seq.chunks(4).map(|g| g[3]).collect();
    assert_eq!(actions[0], Command::Write(3, 0x06));
    assert_eq!(actions[1], Command::Write(3, 0x0e));
    assert_eq!(actions[2], Command::Write(3, 0x1e));
    assert_eq!(actions[3], Command::Convert(49));
    assert_eq!(actions[4], Command::Write(3, 0x16));
    assert_eq!(actions[5], Command::Convert(49));
    assert_eq!(actions[6], Command::Write(3, 0x06));
    assert_eq!(actions[7], Command::Convert(48));
    assert!(actions[8..].iter().all(|c| *c == Command::Read(63)));
}

#[test]
fn dac_sequence_is_offset_binary() {
    let image = RegisterImage::new(30_000);
    let seq = image.build_dac_sequence(&[-128.0, 0.0, 127.0, 500.0, -0.4]).unwrap();
    assert_eq!(
        seq,
        vec![
            Command::Write(6, 0),
            Command::Write(6, 128),
            Command::Write(6, 255),
            Command::Write(6, 255),
            Command::Write(6, 128),
        ]
    );
    assert_eq!(image.build_dac_sequence(&[]), Err(ConfigError::SequenceLength(0)));
    assert!(image.build_dac_sequence(&vec![0.0; 1025]).is_err());
}

#[test]
fn ingest_verifies_and_copies_rom() {
    let mut image = RegisterImage::new(30_000);
    image.set_upper_cutoff(5_000.0).unwrap();
    let seq = image.build_register_program_sequence(true);

    let mut chip = rhd2132_rom();
    let frames = play(&seq, &mut chip, 10, 64);
    image.ingest(&frames, 10, 64).unwrap();

    assert!(image.connected());
    let identity = image.chip_identity().unwrap();
    assert_eq!(identity.model, ChipModel::Rhd2132);
    assert_eq!(identity.amplifiers, 32);
    assert_eq!(identity.revision, 1);
    assert_eq!(identity.name, "RHD2132");
    assert!(image.to_string().starts_with("RHD2132 (rev=1, amps=32/32)"));
}

#[test]
fn ingest_reports_mismatched_register() {
    let mut image = RegisterImage::new(30_000);
    let seq = image.build_register_program_sequence(false);
    let mut chip = rhd2132_rom();
    let mut frames = play(&seq, &mut chip, 0, 32);
    // readback of register 8 arrives in frame 19 + 8
    let at = 32 * (19 + 8);
    frames[at] ^= 0x01;

    match image.ingest(&frames, 0, 32) {
        Err(ProtocolError::RegisterMismatch { register, .. }) => assert_eq!(register, 8),
        other => panic!("expected mismatch, got {:?}", other),
    }
    // a garbled line is not taken for a chip
    assert!(!image.connected());
    assert_eq!(image.chip_identity(), None);
    assert_eq!(image.to_string(), "no amplifier connected");
}

#[test]
fn ingest_ignores_foreign_registers() {
    let mut image = RegisterImage::new(30_000);
    let seq = image.build_register_program_sequence(false);
    let mut chip = rhd2132_rom();
    chip[3] = 0x1e;
    chip[6] = 0x00;
    let frames = play(&seq, &mut chip, 0, 32);
    assert!(image.ingest(&frames, 0, 32).is_ok());
}

#[test]
fn ingest_of_silent_line_is_not_connected() {
    let mut image = RegisterImage::new(30_000);
    let frames = vec![0xffu8; 32 * 60];
    image.ingest(&frames, 4, 32).unwrap();
    assert!(!image.connected());
    assert!(image.chip_identity().is_none());
}

#[test]
fn ingest_rejects_short_buffers() {
    let mut image = RegisterImage::new(30_000);
    let frames = vec![0u8; 32 * 40];
    assert!(matches!(
        image.ingest(&frames, 0, 32),
        Err(ProtocolError::ShortBuffer { .. })
    ));
}

#[test]
fn encoded_sequence_matches_commands() {
    let image = RegisterImage::new(30_000);
    let seq = image.build_register_program_sequence(false);
    let words = encode_sequence(&seq);
    assert_eq!(words[0], 0xff00);
    assert_eq!(words[2], 0x8000 | image.register(0) as u16);
}

/// Largest change in upper cutoff from moving both fine RH DACs one code.
fn upper_step(image: &RegisterImage) -> f64 {
    let (rh1, rh2) = (image.rh1(), image.rh2());
    let here = upper_cutoff_from_resistors(rh1, rh2);
    let up = upper_cutoff_from_resistors(rh1 + RH1_DAC1_UNIT, rh2 + RH2_DAC1_UNIT);
    let down = upper_cutoff_from_resistors(rh1 - RH1_DAC1_UNIT, rh2 - RH2_DAC1_UNIT);
    (up - here).abs().max((here - down).abs())
}

/// Largest change in lower cutoff from moving the fine RL DAC one code.
fn lower_step(image: &RegisterImage) -> f64 {
    let rl = image.rl();
    let here = lower_cutoff_from_resistor(rl);
    let up = lower_cutoff_from_resistor(rl + RL_DAC1_UNIT);
    let down = lower_cutoff_from_resistor(rl - RL_DAC1_UNIT);
    (up - here).abs().max((here - down).abs())
}

proptest! {
    #[test]
    fn upper_cutoff_round_trips(hz in 100.0f64..=30_000.0) {
        let mut image = RegisterImage::new(30_000);
        image.set_upper_cutoff(hz).unwrap();
        let back = image.upper_cutoff();
        let step = upper_step(&image);
        prop_assert!((back - hz).abs() <= step, "{} -> {} (step {})", hz, back, step);
    }

    #[test]
    fn lower_cutoff_round_trips(hz in 4.0f64..=1_500.0) {
        let mut image = RegisterImage::new(30_000);
        image.set_lower_cutoff(hz).unwrap();
        let back = image.lower_cutoff();
        let step = lower_step(&image);
        prop_assert!((back - hz).abs() <= step, "{} -> {} (step {})", hz, back, step);
    }

    // below 4 Hz the forward cubic and the inverse quadratic are separate fits
    #[test]
    fn lower_cutoff_tracks_the_fit_below_4_hz(hz in 0.3f64..4.0) {
        let mut image = RegisterImage::new(30_000);
        image.set_lower_cutoff(hz).unwrap();
        let back = image.lower_cutoff();
        prop_assert!((back - hz).abs() / hz < 0.2, "{} -> {}", hz, back);
    }

    #[test]
    fn positive_dsp_cutoff_enables_filter(hz in 1e-3f64..1e6, rate in 1_000u32..=30_000) {
        let mut image = RegisterImage::new(rate);
        image.set_dsp_cutoff(hz).unwrap();
        prop_assert!(image.dsp_enabled());
        let code = image.register(DSP_REG) & DSP_CUTOFF_MASK;
        prop_assert!((1..=15).contains(&code), "{} Hz -> code {}", hz, code);
    }
}
