use std::error::Error;

use clap::{Parser, ValueEnum};
use rhd_sensor::rhd2000::{encode_sequence, RegisterImage};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Sequence {
    /// Register program with readback
    Program,
    /// Register program followed by ADC calibration
    Calibrate,
    /// Aux input, temperature and supply sampling
    Aux,
    /// Impedance-check DAC sine
    Dac,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Print RHD2000 command sequences", long_about = None)]
struct Args {
    #[arg(value_enum, default_value_t = Sequence::Program)]
    sequence: Sequence,

    /// Sample rate in Hz
    #[arg(long, default_value_t = 30_000)]
    sample_rate: u32,

    /// Analog upper cutoff in Hz
    #[arg(long, default_value_t = 7_500.0)]
    upper: f64,

    /// Analog lower cutoff in Hz
    #[arg(long, default_value_t = 1.0)]
    lower: f64,

    /// DSP offset-removal cutoff in Hz, 0 disables it
    #[arg(long, default_value_t = 1.0)]
    dsp: f64,

    /// DAC sine frequency in Hz
    #[arg(long, default_value_t = 1_000.0)]
    dac_hz: f64,

    /// Print raw command words as well
    #[arg(long)]
    raw: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let mut image = RegisterImage::new(args.sample_rate);
    image.set_upper_cutoff(args.upper)?;
    image.set_lower_cutoff(args.lower)?;
    image.set_dsp_cutoff(args.dsp)?;

    let commands = match args.sequence {
        Sequence::Program => image.build_register_program_sequence(false),
        Sequence::Calibrate => image.build_register_program_sequence(true),
        Sequence::Aux => image.build_aux_sample_sequence(),
        Sequence::Dac => {
            // one full period of the sine, as long as it fits a bank
            let len = (f64::from(args.sample_rate) / args.dac_hz).round().max(1.0) as usize;
            let values: Vec<f64> = (0..len)
                .map(|t| 128.0 * (2.0 * std::f64::consts::PI * t as f64 / len as f64).sin())
                .collect();
            image.build_dac_sequence(&values)?
        }
    };

    println!("# {:?} at {} Hz", args.sequence, args.sample_rate);
    let words = encode_sequence(&commands);
    for (i, (command, word)) in commands.iter().zip(words).enumerate() {
        if args.raw {
            println!("{:4} {:#06x} {}", i, word, command);
        } else {
            println!("{:4} {}", i, command);
        }
    }
    Ok(())
}
