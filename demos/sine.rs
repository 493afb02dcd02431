use clap::Parser;
use ndarray::Array2;
use std::error::Error;
use std::f64::consts::TAU;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use aostream::AnalogOutput;
use aostream::Device;
use aostream::DeviceTrait;
use aostream::OutputConfig;

#[derive(Parser, Debug)]
#[clap(version)]
struct Args {
    /// Device Filter
    #[clap(short, long, default_value = "driver=dummy")]
    args: String,
    /// Output configuration
    #[clap(
        short,
        long,
        default_value = "channels=dummy/ao0;dummy/ao1, sample_rate=10000, buffer_size=4000"
    )]
    config: String,
    /// Sine frequency in Hz
    #[clap(short, long, default_value_t = 50.0)]
    frequency: f64,
    /// Peak voltage
    #[clap(long, default_value_t = 1.0)]
    amplitude: f64,
    /// Samples per channel and buffer
    #[clap(short, long, default_value_t = 1000)]
    block: usize,
    /// Stop after this many buffers, run until Ctrl-C otherwise
    #[clap(short = 'n', long)]
    blocks: Option<usize>,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Args::parse();

    let dev = Device::from_args(cli.args)?;
    let config: OutputConfig = cli.config.parse()?;
    println!("driver:      {:?}", dev.driver());
    println!("id:          {:?}", dev.id()?);
    println!("config:      {config:?}");

    let rate = config.timing.sample_rate;
    let channels = config.channels.len();
    let output = AnalogOutput::new(dev, config);

    let terminate = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler({
        let terminate = terminate.clone();
        move || {
            println!("terminating...");
            terminate.store(true, Ordering::Relaxed);
        }
    })
    .expect("Error setting Ctrl-C handler");

    // each channel is shifted by a quarter period
    let mut t0 = 0;
    let buffers = std::iter::from_fn(|| {
        if terminate.load(Ordering::Relaxed) {
            return None;
        }
        let b = Array2::from_shape_fn((channels, cli.block), |(ch, i)| {
            let t = (t0 + i) as f64 / rate;
            cli.amplitude * (TAU * cli.frequency * t + ch as f64 * TAU / 4.0).sin()
        });
        t0 += cli.block;
        Some(b)
    });

    let mut total = 0;
    let buffers: Box<dyn Iterator<Item = Array2<f64>>> = match cli.blocks {
        Some(n) => Box::new(buffers.take(n)),
        None => Box::new(buffers),
    };
    for b in output.process_iter(buffers) {
        total += b?.ncols();
    }
    println!("wrote {total} samples per channel");

    Ok(())
}
