//! LTE Downlink Receiver
//!
//! Command-line entry point: parses the radio configuration, assembles the
//! receive pipeline and drives it until the sample stream ends.

use anyhow::{anyhow, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use common::{ClockRef, Rbs};
use interfaces::device::Device;
use interfaces::file_device::FileDevice;
use layers::pipeline::{Pipeline, PipelineConfig};

/// LTE downlink receiver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Device address arguments
    #[arg(short, long, default_value = "")]
    args: String,

    /// Number of receive channels (1 or 2)
    #[arg(short, long, default_value_t = 1)]
    chans: usize,

    /// Downlink centre frequency in Hz
    #[arg(short, long, default_value_t = 1e9)]
    freq: f64,

    /// RF receive gain in dB
    #[arg(short, long, default_value_t = 50.0)]
    gain: f64,

    /// Frequency reference (internal, external, gps)
    #[arg(short = 'r', long = "ref", default_value = "internal")]
    clock_ref: String,

    /// Number of PDSCH decoding threads
    #[arg(short = 'j', long, default_value_t = 1)]
    threads: usize,

    /// Number of LTE resource blocks (0 = auto)
    #[arg(short = 'b', long = "rb", default_value_t = 0)]
    rbs: u32,

    /// Read samples from a capture file instead of a device
    #[arg(short = 'F', long)]
    file: Option<String>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

fn parse_clock_ref(s: &str) -> Result<ClockRef> {
    match s {
        "internal" => Ok(ClockRef::Internal),
        "external" => Ok(ClockRef::External),
        "gps" | "gpsdo" => Ok(ClockRef::Gps),
        other => Err(anyhow!("invalid frequency reference '{}'", other)),
    }
}

fn parse_rbs(rbs: u32, file_mode: bool) -> Result<Rbs> {
    // Device mode starts at the narrowest bandwidth and lets the MIB widen it
    if rbs == 0 && !file_mode {
        return Ok(Rbs::Rb6);
    }

    Rbs::from_count(rbs).ok_or_else(|| {
        anyhow!(
            "invalid resource block count {}\n\
             \n    LTE bandwidth      Resource Blocks\
             \n       1.4 MHz                 6\
             \n         3 MHz                15\
             \n         5 MHz                25\
             \n        10 MHz                50\
             \n        15 MHz                75\
             \n        20 MHz               100",
            rbs
        )
    })
}

fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = match &args.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    fmt().with_env_filter(env_filter).with_target(true).init();

    let clock = parse_clock_ref(&args.clock_ref)?;
    let rbs = parse_rbs(args.rbs, args.file.is_some())?;
    if args.chans == 0 || args.chans > 2 {
        return Err(anyhow!("invalid number of channels {}", args.chans));
    }

    info!("Starting LTE downlink receiver");
    info!("  Device args ............. \"{}\"", args.args);
    info!("  Capture file ............ \"{}\"", args.file.as_deref().unwrap_or(""));
    info!("  Downlink frequency ...... {:.6} GHz", args.freq / 1e9);
    info!("  Receive gain ............ {:.1} dB", args.gain);
    info!("  Receive channels ........ {}", args.chans);
    info!("  Frequency reference ..... {:?}", clock);
    info!("  Decoding threads ........ {}", args.threads);
    info!("  Resource blocks ......... {}", rbs.count());

    let device: Box<dyn Device> = match &args.file {
        Some(path) => Box::new(FileDevice::open(path, args.chans)?),
        None => {
            // Hardware streaming needs a vendor SDK backend linked into the
            // build; see interfaces::sdr::SdrDevice and the RadioBackend
            // trait it drives.
            return Err(anyhow!(
                "no vendor radio backend in this build; use --file to replay a capture"
            ));
        }
    };

    let config = PipelineConfig {
        chans: args.chans,
        rbs,
        freq: args.freq,
        gain: args.gain,
        decoder_threads: args.threads,
    };

    let pipeline = Pipeline::new(device, &config)?;
    pipeline.run()?;

    info!("Receiver stopped");
    Ok(())
}
