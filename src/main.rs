mod audio;
mod capture;
mod config;
mod error;
mod playback;
mod recordings;
mod shutdown;

use crate::audio::{AudioSource, InputStream, OutputStream, list_input_devices};
use crate::capture::{SegmentCapture, SystemClock, run_capture};
use crate::config::{
    DEFAULT_CHUNK_FRAMES, DEFAULT_OUTPUT_DIR, DEFAULT_POST_ROLL_SECS, DEFAULT_PRE_ROLL_SECS,
    DEFAULT_THRESHOLD_DB, MAX_CHUNK_FRAMES, MAX_ROLL_SECS, PlaybackConfig, RecorderConfig,
};
use crate::error::{ErrorClass, SnoopError};
use crate::playback::play_recordings;
use crate::recordings::{DateSelector, ensure_directory, find_recordings, inspect_recording};
use crate::shutdown::Shutdown;
use clap::builder::RangedU64ValueParser;
use clap::{Parser, Subcommand, value_parser};
use jiff::Zoned;
use log::info;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Records sounds louder than a threshold and plays them back.
///
/// Threshold is a number on a dB scale; around 40-50 works well for a quiet
/// room. Use Ctrl-C to exit.
#[derive(Parser)]
#[command(name = "snoopy")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for sounds louder than threshold and record
    Listen {
        /// Threshold for sound detection (dB)
        #[arg(default_value_t = DEFAULT_THRESHOLD_DB)]
        threshold: f64,

        /// Output directory
        #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
        outdir: PathBuf,

        /// Input device name (see `snoopy devices`)
        #[arg(long)]
        device: Option<String>,

        /// Frames per buffer read from the device
        #[arg(
            long,
            default_value_t = DEFAULT_CHUNK_FRAMES,
            value_parser = RangedU64ValueParser::<usize>::new().range(1..=MAX_CHUNK_FRAMES as u64)
        )]
        chunk_frames: usize,

        /// Seconds of audio kept from before the sound started
        #[arg(
            long,
            default_value_t = DEFAULT_PRE_ROLL_SECS,
            value_parser = value_parser!(u32).range(0..=i64::from(MAX_ROLL_SECS))
        )]
        pre_roll: u32,

        /// Seconds of quiet before a recording is closed
        #[arg(
            long,
            default_value_t = DEFAULT_POST_ROLL_SECS,
            value_parser = value_parser!(u32).range(0..=i64::from(MAX_ROLL_SECS))
        )]
        post_roll: u32,
    },

    /// Play recorded files
    Play {
        /// Directory with recorded files
        #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
        outdir: PathBuf,

        /// Date files were recorded: today, yesterday, all or YYYY-MM-DD
        #[arg(short, long, default_value = "today")]
        datestring: DateSelector,

        /// Output device name
        #[arg(long)]
        device: Option<String>,
    },

    /// List recorded files without playing them
    List {
        /// Directory with recorded files
        #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
        outdir: PathBuf,

        /// Date files were recorded: today, yesterday, all or YYYY-MM-DD
        #[arg(short, long, default_value = "all")]
        datestring: DateSelector,
    },

    /// List available audio recording devices
    Devices {
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum OutputFormat {
    Text,
    Json,
}

fn listen(config: &RecorderConfig, shutdown: &Shutdown) -> Result<(), SnoopError> {
    ensure_directory(&config.output_dir)?;

    let mut source =
        InputStream::open(config.device.as_deref(), config.chunk_frames, shutdown.clone())?;
    let format = source.format();
    let windows = config.windows(format.sample_rate);
    info!(
        "Threshold {} dB, pre-roll {} buffers, post-roll {} buffers",
        config.threshold_db, windows.pre_roll, windows.post_roll
    );

    let mut capture = SegmentCapture::new(config, format, windows, SystemClock);
    println!("Listening... (Ctrl-C to exit)");
    let result = run_capture(&mut source, &mut capture, shutdown);
    println!("Closing...");

    let summary = result?;
    info!(
        "Captured {} buffers, {} segment(s), {} overrun(s)",
        summary.chunks,
        summary.segments.len(),
        summary.overruns
    );
    Ok(())
}

fn play(config: &PlaybackConfig, shutdown: &Shutdown) -> Result<(), SnoopError> {
    let today = Zoned::now().date();
    let recordings = find_recordings(&config.output_dir, &config.selector, today)?;
    if recordings.is_empty() {
        println!("No recordings found in {}", config.output_dir.display());
        return Ok(());
    }

    let played = play_recordings(&recordings, config.chunk_frames, shutdown, |format| {
        OutputStream::open(config.device.as_deref(), format, shutdown.clone())
    })?;
    println!("Closing...");
    info!("Played {} of {} file(s)", played, recordings.len());
    Ok(())
}

fn list(outdir: &Path, selector: &DateSelector) -> Result<(), SnoopError> {
    let today = Zoned::now().date();
    let recordings = find_recordings(outdir, selector, today)?;

    println!("{:<40} {:>10} Format", "File", "Duration");
    println!("{}", "-".repeat(80));
    for path in &recordings {
        let info = inspect_recording(path)?;
        let name = info
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!(
            "{:<40} {:>9.1}s {}",
            name,
            info.duration.as_secs_f32(),
            info.format
        );
    }
    println!("\n{} recording(s)", recordings.len());
    Ok(())
}

fn devices(format: OutputFormat) -> anyhow::Result<()> {
    let devices = list_input_devices()?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&devices)?);
        }
        OutputFormat::Text => {
            println!("Available Audio Devices:");
            println!(
                "{:<30} {:<10} {:<10} {:<12} Formats",
                "Name", "Default", "Channels", "Sample Rate"
            );
            println!("{}", "-".repeat(80));

            for device in devices {
                let default_str = if device.is_default { "YES" } else { "NO" };
                let channels = device
                    .default_channels
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let sample_rate = device
                    .default_sample_rate
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "-".to_string());

                println!(
                    "{:<30} {:<10} {:<10} {:<12} {}",
                    device.name.chars().take(30).collect::<String>(),
                    default_str,
                    channels,
                    sample_rate,
                    device.supported_formats.join(", ")
                );
            }
        }
    }

    Ok(())
}

/// Print a failure the way its class calls for
fn report(error: &SnoopError) {
    match error.class() {
        ErrorClass::Configuration => println!("{}", error),
        ErrorClass::Io => eprintln!("Error: {}", error),
        ErrorClass::Unexpected => {
            eprintln!("ERROR, UNEXPECTED FAILURE");
            eprintln!("{}", error);
        }
    }
    log::debug!("{:?}", error);
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("snoopy=info"))
        .init();

    let cli = Cli::parse();

    let shutdown = match Shutdown::install() {
        Ok(shutdown) => shutdown,
        Err(e) => {
            eprintln!("Failed to install interrupt handler: {}", e);
            return ExitCode::from(ErrorClass::Io.exit_code());
        }
    };

    let result = match cli.command {
        Commands::Listen {
            threshold,
            outdir,
            device,
            chunk_frames,
            pre_roll,
            post_roll,
        } => {
            let config = RecorderConfig {
                threshold_db: threshold,
                output_dir: outdir,
                device,
                chunk_frames,
                pre_roll_secs: pre_roll,
                post_roll_secs: post_roll,
            };
            listen(&config, &shutdown)
        }

        Commands::Play {
            outdir,
            datestring,
            device,
        } => {
            let config = PlaybackConfig {
                output_dir: outdir,
                selector: datestring,
                device,
                chunk_frames: DEFAULT_CHUNK_FRAMES,
            };
            play(&config, &shutdown)
        }

        Commands::List { outdir, datestring } => list(&outdir, &datestring),

        Commands::Devices { format } => {
            return match devices(format) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("Failed to list audio devices: {:#}", e);
                    ExitCode::from(ErrorClass::Io.exit_code())
                }
            };
        }
    };

    match result {
        Ok(()) => {
            if shutdown.requested() {
                println!("\nUser interrupt detected. Exiting...");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            report(&e);
            ExitCode::from(e.exit_code())
        }
    }
}
