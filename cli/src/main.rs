use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use hound::WavSpec;
use serde::Serialize;
use thiserror::Error;
use tonewave_core::{
    codec, CaptureConstraints, Modem, ModemConfig, ModemError, ModemEvent, RenderSink,
    SampleSpectrumSource, SpectralDetector, SpectrumSource, SymbolDecoder, ToneScheduler,
    TransmissionPlan,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Modem(#[from] ModemError),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Unsupported WAV format: {0}")]
    UnsupportedFormat(String),
}

#[derive(Parser)]
#[command(name = "tonewave")]
#[command(about = "Acoustic FSK modem for short text messages")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct ModemArgs {
    /// JSON modem configuration; missing fields take their defaults
    #[arg(long, value_name = "CONFIG.JSON")]
    config: Option<PathBuf>,

    /// Carrier for bit 0 in Hz (overrides the config file)
    #[arg(long)]
    base_frequency: Option<f32>,

    /// Offset of the bit 1 carrier in Hz (overrides the config file)
    #[arg(long)]
    frequency_shift: Option<f32>,

    /// Symbol duration in milliseconds (overrides the config file)
    #[arg(long)]
    symbol_ms: Option<f64>,
}

impl ModemArgs {
    fn load(&self) -> Result<ModemConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => serde_json::from_reader(File::open(path)?)?,
            None => ModemConfig::default(),
        };
        if let Some(base) = self.base_frequency {
            config.base_frequency = base;
        }
        if let Some(shift) = self.frequency_shift {
            config.frequency_shift = shift;
        }
        if let Some(symbol_ms) = self.symbol_ms {
            config.symbol_duration_ms = symbol_ms;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Transmit text into a WAV file
    Encode {
        /// Message to send (7-bit ASCII)
        text: String,

        /// Output WAV file
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        #[command(flatten)]
        modem: ModemArgs,
    },

    /// Decode a WAV file by stepping through it one polling interval at a time
    Decode {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// End of the first analysis window in milliseconds
        /// (default: one full window)
        #[arg(long)]
        offset_ms: Option<f64>,

        #[command(flatten)]
        modem: ModemArgs,
    },

    /// Play a WAV file into a listening modem in real time
    Listen {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// End of the first analysis window in milliseconds
        /// (default: one full window)
        #[arg(long)]
        offset_ms: Option<f64>,

        #[command(flatten)]
        modem: ModemArgs,
    },

    /// Print the bit stream and tone schedule for a message as JSON
    Plan {
        /// Message to plan (7-bit ASCII)
        text: String,

        #[command(flatten)]
        modem: ModemArgs,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Encode { text, output, modem } => {
            encode_command(&text, &output, &modem.load()?).await?
        }
        Commands::Decode {
            input,
            offset_ms,
            modem,
        } => decode_command(&input, offset_ms, &modem.load()?)?,
        Commands::Listen {
            input,
            offset_ms,
            modem,
        } => listen_command(&input, offset_ms, &modem.load()?).await?,
        Commands::Plan { text, modem } => plan_command(&text, &modem.load()?)?,
    }

    Ok(())
}

async fn encode_command(text: &str, output_path: &Path, config: &ModemConfig) -> Result<(), CliError> {
    let sink = RenderSink::new(config.sample_rate);
    let mut modem = Modem::new(config.clone())?;
    modem.attach_sink(Box::new(sink.clone()))?;

    let transmission = modem.transmit(text)?;
    println!(
        "Encoded {} chars as {} symbols ({:.3}s at {} bit/s)",
        text.chars().count(),
        transmission.plan().len(),
        transmission.plan().duration(),
        modem.status().bit_rate
    );
    tracing::debug!("waiting {:?} for transmission to resolve", transmission.resolves_after());
    transmission.finished().await;

    let samples = sink.render();
    write_wav(output_path, &samples, config.sample_rate)?;
    println!("Wrote {} samples to {}", samples.len(), output_path.display());
    Ok(())
}

fn decode_command(input_path: &Path, offset_ms: Option<f64>, config: &ModemConfig) -> Result<(), CliError> {
    let (samples, sample_rate) = read_wav(input_path)?;
    println!("Extracted {} samples", samples.len());

    let mut source = sample_source(samples, sample_rate, offset_ms, config);
    source.acquire(&CaptureConstraints::raw(config.bin_count))?;

    let detector = SpectralDetector::from_config(config);
    let mut decoder = SymbolDecoder::from_config(config);
    let mut text = String::new();
    let mut readings = 0usize;
    loop {
        let frame = match source.capture() {
            Ok(frame) => frame,
            Err(ModemError::StreamEnded) => break,
            Err(err) => return Err(err.into()),
        };
        let reading = detector.analyze(&frame);
        if let Some(reading) = &reading {
            readings += 1;
            tracing::debug!("{:.1} Hz at {:.1} dB", reading.frequency, reading.level_db);
        }
        text.extend(decoder.push(reading.as_ref()));
    }
    source.release();

    if !decoder.pending_bits().is_empty() {
        tracing::warn!(
            "dropped {} trailing bits: {}",
            decoder.pending_bits().len(),
            codec::format_bits(decoder.pending_bits())
        );
    }
    println!("Decoded {} chars from {} readings: {}", text.chars().count(), readings, text);
    Ok(())
}

async fn listen_command(input_path: &Path, offset_ms: Option<f64>, config: &ModemConfig) -> Result<(), CliError> {
    let (samples, sample_rate) = read_wav(input_path)?;
    let source = sample_source(samples, sample_rate, offset_ms, config);

    let mut modem = Modem::new(config.clone())?;
    let mut subscription = modem.subscribe();
    modem.listen(Box::new(source))?;
    tracing::info!("listening to {}", input_path.display());

    let mut text = String::new();
    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            event = subscription.events.recv() => match event {
                Some(ModemEvent::Message(chunk)) => {
                    print!("{}", chunk);
                    stdout.flush()?;
                    text.push_str(&chunk);
                }
                Some(ModemEvent::Frequency(reading)) => {
                    tracing::debug!("{:.1} Hz at {:.1} dB", reading.frequency, reading.level_db);
                }
                Some(ModemEvent::Error(ModemError::StreamEnded)) | None => break,
                Some(ModemEvent::Error(err)) => tracing::warn!("receiver error: {}", err),
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }
    modem.stop();
    println!();
    println!("Received {} chars: {}", text.chars().count(), text);
    Ok(())
}

#[derive(Serialize)]
struct PlanReport<'a> {
    text: &'a str,
    bits: String,
    bit_rate: f64,
    plan: TransmissionPlan,
}

fn plan_command(text: &str, config: &ModemConfig) -> Result<(), CliError> {
    let scheduler = ToneScheduler::new(config);
    let bits = codec::encode(text)?;
    let report = PlanReport {
        text,
        bits: codec::format_bits(&bits),
        bit_rate: scheduler.bit_rate(),
        plan: scheduler.plan(&bits, 0.0),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Step through the file one polling interval per capture
fn sample_source(
    samples: Vec<f32>,
    sample_rate: u32,
    offset_ms: Option<f64>,
    config: &ModemConfig,
) -> SampleSpectrumSource {
    let hop = (config.poll_interval().as_secs_f64() * sample_rate as f64).round() as usize;
    let offset = match offset_ms {
        Some(ms) => (ms / 1000.0 * sample_rate as f64).round().max(0.0) as usize,
        None => config.bin_count * 2,
    };
    SampleSpectrumSource::new(samples, sample_rate, hop).with_offset(offset)
}

fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), CliError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::new(File::create(path)?, spec)?;
    for &sample in samples {
        // Clamp to [-1.0, 1.0] range to avoid overflow, then scale to i16
        let clamped = sample.clamp(-1.0, 1.0);
        writer.write_sample((clamped * 32767.0) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Read a WAV file as mono f32, keeping the first channel.
fn read_wav(path: &Path) -> Result<(Vec<f32>, u32), CliError> {
    let mut reader = hound::WavReader::new(File::open(path)?)?;
    let spec = reader.spec();
    tracing::info!(
        "read WAV: {} Hz, {} channels, {} bits",
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample
    );

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|s| s as f32 / 32768.0))
            .collect::<Result<_, _>>()?,
        (hound::SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
        (format, bits) => {
            return Err(CliError::UnsupportedFormat(format!("{:?} at {} bits", format, bits)));
        }
    };

    let channels = spec.channels.max(1) as usize;
    let samples = interleaved.into_iter().step_by(channels).collect();
    Ok((samples, spec.sample_rate))
}
