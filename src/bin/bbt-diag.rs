//! `bbt-diag` — diagnostics CLI that drives [`beatcore::AudioCore`] against a
//! WAV fixture or a deterministic synthetic pattern and prints a summary of
//! the resulting control signal plus (optionally) the raw telemetry lines.
//!
//! Uses a clap subcommand shape and hound-backed WAV loading; there is no
//! HTTP-server/calibration/network subcommand since this crate has no
//! network surface.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;

use beatcore::clock::SystemClock;
use beatcore::config::CoreConfig;
use beatcore::intake::MAX_BLOCK_SAMPLES;
use beatcore::telemetry::TelemetrySink;
use beatcore::{AudioControl, AudioCore};

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.execute() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("bbt-diag error: {err}");
            ExitCode::FAILURE
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "bbt-diag",
    about = "Stream a WAV fixture or synthetic pattern through AudioCore and report the control signal"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn execute(self) -> Result<(), String> {
        match self.command {
            Command::Run(args) => run_command(args),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a fixture through the core and print a summary.
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    #[command(flatten)]
    source: SourceArgs,
    /// Frame rate the core is ticked at, Hz.
    #[arg(long, default_value_t = 60)]
    frame_rate_hz: u32,
    /// Output format for the telemetry stream.
    #[arg(long, value_enum, default_value_t = TelemetryFormat::Table)]
    telemetry_format: TelemetryFormat,
    /// Destination file for telemetry JSON lines (defaults to stdout summary only).
    #[arg(long)]
    telemetry_out: Option<PathBuf>,
    /// Path to a JSON configuration file (defaults to `CoreConfig::default()`).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct SourceArgs {
    /// Path to a mono 16-bit PCM WAV fixture.
    #[arg(long)]
    fixture: Option<PathBuf>,
    /// Deterministic synthetic pattern to generate instead of a fixture.
    #[arg(long, value_enum)]
    synthetic: Option<SyntheticPattern>,
    /// Sample rate for synthetic sources, and the rate assumed for playback
    /// pacing. WAV fixtures use their own embedded sample rate.
    #[arg(long, default_value_t = 16_000)]
    sample_rate: u32,
    /// Duration of synthetic sources, milliseconds.
    #[arg(long, default_value_t = 2_000)]
    duration_ms: u32,
    /// Tone frequency for the `sine` pattern, Hz.
    #[arg(long, default_value_t = 1_000.0)]
    frequency_hz: f32,
    /// Peak amplitude for synthetic sources (0..32767).
    #[arg(long, default_value_t = 20_000)]
    amplitude: i16,
    /// Period between impulses for the `impulse-train` pattern, milliseconds.
    #[arg(long, default_value_t = 500)]
    period_ms: u32,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum SyntheticPattern {
    Sine,
    ImpulseTrain,
    WhiteNoise,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum TelemetryFormat {
    Json,
    Table,
}

fn run_command(args: RunArgs) -> Result<(), String> {
    let (samples, sample_rate) = load_source(&args.source)?;
    let config = match &args.config {
        Some(path) => CoreConfig::load_from_file(path),
        None => CoreConfig::default(),
    };

    let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let mut core = AudioCore::new(sample_rate, config, Box::new(SystemClock::new()));
    core.set_telemetry_sink(Box::new(CollectingSink(lines.clone())));

    let dt = 1.0 / args.frame_rate_hz.max(1) as f32;
    let control = stream(&mut core, &samples, sample_rate, dt);

    let emitted = lines.lock().map_err(|_| "telemetry lock poisoned".to_string())?;
    match args.telemetry_out {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
            }
            std::fs::write(&path, emitted.join("\n")).map_err(|e| e.to_string())?;
        }
        None => match args.telemetry_format {
            TelemetryFormat::Json => {
                for line in emitted.iter() {
                    println!("{line}");
                }
            }
            TelemetryFormat::Table => {
                println!("emitted {} telemetry lines", emitted.len());
            }
        },
    }

    print_summary(&control, samples.len(), sample_rate);
    Ok(())
}

/// Feed `samples` through `core` in frame-sized chunks at the given frame
/// rate and return the final assembled control snapshot. Chunks larger than
/// [`MAX_BLOCK_SAMPLES`] are split across multiple `on_block` calls before
/// the frame's single `tick`, matching the producer's "blocks of up to 512
/// samples" contract.
fn stream(core: &mut AudioCore, samples: &[i16], sample_rate: u32, dt: f32) -> AudioControl {
    let frame_samples = ((sample_rate as f64) * dt as f64).round().max(1.0) as usize;
    let mut last = core.last_control();
    if samples.is_empty() {
        return core.tick(dt);
    }

    let mut idx = 0;
    while idx < samples.len() {
        let end = (idx + frame_samples).min(samples.len());
        for block in samples[idx..end].chunks(MAX_BLOCK_SAMPLES) {
            core.on_block(block);
        }
        last = core.tick(dt);
        idx = end;
    }
    last
}

struct CollectingSink(Arc<Mutex<Vec<String>>>);

impl TelemetrySink for CollectingSink {
    fn emit(&mut self, line: &str) {
        if let Ok(mut lines) = self.0.lock() {
            lines.push(line.to_string());
        }
    }
}

#[derive(Serialize)]
struct Summary {
    total_samples: usize,
    sample_rate: u32,
    level: f32,
    transient: f32,
    pulse: f32,
    bpm: f32,
    phase: f32,
    confidence: f32,
    active: bool,
    alive: bool,
}

fn print_summary(control: &AudioControl, total_samples: usize, sample_rate: u32) {
    let summary = Summary {
        total_samples,
        sample_rate,
        level: control.level,
        transient: control.transient,
        pulse: control.pulse,
        bpm: control.bpm,
        phase: control.phase,
        confidence: control.confidence,
        active: control.active,
        alive: control.alive,
    };
    match serde_json::to_string_pretty(&summary) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("bbt-diag: failed to serialize summary: {err}"),
    }
}

fn load_source(args: &SourceArgs) -> Result<(Vec<i16>, u32), String> {
    let selected = args.fixture.is_some() as u8 + args.synthetic.is_some() as u8;
    if selected != 1 {
        return Err("provide exactly one of --fixture or --synthetic".to_string());
    }

    if let Some(path) = &args.fixture {
        return load_wav(path);
    }

    let pattern = args.synthetic.expect("validated above");
    let samples = match pattern {
        SyntheticPattern::Sine => {
            generate_sine(args.sample_rate, args.duration_ms, args.frequency_hz, args.amplitude)
        }
        SyntheticPattern::ImpulseTrain => {
            generate_impulse_train(args.sample_rate, args.duration_ms, args.period_ms, args.amplitude)
        }
        SyntheticPattern::WhiteNoise => generate_white_noise(args.sample_rate, args.duration_ms, args.amplitude),
    };
    Ok((samples, args.sample_rate))
}

fn load_wav(path: &PathBuf) -> Result<(Vec<i16>, u32), String> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| format!("failed to open WAV fixture {}: {e}", path.display()))?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(format!("fixture {} has no channels", path.display()));
    }

    let samples: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i32>()
            .step_by(spec.channels as usize) // take the first (left) channel only
            .map(|s| s.map(|v| v as i16))
            .collect::<Result<_, _>>()
            .map_err(|e| format!("failed to decode WAV fixture {}: {e}", path.display()))?,
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .step_by(spec.channels as usize)
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<Result<_, _>>()
            .map_err(|e| format!("failed to decode WAV fixture {}: {e}", path.display()))?,
    };

    Ok((samples, spec.sample_rate))
}

fn generate_sine(sample_rate: u32, duration_ms: u32, frequency_hz: f32, amplitude: i16) -> Vec<i16> {
    let total = (sample_rate as u64 * duration_ms as u64 / 1000) as usize;
    (0..total)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let v = (2.0 * std::f32::consts::PI * frequency_hz * t).sin();
            (v * amplitude as f32) as i16
        })
        .collect()
}

fn generate_impulse_train(sample_rate: u32, duration_ms: u32, period_ms: u32, amplitude: i16) -> Vec<i16> {
    let total = (sample_rate as u64 * duration_ms as u64 / 1000) as usize;
    let mut signal = vec![0i16; total];
    let period_samples = (sample_rate as u64 * period_ms as u64 / 1000).max(1) as usize;
    let mut idx = 0;
    while idx < total {
        for offset in 0..16 {
            if idx + offset < total {
                signal[idx + offset] = amplitude;
            }
        }
        idx += period_samples;
    }
    signal
}

fn generate_white_noise(sample_rate: u32, duration_ms: u32, amplitude: i16) -> Vec<i16> {
    use rand::Rng;
    let total = (sample_rate as u64 * duration_ms as u64 / 1000) as usize;
    let mut rng = rand::thread_rng();
    (0..total)
        .map(|_| rng.gen_range(-amplitude..=amplitude))
        .collect()
}
