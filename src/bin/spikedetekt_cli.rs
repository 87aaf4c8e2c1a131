use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use spikedetekt::source::write_dat;
use spikedetekt::synthetic::{GroundTruth, SyntheticRecording};
use spikedetekt::{
    init_logging, ChannelGraph, ChunkSource, DatSource, DetektConfig, JsonLinesSink, Pipeline,
    RunSummary, Threshold, VecSink, WavSource,
};

#[derive(Parser, Debug)]
#[command(
    name = "spikedetekt_cli",
    about = "Spike detection and feature extraction for multichannel recordings"
)]
struct Cli {
    /// Log at DEBUG instead of INFO
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct InputArgs {
    /// Recording to read (.wav, anything else is read as interleaved i16)
    #[arg(long)]
    input: PathBuf,
    /// Channel count of a raw .dat recording
    #[arg(long)]
    channels: Option<usize>,
    /// Sample rate of a raw .dat recording (defaults to the config value)
    #[arg(long)]
    sample_rate: Option<f64>,
    /// Factor applied to every raw integer sample
    #[arg(long, default_value_t = 1.0)]
    gain: f32,
    /// JSON configuration overriding the defaults
    #[arg(long)]
    config: Option<PathBuf>,
    /// JSON probe file (defaults to a linear probe)
    #[arg(long)]
    probe: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Detect spikes, write one JSON record per spike and print the run summary
    Detect {
        #[command(flatten)]
        input: InputArgs,
        /// JSON lines output (records are only counted when absent)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Estimate and print the detection thresholds
    Calibrate {
        #[command(flatten)]
        input: InputArgs,
    },
    /// Write a synthetic .dat recording and its ground truth
    Synth {
        #[arg(long)]
        output: PathBuf,
        /// Ground-truth JSON (defaults to <output>.truth.json)
        #[arg(long)]
        truth: Option<PathBuf>,
        #[arg(long, default_value_t = 4)]
        channels: usize,
        #[arg(long, default_value_t = 20_000.0)]
        sample_rate: f64,
        /// Recording length in seconds
        #[arg(long, default_value_t = 2.0)]
        duration: f64,
        /// Number of evenly spaced spikes
        #[arg(long, default_value_t = 10)]
        spikes: usize,
        /// Peak depth on the centre channel
        #[arg(long, default_value_t = 400.0)]
        amplitude: f32,
        #[arg(long, default_value_t = 10.0)]
        noise_std: f32,
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    });

    match cli.command {
        Commands::Detect { input, output } => run_detect(&input, output),
        Commands::Calibrate { input } => run_calibrate(&input),
        Commands::Synth {
            output,
            truth,
            channels,
            sample_rate,
            duration,
            spikes,
            amplitude,
            noise_std,
            seed,
        } => {
            if channels == 0 || !(duration > 0.0) {
                bail!("synth needs at least one channel and a positive duration");
            }
            let n_samples = (duration * sample_rate).round() as u64;
            let mut recording =
                SyntheticRecording::new(channels, n_samples, sample_rate).noise_std(noise_std);
            if let Some(seed) = seed {
                recording = recording.seed(seed);
            }
            for i in 0..spikes {
                let time = n_samples * (i as u64 + 1) / (spikes as u64 + 1);
                recording = recording.spike(time, spike_footprint(channels, i % channels, amplitude));
            }
            run_synth(recording, &output, truth)
        }
    }
}

/// Full depth on `centre`, half on its direct neighbours
fn spike_footprint(channels: usize, centre: usize, amplitude: f32) -> Vec<f32> {
    (0..channels)
        .map(|c| match c.abs_diff(centre) {
            0 => amplitude,
            1 => amplitude * 0.5,
            _ => 0.0,
        })
        .collect()
}

/// Source, configuration and probe of one input recording
fn open_input(
    input: &InputArgs,
) -> Result<(Box<dyn ChunkSource + Send>, DetektConfig, ChannelGraph)> {
    let mut config = match &input.config {
        Some(path) => DetektConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => DetektConfig::default(),
    };

    let source: Box<dyn ChunkSource + Send> = if is_wav(&input.input) {
        Box::new(
            WavSource::open(&input.input)
                .with_context(|| format!("opening {}", input.input.display()))?,
        )
    } else {
        let Some(channels) = input.channels else {
            bail!("--channels is required for raw recordings");
        };
        let sample_rate = input.sample_rate.unwrap_or(config.sample_rate);
        Box::new(
            DatSource::open(&input.input, channels, sample_rate, input.gain)
                .with_context(|| format!("opening {}", input.input.display()))?,
        )
    };
    config.sample_rate = source.sample_rate();

    let graph = match &input.probe {
        Some(path) => ChannelGraph::load_from_file(path)
            .with_context(|| format!("loading probe {}", path.display()))?,
        None => ChannelGraph::linear(source.n_channels()),
    };
    Ok((source, config, graph))
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
}

fn run_detect(input: &InputArgs, output: Option<PathBuf>) -> Result<ExitCode> {
    let (mut source, config, graph) = open_input(input)?;
    let pipeline = Pipeline::new(config, graph).context("building pipeline")?;

    let summary: RunSummary = match output {
        Some(path) => {
            let file =
                File::create(&path).with_context(|| format!("creating {}", path.display()))?;
            let mut sink = JsonLinesSink::new(BufWriter::new(file));
            pipeline
                .run(&mut *source, &mut sink)
                .context("running detection")?
        }
        None => {
            let mut sink = VecSink::new();
            pipeline
                .run(&mut *source, &mut sink)
                .context("running detection")?
        }
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(ExitCode::from(0))
}

fn run_calibrate(input: &InputArgs) -> Result<ExitCode> {
    let (mut source, config, graph) = open_input(input)?;
    let pipeline = Pipeline::new(config, graph).context("building pipeline")?;
    let threshold = pipeline
        .calibrate(&mut *source)
        .context("estimating thresholds")?;

    let report = CalibrationReport {
        n_channels: threshold.n_channels(),
        threshold: &threshold,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::from(0))
}

fn run_synth(recording: SyntheticRecording, output: &Path, truth: Option<PathBuf>) -> Result<ExitCode> {
    let synthetic = recording.build();
    write_dat(output, synthetic.source.samples(), 1.0)
        .with_context(|| format!("writing {}", output.display()))?;

    let truth_path = truth.unwrap_or_else(|| output.with_extension("truth.json"));
    write_truth(&truth_path, &synthetic.truth)?;

    println!(
        "Wrote {} samples x {} channels to {} ({} spikes, truth in {})",
        synthetic.truth.n_samples,
        synthetic.truth.n_channels,
        output.display(),
        synthetic.truth.spikes.len(),
        truth_path.display()
    );
    Ok(ExitCode::from(0))
}

fn write_truth(path: &Path, truth: &GroundTruth) -> Result<()> {
    let json = serde_json::to_string_pretty(truth)?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}

#[derive(Serialize)]
struct CalibrationReport<'a> {
    n_channels: usize,
    threshold: &'a Threshold,
}
