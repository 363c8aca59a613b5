//! Minstrel CLI Application

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use minstrel_core::domain::config::{ConfigManager, EqConfig};
use minstrel_core::domain::{AudioBuffer, ResponseCurveSampler};
use minstrel_infra::realtime::create_engine;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "minstrel")]
#[command(about = "A parametric equalizer engine", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to ~/.config/minstrel/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the estimated response curve of the configured bands
    Curve {
        /// Number of log-spaced points
        #[arg(short, long)]
        points: Option<usize>,

        /// Also print the exact response of the realized filters
        #[arg(long)]
        exact: bool,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List the configured bands
    Bands,

    /// Run a test tone through the engine and report what the analyzer saw
    Analyze {
        /// Tone frequency in Hz
        #[arg(short, long, default_value_t = 1000.0)]
        frequency: f32,

        /// Tone amplitude, linear
        #[arg(short, long, default_value_t = 0.5)]
        amplitude: f32,

        /// Length of the tone in seconds
        #[arg(short, long, default_value_t = 1.0)]
        seconds: f32,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Manage saved band presets
    Preset {
        #[command(subcommand)]
        action: PresetAction,
    },

    /// Write the factory default configuration
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum PresetAction {
    /// List saved presets
    List,
    /// Save the current configuration as a preset
    Save { name: String },
    /// Replace the current configuration with a preset
    Load { name: String },
    /// Delete a preset
    Delete { name: String },
}

#[derive(Serialize)]
struct AnalyzeReport {
    tone_hz: f32,
    peak_bin: usize,
    peak_hz: f32,
    peak_db: f32,
    gain_db: f32,
    dropped_frames: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Curve {
            points,
            exact,
            json,
        } => {
            let config = load_config(cli.config.as_ref()).await?;
            print_curve(&config, points, exact, json)
        }
        Command::Bands => {
            let config = load_config(cli.config.as_ref()).await?;
            print_bands(&config);
            Ok(())
        }
        Command::Analyze {
            frequency,
            amplitude,
            seconds,
            json,
        } => {
            let config = load_config(cli.config.as_ref()).await?;
            let report = analyze(&config, frequency, amplitude, seconds).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Tone:     {:.1} Hz", report.tone_hz);
                println!(
                    "Peak:     bin {} ({:.1} Hz) at {:.1} dB",
                    report.peak_bin, report.peak_hz, report.peak_db
                );
                println!("EQ gain:  {:+.2} dB", report.gain_db);
                if report.dropped_frames > 0 {
                    println!("Dropped:  {} spectrum frames", report.dropped_frames);
                }
            }
            Ok(())
        }
        Command::Preset { action } => preset(cli.config, action).await,
        Command::InitConfig { force } => init_config(cli.config, force).await,
    }
}

async fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EqConfig> {
    match path {
        Some(path) => EqConfig::load_from_file(path)
            .await
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(ConfigManager::with_default_dir()?.load().await),
    }
}

fn print_curve(config: &EqConfig, points: Option<usize>, exact: bool, json: bool) -> anyhow::Result<()> {
    let chain = config.to_chain();
    let sampler = ResponseCurveSampler::new(points.unwrap_or(config.engine.curve_points));
    let curve = sampler.sample(&chain);

    if json {
        println!("{}", serde_json::to_string_pretty(&curve)?);
        return Ok(());
    }

    for point in curve.iter() {
        if exact {
            println!(
                "{:>10.1} Hz {:>8.2} dB {:>8.2} dB",
                point.frequency_hz,
                point.gain_db,
                chain.exact_response_db(point.frequency_hz)
            );
        } else {
            println!("{:>10.1} Hz {:>8.2} dB", point.frequency_hz, point.gain_db);
        }
    }
    Ok(())
}

fn print_bands(config: &EqConfig) {
    for (i, band) in config.bands.iter().enumerate() {
        let gain = if band.kind.uses_gain() {
            format!("{:>6.1} dB", band.gain_db)
        } else {
            format!("{:>9}", "-")
        };
        println!(
            "{:>2}. {:<10} {:>8.1} Hz {}  Q {:.2}",
            i + 1,
            band.kind.name(),
            band.frequency_hz,
            gain,
            band.q
        );
    }
}

async fn analyze(config: &EqConfig, frequency: f32, amplitude: f32, seconds: f32) -> anyhow::Result<AnalyzeReport> {
    if !(seconds.is_finite() && seconds > 0.0) {
        bail!("tone length must be positive");
    }

    let (mut controller, mut processor) = create_engine(config)?;
    let spec = config.engine.process_spec();
    let sample_rate = spec.sample_rate;
    let total_frames = (f64::from(seconds) * sample_rate) as usize;

    info!(frequency, seconds, "Running test tone");

    let audio = std::thread::spawn(move || {
        let mut buffer = AudioBuffer::new(spec.num_channels, spec.max_block_size);
        let mut input_energy = 0.0f64;
        let mut output_energy = 0.0f64;
        let mut position = 0;

        while position < total_frames {
            let frames = spec.max_block_size.min(total_frames - position);
            buffer.set_num_frames(frames);
            for ch in 0..spec.num_channels {
                for (i, sample) in buffer.channel_mut(ch).iter_mut().enumerate() {
                    let t = (position + i) as f64 / sample_rate;
                    *sample = amplitude * (2.0 * std::f64::consts::PI * f64::from(frequency) * t).sin() as f32;
                }
            }
            input_energy += buffer.channel(0).iter().map(|&s| f64::from(s * s)).sum::<f64>();

            processor.process(&mut buffer);

            output_energy += buffer.channel(0).iter().map(|&s| f64::from(s * s)).sum::<f64>();
            position += frames;
        }

        (input_energy, output_energy)
    });

    let mut ticker = tokio::time::interval(config.engine.refresh_interval());
    while !audio.is_finished() {
        ticker.tick().await;
        let refresh = controller.refresh();
        debug!(?refresh, "Refresh");
    }
    let (input_energy, output_energy) = audio
        .join()
        .map_err(|_| anyhow!("audio thread panicked"))?;
    controller.refresh();

    let spectrum = controller
        .spectrum(0)
        .ok_or_else(|| anyhow!("no spectrum for channel 0"))?;
    let fft_size = (spectrum.len().saturating_sub(1) * 2).max(1);
    let peak_bin = spectrum
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(bin, _)| bin)
        .unwrap_or(0);
    let peak = controller.magnitude_for_bin(0, peak_bin);

    Ok(AnalyzeReport {
        tone_hz: frequency,
        peak_bin,
        peak_hz: (peak_bin as f64 * sample_rate / fft_size as f64) as f32,
        peak_db: 20.0 * peak.max(1.0e-5).log10(),
        gain_db: if input_energy > 0.0 && output_energy > 0.0 {
            (10.0 * (output_energy / input_energy).log10()) as f32
        } else {
            0.0
        },
        dropped_frames: controller.dropped_spectrum_frames(),
    })
}

/// Manager rooted next to `--config` when given
fn config_manager(path: Option<&PathBuf>) -> anyhow::Result<ConfigManager> {
    match path.and_then(|p| p.parent()) {
        Some(dir) => Ok(ConfigManager::new(dir.to_path_buf())),
        None => Ok(ConfigManager::with_default_dir()?),
    }
}

async fn preset(path: Option<PathBuf>, action: PresetAction) -> anyhow::Result<()> {
    let presets = config_manager(path.as_ref())?.preset_manager();

    match action {
        PresetAction::List => {
            for name in presets.list_presets().await? {
                println!("{name}");
            }
        }
        PresetAction::Save { name } => {
            let config = load_config(path.as_ref()).await?;
            presets.save_preset(&name, &config).await?;
            info!(%name, "Preset saved");
        }
        PresetAction::Load { name } => {
            let config = presets.load_preset(&name).await?;
            match path {
                Some(path) => config.save_to_file(&path).await?,
                None => ConfigManager::with_default_dir()?.save(&config).await?,
            }
            info!(%name, "Preset loaded");
        }
        PresetAction::Delete { name } => {
            presets.delete_preset(&name).await?;
        }
    }
    Ok(())
}

async fn init_config(path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = match path {
        Some(path) => path,
        None => ConfigManager::with_default_dir()?.config_path().to_path_buf(),
    };

    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    EqConfig::factory_default().save_to_file(&path).await?;
    println!("Wrote {}", path.display());
    Ok(())
}
