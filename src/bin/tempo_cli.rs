use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tempo_consensus::audio::{AudioSource, SyntheticSource, WavFileSource};
use tempo_consensus::config::{AppConfig, ConsensusPolicy};
use tempo_consensus::consensus::ConsensusResult;
use tempo_consensus::coordinator::{DetectionState, DetectorCoordinator};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "tempo_cli",
    about = "Stream audio through the multi-algorithm tempo detector"
)]
struct Cli {
    /// JSON configuration file (defaults are used when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Use the stateless baseline consensus instead of the robust engine
    #[arg(long, global = true)]
    baseline: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream a WAV file and print one JSON result per analysis cycle
    File {
        #[arg(long)]
        path: PathBuf,
        /// Playback speed relative to real time; 0 streams unpaced
        #[arg(long, default_value_t = 8.0)]
        speed: f32,
    },
    /// Stream a synthetic click track
    Synth {
        #[arg(long, default_value_t = 120.0)]
        bpm: f32,
        #[arg(long, default_value_t = 20.0)]
        seconds: f32,
        #[arg(long, default_value_t = 8.0)]
        speed: f32,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Print the default configuration as JSON
    DumpConfig,
}

fn main() -> ExitCode {
    init_tracing();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::default(),
    };
    if cli.baseline {
        config.consensus.policy = ConsensusPolicy::Baseline;
    }

    match cli.command {
        Commands::File { path, speed } => {
            let source = WavFileSource::open(&path)
                .with_context(|| format!("opening {}", path.display()))?
                .with_speed(speed);
            tracing::info!(
                "[CLI] {} ({:.1}s at {} Hz)",
                path.display(),
                source.duration_secs(),
                source.sample_rate()
            );
            config.detection.sample_rate = source.sample_rate();
            stream(config, Box::new(source))
        }
        Commands::Synth {
            bpm,
            seconds,
            speed,
            seed,
        } => {
            let source = SyntheticSource::new(config.detection.sample_rate, bpm, seconds)
                .with_seed(seed)
                .with_speed(speed);
            stream(config, Box::new(source))
        }
        Commands::DumpConfig => {
            println!("{}", serde_json::to_string_pretty(&AppConfig::default())?);
            Ok(ExitCode::from(0))
        }
    }
}

fn stream(config: AppConfig, source: Box<dyn AudioSource>) -> Result<ExitCode> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("creating tokio runtime")?;

    runtime.block_on(async move {
        let coordinator = DetectorCoordinator::new(config).context("invalid configuration")?;
        let mut results = coordinator.subscribe_results();
        coordinator.start(source)?;

        let completion = coordinator.wait_for_completion();
        tokio::pin!(completion);
        loop {
            tokio::select! {
                done = &mut completion => {
                    done?;
                    break;
                }
                received = results.recv() => match received {
                    Ok(result) => print_result(&result)?,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("[CLI] Output lagging, {} results lost", missed);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        while let Ok(result) = results.try_recv() {
            print_result(&result)?;
        }

        let failed = coordinator.state() == DetectionState::Error;
        coordinator.stop().await?;

        let stats = coordinator.stats();
        eprintln!("{}", serde_json::to_string(&stats)?);
        if failed {
            bail!("audio source failed during the session");
        }
        Ok(ExitCode::from(0))
    })
}

fn print_result(result: &ConsensusResult) -> Result<()> {
    println!("{}", serde_json::to_string(result)?);
    Ok(())
}
