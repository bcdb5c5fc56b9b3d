//! CLI Entry Point for counter_daq
//!
//! Provides command-line access to a configured frequency counter:
//! - `identify`: print the instrument identity
//! - `freq` / `period`: single-shot reads on the `ch<N>` channels given
//! - `time-interval`: buffered acquisition into a data file, Ctrl+C stops it
//!
//! # Usage
//!
//! ```bash
//! counter_daq --config config/counter_daq.toml identify
//! counter_daq freq "ch1:1 coup:ac"
//! counter_daq time-interval --cfg "ref:A sampl:1000 tstamp:Y coup:dc imp:50"
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use counter_daq::acquisition::TimeIntervalRun;
use counter_daq::config::{AppConfig, DEFAULT_CONFIG_PATH};
use counter_daq::instrument::{ChannelReading, CounterRegistry};
use counter_daq::session::InstrumentSession;
use counter_daq::shutdown::stop_channel;
use counter_daq::tracing_setup;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "counter_daq")]
#[command(about = "Frequency counter/timer acquisition", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the instrument identity
    Identify,

    /// Single-shot frequency of the given channels
    Freq {
        /// Configuration string, e.g. "ch1:1 ch2:1 coup:ac"
        cfg: String,
    },

    /// Single-shot period of the given channels
    Period {
        /// Configuration string, e.g. "ch1:1"
        cfg: String,
    },

    /// Time-interval acquisition into a data file
    TimeInterval {
        /// Overrides acquisition.time_interval
        #[arg(long)]
        cfg: Option<String>,

        /// Overrides the persistence output file
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.application.log_level = level;
    }
    if let Commands::TimeInterval { cfg: Some(cfg), .. } = &cli.command {
        config.acquisition.time_interval = cfg.clone();
    }
    config.validate().context("invalid configuration")?;
    tracing_setup::init_from_config(&config)?;

    let registry = CounterRegistry::with_builtin();
    let mut session = InstrumentSession::open(
        &registry,
        config.instrument.model,
        config.descriptor(),
        config.driver_options(),
    )
    .await
    .with_context(|| format!("opening {} at {}", config.instrument.model, config.instrument.address))?;
    println!("🔌 {}", session.info());

    let result = run_command(&mut session, &config, cli.command).await;
    session.close().await?;
    result
}

async fn run_command(
    session: &mut InstrumentSession,
    config: &AppConfig,
    command: Commands,
) -> Result<()> {
    if let Some(trigger) = &config.instrument.trigger {
        session.trig_level(trigger).await?;
    }
    if let Some(system) = &config.instrument.trigger_system {
        session.configure_trigger(system).await?;
    }

    match command {
        Commands::Identify => {
            println!("{}", session.identify().await?);
        }
        Commands::Freq { cfg } => print_readings("Hz", &session.freq(&cfg).await?),
        Commands::Period { cfg } => print_readings("s", &session.period(&cfg).await?),
        Commands::TimeInterval { output, .. } => {
            let mut run = TimeIntervalRun::from_config(config);
            if let Some(output) = output {
                run = run.with_output_path(output);
            }

            let (stop, signal) = stop_channel();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Ctrl+C received, stopping acquisition");
                    stop.stop();
                }
            });

            println!("📊 Writing to {} - Press Ctrl+C to stop", run.output_path().display());
            let summary = run.execute(session, signal).await?;
            println!(
                "✅ {} samples, {} lines written to {} in {:.1} s{}",
                summary.samples,
                summary.lines_written,
                summary.output_path.display(),
                summary.elapsed.as_secs_f64(),
                if summary.stopped { " (stopped)" } else { "" }
            );
        }
    }
    Ok(())
}

fn print_readings(unit: &str, readings: &[ChannelReading]) {
    for reading in readings {
        println!("ch{}: {:e} {unit}", reading.channel, reading.value);
    }
}
