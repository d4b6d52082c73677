use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

use heat_index_forecast::backend::DeviceFitter;
use heat_index_forecast::config::Config;
use heat_index_forecast::hardware::HostCapabilities;
use heat_index_forecast::pipeline::{self, ForecastPipeline, RunOutcome};

#[derive(Parser, Debug)]
#[command(name = "heat_index_forecast")]
#[command(about = "Daily heat index cleaning, derivation and back-tested forecasting", long_about = None)]
struct Args {
    /// JSON configuration file; defaults apply when omitted
    #[arg(long, env = "HEAT_INDEX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Gap-fill the raw weather history
    Clean {
        #[arg(long)]
        raw: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Compute the daily heat index table from the cleaned history
    ComputeHeatIndex {
        #[arg(long)]
        weather: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Train the model and back-test it on the forecast horizon
    Predict {
        #[arg(long)]
        weather: Option<PathBuf>,
        #[arg(long)]
        heat_index: Option<PathBuf>,
        #[arg(long)]
        predictions: Option<PathBuf>,
        #[arg(long)]
        model: Option<PathBuf>,
        #[arg(long)]
        logs_dir: Option<PathBuf>,
        /// Days per city reserved for the back-test
        #[arg(long)]
        horizon_days: Option<i64>,
        /// Trailing days used for validation
        #[arg(long)]
        validation_days: Option<i64>,
        /// Skip accelerator discovery
        #[arg(long)]
        force_cpu: bool,
        /// Write the feature table as parquet into this directory
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path).with_context(|| format!("Failed to load config {:?}", path))?,
        None => Config::default(),
    };
    Ok(config.with_env_overrides()?)
}

fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("heat_index_forecast=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let mut config = load_config(args.config.as_ref())?;

    match args.command {
        Commands::Clean { raw, output } => {
            if let Some(raw) = raw {
                config.paths.raw_weather_history = raw;
            }
            if let Some(output) = output {
                config.paths.weather_history = output;
            }
            let rows = pipeline::clean_weather(&config)?;
            info!("Cleaned weather history: {} rows", rows);
        }
        Commands::ComputeHeatIndex { weather, output } => {
            if let Some(weather) = weather {
                config.paths.weather_history = weather;
            }
            if let Some(output) = output {
                config.paths.heat_index = output;
            }
            let summary = pipeline::compute_heat_index(&config)?;
            info!(
                "Heat index table: {} rows written, {} skipped",
                summary.written, summary.skipped
            );
        }
        Commands::Predict {
            weather,
            heat_index,
            predictions,
            model,
            logs_dir,
            horizon_days,
            validation_days,
            force_cpu,
            checkpoint_dir,
        } => {
            let paths = &mut config.paths;
            if let Some(p) = weather {
                paths.weather_history = p;
            }
            if let Some(p) = heat_index {
                paths.heat_index = p;
            }
            if let Some(p) = predictions {
                paths.predictions = p;
            }
            if let Some(p) = model {
                paths.model = p;
            }
            if let Some(p) = logs_dir {
                paths.logs_dir = p;
            }
            if checkpoint_dir.is_some() {
                paths.checkpoint_dir = checkpoint_dir;
            }
            if let Some(days) = horizon_days {
                config.features.forecast_horizon_days = days;
            }
            if let Some(days) = validation_days {
                config.features.validation_days = days;
            }
            config.accelerator.force_cpu |= force_cpu;
            config.validate()?;

            let host = HostCapabilities::detect(&config.accelerator);
            let fitter = DeviceFitter::new(config.accelerator.worker_command.clone());
            let report = ForecastPipeline::new(&config, host, &fitter).run()?;

            if report.fell_back {
                warn!(event = "cpu_fallback", "Run completed on the CPU fallback back-end");
            }
            match report.outcome {
                RunOutcome::Exported { rows, path } => {
                    info!("Forecast complete: {} rows written to {:?}", rows, path)
                }
                RunOutcome::EmptyForecast => {
                    warn!(event = "empty_forecast", "Forecast complete with no horizon rows")
                }
            }
        }
    }

    Ok(())
}
