//! CLI entry point for the urban indicator pipeline.
//!
//! Provides subcommands for the full run (ingest, model, write outputs),
//! generating synthetic input, and running a single model on a CSV.

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use urban_indicators::{
    anomaly::detect,
    config::PipelineConfig,
    forecast::forecast,
    ingest::{
        self, Ingested, OpenAqSource, fetch_for_cities, load_observations_csv,
        load_or_simulate_traffic, simulate::simulate_pollution_for,
    },
    output::{self, print_json, print_pretty},
    pipeline::{self, align_pollution, run_did},
    processing::FillMethod,
    types::{Provenance, SeriesProvenance},
};

#[derive(Parser)]
#[command(name = "urban_indicators")]
#[command(about = "Monthly air-quality and transport indicators with causal, forecast and anomaly models", long_about = None)]
struct Cli {
    /// JSON config file; missing keys take defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the treated city
    #[arg(long, global = true)]
    treated: Option<String>,

    /// Override the intervention date (YYYY-MM-DD)
    #[arg(long, global = true)]
    intervention: Option<NaiveDate>,

    /// Override the interior gap interpolation method
    #[arg(long, global = true, value_enum)]
    fill_method: Option<FillMethod>,

    /// Override the forecast horizon in months
    #[arg(long, global = true)]
    horizon: Option<usize>,

    /// Override the output directory
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest, run every model and write all output tables
    Run {
        /// Read observations from this CSV instead of the OpenAQ API
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Traffic CSV; simulated when absent
        #[arg(short, long)]
        traffic: Option<PathBuf>,

        /// Skip the API and simulate every city
        #[arg(long, default_value_t = false)]
        offline: bool,

        /// Gzip CSV outputs
        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
    /// Write a synthetic observation CSV for the configured cities
    Simulate {
        #[arg(value_name = "FILE")]
        output: PathBuf,

        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Difference-in-differences on an observation CSV
    Did {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
    /// Per-city forecasts from an observation CSV
    Forecast {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
    /// Per-city anomaly flags from an observation CSV
    Anomalies {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Expected anomalous share per city
        #[arg(long)]
        contamination: Option<f64>,

        /// Print only flagged months
        #[arg(long, default_value_t = false)]
        only_flagged: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/urban_indicators.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("urban_indicators.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let mut config = build_config(&cli)?;

    match cli.command {
        Commands::Run {
            input,
            traffic,
            offline,
            gzip,
        } => {
            config.gzip |= gzip;
            run_pipeline(&config, input.as_deref(), traffic.as_deref(), offline).await?;
        }
        Commands::Simulate { output, seed } => {
            let observations = simulate_pollution_for(
                &config.all_cities(),
                config.start_date,
                config.end_date,
                seed,
            );
            let written = output::write_observations(&output, &observations, false)?;
            info!(
                path = %written.display(),
                rows = observations.len(),
                "synthetic observations written"
            );
        }
        Commands::Did { input } => {
            let pollution = align_pollution(&config, &load_observations_csv(&input)?);
            let result = run_did(&config, &pollution);
            eprintln!("{}", result.summary);
            print_json(&result)?;
        }
        Commands::Forecast { input } => {
            let pollution = align_pollution(&config, &load_observations_csv(&input)?);
            print_json(&forecast(&pollution, config.forecast_horizon))?;
        }
        Commands::Anomalies {
            input,
            contamination,
            only_flagged,
        } => {
            if let Some(c) = contamination {
                config.anomaly.contamination = c;
                config.validate()?;
            }
            let pollution = align_pollution(&config, &load_observations_csv(&input)?);
            let mut flags = detect(&pollution, &config.anomaly);
            if only_flagged {
                flags.retain(|f| f.is_anomaly);
            }
            print_json(&flags)?;
        }
    }

    Ok(())
}

/// Config file (or defaults) with CLI overrides applied, then validated.
fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(&path.to_string_lossy())?,
        None => PipelineConfig::default(),
    };
    if let Some(city) = &cli.treated {
        config = config.with_treated(city);
    }
    if let Some(date) = cli.intervention {
        config.intervention_date = date;
    }
    if let Some(method) = cli.fill_method {
        config.fill_method = method;
    }
    if let Some(h) = cli.horizon {
        config.forecast_horizon = h;
    }
    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Observations from a CSV, a fully simulated run, or the OpenAQ API with
/// per-city fallback.
#[tracing::instrument(skip(config))]
async fn ingest_observations(
    config: &PipelineConfig,
    input: Option<&Path>,
    offline: bool,
) -> Result<Ingested> {
    if let Some(path) = input {
        let observations = load_observations_csv(path)?;
        let provenance = ingest::provenance_of(&observations);
        return Ok(Ingested {
            observations,
            provenance,
        });
    }

    if offline {
        let cities = config.all_cities();
        let observations = simulate_pollution_for(
            &cities,
            config.start_date,
            config.end_date,
            config.anomaly.seed,
        );
        let provenance = cities
            .into_iter()
            .map(|city| SeriesProvenance {
                city,
                source: Provenance::Simulated,
                reason: Some("offline run".to_string()),
            })
            .collect();
        return Ok(Ingested {
            observations,
            provenance,
        });
    }

    let source = OpenAqSource::from_env()?;
    Ok(fetch_for_cities(&source, config).await)
}

async fn run_pipeline(
    config: &PipelineConfig,
    input: Option<&Path>,
    traffic: Option<&Path>,
    offline: bool,
) -> Result<()> {
    let ingested = ingest_observations(config, input, offline).await?;
    let simulated = ingested
        .provenance
        .iter()
        .filter(|p| p.source == Provenance::Simulated)
        .count();
    if simulated > 0 {
        warn!(simulated, cities = ingested.provenance.len(), "some series are simulated");
    }

    let traffic = load_or_simulate_traffic(traffic, config)?;
    let outputs = pipeline::run(config, &ingested.observations, &traffic);

    output::write_all(
        &config.output_dir,
        &outputs,
        &ingested.provenance,
        &config.parameter,
        config.gzip,
    )?;

    let headline = outputs.headline(&config.treated_city);
    print_pretty(&headline);
    info!(
        mean_pollution = headline.mean_pollution,
        cities = headline.cities,
        treated_change = headline.treated_change,
        effect = outputs.did.effect,
        p_value = outputs.did.p_value,
        "Pipeline completed"
    );
    Ok(())
}
