// The command-line orchestrator. It owns the engine context for one data
// directory and translates subcommands into engine operations; all
// algorithmic logic lives in the library.

use clap::{Args, Parser, Subcommand};
use facecast::schema::{FEATURE_COUNT, Timestamp};
use facecast::{Engine, EngineError};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process;
use thiserror::Error;

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("failed to read features file: {0}")]
    Csv(#[from] csv::Error),
    #[error("{0}")]
    Usage(String),
}

#[derive(Parser)]
#[command(
    name = "facecast",
    about = "Personalized prediction of daily health metrics from facial measurements"
)]
struct Cli {
    /// Data directory holding captures/ and models/
    #[arg(long, global = true, default_value = "facecast-data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store one capture: a feature row plus any known metric values
    Add(AddArgs),
    /// Backfill a metric value on an existing capture
    Backfill(BackfillArgs),
    /// Train (or retrain) the model for one target metric
    Train {
        /// Target metric name, e.g. "Sleep Score"
        target: String,
    },
    /// Predict a target metric from a feature row
    Predict {
        target: String,
        #[command(flatten)]
        features: FeatureSource,
    },
    /// Summarize all trained targets
    List,
    /// Show one trained model's diagnostics
    Show { target: String },
    /// Delete one target's trained model
    Delete { target: String },
    /// Delete one capture by timestamp
    DeleteSample {
        /// Capture timestamp in unix seconds
        #[arg(long)]
        at: i64,
    },
    /// Delete every stored capture
    Purge {
        /// Required confirmation; purging is irreversible
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args)]
struct AddArgs {
    /// Capture timestamp in unix seconds
    #[arg(long)]
    at: i64,

    #[command(flatten)]
    features: FeatureSource,

    /// Metric values known at capture time, as "Name=value"; repeatable
    #[arg(long = "metric", value_name = "NAME=VALUE")]
    metrics: Vec<String>,
}

#[derive(Args)]
struct BackfillArgs {
    /// Capture timestamp in unix seconds
    #[arg(long)]
    at: i64,

    /// The metric to set, as "Name=value"
    #[arg(long, value_name = "NAME=VALUE")]
    metric: String,

    /// Overwrite an already-present value
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct FeatureSource {
    /// CSV file of feature rows (24 values per row, no header)
    #[arg(long)]
    features: PathBuf,

    /// Zero-based row index within the file
    #[arg(long, default_value_t = 0)]
    row: usize,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let engine = Engine::open(&cli.data_dir)?;

    match cli.command {
        Commands::Add(args) => {
            let features = read_feature_row(&args.features)?;
            let mut targets = BTreeMap::new();
            for pair in &args.metrics {
                let (name, value) = parse_metric(pair)?;
                targets.insert(name, value);
            }
            let sample = engine.add_sample(
                &features,
                targets,
                Timestamp::from_unix_seconds(args.at),
            )?;
            println!(
                "Stored capture at {} with {} metric value(s).",
                sample.captured_at,
                sample.targets.len()
            );
        }
        Commands::Backfill(args) => {
            let (name, value) = parse_metric(&args.metric)?;
            let sample = engine.backfill_target(
                Timestamp::from_unix_seconds(args.at),
                &name,
                value,
                args.force,
            )?;
            println!("Set {name} = {value} on capture {}.", sample.captured_at);
        }
        Commands::Train { target } => {
            let model = engine.train(&target)?;
            println!("Trained '{target}' on {} samples.", model.trained_on);
            println!(
                "  lambda = {}   r = {:.4}   mae = {:.4}   rmse = {:.4}",
                model.lambda, model.cv.r, model.cv.mae, model.cv.rmse
            );
            print_top_features(&model.cv.ranked_importance(), 5);
        }
        Commands::Predict { target, features } => {
            let row = read_feature_row(&features)?;
            let estimate = engine.predict(&target, &row)?;
            println!("{target}: {estimate:.3}");
        }
        Commands::List => {
            let summaries = engine.list();
            if summaries.is_empty() {
                println!("No trained targets.");
            }
            for s in summaries {
                let staleness = if s.is_stale() {
                    format!(" (stale: {} samples now)", s.current_samples)
                } else {
                    String::new()
                };
                println!(
                    "{}  r = {:.4}  trained on {} samples at {}{}",
                    s.target_name, s.r, s.trained_on, s.trained_at, staleness
                );
            }
        }
        Commands::Show { target } => {
            let model = engine.get(&target)?;
            println!("Target: {}", model.target_name);
            println!(
                "  trained at {} on {} samples, lambda = {}",
                model.trained_at, model.trained_on, model.lambda
            );
            println!(
                "  r = {:.4}   mae = {:.4}   rmse = {:.4}",
                model.cv.r, model.cv.mae, model.cv.rmse
            );
            print_top_features(&model.cv.ranked_importance(), 10);
            println!("  held-out predictions (actual -> predicted):");
            for pair in &model.cv.pairs {
                println!("    {:.3} -> {:.3}", pair.actual, pair.predicted);
            }
        }
        Commands::Delete { target } => {
            engine.delete_model(&target)?;
            println!("Deleted model for '{target}'.");
        }
        Commands::DeleteSample { at } => {
            engine.delete_sample(Timestamp::from_unix_seconds(at))?;
            println!("Deleted capture {at}.");
        }
        Commands::Purge { yes } => {
            if !yes {
                return Err(CliError::Usage(
                    "refusing to purge without --yes".to_string(),
                ));
            }
            engine.purge_all()?;
            println!("Purged all captures.");
        }
    }
    Ok(())
}

/// Reads one 24-value feature row from a headerless CSV file.
fn read_feature_row(source: &FeatureSource) -> Result<Vec<f64>, CliError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(&source.features)?;

    for (index, record) in reader.records().enumerate() {
        let record = record?;
        if index != source.row {
            continue;
        }
        let mut values = Vec::with_capacity(FEATURE_COUNT);
        for field in record.iter() {
            let value: f64 = field.parse().map_err(|_| {
                CliError::Usage(format!("'{field}' is not a number in row {index}"))
            })?;
            values.push(value);
        }
        return Ok(values);
    }
    Err(CliError::Usage(format!(
        "row {} not found in {}",
        source.row,
        source.features.display()
    )))
}

fn parse_metric(pair: &str) -> Result<(String, f64), CliError> {
    let (name, raw) = pair.split_once('=').ok_or_else(|| {
        CliError::Usage(format!("expected NAME=VALUE, got '{pair}'"))
    })?;
    let value: f64 = raw.trim().parse().map_err(|_| {
        CliError::Usage(format!("'{raw}' is not a numeric value for '{name}'"))
    })?;
    Ok((name.trim().to_string(), value))
}

fn print_top_features(ranked: &[(&'static str, f64)], limit: usize) {
    println!("  top features:");
    for (name, share) in ranked.iter().take(limit) {
        println!("    {name:<26} {:.1}%", share * 100.0);
    }
}
