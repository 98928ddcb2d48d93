//! F1 Predict CLI - Rolling race predictions and accuracy reports

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use f1predict::config::PipelineConfig;
use f1predict::data::{read_scored_rows, write_predictions, Dataset, FeatureSet, Imputation, RosterPolicy};
use f1predict::forest::{MaxFeatures, ParamGrid};
use f1predict::models::TargetColumn;
use f1predict::pipeline::RollingPredictor;
use f1predict::scoring::metrics::{
    filter_races, DEFAULT_OUTLIER_THRESHOLD, DEFAULT_SAMPLE_FRACTION, DEFAULT_SAMPLE_SEED,
};
use f1predict::scoring::{accuracy_by_year, calculate_accuracy, sample_races, AccuracyMetrics, ConstructorScope};

/// Default merged results table
const DEFAULT_INPUT: &str = "data/merged_results.csv";
const DEFAULT_OUTPUT: &str = "predicted_results.csv";

#[derive(Parser)]
#[command(name = "f1predict")]
#[command(author, version, about = "Formula 1 race prediction CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log debug output (per-candidate grid search scores)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrain per year and predict every race of the year range
    Predict(PredictArgs),

    /// Score one or more prediction files against recorded results
    Accuracy {
        /// Prediction CSV files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Score only a random share of races (0 < f <= 1), shared across files
        #[arg(long)]
        sample: bool,

        /// Share of races to sample
        #[arg(long, default_value_t = DEFAULT_SAMPLE_FRACTION)]
        sample_fraction: f64,

        /// Seed of the race sample
        #[arg(long, default_value_t = DEFAULT_SAMPLE_SEED)]
        seed: u64,

        /// Errors at or above this are excluded from the trimmed MAE
        #[arg(long, default_value_t = DEFAULT_OUTLIER_THRESHOLD)]
        outlier_threshold: f64,
    },

    /// List seasons in the input table
    Years {
        /// Input CSV (merged race results)
        #[arg(short, long, default_value = DEFAULT_INPUT)]
        input: PathBuf,
    },
}

#[derive(Args)]
struct PredictArgs {
    /// Input CSV (merged race results)
    #[arg(short, long, default_value = DEFAULT_INPUT)]
    input: PathBuf,

    /// Output CSV for the prediction table
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// JSON configuration file (flags override its values)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// First target year
    #[arg(long)]
    start: Option<i32>,

    /// Last target year
    #[arg(long)]
    end: Option<i32>,

    /// Training seasons before each target year
    #[arg(long)]
    lookback: Option<i32>,

    /// Feature set (form, track, standings)
    #[arg(long)]
    features: Option<FeatureSet>,

    /// Races in the rolling averages
    #[arg(long)]
    window: Option<usize>,

    /// Fill for undefined features (zero, training_mean)
    #[arg(long)]
    impute: Option<Imputation>,

    /// Extra target column (repeatable); positionOrder is always predicted
    #[arg(long = "target")]
    targets: Vec<TargetColumn>,

    /// Tune the forest per year with the default parameter grid
    #[arg(long)]
    grid_search: bool,

    /// Number of trees
    #[arg(long)]
    trees: Option<usize>,

    /// Maximum tree depth
    #[arg(long)]
    max_depth: Option<usize>,

    /// Features tried per split (all, sqrt, log2, or a count)
    #[arg(long)]
    max_features: Option<MaxFeatures>,

    /// Minimum rows to split a node
    #[arg(long)]
    min_split: Option<usize>,

    /// Minimum rows in a leaf
    #[arg(long)]
    min_leaf: Option<usize>,

    /// Random seed for reproducible forests
    #[arg(long)]
    seed: Option<u64>,

    /// Roster driver id or "Forename Surname" (repeatable)
    #[arg(long = "roster")]
    roster: Vec<String>,

    /// Predict only roster drivers
    #[arg(long)]
    roster_only: bool,

    /// Train only on drivers present in the target year
    #[arg(long)]
    train_active_only: bool,

    /// Constructor points aggregation (race, season)
    #[arg(long)]
    constructor_scope: Option<ConstructorScope>,
}

impl PredictArgs {
    /// Defaults, then the JSON file, then flags
    fn to_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {:?}", path))?,
            None => PipelineConfig::default(),
        };

        if let Some(start) = self.start {
            config.start_year = start;
        }
        if let Some(end) = self.end {
            config.end_year = end;
        }
        if let Some(lookback) = self.lookback {
            config.lookback = lookback;
        }
        if let Some(features) = self.features {
            config.feature_set = features;
        }
        if let Some(window) = self.window {
            config.window = window;
        }
        if let Some(impute) = self.impute {
            config.imputation = impute;
        }
        if !self.targets.is_empty() {
            config.targets = self.targets.clone();
        }
        if self.grid_search && config.grid_search.is_none() {
            config.grid_search = Some(ParamGrid::default());
        }
        if let Some(trees) = self.trees {
            config.forest.n_trees = trees;
        }
        if let Some(depth) = self.max_depth {
            config.forest.tree.max_depth = Some(depth);
        }
        if let Some(max_features) = self.max_features {
            config.forest.max_features = max_features;
        }
        if let Some(min_split) = self.min_split {
            config.forest.tree.min_samples_split = min_split;
        }
        if let Some(min_leaf) = self.min_leaf {
            config.forest.tree.min_samples_leaf = min_leaf;
        }
        if let Some(seed) = self.seed {
            config.forest.seed = Some(seed);
        }
        if !self.roster.is_empty() {
            config.roster = self.roster.clone();
        }
        if self.roster_only {
            config.roster_policy = RosterPolicy::RosterOnly;
        }
        if self.train_active_only {
            config.train_active_only = true;
        }
        if let Some(scope) = self.constructor_scope {
            config.constructor_scope = scope;
        }

        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .with_context(|| "Failed to set tracing subscriber")?;

    println!("{}", format!("f1predict v{}", env!("CARGO_PKG_VERSION")).cyan().bold());
    println!();

    match cli.command {
        Some(Commands::Predict(args)) => run_predict(&args)?,
        Some(Commands::Accuracy {
            files,
            sample,
            sample_fraction,
            seed,
            outlier_threshold,
        }) => {
            let fraction = sample.then_some(sample_fraction);
            run_accuracy(&files, fraction, seed, outlier_threshold)?;
        }
        Some(Commands::Years { input }) => list_years(&input)?,
        None => {
            println!("Use --help to see available commands");
            println!();
            println!("Examples:");
            println!("  f1predict predict --start 2018 --end 2023 --seed 42");
            println!("  f1predict predict --grid-search --target resultPoints");
            println!("  f1predict accuracy predicted_results.csv --sample");
            println!("  f1predict years");
        }
    }

    Ok(())
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(message.to_string());
    Ok(pb)
}

fn run_predict(args: &PredictArgs) -> Result<()> {
    let config = args.to_config()?;
    config.validate().with_context(|| "Invalid configuration")?;

    println!("{}", "Running rolling predictions...".green());
    println!("Input: {:?}", args.input);
    println!("Years: {}..={}", config.start_year, config.end_year);
    println!("Lookback: {} seasons", config.lookback);
    println!("Features: {} (window {})", config.feature_set, config.window);
    match &config.grid_search {
        Some(grid) => println!("Model: grid search ({} candidates, {} folds)", grid.len(), grid.folds),
        None => println!(
            "Model: {} trees, max_features {}",
            config.forest.n_trees, config.forest.max_features
        ),
    }
    match config.forest.seed {
        Some(seed) => println!("Seed: {}", seed),
        None => println!("Seed: none (results vary between runs)"),
    }
    if !config.roster.is_empty() {
        println!("Roster: {} drivers ({:?})", config.roster.len(), config.roster_policy);
    }
    println!();

    let pb = spinner("Loading data...")?;
    let dataset = Dataset::load(&args.input)
        .with_context(|| format!("Failed to load {:?}", args.input))?;

    pb.set_message(format!("Predicting {} rows of history...", dataset.len()));
    let predictor = RollingPredictor::new(config);
    let result = predictor
        .run(&dataset)
        .with_context(|| "Rolling prediction failed")?;
    pb.finish_and_clear();

    predictor.print_summary(&result);

    if result.predictions.is_empty() {
        println!("{}", "No predictions produced; nothing written.".yellow());
        return Ok(());
    }

    write_predictions(&dataset, &result.predictions, &result.targets, &args.output)
        .with_context(|| format!("Failed to write {:?}", args.output))?;
    println!(
        "\n{} {} rows to {:?}",
        "Wrote".green().bold(),
        result.predictions.len(),
        args.output
    );

    Ok(())
}

fn run_accuracy(
    files: &[PathBuf],
    sample_fraction: Option<f64>,
    seed: u64,
    outlier_threshold: f64,
) -> Result<()> {
    if let Some(fraction) = sample_fraction {
        if !(fraction > 0.0 && fraction <= 1.0) {
            anyhow::bail!("Sample fraction must be in (0, 1], got {}", fraction);
        }
    }

    let mut tables = Vec::with_capacity(files.len());
    for path in files {
        let rows = read_scored_rows(path).with_context(|| format!("Failed to read {:?}", path))?;
        tables.push(rows);
    }

    if let Some(fraction) = sample_fraction {
        let slices: Vec<&[_]> = tables.iter().map(Vec::as_slice).collect();
        let races = sample_races(&slices, fraction, seed);
        println!(
            "Sampled {} races ({:.0}%, seed {})",
            races.len(),
            fraction * 100.0,
            seed
        );
        tables = tables.iter().map(|rows| filter_races(rows, &races)).collect();
    }

    for (path, rows) in files.iter().zip(&tables) {
        println!("\n{} {:?}", "Accuracy:".yellow().bold(), path);
        if rows.is_empty() {
            println!("No scored rows");
            continue;
        }

        let overall = calculate_accuracy(rows, outlier_threshold);
        print_metrics_header();
        print_metrics_row("all", &overall);
        for (year, metrics) in accuracy_by_year(rows, outlier_threshold) {
            print_metrics_row(&year.to_string(), &metrics);
        }
        println!("{}", "-".repeat(60));
        println!(
            "Outliers (error >= {}): {}   MSE: {:.3}",
            outlier_threshold, overall.outliers, overall.mse
        );
    }

    Ok(())
}

fn print_metrics_header() {
    println!(
        "{:>6} {:>6} {:>6} {:>8} {:>8} {:>8} {:>8}",
        "Year", "Races", "Rows", "Exact", "Within1", "MAE", "Trimmed"
    );
    println!("{}", "-".repeat(60));
}

fn print_metrics_row(label: &str, m: &AccuracyMetrics) {
    println!(
        "{:>6} {:>6} {:>6} {:>7.1}% {:>7.1}% {:>8.3} {:>8.3}",
        label,
        m.races,
        m.total,
        m.exact_rate * 100.0,
        m.within_one_rate * 100.0,
        m.mae,
        m.trimmed_mae
    );
}

fn list_years(input: &Path) -> Result<()> {
    let dataset = Dataset::load(input).with_context(|| format!("Failed to load {:?}", input))?;

    println!("{} {:?}", "Seasons in".yellow().bold(), input);
    println!("{:>6} {:>8}", "Year", "Rows");
    println!("{}", "-".repeat(20));
    for (year, rows) in dataset.years() {
        println!("{:>6} {:>8}", year, rows);
    }
    println!("{}", "-".repeat(20));
    println!("{:>6} {:>8}", "Total", dataset.len());

    Ok(())
}
