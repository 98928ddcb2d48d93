//! F1 Predict - Formula 1 race outcome prediction
//!
//! This library provides:
//! - Loading of a flat race-results table with fail-fast column checks
//! - Rolling-window driver features computed from strictly earlier races
//! - A seeded random forest regressor with optional grid search
//! - A per-year rolling retrain loop with rank, points and constructor scoring
//! - Accuracy metrics over prediction tables
//!
//! # Example
//!
//! ```no_run
//! use f1predict::config::PipelineConfig;
//! use f1predict::data::{write_predictions, Dataset};
//! use f1predict::pipeline::RollingPredictor;
//!
//! let dataset = Dataset::load("data/merged_results.csv")?;
//! let predictor = RollingPredictor::new(PipelineConfig::default());
//!
//! let result = predictor.run(&dataset)?;
//! predictor.print_summary(&result);
//! write_predictions(&dataset, &result.predictions, &result.targets, "predicted_results.csv")?;
//! # Ok::<(), f1predict::error::PipelineError>(())
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod forest;
pub mod models;
pub mod pipeline;
pub mod scoring;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use data::{Dataset, FeatureSet, FeatureVector, Imputation, RosterPolicy, WindowedSplitter};
pub use error::{ModelError, PipelineError};
pub use forest::{ForestConfig, MaxFeatures, ParamGrid, RandomForest};
pub use models::{PredictionResult, RaceKey, RaceRecord, TargetColumn};
pub use pipeline::{PipelineResult, RollingPredictor, YearStatus, YearSummary};
pub use scoring::{calculate_points, rank_within_race, AccuracyMetrics, ConstructorScope};
