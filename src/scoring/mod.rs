//! Scoring of predicted finishing orders

pub mod metrics;
pub mod ranking;

pub use metrics::{
    accuracy_by_year, calculate_accuracy, race_errors, sample_races, AccuracyMetrics, RaceError,
    ScoredRow,
};
pub use ranking::{
    calculate_points, constructor_points, rank_within_race, score_predictions, ConstructorScope,
};
