//! Accuracy Metrics
//!
//! Compare predicted finishing order against recorded results: exact and
//! within-one rank hits, mean absolute error per race with an outlier-trimmed
//! variant, and squared error.

use rand::seq::index::sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::ranking::rank_within_race;

/// Errors at or above this many places are dropped from the trimmed MAE
pub const DEFAULT_OUTLIER_THRESHOLD: f64 = 10.0;

/// Default share of races sampled for file comparisons
pub const DEFAULT_SAMPLE_FRACTION: f64 = 0.2;

/// Default seed of the race sample
pub const DEFAULT_SAMPLE_SEED: u64 = 42;

/// One evaluated row: recorded finish and raw predicted finish
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredRow {
    pub year: i32,
    pub race_id: u32,
    pub actual: f64,
    pub predicted: f64,
}

/// Accuracy of a set of predictions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccuracyMetrics {
    pub total: usize,
    pub races: usize,

    // Rank hits
    pub exact: usize,
    pub within_one: usize,
    pub exact_rate: f64,
    pub within_one_rate: f64,

    // Mean of per-race mean absolute errors
    pub rank_mae: f64,
    pub mae: f64,
    pub trimmed_mae: f64,
    pub outliers: usize,

    pub mse: f64,
}

/// Error of one race
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceError {
    pub year: i32,
    pub race_id: u32,
    pub rows: usize,
    pub mae: f64,
    /// None when every row of the race is an outlier
    pub trimmed_mae: Option<f64>,
}

/// Per-race mean absolute error of raw predictions, in (year, race) order
pub fn race_errors(rows: &[ScoredRow], outlier_threshold: f64) -> Vec<RaceError> {
    let mut grouped: BTreeMap<(i32, u32), Vec<f64>> = BTreeMap::new();
    for row in rows {
        grouped
            .entry((row.year, row.race_id))
            .or_default()
            .push((row.actual - row.predicted).abs());
    }

    grouped
        .into_iter()
        .map(|((year, race_id), errors)| {
            let kept: Vec<f64> = errors
                .iter()
                .copied()
                .filter(|e| *e < outlier_threshold)
                .collect();
            RaceError {
                year,
                race_id,
                rows: errors.len(),
                mae: mean(&errors).unwrap_or(0.0),
                trimmed_mae: mean(&kept),
            }
        })
        .collect()
}

/// Calculate accuracy over all rows
///
/// Ranks are assigned per race from the raw predictions before comparing with
/// the recorded finishing position.
pub fn calculate_accuracy(rows: &[ScoredRow], outlier_threshold: f64) -> AccuracyMetrics {
    if rows.is_empty() {
        return AccuracyMetrics::default();
    }

    let total = rows.len();
    let race_ids: Vec<u32> = rows.iter().map(|r| r.race_id).collect();
    let predicted: Vec<f64> = rows.iter().map(|r| r.predicted).collect();
    let ranks = rank_within_race(&race_ids, &predicted);

    let rank_errors: Vec<f64> = rows
        .iter()
        .zip(&ranks)
        .map(|(row, &rank)| (rank as f64 - row.actual).abs())
        .collect();
    let exact = rank_errors.iter().filter(|e| **e == 0.0).count();
    let within_one = rank_errors.iter().filter(|e| **e <= 1.0).count();

    let per_race = race_errors(rows, outlier_threshold);
    let race_maes: Vec<f64> = per_race.iter().map(|r| r.mae).collect();
    let trimmed: Vec<f64> = per_race.iter().filter_map(|r| r.trimmed_mae).collect();
    let outliers = rows
        .iter()
        .filter(|r| (r.actual - r.predicted).abs() >= outlier_threshold)
        .count();

    let mse = rows
        .iter()
        .map(|r| (r.actual - r.predicted).powi(2))
        .sum::<f64>()
        / total as f64;

    AccuracyMetrics {
        total,
        races: per_race.len(),
        exact,
        within_one,
        exact_rate: exact as f64 / total as f64,
        within_one_rate: within_one as f64 / total as f64,
        rank_mae: rank_errors.iter().sum::<f64>() / total as f64,
        mae: mean(&race_maes).unwrap_or(0.0),
        trimmed_mae: mean(&trimmed).unwrap_or(0.0),
        outliers,
        mse,
    }
}

/// Accuracy broken down by season
pub fn accuracy_by_year(rows: &[ScoredRow], outlier_threshold: f64) -> Vec<(i32, AccuracyMetrics)> {
    let mut grouped: BTreeMap<i32, Vec<ScoredRow>> = BTreeMap::new();
    for row in rows {
        grouped.entry(row.year).or_default().push(*row);
    }

    grouped
        .into_iter()
        .map(|(year, group)| (year, calculate_accuracy(&group, outlier_threshold)))
        .collect()
}

/// Pick `floor(fraction * races)` distinct races with a seeded RNG
///
/// Races are collected across every table so that several prediction files
/// are compared on the same races.
pub fn sample_races(tables: &[&[ScoredRow]], fraction: f64, seed: u64) -> HashSet<(i32, u32)> {
    let races: Vec<(i32, u32)> = tables
        .iter()
        .flat_map(|rows| rows.iter().map(|r| (r.year, r.race_id)))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let amount = ((fraction.clamp(0.0, 1.0)) * races.len() as f64).floor() as usize;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    sample(&mut rng, races.len(), amount)
        .into_iter()
        .map(|i| races[i])
        .collect()
}

/// Keep the rows of the sampled races
pub fn filter_races(rows: &[ScoredRow], races: &HashSet<(i32, u32)>) -> Vec<ScoredRow> {
    rows.iter()
        .filter(|r| races.contains(&(r.year, r.race_id)))
        .copied()
        .collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
