//! Feature Engineering
//!
//! Derive per-record features from a driver's own history. Every value is
//! computed from races strictly before the record's race.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::data::history::DriverHistoryIndex;
use crate::models::RaceRecord;

/// Default rolling window (races)
pub const DEFAULT_WINDOW: usize = 10;

/// Which derived features feed the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSet {
    /// Grid, previous finish, rolling finish and rolling places gained
    #[default]
    Form,
    /// Form plus the driver's history at the same circuit
    Track,
    /// Grid plus the standings snapshot from the driver's previous race
    Standings,
}

impl FeatureSet {
    /// Column names in model input order
    pub fn feature_names(&self) -> Vec<&'static str> {
        match self {
            FeatureSet::Form => vec![
                "grid",
                "previous_position",
                "avg_last_positions",
                "avg_positions_gained",
            ],
            FeatureSet::Track => vec![
                "grid",
                "previous_position",
                "avg_last_positions",
                "track_avg_position",
                "track_wins",
                "track_podiums",
                "avg_positions_gained",
            ],
            FeatureSet::Standings => vec![
                "grid",
                "prior_driver_points",
                "prior_driver_position",
                "prior_constructor_points",
                "prior_constructor_position",
            ],
        }
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeatureSet::Form => "form",
            FeatureSet::Track => "track",
            FeatureSet::Standings => "standings",
        };
        f.write_str(name)
    }
}

impl FromStr for FeatureSet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "form" => Ok(FeatureSet::Form),
            "track" => Ok(FeatureSet::Track),
            "standings" => Ok(FeatureSet::Standings),
            other => Err(format!("Unknown feature set: {}", other)),
        }
    }
}

/// How undefined feature values are filled before fitting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Imputation {
    #[default]
    Zero,
    TrainingMean,
}

impl FromStr for Imputation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zero" => Ok(Imputation::Zero),
            "mean" | "training_mean" => Ok(Imputation::TrainingMean),
            other => Err(format!("Unknown imputation policy: {}", other)),
        }
    }
}

/// Derived features for one record; None marks insufficient history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub grid: Option<f64>,
    pub previous_position: Option<f64>,
    pub avg_last_positions: Option<f64>,
    pub avg_positions_gained: Option<f64>,
    pub track_avg_position: Option<f64>,
    pub track_wins: f64,
    pub track_podiums: f64,
    pub prior_driver_points: Option<f64>,
    pub prior_driver_position: Option<f64>,
    pub prior_constructor_points: Option<f64>,
    pub prior_constructor_position: Option<f64>,
}

impl FeatureVector {
    /// Raw values in the order of `set.feature_names()`
    pub fn values(&self, set: FeatureSet) -> Vec<Option<f64>> {
        match set {
            FeatureSet::Form => vec![
                self.grid,
                self.previous_position,
                self.avg_last_positions,
                self.avg_positions_gained,
            ],
            FeatureSet::Track => vec![
                self.grid,
                self.previous_position,
                self.avg_last_positions,
                self.track_avg_position,
                Some(self.track_wins),
                Some(self.track_podiums),
                self.avg_positions_gained,
            ],
            FeatureSet::Standings => vec![
                self.grid,
                self.prior_driver_points,
                self.prior_driver_position,
                self.prior_constructor_points,
                self.prior_constructor_position,
            ],
        }
    }

    /// Rebuild a vector from filled model inputs (used for cold-start rows)
    pub fn from_filled(set: FeatureSet, values: &[f64]) -> Self {
        let get = |i: usize| values.get(i).copied();
        match set {
            FeatureSet::Form => Self {
                grid: get(0),
                previous_position: get(1),
                avg_last_positions: get(2),
                avg_positions_gained: get(3),
                ..Default::default()
            },
            FeatureSet::Track => Self {
                grid: get(0),
                previous_position: get(1),
                avg_last_positions: get(2),
                track_avg_position: get(3),
                track_wins: get(4).unwrap_or(0.0),
                track_podiums: get(5).unwrap_or(0.0),
                avg_positions_gained: get(6),
                ..Default::default()
            },
            FeatureSet::Standings => Self {
                grid: get(0),
                prior_driver_points: get(1),
                prior_driver_position: get(2),
                prior_constructor_points: get(3),
                prior_constructor_position: get(4),
                ..Default::default()
            },
        }
    }
}

/// Feature engineering over a history index
pub struct FeatureEngineering<'a> {
    index: &'a DriverHistoryIndex,
    window: usize,
}

impl<'a> FeatureEngineering<'a> {
    pub fn new(index: &'a DriverHistoryIndex, window: usize) -> Self {
        Self {
            index,
            window: window.max(1),
        }
    }

    /// Compute a record's features from strictly earlier races
    pub fn derive(&self, record: &RaceRecord) -> FeatureVector {
        let key = record.race_key();
        let previous = self.index.previous_race(record.driver_id, &key);
        let track = self
            .index
            .track_record(record.driver_id, record.circuit_id, &key);

        FeatureVector {
            grid: record.grid,
            previous_position: previous.map(|p| p.position),
            avg_last_positions: self
                .index
                .rolling_avg_position(record.driver_id, &key, self.window),
            avg_positions_gained: self
                .index
                .rolling_avg_gained(record.driver_id, &key, self.window),
            track_avg_position: track.avg_position,
            track_wins: track.wins as f64,
            track_podiums: track.podiums as f64,
            prior_driver_points: previous.and_then(|p| p.standings.driver_points),
            prior_driver_position: previous.and_then(|p| p.standings.driver_position),
            prior_constructor_points: previous.and_then(|p| p.standings.constructor_points),
            prior_constructor_position: previous.and_then(|p| p.standings.constructor_position),
        }
    }

    pub fn derive_all(&self, records: &[&RaceRecord]) -> Vec<FeatureVector> {
        records.iter().map(|r| self.derive(r)).collect()
    }
}

/// Fill values for undefined features, fitted on the training rows
///
/// The same fill values are applied to training and evaluation rows.
#[derive(Debug, Clone)]
pub struct Imputer {
    fill: Vec<f64>,
}

impl Imputer {
    pub fn fit(policy: Imputation, rows: &[Vec<Option<f64>>], n_features: usize) -> Self {
        let fill = match policy {
            Imputation::Zero => vec![0.0; n_features],
            Imputation::TrainingMean => (0..n_features)
                .map(|col| {
                    let (sum, count) = rows
                        .iter()
                        .filter_map(|row| row.get(col).copied().flatten())
                        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
                    if count == 0 {
                        0.0
                    } else {
                        sum / count as f64
                    }
                })
                .collect(),
        };
        Self { fill }
    }

    pub fn transform(&self, row: &[Option<f64>]) -> Vec<f64> {
        row.iter()
            .zip(&self.fill)
            .map(|(value, fill)| value.unwrap_or(*fill))
            .collect()
    }

    pub fn fill_values(&self) -> &[f64] {
        &self.fill
    }
}

/// Column-wise mean of a filled matrix
pub fn column_means(rows: &[Vec<f64>], n_features: usize) -> Vec<f64> {
    if rows.is_empty() {
        return vec![0.0; n_features];
    }
    (0..n_features)
        .map(|col| rows.iter().map(|row| row[col]).sum::<f64>() / rows.len() as f64)
        .collect()
}
