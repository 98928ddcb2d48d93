use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::data::features::FeatureVector;

/// Chronological race ordering key
///
/// Ordered by (year, round, date, race_id). `round` is the season order; a
/// missing or unparseable `date` must not move a race ahead of earlier
/// rounds. `date` and the race id only break ties between equal rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RaceKey {
    pub year: i32,
    pub round: u32,
    pub date: Option<NaiveDate>,
    pub race_id: u32,
}

/// Championship standings snapshot taken after a race
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StandingsSnapshot {
    pub driver_points: Option<f64>,
    pub driver_position: Option<f64>,
    pub driver_wins: Option<f64>,
    pub constructor_points: Option<f64>,
    pub constructor_position: Option<f64>,
    pub constructor_wins: Option<f64>,
}

/// One driver's result in one race
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceRecord {
    /// Row index in the loaded input frame (None for synthesized rows)
    pub row: Option<usize>,
    pub race_id: u32,
    pub year: i32,
    pub round: u32,
    pub date: Option<NaiveDate>,
    pub driver_id: u32,
    pub constructor_id: u32,
    pub circuit_id: u32,
    pub grid: Option<f64>,
    pub position_order: Option<f64>,
    pub laps: Option<f64>,
    pub result_points: Option<f64>,
    pub standings: StandingsSnapshot,
}

impl RaceRecord {
    pub fn race_key(&self) -> RaceKey {
        RaceKey {
            year: self.year,
            round: self.round,
            date: self.date,
            race_id: self.race_id,
        }
    }

    /// Ground-truth value of a target column, if recorded
    pub fn target_value(&self, target: TargetColumn) -> Option<f64> {
        match target {
            TargetColumn::Grid => self.grid,
            TargetColumn::Laps => self.laps,
            TargetColumn::PositionOrder => self.position_order,
            TargetColumn::ResultPoints => self.result_points,
            TargetColumn::DriverPoints => self.standings.driver_points,
            TargetColumn::DriverPosition => self.standings.driver_position,
            TargetColumn::DriverWins => self.standings.driver_wins,
            TargetColumn::ConstructorPoints => self.standings.constructor_points,
            TargetColumn::ConstructorPosition => self.standings.constructor_position,
            TargetColumn::ConstructorWins => self.standings.constructor_wins,
        }
    }
}

/// Columns the pipeline can learn to predict
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TargetColumn {
    #[serde(rename = "grid")]
    Grid,
    #[serde(rename = "laps")]
    Laps,
    #[serde(rename = "positionOrder")]
    PositionOrder,
    #[serde(rename = "resultPoints")]
    ResultPoints,
    #[serde(rename = "driverPoints")]
    DriverPoints,
    #[serde(rename = "driverPosition")]
    DriverPosition,
    #[serde(rename = "driverWins")]
    DriverWins,
    #[serde(rename = "constructorPoints")]
    ConstructorPoints,
    #[serde(rename = "constructorPosition")]
    ConstructorPosition,
    #[serde(rename = "constructorWins")]
    ConstructorWins,
}

impl TargetColumn {
    pub const ALL: [TargetColumn; 10] = [
        TargetColumn::ConstructorPoints,
        TargetColumn::ConstructorPosition,
        TargetColumn::ConstructorWins,
        TargetColumn::DriverPoints,
        TargetColumn::DriverPosition,
        TargetColumn::DriverWins,
        TargetColumn::Grid,
        TargetColumn::PositionOrder,
        TargetColumn::ResultPoints,
        TargetColumn::Laps,
    ];

    /// Input column name
    pub fn column_name(&self) -> &'static str {
        match self {
            TargetColumn::Grid => "grid",
            TargetColumn::Laps => "laps",
            TargetColumn::PositionOrder => "positionOrder",
            TargetColumn::ResultPoints => "resultPoints",
            TargetColumn::DriverPoints => "driverPoints",
            TargetColumn::DriverPosition => "driverPosition",
            TargetColumn::DriverWins => "driverWins",
            TargetColumn::ConstructorPoints => "constructorPoints",
            TargetColumn::ConstructorPosition => "constructorPosition",
            TargetColumn::ConstructorWins => "constructorWins",
        }
    }

    /// Output column name (`predicted_<col>`)
    pub fn predicted_column_name(&self) -> String {
        format!("predicted_{}", self.column_name())
    }
}

impl fmt::Display for TargetColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

impl FromStr for TargetColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TargetColumn::ALL
            .iter()
            .find(|t| t.column_name().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("Unknown target column: {}", s))
    }
}

/// A record augmented with its predictions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub record: RaceRecord,
    pub features: FeatureVector,
    /// Raw regression output per target
    pub predicted: BTreeMap<TargetColumn, f64>,
    /// Rank of `predicted_positionOrder` within the race (1 = winner)
    pub predicted_rank: u32,
    pub predicted_points: u32,
    pub predicted_constructor_points: f64,
    /// Target year the prediction was made for
    pub year: i32,
    /// True for cold-start rows with no recorded result
    pub synthesized: bool,
}

impl PredictionResult {
    pub fn predicted_position(&self) -> Option<f64> {
        self.predicted.get(&TargetColumn::PositionOrder).copied()
    }
}
