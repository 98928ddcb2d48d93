//! Windowed train/evaluation split per target year

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::data::csv_loader::Dataset;
use crate::models::{RaceRecord, StandingsSnapshot};

/// Default number of seasons used for training
pub const DEFAULT_LOOKBACK_YEARS: i32 = 5;

/// Which rows of an observed season are evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RosterPolicy {
    /// Every recorded row of the target year
    #[default]
    AllRows,
    /// Only rows of drivers on the configured roster
    RosterOnly,
}

/// Evaluation rows for a target year
#[derive(Debug, Clone)]
pub enum EvalSet<'a> {
    /// Recorded results of the target year
    Observed(Vec<&'a RaceRecord>),
    /// Placeholder rows for a season with no results yet, one per roster driver
    ColdStart(Vec<RaceRecord>),
}

impl<'a> EvalSet<'a> {
    pub fn len(&self) -> usize {
        match self {
            EvalSet::Observed(rows) => rows.len(),
            EvalSet::ColdStart(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_cold_start(&self) -> bool {
        matches!(self, EvalSet::ColdStart(_))
    }

    pub fn records(&self) -> Vec<&RaceRecord> {
        match self {
            EvalSet::Observed(rows) => rows.to_vec(),
            EvalSet::ColdStart(rows) => rows.iter().collect(),
        }
    }

    fn driver_ids(&self) -> HashSet<u32> {
        self.records().iter().map(|r| r.driver_id).collect()
    }
}

/// Training and evaluation rows for one target year
#[derive(Debug, Clone)]
pub struct YearSplit<'a> {
    pub year: i32,
    pub train: Vec<&'a RaceRecord>,
    pub eval: EvalSet<'a>,
}

/// Why a year cannot be predicted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    NoTrainingData,
    NoEvaluationData,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoTrainingData => write!(f, "no training data"),
            SkipReason::NoEvaluationData => write!(f, "no evaluation data"),
        }
    }
}

/// Splits a dataset into the `lookback` seasons before a target year and the year itself
#[derive(Debug, Clone)]
pub struct WindowedSplitter {
    pub lookback: i32,
    pub policy: RosterPolicy,
    /// Known participants, used for `RosterOnly` and cold-start synthesis
    pub roster: Vec<u32>,
    /// Keep only training rows of drivers present in the evaluation set
    pub train_active_only: bool,
}

impl Default for WindowedSplitter {
    fn default() -> Self {
        Self {
            lookback: DEFAULT_LOOKBACK_YEARS,
            policy: RosterPolicy::AllRows,
            roster: Vec::new(),
            train_active_only: false,
        }
    }
}

impl WindowedSplitter {
    pub fn new(lookback: i32) -> Self {
        Self {
            lookback,
            ..Default::default()
        }
    }

    pub fn with_roster(mut self, roster: Vec<u32>, policy: RosterPolicy) -> Self {
        self.roster = roster;
        self.policy = policy;
        self
    }

    pub fn with_train_active_only(mut self, enabled: bool) -> Self {
        self.train_active_only = enabled;
        self
    }

    /// Split the dataset for `year`
    ///
    /// A year without recorded rows gets a cold-start evaluation set when a
    /// roster is configured.
    pub fn split<'a>(&self, dataset: &'a Dataset, year: i32) -> Result<YearSplit<'a>, SkipReason> {
        let first_year = year.saturating_sub(self.lookback);
        let mut train: Vec<&RaceRecord> = dataset
            .records()
            .iter()
            .filter(|r| r.year >= first_year && r.year < year)
            .collect();

        if train.is_empty() {
            return Err(SkipReason::NoTrainingData);
        }

        let observed: Vec<&RaceRecord> = dataset
            .records()
            .iter()
            .filter(|r| r.year == year)
            .collect();

        let eval = if observed.is_empty() {
            if self.roster.is_empty() {
                return Err(SkipReason::NoEvaluationData);
            }
            EvalSet::ColdStart(self.synthesize(dataset, year))
        } else {
            let observed = match self.policy {
                RosterPolicy::AllRows => observed,
                RosterPolicy::RosterOnly => {
                    let roster: HashSet<u32> = self.roster.iter().copied().collect();
                    observed
                        .into_iter()
                        .filter(|r| roster.contains(&r.driver_id))
                        .collect()
                }
            };
            if observed.is_empty() {
                return Err(SkipReason::NoEvaluationData);
            }
            EvalSet::Observed(observed)
        };

        if self.train_active_only {
            let active = eval.driver_ids();
            train.retain(|r| active.contains(&r.driver_id));
            if train.is_empty() {
                return Err(SkipReason::NoTrainingData);
            }
        }

        Ok(YearSplit { year, train, eval })
    }

    /// One placeholder row per roster driver; features are filled later
    fn synthesize(&self, dataset: &Dataset, year: i32) -> Vec<RaceRecord> {
        self.roster
            .iter()
            .map(|&driver_id| RaceRecord {
                row: None,
                race_id: 0,
                year,
                round: 0,
                date: None,
                driver_id,
                constructor_id: dataset.latest_constructor(driver_id).unwrap_or(0),
                circuit_id: 0,
                grid: None,
                position_order: None,
                laps: None,
                result_points: None,
                standings: StandingsSnapshot::default(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(race_id: u32, year: i32, driver_id: u32, constructor_id: u32) -> RaceRecord {
        RaceRecord {
            row: None,
            race_id,
            year,
            round: 1,
            date: None,
            driver_id,
            constructor_id,
            circuit_id: 1,
            grid: Some(1.0),
            position_order: Some(1.0),
            laps: Some(50.0),
            result_points: Some(25.0),
            standings: StandingsSnapshot::default(),
        }
    }

    fn create_dataset() -> Dataset {
        let mut records = Vec::new();
        for year in 2015..=2023 {
            let race_id = year as u32;
            records.push(result(race_id, year, 1, 10));
            records.push(result(race_id, year, 2, 20));
            if year < 2020 {
                records.push(result(race_id, year, 3, 30));
            }
        }
        Dataset::from_records(records).unwrap()
    }

    #[test]
    fn test_split_window_bounds() {
        let dataset = create_dataset();
        let split = WindowedSplitter::default().split(&dataset, 2023).unwrap();

        assert!(split.train.iter().all(|r| (2018..2023).contains(&r.year)));
        assert_eq!(split.train.len(), 2 * 5 + 2); // 2018..=2022, driver 3 until 2019
        assert_eq!(split.eval.len(), 2);
        assert!(split.eval.records().iter().all(|r| r.year == 2023));
        assert!(!split.eval.is_cold_start());
    }

    #[test]
    fn test_split_sets_are_disjoint() {
        let dataset = create_dataset();
        for year in 2016..=2023 {
            let split = WindowedSplitter::default().split(&dataset, year).unwrap();
            let train_rows: HashSet<Option<usize>> = split.train.iter().map(|r| r.row).collect();
            assert!(split
                .eval
                .records()
                .iter()
                .all(|r| !train_rows.contains(&r.row)));
        }
    }

    #[test]
    fn test_split_no_training_data() {
        let dataset = create_dataset();
        let err = WindowedSplitter::default().split(&dataset, 2015).unwrap_err();
        assert_eq!(err, SkipReason::NoTrainingData);
    }

    #[test]
    fn test_split_no_evaluation_data_without_roster() {
        let dataset = create_dataset();
        let err = WindowedSplitter::default().split(&dataset, 2024).unwrap_err();
        assert_eq!(err, SkipReason::NoEvaluationData);
    }

    #[test]
    fn test_split_cold_start_with_roster() {
        let dataset = create_dataset();
        let splitter = WindowedSplitter::default().with_roster(vec![2, 1, 99], RosterPolicy::AllRows);
        let split = splitter.split(&dataset, 2024).unwrap();

        assert!(split.eval.is_cold_start());
        let rows = split.eval.records();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].driver_id, 2);
        assert_eq!(rows[0].constructor_id, 20);
        assert_eq!(rows[2].constructor_id, 0);
        assert!(rows.iter().all(|r| r.year == 2024 && r.row.is_none()));
    }

    #[test]
    fn test_split_huge_lookback_takes_all_history() {
        let dataset = create_dataset();
        let split = WindowedSplitter::new(i32::MAX).split(&dataset, 2023).unwrap();
        assert!(split.train.iter().all(|r| r.year < 2023));
        assert_eq!(
            split.train.len(),
            dataset.records().iter().filter(|r| r.year < 2023).count()
        );

        // Window bounds saturate instead of overflowing
        assert_eq!(
            WindowedSplitter::new(i32::MIN).split(&dataset, 2023).unwrap_err(),
            SkipReason::NoTrainingData
        );
        assert_eq!(
            WindowedSplitter::new(5).split(&dataset, i32::MIN).unwrap_err(),
            SkipReason::NoTrainingData
        );
    }

    #[test]
    fn test_split_roster_only() {
        let dataset = create_dataset();
        let splitter = WindowedSplitter::default().with_roster(vec![1], RosterPolicy::RosterOnly);
        let split = splitter.split(&dataset, 2023).unwrap();
        assert_eq!(split.eval.len(), 1);
        assert_eq!(split.eval.records()[0].driver_id, 1);

        let splitter = WindowedSplitter::default().with_roster(vec![77], RosterPolicy::RosterOnly);
        assert_eq!(
            splitter.split(&dataset, 2023).unwrap_err(),
            SkipReason::NoEvaluationData
        );
    }

    #[test]
    fn test_split_train_active_only() {
        let dataset = create_dataset();
        let split = WindowedSplitter::default()
            .with_train_active_only(true)
            .split(&dataset, 2021)
            .unwrap();
        // Driver 3 stopped racing after 2019
        assert!(split.train.iter().all(|r| r.driver_id != 3));
        assert_eq!(split.train.len(), 10);
    }
}
