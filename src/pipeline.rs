//! Rolling Predictor
//!
//! For every target year: split the dataset, derive features from strictly
//! earlier races, fit one forest per target and score the predicted order.
//! A year that cannot be predicted is logged and skipped; the run goes on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::data::csv_loader::Dataset;
use crate::data::features::{column_means, FeatureEngineering, FeatureVector, Imputer};
use crate::data::history::DriverHistoryIndex;
use crate::data::splitter::{EvalSet, SkipReason, WindowedSplitter, YearSplit};
use crate::error::{ModelError, Result};
use crate::forest::{grid_search, ForestConfig, RandomForest};
use crate::models::{PredictionResult, RaceRecord, TargetColumn};
use crate::scoring::score_predictions;

/// Outcome of one target year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum YearStatus {
    Predicted,
    Skipped(SkipReason),
    Failed(String),
}

impl fmt::Display for YearStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            YearStatus::Predicted => write!(f, "predicted"),
            YearStatus::Skipped(reason) => write!(f, "skipped ({})", reason),
            YearStatus::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// Diagnostics of one target year
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YearSummary {
    pub year: i32,
    pub status: YearStatus,
    pub train_rows: usize,
    pub eval_rows: usize,
    pub cold_start: bool,
    /// MSE of predicted `positionOrder` on observed rows
    pub mse: Option<f64>,
    /// `positionOrder` forest importances, in feature order
    pub importances: Vec<f64>,
    /// Values used for undefined features, in feature order
    pub fill_values: Vec<f64>,
    /// Forest used for `positionOrder` (the grid search winner when enabled)
    pub forest: Option<ForestConfig>,
    pub elapsed_secs: f64,
}

impl YearSummary {
    fn new(year: i32, status: YearStatus) -> Self {
        Self {
            year,
            status,
            train_rows: 0,
            eval_rows: 0,
            cold_start: false,
            mse: None,
            importances: Vec::new(),
            fill_values: Vec::new(),
            forest: None,
            elapsed_secs: 0.0,
        }
    }
}

/// Result of a full run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub predictions: Vec<PredictionResult>,
    pub years: Vec<YearSummary>,
    pub feature_names: Vec<String>,
    pub targets: Vec<TargetColumn>,
}

impl PipelineResult {
    pub fn predicted_years(&self) -> usize {
        self.years
            .iter()
            .filter(|y| y.status == YearStatus::Predicted)
            .count()
    }

    /// Feature importances averaged over predicted years
    pub fn mean_importances(&self) -> Vec<(String, f64)> {
        let predicted: Vec<&YearSummary> = self
            .years
            .iter()
            .filter(|y| !y.importances.is_empty())
            .collect();

        self.feature_names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let total: f64 = predicted.iter().map(|y| y.importances[i]).sum();
                let mean = if predicted.is_empty() {
                    0.0
                } else {
                    total / predicted.len() as f64
                };
                (name.clone(), mean)
            })
            .collect()
    }
}

/// Per-year rolling retrain and predict loop
pub struct RollingPredictor {
    pub config: PipelineConfig,
}

impl RollingPredictor {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run every configured year against a loaded dataset
    ///
    /// Only configuration errors abort the run. Per-year problems end up in
    /// the year's summary.
    pub fn run(&self, dataset: &Dataset) -> Result<PipelineResult> {
        self.config.validate()?;

        let roster = self.resolve_roster(dataset);
        let splitter = WindowedSplitter::new(self.config.lookback)
            .with_roster(roster, self.config.roster_policy)
            .with_train_active_only(self.config.train_active_only);

        let index = DriverHistoryIndex::build(dataset.records());
        let engineering = FeatureEngineering::new(&index, self.config.window);
        info!(
            "Indexed history of {} drivers; predicting {}..={}",
            index.len(),
            self.config.start_year,
            self.config.end_year
        );

        let mut predictions = Vec::new();
        let mut years = Vec::new();

        for year in self.config.years() {
            let started = Instant::now();
            let split = match splitter.split(dataset, year) {
                Ok(split) => split,
                Err(reason) => {
                    warn!("Skipping {}: {}", year, reason);
                    years.push(YearSummary::new(year, YearStatus::Skipped(reason)));
                    continue;
                }
            };

            let mut summary = YearSummary::new(year, YearStatus::Predicted);
            summary.train_rows = split.train.len();
            summary.eval_rows = split.eval.len();
            summary.cold_start = split.eval.is_cold_start();

            match self.predict_year(&split, &engineering, &mut summary) {
                Ok(mut results) => {
                    info!(
                        "{}: trained on {} rows, predicted {} rows{}",
                        year,
                        summary.train_rows,
                        results.len(),
                        if summary.cold_start { " (cold start)" } else { "" }
                    );
                    predictions.append(&mut results);
                }
                Err(e) => {
                    warn!("Prediction for {} failed: {}", year, e);
                    summary.status = YearStatus::Failed(e.to_string());
                    summary.importances.clear();
                    summary.fill_values.clear();
                    summary.mse = None;
                    summary.forest = None;
                }
            }

            summary.elapsed_secs = started.elapsed().as_secs_f64();
            years.push(summary);
        }

        Ok(PipelineResult {
            predictions,
            years,
            feature_names: self
                .config
                .feature_set
                .feature_names()
                .into_iter()
                .map(String::from)
                .collect(),
            targets: self.config.effective_targets(),
        })
    }

    fn resolve_roster(&self, dataset: &Dataset) -> Vec<u32> {
        let mut ids = Vec::new();
        for entry in &self.config.roster {
            match dataset.resolve_driver(entry) {
                Some(id) if !ids.contains(&id) => ids.push(id),
                Some(_) => {}
                None => warn!("Roster entry {:?} matches no driver", entry),
            }
        }
        ids
    }

    fn predict_year(
        &self,
        split: &YearSplit<'_>,
        engineering: &FeatureEngineering<'_>,
        summary: &mut YearSummary,
    ) -> Result<Vec<PredictionResult>> {
        let set = self.config.feature_set;
        let n_features = set.feature_names().len();

        let train_raw: Vec<Vec<Option<f64>>> = engineering
            .derive_all(&split.train)
            .iter()
            .map(|f| f.values(set))
            .collect();
        let imputer = Imputer::fit(self.config.imputation, &train_raw, n_features);
        summary.fill_values = imputer.fill_values().to_vec();
        let train_x: Vec<Vec<f64>> = train_raw.iter().map(|row| imputer.transform(row)).collect();

        let eval_records = split.eval.records();
        let (eval_features, eval_x): (Vec<FeatureVector>, Vec<Vec<f64>>) = match &split.eval {
            EvalSet::Observed(rows) => {
                let features = engineering.derive_all(rows);
                let x = features
                    .iter()
                    .map(|f| imputer.transform(&f.values(set)))
                    .collect();
                (features, x)
            }
            EvalSet::ColdStart(rows) => {
                let means = column_means(&train_x, n_features);
                let features = vec![FeatureVector::from_filled(set, &means); rows.len()];
                (features, vec![means; rows.len()])
            }
        };

        let mut predicted: Vec<BTreeMap<TargetColumn, f64>> = vec![BTreeMap::new(); eval_x.len()];

        for target in self.config.effective_targets() {
            let labelled: Vec<usize> = split
                .train
                .iter()
                .enumerate()
                .filter(|(_, r)| r.target_value(target).is_some())
                .map(|(i, _)| i)
                .collect();

            if labelled.is_empty() {
                if target == TargetColumn::PositionOrder {
                    return Err(ModelError::EmptyTrainingSet.into());
                }
                warn!("{}: no training labels for {}, column left empty", split.year, target);
                continue;
            }

            let x: Vec<Vec<f64>> = labelled.iter().map(|&i| train_x[i].clone()).collect();
            let y: Vec<f64> = labelled
                .iter()
                .filter_map(|&i| split.train[i].target_value(target))
                .collect();

            let forest_config = self.forest_for(&x, &y)?;
            let forest = RandomForest::fit(&x, &y, &forest_config)?;
            let values = forest.predict(&eval_x)?;

            if target == TargetColumn::PositionOrder {
                summary.importances = forest.feature_importances();
                summary.forest = Some(forest_config);
                summary.mse = observed_mse(&eval_records, &values);
            }

            for (row, value) in predicted.iter_mut().zip(values) {
                row.insert(target, value);
            }
        }

        let mut results: Vec<PredictionResult> = eval_records
            .into_iter()
            .zip(eval_features)
            .zip(predicted)
            .map(|((record, features), predicted)| PredictionResult {
                record: record.clone(),
                features,
                predicted,
                predicted_rank: 0,
                predicted_points: 0,
                predicted_constructor_points: 0.0,
                year: split.year,
                synthesized: record.row.is_none(),
            })
            .collect();

        score_predictions(&mut results, self.config.constructor_scope);
        Ok(results)
    }

    /// Configured forest, or the grid search winner for this training set
    fn forest_for(&self, x: &[Vec<f64>], y: &[f64]) -> Result<ForestConfig> {
        match &self.config.grid_search {
            Some(grid) => Ok(grid_search(x, y, grid, &self.config.forest)?.best),
            None => Ok(self.config.forest),
        }
    }

    /// Print summary of a run
    pub fn print_summary(&self, result: &PipelineResult) {
        println!("\n{}", "=".repeat(60));
        println!("ROLLING PREDICTION RESULTS");
        println!("{}", "=".repeat(60));
        println!(
            "Years: {}..={} (lookback {})",
            self.config.start_year, self.config.end_year, self.config.lookback
        );
        println!(
            "Features: {} (window {})",
            self.config.feature_set, self.config.window
        );
        let targets: Vec<String> = result.targets.iter().map(|t| t.to_string()).collect();
        println!("Targets: {}", targets.join(", "));
        println!("{}", "-".repeat(60));

        for year in &result.years {
            let mse = year
                .mse
                .map(|m| format!("{:.3}", m))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{} {:<28} train {:>6} eval {:>5} mse {:>7} {:>6.2}s",
                year.year,
                year.status.to_string(),
                year.train_rows,
                year.eval_rows,
                mse,
                year.elapsed_secs
            );
        }

        println!("{}", "-".repeat(60));
        println!(
            "Predicted years: {}/{}",
            result.predicted_years(),
            result.years.len()
        );
        println!("Prediction rows: {}", result.predictions.len());

        if result.predicted_years() > 0 {
            println!("{}", "-".repeat(60));
            println!("Mean feature importances:");
            for (name, importance) in result.mean_importances() {
                println!("  {:<28} {:.3}", name, importance);
            }
        }

        println!("{}", "=".repeat(60));
    }
}

fn observed_mse(records: &[&RaceRecord], predicted: &[f64]) -> Option<f64> {
    let errors: Vec<f64> = records
        .iter()
        .zip(predicted)
        .filter_map(|(r, p)| r.position_order.map(|actual| (actual - p).powi(2)))
        .collect();
    if errors.is_empty() {
        None
    } else {
        Some(errors.iter().sum::<f64>() / errors.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::forest::ParamGrid;
    use crate::data::features::{FeatureSet, Imputation};
    use crate::models::StandingsSnapshot;
    use crate::scoring::ConstructorScope;

    /// One race per season, two drivers in one team at one circuit
    ///
    /// Driver 1 wins in even years, driver 2 in odd years; both start where
    /// they finish.
    fn create_dataset() -> Dataset {
        let mut records = Vec::new();
        for year in 2018..=2023 {
            let race_id = (year - 2000) as u32;
            for driver_id in [1u32, 2] {
                let wins = (year % 2 == 0) == (driver_id == 1);
                let position = if wins { 1.0 } else { 2.0 };
                records.push(RaceRecord {
                    row: None,
                    race_id,
                    year,
                    round: 1,
                    date: None,
                    driver_id,
                    constructor_id: 7,
                    circuit_id: 3,
                    grid: Some(position),
                    position_order: Some(position),
                    laps: Some(50.0),
                    result_points: Some(if wins { 25.0 } else { 18.0 }),
                    standings: StandingsSnapshot::default(),
                });
            }
        }
        Dataset::from_records(records).unwrap()
    }

    fn create_config(start_year: i32, end_year: i32) -> PipelineConfig {
        PipelineConfig {
            start_year,
            end_year,
            forest: ForestConfig {
                n_trees: 10,
                seed: Some(42),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_end_to_end_single_year() {
        let dataset = create_dataset();
        let predictor = RollingPredictor::new(create_config(2023, 2023));
        let result = predictor.run(&dataset).unwrap();

        assert_eq!(result.years.len(), 1);
        let summary = &result.years[0];
        assert_eq!(summary.status, YearStatus::Predicted);
        assert_eq!(summary.train_rows, 10);
        assert_eq!(summary.eval_rows, 2);
        assert!(summary.mse.is_some());

        assert_eq!(result.predictions.len(), 2);
        for prediction in &result.predictions {
            assert_eq!(prediction.record.year, 2023);
            assert_eq!(prediction.year, 2023);
            assert!(!prediction.synthesized);
        }

        // 2022 was even: driver 1 won, driver 2 second
        let by_driver = |id: u32| {
            result
                .predictions
                .iter()
                .find(|p| p.record.driver_id == id)
                .unwrap()
        };
        assert_eq!(by_driver(1).features.previous_position, Some(1.0));
        assert_eq!(by_driver(2).features.previous_position, Some(2.0));

        let mut ranks: Vec<u32> = result.predictions.iter().map(|p| p.predicted_rank).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, vec![1, 2]);

        let point_sum: u32 = result.predictions.iter().map(|p| p.predicted_points).sum();
        assert_eq!(point_sum, 43);
        for prediction in &result.predictions {
            assert_eq!(prediction.predicted_constructor_points, 43.0);
        }
    }

    #[test]
    fn test_years_without_training_are_skipped() {
        let dataset = create_dataset();
        let predictor = RollingPredictor::new(create_config(2018, 2019));
        let result = predictor.run(&dataset).unwrap();

        assert_eq!(
            result.years[0].status,
            YearStatus::Skipped(SkipReason::NoTrainingData)
        );
        assert_eq!(result.years[1].status, YearStatus::Predicted);
        assert_eq!(result.predicted_years(), 1);
        assert!(result.predictions.iter().all(|p| p.year == 2019));
    }

    #[test]
    fn test_cold_start_year_with_roster() {
        let dataset = create_dataset();
        let config = PipelineConfig {
            roster: vec!["2".to_string(), "1".to_string()],
            ..create_config(2024, 2024)
        };
        let result = RollingPredictor::new(config).run(&dataset).unwrap();

        assert_eq!(result.years[0].status, YearStatus::Predicted);
        assert!(result.years[0].cold_start);
        assert_eq!(result.years[0].mse, None);
        assert_eq!(result.predictions.len(), 2);
        assert!(result.predictions.iter().all(|p| p.synthesized));
        assert_eq!(result.predictions[0].record.driver_id, 2);
        // Both rows share the training means, so the first keeps rank 1
        assert_eq!(result.predictions[0].predicted_rank, 1);
        assert_eq!(result.predictions[0].record.constructor_id, 7);
    }

    #[test]
    fn test_unknown_roster_ids_are_ignored() {
        let dataset = create_dataset();
        let config = PipelineConfig {
            roster: vec!["2".to_string(), "99".to_string(), "Nobody".to_string()],
            ..create_config(2024, 2024)
        };
        let result = RollingPredictor::new(config).run(&dataset).unwrap();

        assert_eq!(result.predictions.len(), 1);
        assert_eq!(result.predictions[0].record.driver_id, 2);
        assert_eq!(result.predictions[0].record.constructor_id, 7);
    }

    #[test]
    fn test_failed_year_does_not_abort_run() {
        let dataset = create_dataset();
        let grid = ParamGrid {
            n_trees: vec![5],
            folds: 5,
            ..Default::default()
        };
        let config = PipelineConfig {
            grid_search: Some(grid),
            ..create_config(2019, 2023)
        };
        let result = RollingPredictor::new(config).run(&dataset).unwrap();

        // 2019 trains on 2 rows, too few for 5 folds
        assert!(matches!(result.years[0].status, YearStatus::Failed(_)));
        assert_eq!(result.years[4].status, YearStatus::Predicted);
        assert_eq!(result.years.len(), 5);
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let dataset = create_dataset();
        let a = RollingPredictor::new(create_config(2020, 2023))
            .run(&dataset)
            .unwrap();
        let b = RollingPredictor::new(create_config(2020, 2023))
            .run(&dataset)
            .unwrap();

        let values = |r: &PipelineResult| -> Vec<Option<f64>> {
            r.predictions.iter().map(|p| p.predicted_position()).collect()
        };
        assert_eq!(values(&a), values(&b));
    }

    #[test]
    fn test_multiple_targets() {
        let dataset = create_dataset();
        let config = PipelineConfig {
            targets: vec![TargetColumn::ResultPoints, TargetColumn::DriverWins],
            ..create_config(2023, 2023)
        };
        let result = RollingPredictor::new(config).run(&dataset).unwrap();

        assert_eq!(
            result.targets,
            vec![
                TargetColumn::PositionOrder,
                TargetColumn::ResultPoints,
                TargetColumn::DriverWins
            ]
        );
        for prediction in &result.predictions {
            assert!(prediction.predicted.contains_key(&TargetColumn::ResultPoints));
            // No driverWins labels in the dataset
            assert!(!prediction.predicted.contains_key(&TargetColumn::DriverWins));
        }
    }

    #[test]
    fn test_invalid_config_aborts() {
        let dataset = create_dataset();
        let result = RollingPredictor::new(create_config(2023, 2020)).run(&dataset);
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_mean_importances() {
        let dataset = create_dataset();
        let result = RollingPredictor::new(create_config(2021, 2023))
            .run(&dataset)
            .unwrap();
        let importances = result.mean_importances();
        assert_eq!(importances.len(), 4);
        assert_eq!(importances[0].0, "grid");
    }

    fn run_with(dataset: &Dataset, config: PipelineConfig) -> PipelineResult {
        RollingPredictor::new(config).run(dataset).unwrap()
    }

    #[test]
    fn test_track_feature_set_end_to_end() {
        let dataset = create_dataset();
        let config = PipelineConfig {
            feature_set: FeatureSet::Track,
            ..create_config(2023, 2023)
        };
        let result = run_with(&dataset, config);

        assert_eq!(result.years[0].status, YearStatus::Predicted);
        assert_eq!(result.feature_names.len(), 7);
        assert_eq!(result.years[0].importances.len(), 7);

        // Circuit 3 every season: driver 1 won 2018, 2020, 2022; driver 2 won 2019, 2021
        for prediction in &result.predictions {
            let expected_wins = if prediction.record.driver_id == 1 { 3.0 } else { 2.0 };
            assert_eq!(prediction.features.track_wins, expected_wins);
            assert_eq!(prediction.features.track_podiums, 5.0);
            assert!(prediction.features.track_avg_position.is_some());
        }
    }

    #[test]
    fn test_standings_feature_set_end_to_end() {
        let mut records = create_dataset().records().to_vec();
        for record in records.iter_mut() {
            let points = record.result_points;
            record.standings.driver_points = points;
            record.standings.driver_position = record.position_order;
        }
        let dataset = Dataset::from_records(records).unwrap();
        let config = PipelineConfig {
            feature_set: FeatureSet::Standings,
            ..create_config(2023, 2023)
        };
        let result = run_with(&dataset, config);

        assert_eq!(result.years[0].status, YearStatus::Predicted);
        assert_eq!(result.years[0].importances.len(), 5);

        // Snapshot after each driver's 2022 race
        for prediction in &result.predictions {
            let (points, position) = if prediction.record.driver_id == 1 {
                (25.0, 1.0)
            } else {
                (18.0, 2.0)
            };
            assert_eq!(prediction.features.prior_driver_points, Some(points));
            assert_eq!(prediction.features.prior_driver_position, Some(position));
            assert_eq!(prediction.features.prior_constructor_points, None);
        }
    }

    #[test]
    fn test_imputation_policies_end_to_end() {
        let dataset = create_dataset();

        // 2020 trains on 2018 (no history) and 2019 (2018 finishes 1 and 2)
        let zero = run_with(&dataset, create_config(2020, 2020));
        assert_eq!(zero.years[0].status, YearStatus::Predicted);
        assert_eq!(zero.years[0].fill_values, vec![0.0; 4]);

        let config = PipelineConfig {
            imputation: Imputation::TrainingMean,
            ..create_config(2020, 2020)
        };
        let mean = run_with(&dataset, config);
        assert_eq!(mean.years[0].status, YearStatus::Predicted);
        let fill = &mean.years[0].fill_values;
        assert!((fill[1] - 1.5).abs() < 1e-12);
        assert!((fill[2] - 1.5).abs() < 1e-12);
        assert!((fill[3] - 0.0).abs() < 1e-12);
        assert_eq!(mean.predictions.len(), 2);
    }

    #[test]
    fn test_constructor_scope_end_to_end() {
        let mut records = create_dataset().records().to_vec();
        // A second 2023 race with the same result
        let second: Vec<RaceRecord> = records
            .iter()
            .filter(|r| r.year == 2023)
            .map(|r| RaceRecord {
                race_id: r.race_id + 100,
                round: 2,
                ..r.clone()
            })
            .collect();
        records.extend(second);
        let dataset = Dataset::from_records(records).unwrap();

        let race = run_with(&dataset, create_config(2023, 2023));
        assert_eq!(race.predictions.len(), 4);
        assert!(race
            .predictions
            .iter()
            .all(|p| p.predicted_constructor_points == 43.0));

        let config = PipelineConfig {
            constructor_scope: ConstructorScope::Season,
            ..create_config(2023, 2023)
        };
        let season = run_with(&dataset, config);
        assert!(season
            .predictions
            .iter()
            .all(|p| p.predicted_constructor_points == 86.0));
    }
}
