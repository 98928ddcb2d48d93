//! Pipeline configuration
//!
//! Every variation point of the rolling prediction loop lives here. Values
//! come from defaults, an optional JSON file, then CLI overrides.

use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;
use tracing::info;

use crate::data::features::{FeatureSet, Imputation, DEFAULT_WINDOW};
use crate::data::splitter::{RosterPolicy, DEFAULT_LOOKBACK_YEARS};
use crate::error::{PipelineError, Result};
use crate::forest::{ForestConfig, ParamGrid};
use crate::models::TargetColumn;
use crate::scoring::ConstructorScope;

/// Rolling prediction configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// First target year (inclusive)
    pub start_year: i32,
    /// Last target year (inclusive)
    pub end_year: i32,
    /// Seasons before the target year used for training
    pub lookback: i32,
    pub feature_set: FeatureSet,
    /// Races in the rolling averages
    pub window: usize,
    pub imputation: Imputation,
    /// Columns to predict; `positionOrder` is always added
    pub targets: Vec<TargetColumn>,
    pub forest: ForestConfig,
    /// Tune the forest per year and target when set
    pub grid_search: Option<ParamGrid>,
    /// Driver ids or "Forename Surname" names
    pub roster: Vec<String>,
    pub roster_policy: RosterPolicy,
    pub train_active_only: bool,
    pub constructor_scope: ConstructorScope,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            start_year: 2018,
            end_year: 2023,
            lookback: DEFAULT_LOOKBACK_YEARS,
            feature_set: FeatureSet::Form,
            window: DEFAULT_WINDOW,
            imputation: Imputation::Zero,
            targets: vec![TargetColumn::PositionOrder],
            forest: ForestConfig::default(),
            grid_search: None,
            roster: Vec::new(),
            roster_policy: RosterPolicy::AllRows,
            train_active_only: false,
            constructor_scope: ConstructorScope::Race,
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file; absent fields keep their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Check every option before any computation starts
    pub fn validate(&self) -> Result<()> {
        if self.start_year > self.end_year {
            return Err(PipelineError::Config(format!(
                "start_year {} is after end_year {}",
                self.start_year, self.end_year
            )));
        }
        if self.lookback < 1 {
            return Err(PipelineError::Config("lookback must be at least 1 year".into()));
        }
        if self.window == 0 {
            return Err(PipelineError::Config("window must be at least 1 race".into()));
        }
        self.forest
            .validate()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        if let Some(grid) = &self.grid_search {
            if grid.is_empty() {
                return Err(PipelineError::Config("grid_search has an empty axis".into()));
            }
            if grid.folds < 2 {
                return Err(PipelineError::Config("grid_search folds must be at least 2".into()));
            }
            for candidate in grid.candidates(&self.forest) {
                candidate
                    .validate()
                    .map_err(|e| PipelineError::Config(format!("grid_search: {}", e)))?;
            }
        }

        if self.roster_policy == RosterPolicy::RosterOnly && self.roster.is_empty() {
            return Err(PipelineError::Config(
                "roster_only policy requires a roster".into(),
            ));
        }
        Ok(())
    }

    pub fn years(&self) -> RangeInclusive<i32> {
        self.start_year..=self.end_year
    }

    /// Targets in fit order: `positionOrder` first, then the rest without repeats
    pub fn effective_targets(&self) -> Vec<TargetColumn> {
        let mut targets = vec![TargetColumn::PositionOrder];
        for target in &self.targets {
            if !targets.contains(target) {
                targets.push(*target);
            }
        }
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.years(), 2018..=2023);
        assert_eq!(config.lookback, 5);
        assert_eq!(config.window, 10);
        assert!(config.grid_search.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_effective_targets_always_include_position() {
        let config = PipelineConfig {
            targets: vec![TargetColumn::Grid, TargetColumn::PositionOrder, TargetColumn::Grid],
            ..Default::default()
        };
        assert_eq!(
            config.effective_targets(),
            vec![TargetColumn::PositionOrder, TargetColumn::Grid]
        );

        let config = PipelineConfig {
            targets: vec![],
            ..Default::default()
        };
        assert_eq!(config.effective_targets(), vec![TargetColumn::PositionOrder]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = PipelineConfig {
            start_year: 2024,
            end_year: 2020,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let config = PipelineConfig {
            window: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            roster_policy: RosterPolicy::RosterOnly,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            grid_search: Some(ParamGrid {
                folds: 1,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "start_year": 2020,
                "feature_set": "track",
                "imputation": "training_mean",
                "targets": ["grid", "resultPoints"],
                "forest": {{ "n_trees": 50, "max_depth": 12, "min_samples_split": 2,
                             "min_samples_leaf": 1, "max_features": "sqrt",
                             "bootstrap": true, "seed": 42 }},
                "roster": ["Max Verstappen", "1"],
                "roster_policy": "roster_only",
                "constructor_scope": "season"
            }}"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = PipelineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.start_year, 2020);
        assert_eq!(config.end_year, 2023);
        assert_eq!(config.feature_set, FeatureSet::Track);
        assert_eq!(config.imputation, Imputation::TrainingMean);
        assert_eq!(config.forest.n_trees, 50);
        assert_eq!(config.forest.tree.max_depth, Some(12));
        assert_eq!(config.forest.seed, Some(42));
        assert_eq!(config.roster.len(), 2);
        assert_eq!(config.constructor_scope, ConstructorScope::Season);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_file_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        file.flush().unwrap();
        assert!(matches!(
            PipelineConfig::from_json_file(file.path()),
            Err(PipelineError::ConfigFile(_))
        ));
    }
}
