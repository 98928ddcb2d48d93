//! Random Forest Regressor
//!
//! Bagged CART trees with per-split feature subsampling. Each tree draws from
//! its own ChaCha stream, so a seeded forest is identical whatever the thread
//! count. Without a seed every tree is seeded from OS entropy and results
//! vary run to run.

pub mod search;
pub mod tree;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::ModelError;
pub use search::{grid_search, kfold_indices, ParamGrid, SearchOutcome, SearchResult};
pub use tree::{RegressionTree, TreeParams};

/// Number of features searched at each split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    #[default]
    All,
    Sqrt,
    Log2,
    Count(usize),
}

impl MaxFeatures {
    /// Resolve against the number of input features (at least 1)
    pub fn resolve(&self, n_features: usize) -> usize {
        let n = n_features.max(1);
        let k = match self {
            MaxFeatures::All => n,
            MaxFeatures::Sqrt => (n as f64).sqrt().floor() as usize,
            MaxFeatures::Log2 => (n as f64).log2().floor() as usize,
            MaxFeatures::Count(k) => *k,
        };
        k.clamp(1, n)
    }
}

impl fmt::Display for MaxFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxFeatures::All => write!(f, "all"),
            MaxFeatures::Sqrt => write!(f, "sqrt"),
            MaxFeatures::Log2 => write!(f, "log2"),
            MaxFeatures::Count(k) => write!(f, "{}", k),
        }
    }
}

impl FromStr for MaxFeatures {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" | "auto" => Ok(MaxFeatures::All),
            "sqrt" => Ok(MaxFeatures::Sqrt),
            "log2" => Ok(MaxFeatures::Log2),
            other => other
                .parse::<usize>()
                .map(MaxFeatures::Count)
                .map_err(|_| format!("Unknown max_features: {}", other)),
        }
    }
}

/// Forest hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub n_trees: usize,
    #[serde(flatten)]
    pub tree: TreeParams,
    pub max_features: MaxFeatures,
    /// Fit each tree on a bootstrap sample (otherwise on every row)
    pub bootstrap: bool,
    pub seed: Option<u64>,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            tree: TreeParams::default(),
            max_features: MaxFeatures::All,
            bootstrap: true,
            seed: None,
        }
    }
}

impl ForestConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.n_trees == 0 {
            return Err(ModelError::InvalidParameter("n_trees must be at least 1".into()));
        }
        if self.tree.min_samples_split < 2 {
            return Err(ModelError::InvalidParameter(
                "min_samples_split must be at least 2".into(),
            ));
        }
        if self.tree.min_samples_leaf == 0 {
            return Err(ModelError::InvalidParameter(
                "min_samples_leaf must be at least 1".into(),
            ));
        }
        if self.tree.max_depth == Some(0) {
            return Err(ModelError::InvalidParameter("max_depth must be at least 1".into()));
        }
        if self.max_features == MaxFeatures::Count(0) {
            return Err(ModelError::InvalidParameter("max_features must be at least 1".into()));
        }
        Ok(())
    }
}

/// Fitted random forest regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    n_features: usize,
}

impl RandomForest {
    /// Fit on a dense feature matrix
    pub fn fit(x: &[Vec<f64>], y: &[f64], config: &ForestConfig) -> Result<Self, ModelError> {
        config.validate()?;
        let n_features = validate_matrix(x)?;
        if y.len() != x.len() {
            return Err(ModelError::LabelMismatch {
                rows: x.len(),
                labels: y.len(),
            });
        }
        if let Some(row) = y.iter().position(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite(row));
        }

        let n_rows = x.len();
        let max_features = config.max_features.resolve(n_features);

        let trees: Vec<RegressionTree> = (0..config.n_trees)
            .into_par_iter()
            .map(|i| {
                let mut rng = match config.seed {
                    Some(seed) => ChaCha8Rng::seed_from_u64(seed.wrapping_add(i as u64)),
                    None => ChaCha8Rng::from_entropy(),
                };
                let samples: Vec<usize> = if config.bootstrap {
                    (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect()
                } else {
                    (0..n_rows).collect()
                };
                RegressionTree::fit(x, y, &samples, &config.tree, max_features, &mut rng)
            })
            .collect();

        debug!(
            "Fitted {} trees on {} rows x {} features (max_features={})",
            trees.len(),
            n_rows,
            n_features,
            max_features
        );

        Ok(Self { trees, n_features })
    }

    /// Mean prediction of all trees per row
    pub fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, ModelError> {
        for (row, values) in x.iter().enumerate() {
            if values.len() != self.n_features {
                return Err(ModelError::RaggedFeatures {
                    row,
                    expected: self.n_features,
                    actual: values.len(),
                });
            }
        }

        let n_trees = self.trees.len() as f64;
        Ok(x.iter()
            .map(|row| self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / n_trees)
            .collect())
    }

    /// Mean of the per-tree normalized impurity decreases, summing to 1
    ///
    /// All zeros when no tree made a split.
    pub fn feature_importances(&self) -> Vec<f64> {
        let mut total = vec![0.0; self.n_features];
        for tree in &self.trees {
            for (acc, imp) in total.iter_mut().zip(tree.feature_importances()) {
                *acc += imp;
            }
        }

        let sum: f64 = total.iter().sum();
        if sum > 0.0 {
            for value in total.iter_mut() {
                *value /= sum;
            }
        }
        total
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

/// Check the matrix is non-empty, rectangular and finite; returns its width
pub(crate) fn validate_matrix(x: &[Vec<f64>]) -> Result<usize, ModelError> {
    let first = x.first().ok_or(ModelError::EmptyTrainingSet)?;
    let n_features = first.len();
    if n_features == 0 {
        return Err(ModelError::NoFeatures);
    }

    for (row, values) in x.iter().enumerate() {
        if values.len() != n_features {
            return Err(ModelError::RaggedFeatures {
                row,
                expected: n_features,
                actual: values.len(),
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite(row));
        }
    }
    Ok(n_features)
}
