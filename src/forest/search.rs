//! Hyperparameter grid search with k-fold cross-validation

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{validate_matrix, ForestConfig, MaxFeatures, RandomForest};
use crate::error::ModelError;

/// Default number of cross-validation folds
pub const DEFAULT_FOLDS: usize = 5;

/// Values tried for each hyperparameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamGrid {
    pub n_trees: Vec<usize>,
    pub max_features: Vec<MaxFeatures>,
    pub max_depth: Vec<Option<usize>>,
    pub min_samples_split: Vec<usize>,
    pub min_samples_leaf: Vec<usize>,
    pub folds: usize,
}

impl Default for ParamGrid {
    fn default() -> Self {
        Self {
            n_trees: vec![100, 200],
            max_features: vec![MaxFeatures::Sqrt, MaxFeatures::Log2],
            max_depth: vec![Some(10), Some(20), Some(30)],
            min_samples_split: vec![2, 5],
            min_samples_leaf: vec![1, 2],
            folds: DEFAULT_FOLDS,
        }
    }
}

impl ParamGrid {
    /// Every combination, with `base` supplying bootstrap and seed
    ///
    /// Order: max_depth, max_features, min_samples_leaf, min_samples_split,
    /// n_trees, the last varying fastest.
    pub fn candidates(&self, base: &ForestConfig) -> Vec<ForestConfig> {
        let mut out = Vec::new();
        for &max_depth in &self.max_depth {
            for &max_features in &self.max_features {
                for &min_samples_leaf in &self.min_samples_leaf {
                    for &min_samples_split in &self.min_samples_split {
                        for &n_trees in &self.n_trees {
                            let mut config = *base;
                            config.n_trees = n_trees;
                            config.max_features = max_features;
                            config.tree.max_depth = max_depth;
                            config.tree.min_samples_split = min_samples_split;
                            config.tree.min_samples_leaf = min_samples_leaf;
                            out.push(config);
                        }
                    }
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.n_trees.len()
            * self.max_features.len()
            * self.max_depth.len()
            * self.min_samples_split.len()
            * self.min_samples_leaf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cross-validated score of one candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub config: ForestConfig,
    pub mse: f64,
}

/// Winner of a grid search and the scores of every candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub best: ForestConfig,
    pub best_mse: f64,
    pub results: Vec<SearchResult>,
}

/// Contiguous, unshuffled folds as (train, test) row indices
///
/// The first `n % k` folds hold one extra row.
pub fn kfold_indices(n: usize, k: usize) -> Result<Vec<(Vec<usize>, Vec<usize>)>, ModelError> {
    if k < 2 {
        return Err(ModelError::InvalidParameter(format!(
            "folds must be at least 2, got {}",
            k
        )));
    }
    if n < k {
        return Err(ModelError::InvalidParameter(format!(
            "{} rows cannot be split into {} folds",
            n, k
        )));
    }

    let base = n / k;
    let extra = n % k;
    let mut folds = Vec::with_capacity(k);
    let mut start = 0;
    for fold in 0..k {
        let size = base + usize::from(fold < extra);
        let end = start + size;
        let test: Vec<usize> = (start..end).collect();
        let train: Vec<usize> = (0..start).chain(end..n).collect();
        folds.push((train, test));
        start = end;
    }
    Ok(folds)
}

/// Pick the candidate with the lowest mean cross-validated MSE
///
/// Candidates are scored in parallel; ties go to the earliest candidate, so the
/// choice does not depend on scheduling.
pub fn grid_search(
    x: &[Vec<f64>],
    y: &[f64],
    grid: &ParamGrid,
    base: &ForestConfig,
) -> Result<SearchOutcome, ModelError> {
    validate_matrix(x)?;
    if y.len() != x.len() {
        return Err(ModelError::LabelMismatch {
            rows: x.len(),
            labels: y.len(),
        });
    }
    if grid.is_empty() {
        return Err(ModelError::InvalidParameter("parameter grid is empty".into()));
    }

    let folds = kfold_indices(x.len(), grid.folds)?;
    let candidates = grid.candidates(base);
    info!(
        "Grid search: {} candidates x {} folds on {} rows",
        candidates.len(),
        folds.len(),
        x.len()
    );

    let results: Vec<SearchResult> = candidates
        .into_par_iter()
        .map(|config| -> Result<SearchResult, ModelError> {
            let mse = cross_validate(x, y, &folds, &config)?;
            debug!(
                "n_trees={} max_features={} max_depth={:?} min_split={} min_leaf={} -> mse {:.4}",
                config.n_trees,
                config.max_features,
                config.tree.max_depth,
                config.tree.min_samples_split,
                config.tree.min_samples_leaf,
                mse
            );
            Ok(SearchResult { config, mse })
        })
        .collect::<Result<_, ModelError>>()?;

    let mut best_idx = 0;
    for (i, result) in results.iter().enumerate().skip(1) {
        if result.mse < results[best_idx].mse {
            best_idx = i;
        }
    }
    let best = results[best_idx].config;
    let best_mse = results[best_idx].mse;

    info!(
        "Best: n_trees={} max_features={} max_depth={:?} min_split={} min_leaf={} (cv mse {:.4})",
        best.n_trees,
        best.max_features,
        best.tree.max_depth,
        best.tree.min_samples_split,
        best.tree.min_samples_leaf,
        best_mse
    );

    Ok(SearchOutcome {
        best,
        best_mse,
        results,
    })
}

fn cross_validate(
    x: &[Vec<f64>],
    y: &[f64],
    folds: &[(Vec<usize>, Vec<usize>)],
    config: &ForestConfig,
) -> Result<f64, ModelError> {
    let mut total = 0.0;
    for (train, test) in folds {
        let train_x: Vec<Vec<f64>> = train.iter().map(|&i| x[i].clone()).collect();
        let train_y: Vec<f64> = train.iter().map(|&i| y[i]).collect();
        let test_x: Vec<Vec<f64>> = test.iter().map(|&i| x[i].clone()).collect();

        let forest = RandomForest::fit(&train_x, &train_y, config)?;
        let predicted = forest.predict(&test_x)?;
        let sse: f64 = test
            .iter()
            .zip(&predicted)
            .map(|(&i, p)| (y[i] - p).powi(2))
            .sum();
        total += sse / test.len() as f64;
    }
    Ok(total / folds.len() as f64)
}
