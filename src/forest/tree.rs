//! CART regression tree
//!
//! Splits minimize the summed squared error of the children. Nodes are kept in
//! a flat vector; children always come after their parent.

use rand::seq::index::sample;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Gains below this are treated as no improvement
const MIN_GAIN: f64 = 1e-12;

/// Growth limits of a single tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeParams {
    /// None grows until the other limits stop it
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Fitted regression tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
    /// Total squared-error reduction per feature, normalized to sum to 1
    importances: Vec<f64>,
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl RegressionTree {
    /// Grow a tree on the rows listed in `samples` (repeats allowed)
    ///
    /// At every node `max_features` distinct features are drawn from `rng`
    /// and only those are searched. Inputs are assumed validated by the caller.
    pub fn fit<R: Rng>(
        x: &[Vec<f64>],
        y: &[f64],
        samples: &[usize],
        params: &TreeParams,
        max_features: usize,
        rng: &mut R,
    ) -> Self {
        let n_features = x.first().map(Vec::len).unwrap_or(0);
        let mut builder = TreeBuilder {
            x,
            y,
            params,
            n_features,
            max_features: max_features.clamp(1, n_features.max(1)),
            rng,
            nodes: Vec::new(),
            importances: vec![0.0; n_features],
        };

        builder.build(samples, 0);

        let total: f64 = builder.importances.iter().sum();
        if total > 0.0 {
            for imp in builder.importances.iter_mut() {
                *imp /= total;
            }
        }

        Self {
            nodes: builder.nodes,
            importances: builder.importances,
        }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Longest root-to-leaf path (a single leaf has depth 0)
    pub fn depth(&self) -> usize {
        self.depth_from(0)
    }

    fn depth_from(&self, idx: usize) -> usize {
        match &self.nodes[idx] {
            Node::Leaf { .. } => 0,
            Node::Split { left, right, .. } => {
                1 + self.depth_from(*left).max(self.depth_from(*right))
            }
        }
    }
}

struct TreeBuilder<'a, R> {
    x: &'a [Vec<f64>],
    y: &'a [f64],
    params: &'a TreeParams,
    n_features: usize,
    max_features: usize,
    rng: &'a mut R,
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

impl<'a, R: Rng> TreeBuilder<'a, R> {
    fn build(&mut self, samples: &[usize], depth: usize) -> usize {
        let n = samples.len();
        let (sum, sum_sq) = samples.iter().fold((0.0, 0.0), |(s, sq), &i| {
            let v = self.y[i];
            (s + v, sq + v * v)
        });
        let value = if n == 0 { 0.0 } else { sum / n as f64 };
        let sse = if n == 0 { 0.0 } else { sum_sq - sum * sum / n as f64 };

        let depth_reached = self.params.max_depth.is_some_and(|max| depth >= max);
        if depth_reached
            || n < self.params.min_samples_split
            || n < 2 * self.params.min_samples_leaf
            || sse <= MIN_GAIN
            || self.n_features == 0
        {
            return self.push(Node::Leaf { value });
        }

        let Some(best) = self.best_split(samples, sum, sum_sq) else {
            return self.push(Node::Leaf { value });
        };

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .partition(|&&i| self.x[i][best.feature] <= best.threshold);
        self.importances[best.feature] += best.gain;

        // Reserve the slot, children are pushed after it
        let id = self.push(Node::Leaf { value });
        let left_id = self.build(&left, depth + 1);
        let right_id = self.build(&right, depth + 1);
        self.nodes[id] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: left_id,
            right: right_id,
        };
        id
    }

    fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Best squared-error reduction over a random subset of features
    fn best_split(&mut self, samples: &[usize], sum: f64, sum_sq: f64) -> Option<SplitCandidate> {
        let n = samples.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let parent_sse = sum_sq - sum * sum / n as f64;
        let features = sample(&mut *self.rng, self.n_features, self.max_features).into_vec();

        let mut order = samples.to_vec();
        let mut best: Option<SplitCandidate> = None;

        for feature in features {
            let x = self.x;
            order.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for pos in 0..n - 1 {
                let v = self.y[order[pos]];
                left_sum += v;
                left_sq += v * v;

                let left_n = pos + 1;
                let right_n = n - left_n;
                if left_n < min_leaf || right_n < min_leaf {
                    continue;
                }

                let lo = x[order[pos]][feature];
                let hi = x[order[pos + 1]][feature];
                if lo >= hi {
                    continue;
                }

                let right_sum = sum - left_sum;
                let right_sq = sum_sq - left_sq;
                let left_sse = left_sq - left_sum * left_sum / left_n as f64;
                let right_sse = right_sq - right_sum * right_sum / right_n as f64;
                let gain = parent_sse - left_sse - right_sse;

                if gain > MIN_GAIN && best.map_or(true, |b| gain > b.gain) {
                    let mut threshold = lo + (hi - lo) / 2.0;
                    // Midpoint can round up to `hi` for adjacent floats
                    if threshold >= hi {
                        threshold = lo;
                    }
                    best = Some(SplitCandidate {
                        feature,
                        threshold,
                        gain,
                    });
                }
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        // y jumps from 1 to 9 at x0 = 5; x1 is noise
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64, ((i * 7) % 3) as f64]).collect();
        let y: Vec<f64> = (0..10).map(|i| if i < 5 { 1.0 } else { 9.0 }).collect();
        (x, y)
    }

    fn fit(x: &[Vec<f64>], y: &[f64], params: TreeParams) -> RegressionTree {
        let samples: Vec<usize> = (0..x.len()).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        RegressionTree::fit(x, y, &samples, &params, x[0].len(), &mut rng)
    }

    #[test]
    fn test_learns_step_function() {
        let (x, y) = step_data();
        let tree = fit(&x, &y, TreeParams::default());

        assert_eq!(tree.predict_row(&[2.0, 0.0]), 1.0);
        assert_eq!(tree.predict_row(&[7.0, 0.0]), 9.0);
        // One split separates the two plateaus exactly
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.node_count(), 3);
    }

    #[test]
    fn test_importance_goes_to_informative_feature() {
        let (x, y) = step_data();
        let tree = fit(&x, &y, TreeParams::default());
        let imp = tree.feature_importances();
        assert!((imp[0] - 1.0).abs() < 1e-12);
        assert_eq!(imp[1], 0.0);
    }

    #[test]
    fn test_constant_target_is_single_leaf() {
        let x: Vec<Vec<f64>> = (0..6).map(|i| vec![i as f64]).collect();
        let y = vec![4.0; 6];
        let tree = fit(&x, &y, TreeParams::default());
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.predict_row(&[100.0]), 4.0);
        assert_eq!(tree.feature_importances(), &[0.0]);
    }

    #[test]
    fn test_max_depth_limits_growth() {
        let x: Vec<Vec<f64>> = (0..32).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..32).map(|i| (i * i) as f64).collect();
        let params = TreeParams {
            max_depth: Some(2),
            ..Default::default()
        };
        let tree = fit(&x, &y, params);
        assert!(tree.depth() <= 2);
    }

    #[test]
    fn test_min_samples_leaf_respected() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let mut y = vec![0.0; 10];
        y[9] = 100.0;
        let params = TreeParams {
            min_samples_leaf: 3,
            ..Default::default()
        };
        let tree = fit(&x, &y, params);
        // The lone outlier cannot be isolated in its own leaf
        assert!(tree.predict_row(&[9.0]) < 100.0);
    }

    #[test]
    fn test_duplicate_feature_values_not_split() {
        let x = vec![vec![1.0], vec![1.0], vec![1.0]];
        let y = vec![1.0, 2.0, 3.0];
        let tree = fit(&x, &y, TreeParams::default());
        assert_eq!(tree.node_count(), 1);
        assert!((tree.predict_row(&[1.0]) - 2.0).abs() < 1e-12);
    }
}
