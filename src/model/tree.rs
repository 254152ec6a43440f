//! CART decision tree for binary classification
//!
//! Weighted Gini impurity, axis-aligned thresholds at midpoints between
//! distinct feature values, random feature subsets per split. Nodes live in
//! a flat arena so the tree serializes as a plain list.

use rand::seq::index;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Number of label classes
pub const N_CLASSES: usize = 2;

/// Weighted class totals
type ClassWeights = [f64; N_CLASSES];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        /// Class probabilities at this leaf (weighted)
        distribution: [f64; N_CLASSES],
    },
    Split {
        feature: usize,
        /// Rows with `x[feature] <= threshold` go left
        threshold: f32,
        left: usize,
        right: usize,
    },
}

/// Growth limits for a single tree
#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered at each split
    pub max_features: usize,
}

/// Training view shared by all trees of a forest
pub struct TrainingData<'a> {
    pub rows: &'a [Vec<f32>],
    pub labels: &'a [usize],
    /// Per-sample weight (class balancing)
    pub weights: &'a [f64],
    pub n_features: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

struct Builder<'a, 'b> {
    data: &'b TrainingData<'a>,
    params: TreeParams,
    rng: &'b mut ChaCha8Rng,
    nodes: Vec<Node>,
    /// Unnormalised impurity decrease per feature
    importances: Vec<f64>,
}

struct BestSplit {
    feature: usize,
    threshold: f32,
    decrease: f64,
}

fn gini(w: &ClassWeights) -> f64 {
    let total: f64 = w.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    1.0 - w.iter().map(|c| (c / total).powi(2)).sum::<f64>()
}

impl DecisionTree {
    /// Grow a tree on `sample` (row indices, duplicates allowed for
    /// bootstrap). Returns the tree and its unnormalised importances.
    pub fn fit(
        data: &TrainingData<'_>,
        sample: Vec<usize>,
        params: TreeParams,
        rng: &mut ChaCha8Rng,
    ) -> (Self, Vec<f64>) {
        let mut builder = Builder {
            data,
            params,
            rng,
            nodes: Vec::new(),
            importances: vec![0.0; data.n_features],
        };
        builder.grow(sample, 0);

        (
            Self {
                nodes: builder.nodes,
            },
            builder.importances,
        )
    }

    /// Leaf class distribution for one row
    pub fn predict_proba(&self, row: &[f32]) -> [f64; N_CLASSES] {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Leaf { distribution }) => return *distribution,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let value = row.get(*feature).copied().unwrap_or(0.0);
                    idx = if value <= *threshold { *left } else { *right };
                }
                // Unreachable for trees built by `fit`; be neutral for hand-edited artifacts
                None => return [0.5; N_CLASSES],
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(Node::Split { left, right, .. }) => 1 + walk(nodes, *left).max(walk(nodes, *right)),
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

impl<'a, 'b> Builder<'a, 'b> {
    fn class_weights(&self, sample: &[usize]) -> ClassWeights {
        let mut w = [0.0; N_CLASSES];
        for &i in sample {
            w[self.data.labels[i].min(N_CLASSES - 1)] += self.data.weights[i];
        }
        w
    }

    fn leaf(&mut self, weights: &ClassWeights) -> usize {
        let total: f64 = weights.iter().sum();
        let distribution = if total > 0.0 {
            [weights[0] / total, weights[1] / total]
        } else {
            [0.5; N_CLASSES]
        };
        self.nodes.push(Node::Leaf { distribution });
        self.nodes.len() - 1
    }

    fn grow(&mut self, sample: Vec<usize>, depth: usize) -> usize {
        let weights = self.class_weights(&sample);
        let impurity = gini(&weights);

        if depth >= self.params.max_depth
            || sample.len() < self.params.min_samples_split
            || impurity <= f64::EPSILON
        {
            return self.leaf(&weights);
        }

        let Some(best) = self.best_split(&sample, &weights, impurity) else {
            return self.leaf(&weights);
        };

        self.importances[best.feature] += best.decrease;

        let (left, right): (Vec<usize>, Vec<usize>) = sample
            .into_iter()
            .partition(|&i| self.data.rows[i][best.feature] <= best.threshold);

        // Reserve the slot so children get higher indices
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf {
            distribution: [0.5; N_CLASSES],
        });

        let left_idx = self.grow(left, depth + 1);
        let right_idx = self.grow(right, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: left_idx,
            right: right_idx,
        };
        idx
    }

    fn best_split(&mut self, sample: &[usize], node_weights: &ClassWeights, impurity: f64) -> Option<BestSplit> {
        let node_total: f64 = node_weights.iter().sum();
        let k = self.params.max_features.clamp(1, self.data.n_features);
        let mut candidates = index::sample(self.rng, self.data.n_features, k).into_vec();
        candidates.sort_unstable();

        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<BestSplit> = None;
        let mut order = sample.to_vec();

        for feature in candidates {
            let rows = self.data.rows;
            order.sort_by(|&a, &b| rows[a][feature].total_cmp(&rows[b][feature]).then(a.cmp(&b)));

            let mut left = [0.0; N_CLASSES];
            for pos in 0..order.len() - 1 {
                let i = order[pos];
                left[self.data.labels[i].min(N_CLASSES - 1)] += self.data.weights[i];

                let here = rows[i][feature];
                let next = rows[order[pos + 1]][feature];
                if here == next {
                    continue;
                }

                let n_left = pos + 1;
                if n_left < min_leaf || order.len() - n_left < min_leaf {
                    continue;
                }

                let right = [node_weights[0] - left[0], node_weights[1] - left[1]];
                let w_left: f64 = left.iter().sum();
                let w_right: f64 = right.iter().sum();
                let decrease = node_total * impurity - w_left * gini(&left) - w_right * gini(&right);

                if decrease > 1e-12 && best.as_ref().map_or(true, |b| decrease > b.decrease) {
                    let mut threshold = here + (next - here) / 2.0;
                    // Midpoint can round up to `next` for adjacent floats
                    if threshold >= next {
                        threshold = here;
                    }
                    best = Some(BestSplit {
                        feature,
                        threshold,
                        decrease,
                    });
                }
            }
        }

        best
    }
}
