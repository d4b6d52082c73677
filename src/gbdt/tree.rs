//! Regression tree grown depth-first on gradient histograms.

use ndarray::ArrayView1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::binning::{BinMapper, BinnedMatrix};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    /// `x[feature] <= threshold` goes left.
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
    },
    Leaf { value: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn predict(&self, row: ArrayView1<f32>) -> f64 {
        let mut idx = 0usize;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    idx = match row.get(*feature) {
                        Some(v) if *v <= *threshold => *left,
                        Some(_) => *right,
                        None => return 0.0,
                    };
                }
                None => return 0.0,
            }
        }
    }

    #[cfg(test)]
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

#[derive(Debug, Clone)]
pub struct TreeConfig {
    pub max_depth: usize,
    pub min_child_weight: f64,
    pub reg_lambda: f64,
    pub reg_alpha: f64,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    bin: usize,
    gain: f64,
}

impl SplitCandidate {
    // Higher gain wins; ties go to the lower feature, then the lower bin.
    fn rank(&self, other: &Self) -> Ordering {
        self.gain
            .total_cmp(&other.gain)
            .then_with(|| other.feature.cmp(&self.feature))
            .then_with(|| other.bin.cmp(&self.bin))
    }
}

const MIN_SPLIT_GAIN: f64 = 1e-10;

pub struct TreeBuilder<'a> {
    config: &'a TreeConfig,
    mapper: &'a BinMapper,
    bins: &'a BinnedMatrix,
    gradients: &'a [f64],
    hessians: &'a [f64],
    features: &'a [usize],
}

impl<'a> TreeBuilder<'a> {
    pub fn new(
        config: &'a TreeConfig,
        mapper: &'a BinMapper,
        bins: &'a BinnedMatrix,
        gradients: &'a [f64],
        hessians: &'a [f64],
        features: &'a [usize],
    ) -> Self {
        Self {
            config,
            mapper,
            bins,
            gradients,
            hessians,
            features,
        }
    }

    pub fn build(&self, rows: &[usize]) -> Tree {
        let mut nodes = Vec::new();
        self.build_node(rows, 0, &mut nodes);
        Tree { nodes }
    }

    fn build_node(&self, rows: &[usize], depth: usize, nodes: &mut Vec<Node>) -> usize {
        let current = nodes.len();
        let (g, h) = self.sums(rows);

        let split = if depth >= self.config.max_depth || rows.len() < 2 {
            None
        } else {
            self.find_best_split(rows, g, h)
        };

        let Some(split) = split else {
            nodes.push(Node::Leaf {
                value: self.leaf_value(g, h),
            });
            return current;
        };

        let column = &self.bins.columns[split.feature];
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.iter().partition(|&&r| usize::from(column[r]) <= split.bin);

        // Reserve the parent slot, children are appended after it.
        nodes.push(Node::Split {
            feature: split.feature,
            threshold: self.mapper.threshold(split.feature, split.bin),
            left: 0,
            right: 0,
        });
        let left_idx = self.build_node(&left_rows, depth + 1, nodes);
        let right_idx = self.build_node(&right_rows, depth + 1, nodes);
        if let Node::Split { left, right, .. } = &mut nodes[current] {
            *left = left_idx;
            *right = right_idx;
        }
        current
    }

    fn find_best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        self.features
            .par_iter()
            .filter_map(|&feature| self.best_split_for_feature(feature, rows, g, h))
            .max_by(|a, b| a.rank(b))
    }

    fn best_split_for_feature(&self, feature: usize, rows: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        let n_bins = self.mapper.n_bins(feature);
        if n_bins < 2 {
            return None;
        }

        let column = &self.bins.columns[feature];
        let mut hist = vec![(0.0f64, 0.0f64); n_bins];
        for &r in rows {
            let slot = &mut hist[usize::from(column[r])];
            slot.0 += self.gradients[r];
            slot.1 += self.hessians[r];
        }

        let parent_score = self.score(g, h);
        let mut best: Option<SplitCandidate> = None;
        let (mut gl, mut hl) = (0.0, 0.0);
        for (bin, (bg, bh)) in hist.iter().enumerate().take(n_bins - 1) {
            gl += bg;
            hl += bh;
            let (gr, hr) = (g - gl, h - hl);
            if hl < self.config.min_child_weight || hr < self.config.min_child_weight {
                continue;
            }
            let gain = 0.5 * (self.score(gl, hl) + self.score(gr, hr) - parent_score);
            if gain > MIN_SPLIT_GAIN && best.map_or(true, |b| gain > b.gain) {
                best = Some(SplitCandidate { feature, bin, gain });
            }
        }
        best
    }

    fn sums(&self, rows: &[usize]) -> (f64, f64) {
        rows.iter()
            .fold((0.0, 0.0), |(g, h), &r| (g + self.gradients[r], h + self.hessians[r]))
    }

    fn soft_threshold(&self, g: f64) -> f64 {
        g.signum() * (g.abs() - self.config.reg_alpha).max(0.0)
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        let t = self.soft_threshold(g);
        t * t / (h + self.config.reg_lambda)
    }

    /// Newton step `-T(G)/(H+lambda)`, already scaled by the learning rate.
    fn leaf_value(&self, g: f64, h: f64) -> f64 {
        let denom = h + self.config.reg_lambda;
        if denom <= 0.0 {
            return 0.0;
        }
        -self.soft_threshold(g) / denom * self.config.learning_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn config(max_depth: usize) -> TreeConfig {
        TreeConfig {
            max_depth,
            min_child_weight: 1.0,
            reg_lambda: 0.0,
            reg_alpha: 0.0,
            learning_rate: 1.0,
        }
    }

    #[test]
    fn test_single_split_separates_step() {
        let x = array![[1.0f32], [2.0], [3.0], [4.0]];
        let mapper = BinMapper::fit(x.view(), 16);
        let bins = mapper.transform(x.view());
        // pred = 0, targets [0, 0, 10, 10] -> gradients = -targets.
        let gradients = vec![0.0, 0.0, -10.0, -10.0];
        let hessians = vec![1.0; 4];
        let cfg = config(1);
        let tree = TreeBuilder::new(&cfg, &mapper, &bins, &gradients, &hessians, &[0]).build(&[0, 1, 2, 3]);

        assert_eq!(tree.nodes.len(), 3);
        assert_eq!(tree.depth(), 1);
        assert_relative_eq!(tree.predict(x.row(0)), 0.0);
        assert_relative_eq!(tree.predict(x.row(3)), 10.0);
        assert_relative_eq!(tree.predict(array![2.6f32].view()), 10.0);
    }

    #[test]
    fn test_zero_depth_is_single_leaf() {
        let x = array![[1.0f32], [2.0]];
        let mapper = BinMapper::fit(x.view(), 16);
        let bins = mapper.transform(x.view());
        let gradients = vec![-2.0, -4.0];
        let hessians = vec![1.0; 2];
        let cfg = TreeConfig {
            learning_rate: 0.5,
            reg_lambda: 1.0,
            ..config(0)
        };
        let tree = TreeBuilder::new(&cfg, &mapper, &bins, &gradients, &hessians, &[0]).build(&[0, 1]);
        assert_eq!(tree.nodes.len(), 1);
        // -(-6) / (2 + 1) * 0.5
        assert_relative_eq!(tree.predict(x.row(0)), 1.0);
    }

    #[test]
    fn test_l1_shrinks_leaf_to_zero() {
        let x = array![[1.0f32], [2.0]];
        let mapper = BinMapper::fit(x.view(), 16);
        let bins = mapper.transform(x.view());
        let gradients = vec![-1.0, -1.0];
        let hessians = vec![1.0; 2];
        let cfg = TreeConfig {
            reg_alpha: 5.0,
            ..config(0)
        };
        let tree = TreeBuilder::new(&cfg, &mapper, &bins, &gradients, &hessians, &[0]).build(&[0, 1]);
        assert_relative_eq!(tree.predict(x.row(0)), 0.0);
    }

    #[test]
    fn test_only_sampled_features_are_used() {
        let x = array![[1.0f32, 10.0], [2.0, 20.0], [3.0, 30.0], [4.0, 40.0]];
        let mapper = BinMapper::fit(x.view(), 16);
        let bins = mapper.transform(x.view());
        let gradients = vec![1.0, 1.0, -1.0, -1.0];
        let hessians = vec![1.0; 4];
        let cfg = config(3);
        let tree = TreeBuilder::new(&cfg, &mapper, &bins, &gradients, &hessians, &[1]).build(&[0, 1, 2, 3]);
        for node in &tree.nodes {
            if let Node::Split { feature, .. } = node {
                assert_eq!(*feature, 1);
            }
        }
    }
}
