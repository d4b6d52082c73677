//! Histogram gradient boosting for squared-error regression.

pub mod binning;
pub mod model;
pub mod tree;

use chrono::Utc;
use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::debug;

use crate::backend::FitData;
use crate::errors::FitError;
use crate::planner::TrainingParams;

use binning::BinMapper;
pub use model::BoostedModel;
use tree::{TreeBuilder, TreeConfig};

pub struct GradientBooster<'a> {
    params: &'a TrainingParams,
}

impl<'a> GradientBooster<'a> {
    pub fn new(params: &'a TrainingParams) -> Self {
        Self { params }
    }

    /// Fit on the training matrix, reporting validation RMSE periodically.
    /// Histogram work runs on a dedicated pool of `n_jobs` threads.
    pub fn fit(&self, data: &FitData) -> Result<BoostedModel, FitError> {
        data.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.params.n_jobs.max(1))
            .build()?;
        Ok(pool.install(|| self.boost(data)))
    }

    fn boost(&self, data: &FitData) -> BoostedModel {
        let p = self.params;
        let x = data.x_train.view();
        let y = data.y_train.view();
        let n_rows = x.nrows();
        let n_features = x.ncols();

        let mapper = BinMapper::fit(x, p.max_bin);
        let bins = mapper.transform(x);

        let base_score = y.iter().map(|v| f64::from(*v)).sum::<f64>() / n_rows as f64;
        let mut train_pred = vec![base_score; n_rows];
        let mut valid_pred = vec![base_score; data.x_valid.nrows()];

        let tree_config = TreeConfig {
            max_depth: p.max_depth,
            min_child_weight: p.min_child_weight,
            reg_lambda: p.reg_lambda,
            reg_alpha: p.reg_alpha,
            learning_rate: p.learning_rate,
        };
        let row_count = sample_size(n_rows, p.subsample);
        let feature_count = sample_size(n_features, p.colsample_bytree);
        let mut rng = StdRng::seed_from_u64(p.seed);
        let hessians = vec![1.0f64; n_rows];

        let mut trees = Vec::with_capacity(p.n_estimators);
        for round in 0..p.n_estimators {
            let gradients: Vec<f64> = train_pred
                .iter()
                .zip(y.iter())
                .map(|(pred, target)| pred - f64::from(*target))
                .collect();

            let rows = draw(&mut rng, n_rows, row_count);
            let features = draw(&mut rng, n_features, feature_count);

            let tree = TreeBuilder::new(&tree_config, &mapper, &bins, &gradients, &hessians, &features).build(&rows);

            apply(&tree, x, &mut train_pred);
            apply(&tree, data.x_valid.view(), &mut valid_pred);
            trees.push(tree);

            let done = round + 1;
            if p.eval_log_period > 0 && (done % p.eval_log_period == 0 || done == p.n_estimators) {
                debug!(
                    "[{}] train-rmse: {:.5} validation-rmse: {:.5}",
                    done,
                    rmse(&train_pred, y),
                    rmse(&valid_pred, data.y_valid.view())
                );
            }
        }

        BoostedModel {
            feature_names: data.feature_names.clone(),
            base_score,
            trees,
            params: p.clone(),
            trained_at: Utc::now(),
        }
    }
}

fn sample_size(n: usize, fraction: f64) -> usize {
    if fraction >= 1.0 {
        n
    } else {
        ((n as f64 * fraction).round() as usize).clamp(1, n.max(1))
    }
}

/// Sorted sample without replacement; the identity when `amount == n`.
fn draw(rng: &mut StdRng, n: usize, amount: usize) -> Vec<usize> {
    if amount >= n {
        return (0..n).collect();
    }
    let mut picked = sample(rng, n, amount).into_vec();
    picked.sort_unstable();
    picked
}

fn apply(tree: &tree::Tree, x: ArrayView2<f32>, preds: &mut [f64]) {
    preds
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, pred)| *pred += tree.predict(x.row(i)));
}

fn rmse(preds: &[f64], targets: ArrayView1<f32>) -> f64 {
    if preds.is_empty() {
        return 0.0;
    }
    let sse: f64 = preds
        .iter()
        .zip(targets.iter())
        .map(|(p, t)| (p - f64::from(*t)).powi(2))
        .sum();
    (sse / preds.len() as f64).sqrt()
}
