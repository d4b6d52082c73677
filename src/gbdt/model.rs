use chrono::{DateTime, Utc};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::tree::Tree;
use crate::planner::TrainingParams;

/// Fitted boosted ensemble, serialized as the model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedModel {
    pub feature_names: Vec<String>,
    pub base_score: f64,
    pub trees: Vec<Tree>,
    /// Parameters the ensemble was actually fitted with.
    pub params: TrainingParams,
    pub trained_at: DateTime<Utc>,
}

impl BoostedModel {
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn predict_row(&self, row: ArrayView1<f32>) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }

    pub fn predict(&self, x: ArrayView2<f32>) -> Array1<f32> {
        let out: Vec<f32> = (0..x.nrows())
            .into_par_iter()
            .map(|i| self.predict_row(x.row(i)) as f32)
            .collect();
        Array1::from(out)
    }
}
