//! Quantile histogram bins for the booster's split search.

use ndarray::ArrayView2;
use rayon::prelude::*;

/// Per-feature cut points. Bin `b` holds values in `(cuts[b-1], cuts[b]]`;
/// the last bin holds everything above the final cut.
#[derive(Debug, Clone)]
pub struct BinMapper {
    cuts: Vec<Vec<f32>>,
}

/// Column-major bin indices of a training matrix.
#[derive(Debug, Clone)]
pub struct BinnedMatrix {
    pub columns: Vec<Vec<u16>>,
}

impl BinMapper {
    pub fn fit(x: ArrayView2<f32>, max_bin: usize) -> Self {
        let max_bin = max_bin.clamp(2, usize::from(u16::MAX));
        let cuts = (0..x.ncols())
            .into_par_iter()
            .map(|col| {
                let mut values: Vec<f32> = x.column(col).iter().copied().collect();
                values.sort_by(|a, b| a.total_cmp(b));
                feature_cuts(&values, max_bin)
            })
            .collect();
        Self { cuts }
    }

    pub fn n_bins(&self, feature: usize) -> usize {
        self.cuts[feature].len() + 1
    }

    /// Raw threshold equivalent to "bin <= `bin`".
    pub fn threshold(&self, feature: usize, bin: usize) -> f32 {
        self.cuts[feature][bin]
    }

    pub fn bin_of(&self, feature: usize, value: f32) -> u16 {
        self.cuts[feature].partition_point(|cut| *cut < value) as u16
    }

    pub fn transform(&self, x: ArrayView2<f32>) -> BinnedMatrix {
        let columns = (0..x.ncols())
            .into_par_iter()
            .map(|col| x.column(col).iter().map(|v| self.bin_of(col, *v)).collect())
            .collect();
        BinnedMatrix { columns }
    }
}

/// Midpoints between distinct values when they fit in `max_bin`, otherwise
/// evenly spaced quantiles of the sorted column.
fn feature_cuts(sorted: &[f32], max_bin: usize) -> Vec<f32> {
    let mut distinct = sorted.to_vec();
    distinct.dedup();

    if distinct.len() <= max_bin {
        return distinct.windows(2).map(|w| w[0] + (w[1] - w[0]) / 2.0).collect();
    }

    let n = sorted.len();
    let last = distinct[distinct.len() - 1];
    let mut cuts: Vec<f32> = (1..max_bin).map(|q| sorted[(q * n / max_bin).min(n - 1)]).collect();
    cuts.dedup();
    cuts.retain(|c| *c < last);
    cuts
}
