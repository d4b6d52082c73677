//! Validation error metrics and per-run stage timings.

use chrono::{DateTime, SecondsFormat, Utc};
use ndarray::Array1;
use ndarray_stats::DeviationExt;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::info;

use crate::errors::{PipelineError, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValidationMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
}

impl ValidationMetrics {
    pub fn compute(actual: &Array1<f32>, predicted: &Array1<f32>) -> Result<Self, PipelineError> {
        let mse = predicted
            .mean_sq_err(actual)
            .map_err(|e| PipelineError::Metrics(e.to_string()))?;
        let mae = predicted
            .mean_abs_err(actual)
            .map_err(|e| PipelineError::Metrics(e.to_string()))?;

        let n = actual.len() as f64;
        let mean = actual.iter().map(|v| f64::from(*v)).sum::<f64>() / n;
        let ss_tot: f64 = actual.iter().map(|v| (f64::from(*v) - mean).powi(2)).sum();
        let ss_res = mse * n;
        // Constant targets: perfect fit scores 1, anything else 0.
        let r2 = if ss_tot > 0.0 {
            1.0 - ss_res / ss_tot
        } else if ss_res == 0.0 {
            1.0
        } else {
            0.0
        };

        Ok(Self {
            rmse: mse.sqrt(),
            mae,
            r2,
        })
    }

    /// One line of the append-only metrics log.
    pub fn log_line(&self, timestamp: DateTime<Utc>) -> String {
        format!(
            "{},rmse={:.4},mae={:.4},r2={:.4}",
            timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.rmse,
            self.mae,
            self.r2
        )
    }
}

/// Wall-clock time spent in each stage of one run.
#[derive(Debug)]
pub struct RunMetrics {
    started: Instant,
    stage_times: Vec<(Stage, Duration)>,
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            stage_times: Vec::new(),
        }
    }

    pub fn record(&mut self, stage: Stage, duration: Duration) {
        self.stage_times.push((stage, duration));
    }

    /// Run `op`, recording its duration and tagging any error with `stage`.
    pub fn time<T, F>(&mut self, stage: Stage, op: F) -> Result<T, PipelineError>
    where
        F: FnOnce() -> Result<T, PipelineError>,
    {
        let start = Instant::now();
        let result = op();
        self.record(stage, start.elapsed());
        result.map_err(|e| e.in_stage(stage))
    }

    #[cfg(test)]
    pub fn stage_times(&self) -> &[(Stage, Duration)] {
        &self.stage_times
    }

    pub fn total_duration(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn log_summary(&self) {
        info!("Run finished in {:.2?}", self.total_duration());
        for (stage, duration) in &self.stage_times {
            info!("  {}: {:.2?}", stage, duration);
        }
    }
}
