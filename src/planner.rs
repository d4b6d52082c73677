//! Size- and host-adaptive choice of booster hyperparameters.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::Config;
use crate::hardware::HostCapabilities;

/// Compute back-end requested for a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cuda,
    Cpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cuda => f.write_str("cuda"),
            Device::Cpu => f.write_str("cpu"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Small,
    Large,
}

/// Effective booster configuration for one fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingParams {
    pub profile: Profile,
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub reg_lambda: f64,
    pub reg_alpha: f64,
    pub min_child_weight: f64,
    pub max_bin: usize,
    pub n_jobs: usize,
    pub device: Device,
    pub device_ordinal: u32,
    pub seed: u64,
    pub eval_log_period: usize,
}

impl TrainingParams {
    /// Same parameters pinned to the CPU back-end.
    pub fn portable(&self) -> Self {
        Self {
            device: Device::Cpu,
            ..self.clone()
        }
    }
}

/// Derive the training parameters from the trainable row count and the host.
pub fn plan(row_count: usize, host: &HostCapabilities, config: &Config) -> TrainingParams {
    let limits = &config.limits;
    let booster = &config.booster;

    let (profile, max_depth, learning_rate, subsample) = if row_count >= limits.large_dataset_rows {
        (
            Profile::Large,
            limits.large_depth,
            limits.large_learning_rate,
            limits.large_subsample,
        )
    } else {
        (
            Profile::Small,
            limits.small_depth,
            limits.small_learning_rate,
            limits.small_subsample,
        )
    };

    let n_estimators = (row_count / 15).clamp(limits.min_estimators, limits.max_estimators);

    let device = if host.accelerator.is_some() && !config.accelerator.force_cpu {
        Device::Cuda
    } else {
        Device::Cpu
    };

    TrainingParams {
        profile,
        n_estimators,
        max_depth,
        learning_rate,
        subsample,
        colsample_bytree: booster.colsample_bytree,
        reg_lambda: booster.reg_lambda,
        reg_alpha: booster.reg_alpha,
        min_child_weight: booster.min_child_weight,
        max_bin: booster.max_bin,
        n_jobs: host.logical_cpus.max(1),
        device,
        device_ordinal: config.accelerator.device_ordinal,
        seed: booster.seed,
        eval_log_period: booster.eval_log_period,
    }
}
