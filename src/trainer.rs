//! Back-end negotiation: try the requested device, fall back to the
//! portable CPU configuration once on a capability failure.

use tracing::{info, warn};

use crate::backend::{FitData, Fitter};
use crate::errors::TrainError;
use crate::gbdt::BoostedModel;
use crate::planner::{Device, TrainingParams};

#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub model: BoostedModel,
    /// Parameters of the attempt that succeeded.
    pub params: TrainingParams,
    pub fell_back: bool,
}

pub struct ModelTrainer<'a> {
    fitter: &'a dyn Fitter,
}

impl<'a> ModelTrainer<'a> {
    pub fn new(fitter: &'a dyn Fitter) -> Self {
        Self { fitter }
    }

    pub fn train(&self, data: &FitData, requested: &TrainingParams) -> Result<TrainedModel, TrainError> {
        info!(
            "Fitting {} trees (depth {}, lr {}, subsample {}) on {} back-end with {} threads",
            requested.n_estimators,
            requested.max_depth,
            requested.learning_rate,
            requested.subsample,
            requested.device,
            requested.n_jobs
        );

        let first_error = match self.fitter.fit(data, requested) {
            Ok(model) => {
                return Ok(TrainedModel {
                    model,
                    params: requested.clone(),
                    fell_back: false,
                })
            }
            Err(e) if !e.is_capability() => {
                return Err(TrainError::Fit {
                    device: requested.device,
                    source: e,
                })
            }
            Err(e) if requested.device == Device::Cpu => {
                return Err(TrainError::NoFallback {
                    device: requested.device,
                    source: e,
                })
            }
            Err(e) => e,
        };

        warn!(
            event = "cpu_fallback",
            "{} back-end unavailable ({}); retrying on cpu", requested.device, first_error
        );
        let portable = requested.portable();
        match self.fitter.fit(data, &portable) {
            Ok(model) => Ok(TrainedModel {
                model,
                params: portable,
                fell_back: true,
            }),
            Err(source) => Err(TrainError::FallbackFailed {
                accelerator_error: first_error.to_string(),
                source,
            }),
        }
    }
}
