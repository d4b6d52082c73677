//! Compute back-ends behind a single fit boundary.
//!
//! The CPU back-end is the in-process [`GradientBooster`]. The accelerated
//! back-end is an external worker process spoken to over JSON on
//! stdin/stdout; its failures are classified here into capability errors
//! (which the trainer may recover from) and everything else.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::{error, info, warn};

use crate::errors::{CapabilityKind, FitError};
use crate::gbdt::{BoostedModel, GradientBooster};
use crate::planner::{Device, TrainingParams};

/// Dense training and validation matrices for one fit.
#[derive(Debug, Clone)]
pub struct FitData {
    pub feature_names: Vec<String>,
    pub x_train: Array2<f32>,
    pub y_train: Array1<f32>,
    pub x_valid: Array2<f32>,
    pub y_valid: Array1<f32>,
}

impl FitData {
    pub fn validate(&self) -> Result<(), FitError> {
        if self.x_train.nrows() == 0 {
            return Err(FitError::InvalidInput("training matrix is empty".into()));
        }
        if self.x_train.nrows() != self.y_train.len() || self.x_valid.nrows() != self.y_valid.len() {
            return Err(FitError::InvalidInput("feature and target row counts differ".into()));
        }
        let width = self.feature_names.len();
        if self.x_train.ncols() != width || self.x_valid.ncols() != width {
            return Err(FitError::InvalidInput(format!(
                "expected {} feature columns, got {} (train) / {} (validation)",
                width,
                self.x_train.ncols(),
                self.x_valid.ncols()
            )));
        }
        let finite = |v: &f32| v.is_finite();
        if !(self.x_train.iter().all(finite) && self.y_train.iter().all(finite)) {
            return Err(FitError::InvalidInput("training data contains non-finite values".into()));
        }
        Ok(())
    }
}

/// One fit attempt with a fixed parameter set.
pub trait Fitter {
    fn fit(&self, data: &FitData, params: &TrainingParams) -> Result<BoostedModel, FitError>;
}

/// In-process CPU booster.
pub struct NativeFitter;

impl Fitter for NativeFitter {
    fn fit(&self, data: &FitData, params: &TrainingParams) -> Result<BoostedModel, FitError> {
        GradientBooster::new(params).fit(data)
    }
}

#[derive(Debug, Serialize)]
struct WorkerRequest<'a> {
    params: &'a TrainingParams,
    feature_names: &'a [String],
    x_train: Vec<Vec<f32>>,
    y_train: Vec<f32>,
    x_valid: Vec<Vec<f32>>,
    y_valid: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct WorkerResponse {
    status: String,
    model: Option<BoostedModel>,
    error: Option<String>,
    error_kind: Option<String>,
}

/// Accelerated training through an external worker process.
pub struct AcceleratorBridge {
    command: Vec<String>,
}

impl AcceleratorBridge {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    fn run_worker(&self, input: &[u8]) -> Result<String, FitError> {
        let (program, args) = self.command.split_first().ok_or_else(|| FitError::Capability {
            kind: CapabilityKind::WorkerMissing,
            message: "no worker command configured".into(),
        })?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FitError::Capability {
                kind: CapabilityKind::WorkerMissing,
                message: format!("failed to spawn '{}': {}", program, e),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input)
                .and_then(|_| stdin.flush())
                .map_err(|e| FitError::Worker(format!("failed to send request: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| FitError::Worker(format!("failed to collect worker output: {}", e)))?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        // A structured reply wins over the exit status.
        if !output.status.success() && stdout.trim().is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Accelerator worker exited with {}: {}", output.status, stderr.trim());
            return Err(FitError::Worker(format!("worker exited with {}: {}", output.status, stderr.trim())));
        }
        Ok(stdout)
    }
}

fn classify(kind: Option<&str>, message: String) -> FitError {
    let kind = match kind {
        Some("device_unavailable") => CapabilityKind::DeviceUnavailable,
        Some("driver_error") => CapabilityKind::DriverError,
        Some("out_of_memory") => CapabilityKind::OutOfMemory,
        _ => return FitError::Worker(message),
    };
    FitError::Capability { kind, message }
}

fn rows(x: &Array2<f32>) -> Vec<Vec<f32>> {
    x.rows().into_iter().map(|r| r.to_vec()).collect()
}

impl Fitter for AcceleratorBridge {
    fn fit(&self, data: &FitData, params: &TrainingParams) -> Result<BoostedModel, FitError> {
        data.validate()?;
        let request = WorkerRequest {
            params,
            feature_names: &data.feature_names,
            x_train: rows(&data.x_train),
            y_train: data.y_train.to_vec(),
            x_valid: rows(&data.x_valid),
            y_valid: data.y_valid.to_vec(),
        };
        let payload = serde_json::to_vec(&request)
            .map_err(|e| FitError::Worker(format!("failed to encode request: {}", e)))?;

        info!(
            "Sending {} training rows to accelerator worker (device {})",
            data.x_train.nrows(),
            params.device_ordinal
        );
        let stdout = self.run_worker(&payload)?;

        let response: WorkerResponse = serde_json::from_str(stdout.trim())
            .map_err(|e| FitError::Worker(format!("unparsable worker response: {}", e)))?;

        match response.status.as_str() {
            "success" => {
                let mut model = response
                    .model
                    .ok_or_else(|| FitError::Worker("success response without a model".into()))?;
                model.params = params.clone();
                Ok(model)
            }
            "error" => {
                let message = response.error.unwrap_or_else(|| "Unknown error".to_string());
                Err(classify(response.error_kind.as_deref(), message))
            }
            other => {
                warn!("Unexpected worker response status: {}", other);
                Err(FitError::Worker(format!("unexpected response status '{}'", other)))
            }
        }
    }
}

/// Routes each attempt to the back-end named by `params.device`.
pub struct DeviceFitter {
    native: NativeFitter,
    accelerator: AcceleratorBridge,
}

impl DeviceFitter {
    pub fn new(worker_command: Vec<String>) -> Self {
        Self {
            native: NativeFitter,
            accelerator: AcceleratorBridge::new(worker_command),
        }
    }
}

impl Fitter for DeviceFitter {
    fn fit(&self, data: &FitData, params: &TrainingParams) -> Result<BoostedModel, FitError> {
        match params.device {
            Device::Cpu => self.native.fit(data, params),
            Device::Cuda => self.accelerator.fit(data, params),
        }
    }
}
