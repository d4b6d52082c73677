use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::planner::Device;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading config file {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse JSON configuration in {path}: {source}")]
    JsonParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Configuration file not found at {path}")]
    NotFound { path: PathBuf },
    #[error("Environment variable {var}='{value}' is invalid: {message}")]
    InvalidEnv {
        var: String,
        value: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Violations of the input table contract. Always fatal.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Table '{table}' ({path}) is missing columns: {missing:?}")]
    MissingColumns {
        table: &'static str,
        path: PathBuf,
        missing: Vec<String>,
    },
    #[error("Table '{table}' has an unparsable date '{value}' at row {row}")]
    InvalidDate {
        table: &'static str,
        row: usize,
        value: String,
    },
    #[error("Table '{table}' has a null key at row {row}")]
    NullKey { table: &'static str, row: usize },
    #[error("Duplicate key ({city}, {date}) in table '{table}'")]
    DuplicateKey {
        table: &'static str,
        city: String,
        date: String,
    },
    #[error("Key ({city}, {date}) is present in '{present_in}' but has no match in '{missing_from}'")]
    UnmatchedKey {
        city: String,
        date: String,
        present_in: &'static str,
        missing_from: &'static str,
    },
}

/// Failure of a single fit attempt on one back-end.
#[derive(Error, Debug)]
pub enum FitError {
    /// The requested compute capability is not usable on this host.
    #[error("accelerator unavailable ({kind}): {message}")]
    Capability {
        kind: CapabilityKind,
        message: String,
    },
    #[error("invalid training input: {0}")]
    InvalidInput(String),
    #[error("accelerator worker failed: {0}")]
    Worker(String),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl FitError {
    pub fn is_capability(&self) -> bool {
        matches!(self, FitError::Capability { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    DeviceUnavailable,
    DriverError,
    OutOfMemory,
    WorkerMissing,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CapabilityKind::DeviceUnavailable => "device unavailable",
            CapabilityKind::DriverError => "driver error",
            CapabilityKind::OutOfMemory => "out of device memory",
            CapabilityKind::WorkerMissing => "worker missing",
        };
        f.write_str(name)
    }
}

/// Terminal outcome of the back-end negotiation in the model trainer.
#[derive(Error, Debug)]
pub enum TrainError {
    #[error("fit on {device} back-end failed: {source}")]
    Fit {
        device: Device,
        #[source]
        source: FitError,
    },
    #[error("{device} back-end reported a capability error and no portable fallback remains: {source}")]
    NoFallback {
        device: Device,
        #[source]
        source: FitError,
    },
    #[error("CPU fallback failed after accelerator error ({accelerator_error}): {source}")]
    FallbackFailed {
        accelerator_error: String,
        #[source]
        source: FitError,
    },
}

/// Pipeline stage names, used to tell operators where a run died.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Clean,
    ComputeHeatIndex,
    Load,
    Features,
    Checkpoint,
    Split,
    Train,
    Evaluate,
    SaveModel,
    Export,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Clean => "clean",
            Stage::ComputeHeatIndex => "compute-heat-index",
            Stage::Load => "load",
            Stage::Features => "features",
            Stage::Checkpoint => "checkpoint",
            Stage::Split => "split",
            Stage::Train => "train",
            Stage::Evaluate => "evaluate",
            Stage::SaveModel => "save-model",
            Stage::Export => "export",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("Insufficient data: {0}")]
    InsufficientData(String),
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Table error on {path}: {source}")]
    Table {
        path: PathBuf,
        #[source]
        source: polars::error::PolarsError,
    },
    #[error("Model serialization error on {path}: {source}")]
    ModelFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Metric computation failed: {0}")]
    Metrics(String),
    #[error("Training failed: {0}")]
    Train(#[from] TrainError),
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Tag an error with the stage it escaped from.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            PipelineError::Stage { .. } => self,
            other => PipelineError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_tag_is_applied_once() {
        let err = PipelineError::InsufficientData("no rows".into())
            .in_stage(Stage::Split)
            .in_stage(Stage::Train);
        assert_eq!(err.stage(), Some(Stage::Split));
        let message = err.to_string();
        assert!(message.contains("split"));
        assert!(message.contains("no rows"));
    }

    #[test]
    fn test_capability_classification() {
        let cap = FitError::Capability {
            kind: CapabilityKind::DeviceUnavailable,
            message: "no CUDA device".into(),
        };
        assert!(cap.is_capability());
        assert!(!FitError::InvalidInput("empty".into()).is_capability());
        assert!(!FitError::Worker("crashed".into()).is_capability());
    }
}
