use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::errors::ConfigError;

pub const METRICS_LOG_FILENAME: &str = "metrics.log";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathConfig,
    pub features: FeatureConfig,
    pub limits: TrainingLimits,
    pub booster: BoosterConfig,
    pub accelerator: AcceleratorConfig,
    /// Unit of the published forecast table. The model itself is trained in
    /// Fahrenheit.
    pub report_unit: TemperatureUnit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub raw_weather_history: PathBuf,
    pub weather_history: PathBuf,
    pub heat_index: PathBuf,
    pub predictions: PathBuf,
    pub model: PathBuf,
    pub logs_dir: PathBuf,
    /// When set, the feature table is written here as parquet.
    pub checkpoint_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub max_lag_days: u32,
    pub rolling_window_days: u32,
    pub validation_days: i64,
    pub fallback_split_fraction: f64,
    pub seasonality_period: f64,
    pub forecast_horizon_days: i64,
}

/// Bounds and profiles for the size-adaptive training plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingLimits {
    pub large_dataset_rows: usize,
    pub min_estimators: usize,
    pub max_estimators: usize,
    pub small_depth: usize,
    pub large_depth: usize,
    pub small_learning_rate: f64,
    pub large_learning_rate: f64,
    pub small_subsample: f64,
    pub large_subsample: f64,
}

/// Parameters shared by every plan regardless of dataset size.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoosterConfig {
    pub colsample_bytree: f64,
    pub reg_lambda: f64,
    pub reg_alpha: f64,
    pub min_child_weight: f64,
    pub max_bin: usize,
    pub seed: u64,
    pub eval_log_period: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceleratorConfig {
    /// Program and arguments of the accelerated training worker.
    pub worker_command: Vec<String>,
    pub device_ordinal: u32,
    /// Skip accelerator discovery and plan for the CPU back-end directly.
    pub force_cpu: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathConfig::default(),
            features: FeatureConfig::default(),
            limits: TrainingLimits::default(),
            booster: BoosterConfig::default(),
            accelerator: AcceleratorConfig::default(),
            report_unit: TemperatureUnit::Celsius,
        }
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            raw_weather_history: PathBuf::from("data/raw/weather_history.csv"),
            weather_history: PathBuf::from("data/clean/weather_history.csv"),
            heat_index: PathBuf::from("data/clean/weather_heat_index.csv"),
            predictions: PathBuf::from("data/output/heat_index_predictions.csv"),
            model: PathBuf::from("models/heat_index_gbdt.json"),
            logs_dir: PathBuf::from("logs"),
            checkpoint_dir: None,
        }
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            max_lag_days: 7,
            rolling_window_days: 7,
            validation_days: 90,
            fallback_split_fraction: 0.8,
            seasonality_period: 365.25,
            forecast_horizon_days: 14,
        }
    }
}

impl Default for TrainingLimits {
    fn default() -> Self {
        Self {
            large_dataset_rows: 30_000,
            min_estimators: 800,
            max_estimators: 2500,
            small_depth: 6,
            large_depth: 7,
            small_learning_rate: 0.08,
            large_learning_rate: 0.05,
            small_subsample: 1.0,
            large_subsample: 0.9,
        }
    }
}

impl Default for BoosterConfig {
    fn default() -> Self {
        Self {
            colsample_bytree: 0.9,
            reg_lambda: 1.0,
            reg_alpha: 0.0,
            min_child_weight: 1.0,
            max_bin: 256,
            seed: 42,
            eval_log_period: 100,
        }
    }
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            worker_command: vec!["python3".to_string(), "gpu_boost_worker.py".to_string()],
            device_ordinal: 0,
            force_cpu: false,
        }
    }
}

impl PathConfig {
    pub fn metrics_log(&self) -> PathBuf {
        self.logs_dir.join(METRICS_LOG_FILENAME)
    }
}

impl Config {
    /// Load a JSON configuration file. Missing sections take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let file = File::open(path).map_err(|e| ConfigError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Config =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| ConfigError::JsonParseError {
                path: path.to_path_buf(),
                source: e,
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `HEAT_INDEX_*` and `CUDA_VISIBLE_DEVICES` overrides.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(days) = env_parse::<i64>("HEAT_INDEX_HORIZON_DAYS")? {
            self.features.forecast_horizon_days = days;
        }

        if let Some(days) = env_parse::<i64>("HEAT_INDEX_VALIDATION_DAYS")? {
            self.features.validation_days = days;
        }

        if let Some(lags) = env_parse::<u32>("HEAT_INDEX_MAX_LAG_DAYS")? {
            self.features.max_lag_days = lags;
        }

        if let Some(force) = env_flag("HEAT_INDEX_FORCE_CPU")? {
            self.accelerator.force_cpu = force;
        }

        if let Ok(command) = std::env::var("HEAT_INDEX_WORKER_COMMAND") {
            let parts: Vec<String> = command.split_whitespace().map(str::to_string).collect();
            if parts.is_empty() {
                return Err(ConfigError::InvalidEnv {
                    var: "HEAT_INDEX_WORKER_COMMAND".to_string(),
                    value: command,
                    message: "command is empty".to_string(),
                });
            }
            self.accelerator.worker_command = parts;
        }

        if let Ok(devices) = std::env::var("CUDA_VISIBLE_DEVICES") {
            self.apply_visible_devices(&devices);
        }

        self.validate()?;
        Ok(self)
    }

    /// Only the first listed device is used. An empty list or a negative
    /// index hides every accelerator; a UUID entry keeps ordinal 0.
    fn apply_visible_devices(&mut self, devices: &str) {
        let first = devices.split(',').next().unwrap_or_default().trim();
        if first.is_empty() || first.starts_with('-') {
            self.accelerator.force_cpu = true;
            return;
        }
        match first.parse::<u32>() {
            Ok(ordinal) => self.accelerator.device_ordinal = ordinal,
            Err(_) => {
                warn!(
                    "CUDA_VISIBLE_DEVICES entry {:?} is not an index; using device ordinal 0",
                    first
                );
                self.accelerator.device_ordinal = 0;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let f = &self.features;
        if !(f.fallback_split_fraction > 0.0 && f.fallback_split_fraction < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "fallback_split_fraction must be in (0, 1), got {}",
                f.fallback_split_fraction
            )));
        }
        if f.seasonality_period <= 0.0 {
            return Err(ConfigError::Invalid("seasonality_period must be positive".into()));
        }
        if f.rolling_window_days == 0 {
            return Err(ConfigError::Invalid("rolling_window_days must be at least 1".into()));
        }

        let l = &self.limits;
        if l.min_estimators == 0 || l.min_estimators > l.max_estimators {
            return Err(ConfigError::Invalid(format!(
                "estimator bounds must satisfy 0 < min ({}) <= max ({})",
                l.min_estimators, l.max_estimators
            )));
        }
        for subsample in [l.small_subsample, l.large_subsample] {
            if !(subsample > 0.0 && subsample <= 1.0) {
                return Err(ConfigError::Invalid(format!("subsample must be in (0, 1], got {subsample}")));
            }
        }

        let b = &self.booster;
        if !(b.colsample_bytree > 0.0 && b.colsample_bytree <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "colsample_bytree must be in (0, 1], got {}",
                b.colsample_bytree
            )));
        }
        if b.max_bin < 2 {
            return Err(ConfigError::Invalid("max_bin must be at least 2".into()));
        }
        if b.reg_lambda < 0.0 || b.reg_alpha < 0.0 {
            return Err(ConfigError::Invalid("regularisation terms must be non-negative".into()));
        }

        if self.accelerator.worker_command.is_empty() {
            return Err(ConfigError::Invalid("accelerator.worker_command is empty".into()));
        }

        Ok(())
    }
}

fn env_parse<T>(var: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                var: var.to_string(),
                value: value.clone(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

/// Boolean switch accepting `true/false`, `1/0`, `yes/no` and `on/off`.
fn env_flag(var: &str) -> Result<Option<bool>, ConfigError> {
    let Ok(value) = std::env::var(var) else {
        return Ok(None);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(Some(true)),
        "false" | "0" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidEnv {
            var: var.to_string(),
            value,
            message: "expected true/false, 1/0, yes/no or on/off".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.features.forecast_horizon_days, 14);
        assert_eq!(config.features.validation_days, 90);
        assert_eq!(config.limits.min_estimators, 800);
        assert_eq!(config.paths.metrics_log(), PathBuf::from("logs/metrics.log"));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"features": {{"forecast_horizon_days": 7}}, "report_unit": "fahrenheit"}}"#).unwrap();
        file.flush().unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.features.forecast_horizon_days, 7);
        assert_eq!(config.features.max_lag_days, 7);
        assert_eq!(config.report_unit, TemperatureUnit::Fahrenheit);
        assert_eq!(config.booster.max_bin, 256);
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let missing = Config::from_file(Path::new("/nonexistent/heat_index.json"));
        assert!(matches!(missing, Err(ConfigError::NotFound { .. })));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{ not json").unwrap();
        file.flush().unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::JsonParseError { .. })
        ));
    }

    #[test]
    fn test_validation_rejects_bad_fraction() {
        let mut config = Config::default();
        config.features.fallback_split_fraction = 1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.limits.min_estimators = 3000;
        assert!(config.validate().is_err());
    }

    const ENV_VARS: [&str; 6] = [
        "HEAT_INDEX_HORIZON_DAYS",
        "HEAT_INDEX_VALIDATION_DAYS",
        "HEAT_INDEX_MAX_LAG_DAYS",
        "HEAT_INDEX_FORCE_CPU",
        "HEAT_INDEX_WORKER_COMMAND",
        "CUDA_VISIBLE_DEVICES",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    // Environment variables are process-wide, so every env scenario lives in
    // this one test.
    #[test]
    fn test_env_overrides() {
        clear_env();

        std::env::set_var("HEAT_INDEX_HORIZON_DAYS", "21");
        std::env::set_var("HEAT_INDEX_VALIDATION_DAYS", " 30 ");
        std::env::set_var("HEAT_INDEX_MAX_LAG_DAYS", "3");
        std::env::set_var("HEAT_INDEX_WORKER_COMMAND", "python3 -m boost_worker");
        std::env::set_var("CUDA_VISIBLE_DEVICES", "2,3");
        let config = Config::default().with_env_overrides().unwrap();
        assert_eq!(config.features.forecast_horizon_days, 21);
        assert_eq!(config.features.validation_days, 30);
        assert_eq!(config.features.max_lag_days, 3);
        assert_eq!(config.accelerator.worker_command, vec!["python3", "-m", "boost_worker"]);
        assert_eq!(config.accelerator.device_ordinal, 2);
        assert!(!config.accelerator.force_cpu);
        clear_env();

        for (value, expected) in [("1", true), ("YES", true), ("on", true), ("0", false), ("no", false), ("false", false)] {
            std::env::set_var("HEAT_INDEX_FORCE_CPU", value);
            let config = Config::default().with_env_overrides().unwrap();
            assert_eq!(config.accelerator.force_cpu, expected, "HEAT_INDEX_FORCE_CPU={value}");
        }
        std::env::set_var("HEAT_INDEX_FORCE_CPU", "maybe");
        assert!(matches!(
            Config::default().with_env_overrides(),
            Err(ConfigError::InvalidEnv { .. })
        ));
        clear_env();

        for hidden in ["-1", "", " ", "-1,0"] {
            std::env::set_var("CUDA_VISIBLE_DEVICES", hidden);
            let config = Config::default().with_env_overrides().unwrap();
            assert!(config.accelerator.force_cpu, "CUDA_VISIBLE_DEVICES={hidden:?}");
        }
        std::env::set_var("CUDA_VISIBLE_DEVICES", "GPU-8f3a2c1e-0000-1111-2222-333344445555");
        let config = Config::default().with_env_overrides().unwrap();
        assert!(!config.accelerator.force_cpu);
        assert_eq!(config.accelerator.device_ordinal, 0);
        clear_env();

        std::env::set_var("HEAT_INDEX_WORKER_COMMAND", "   ");
        assert!(matches!(
            Config::default().with_env_overrides(),
            Err(ConfigError::InvalidEnv { .. })
        ));
        std::env::set_var("HEAT_INDEX_WORKER_COMMAND", "worker");
        std::env::set_var("HEAT_INDEX_HORIZON_DAYS", "two weeks");
        assert!(matches!(
            Config::default().with_env_overrides(),
            Err(ConfigError::InvalidEnv { .. })
        ));
        clear_env();
    }
}
