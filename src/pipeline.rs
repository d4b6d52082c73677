use chrono::Utc;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

use crate::backend::{FitData, Fitter};
use crate::cleaning::WeatherCleaner;
use crate::config::Config;
use crate::errors::{PipelineError, Stage};
use crate::exporter::ForecastExporter;
use crate::features::{feature_matrix, target_vector, FeatureBuilder, FeatureRow, FeatureTable};
use crate::hardware::HostCapabilities;
use crate::heat_index_table::{HeatIndexSummary, HeatIndexTableBuilder};
use crate::io;
use crate::metrics::{RunMetrics, ValidationMetrics};
use crate::planner::{plan, TrainingParams};
use crate::split::{HorizonSplitter, SplitStrategy, TrainValidSplitter};
use crate::trainer::{ModelTrainer, TrainedModel};

pub const CHECKPOINT_FILENAME: &str = "features.parquet";

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Exported { rows: usize, path: PathBuf },
    /// No forecast-horizon rows; the run still succeeds.
    EmptyForecast,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub metrics: ValidationMetrics,
    pub params: TrainingParams,
    pub fell_back: bool,
    pub split_strategy: SplitStrategy,
    pub trained_on_full_dataset: bool,
}

/// Fill gaps in the raw weather history.
pub fn clean_weather(config: &Config) -> Result<usize, PipelineError> {
    info!("Cleaning {:?}", config.paths.raw_weather_history);
    WeatherCleaner
        .clean(&config.paths.raw_weather_history, &config.paths.weather_history)
        .map_err(|e| e.in_stage(Stage::Clean))
}

/// Derive the heat index table from the cleaned weather history.
pub fn compute_heat_index(config: &Config) -> Result<HeatIndexSummary, PipelineError> {
    HeatIndexTableBuilder
        .build(&config.paths.weather_history, &config.paths.heat_index)
        .map_err(|e| e.in_stage(Stage::ComputeHeatIndex))
}

/// Load → features → split → plan → train → evaluate → persist → export.
pub struct ForecastPipeline<'a> {
    config: &'a Config,
    host: HostCapabilities,
    fitter: &'a dyn Fitter,
}

impl<'a> ForecastPipeline<'a> {
    pub fn new(config: &'a Config, host: HostCapabilities, fitter: &'a dyn Fitter) -> Self {
        Self { config, host, fitter }
    }

    pub fn run(&self) -> Result<RunReport, PipelineError> {
        let mut metrics = RunMetrics::new();
        let paths = &self.config.paths;
        let features = &self.config.features;

        info!("Stage 1: Loading {:?} and {:?}", paths.weather_history, paths.heat_index);
        let records = metrics.time(Stage::Load, || {
            let records = io::load_dataset(&paths.weather_history, &paths.heat_index)?;
            if records.is_empty() {
                return Err(PipelineError::InsufficientData("input tables have no rows".into()));
            }
            Ok(records)
        })?;
        info!("Loaded {} merged rows", records.len());

        info!("Stage 2: Building features");
        let table = metrics.time(Stage::Features, || {
            let table = FeatureBuilder::new(features).build(&records);
            if table.is_empty() {
                return Err(PipelineError::InsufficientData(
                    "no dense feature rows; history too short for the lag window".into(),
                ));
            }
            Ok(table)
        })?;
        drop(records);

        if let Some(dir) = &paths.checkpoint_dir {
            metrics.time(Stage::Checkpoint, || self.checkpoint(&table, dir))?;
        }

        info!("Stage 3: Splitting (horizon {} days)", features.forecast_horizon_days);
        let columns = table.columns.clone();
        let (split, forecast_rows, trained_on_full_dataset) = metrics.time(Stage::Split, || {
            let total = table.rows.len();
            let cities = table.city_count();
            let (trainable, forecast) = HorizonSplitter::new(features.forecast_horizon_days).split(table.rows);
            info!(
                "Reserved {} horizon days per city across {} cities: {} trainable rows, {} forecast rows",
                features.forecast_horizon_days.max(0),
                cities,
                trainable.len(),
                forecast.len()
            );

            // An empty trainable set means every row was reserved for the forecast.
            let (trainable, full) = if trainable.is_empty() {
                warn!(
                    event = "train_on_full_dataset",
                    "No trainable rows left after reserving the horizon; training on all {} rows",
                    total
                );
                (forecast.clone(), true)
            } else {
                (trainable, false)
            };

            let split = TrainValidSplitter::new(features.validation_days, features.fallback_split_fraction)
                .split(trainable)?;
            Ok((split, forecast, full))
        })?;

        info!("Stage 4: Training on {} rows", split.train.len());
        let data = fit_data(&columns, &split.train, &split.validation);
        let requested = plan(split.train.len(), &self.host, self.config);
        let trained: TrainedModel = metrics.time(Stage::Train, || {
            Ok(ModelTrainer::new(self.fitter).train(&data, &requested)?)
        })?;
        info!(
            "Model trained on {} back-end ({} trees){}",
            trained.params.device,
            trained.model.n_trees(),
            if trained.fell_back { " after CPU fallback" } else { "" }
        );

        info!("Stage 5: Evaluating on {} validation rows", split.validation.len());
        let validation = metrics.time(Stage::Evaluate, || {
            let predicted = trained.model.predict(data.x_valid.view());
            let scores = ValidationMetrics::compute(&data.y_valid, &predicted)?;
            info!(
                "Validation RMSE: {:.4} | MAE: {:.4} | R2: {:.4}",
                scores.rmse, scores.mae, scores.r2
            );
            io::append_line(&paths.metrics_log(), &scores.log_line(Utc::now()))?;
            Ok(scores)
        })?;

        metrics.time(Stage::SaveModel, || {
            io::write_json(&trained.model, &paths.model)?;
            info!("Saved model to {:?}", paths.model);
            Ok(())
        })?;

        info!("Stage 6: Exporting forecast");
        let outcome = metrics.time(Stage::Export, || {
            if forecast_rows.is_empty() {
                warn!(
                    event = "empty_forecast",
                    "No forecast-horizon rows; skipping prediction export"
                );
                return Ok(RunOutcome::EmptyForecast);
            }
            let exporter = ForecastExporter::new(self.config.report_unit);
            let rows = exporter.forecast(&trained.model, &forecast_rows);
            exporter.write(&rows, &paths.predictions)?;
            info!(
                "Generated {} forecast rows ({} per city)",
                rows.len(),
                features.forecast_horizon_days
            );
            Ok(RunOutcome::Exported {
                rows: rows.len(),
                path: paths.predictions.clone(),
            })
        })?;

        metrics.log_summary();

        Ok(RunReport {
            outcome,
            metrics: validation,
            params: trained.params,
            fell_back: trained.fell_back,
            split_strategy: split.strategy,
            trained_on_full_dataset,
        })
    }

    fn checkpoint(&self, table: &FeatureTable, dir: &std::path::Path) -> Result<(), PipelineError> {
        let path = dir.join(CHECKPOINT_FILENAME);
        let start = Instant::now();
        let mut df = table.to_dataframe().map_err(|source| PipelineError::Table {
            path: path.clone(),
            source,
        })?;
        io::write_parquet(&mut df, &path)?;
        info!(
            "Checkpointed {} feature rows to {:?} in {:.2?}",
            table.len(),
            path,
            start.elapsed()
        );
        Ok(())
    }
}

fn fit_data(columns: &[String], train: &[FeatureRow], validation: &[FeatureRow]) -> FitData {
    FitData {
        feature_names: columns.to_vec(),
        x_train: feature_matrix(train, columns.len()),
        y_train: target_vector(train),
        x_valid: feature_matrix(validation, columns.len()),
        y_valid: target_vector(validation),
    }
}
