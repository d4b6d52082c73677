#[cfg(test)]
mod pipeline_tests {
    use crate::backend::{DeviceFitter, NativeFitter};
    use crate::data_models::ForecastRow;
    use crate::errors::{PipelineError, SchemaError, Stage};
    use crate::gbdt::BoostedModel;
    use crate::hardware::{AcceleratorInfo, HostCapabilities};
    use crate::io::read_csv;
    use crate::pipeline::{ForecastPipeline, RunOutcome, CHECKPOINT_FILENAME};
    use crate::planner::Device;
    use crate::split::SplitStrategy;
    use crate::tests::test_helpers::*;
    use std::fs;
    use tempfile::tempdir;

    fn forecast_rows(path: &std::path::Path) -> Vec<ForecastRow> {
        let df = read_csv(path).unwrap();
        let cities = crate::io::text_column(&df, "city").unwrap();
        let dates = crate::io::text_column(&df, "date").unwrap();
        let actual = crate::io::float_column(&df, "heat_index_actual").unwrap();
        let pred = crate::io::float_column(&df, "heat_index_pred").unwrap();
        let residual = crate::io::float_column(&df, "residual").unwrap();
        (0..df.height())
            .map(|i| ForecastRow {
                city: cities[i].clone().unwrap(),
                date: crate::io::parse_date(dates[i].as_deref().unwrap()).unwrap(),
                heat_index_actual: actual[i].unwrap(),
                heat_index_pred: pred[i].unwrap(),
                residual: residual[i].unwrap(),
            })
            .collect()
    }

    #[test]
    fn test_end_to_end_three_cities() {
        let dir = tempdir().unwrap();
        let (weather, heat) = write_synthetic_inputs(dir.path(), &CITIES, 400, 7);
        let mut config = test_config(dir.path(), weather, heat);
        config.paths.checkpoint_dir = Some(dir.path().join("checkpoints"));

        let fitter = NativeFitter;
        let report = ForecastPipeline::new(&config, HostCapabilities::cpu_only(2), &fitter)
            .run()
            .unwrap();

        assert_eq!(
            report.outcome,
            RunOutcome::Exported {
                rows: 42,
                path: config.paths.predictions.clone()
            }
        );
        assert_eq!(report.split_strategy, SplitStrategy::ByDate);
        assert!(!report.fell_back);
        assert!(!report.trained_on_full_dataset);
        assert_eq!(report.params.device, Device::Cpu);
        assert!(report.metrics.r2 > 0.5, "r2 = {}", report.metrics.r2);

        let rows = forecast_rows(&config.paths.predictions);
        assert_eq!(rows.len(), 42);
        for city in CITIES {
            assert_eq!(rows.iter().filter(|r| r.city == city).count(), 14);
        }
        let mean_abs = rows.iter().map(|r| r.residual.abs()).sum::<f64>() / rows.len() as f64;
        assert!(mean_abs < 1.5, "mean |residual| = {mean_abs}");

        let log = fs::read_to_string(config.paths.metrics_log()).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains(",rmse=") && lines[0].contains(",mae=") && lines[0].contains(",r2="));

        let model: BoostedModel = serde_json::from_str(&fs::read_to_string(&config.paths.model).unwrap()).unwrap();
        assert_eq!(model.n_trees(), 150);
        assert!(dir.path().join("checkpoints").join(CHECKPOINT_FILENAME).exists());
    }

    #[test]
    fn test_metrics_log_appends_across_runs() {
        let dir = tempdir().unwrap();
        let (weather, heat) = write_synthetic_inputs(dir.path(), &CITIES[..1], 120, 3);
        let mut config = test_config(dir.path(), weather, heat);
        config.limits.min_estimators = 20;
        config.limits.max_estimators = 20;

        let fitter = NativeFitter;
        for _ in 0..2 {
            ForecastPipeline::new(&config, HostCapabilities::cpu_only(1), &fitter)
                .run()
                .unwrap();
        }
        let log = fs::read_to_string(config.paths.metrics_log()).unwrap();
        assert_eq!(log.lines().count(), 2);
    }

    #[test]
    fn test_missing_accelerator_falls_back_to_cpu() {
        let dir = tempdir().unwrap();
        let (weather, heat) = write_synthetic_inputs(dir.path(), &CITIES[..2], 150, 11);
        let mut config = test_config(dir.path(), weather, heat);
        config.limits.min_estimators = 20;
        config.limits.max_estimators = 20;

        let host = HostCapabilities {
            logical_cpus: 2,
            accelerator: Some(AcceleratorInfo {
                name: "Tesla T4".into(),
                total_mem_gb: 15.0,
                free_mem_gb: 15.0,
            }),
        };
        let fitter = DeviceFitter::new(config.accelerator.worker_command.clone());
        let report = ForecastPipeline::new(&config, host, &fitter).run().unwrap();

        assert!(report.fell_back);
        assert_eq!(report.params.device, Device::Cpu);
        let model: BoostedModel = serde_json::from_str(&fs::read_to_string(&config.paths.model).unwrap()).unwrap();
        assert_eq!(model.params.device, Device::Cpu);
    }

    #[test]
    fn test_zero_horizon_is_empty_forecast() {
        let dir = tempdir().unwrap();
        let (weather, heat) = write_synthetic_inputs(dir.path(), &CITIES[..1], 120, 5);
        let mut config = test_config(dir.path(), weather, heat);
        config.features.forecast_horizon_days = 0;
        config.limits.min_estimators = 10;
        config.limits.max_estimators = 10;

        let fitter = NativeFitter;
        let report = ForecastPipeline::new(&config, HostCapabilities::cpu_only(1), &fitter)
            .run()
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::EmptyForecast);
        assert!(!config.paths.predictions.exists());
        assert!(config.paths.model.exists());
        assert!(config.paths.metrics_log().exists());
    }

    #[test]
    fn test_short_history_trains_on_full_dataset() {
        let dir = tempdir().unwrap();
        let (weather, heat) = write_synthetic_inputs(dir.path(), &CITIES[..2], 30, 9);
        let mut config = test_config(dir.path(), weather, heat);
        config.features.forecast_horizon_days = 40;
        config.limits.min_estimators = 10;
        config.limits.max_estimators = 10;

        let fitter = NativeFitter;
        let report = ForecastPipeline::new(&config, HostCapabilities::cpu_only(1), &fitter)
            .run()
            .unwrap();

        assert!(report.trained_on_full_dataset);
        assert_eq!(report.split_strategy, SplitStrategy::Positional);
        // 30 days minus the 7-day lag warm-up, per city.
        assert_eq!(
            report.outcome,
            RunOutcome::Exported {
                rows: 46,
                path: config.paths.predictions.clone()
            }
        );
    }

    #[test]
    fn test_join_violation_names_load_stage() {
        let dir = tempdir().unwrap();
        let (weather, heat) = write_synthetic_inputs(dir.path(), &CITIES[..1], 30, 1);
        let content = fs::read_to_string(&heat).unwrap();
        let truncated: Vec<&str> = content.lines().take(20).collect();
        fs::write(&heat, truncated.join("\n") + "\n").unwrap();
        let config = test_config(dir.path(), weather, heat);

        let fitter = NativeFitter;
        let err = ForecastPipeline::new(&config, HostCapabilities::cpu_only(1), &fitter)
            .run()
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Load));
        match err {
            PipelineError::Stage { source, .. } => {
                assert!(matches!(*source, PipelineError::Schema(SchemaError::UnmatchedKey { .. })))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!config.paths.model.exists());
    }
}
