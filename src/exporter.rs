use polars::prelude::*;
use std::path::Path;
use tracing::info;

use crate::config::TemperatureUnit;
use crate::data_models::{round2, ForecastRow, CITY_COLUMN, DATE_COLUMN};
use crate::errors::PipelineError;
use crate::features::{feature_matrix, FeatureRow};
use crate::gbdt::BoostedModel;
use crate::heat_index::fahrenheit_to_celsius;
use crate::io::write_csv;

/// Back-tests the model on the forecast-horizon rows.
pub struct ForecastExporter {
    unit: TemperatureUnit,
}

impl ForecastExporter {
    pub fn new(unit: TemperatureUnit) -> Self {
        Self { unit }
    }

    fn to_report_unit(&self, fahrenheit: f64) -> f64 {
        match self.unit {
            TemperatureUnit::Fahrenheit => fahrenheit,
            TemperatureUnit::Celsius => round2(fahrenheit_to_celsius(fahrenheit)),
        }
    }

    /// Values are rounded to two decimals in Fahrenheit before conversion,
    /// then again in the reporting unit. Residual is predicted minus actual.
    pub fn forecast(&self, model: &BoostedModel, rows: &[FeatureRow]) -> Vec<ForecastRow> {
        let x = feature_matrix(rows, model.feature_names.len());
        let predictions = model.predict(x.view());

        rows.iter()
            .zip(predictions.iter())
            .map(|(row, pred)| {
                let actual = self.to_report_unit(round2(f64::from(row.target)));
                let predicted = self.to_report_unit(round2(f64::from(*pred)));
                ForecastRow {
                    city: row.city.clone(),
                    date: row.date,
                    heat_index_actual: actual,
                    heat_index_pred: predicted,
                    residual: round2(predicted - actual),
                }
            })
            .collect()
    }

    pub fn write(&self, rows: &[ForecastRow], path: &Path) -> Result<(), PipelineError> {
        let mut df = df!(
            CITY_COLUMN => rows.iter().map(|r| r.city.clone()).collect::<Vec<String>>(),
            DATE_COLUMN => rows.iter().map(|r| r.date.to_string()).collect::<Vec<String>>(),
            "heat_index_actual" => rows.iter().map(|r| r.heat_index_actual).collect::<Vec<f64>>(),
            "heat_index_pred" => rows.iter().map(|r| r.heat_index_pred).collect::<Vec<f64>>(),
            "residual" => rows.iter().map(|r| r.residual).collect::<Vec<f64>>(),
        )
        .map_err(|source| PipelineError::Table {
            path: path.to_path_buf(),
            source,
        })?;

        write_csv(&mut df, path)?;
        info!("Wrote {} forecast rows to {:?}", rows.len(), path);
        Ok(())
    }
}
