//! Daily heat index table derived from the cleaned weather history.

use polars::prelude::*;
use std::path::Path;
use tracing::{info, warn};

use crate::data_models::{round2, WeatherRecord, CITY_COLUMN, DATE_COLUMN, HEAT_INDEX_COLUMN, HUMIDITY_AVG_COLUMN, TEMPERATURE_COLUMNS};
use crate::errors::PipelineError;
use crate::heat_index::heat_index_f;
use crate::io::{column_names, read_csv, require_columns, text_column, write_csv, WEATHER_TABLE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeatIndexSummary {
    pub written: usize,
    pub skipped: usize,
}

pub struct HeatIndexTableBuilder;

fn parse_number(raw: Option<&str>) -> Option<f64> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

impl HeatIndexTableBuilder {
    /// Average the available temperature columns, pair with mean humidity
    /// and write `(city, date, heat_index)`. Rows lacking a key, every
    /// temperature or the humidity are skipped and counted.
    pub fn build(&self, weather_path: &Path, out_path: &Path) -> Result<HeatIndexSummary, PipelineError> {
        let df = read_csv(weather_path)?;
        require_columns(&df, WEATHER_TABLE, weather_path, &[CITY_COLUMN, DATE_COLUMN, HUMIDITY_AVG_COLUMN])?;
        info!("Loaded {} weather rows", df.height());

        let table_err = |source| PipelineError::Table {
            path: weather_path.to_path_buf(),
            source,
        };
        let present = column_names(&df);
        let cities = text_column(&df, CITY_COLUMN).map_err(table_err)?;
        let dates = text_column(&df, DATE_COLUMN).map_err(table_err)?;
        let humidity = text_column(&df, HUMIDITY_AVG_COLUMN).map_err(table_err)?;
        let mut temperatures = Vec::new();
        for column in TEMPERATURE_COLUMNS.iter().filter(|c| present.iter().any(|p| p == *c)) {
            temperatures.push((*column, text_column(&df, column).map_err(table_err)?));
        }

        let mut out_city = Vec::new();
        let mut out_date = Vec::new();
        let mut out_value = Vec::new();
        let mut skipped = 0usize;
        for row in 0..df.height() {
            let city = cities[row].as_deref().map(str::trim).unwrap_or_default();
            let date = dates[row].as_deref().map(str::trim).unwrap_or_default();
            if city.is_empty() || date.is_empty() {
                skipped += 1;
                continue;
            }

            let mut record = WeatherRecord {
                relative_humidity_2m_avg: parse_number(humidity[row].as_deref()),
                ..Default::default()
            };
            for (column, values) in &temperatures {
                record.set_metric(column, parse_number(values[row].as_deref()));
            }
            let (temp_c, rh) = match (record.average_temperature(), record.relative_humidity_2m_avg) {
                (Some(temp_c), Some(rh)) => (temp_c, rh),
                _ => {
                    skipped += 1;
                    continue;
                }
            };

            out_city.push(city.to_string());
            out_date.push(date.to_string());
            out_value.push(format!("{:.2}", round2(heat_index_f(temp_c, rh))));
        }

        if skipped > 0 {
            warn!("Skipped {} rows due to missing data", skipped);
        }
        let written = out_city.len();
        if written == 0 {
            warn!("No heat index values computed");
            return Ok(HeatIndexSummary { written, skipped });
        }

        let mut table = df!(
            CITY_COLUMN => out_city,
            DATE_COLUMN => out_date,
            HEAT_INDEX_COLUMN => out_value,
        )
        .map_err(|source| PipelineError::Table {
            path: out_path.to_path_buf(),
            source,
        })?;
        write_csv(&mut table, out_path)?;
        info!("Wrote {} heat index rows to {:?}", written, out_path);

        Ok(HeatIndexSummary { written, skipped })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_builds_table_and_counts_skips() {
        let dir = tempdir().unwrap();
        let weather = dir.path().join("weather.csv");
        let out = dir.path().join("heat.csv");
        fs::write(
            &weather,
            "city,date,temperature_2m_max,temperature_2m_min,relative_humidity_2m_avg\n\
             Manila,2024-01-01,20,20,50\n\
             Manila,2024-01-02,,,50\n\
             ,2024-01-03,20,20,50\n\
             Manila,2024-01-04,20,,\n\
             Manila,2024-01-05,,20,50\n",
        )
        .unwrap();

        let summary = HeatIndexTableBuilder.build(&weather, &out).unwrap();
        assert_eq!(summary, HeatIndexSummary { written: 2, skipped: 3 });

        let expected = format!("{:.2}", round2(heat_index_f(20.0, 50.0)));
        let content = fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "city,date,heat_index");
        assert_eq!(lines[1], format!("Manila,2024-01-01,{expected}"));
        assert_eq!(lines[2], format!("Manila,2024-01-05,{expected}"));
    }

    #[test]
    fn test_averages_only_present_temperatures() {
        let dir = tempdir().unwrap();
        let weather = dir.path().join("weather.csv");
        let out = dir.path().join("heat.csv");
        fs::write(
            &weather,
            "city,date,temperature_2m_max,temperature_2m_min,apparent_temperature_max,relative_humidity_2m_avg\n\
             Cebu,2024-06-01,33,,36,70\n",
        )
        .unwrap();

        let summary = HeatIndexTableBuilder.build(&weather, &out).unwrap();
        assert_eq!(summary, HeatIndexSummary { written: 1, skipped: 0 });
        let expected = format!("{:.2}", round2(heat_index_f(34.5, 70.0)));
        let content = fs::read_to_string(&out).unwrap();
        assert_eq!(content.lines().nth(1).unwrap(), format!("Cebu,2024-06-01,{expected}"));
    }

    #[test]
    fn test_missing_humidity_column_is_schema_error() {
        let dir = tempdir().unwrap();
        let weather = dir.path().join("weather.csv");
        fs::write(&weather, "city,date,temperature_2m_max\nManila,2024-01-01,30\n").unwrap();
        let err = HeatIndexTableBuilder.build(&weather, &dir.path().join("heat.csv")).unwrap_err();
        assert!(matches!(err, PipelineError::Schema(_)));
    }
}
