//! Supervised feature table: time encodings, city code, derived weather
//! features and per-city lag / rolling statistics of the heat index.

use chrono::{Datelike, Duration, NaiveDate};
use ndarray::{Array1, Array2};
use polars::prelude::*;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::PI;
use tracing::info;

use crate::config::FeatureConfig;
use crate::data_models::{MergedRecord, CITY_COLUMN, DATE_COLUMN, HEAT_INDEX_COLUMN, WEATHER_METRIC_COLUMNS};

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub city: String,
    pub date: NaiveDate,
    pub features: Vec<f32>,
    pub target: f32,
}

/// Dense feature table, sorted by (city, date).
#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[cfg(test)]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn city_count(&self) -> usize {
        self.rows.iter().map(|r| r.city.as_str()).collect::<BTreeSet<_>>().len()
    }

    /// Flatten into a polars frame for checkpointing.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let mut series = Vec::with_capacity(self.columns.len() + 3);
        series.push(Series::new(
            CITY_COLUMN.into(),
            self.rows.iter().map(|r| r.city.clone()).collect::<Vec<String>>(),
        ));
        series.push(Series::new(
            DATE_COLUMN.into(),
            self.rows.iter().map(|r| r.date.to_string()).collect::<Vec<String>>(),
        ));
        for (idx, name) in self.columns.iter().enumerate() {
            let values: Vec<f32> = self.rows.iter().map(|r| r.features[idx]).collect();
            series.push(Series::new(name.as_str().into(), values));
        }
        series.push(Series::new(
            HEAT_INDEX_COLUMN.into(),
            self.rows.iter().map(|r| r.target).collect::<Vec<f32>>(),
        ));
        DataFrame::new(series)
    }
}

/// Row-major feature matrix of `rows`.
pub fn feature_matrix(rows: &[FeatureRow], n_features: usize) -> Array2<f32> {
    let mut matrix = Array2::<f32>::zeros((rows.len(), n_features));
    for (mut out, row) in matrix.outer_iter_mut().zip(rows) {
        for (slot, value) in out.iter_mut().zip(&row.features) {
            *slot = *value;
        }
    }
    matrix
}

pub fn target_vector(rows: &[FeatureRow]) -> Array1<f32> {
    rows.iter().map(|r| r.target).collect()
}

pub fn rolling_column_name(window: u32) -> String {
    format!("heat_index_roll_mean_{window}")
}

pub fn lag_column_name(lag: u32) -> String {
    format!("heat_index_lag_{lag}")
}

pub struct FeatureBuilder<'a> {
    config: &'a FeatureConfig,
}

impl<'a> FeatureBuilder<'a> {
    pub fn new(config: &'a FeatureConfig) -> Self {
        Self { config }
    }

    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = WEATHER_METRIC_COLUMNS.iter().map(|c| c.to_string()).collect();
        columns.extend(
            [
                "dayofyear",
                "sin_day",
                "cos_day",
                "city_id",
                "temp_range",
                "apparent_range",
                "humidity_sq",
                "wind_sq",
                "radiation_log",
            ]
            .iter()
            .map(|c| c.to_string()),
        );
        columns.extend((1..=self.config.max_lag_days).map(lag_column_name));
        columns.push(rolling_column_name(self.config.rolling_window_days));
        columns
    }

    /// Build the dense table. Rows lacking the target, any raw metric, any
    /// lag or every value of the rolling window are dropped.
    pub fn build(&self, records: &[MergedRecord]) -> FeatureTable {
        let columns = self.columns();

        let mut groups: BTreeMap<&str, Vec<&MergedRecord>> = BTreeMap::new();
        for record in records {
            groups.entry(record.city()).or_default().push(record);
        }
        let groups: Vec<(usize, &str, Vec<&MergedRecord>)> = groups
            .into_iter()
            .enumerate()
            .map(|(city_id, (city, mut rows))| {
                rows.sort_by_key(|r| r.date());
                (city_id, city, rows)
            })
            .collect();

        let mut rows: Vec<FeatureRow> = groups
            .par_iter()
            .map(|(city_id, city, group)| self.build_city(*city_id, city, group))
            .collect::<Vec<Vec<FeatureRow>>>()
            .into_iter()
            .flatten()
            .collect();
        rows.sort_by(|a, b| (a.city.as_str(), a.date).cmp(&(b.city.as_str(), b.date)));

        info!(
            "Feature table: {} of {} rows dense, {} columns, {} cities",
            rows.len(),
            records.len(),
            columns.len(),
            groups.len()
        );

        FeatureTable { columns, rows }
    }

    fn build_city(&self, city_id: usize, city: &str, group: &[&MergedRecord]) -> Vec<FeatureRow> {
        // Per-city target index; lags and windows only ever look up this city.
        let targets: BTreeMap<NaiveDate, f64> = group
            .iter()
            .filter_map(|r| r.heat_index.map(|hi| (r.date(), hi)))
            .collect();

        group
            .iter()
            .filter_map(|record| {
                let target = record.heat_index?;
                let mut features = self.static_features(record, city_id)?;

                for lag in 1..=self.config.max_lag_days {
                    let day = record.date().checked_sub_signed(Duration::days(i64::from(lag)))?;
                    features.push(*targets.get(&day)?);
                }
                features.push(self.rolling_mean(&targets, record.date())?);

                Some(FeatureRow {
                    city: city.to_string(),
                    date: record.date(),
                    features: features.into_iter().map(|v| v as f32).collect(),
                    target: target as f32,
                })
            })
            .collect()
    }

    fn static_features(&self, record: &MergedRecord, city_id: usize) -> Option<Vec<f64>> {
        let w = &record.weather;
        let metrics: Vec<f64> = w.metrics().into_iter().collect::<Option<Vec<f64>>>()?;

        let day_of_year = f64::from(record.date().ordinal());
        let angle = 2.0 * PI * day_of_year / self.config.seasonality_period;

        let temp_max = w.temperature_2m_max?;
        let temp_min = w.temperature_2m_min?;
        let apparent_max = w.apparent_temperature_max?;
        let apparent_min = w.apparent_temperature_min?;
        let humidity = w.relative_humidity_2m_avg?;
        let wind = w.wind_speed_10m_max?;
        let radiation = w.shortwave_radiation_sum?;

        let mut features = metrics;
        features.extend([
            day_of_year,
            angle.sin(),
            angle.cos(),
            city_id as f64,
            temp_max - temp_min,
            apparent_max - apparent_min,
            humidity * humidity,
            wind * wind,
            radiation.max(0.0).ln_1p(),
        ]);
        Some(features)
    }

    /// Mean of the targets on the window's days strictly before `date`.
    fn rolling_mean(&self, targets: &BTreeMap<NaiveDate, f64>, date: NaiveDate) -> Option<f64> {
        let window = i64::from(self.config.rolling_window_days);
        let start = date.checked_sub_signed(Duration::days(window))?;
        let values: Vec<f64> = targets.range(start..date).map(|(_, v)| *v).collect();
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }
}
