//! Gap filling of the raw weather history, one city at a time.

use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use crate::data_models::{CITY_COLUMN, DATE_COLUMN};
use crate::errors::PipelineError;
use crate::io::{column_names, parse_date, read_csv, require_columns, text_column, write_csv, WEATHER_TABLE};
use crate::series_fill::{fill_series, parse_sample};

pub struct WeatherCleaner;

impl WeatherCleaner {
    /// Clean `raw_path` into `clean_path`, returning the number of rows written.
    /// An empty input writes nothing.
    pub fn clean(&self, raw_path: &Path, clean_path: &Path) -> Result<usize, PipelineError> {
        let df = read_csv(raw_path)?;
        if df.height() == 0 {
            warn!("Raw weather history {:?} has no rows; nothing to clean", raw_path);
            return Ok(0);
        }
        require_columns(&df, WEATHER_TABLE, raw_path, &[CITY_COLUMN, DATE_COLUMN])?;

        let mut cleaned = self.clean_frame(&df).map_err(|source| PipelineError::Table {
            path: raw_path.to_path_buf(),
            source,
        })?;
        write_csv(&mut cleaned, clean_path)?;

        info!("Cleaned {} weather rows into {:?}", cleaned.height(), clean_path);
        Ok(cleaned.height())
    }

    fn clean_frame(&self, df: &DataFrame) -> PolarsResult<DataFrame> {
        // Empty city cells form their own group keyed by "".
        let cities: Vec<String> = text_column(df, CITY_COLUMN)?
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect();
        let dates: Vec<String> = text_column(df, DATE_COLUMN)?
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect();
        let parsed: Vec<Option<NaiveDate>> = dates.iter().map(|d| parse_date(d)).collect();

        // Row indices per city in date order; unparsable dates sort first.
        let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (idx, city) in cities.iter().enumerate() {
            groups.entry(city.as_str()).or_default().push(idx);
        }
        for rows in groups.values_mut() {
            rows.sort_by_key(|&r| parsed[r]);
        }

        let mut columns = Vec::new();
        for name in column_names(df) {
            if name == CITY_COLUMN || name == DATE_COLUMN {
                continue;
            }
            let raw = text_column(df, &name)?;
            let mut formatted = vec![String::new(); raw.len()];
            for rows in groups.values() {
                let series: Vec<Option<f64>> = rows.iter().map(|&r| parse_sample(raw[r].as_deref())).collect();
                for (&r, value) in rows.iter().zip(fill_series(&series)) {
                    formatted[r] = format!("{value:.2}");
                }
            }
            columns.push((name, formatted));
        }

        let mut order: Vec<usize> = groups.into_values().flatten().collect();
        order.sort_by(|&a, &b| (&cities[a], &dates[a]).cmp(&(&cities[b], &dates[b])));

        let mut series = Vec::with_capacity(columns.len() + 2);
        for name in column_names(df) {
            let values: Vec<String> = if name == CITY_COLUMN {
                order.iter().map(|&r| cities[r].clone()).collect()
            } else if name == DATE_COLUMN {
                order.iter().map(|&r| dates[r].clone()).collect()
            } else {
                match columns.iter().find(|(n, _)| *n == name) {
                    Some((_, values)) => order.iter().map(|&r| values[r].clone()).collect(),
                    None => continue,
                }
            };
            series.push(Series::new(name.as_str().into(), values));
        }
        DataFrame::new(series)
    }
}
