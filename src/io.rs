//! Table IO: CSV ingest and egress through polars, the 1:1 dataset join,
//! parquet checkpoints and the append-only metrics log.

use chrono::NaiveDate;
use polars::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

use crate::data_models::{
    HeatIndexRecord, MergedRecord, WeatherRecord, CITY_COLUMN, DATE_COLUMN, DATE_FORMAT,
    HEAT_INDEX_COLUMN, WEATHER_METRIC_COLUMNS,
};
use crate::errors::{PipelineError, SchemaError};

pub const WEATHER_TABLE: &str = "weather_history";
pub const HEAT_INDEX_TABLE: &str = "weather_heat_index";

fn table_err(path: &Path) -> impl FnOnce(PolarsError) -> PipelineError + '_ {
    move |source| PipelineError::Table {
        path: path.to_path_buf(),
        source,
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PipelineError + '_ {
    move |source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn ensure_parent_dir(path: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    Ok(())
}

/// Read a CSV file with a header row. Every column is kept as a string so
/// that a late decimal in an integer-looking column cannot abort the read;
/// callers parse cells through [`text_column`] and [`float_column`].
pub fn read_csv(path: &Path) -> Result<DataFrame, PipelineError> {
    if !path.exists() {
        return Err(PipelineError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "input table not found"),
        });
    }

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .map_err(table_err(path))?
        .finish()
        .map_err(table_err(path))?;

    debug!("Read {:?}: shape {:?}", path, df.shape());
    Ok(df)
}

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names().iter().map(|name| name.to_string()).collect()
}

pub fn require_columns(
    df: &DataFrame,
    table: &'static str,
    path: &Path,
    required: &[&str],
) -> Result<(), SchemaError> {
    let present: HashSet<String> = column_names(df).into_iter().collect();
    let missing: Vec<String> = required
        .iter()
        .filter(|name| !present.contains(**name))
        .map(|name| name.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(SchemaError::MissingColumns {
            table,
            path: path.to_path_buf(),
            missing,
        })
    }
}

pub fn text_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<String>>> {
    let series = df.column(name)?.cast(&DataType::String)?;
    let values = series.str()?.into_iter().map(|v| v.map(str::to_string)).collect();
    Ok(values)
}

/// Numeric view of a column; cells that do not parse become null.
pub fn float_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    let series = df.column(name)?.cast(&DataType::Float64)?;
    let values = series
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect();
    Ok(values)
}

/// Accepts `YYYY-MM-DD` and anything starting with it (e.g. ISO datetimes).
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let day = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(day, DATE_FORMAT).ok()
}

fn keys(
    df: &DataFrame,
    table: &'static str,
    path: &Path,
) -> Result<Vec<(String, NaiveDate)>, PipelineError> {
    let cities = text_column(df, CITY_COLUMN).map_err(table_err(path))?;
    let dates = text_column(df, DATE_COLUMN).map_err(table_err(path))?;

    let mut out = Vec::with_capacity(cities.len());
    for (row, (city, date)) in cities.into_iter().zip(dates).enumerate() {
        let city = match city.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()) {
            Some(c) => c,
            None => return Err(SchemaError::NullKey { table, row }.into()),
        };
        let raw_date = date.ok_or(SchemaError::NullKey { table, row })?;
        let date = parse_date(&raw_date).ok_or_else(|| SchemaError::InvalidDate {
            table,
            row,
            value: raw_date.clone(),
        })?;
        out.push((city, date));
    }
    Ok(out)
}

pub fn load_weather(path: &Path) -> Result<Vec<WeatherRecord>, PipelineError> {
    let df = read_csv(path)?;
    let mut required = vec![CITY_COLUMN, DATE_COLUMN];
    required.extend(WEATHER_METRIC_COLUMNS);
    require_columns(&df, WEATHER_TABLE, path, &required)?;

    let keys = keys(&df, WEATHER_TABLE, path)?;
    let mut records: Vec<WeatherRecord> = keys
        .into_iter()
        .map(|(city, date)| WeatherRecord {
            city,
            date,
            ..Default::default()
        })
        .collect();

    for column in WEATHER_METRIC_COLUMNS {
        let values = float_column(&df, column).map_err(table_err(path))?;
        for (record, value) in records.iter_mut().zip(values) {
            record.set_metric(column, value);
        }
    }

    Ok(records)
}

pub fn load_heat_index(path: &Path) -> Result<Vec<HeatIndexRecord>, PipelineError> {
    let df = read_csv(path)?;
    require_columns(&df, HEAT_INDEX_TABLE, path, &[CITY_COLUMN, DATE_COLUMN, HEAT_INDEX_COLUMN])?;

    let keys = keys(&df, HEAT_INDEX_TABLE, path)?;
    let values = float_column(&df, HEAT_INDEX_COLUMN).map_err(table_err(path))?;

    Ok(keys
        .into_iter()
        .zip(values)
        .map(|((city, date), heat_index)| HeatIndexRecord {
            city,
            date,
            heat_index,
        })
        .collect())
}

/// Join the two input tables on (city, date). Duplicate keys on either side
/// and keys present on only one side are schema errors. Output is sorted by
/// (city, date).
pub fn join_one_to_one(
    weather: Vec<WeatherRecord>,
    heat: Vec<HeatIndexRecord>,
) -> Result<Vec<MergedRecord>, SchemaError> {
    let mut heat_by_key: HashMap<(String, NaiveDate), Option<f64>> = HashMap::with_capacity(heat.len());
    for record in heat {
        let key = (record.city, record.date);
        if heat_by_key.contains_key(&key) {
            return Err(SchemaError::DuplicateKey {
                table: HEAT_INDEX_TABLE,
                city: key.0,
                date: key.1.to_string(),
            });
        }
        heat_by_key.insert(key, record.heat_index);
    }

    let mut seen: HashSet<(String, NaiveDate)> = HashSet::with_capacity(weather.len());
    let mut merged = Vec::with_capacity(weather.len());
    for record in weather {
        let key = (record.city.clone(), record.date);
        if !seen.insert(key.clone()) {
            return Err(SchemaError::DuplicateKey {
                table: WEATHER_TABLE,
                city: key.0,
                date: key.1.to_string(),
            });
        }
        match heat_by_key.remove(&key) {
            Some(heat_index) => merged.push(MergedRecord {
                weather: record,
                heat_index,
            }),
            None => {
                return Err(SchemaError::UnmatchedKey {
                    city: key.0,
                    date: key.1.to_string(),
                    present_in: WEATHER_TABLE,
                    missing_from: HEAT_INDEX_TABLE,
                })
            }
        }
    }

    if let Some((city, date)) = heat_by_key.into_keys().min() {
        return Err(SchemaError::UnmatchedKey {
            city,
            date: date.to_string(),
            present_in: HEAT_INDEX_TABLE,
            missing_from: WEATHER_TABLE,
        });
    }

    merged.sort_by(|a, b| (a.city(), a.date()).cmp(&(b.city(), b.date())));
    Ok(merged)
}

/// Load both input tables and join them.
pub fn load_dataset(weather_path: &Path, heat_path: &Path) -> Result<Vec<MergedRecord>, PipelineError> {
    let weather = load_weather(weather_path)?;
    let heat = load_heat_index(heat_path)?;
    Ok(join_one_to_one(weather, heat)?)
}

pub fn write_csv(df: &mut DataFrame, path: &Path) -> Result<(), PipelineError> {
    ensure_parent_dir(path)?;
    let mut file = File::create(path).map_err(io_err(path))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(df)
        .map_err(table_err(path))?;
    Ok(())
}

pub fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), PipelineError> {
    ensure_parent_dir(path)?;
    let file = File::create(path).map_err(io_err(path))?;
    ParquetWriter::new(file).finish(df).map_err(table_err(path))?;
    Ok(())
}

/// Serialize `value` as pretty JSON, replacing any existing file.
pub fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), PipelineError> {
    ensure_parent_dir(path)?;
    let file = File::create(path).map_err(io_err(path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|source| PipelineError::ModelFormat {
        path: path.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(io_err(path))?;
    Ok(())
}

pub fn append_line(path: &Path, line: &str) -> Result<(), PipelineError> {
    ensure_parent_dir(path)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err(path))?;
    writeln!(file, "{line}").map_err(io_err(path))?;
    Ok(())
}
