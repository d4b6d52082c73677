use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// Canonical column names shared by the input and output tables
pub const CITY_COLUMN: &str = "city";
pub const DATE_COLUMN: &str = "date";
pub const HEAT_INDEX_COLUMN: &str = "heat_index";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub const TEMPERATURE_COLUMNS: [&str; 4] = [
    "temperature_2m_max",
    "temperature_2m_min",
    "apparent_temperature_max",
    "apparent_temperature_min",
];
pub const WIND_COLUMN: &str = "wind_speed_10m_max";
pub const RADIATION_COLUMN: &str = "shortwave_radiation_sum";
pub const HUMIDITY_AVG_COLUMN: &str = "relative_humidity_2m_avg";

/// Every metric column of the weather history, in header order.
pub const WEATHER_METRIC_COLUMNS: [&str; 7] = [
    "temperature_2m_max",
    "temperature_2m_min",
    "apparent_temperature_max",
    "apparent_temperature_min",
    WIND_COLUMN,
    RADIATION_COLUMN,
    HUMIDITY_AVG_COLUMN,
];

/// One day of weather for one city. Metrics may be null in the source file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WeatherRecord {
    pub city: String,
    pub date: NaiveDate,
    pub temperature_2m_max: Option<f64>,
    pub temperature_2m_min: Option<f64>,
    pub apparent_temperature_max: Option<f64>,
    pub apparent_temperature_min: Option<f64>,
    pub wind_speed_10m_max: Option<f64>,
    pub shortwave_radiation_sum: Option<f64>,
    pub relative_humidity_2m_avg: Option<f64>,
}

impl WeatherRecord {
    /// Metric values in [`WEATHER_METRIC_COLUMNS`] order.
    pub fn metrics(&self) -> [Option<f64>; 7] {
        [
            self.temperature_2m_max,
            self.temperature_2m_min,
            self.apparent_temperature_max,
            self.apparent_temperature_min,
            self.wind_speed_10m_max,
            self.shortwave_radiation_sum,
            self.relative_humidity_2m_avg,
        ]
    }

    pub fn set_metric(&mut self, column: &str, value: Option<f64>) {
        match column {
            "temperature_2m_max" => self.temperature_2m_max = value,
            "temperature_2m_min" => self.temperature_2m_min = value,
            "apparent_temperature_max" => self.apparent_temperature_max = value,
            "apparent_temperature_min" => self.apparent_temperature_min = value,
            WIND_COLUMN => self.wind_speed_10m_max = value,
            RADIATION_COLUMN => self.shortwave_radiation_sum = value,
            HUMIDITY_AVG_COLUMN => self.relative_humidity_2m_avg = value,
            _ => {}
        }
    }

    /// Mean of the temperature columns that are present.
    pub fn average_temperature(&self) -> Option<f64> {
        let present: Vec<f64> = [
            self.temperature_2m_max,
            self.temperature_2m_min,
            self.apparent_temperature_max,
            self.apparent_temperature_min,
        ]
        .into_iter()
        .flatten()
        .collect();

        if present.is_empty() {
            None
        } else {
            Some(present.iter().sum::<f64>() / present.len() as f64)
        }
    }
}

/// Daily heat index (Fahrenheit) for one city.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatIndexRecord {
    pub city: String,
    pub date: NaiveDate,
    pub heat_index: Option<f64>,
}

/// A weather row joined 1:1 with its heat index.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    pub weather: WeatherRecord,
    pub heat_index: Option<f64>,
}

impl MergedRecord {
    pub fn city(&self) -> &str {
        &self.weather.city
    }

    pub fn date(&self) -> NaiveDate {
        self.weather.date
    }
}

/// Back-tested prediction for one forecast-horizon day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRow {
    pub city: String,
    pub date: NaiveDate,
    pub heat_index_actual: f64,
    pub heat_index_pred: f64,
    pub residual: f64,
}

/// Round to two decimals, the precision of every published table.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
