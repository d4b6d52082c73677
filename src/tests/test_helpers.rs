use chrono::{Datelike, Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::heat_index::heat_index_f;

pub const CITIES: [&str; 3] = ["Cebu", "Davao", "Manila"];

/// Noise added to the heat index target, in Fahrenheit.
pub const TARGET_NOISE_F: f64 = 0.5;

pub fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()
}

/// Write smooth seasonal weather and the matching heat index for `cities`
/// over `days` consecutive days. Returns (weather, heat index) paths.
pub fn write_synthetic_inputs(dir: &Path, cities: &[&str], days: i64, seed: u64) -> (PathBuf, PathBuf) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut weather = String::from(
        "city,date,temperature_2m_max,temperature_2m_min,apparent_temperature_max,apparent_temperature_min,\
         wind_speed_10m_max,shortwave_radiation_sum,relative_humidity_2m_avg\n",
    );
    let mut heat = String::from("city,date,heat_index\n");

    for (c, city) in cities.iter().enumerate() {
        let offset = c as f64 * 1.5;
        for d in 0..days {
            let date = start_date() + Duration::days(d);
            let angle = 2.0 * std::f64::consts::PI * f64::from(date.ordinal()) / 365.25;
            let season = angle.sin();

            let t_max = 31.0 + offset + 3.0 * season;
            let t_min = 24.0 + offset + 2.0 * season;
            let a_max = t_max + 4.0;
            let a_min = t_min + 2.5;
            let wind = 8.0 + (d % 5) as f64;
            let radiation = 18.0 + 4.0 * season;
            let humidity = 72.0 + 8.0 * angle.cos();

            let avg = (t_max + t_min + a_max + a_min) / 4.0;
            let target = heat_index_f(avg, humidity) + rng.gen_range(-TARGET_NOISE_F..TARGET_NOISE_F);

            writeln!(
                weather,
                "{city},{date},{t_max:.4},{t_min:.4},{a_max:.4},{a_min:.4},{wind:.4},{radiation:.4},{humidity:.4}"
            )
            .unwrap();
            writeln!(heat, "{city},{date},{target:.4}").unwrap();
        }
    }

    let weather_path = dir.join("weather_history.csv");
    let heat_path = dir.join("weather_heat_index.csv");
    fs::write(&weather_path, weather).unwrap();
    fs::write(&heat_path, heat).unwrap();
    (weather_path, heat_path)
}

/// Config rooted in `dir` with a booster small enough for unit tests.
pub fn test_config(dir: &Path, weather: PathBuf, heat: PathBuf) -> Config {
    let mut config = Config::default();
    config.paths.weather_history = weather;
    config.paths.heat_index = heat;
    config.paths.predictions = dir.join("output").join("heat_index_predictions.csv");
    config.paths.model = dir.join("models").join("heat_index_gbdt.json");
    config.paths.logs_dir = dir.join("logs");
    config.limits.min_estimators = 150;
    config.limits.max_estimators = 150;
    config.booster.max_bin = 64;
    config.booster.eval_log_period = 50;
    config.accelerator.worker_command = vec!["/nonexistent/gpu_boost_worker".into()];
    config
}
