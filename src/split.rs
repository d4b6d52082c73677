//! Temporal partitioning of the feature table: forecast horizon first,
//! then train / validation.

use chrono::Duration;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::errors::PipelineError;
use crate::features::FeatureRow;

/// Reserves the chronologically last `horizon_days` rows of every city.
pub struct HorizonSplitter {
    horizon_days: i64,
}

impl HorizonSplitter {
    pub fn new(horizon_days: i64) -> Self {
        Self { horizon_days }
    }

    /// Returns `(trainable, forecast)`. Input order is preserved in both.
    pub fn split(&self, rows: Vec<FeatureRow>) -> (Vec<FeatureRow>, Vec<FeatureRow>) {
        if self.horizon_days <= 0 {
            return (rows, Vec::new());
        }
        let horizon = self.horizon_days as usize;

        // Rank of each row counted from the end of its city's timeline.
        let mut by_city: HashMap<&str, Vec<(chrono::NaiveDate, usize)>> = HashMap::new();
        for (idx, row) in rows.iter().enumerate() {
            by_city.entry(row.city.as_str()).or_default().push((row.date, idx));
        }
        let mut is_forecast = vec![false; rows.len()];
        for entries in by_city.values_mut() {
            entries.sort_unstable();
            for (_, idx) in entries.iter().rev().take(horizon) {
                is_forecast[*idx] = true;
            }
        }

        let mut trainable = Vec::with_capacity(rows.len());
        let mut forecast = Vec::new();
        for (row, flag) in rows.into_iter().zip(is_forecast) {
            if flag {
                forecast.push(row);
            } else {
                trainable.push(row);
            }
        }
        (trainable, forecast)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitStrategy {
    ByDate,
    /// Last-resort positional split; logged as `split_fallback`.
    Positional,
}

#[derive(Debug, Clone)]
pub struct TrainValidSplit {
    pub train: Vec<FeatureRow>,
    pub validation: Vec<FeatureRow>,
    pub strategy: SplitStrategy,
}

pub struct TrainValidSplitter {
    validation_days: i64,
    fallback_fraction: f64,
}

impl TrainValidSplitter {
    pub fn new(validation_days: i64, fallback_fraction: f64) -> Self {
        Self {
            validation_days,
            fallback_fraction,
        }
    }

    /// Date split over the pooled rows; falls back to a positional split
    /// when either side would be empty.
    pub fn split(&self, rows: Vec<FeatureRow>) -> Result<TrainValidSplit, PipelineError> {
        if rows.len() < 2 {
            return Err(PipelineError::InsufficientData(format!(
                "need at least 2 rows to split train/validation, got {}",
                rows.len()
            )));
        }

        if let Some(max_date) = rows.iter().map(|r| r.date).max() {
            if let Some(split_date) = max_date.checked_sub_signed(Duration::days(self.validation_days)) {
                let train_count = rows.iter().filter(|r| r.date < split_date).count();
                if train_count > 0 && train_count < rows.len() {
                    let (validation, train): (Vec<FeatureRow>, Vec<FeatureRow>) =
                        rows.into_iter().partition(|r| r.date >= split_date);
                    info!(
                        "Date split at {}: {} train rows, {} validation rows",
                        split_date,
                        train.len(),
                        validation.len()
                    );
                    return Ok(TrainValidSplit {
                        train,
                        validation,
                        strategy: SplitStrategy::ByDate,
                    });
                }
            }
        }

        let n = rows.len();
        let cutoff = ((n as f64 * self.fallback_fraction) as usize).clamp(1, n - 1);
        let mut train = rows;
        let validation = train.split_off(cutoff);
        warn!(
            event = "split_fallback",
            "Date split left a side empty; positional split {} train / {} validation",
            train.len(),
            validation.len()
        );

        Ok(TrainValidSplit {
            train,
            validation,
            strategy: SplitStrategy::Positional,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(city: &str, day: i64) -> FeatureRow {
        FeatureRow {
            city: city.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(day),
            features: vec![day as f32],
            target: day as f32,
        }
    }

    fn table(cities: &[(&str, i64)]) -> Vec<FeatureRow> {
        let mut rows = Vec::new();
        for (city, days) in cities {
            for d in 0..*days {
                rows.push(row(city, d));
            }
        }
        rows
    }

    #[test]
    fn test_horizon_takes_last_rows_per_city() {
        let rows = table(&[("A", 30), ("B", 20), ("C", 25)]);
        let (trainable, forecast) = HorizonSplitter::new(5).split(rows);
        assert_eq!(forecast.len(), 15);
        assert_eq!(trainable.len(), 60);
        for r in &forecast {
            let last = match r.city.as_str() {
                "A" => 29,
                "B" => 19,
                _ => 24,
            };
            assert!(r.target as i64 > last - 5);
        }
        for r in &trainable {
            assert!(!forecast.iter().any(|f| f.city == r.city && f.date == r.date));
        }
    }

    #[test]
    fn test_horizon_short_city_is_all_forecast() {
        let rows = table(&[("A", 3), ("B", 10)]);
        let (trainable, forecast) = HorizonSplitter::new(5).split(rows);
        assert_eq!(forecast.len(), 8);
        assert!(trainable.iter().all(|r| r.city == "B"));
    }

    #[test]
    fn test_non_positive_horizon_keeps_everything() {
        for h in [0, -3] {
            let (trainable, forecast) = HorizonSplitter::new(h).split(table(&[("A", 10)]));
            assert_eq!(trainable.len(), 10);
            assert!(forecast.is_empty());
        }
    }

    #[test]
    fn test_date_split_is_pooled_across_cities() {
        let rows = table(&[("A", 100), ("B", 100)]);
        let split = TrainValidSplitter::new(10, 0.8).split(rows).unwrap();
        assert_eq!(split.strategy, SplitStrategy::ByDate);
        // Days 89..=99 validate for both cities.
        assert_eq!(split.validation.len(), 22);
        assert_eq!(split.train.len(), 178);
        let boundary = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(89);
        assert!(split.validation.iter().all(|r| r.date >= boundary));
        assert!(split.train.iter().all(|r| r.date < boundary));
    }

    #[test]
    fn test_positional_fallback_when_history_is_short() {
        let rows = table(&[("A", 10)]);
        let split = TrainValidSplitter::new(90, 0.8).split(rows).unwrap();
        assert_eq!(split.strategy, SplitStrategy::Positional);
        assert_eq!(split.train.len(), 8);
        assert_eq!(split.validation.len(), 2);
    }

    #[test]
    fn test_fallback_never_empty_for_two_rows() {
        for fraction in [0.01, 0.5, 0.99] {
            let split = TrainValidSplitter::new(90, fraction).split(table(&[("A", 2)])).unwrap();
            assert_eq!(split.train.len(), 1);
            assert_eq!(split.validation.len(), 1);
        }
        assert!(matches!(
            TrainValidSplitter::new(90, 0.8).split(table(&[("A", 1)])),
            Err(PipelineError::InsufficientData(_))
        ));
    }
}
