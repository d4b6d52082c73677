//! Heat index (apparent temperature) from air temperature and humidity.
//!
//! The regression targets of the forecasting model are produced by
//! [`heat_index_f`], so its constants and branch order must stay stable.

/// Convert Celsius to Fahrenheit.
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    (celsius * (9.0 / 5.0)) + 32.0
}

/// Convert Fahrenheit to Celsius.
pub fn fahrenheit_to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * (5.0 / 9.0)
}

/// Heat index in Fahrenheit for a Celsius temperature and a relative
/// humidity percentage. Humidity outside `[0, 100]` is clamped.
pub fn heat_index_f(temp_c: f64, relative_humidity: f64) -> f64 {
    let t = celsius_to_fahrenheit(temp_c);
    let rh = relative_humidity.clamp(0.0, 100.0);

    let simple = 0.5 * (t + 61.0 + ((t - 68.0) * 1.2) + (rh * 0.094));
    let hi = (simple + t) / 2.0;
    if hi < 80.0 {
        return hi;
    }

    let mut hi = -42.379 + 2.04901523 * t + 10.14333127 * rh
        - 0.22475541 * t * rh
        - 0.00683783 * t * t
        - 0.05481717 * rh * rh
        + 0.00122874 * t * t * rh
        + 0.00085282 * t * rh * rh
        - 0.00000199 * t * t * rh * rh;

    if rh < 13.0 && (80.0..=112.0).contains(&t) {
        let adjustment = ((13.0 - rh) / 4.0) * (((17.0 - (t - 95.0).abs()) / 17.0).max(0.0)).sqrt();
        hi -= adjustment;
    } else if rh > 85.0 && (80.0..=87.0).contains(&t) {
        let adjustment = ((rh - 85.0) / 10.0) * ((87.0 - t) / 5.0);
        hi += adjustment;
    }

    hi
}
