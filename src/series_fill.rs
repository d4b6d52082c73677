//! Gap filling for raw per-city weather series.

/// Width of the trailing smoothing window.
pub const SMOOTHING_WINDOW: usize = 3;

/// Parse a raw cell. Blank, `nan`, unparsable and zero readings are all
/// treated as sensor dropouts.
pub fn parse_sample(raw: Option<&str>) -> Option<f64> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return None;
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value == 0.0 || !value.is_finite() => None,
        Ok(value) => Some(value),
        Err(_) => None,
    }
}

/// Forward-fill, back-fill, zero the remainder, then smooth with a trailing
/// mean over the last [`SMOOTHING_WINDOW`] filled values.
pub fn fill_series(values: &[Option<f64>]) -> Vec<f64> {
    let mut filled: Vec<Option<f64>> = values.to_vec();

    let mut last = None;
    for slot in filled.iter_mut() {
        match slot {
            Some(v) => last = Some(*v),
            None => *slot = last,
        }
    }

    let mut next = None;
    for slot in filled.iter_mut().rev() {
        match slot {
            Some(v) => next = Some(*v),
            None => *slot = next,
        }
    }

    let dense: Vec<f64> = filled.into_iter().map(|v| v.unwrap_or(0.0)).collect();

    (0..dense.len())
        .map(|idx| {
            let start = (idx + 1).saturating_sub(SMOOTHING_WINDOW);
            let window = &dense[start..=idx];
            window.iter().sum::<f64>() / window.len() as f64
        })
        .collect()
}
