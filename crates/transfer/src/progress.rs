/// Rounds a percentage to two decimals.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Percentage of `loaded` out of `total`, rounded to two decimals.
///
/// Computed as `round(loaded / total * 10000) / 100`. A zero `total`
/// reports 0.
pub fn compute_percent(loaded: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (loaded as f64 / total as f64 * 10_000.0).round() / 100.0
}

/// Arithmetic mean of per-segment percentages, rounded to two decimals.
///
/// Returns 0 for an empty slice.
pub fn mean_percent(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sum: f64 = values.iter().sum();
    round2(sum / values.len() as f64)
}
