/// Calculate Simple Moving Average (SMA) over the whole slice
pub fn calculate_sma(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let sum: f64 = values.iter().sum();
    Some(sum / values.len() as f64)
}

/// Calculate population standard deviation around `mean`
///
/// Divides by N, not N - 1.
pub fn calculate_std_dev(values: &[f64], mean: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let squared_sum: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    Some((squared_sum / values.len() as f64).sqrt())
}
