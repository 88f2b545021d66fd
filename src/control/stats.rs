//! Window statistics and smoothing primitives
//!
//! Shared by the rate-of-change, moving-average, and statistical
//! processors. All functions treat the empty window as "no result"
//! rather than producing NaN.

/// Arithmetic mean
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n − 1)
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// One EMA update; higher alpha means more smoothing, slower response
pub fn ema_step(previous: f64, sample: f64, alpha: f64) -> f64 {
    let alpha = alpha.clamp(0.0, 1.0);
    alpha * previous + (1.0 - alpha) * sample
}

/// Weighted moving average with linearly increasing recency weights
pub fn wma(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut weighted = 0.0;
    let mut total = 0.0;
    for (i, v) in values.iter().enumerate() {
        let w = (i + 1) as f64;
        weighted += w * v;
        total += w;
    }
    Some(weighted / total)
}

/// Least-squares slope of (t, x) samples, units per second
pub fn linear_regression_slope(samples: &[(f64, f64)]) -> Option<f64> {
    let n = samples.len() as f64;
    if samples.len() < 2 {
        return None;
    }
    let t_mean = samples.iter().map(|(t, _)| t).sum::<f64>() / n;
    let x_mean = samples.iter().map(|(_, x)| x).sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (t, x) in samples {
        num += (t - t_mean) * (x - x_mean);
        den += (t - t_mean) * (t - t_mean);
    }
    if den == 0.0 {
        return None;
    }
    Some(num / den)
}

/// Percentile by linear interpolation, rank in [0, 100]
pub fn percentile(values: &[f64], rank: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = rank.clamp(0.0, 100.0) / 100.0;
    let position = rank * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    if lower == upper {
        return Some(sorted[lower]);
    }
    let fraction = position - lower as f64;
    Some(sorted[lower] + fraction * (sorted[upper] - sorted[lower]))
}

pub fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 50.0)
}

/// Drop values outside `[q1 − k·iqr, q3 + k·iqr]`
pub fn reject_outliers_iqr(values: &[f64], factor: f64) -> Vec<f64> {
    if values.len() < 4 {
        return values.to_vec();
    }
    let q1 = match percentile(values, 25.0) {
        Some(v) => v,
        None => return values.to_vec(),
    };
    let q3 = match percentile(values, 75.0) {
        Some(v) => v,
        None => return values.to_vec(),
    };
    let iqr = q3 - q1;
    let lo = q1 - factor * iqr;
    let hi = q3 + factor * iqr;
    values
        .iter()
        .copied()
        .filter(|v| *v >= lo && *v <= hi)
        .collect()
}

/// Drop values whose z-score magnitude exceeds the threshold
pub fn reject_outliers_zscore(values: &[f64], threshold: f64) -> Vec<f64> {
    let (m, sd) = match (mean(values), std_dev(values)) {
        (Some(m), Some(sd)) if sd > 0.0 => (m, sd),
        _ => return values.to_vec(),
    };
    values
        .iter()
        .copied()
        .filter(|v| ((v - m) / sd).abs() <= threshold)
        .collect()
}
