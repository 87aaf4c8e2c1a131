// Robust statistics for noise estimation

/// Gaussian-consistency factor: MAD / 0.6745 estimates the standard deviation
pub const MAD_TO_SIGMA: f64 = 0.6745;

/// Median of `values`, reordering them in place
///
/// Even-length inputs return the mean of the two middle values. NaN sorts
/// last under `total_cmp`, so callers should only pass finite data.
pub fn median_in_place(values: &mut [f32]) -> Option<f64> {
    let n = values.len();
    if n == 0 {
        return None;
    }

    let mid = n / 2;
    let (lower, upper, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    let upper = *upper as f64;
    if n % 2 == 1 {
        return Some(upper);
    }

    let lower_max = lower
        .iter()
        .copied()
        .max_by(|a, b| a.total_cmp(b))
        .map(|v| v as f64)
        .unwrap_or(upper);
    Some((lower_max + upper) / 2.0)
}

/// Median absolute deviation scaled to a Gaussian-equivalent standard deviation
///
/// # Returns
/// `None` for empty input
pub fn robust_scale(values: &[f32]) -> Option<f64> {
    let mut work = values.to_vec();
    let center = median_in_place(&mut work)?;
    for v in work.iter_mut() {
        *v = ((*v as f64) - center).abs() as f32;
    }
    let mad = median_in_place(&mut work)?;
    Some(mad / MAD_TO_SIGMA)
}
