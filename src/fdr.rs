//! Benjamini-Hochberg false discovery rate correction
//!
//! Converts per-voxel p-values into q-values using the step-up procedure:
//! sort ascending, scale each p by n/rank, then enforce monotonicity with a
//! running minimum from the largest rank down.

use std::cmp::Ordering;

/// NaN sorts after every number, so non-finite inputs rank last
fn nan_last(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.total_cmp(&b),
    }
}

/// Compute BH q-values for `pvalues`, returned in the original order
///
/// NaN and infinite corrected values become 1.0 (non-significant). A NaN input
/// does not affect the q-values of the other entries.
///
/// # Example
/// ```
/// use phenostat::fdr::benjamini_hochberg;
///
/// let q = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.5]);
/// assert!((q[0] - 0.04).abs() < 1e-6);
/// assert!((q[3] - 0.5).abs() < 1e-6);
/// ```
pub fn benjamini_hochberg(pvalues: &[f32]) -> Vec<f32> {
    let n = pvalues.len();
    if n == 0 {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| nan_last(pvalues[a], pvalues[b]));

    // p / (rank / n), walked from the largest rank down
    let mut corrected = vec![f64::NAN; n];
    let mut running_min = f64::INFINITY;
    for rank in (0..n).rev() {
        let p = pvalues[order[rank]] as f64;
        let raw = p * n as f64 / (rank + 1) as f64;
        if raw.is_nan() {
            continue;
        }
        running_min = running_min.min(raw);
        corrected[rank] = running_min;
    }

    let mut qvalues = vec![1.0f32; n];
    for (rank, &q) in corrected.iter().enumerate() {
        qvalues[order[rank]] = if q.is_finite() {
            q.clamp(0.0, 1.0) as f32
        } else {
            1.0
        };
    }

    qvalues
}

/// Histogram of p-values over `bins` equal-width bins spanning [0, 1]
///
/// NaN values are ignored; p = 1.0 falls in the last bin.
pub fn pvalue_histogram(pvalues: &[f32], bins: usize) -> Vec<u32> {
    let mut counts = vec![0u32; bins];
    if bins == 0 {
        return counts;
    }

    for &p in pvalues.iter().filter(|p| !p.is_nan()) {
        let p = p.clamp(0.0, 1.0);
        let bin = ((p * bins as f32) as usize).min(bins - 1);
        counts[bin] += 1;
    }

    counts
}
