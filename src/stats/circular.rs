// Circular statistics for angular data in degrees
//
// Per voxel: circular mean and variance of each group, the shortest distance
// from the mutant mean to the wild-type mean (direct or reflected through
// 360), then Welch's t-test of the wild-type mean against that distance.

use super::result::StatisticalResult;
use super::welch::welch_ttest;
use super::StatisticalTest;
use crate::error::Result;
use crate::fdr::benjamini_hochberg;
use crate::masked::{MaskedVector, Population};
use std::f64::consts::PI;

/// Mean resultant length R of angles in degrees, in [0, 1]
pub fn mean_resultant_length(angles: &[f64]) -> f64 {
    let n = angles.len() as f64;
    let (sin, cos) = sums(angles);
    (sin * sin + cos * cos).sqrt() / n
}

fn sums(angles: &[f64]) -> (f64, f64) {
    angles.iter().fold((0.0, 0.0), |(s, c), a| {
        let r = a.to_radians();
        (s + r.sin(), c + r.cos())
    })
}

/// Circular mean in degrees, in [0, 360)
///
/// ```
/// use phenostat::stats::circular::circular_mean;
///
/// assert!((circular_mean(&[350.0, 20.0]) - 5.0).abs() < 1e-9);
/// ```
pub fn circular_mean(angles: &[f64]) -> f64 {
    let (sin, cos) = sums(angles);
    let mean = sin.atan2(cos).to_degrees();
    if mean < 0.0 {
        mean + 360.0
    } else {
        mean
    }
}

/// Circular variance in squared degrees: `(360/2pi)^2 * 2 ln(1/R)`
pub fn circular_variance(angles: &[f64]) -> f64 {
    let scale = 360.0 / (2.0 * PI);
    scale * scale * 2.0 * (1.0 / mean_resultant_length(angles)).ln()
}

/// Angular deviation in degrees: `(180/pi) * sqrt(2 (1 - R))`
pub fn angular_deviation(angles: &[f64]) -> f64 {
    (180.0 / PI) * (2.0 * (1.0 - mean_resultant_length(angles))).sqrt()
}

/// Shorter of the direct and reflected distances between two mean angles
pub fn min_angular_distance(mutant_mean: f64, wildtype_mean: f64) -> f64 {
    let direct = (mutant_mean - wildtype_mean).abs();
    let reflected = (mutant_mean - (360.0 - wildtype_mean)).abs();
    direct.min(reflected)
}

/// Circular comparison of mutant and wild-type angle volumes
///
/// NaN p-values become 1.0 and NaN t-statistics 0.0.
#[derive(Debug, Clone, Default)]
pub struct CircularStatsTest;

impl StatisticalTest for CircularStatsTest {
    fn name(&self) -> &'static str {
        "CircularStats"
    }

    fn run(&self, wildtype: &Population, mutant: &Population) -> Result<StatisticalResult> {
        wildtype.ensure_compatible(mutant)?;
        let voxels = wildtype.voxel_count();
        let mask_id = wildtype.mask_id();

        let mut tstats = Vec::with_capacity(voxels);
        let mut pvalues = Vec::with_capacity(voxels);
        let mut wt_column = Vec::with_capacity(wildtype.len());
        let mut mut_column = Vec::with_capacity(mutant.len());

        for voxel in 0..voxels {
            wildtype.column_into(voxel, &mut wt_column);
            mutant.column_into(voxel, &mut mut_column);

            let wt_mean = circular_mean(&wt_column);
            let distance = min_angular_distance(circular_mean(&mut_column), wt_mean);
            let (p, t) = welch_ttest(
                wt_mean,
                circular_variance(&wt_column),
                wildtype.len(),
                distance,
                circular_variance(&mut_column),
                mutant.len(),
            );

            pvalues.push(if p.is_nan() { 1.0 } else { p as f32 });
            tstats.push(if t.is_nan() { 0.0 } else { t as f32 });
        }

        let qvalues = benjamini_hochberg(&pvalues);
        StatisticalResult::new(
            MaskedVector::new(tstats, mask_id),
            MaskedVector::new(pvalues, mask_id),
            MaskedVector::new(qvalues, mask_id),
        )
    }
}
