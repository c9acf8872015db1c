// One-against-many z-scores: a single mutant specimen against the wild-type
// population, voxel by voxel.
//
// Scores with magnitude below the cutoff are zeroed, the rest clamped to
// +/- limit, and NaN scores become 0.

use super::circular::{angular_deviation, circular_mean};
use super::mean_and_variance;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::masked::{MaskedVector, Population};

/// Per-voxel z-map of one specimen against a reference population
pub trait ZScoreTest {
    fn process(&self, wildtype: &Population, specimen: &MaskedVector) -> Result<MaskedVector>;
}

fn threshold(z: f32, cutoff: f32, limit: f32) -> f32 {
    if z.is_nan() || z.abs() < cutoff {
        0.0
    } else {
        z.clamp(-limit, limit)
    }
}

fn zmap<F>(wildtype: &Population, specimen: &MaskedVector, mut score: F) -> Result<MaskedVector>
where
    F: FnMut(&[f64], f64) -> f64,
{
    if let Some(first) = wildtype.specimens().first() {
        first.data.ensure_aligned(specimen)?;
    }
    let mut column = Vec::with_capacity(wildtype.len());
    let values = (0..specimen.len())
        .map(|voxel| {
            wildtype.column_into(voxel, &mut column);
            score(&column, specimen[voxel] as f64) as f32
        })
        .collect();
    Ok(MaskedVector::new(values, specimen.mask_id()))
}

/// Standard z-score: `(x - mean) / std` with population standard deviation
#[derive(Debug, Clone)]
pub struct OneAgainstManyZScoreTest {
    cutoff: f32,
    limit: f32,
}

impl OneAgainstManyZScoreTest {
    pub fn new(cutoff: f32, limit: f32) -> Self {
        Self { cutoff, limit }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.zscore_cutoff, config.tstat_limit)
    }
}

impl ZScoreTest for OneAgainstManyZScoreTest {
    fn process(&self, wildtype: &Population, specimen: &MaskedVector) -> Result<MaskedVector> {
        let raw = zmap(wildtype, specimen, |column, x| {
            let (mean, var) = mean_and_variance(column, 0);
            (x - mean) / var.sqrt()
        })?;
        Ok(raw.map(|z| threshold(z, self.cutoff, self.limit)))
    }
}

/// Angular z-score in degrees
///
/// The deviation from the wild-type circular mean is wrapped into (-180, 180]
/// and divided by the wild-type angular deviation.
#[derive(Debug, Clone)]
pub struct AngularZScoreTest {
    cutoff: f32,
    limit: f32,
}

impl AngularZScoreTest {
    pub fn new(cutoff: f32, limit: f32) -> Self {
        Self { cutoff, limit }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.zscore_cutoff, config.tstat_limit)
    }
}

/// Wrap an angle difference in degrees into (-180, 180]
pub fn wrap_degrees(delta: f64) -> f64 {
    let wrapped = delta.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

impl ZScoreTest for AngularZScoreTest {
    fn process(&self, wildtype: &Population, specimen: &MaskedVector) -> Result<MaskedVector> {
        let raw = zmap(wildtype, specimen, |column, x| {
            wrap_degrees(x - circular_mean(column)) / angular_deviation(column)
        })?;
        Ok(raw.map(|z| threshold(z, self.cutoff, self.limit)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masked::{Mask, Specimen};

    fn wildtype(mask: &Mask, rows: &[Vec<f32>]) -> Population {
        let specimens = rows
            .iter()
            .enumerate()
            .map(|(i, r)| Specimen::new(format!("wt{}", i), MaskedVector::new(r.clone(), mask.id())))
            .collect();
        Population::new("wildtype", specimens).unwrap()
    }

    #[test]
    fn test_zscore_cutoff_clamp_and_nan() {
        let mask = Mask::all_true((1, 1, 4));
        // Voxel columns: [0, 2] (mean 1, std 1), constant 5, constant 5, [0, 2]
        let wt = wildtype(&mask, &[vec![0.0, 5.0, 5.0, 0.0], vec![2.0, 5.0, 5.0, 2.0]]);
        let specimen = MaskedVector::new(vec![5.0, 6.0, 5.0, 2.0], mask.id());

        let z = OneAgainstManyZScoreTest::new(3.0, 50.0).process(&wt, &specimen).unwrap();
        // (5 - 1) / 1 = 4 survives the cutoff
        assert_eq!(z[0], 4.0);
        // 1 / 0 = inf is clamped
        assert_eq!(z[1], 50.0);
        // 0 / 0 = NaN becomes 0
        assert_eq!(z[2], 0.0);
        // (2 - 1) / 1 = 1 is below the cutoff
        assert_eq!(z[3], 0.0);
    }

    #[test]
    fn test_zscore_rejects_foreign_vector() {
        let mask = Mask::all_true((1, 1, 2));
        let wt = wildtype(&mask, &[vec![0.0, 1.0], vec![1.0, 2.0]]);
        let other = MaskedVector::new(vec![0.0, 1.0, 2.0], mask.id());
        assert!(OneAgainstManyZScoreTest::new(3.0, 50.0).process(&wt, &other).is_err());
    }

    #[test]
    fn test_wrap_degrees() {
        assert_eq!(wrap_degrees(190.0), -170.0);
        assert_eq!(wrap_degrees(-190.0), 170.0);
        assert_eq!(wrap_degrees(180.0), 180.0);
        assert_eq!(wrap_degrees(-180.0), 180.0);
        assert_eq!(wrap_degrees(30.0), 30.0);
    }

    #[test]
    fn test_angular_zscore_wraps_across_zero() {
        let mask = Mask::all_true((1, 1, 1));
        let wt = wildtype(&mask, &[vec![358.0], vec![2.0], vec![0.0], vec![359.0], vec![1.0]]);
        let wt_column = [358.0, 2.0, 0.0, 359.0, 1.0];
        let std = angular_deviation(&wt_column);

        // 330 is 30 degrees below the wild-type mean of ~0
        let specimen = MaskedVector::new(vec![330.0], mask.id());
        let z = AngularZScoreTest::new(3.0, 50.0).process(&wt, &specimen).unwrap();
        let expected = (wrap_degrees(330.0 - circular_mean(&wt_column)) / std) as f32;
        assert!(expected < -3.0);
        assert!((z[0] - expected.max(-50.0)).abs() < 1e-3);
    }
}
