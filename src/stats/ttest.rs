// Two-sample Student t-test, mutant cohort vs wild-type cohort
//
// The voxel axis is processed in a fixed number of chunks. A voxel with no
// variance in either group yields a NaN p-value, which is replaced by a
// conservative 0.1 before FDR correction. The returned t-statistics are
// already filtered by q-value and clamped; p and q are raw.

use super::result::StatisticalResult;
use super::welch::student_t_two_sided;
use super::{mean_and_variance, replace_nan, split_ranges, StatisticalTest};
use crate::assemble::{clamp, filter_by_significance};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::fdr::benjamini_hochberg;
use crate::masked::{MaskedVector, Population};
use tracing::debug;

/// Placeholder p-value for voxels where the test is undefined
pub const NAN_PVALUE: f32 = 0.1;

#[derive(Debug, Clone)]
pub struct TwoSampleTTest {
    significance_threshold: f32,
    tstat_limit: f32,
    chunks: usize,
}

impl Default for TwoSampleTTest {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl TwoSampleTTest {
    pub fn new(significance_threshold: f32, tstat_limit: f32, chunks: usize) -> Self {
        Self {
            significance_threshold,
            tstat_limit,
            chunks: chunks.max(1),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.significance_threshold,
            config.tstat_limit,
            config.ttest_chunks,
        )
    }
}

/// Pooled-variance two-sample t-test, returning `(t, p)`
///
/// Positive t means `a` has the higher mean.
pub fn pooled_ttest(a: &[f64], b: &[f64]) -> (f64, f64) {
    let (mean_a, var_a) = mean_and_variance(a, 1);
    let (mean_b, var_b) = mean_and_variance(b, 1);
    let na = a.len() as f64;
    let nb = b.len() as f64;

    let dof = na + nb - 2.0;
    let pooled = ((na - 1.0) * var_a + (nb - 1.0) * var_b) / dof;
    let t = (mean_a - mean_b) / (pooled * (1.0 / na + 1.0 / nb)).sqrt();

    (t, student_t_two_sided(t, dof))
}

impl StatisticalTest for TwoSampleTTest {
    fn name(&self) -> &'static str {
        "TTest"
    }

    fn run(&self, wildtype: &Population, mutant: &Population) -> Result<StatisticalResult> {
        wildtype.ensure_compatible(mutant)?;
        let voxels = wildtype.voxel_count();
        let mask_id = wildtype.mask_id();

        let mut tstats = Vec::with_capacity(voxels);
        let mut pvalues = Vec::with_capacity(voxels);
        let mut wt_column = Vec::with_capacity(wildtype.len());
        let mut mut_column = Vec::with_capacity(mutant.len());

        for (index, range) in split_ranges(voxels, self.chunks).into_iter().enumerate() {
            debug!(chunk = index, voxels = range.len(), "t-test chunk");
            for voxel in range {
                wildtype.column_into(voxel, &mut wt_column);
                mutant.column_into(voxel, &mut mut_column);
                let (t, p) = pooled_ttest(&mut_column, &wt_column);
                tstats.push(t as f32);
                pvalues.push(p as f32);
            }
        }

        replace_nan(&mut pvalues, NAN_PVALUE);
        let qvalues = MaskedVector::new(benjamini_hochberg(&pvalues), mask_id);
        let tstats = MaskedVector::new(tstats, mask_id);

        let filtered = filter_by_significance(&tstats, &qvalues, self.significance_threshold)?;
        let tstats = clamp(&filtered, self.tstat_limit);

        StatisticalResult::new(tstats, MaskedVector::new(pvalues, mask_id), qvalues)
    }
}
