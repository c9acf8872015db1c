//! Voxel-wise statistical tests
//!
//! Every test variant implements [`StatisticalTest`]: it consumes a wild-type
//! and a mutant [`Population`] and produces a [`StatisticalResult`] of aligned
//! t-statistics, raw p-values and Benjamini-Hochberg q-values.
//!
//! Variants are selected from configuration through [`StatsMethod`] and built
//! into a [`TestVariant`]. Tuning constants (thresholds, chunk sizes) are passed
//! into each variant explicitly.

pub mod circular;
pub mod linear_model;
pub mod result;
pub mod solver;
pub mod ttest;
pub mod welch;
pub mod zscore;


pub use circular::CircularStatsTest;
pub use linear_model::LinearModelTest;
pub use result::{SpecimenResult, StatisticalResult};
pub use solver::{ExternalSolver, LinearModelSolver, OlsSolver, SolverRequest, SolverResponse};
pub use ttest::TwoSampleTTest;
pub use welch::welch_ttest;
pub use zscore::{AngularZScoreTest, OneAgainstManyZScoreTest, ZScoreTest};

use crate::error::Result;
use crate::masked::Population;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Capability shared by every line-level test variant
pub trait StatisticalTest {
    /// Name used for output directories and file names
    fn name(&self) -> &'static str;

    /// Compare `mutant` against `wildtype` voxel by voxel
    fn run(&self, wildtype: &Population, mutant: &Population) -> Result<StatisticalResult>;
}

/// Test method selected by an analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatsMethod {
    #[serde(rename = "ttest")]
    TTest,
    LinearModel,
    Circular,
}

impl StatsMethod {
    /// Whether the method works on angles in degrees
    pub fn is_angular(self) -> bool {
        matches!(self, Self::Circular)
    }
}

impl fmt::Display for StatsMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TTest => write!(f, "ttest"),
            Self::LinearModel => write!(f, "linear-model"),
            Self::Circular => write!(f, "circular"),
        }
    }
}

/// A constructed test, dispatching to the selected variant
pub enum TestVariant {
    TTest(TwoSampleTTest),
    LinearModel(LinearModelTest),
    Circular(CircularStatsTest),
}

impl StatisticalTest for TestVariant {
    fn name(&self) -> &'static str {
        match self {
            Self::TTest(test) => test.name(),
            Self::LinearModel(test) => test.name(),
            Self::Circular(test) => test.name(),
        }
    }

    fn run(&self, wildtype: &Population, mutant: &Population) -> Result<StatisticalResult> {
        match self {
            Self::TTest(test) => test.run(wildtype, mutant),
            Self::LinearModel(test) => test.run(wildtype, mutant),
            Self::Circular(test) => test.run(wildtype, mutant),
        }
    }
}

/// Split `len` items into `parts` contiguous ranges whose sizes differ by at most one
///
/// The first `len % parts` ranges get the extra item (numpy `array_split`
/// sizing). Empty ranges are produced when `parts > len`.
pub fn split_ranges(len: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1);
    let base = len / parts;
    let extra = len % parts;

    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let size = base + usize::from(i < extra);
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}

/// Replace NaN with `sentinel`, leaving every other value untouched
pub(crate) fn replace_nan(values: &mut [f32], sentinel: f32) {
    for v in values.iter_mut().filter(|v| v.is_nan()) {
        *v = sentinel;
    }
}

/// Mean and variance of `values` with `ddof` delta degrees of freedom
///
/// Returns NaN variance when `values.len() <= ddof`.
pub(crate) fn mean_and_variance(values: &[f64], ddof: usize) -> (f64, f64) {
    let n = values.len();
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    if n <= ddof {
        return (mean, f64::NAN);
    }
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (mean, ss / (n - ddof) as f64)
}
