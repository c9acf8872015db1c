//! Result assembly: significance filtering, clamping and reconstruction of
//! full-size result volumes, plus the threshold table export.
//!
//! Filtering and clamping operate on masked vectors; the volume is rebuilt
//! only afterwards, so the three steps always run in that order.

use crate::error::Result;
use crate::masked::{rebuild, Mask, MaskedVector};
use crate::stats::{SpecimenResult, StatisticalResult};
use ndarray::Array3;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Columns of the threshold table
pub const THRESHOLD_TABLE_COLUMNS: [&str; 4] = ["", "F-statistic", "tvalue-(Intercept)", "tvalue-genotype"];

/// Fixed p-value thresholds reported in the threshold table, with their labels
pub const THRESHOLD_LEVELS: [(&str, f32); 10] = [
    ("1e-06", 1e-6),
    ("1e-05", 1e-5),
    ("0.0001", 1e-4),
    ("0.001", 1e-3),
    ("0.005", 5e-3),
    ("0.01", 0.01),
    ("0.05", 0.05),
    ("0.1", 0.1),
    ("0.15", 0.15),
    ("0.2", 0.2),
];

/// Zero every statistic whose q-value exceeds `threshold`
///
/// # Example
/// ```
/// use phenostat::assemble::filter_by_significance;
/// use phenostat::masked::{Mask, MaskedVector};
///
/// let id = Mask::all_true((1, 1, 1)).id();
/// let t = MaskedVector::new(vec![100.0], id);
/// let q = MaskedVector::new(vec![0.5], id);
/// let filtered = filter_by_significance(&t, &q, 0.05).unwrap();
/// assert_eq!(filtered.as_slice(), &[0.0]);
/// ```
pub fn filter_by_significance(
    tstats: &MaskedVector,
    qvalues: &MaskedVector,
    threshold: f32,
) -> Result<MaskedVector> {
    tstats.ensure_aligned(qvalues)?;
    let values = tstats
        .iter()
        .zip(qvalues.iter())
        .map(|(&t, &q)| if q > threshold { 0.0 } else { t })
        .collect();
    Ok(MaskedVector::new(values, tstats.mask_id()))
}

/// Clip statistics to `[-limit, limit]`; NaN becomes 0
pub fn clamp(tstats: &MaskedVector, limit: f32) -> MaskedVector {
    tstats.map(|t| if t.is_nan() { 0.0 } else { t.clamp(-limit, limit) })
}

/// Smallest positive statistic whose q-value is at most `threshold`
pub fn min_t_at(qvalues: &[f32], tstats: &[f32], threshold: f32) -> Option<f32> {
    qvalues
        .iter()
        .zip(tstats)
        .filter(|(&q, &t)| q <= threshold && t > 0.0)
        .map(|(_, &t)| t)
        .reduce(f32::min)
}

/// Filter, clamp and rebuild results into full-size volumes
#[derive(Debug, Clone)]
pub struct ResultAssembler {
    threshold: f32,
    limit: f32,
}

impl ResultAssembler {
    pub fn new(threshold: f32, limit: f32) -> Self {
        Self { threshold, limit }
    }

    /// Filtered and clamped statistics, still in masked form
    pub fn filtered(&self, tstats: &MaskedVector, qvalues: &MaskedVector) -> Result<MaskedVector> {
        let filtered = filter_by_significance(tstats, qvalues, self.threshold)?;
        Ok(clamp(&filtered, self.limit))
    }

    pub fn assemble(&self, result: &StatisticalResult, mask: &Mask) -> Result<Array3<f32>> {
        let t = self.filtered(result.tstats(), result.qvalues())?;
        rebuild(&t, mask, 0.0)
    }

    pub fn assemble_specimen(&self, result: &SpecimenResult, mask: &Mask) -> Result<Array3<f32>> {
        let t = self.filtered(&result.tstats, &result.qvalues)?;
        rebuild(&t, mask, 0.0)
    }

    /// Threshold table over the clamped, unfiltered line-level statistics
    pub fn threshold_table(&self, result: &StatisticalResult) -> Result<ThresholdTable> {
        ThresholdTable::new(result.qvalues(), &clamp(result.tstats(), self.limit))
    }
}

/// Minimum qualifying t-statistic per fixed p-value threshold
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdTable {
    rows: Vec<(&'static str, Option<f32>)>,
}

impl ThresholdTable {
    pub fn new(qvalues: &MaskedVector, tstats: &MaskedVector) -> Result<Self> {
        tstats.ensure_aligned(qvalues)?;
        let rows = THRESHOLD_LEVELS
            .iter()
            .map(|&(label, level)| (label, min_t_at(qvalues.as_slice(), tstats.as_slice(), level)))
            .collect();
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[(&'static str, Option<f32>)] {
        &self.rows
    }

    /// Write the table in its external layout: labels and header quoted,
    /// values and `NA` bare
    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let quoted = |field: &str| format!("\"{}\"", field);
        let mut writer = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Never)
            .from_writer(writer);

        writer.write_record(THRESHOLD_TABLE_COLUMNS.iter().map(|c| quoted(c)))?;
        for (label, t) in &self.rows {
            let value = t.map(|t| format!("{:?}", t)).unwrap_or_else(|| "NA".to_string());
            writer.write_record([quoted(label), "NA".to_string(), "NA".to_string(), value])?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn to_csv(&self) -> Result<String> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        self.write_to(File::create(path)?)
    }
}

/// Overview of a line-level result
#[derive(Debug, Clone, PartialEq)]
pub struct LineSummary {
    pub min_t: f32,
    pub max_t: f32,
    /// Minimum positive t with q <= 0.05, else |max negative t| with q <= 0.05
    pub t_threshold: Option<f32>,
    pub min_p: f32,
    pub min_q: f32,
}

impl LineSummary {
    pub fn new(result: &StatisticalResult) -> Self {
        let t = result.tstats().as_slice();
        let q = result.qvalues().as_slice();

        let negative = || {
            q.iter()
                .zip(t)
                .filter(|(&q, &t)| q <= 0.05 && t < 0.0)
                .map(|(_, &t)| t)
                .reduce(f32::max)
                .map(f32::abs)
        };

        Self {
            min_t: t.iter().copied().fold(f32::NAN, f32::min),
            max_t: t.iter().copied().fold(f32::NAN, f32::max),
            t_threshold: min_t_at(q, t, 0.05).or_else(negative),
            min_p: result.pvalues().iter().copied().fold(f32::NAN, f32::min),
            min_q: q.iter().copied().fold(f32::NAN, f32::min),
        }
    }

    pub fn log(&self, analysis: &str) {
        info!(analysis, "{}", self);
    }
}

impl fmt::Display for LineSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "min t {}, max t {}, t threshold at FDR 0.05 ", self.min_t, self.max_t)?;
        match self.t_threshold {
            Some(t) => write!(f, "{}", t)?,
            None => write!(f, "none")?,
        }
        write!(f, ", min p {}, min q {}", self.min_p, self.min_q)
    }
}
