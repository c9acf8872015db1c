// Linear-model test
//
// Wild-type and mutant data are stacked (wild-type rows first) and split into
// chunks along the voxel axis, each no wider than `chunk_size`. Chunks are
// fitted one after the other by a LinearModelSolver and concatenated in
// order. The solver reports the reciprocal of t, so each statistic is
// inverted after NaN sanitising.
//
// Specimen level: each mutant is fitted on its own against the whole
// wild-type cohort and corrected independently.

use super::result::{SpecimenResult, StatisticalResult};
use super::solver::{LinearModelSolver, SolverRequest};
use super::{split_ranges, StatisticalTest};
use crate::config::EngineConfig;
use crate::error::{Result, StatsError};
use crate::fdr::{benjamini_hochberg, pvalue_histogram};
use crate::groups::GroupsTable;
use crate::masked::{MaskedVector, Population, Specimen};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::ops::Range;
use tracing::{debug, info};

/// Placeholder p-value for voxels the solver could not fit
pub const NAN_PVALUE: f32 = 1.0;

/// Voxels `range` of every specimen, one row per specimen
pub fn chunk_from_specimens(specimens: &[&Specimen], range: Range<usize>) -> Array2<f64> {
    Array2::from_shape_fn((specimens.len(), range.len()), |(row, col)| {
        f64::from(specimens[row].data[range.start + col])
    })
}

/// Write a specimens x voxels chunk in the solver exchange format
///
/// Binary layout: `u32 rows`, `u32 cols` (little-endian) followed by
/// `rows * cols` little-endian f64 values, one voxel column after another.
pub fn write_chunk<W: Write>(chunk: &Array2<f64>, writer: &mut W) -> Result<()> {
    let dim = |n: usize| {
        u32::try_from(n).map_err(|_| StatsError::solver(format!("chunk dimension {} exceeds u32", n)))
    };
    writer.write_all(&dim(chunk.nrows())?.to_le_bytes())?;
    writer.write_all(&dim(chunk.ncols())?.to_le_bytes())?;
    for column in chunk.columns() {
        for value in column {
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    Ok(())
}

pub fn read_chunk<R: Read>(reader: &mut R) -> Result<Array2<f64>> {
    let mut word = [0u8; 4];
    reader.read_exact(&mut word)?;
    let rows = u32::from_le_bytes(word) as usize;
    reader.read_exact(&mut word)?;
    let cols = u32::from_le_bytes(word) as usize;

    let mut data = Vec::with_capacity(rows * cols);
    let mut value = [0u8; 8];
    for _ in 0..rows * cols {
        reader.read_exact(&mut value)?;
        data.push(f64::from_le_bytes(value));
    }
    // Stored voxel-major, so the transpose of a cols x rows array
    let transposed = Array2::from_shape_vec((cols, rows), data)
        .map_err(|e| StatsError::solver(format!("malformed chunk: {}", e)))?;
    Ok(transposed.reversed_axes())
}

/// Number of chunks needed so that none is wider than `chunk_size`
pub fn chunk_count(voxels: usize, chunk_size: usize) -> usize {
    voxels.div_ceil(chunk_size.max(1)).max(1)
}

pub struct LinearModelTest {
    solver: Box<dyn LinearModelSolver>,
    groups: Option<GroupsTable>,
    formula: Option<String>,
    chunk_size: usize,
    histogram_bins: usize,
    specimen_level: bool,
}

impl LinearModelTest {
    pub fn new(solver: Box<dyn LinearModelSolver>, config: &EngineConfig) -> Self {
        Self {
            solver,
            groups: None,
            formula: None,
            chunk_size: config.lm_chunk_size,
            histogram_bins: config.histogram_bins,
            specimen_level: config.specimen_level,
        }
    }

    pub fn with_groups(mut self, groups: GroupsTable) -> Self {
        self.groups = Some(groups);
        self
    }

    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_specimen_level(mut self, enabled: bool) -> Self {
        self.specimen_level = enabled;
        self
    }

    /// Fit every chunk of `specimens` and concatenate `(pvalues, tstats)`
    fn fit(
        &self,
        specimens: &[&Specimen],
        groups: &GroupsTable,
        formula: &str,
    ) -> Result<(Vec<f32>, Vec<f32>)> {
        let voxels = specimens.first().map(|s| s.data.len()).unwrap_or(0);
        let chunks = split_ranges(voxels, chunk_count(voxels, self.chunk_size));
        let total = chunks.len();

        let mut pvalues = Vec::with_capacity(voxels);
        let mut tstats = Vec::with_capacity(voxels);
        for (index, range) in chunks.into_iter().enumerate() {
            debug!(chunk = index + 1, of = total, voxels = range.len(), "linear model chunk");
            let chunk = chunk_from_specimens(specimens, range);
            let response = self.solver.solve(&SolverRequest {
                chunk: &chunk,
                groups,
                formula,
            })?;

            pvalues.extend(response.pvalues.iter().map(|&p| {
                let p = p as f32;
                if p.is_nan() {
                    NAN_PVALUE
                } else {
                    p
                }
            }));
            tstats.extend(response.complement.iter().map(|&t| {
                let t = t as f32;
                1.0 / if t.is_nan() { 0.0 } else { t }
            }));
        }

        Ok((pvalues, tstats))
    }

    fn specimen_results(
        &self,
        wildtype: &Population,
        mutant: &Population,
        groups: &GroupsTable,
        formula: &str,
    ) -> Result<BTreeMap<String, SpecimenResult>> {
        let mask_id = wildtype.mask_id();
        let mut results = BTreeMap::new();

        for specimen in mutant.specimens() {
            let mut rows: Vec<&Specimen> = wildtype.specimens().iter().collect();
            rows.push(specimen);
            let ids: Vec<&str> = rows.iter().map(|s| s.id.as_str()).collect();
            let aligned = groups.aligned(&ids)?;

            let (pvalues, tstats) = self.fit(&rows, &aligned, formula)?;
            let qvalues = benjamini_hochberg(&pvalues);
            let histogram = pvalue_histogram(&pvalues, self.histogram_bins);
            debug!(specimen = %specimen.id, "specimen-level fit complete");

            results.insert(
                specimen.id.clone(),
                SpecimenResult::new(
                    MaskedVector::new(tstats, mask_id),
                    MaskedVector::new(pvalues, mask_id),
                    MaskedVector::new(qvalues, mask_id),
                    histogram,
                )?,
            );
        }

        Ok(results)
    }
}

impl StatisticalTest for LinearModelTest {
    fn name(&self) -> &'static str {
        "LinearModel"
    }

    fn run(&self, wildtype: &Population, mutant: &Population) -> Result<StatisticalResult> {
        let groups = self.groups.as_ref().ok_or(StatsError::MissingGroups)?;
        let formula = self
            .formula
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .ok_or(StatsError::MissingFormula)?;
        wildtype.ensure_compatible(mutant)?;

        let rows: Vec<&Specimen> = wildtype.specimens().iter().chain(mutant.specimens()).collect();
        let ids: Vec<&str> = rows.iter().map(|s| s.id.as_str()).collect();
        let aligned = groups.aligned(&ids)?;

        info!(
            wildtype = wildtype.len(),
            mutant = mutant.len(),
            voxels = wildtype.voxel_count(),
            formula,
            "fitting line-level linear model"
        );
        let (pvalues, tstats) = self.fit(&rows, &aligned, formula)?;
        let qvalues = benjamini_hochberg(&pvalues);

        let mask_id = wildtype.mask_id();
        let result = StatisticalResult::new(
            MaskedVector::new(tstats, mask_id),
            MaskedVector::new(pvalues, mask_id),
            MaskedVector::new(qvalues, mask_id),
        )?;

        if !self.specimen_level {
            return Ok(result);
        }
        let specimens = self.specimen_results(wildtype, mutant, groups, formula)?;
        Ok(result.with_specimens(specimens))
    }
}
