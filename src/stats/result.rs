// Output of a statistical run: aligned t/p/q vectors plus optional
// per-specimen results keyed by specimen id.

use crate::error::Result;
use crate::masked::MaskedVector;
use std::collections::BTreeMap;

/// Per-specimen statistics (one mutant against the wild-type cohort)
#[derive(Debug, Clone)]
pub struct SpecimenResult {
    pub tstats: MaskedVector,
    pub pvalues: MaskedVector,
    pub qvalues: MaskedVector,
    /// Counts of p-values in equal-width bins over [0, 1]
    pub histogram: Vec<u32>,
}

impl SpecimenResult {
    pub fn new(
        tstats: MaskedVector,
        pvalues: MaskedVector,
        qvalues: MaskedVector,
        histogram: Vec<u32>,
    ) -> Result<Self> {
        tstats.ensure_aligned(&pvalues)?;
        tstats.ensure_aligned(&qvalues)?;
        Ok(Self {
            tstats,
            pvalues,
            qvalues,
            histogram,
        })
    }
}

/// Line-level statistics with optional specimen-level results
///
/// The three line vectors always have equal length and index i refers to the
/// same voxel in each.
#[derive(Debug, Clone)]
pub struct StatisticalResult {
    tstats: MaskedVector,
    pvalues: MaskedVector,
    qvalues: MaskedVector,
    specimens: BTreeMap<String, SpecimenResult>,
}

impl StatisticalResult {
    pub fn new(tstats: MaskedVector, pvalues: MaskedVector, qvalues: MaskedVector) -> Result<Self> {
        tstats.ensure_aligned(&pvalues)?;
        tstats.ensure_aligned(&qvalues)?;
        Ok(Self {
            tstats,
            pvalues,
            qvalues,
            specimens: BTreeMap::new(),
        })
    }

    pub fn with_specimens(mut self, specimens: BTreeMap<String, SpecimenResult>) -> Self {
        self.specimens = specimens;
        self
    }

    pub fn tstats(&self) -> &MaskedVector {
        &self.tstats
    }

    pub fn pvalues(&self) -> &MaskedVector {
        &self.pvalues
    }

    pub fn qvalues(&self) -> &MaskedVector {
        &self.qvalues
    }

    pub fn specimens(&self) -> &BTreeMap<String, SpecimenResult> {
        &self.specimens
    }

    pub fn len(&self) -> usize {
        self.tstats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tstats.is_empty()
    }
}
