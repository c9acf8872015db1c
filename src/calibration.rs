//! Per-label p-value thresholds calibrated by permutation
//!
//! The table has one row per label with at least `label_name` and `p_thresh`
//! columns; an `fdr` column is carried through when present. Organ volume
//! calls are joined to it by label name.

use crate::error::{Result, StatsError};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub p_thresh: f32,
    pub fdr: Option<f32>,
}

impl Calibration {
    pub fn is_significant(&self, pvalue: f32) -> bool {
        pvalue <= self.p_thresh
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibratedThresholds {
    by_label: BTreeMap<String, Calibration>,
}

impl CalibratedThresholds {
    pub fn new(by_label: BTreeMap<String, Calibration>) -> Self {
        Self { by_label }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        let column = |name: &str| headers.iter().position(|h| h == name);
        let (Some(label_col), Some(thresh_col)) = (column("label_name"), column("p_thresh")) else {
            return Err(StatsError::config(format!(
                "{} needs 'label_name' and 'p_thresh' columns",
                path.display()
            )));
        };
        let fdr_col = column("fdr");

        let parse = |value: &str, what: &str| {
            value.trim().parse::<f32>().map_err(|_| {
                StatsError::config(format!("invalid {} '{}' in {}", what, value, path.display()))
            })
        };

        let mut by_label = BTreeMap::new();
        for record in reader.records() {
            let record = record?;
            let label = record.get(label_col).unwrap_or_default().trim().to_string();
            let p_thresh = parse(record.get(thresh_col).unwrap_or_default(), "p_thresh")?;
            let fdr = fdr_col
                .and_then(|col| record.get(col))
                .filter(|v| !v.trim().is_empty())
                .map(|v| parse(v, "fdr"))
                .transpose()?;
            by_label.insert(label, Calibration { p_thresh, fdr });
        }
        Ok(Self { by_label })
    }

    pub fn get(&self, label: &str) -> Option<&Calibration> {
        self.by_label.get(label)
    }

    pub fn len(&self) -> usize {
        self.by_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_label.is_empty()
    }
}
