//! Per-label annotation of a filtered statistics volume
//!
//! The annotator is a sink: it receives the label map, the label names and
//! the filtered t-statistic volume and writes a table. Nothing it produces is
//! read back by the engine.

use crate::error::{Result, StatsError};
use ndarray::Array3;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

pub trait Annotator {
    fn annotate(&self, tstats: &Array3<f32>, output: &Path) -> Result<()>;
}

/// Label number to descriptive name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelNames {
    names: BTreeMap<u32, String>,
}

impl LabelNames {
    pub fn new(names: BTreeMap<u32, String>) -> Self {
        Self { names }
    }

    /// Read a CSV with `label` and `label_name` columns
    ///
    /// Without those headers the first two columns are used.
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        let label_col = headers.iter().position(|h| h == "label").unwrap_or(0);
        let name_col = headers.iter().position(|h| h == "label_name").unwrap_or(1);

        let mut names = BTreeMap::new();
        for record in reader.records() {
            let record = record?;
            let label = record.get(label_col).unwrap_or_default().trim();
            let label = label
                .parse::<u32>()
                .map_err(|_| StatsError::config(format!("invalid label number '{}' in {}", label, path.display())))?;
            let name = record.get(name_col).unwrap_or_default().trim().to_string();
            names.insert(label, name);
        }
        Ok(Self { names })
    }

    pub fn get(&self, label: u32) -> Option<&str> {
        self.names.get(&label).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.names.iter().map(|(&l, n)| (l, n.as_str()))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelSummary {
    pub label: u32,
    pub label_name: String,
    pub voxels: usize,
    pub significant_voxels: usize,
    pub mean_t: Option<f32>,
    pub min_t: Option<f32>,
    pub max_t: Option<f32>,
}

/// Summarises the non-zero (significant) statistics inside each label
#[derive(Debug, Clone)]
pub struct LabelSummaryAnnotator {
    label_map: Array3<f32>,
    names: LabelNames,
}

impl LabelSummaryAnnotator {
    pub fn new(label_map: Array3<f32>, names: LabelNames) -> Self {
        Self { label_map, names }
    }

    pub fn summarise(&self, tstats: &Array3<f32>) -> Result<Vec<LabelSummary>> {
        if tstats.dim() != self.label_map.dim() {
            return Err(StatsError::ShapeMismatch {
                volume: tstats.dim(),
                mask: self.label_map.dim(),
            });
        }

        let mut values: BTreeMap<u32, (usize, Vec<f32>)> = BTreeMap::new();
        for (&label, &t) in self.label_map.iter().zip(tstats.iter()) {
            if label <= 0.0 {
                continue;
            }
            let entry = values.entry(label.round() as u32).or_default();
            entry.0 += 1;
            if t != 0.0 {
                entry.1.push(t);
            }
        }

        Ok(self
            .names
            .iter()
            .map(|(label, name)| {
                let (voxels, significant) = values.get(&label).cloned().unwrap_or_default();
                let count = significant.len();
                LabelSummary {
                    label,
                    label_name: name.to_string(),
                    voxels,
                    significant_voxels: count,
                    mean_t: (count > 0).then(|| significant.iter().sum::<f32>() / count as f32),
                    min_t: significant.iter().copied().reduce(f32::min),
                    max_t: significant.iter().copied().reduce(f32::max),
                }
            })
            .collect())
    }
}

impl Annotator for LabelSummaryAnnotator {
    fn annotate(&self, tstats: &Array3<f32>, output: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(output)?;
        for row in self.summarise(tstats)? {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}
