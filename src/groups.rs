//! Groups file: one row per specimen with an id column followed by
//! genotype and covariate columns
//!
//! The first column always holds the specimen id. Linear-model runs need a copy
//! of the table whose rows follow the data row order, which [`GroupsTable::aligned`]
//! produces.

use crate::error::{Result, StatsError};
use std::collections::HashMap;
use std::path::Path;

/// Image file extensions stripped from volume names to form specimen ids
const IMAGE_EXTENSIONS: &[&str] = &[".nii.gz", ".nii", ".nrrd", ".mnc", ".tiff", ".tif"];

/// Specimen id for a volume file name or path
///
/// ```
/// use phenostat::groups::specimen_id;
///
/// assert_eq!(specimen_id("data/wt/embryo_01.nii.gz"), "embryo_01");
/// assert_eq!(specimen_id("embryo_02"), "embryo_02");
/// ```
pub fn specimen_id(name: &str) -> &str {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    IMAGE_EXTENSIONS
        .iter()
        .find_map(|ext| base.strip_suffix(ext))
        .unwrap_or(base)
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupsTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl GroupsTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        if headers.is_empty() {
            return Err(StatsError::groups("groups table has no columns"));
        }
        if let Some(row) = rows.iter().find(|r| r.len() != headers.len()) {
            return Err(StatsError::groups(format!(
                "row for '{}' has {} fields, expected {}",
                row.first().map(String::as_str).unwrap_or(""),
                row.len(),
                headers.len()
            )));
        }
        Ok(Self { headers, rows })
    }

    /// Read a comma-separated groups file with a header row
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(|f| f.trim().to_string()).collect());
        }
        Self::new(headers, rows)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Specimen ids in row order
    pub fn ids(&self) -> Vec<&str> {
        self.rows.iter().map(|r| specimen_id(&r[0])).collect()
    }

    /// Values of the named column in row order
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let index = self.headers.iter().position(|h| h == name)?;
        Some(self.rows.iter().map(|r| r[index].as_str()).collect())
    }

    /// Numeric values of the named column
    pub fn numeric_column(&self, name: &str) -> Result<Vec<f64>> {
        let values = self
            .column(name)
            .ok_or_else(|| StatsError::groups(format!("no column named '{}'", name)))?;
        values
            .into_iter()
            .map(|v| {
                v.parse::<f64>().map_err(|_| {
                    StatsError::groups(format!("column '{}' has non-numeric value '{}'", name, v))
                })
            })
            .collect()
    }

    /// Rows reordered (and subset) to follow `ids`
    ///
    /// Fails if any id has no row.
    pub fn aligned(&self, ids: &[&str]) -> Result<Self> {
        let index: HashMap<&str, usize> = self
            .rows
            .iter()
            .enumerate()
            .map(|(i, r)| (specimen_id(&r[0]), i))
            .collect();

        let rows = ids
            .iter()
            .map(|id| {
                index
                    .get(specimen_id(id))
                    .map(|&i| self.rows[i].clone())
                    .ok_or_else(|| StatsError::groups(format!("specimen '{}' missing from groups file", id)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            headers: self.headers.clone(),
            rows,
        })
    }
}
