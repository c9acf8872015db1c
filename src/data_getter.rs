//! Data acquisition: turns input files into a mask and two populations of
//! masked vectors
//!
//! Voxel analyses read one NIfTI volume per specimen. Organ-volume analyses
//! read per-label volume tables and work in label space, where the "mask"
//! is an all-true `1 x 1 x L` volume over the L labels.

use crate::annotation::LabelNames;
use crate::error::{Result, StatsError};
use crate::groups::specimen_id;
use crate::masked::{flatten, Mask, MaskedVector, Population, Specimen};
use crate::nifti_io::read_volume;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Everything a statistical run needs for one analysis
#[derive(Debug, Clone)]
pub struct AnalysisData {
    pub mask: Mask,
    /// Voxel spacing of the mask, reused for every written volume
    pub spacing: [f32; 3],
    pub wildtype: Population,
    pub mutant: Population,
    /// Label names when the data is in label space
    pub labels: Option<Vec<String>>,
}

pub trait DataGetter {
    fn acquire(&self) -> Result<AnalysisData>;
}

/// Reads NIfTI volumes and flattens them with the analysis mask
#[derive(Debug, Clone)]
pub struct NiftiDataGetter {
    mask: PathBuf,
    wildtype: Vec<PathBuf>,
    mutant: Vec<PathBuf>,
}

impl NiftiDataGetter {
    pub fn new(mask: PathBuf, wildtype: Vec<PathBuf>, mutant: Vec<PathBuf>) -> Self {
        Self {
            mask,
            wildtype,
            mutant,
        }
    }

    fn population(&self, name: &str, paths: &[PathBuf], mask: &Mask) -> Result<Population> {
        let specimens = paths
            .iter()
            .map(|path| {
                debug!(path = %path.display(), "reading volume");
                let volume = read_volume(path)?;
                let id = specimen_id(&path.to_string_lossy()).to_string();
                let data = flatten(&volume.data, mask)
                    .map_err(|e| StatsError::volume(path, e.to_string()))?;
                Ok(Specimen::new(id, data))
            })
            .collect::<Result<Vec<_>>>()?;
        Population::new(name, specimens)
    }
}

impl DataGetter for NiftiDataGetter {
    fn acquire(&self) -> Result<AnalysisData> {
        let mask_volume = read_volume(&self.mask)?;
        let mask = Mask::from_volume(&mask_volume.data);
        info!(
            voxels = mask.count(),
            wildtype = self.wildtype.len(),
            mutant = self.mutant.len(),
            "loading volumes"
        );

        let wildtype = self.population("wildtype", &self.wildtype, &mask)?;
        let mutant = self.population("mutant", &self.mutant, &mask)?;

        Ok(AnalysisData {
            mask,
            spacing: mask_volume.spacing,
            wildtype,
            mutant,
            labels: None,
        })
    }
}

/// Organ volumes: one row per specimen, one column per label
#[derive(Debug, Clone, PartialEq)]
pub struct OrganVolumeTable {
    labels: Vec<String>,
    ids: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl OrganVolumeTable {
    /// Read a CSV whose first column holds specimen ids and whose header
    /// names the labels
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let labels: Vec<String> = reader.headers()?.iter().skip(1).map(str::to_string).collect();

        let mut ids = Vec::new();
        let mut values = Vec::new();
        for record in reader.records() {
            let record = record?;
            let id = record.get(0).unwrap_or_default();
            let row = record
                .iter()
                .skip(1)
                .map(|v| {
                    v.trim().parse::<f64>().map_err(|_| {
                        StatsError::volume(path, format!("non-numeric organ volume '{}' for '{}'", v, id))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            if row.len() != labels.len() {
                return Err(StatsError::LengthMismatch {
                    expected: labels.len(),
                    actual: row.len(),
                });
            }
            ids.push(specimen_id(id).to_string());
            values.push(row);
        }

        Ok(Self { labels, ids, values })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Keep only the rows whose specimen id passes `keep`
    pub fn retain_specimens(&mut self, keep: impl Fn(&str) -> bool) {
        let (ids, values): (Vec<String>, Vec<Vec<f64>>) = self
            .ids
            .drain(..)
            .zip(self.values.drain(..))
            .filter(|(id, _)| keep(id))
            .unzip();
        self.ids = ids;
        self.values = values;
    }

    /// Replace label numbers with their names, dropping labels that have none
    pub fn name_labels(&mut self, names: &LabelNames) {
        let named: Vec<(usize, String)> = self
            .labels
            .iter()
            .enumerate()
            .filter_map(|(col, label)| {
                let name = label.trim().parse::<u32>().ok().and_then(|l| names.get(l))?;
                Some((col, name.to_string()))
            })
            .collect();

        for row in &mut self.values {
            let kept: Vec<f64> = named.iter().map(|&(col, _)| row[col]).collect();
            *row = kept;
        }
        self.labels = named.into_iter().map(|(_, name)| name).collect();
    }

    /// Log-transformed volumes as a population over the label-space mask
    pub fn to_population(&self, name: &str, mask: &Mask) -> Result<Population> {
        let specimens = self
            .ids
            .iter()
            .zip(&self.values)
            .map(|(id, row)| {
                let logged = row.iter().map(|v| v.ln() as f32).collect();
                Specimen::new(id.clone(), MaskedVector::new(logged, mask.id()))
            })
            .collect();
        Population::new(name, specimens)
    }
}

/// Littermate wild-types are recorded among the mutants with a `WT` or `wt`
/// tag in their id
pub fn is_littermate(id: &str) -> bool {
    id.contains("WT") || id.contains("wt")
}

/// Reads wild-type and mutant organ-volume tables
///
/// Littermate wild-types are dropped from the mutant table, which is also
/// restricted to the configured mutant ids when any are given. With label
/// names, columns are renamed and unnamed labels are dropped from both tables.
#[derive(Debug, Clone)]
pub struct OrganVolumeDataGetter {
    wildtype: PathBuf,
    mutant: PathBuf,
    mutant_ids: Vec<String>,
    label_names: Option<LabelNames>,
}

impl OrganVolumeDataGetter {
    pub fn new(wildtype: PathBuf, mutant: PathBuf) -> Self {
        Self {
            wildtype,
            mutant,
            mutant_ids: Vec::new(),
            label_names: None,
        }
    }

    pub fn with_mutant_ids(mut self, ids: Vec<String>) -> Self {
        self.mutant_ids = ids;
        self
    }

    pub fn with_label_names(mut self, names: LabelNames) -> Self {
        self.label_names = Some(names);
        self
    }
}

impl DataGetter for OrganVolumeDataGetter {
    fn acquire(&self) -> Result<AnalysisData> {
        let mut wildtype = OrganVolumeTable::load(&self.wildtype)?;
        let mut mutant = OrganVolumeTable::load(&self.mutant)?;
        if wildtype.labels() != mutant.labels() {
            return Err(StatsError::volume(
                &self.mutant,
                "organ volume labels differ from the wild-type table",
            ));
        }

        let listed = mutant.ids().len();
        mutant.retain_specimens(|id| {
            !is_littermate(id) && (self.mutant_ids.is_empty() || self.mutant_ids.iter().any(|m| m == id))
        });
        if mutant.ids().len() < listed {
            info!(dropped = listed - mutant.ids().len(), "mutant rows excluded");
        }

        if let Some(names) = &self.label_names {
            let labels = wildtype.labels().len();
            wildtype.name_labels(names);
            mutant.name_labels(names);
            if wildtype.labels().len() < labels {
                warn!(dropped = labels - wildtype.labels().len(), "labels without a name dropped");
            }
            if wildtype.labels().is_empty() {
                return Err(StatsError::volume(&self.wildtype, "no organ volume label has a name"));
            }
        }

        let mask = Mask::all_true((1, 1, wildtype.labels().len()));
        Ok(AnalysisData {
            wildtype: wildtype.to_population("wildtype", &mask)?,
            mutant: mutant.to_population("mutant", &mask)?,
            mask,
            spacing: [1.0, 1.0, 1.0],
            labels: Some(wildtype.labels().to_vec()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nifti_io::write_volume;
    use ndarray::Array3;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_nifti_getter_flattens_with_mask() {
        let dir = TempDir::new().unwrap();
        let mask_path = dir.path().join("mask.nii.gz");
        let mut mask = Array3::<f32>::zeros((2, 2, 2));
        mask[[0, 0, 1]] = 1.0;
        mask[[1, 1, 0]] = 1.0;
        write_volume(&mask_path, &mask, [0.2, 0.2, 0.2]).unwrap();

        let mut paths = Vec::new();
        for i in 0..2 {
            let path = dir.path().join(format!("wt{}.nii.gz", i));
            let volume = Array3::from_shape_fn((2, 2, 2), |(x, y, z)| (x * 4 + y * 2 + z + i) as f32);
            write_volume(&path, &volume, [0.2, 0.2, 0.2]).unwrap();
            paths.push(path);
        }

        let getter = NiftiDataGetter::new(mask_path, paths.clone(), paths);
        let data = getter.acquire().unwrap();
        assert_eq!(data.mask.count(), 2);
        assert_eq!(data.spacing, [0.2, 0.2, 0.2]);
        assert_eq!(data.wildtype.ids(), vec!["wt0", "wt1"]);
        assert_eq!(data.wildtype.specimens()[1].data.as_slice(), &[2.0, 7.0]);
    }

    #[test]
    fn test_nifti_getter_missing_volume() {
        let dir = TempDir::new().unwrap();
        let mask_path = dir.path().join("mask.nii");
        write_volume(&mask_path, &Array3::from_elem((1, 1, 2), 1.0), [1.0; 3]).unwrap();

        let getter = NiftiDataGetter::new(mask_path, vec![dir.path().join("absent.nii")], vec![]);
        assert!(getter.acquire().is_err());
    }

    #[test]
    fn test_organ_volume_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wt.csv");
        fs::write(&path, ",1,2,3\nwt_a.nrrd,10,20,30\nwt_b,11,21,31\n").unwrap();

        let table = OrganVolumeTable::load(&path).unwrap();
        assert_eq!(table.labels(), &["1", "2", "3"]);
        assert_eq!(table.ids(), &["wt_a", "wt_b"]);

        let mask = Mask::all_true((1, 1, 3));
        let pop = table.to_population("wildtype", &mask).unwrap();
        assert!((pop.specimens()[0].data[0] - 10f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_organ_volume_rejects_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, ",1\nwt_a,lots\n").unwrap();
        assert!(OrganVolumeTable::load(&path).is_err());
    }

    #[test]
    fn test_organ_volume_getter_label_space() {
        let dir = TempDir::new().unwrap();
        let wt = dir.path().join("wt.csv");
        let mt = dir.path().join("mut.csv");
        fs::write(&wt, ",1,2\nwt_a,10,20\nwt_b,11,21\n").unwrap();
        fs::write(&mt, ",1,2\nmut_a,15,20\n").unwrap();

        let data = OrganVolumeDataGetter::new(wt, mt).acquire().unwrap();
        assert_eq!(data.mask.shape(), (1, 1, 2));
        assert_eq!(data.labels.unwrap(), vec!["1", "2"]);
        assert_eq!(data.mutant.len(), 1);
    }

    #[test]
    fn test_organ_volume_mutant_filters() {
        let dir = TempDir::new().unwrap();
        let wt = dir.path().join("wt.csv");
        let mt = dir.path().join("mut.csv");
        fs::write(&wt, ",1,2,9\nwt_a,10,20,5\nwt_b,11,21,5\n").unwrap();
        fs::write(
            &mt,
            ",1,2,9\nmut_a,15,20,5\nmut_b_WT,10,20,5\nmut_c,16,21,5\nmut_d,12,22,5\n",
        )
        .unwrap();

        let mut names = BTreeMap::new();
        names.insert(1, "heart".to_string());
        names.insert(2, "liver".to_string());
        let data = OrganVolumeDataGetter::new(wt, mt)
            .with_mutant_ids(vec!["mut_a".into(), "mut_b_WT".into(), "mut_c".into()])
            .with_label_names(LabelNames::new(names))
            .acquire()
            .unwrap();

        // littermate and unlisted rows are gone, label 9 has no name
        assert_eq!(data.mutant.ids(), vec!["mut_a", "mut_c"]);
        assert_eq!(data.labels.unwrap(), vec!["heart", "liver"]);
        assert_eq!(data.mask.shape(), (1, 1, 2));
        assert_eq!(data.wildtype.specimens()[0].data.len(), 2);
        assert!((data.mutant.specimens()[1].data[1] - 21f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_littermate_ids() {
        assert!(is_littermate("E14_WT_3"));
        assert!(is_littermate("wt_12"));
        assert!(!is_littermate("mut_12"));
    }

    #[test]
    fn test_all_labels_unnamed() {
        let dir = TempDir::new().unwrap();
        let wt = dir.path().join("wt.csv");
        let mt = dir.path().join("mut.csv");
        fs::write(&wt, ",7\nwt_a,10\n").unwrap();
        fs::write(&mt, ",7\nmut_a,15\n").unwrap();
        let err = OrganVolumeDataGetter::new(wt, mt)
            .with_label_names(LabelNames::default())
            .acquire()
            .unwrap_err();
        assert!(err.to_string().contains("no organ volume label has a name"));
    }
}
