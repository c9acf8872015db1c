// Analysis configuration loaded from TOML
//
// Every tuning constant of the engine lives in EngineConfig and is passed
// explicitly to the components that need it. Relative paths in the file are
// resolved against the directory containing the file.

use crate::error::{Result, StatsError};
use crate::stats::{ExternalSolver, LinearModelSolver, OlsSolver, StatsMethod};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Numeric settings shared by every statistical run
///
/// # Example
/// ```
/// use phenostat::config::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert_eq!(config.significance_threshold, 0.05);
/// assert_eq!(config.lm_chunk_size, 200_000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// q-value above which a statistic is zeroed
    pub significance_threshold: f32,

    /// Statistics are clamped to +/- this magnitude
    pub tstat_limit: f32,

    /// z-scores with a smaller magnitude are zeroed in one-against-many maps
    pub zscore_cutoff: f32,

    /// Maximum voxels per linear-model solver call
    pub lm_chunk_size: usize,

    /// Number of voxel chunks the t-test is split into
    pub ttest_chunks: usize,

    /// Bins in the specimen-level p-value histogram
    pub histogram_bins: usize,

    /// Run specimen-level linear models
    pub specimen_level: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            significance_threshold: 0.05,
            tstat_limit: 50.0,
            zscore_cutoff: 3.0,
            lm_chunk_size: 200_000,
            ttest_chunks: 10,
            histogram_bins: 20,
            specimen_level: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.significance_threshold) {
            return Err(StatsError::config(format!(
                "significance_threshold must be in [0, 1], got {}",
                self.significance_threshold
            )));
        }
        if !(self.tstat_limit > 0.0) {
            return Err(StatsError::config(format!(
                "tstat_limit must be positive, got {}",
                self.tstat_limit
            )));
        }
        if !(self.zscore_cutoff >= 0.0) {
            return Err(StatsError::config(format!(
                "zscore_cutoff must be non-negative, got {}",
                self.zscore_cutoff
            )));
        }
        if self.lm_chunk_size == 0 || self.ttest_chunks == 0 || self.histogram_bins == 0 {
            return Err(StatsError::config(
                "lm_chunk_size, ttest_chunks and histogram_bins must be at least 1",
            ));
        }
        Ok(())
    }
}

fn default_reference_genotype() -> String {
    "wildtype".to_string()
}

/// Which linear-model solver to use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", deny_unknown_fields)]
pub enum SolverConfig {
    /// Run `program [args...] <data> <groups> <p-out> <t-out> <formula>` per chunk
    External {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Ordinary least squares in process
    InProcess {
        #[serde(default = "default_reference_genotype")]
        reference_genotype: String,
    },
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self::InProcess {
            reference_genotype: default_reference_genotype(),
        }
    }
}

impl SolverConfig {
    pub fn build(&self) -> Box<dyn LinearModelSolver> {
        match self {
            Self::External { program, args } => Box::new(ExternalSolver::new(program.clone(), args.clone())),
            Self::InProcess { reference_genotype } => Box::new(OlsSolver::new(reference_genotype.clone())),
        }
    }
}

/// Kind of phenotype data an analysis works on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisKind {
    Intensity,
    Jacobian,
    Deformation,
    OrganVolume,
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Intensity => "intensity",
            Self::Jacobian => "jacobian",
            Self::Deformation => "deformation",
            Self::OrganVolume => "organ-volume",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    pub name: String,
    pub kind: AnalysisKind,
    pub method: StatsMethod,

    /// Wild-type volumes (voxel analyses)
    #[serde(default)]
    pub wildtype: Vec<PathBuf>,

    /// Mutant volumes; for organ-volume analyses, when given, only these
    /// specimens are kept from the mutant table
    #[serde(default)]
    pub mutant: Vec<PathBuf>,

    /// Wild-type organ volume table (organ-volume analyses)
    #[serde(default)]
    pub wildtype_table: Option<PathBuf>,

    /// Mutant organ volume table (organ-volume analyses)
    #[serde(default)]
    pub mutant_table: Option<PathBuf>,
}

impl AnalysisConfig {
    fn validate(&self, has_mask: bool) -> Result<()> {
        let fail = |msg: &str| Err(StatsError::config(format!("analysis '{}': {}", self.name, msg)));

        if self.name.trim().is_empty() {
            return Err(StatsError::config("analysis name must not be empty"));
        }
        if self.kind == AnalysisKind::OrganVolume {
            if self.wildtype_table.is_none() || self.mutant_table.is_none() {
                return fail("organ-volume analyses need wildtype_table and mutant_table");
            }
            if self.method != StatsMethod::LinearModel {
                return fail("organ-volume analyses only support the linear-model method");
            }
        } else {
            if !has_mask {
                return fail("voxel analyses need a mask");
            }
            if self.wildtype.is_empty() || self.mutant.is_empty() {
                return fail("wildtype and mutant volume lists must not be empty");
            }
        }
        Ok(())
    }

    fn resolve(&mut self, base: &Path) {
        for path in self.wildtype.iter_mut().chain(self.mutant.iter_mut()) {
            *path = resolve(base, path);
        }
        for path in [&mut self.wildtype_table, &mut self.mutant_table].into_iter().flatten() {
            *path = resolve(base, path);
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("stats_output")
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Top-level configuration file
///
/// ```toml
/// project_name = "ko_line"
/// mask = "mask.nii.gz"
/// groups = "groups.csv"
/// formulas = ["data ~ genotype + crl"]
///
/// [engine]
/// specimen_level = false
///
/// [[analysis]]
/// name = "jacobians"
/// kind = "jacobian"
/// method = "linear-model"
/// wildtype = ["wt/a.nii.gz", "wt/b.nii.gz"]
/// mutant = ["mut/c.nii.gz"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatsConfig {
    pub project_name: String,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default)]
    pub mask: Option<PathBuf>,

    #[serde(default)]
    pub groups: Option<PathBuf>,

    /// Linear-model formulas; only the first is run
    #[serde(default)]
    pub formulas: Vec<String>,

    #[serde(default)]
    pub label_map: Option<PathBuf>,

    #[serde(default)]
    pub label_names: Option<PathBuf>,

    /// Per-label p-value thresholds for line-level organ volume calls
    #[serde(default)]
    pub line_calibrated_p_values: Option<PathBuf>,

    /// Per-label p-value thresholds for specimen-level organ volume calls
    #[serde(default)]
    pub specimen_calibrated_p_values: Option<PathBuf>,

    /// Write one-against-many z-maps for every mutant
    #[serde(default)]
    pub n1: bool,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub solver: SolverConfig,

    #[serde(default, rename = "analysis")]
    pub analyses: Vec<AnalysisConfig>,
}

impl StatsConfig {
    /// Load, resolve and validate a configuration file
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| StatsError::config(format!("cannot read {}: {}", path.display(), e)))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml_str(&content, base)
    }

    /// Parse configuration text, resolving relative paths against `base`
    pub fn from_toml_str(content: &str, base: &Path) -> Result<Self> {
        let mut config: StatsConfig =
            toml::from_str(content).map_err(|e| StatsError::config(e.to_string()))?;
        config.resolve(base);
        config.validate()?;
        Ok(config)
    }

    fn resolve(&mut self, base: &Path) {
        self.output_dir = resolve(base, &self.output_dir);
        for path in [
            &mut self.mask,
            &mut self.groups,
            &mut self.label_map,
            &mut self.label_names,
            &mut self.line_calibrated_p_values,
            &mut self.specimen_calibrated_p_values,
        ]
        .into_iter()
        .flatten()
        {
            *path = resolve(base, path);
        }
        if let SolverConfig::External { program, .. } = &mut self.solver {
            // Bare program names are looked up on PATH
            if program.components().count() > 1 {
                *program = resolve(base, program);
            }
        }
        for analysis in &mut self.analyses {
            analysis.resolve(base);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.project_name.trim().is_empty() {
            return Err(StatsError::config("project_name must not be empty"));
        }
        if self.analyses.is_empty() {
            return Err(StatsError::config("at least one [[analysis]] is required"));
        }
        self.engine.validate()?;

        let mut names = HashSet::new();
        for analysis in &self.analyses {
            analysis.validate(self.mask.is_some())?;
            if !names.insert(analysis.name.as_str()) {
                return Err(StatsError::config(format!("duplicate analysis name '{}'", analysis.name)));
            }
        }
        Ok(())
    }

    /// First configured formula, the only one that is run
    pub fn formula(&self) -> Option<&str> {
        self.formulas.first().map(String::as_str)
    }
}
