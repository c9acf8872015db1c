//! Batch orchestration of phenotype analyses
//!
//! Every configured analysis moves through [`AnalysisStage`] strictly in
//! order: data acquisition, the line-level test, specimen-level results and
//! result writing. A failure ends that analysis only. Data acquisition
//! failures and tests that cannot run (no readable groups file, no formula) are
//! reported as skipped; every other error marks the analysis as failed. The
//! batch always carries on with the next analysis.
//!
//! Only the first configured formula is run.

use crate::annotation::{Annotator, LabelNames, LabelSummaryAnnotator};
use crate::assemble::{LineSummary, ResultAssembler};
use crate::calibration::CalibratedThresholds;
use crate::config::{AnalysisConfig, AnalysisKind, StatsConfig};
use crate::data_getter::{AnalysisData, DataGetter, NiftiDataGetter, OrganVolumeDataGetter};
use crate::error::{Result, StatsError};
use crate::groups::{specimen_id, GroupsTable};
use crate::masked::rebuild;
use crate::nifti_io::{read_volume, write_volume};
use crate::stats::{
    AngularZScoreTest, CircularStatsTest, LinearModelTest, OneAgainstManyZScoreTest,
    StatisticalResult, StatisticalTest, StatsMethod, TestVariant, TwoSampleTTest, ZScoreTest,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Name of the batch report written to the output directory
pub const RUN_SUMMARY_FILE: &str = "run_summary.json";

/// Progress of a single analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisStage {
    Initialized,
    DataAcquired,
    LineLevelComplete,
    SpecimenLevelComplete,
    ResultsWritten,
}

impl AnalysisStage {
    /// The only stage reachable from this one
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Initialized => Some(Self::DataAcquired),
            Self::DataAcquired => Some(Self::LineLevelComplete),
            Self::LineLevelComplete => Some(Self::SpecimenLevelComplete),
            Self::SpecimenLevelComplete => Some(Self::ResultsWritten),
            Self::ResultsWritten => None,
        }
    }
}

impl fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialized => "initialized",
            Self::DataAcquired => "data-acquired",
            Self::LineLevelComplete => "line-level-complete",
            Self::SpecimenLevelComplete => "specimen-level-complete",
            Self::ResultsWritten => "results-written",
        };
        f.write_str(name)
    }
}

/// Current stage of one analysis
#[derive(Debug)]
struct StageTracker<'a> {
    analysis: &'a str,
    stage: AnalysisStage,
}

impl<'a> StageTracker<'a> {
    fn new(analysis: &'a str) -> Self {
        Self {
            analysis,
            stage: AnalysisStage::Initialized,
        }
    }

    fn advance(&mut self) {
        if let Some(next) = self.stage.next() {
            self.stage = next;
            info!(analysis = self.analysis, stage = %next, "stage reached");
        }
    }
}

/// How one analysis ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum AnalysisOutcome {
    Completed {
        analysis: String,
        test: String,
        outputs: Vec<PathBuf>,
    },
    Skipped {
        analysis: String,
        stage: AnalysisStage,
        reason: String,
    },
    Failed {
        analysis: String,
        stage: AnalysisStage,
        error: String,
    },
}

impl AnalysisOutcome {
    pub fn analysis(&self) -> &str {
        match self {
            Self::Completed { analysis, .. }
            | Self::Skipped { analysis, .. }
            | Self::Failed { analysis, .. } => analysis,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for AnalysisOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed {
                analysis,
                test,
                outputs,
            } => write!(f, "{}: completed ({}, {} files)", analysis, test, outputs.len()),
            Self::Skipped {
                analysis,
                stage,
                reason,
            } => write!(f, "{}: skipped at {}: {}", analysis, stage, reason),
            Self::Failed {
                analysis,
                stage,
                error,
            } => write!(f, "{}: FAILED at {}: {}", analysis, stage, error),
        }
    }
}

/// Outcomes of every analysis in a batch, in configuration order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub project_name: String,
    pub output_dir: PathBuf,
    pub outcomes: Vec<AnalysisOutcome>,
}

impl BatchReport {
    pub fn new(project_name: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_name: project_name.into(),
            output_dir: output_dir.into(),
            outcomes: Vec::new(),
        }
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(AnalysisOutcome::is_failure)
    }

    pub fn completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, AnalysisOutcome::Completed { .. }))
            .count()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

/// One row of an organ-volume results table
///
/// The calibration columns are only present when per-label thresholds are
/// configured.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrganCall {
    pub label: String,
    pub pvalue: f32,
    pub qvalue: f32,
    pub tstatistic: f32,
    pub significant: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p_thresh: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fdr: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibrated_significant: Option<bool>,
}

/// Organ-volume call for a single specimen
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecimenOrganCall {
    pub label: String,
    pub pvalue: f32,
    pub qvalue: f32,
    pub tstatistic: f32,
    /// Specimen log volume over the wild-type mean log volume
    pub mean_diff: f64,
    pub significant: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p_thresh: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fdr: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibrated_significant: Option<bool>,
}

/// Rows for every label, sorted by q-value
pub fn organ_calls(labels: &[String], t: &[f32], p: &[f32], q: &[f32], threshold: f32) -> Vec<OrganCall> {
    let mut calls: Vec<OrganCall> = labels
        .iter()
        .enumerate()
        .map(|(i, label)| OrganCall {
            label: label.clone(),
            pvalue: p[i],
            qvalue: q[i],
            tstatistic: t[i],
            significant: q[i] <= threshold,
            p_thresh: None,
            fdr: None,
            calibrated_significant: None,
        })
        .collect();
    calls.sort_by(|a, b| a.qvalue.total_cmp(&b.qvalue));
    calls
}

/// Join calls to their per-label thresholds; labels without one are dropped
pub fn calibrate(calls: Vec<OrganCall>, thresholds: &CalibratedThresholds) -> Vec<OrganCall> {
    calls
        .into_iter()
        .filter_map(|call| {
            let calibration = thresholds.get(&call.label)?;
            Some(OrganCall {
                p_thresh: Some(calibration.p_thresh),
                fdr: calibration.fdr,
                calibrated_significant: Some(calibration.is_significant(call.pvalue)),
                ..call
            })
        })
        .collect()
}

/// Formula reduced to a file-name-safe tag: `data ~ genotype + crl` becomes
/// `data_genotype_crl`
fn formula_tag(formula: Option<&str>) -> String {
    let tag = formula
        .unwrap_or("genotype")
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if tag.is_empty() {
        "genotype".to_string()
    } else {
        tag
    }
}

/// `0.05` becomes `5`
fn percent_tag(threshold: f32) -> String {
    format!("{}", (threshold * 100.0 * 1000.0).round() / 1000.0)
}

fn write_histogram(path: &Path, histogram: &[u32]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["bin_start", "bin_end", "count"])?;
    let width = 1.0 / histogram.len().max(1) as f64;
    for (i, count) in histogram.iter().enumerate() {
        writer.write_record(&[
            format!("{}", i as f64 * width),
            format!("{}", (i + 1) as f64 * width),
            count.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Runs configured analyses and writes their results
pub struct PhenotypeAnalysisOrchestrator {
    config: StatsConfig,
}

impl PhenotypeAnalysisOrchestrator {
    pub fn new(config: StatsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    /// Run every analysis (or only those named in `only`) and write
    /// `run_summary.json`
    pub fn run(&self, only: &[String]) -> Result<BatchReport> {
        if let Some(unknown) = only
            .iter()
            .find(|name| !self.config.analyses.iter().any(|a| &a.name == *name))
        {
            return Err(StatsError::config(format!("no analysis named '{}'", unknown)));
        }
        if self.config.formulas.len() > 1 {
            warn!(
                formula = self.config.formula().unwrap_or_default(),
                ignored = self.config.formulas.len() - 1,
                "only the first formula is run"
            );
        }

        fs::create_dir_all(&self.config.output_dir)?;
        let mut report = BatchReport::new(&self.config.project_name, &self.config.output_dir);
        for analysis in self
            .config
            .analyses
            .iter()
            .filter(|a| only.is_empty() || only.contains(&a.name))
        {
            report.outcomes.push(self.run_analysis(analysis));
        }

        report.write(&self.config.output_dir.join(RUN_SUMMARY_FILE))?;
        info!(
            completed = report.completed(),
            total = report.outcomes.len(),
            "batch finished"
        );
        Ok(report)
    }

    pub fn run_analysis(&self, analysis: &AnalysisConfig) -> AnalysisOutcome {
        info!(
            analysis = %analysis.name,
            kind = %analysis.kind,
            method = %analysis.method,
            "starting analysis"
        );
        let mut tracker = StageTracker::new(&analysis.name);

        match self.execute(analysis, &mut tracker) {
            Ok((test, outputs)) => AnalysisOutcome::Completed {
                analysis: analysis.name.clone(),
                test,
                outputs,
            },
            Err(e) if e.is_skippable() || matches!(e, StatsError::DataAcquisition { .. }) => {
                warn!(analysis = %analysis.name, stage = %tracker.stage, error = %e, "analysis skipped");
                AnalysisOutcome::Skipped {
                    analysis: analysis.name.clone(),
                    stage: tracker.stage,
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                error!(analysis = %analysis.name, stage = %tracker.stage, error = %e, "analysis failed");
                AnalysisOutcome::Failed {
                    analysis: analysis.name.clone(),
                    stage: tracker.stage,
                    error: e.to_string(),
                }
            }
        }
    }

    fn execute(&self, analysis: &AnalysisConfig, tracker: &mut StageTracker<'_>) -> Result<(String, Vec<PathBuf>)> {
        let data = self
            .data_getter(analysis)
            .and_then(|getter| getter.acquire())
            .map_err(|e| StatsError::DataAcquisition {
                analysis: analysis.name.clone(),
                message: e.to_string(),
            })?;
        tracker.advance();

        let test = self.build_test(analysis)?;
        let result = test.run(&data.wildtype, &data.mutant)?;
        LineSummary::new(&result).log(&analysis.name);
        tracker.advance();

        let mut outputs = Vec::new();
        if analysis.kind == AnalysisKind::OrganVolume {
            outputs.extend(self.write_organ_volumes(analysis, &data, &result)?);
            tracker.advance();
        } else {
            outputs.extend(self.write_line_level(analysis, &data, &result, test.name())?);
            outputs.extend(self.write_specimen_level(analysis, &data, &result, test.name())?);
            tracker.advance();
            if self.config.n1 {
                outputs.extend(self.write_zmaps(analysis, &data)?);
            }
        }
        tracker.advance();

        Ok((test.name().to_string(), outputs))
    }

    fn data_getter(&self, analysis: &AnalysisConfig) -> Result<Box<dyn DataGetter>> {
        if analysis.kind == AnalysisKind::OrganVolume {
            let (Some(wildtype), Some(mutant)) = (&analysis.wildtype_table, &analysis.mutant_table) else {
                return Err(StatsError::config(format!(
                    "analysis '{}' has no organ volume tables",
                    analysis.name
                )));
            };
            let mut getter = OrganVolumeDataGetter::new(wildtype.clone(), mutant.clone()).with_mutant_ids(
                analysis
                    .mutant
                    .iter()
                    .map(|path| specimen_id(&path.to_string_lossy()).to_string())
                    .collect(),
            );
            if let Some(path) = &self.config.label_names {
                getter = getter.with_label_names(LabelNames::load(path)?);
            }
            return Ok(Box::new(getter));
        }

        let mask = self
            .config
            .mask
            .clone()
            .ok_or_else(|| StatsError::config(format!("analysis '{}' needs a mask", analysis.name)))?;
        Ok(Box::new(NiftiDataGetter::new(
            mask,
            analysis.wildtype.clone(),
            analysis.mutant.clone(),
        )))
    }

    fn build_test(&self, analysis: &AnalysisConfig) -> Result<TestVariant> {
        let engine = &self.config.engine;
        Ok(match analysis.method {
            StatsMethod::TTest => TestVariant::TTest(TwoSampleTTest::from_config(engine)),
            StatsMethod::Circular => TestVariant::Circular(CircularStatsTest),
            StatsMethod::LinearModel => {
                let mut test = LinearModelTest::new(self.config.solver.build(), engine);
                if let Some(path) = &self.config.groups {
                    test = test.with_groups(load_groups(path)?);
                }
                if let Some(formula) = self.config.formula() {
                    test = test.with_formula(formula);
                }
                TestVariant::LinearModel(test)
            }
        })
    }

    fn assembler(&self) -> ResultAssembler {
        ResultAssembler::new(self.config.engine.significance_threshold, self.config.engine.tstat_limit)
    }

    fn analysis_dir(&self, analysis: &AnalysisConfig) -> PathBuf {
        self.config.output_dir.join(&analysis.name)
    }

    fn write_line_level(
        &self,
        analysis: &AnalysisConfig,
        data: &AnalysisData,
        result: &StatisticalResult,
        test: &str,
    ) -> Result<Vec<PathBuf>> {
        let dir = self.analysis_dir(analysis).join(test);
        fs::create_dir_all(&dir)?;

        let volume = self.assembler().assemble(result, &data.mask)?;
        let stats_path = dir.join(format!(
            "{}_{}_{}_{}_FDR_{}_stats_.nii.gz",
            self.config.project_name,
            analysis.name,
            formula_tag(self.config.formula()),
            test,
            self.config.engine.significance_threshold
        ));
        write_volume(&stats_path, &volume, data.spacing)?;
        info!(path = %stats_path.display(), "wrote line-level statistics");

        let qvals_path = dir.join(format!("Qvals-{}.csv", analysis.kind));
        self.assembler().threshold_table(result)?.write(&qvals_path)?;

        let mut outputs = vec![stats_path, qvals_path];
        outputs.extend(self.annotate(&volume, &dir));
        Ok(outputs)
    }

    /// Label summary of the filtered volume, when a label map is configured
    ///
    /// Annotation failures are logged and never fail the analysis.
    fn annotate(&self, volume: &ndarray::Array3<f32>, dir: &Path) -> Option<PathBuf> {
        let (label_map, label_names) = (self.config.label_map.as_ref()?, self.config.label_names.as_ref()?);
        let output = dir.join("annotation.csv");

        let annotated = read_volume(label_map).and_then(|labels| {
            let names = LabelNames::load(label_names)?;
            LabelSummaryAnnotator::new(labels.data, names).annotate(volume, &output)
        });
        match annotated {
            Ok(()) => Some(output),
            Err(e) => {
                warn!(error = %e, "annotation failed");
                None
            }
        }
    }

    fn write_specimen_level(
        &self,
        analysis: &AnalysisConfig,
        data: &AnalysisData,
        result: &StatisticalResult,
        test: &str,
    ) -> Result<Vec<PathBuf>> {
        if result.specimens().is_empty() {
            return Ok(Vec::new());
        }
        let dir = self.analysis_dir(analysis).join("specimen_level").join(test);
        fs::create_dir_all(&dir)?;

        let assembler = self.assembler();
        let mut outputs = Vec::new();
        for (id, specimen) in result.specimens() {
            let volume = assembler.assemble_specimen(specimen, &data.mask)?;
            let path = dir.join(format!(
                "{}_{}_{}_FDR_{}_stats_.nii.gz",
                id, analysis.name, test, self.config.engine.significance_threshold
            ));
            write_volume(&path, &volume, data.spacing)?;

            let histogram = dir.join(format!("{}_pvalue_histogram.csv", id));
            write_histogram(&histogram, &specimen.histogram)?;
            outputs.push(path);
            outputs.push(histogram);
        }
        info!(specimens = result.specimens().len(), dir = %dir.display(), "wrote specimen-level statistics");
        Ok(outputs)
    }

    fn write_zmaps(&self, analysis: &AnalysisConfig, data: &AnalysisData) -> Result<Vec<PathBuf>> {
        let dir = self.analysis_dir(analysis).join("n1");
        fs::create_dir_all(&dir)?;

        let engine = &self.config.engine;
        let test: Box<dyn ZScoreTest> = if analysis.method.is_angular() {
            Box::new(AngularZScoreTest::from_config(engine))
        } else {
            Box::new(OneAgainstManyZScoreTest::from_config(engine))
        };

        let mut outputs = Vec::new();
        for specimen in data.mutant.specimens() {
            let zmap = test.process(&data.wildtype, &specimen.data)?;
            let volume = rebuild(&zmap, &data.mask, 0.0)?;
            let path = dir.join(format!("{}_zscore.nii.gz", specimen.id));
            write_volume(&path, &volume, data.spacing)?;
            outputs.push(path);
        }
        Ok(outputs)
    }

    fn write_organ_volumes(
        &self,
        analysis: &AnalysisConfig,
        data: &AnalysisData,
        result: &StatisticalResult,
    ) -> Result<Vec<PathBuf>> {
        let labels = data.labels.clone().unwrap_or_default();
        let threshold = self.config.engine.significance_threshold;
        let percent = percent_tag(threshold);
        let dir = self.analysis_dir(analysis);
        fs::create_dir_all(&dir)?;

        let line_thresholds = self
            .config
            .line_calibrated_p_values
            .as_deref()
            .map(CalibratedThresholds::load)
            .transpose()?;
        let specimen_thresholds = self
            .config
            .specimen_calibrated_p_values
            .as_deref()
            .map(CalibratedThresholds::load)
            .transpose()?;

        let line_path = dir.join(format!("organ_volumes_LinearModel_FDR{}%.csv", percent));
        let mut calls = organ_calls(
            &labels,
            result.tstats().as_slice(),
            result.pvalues().as_slice(),
            result.qvalues().as_slice(),
            threshold,
        );
        if let Some(thresholds) = &line_thresholds {
            calls = calibrate(calls, thresholds);
        }
        write_rows(&line_path, &calls)?;
        let mut outputs = vec![line_path];

        if result.specimens().is_empty() {
            return Ok(outputs);
        }

        let mut column = Vec::with_capacity(data.wildtype.len());
        let wildtype_means: Vec<f64> = (0..labels.len())
            .map(|label| {
                data.wildtype.column_into(label, &mut column);
                column.iter().sum::<f64>() / column.len().max(1) as f64
            })
            .collect();
        let table = analysis.mutant_table.clone().unwrap_or_default();

        let calls_dir = dir.join("specimen_calls");
        fs::create_dir_all(&calls_dir)?;
        for specimen in data.mutant.specimens() {
            let Some(specimen_result) = result.specimens().get(&specimen.id) else {
                continue;
            };
            let mut calls = organ_calls(
                &labels,
                specimen_result.tstats.as_slice(),
                specimen_result.pvalues.as_slice(),
                specimen_result.qvalues.as_slice(),
                threshold,
            );
            if let Some(thresholds) = &specimen_thresholds {
                calls = calibrate(calls, thresholds);
            }
            let rows = calls
                .into_iter()
                .map(|call| {
                    let index = labels.iter().position(|l| *l == call.label).ok_or_else(|| {
                        StatsError::volume(&table, format!("no volume column for label '{}'", call.label))
                    })?;
                    Ok(SpecimenOrganCall {
                        mean_diff: f64::from(specimen.data[index]) / wildtype_means[index],
                        label: call.label,
                        pvalue: call.pvalue,
                        qvalue: call.qvalue,
                        tstatistic: call.tstatistic,
                        significant: call.significant,
                        p_thresh: call.p_thresh,
                        fdr: call.fdr,
                        calibrated_significant: call.calibrated_significant,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let path = calls_dir.join(format!("{}_organ_volumes_LM_FDR{}%.csv", specimen.id, percent));
            write_rows(&path, &rows)?;
            outputs.push(path);
        }
        Ok(outputs)
    }
}

/// Load the groups file; a missing or unreadable file only skips the test
fn load_groups(path: &Path) -> Result<GroupsTable> {
    GroupsTable::load(path).map_err(|e| match e {
        StatsError::Io(io) => StatsError::GroupsUnavailable {
            path: path.to_path_buf(),
            message: io.to_string(),
        },
        StatsError::Csv(csv) if csv.is_io_error() => StatsError::GroupsUnavailable {
            path: path.to_path_buf(),
            message: csv.to_string(),
        },
        other => other,
    })
}
