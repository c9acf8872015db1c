// Linear-model solver port
//
// A solver fits one chunk of voxels: rows are specimens (aligned with the
// groups table), columns are voxels. It answers with one p-value and one
// complement statistic per voxel; the caller inverts the statistic to get t.
//
// ExternalSolver runs a numerical-fitting program once per chunk, exchanging
// data through files in a private temporary directory. OlsSolver fits the
// same model in process by ordinary least squares.

use super::linear_model::write_chunk;
use super::welch::student_t_two_sided;
use crate::error::{Result, StatsError};
use crate::groups::GroupsTable;
use faer::linalg::matmul::matmul;
use faer::linalg::solvers::{Llt, Solve};
use faer::{Accum, Mat, Par, Side};
use ndarray::Array2;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// One chunk to fit
pub struct SolverRequest<'a> {
    /// Specimens x voxels
    pub chunk: &'a Array2<f64>,
    /// Groups rows in the same order as the chunk rows
    pub groups: &'a GroupsTable,
    pub formula: &'a str,
}

/// Per-voxel results for one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct SolverResponse {
    pub pvalues: Vec<f64>,
    /// Reciprocal of the genotype t-statistic
    pub complement: Vec<f64>,
}

impl SolverResponse {
    fn check_len(self, expected: usize) -> Result<Self> {
        if self.pvalues.len() != expected || self.complement.len() != expected {
            return Err(StatsError::solver(format!(
                "expected {} values, got {} p-values and {} t-values",
                expected,
                self.pvalues.len(),
                self.complement.len()
            )));
        }
        Ok(self)
    }
}

pub trait LinearModelSolver {
    fn solve(&self, request: &SolverRequest<'_>) -> Result<SolverResponse>;
}

/// Solver that runs an external program per chunk
///
/// The program is called as `program [args...] <data> <groups> <p-out> <t-out> <formula>`.
#[derive(Debug, Clone)]
pub struct ExternalSolver {
    program: PathBuf,
    args: Vec<String>,
}

impl ExternalSolver {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// Read a file of raw little-endian f64 values
fn read_f64_file(path: &Path) -> Result<Vec<f64>> {
    let mut bytes = Vec::new();
    File::open(path)
        .map_err(|e| StatsError::solver(format!("cannot open {}: {}", path.display(), e)))?
        .read_to_end(&mut bytes)?;
    if bytes.len() % 8 != 0 {
        return Err(StatsError::solver(format!(
            "{} is not a whole number of f64 values ({} bytes)",
            path.display(),
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .collect())
}

impl LinearModelSolver for ExternalSolver {
    fn solve(&self, request: &SolverRequest<'_>) -> Result<SolverResponse> {
        // Removed on drop, whichever way this function returns
        let workdir = tempfile::Builder::new().prefix("phenostat-lm-").tempdir()?;
        let data_path = workdir.path().join("pixels.dat");
        let groups_path = workdir.path().join("groups.csv");
        let pvals_path = workdir.path().join("pvals.dat");
        let tvals_path = workdir.path().join("tvals.dat");

        {
            let mut writer = BufWriter::new(File::create(&data_path)?);
            write_chunk(request.chunk, &mut writer)?;
            writer.flush()?;
        }
        request.groups.write(&groups_path)?;

        debug!(
            program = %self.program.display(),
            voxels = request.chunk.ncols(),
            "running linear model"
        );
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&data_path)
            .arg(&groups_path)
            .arg(&pvals_path)
            .arg(&tvals_path)
            .arg(request.formula)
            .output()
            .map_err(|e| StatsError::solver(format!("cannot run {}: {}", self.program.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, "linear model failed: {}", stderr.trim());
            return Err(StatsError::solver(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        SolverResponse {
            pvalues: read_f64_file(&pvals_path)?,
            complement: read_f64_file(&tvals_path)?,
        }
        .check_len(request.chunk.ncols())
    }
}

/// In-process ordinary least squares fit
///
/// The design has an intercept, a genotype indicator (1 for every row whose
/// `genotype` differs from the reference genotype) and one numeric column per
/// additional formula term. The reported statistic is the t of the genotype
/// coefficient.
#[derive(Debug, Clone)]
pub struct OlsSolver {
    reference_genotype: String,
}

impl Default for OlsSolver {
    fn default() -> Self {
        Self::new("wildtype")
    }
}

impl OlsSolver {
    pub fn new(reference_genotype: impl Into<String>) -> Self {
        Self {
            reference_genotype: reference_genotype.into(),
        }
    }

    /// Design matrix for the formula terms, one row per groups row
    fn design(&self, groups: &GroupsTable, formula: &str) -> Result<Mat<f64>> {
        let genotype = groups
            .column("genotype")
            .ok_or_else(|| StatsError::groups("no 'genotype' column"))?;

        let rhs = formula.split_once('~').map(|(_, r)| r).unwrap_or(formula);
        let covariates = rhs
            .split('+')
            .map(str::trim)
            .filter(|term| !term.is_empty() && *term != "genotype" && *term != "1")
            .map(|term| groups.numeric_column(term))
            .collect::<Result<Vec<_>>>()?;

        Ok(Mat::from_fn(genotype.len(), covariates.len() + 2, |row, col| match col {
            0 => 1.0,
            1 => f64::from(u8::from(genotype[row] != self.reference_genotype)),
            _ => covariates[col - 2][row],
        }))
    }
}

impl LinearModelSolver for OlsSolver {
    fn solve(&self, request: &SolverRequest<'_>) -> Result<SolverResponse> {
        let chunk = request.chunk;
        let (n, voxels) = chunk.dim();
        if request.groups.len() != n {
            return Err(StatsError::LengthMismatch {
                expected: n,
                actual: request.groups.len(),
            });
        }

        let x = self.design(request.groups, request.formula)?;
        let k = x.ncols();
        let xt = x.as_ref().transpose();

        let mut xtx = Mat::<f64>::zeros(k, k);
        matmul(xtx.as_mut(), Accum::Replace, xt, x.as_ref(), 1.0, Par::Seq);
        let factor = Llt::new(xtx.as_ref(), Side::Lower)
            .map_err(|_| StatsError::solver("design matrix is singular"))?;

        // Only the genotype diagonal of (X^T X)^-1 is needed
        let unit = Mat::from_fn(k, 1, |row, _| if row == 1 { 1.0 } else { 0.0 });
        let genotype_variance = factor.solve(unit.as_ref())[(1, 0)];
        let dof = n as f64 - k as f64;

        // One column at a time, so a voxel's fit never depends on the chunk width
        let mut xty = Mat::<f64>::zeros(k, 1);
        let mut fitted = Mat::<f64>::zeros(n, 1);
        let mut pvalues = Vec::with_capacity(voxels);
        let mut complement = Vec::with_capacity(voxels);
        for voxel in 0..voxels {
            let y = Mat::from_fn(n, 1, |row, _| chunk[[row, voxel]]);
            matmul(xty.as_mut(), Accum::Replace, xt, y.as_ref(), 1.0, Par::Seq);
            let beta = factor.solve(xty.as_ref());
            matmul(fitted.as_mut(), Accum::Replace, x.as_ref(), beta.as_ref(), 1.0, Par::Seq);

            let rss: f64 = (0..n).map(|row| (y[(row, 0)] - fitted[(row, 0)]).powi(2)).sum();
            let se = (rss / dof * genotype_variance).sqrt();
            let t = beta[(1, 0)] / se;
            pvalues.push(student_t_two_sided(t, dof));
            complement.push(1.0 / t);
        }

        Ok(SolverResponse { pvalues, complement })
    }
}
