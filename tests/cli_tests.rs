//! Integration tests for the phenostat binary

use assert_cmd::Command;
use ndarray::Array3;
use phenostat::nifti_io::write_volume;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Volumes, groups and a config for one intensity analysis
fn write_project(root: &Path, method: &str, solver: &str) {
    write_volume(&root.join("mask.nii.gz"), &Array3::from_elem((2, 2, 2), 1.0), [1.0; 3]).unwrap();
    let mut groups = String::from("vol,genotype\n");
    for i in 0..3 {
        let wt = Array3::from_shape_fn((2, 2, 2), |(x, y, z)| (x + y + z) as f32 + i as f32 * 0.3);
        let mut mt = wt.clone();
        mt[[0, 1, 0]] += 25.0;
        write_volume(&root.join(format!("wt{}.nii.gz", i)), &wt, [1.0; 3]).unwrap();
        write_volume(&root.join(format!("mut{}.nii.gz", i)), &mt, [1.0; 3]).unwrap();
        groups.push_str(&format!("wt{},wildtype\n", i));
    }
    for i in 0..3 {
        groups.push_str(&format!("mut{},mutant\n", i));
    }
    fs::write(root.join("groups.csv"), groups).unwrap();

    let config = format!(
        r#"
project_name = "cli"
output_dir = "out"
mask = "mask.nii.gz"
groups = "groups.csv"
formulas = ["data ~ genotype"]
{solver}

[[analysis]]
name = "intensity"
kind = "intensity"
method = "{method}"
wildtype = ["wt0.nii.gz", "wt1.nii.gz", "wt2.nii.gz"]
mutant = ["mut0.nii.gz", "mut1.nii.gz", "mut2.nii.gz"]
"#
    );
    fs::write(root.join("stats.toml"), config).unwrap();
}

#[test]
fn test_help_lists_options() {
    Command::cargo_bin("phenostat")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--only"));
}

#[test]
fn test_missing_config_fails() {
    Command::cargo_bin("phenostat")
        .unwrap()
        .args(["--config", "/nonexistent/stats.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

#[test]
fn test_ttest_run_writes_outputs() {
    let dir = TempDir::new().unwrap();
    write_project(dir.path(), "ttest", "");

    Command::cargo_bin("phenostat")
        .unwrap()
        .arg("--config")
        .arg(dir.path().join("stats.toml"))
        .assert()
        .success()
        .stderr(predicate::str::contains("intensity: completed"));

    let out = dir.path().join("out");
    assert!(out.join("run_summary.json").exists());
    assert!(out
        .join("intensity/TTest/cli_intensity_data_genotype_TTest_FDR_0.05_stats_.nii.gz")
        .exists());
}

#[test]
fn test_output_dir_override() {
    let dir = TempDir::new().unwrap();
    write_project(dir.path(), "linear-model", "");
    let elsewhere = dir.path().join("elsewhere");

    Command::cargo_bin("phenostat")
        .unwrap()
        .arg("--config")
        .arg(dir.path().join("stats.toml"))
        .arg("--output-dir")
        .arg(&elsewhere)
        .assert()
        .success();

    let summary = fs::read_to_string(elsewhere.join("run_summary.json")).unwrap();
    assert!(summary.contains("\"status\": \"completed\""));
    assert!(elsewhere.join("intensity/specimen_level/LinearModel").is_dir());
}

#[test]
fn test_failed_solver_exits_non_zero() {
    let dir = TempDir::new().unwrap();
    write_project(
        dir.path(),
        "linear-model",
        "[solver]\nkind = \"external\"\nprogram = \"false\"",
    );

    Command::cargo_bin("phenostat")
        .unwrap()
        .arg("--config")
        .arg(dir.path().join("stats.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("FAILED"));
}

#[test]
fn test_unknown_only_name_fails() {
    let dir = TempDir::new().unwrap();
    write_project(dir.path(), "ttest", "");

    Command::cargo_bin("phenostat")
        .unwrap()
        .arg("--config")
        .arg(dir.path().join("stats.toml"))
        .args(["--only", "organs"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no analysis named 'organs'"));
}
