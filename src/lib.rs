//! Phenostat - voxel-wise statistical testing of mutant against wild-type
//! image volumes
//!
//! Volumes are flattened with an anatomical mask into masked vectors, tested
//! voxel by voxel (t-test, chunked linear model or circular statistics),
//! corrected for multiple testing with Benjamini-Hochberg and rebuilt into
//! filtered statistic volumes.

pub mod annotation;
pub mod assemble;
pub mod calibration;
pub mod cli;
pub mod config;
pub mod data_getter;
pub mod error;
pub mod fdr;
pub mod groups;
pub mod masked;
pub mod nifti_io;
pub mod orchestrator;
pub mod stats;

pub use error::{Result, StatsError};
