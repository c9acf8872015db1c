//! CLI argument parsing for phenostat

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "phenostat")]
#[command(version)]
#[command(about = "Voxel-wise statistical phenotyping of mutant against wild-type volumes", long_about = None)]
pub struct Cli {
    /// Analysis configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,

    /// Write results here instead of the configured output_dir
    #[arg(short, long = "output-dir", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Run only the named analysis (repeatable)
    #[arg(long = "only", value_name = "NAME")]
    pub only: Vec<String>,

    /// Enable debug tracing output to stderr
    #[arg(long)]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_config() {
        assert!(Cli::try_parse_from(["phenostat"]).is_err());
    }

    #[test]
    fn test_cli_parses_config() {
        let cli = Cli::parse_from(["phenostat", "--config", "stats.toml"]);
        assert_eq!(cli.config, PathBuf::from("stats.toml"));
        assert!(cli.output_dir.is_none());
        assert!(cli.only.is_empty());
        assert!(!cli.debug);
    }

    #[test]
    fn test_cli_only_repeats() {
        let cli = Cli::parse_from([
            "phenostat", "-c", "stats.toml", "--only", "intensity", "--only", "jacobians",
        ]);
        assert_eq!(cli.only, vec!["intensity", "jacobians"]);
    }

    #[test]
    fn test_cli_output_dir_and_debug() {
        let cli = Cli::parse_from(["phenostat", "-c", "s.toml", "-o", "/tmp/out", "--debug"]);
        assert_eq!(cli.output_dir, Some(PathBuf::from("/tmp/out")));
        assert!(cli.debug);
    }
}
