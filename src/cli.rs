use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataBackend {
    Jsonl,
    Csv,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanModeArg {
    /// Check every dissector at every offset
    Exhaustive,
    /// Check only offsets where a dissector magic occurs
    Indexed,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliOptions {
    /// Input file or raw image
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output directory for metadata and extracted artifacts
    #[arg(short, long, default_value = "./output")]
    pub output: PathBuf,

    /// Optional path to config file (YAML)
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Number of worker threads
    #[arg(long, default_value_t = num_cpus::get())]
    pub workers: usize,

    /// Read cache window, in KiB (overrides config when set)
    #[arg(long)]
    pub cache_kib: Option<u64>,

    /// Scan window, in MiB (overrides config when set)
    #[arg(long)]
    pub window_mib: Option<u64>,

    /// Candidate search mode (overrides config when set)
    #[arg(long, value_enum)]
    pub mode: Option<ScanModeArg>,

    /// Stop looking for candidates at this offset
    #[arg(long)]
    pub max_offset: Option<u64>,

    /// Metadata backend
    #[arg(long, value_enum, default_value_t = MetadataBackend::Jsonl)]
    pub metadata_backend: MetadataBackend,

    /// Limit carving to these dissectors (comma-separated list)
    #[arg(long, value_delimiter = ',')]
    pub types: Option<Vec<String>>,

    /// Write accepted artifacts to files under the output directory
    #[arg(long)]
    pub extract: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

pub fn parse() -> CliOptions {
    CliOptions::parse()
}

#[cfg(test)]
mod tests {
    use super::{CliOptions, MetadataBackend, ScanModeArg};
    use clap::Parser;

    #[test]
    fn parses_minimal_invocation() {
        let opts = CliOptions::try_parse_from(["binsift", "--input", "image.dd"]).expect("parse");
        assert_eq!(opts.metadata_backend, MetadataBackend::Jsonl);
        assert!(opts.mode.is_none());
        assert!(!opts.extract);
        assert!(opts.workers >= 1);
    }

    #[test]
    fn parses_mode_and_limits() {
        let opts = CliOptions::try_parse_from([
            "binsift",
            "--input",
            "image.dd",
            "--mode",
            "exhaustive",
            "--max-offset",
            "4096",
            "--cache-kib",
            "64",
            "--extract",
        ])
        .expect("parse");
        assert_eq!(opts.mode, Some(ScanModeArg::Exhaustive));
        assert_eq!(opts.max_offset, Some(4096));
        assert_eq!(opts.cache_kib, Some(64));
        assert!(opts.extract);
    }

    #[test]
    fn parses_types_list() {
        let opts = CliOptions::try_parse_from(["binsift", "--input", "image.dd", "--types", "pdf,png"])
            .expect("parse");
        let types = opts.types.expect("types");
        assert_eq!(types, vec!["pdf", "png"]);
    }
}
