pub mod csv;
pub mod jsonl;

use std::path::Path;

use thiserror::Error;

use crate::engine::{ExtractionDescriptor, ScanStats};
use crate::extract::ExtractedFile;

#[derive(Debug, Clone, serde::Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub source_len: u64,
    pub format_handler: String,
    pub cancelled: bool,
    pub descriptors: u64,
    #[serde(flatten)]
    pub stats: ScanStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataBackendKind {
    Jsonl,
    Csv,
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] ::csv::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Run provenance stamped on every record.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Provenance {
    pub run_id: String,
    pub tool_version: String,
    pub config_hash: String,
    pub evidence_path: String,
}

/// Output sink for extraction descriptors and the run summary.
pub trait MetadataSink: Send + Sync {
    fn record_descriptor(
        &self,
        descriptor: &ExtractionDescriptor,
        extracted: Option<&ExtractedFile>,
    ) -> Result<(), MetadataError>;
    fn record_run_summary(&self, summary: &RunSummary) -> Result<(), MetadataError>;
    fn flush(&self) -> Result<(), MetadataError>;
}

pub fn build_sink(
    backend: MetadataBackendKind,
    run_id: &str,
    tool_version: &str,
    config_hash: &str,
    evidence_path: &Path,
    run_output_dir: &Path,
) -> Result<Box<dyn MetadataSink>, MetadataError> {
    let provenance = Provenance {
        run_id: run_id.to_string(),
        tool_version: tool_version.to_string(),
        config_hash: config_hash.to_string(),
        evidence_path: evidence_path.to_string_lossy().to_string(),
    };
    match backend {
        MetadataBackendKind::Jsonl => Ok(Box::new(jsonl::JsonlSink::new(provenance, run_output_dir)?)),
        MetadataBackendKind::Csv => Ok(Box::new(csv::CsvSink::new(provenance, run_output_dir)?)),
    }
}
