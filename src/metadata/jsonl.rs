use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use parking_lot::Mutex;
use serde::Serialize;

use crate::engine::ExtractionDescriptor;
use crate::extract::ExtractedFile;
use crate::metadata::{MetadataError, MetadataSink, Provenance, RunSummary};

pub struct JsonlSink {
    provenance: Provenance,
    descriptors: Mutex<BufWriter<File>>,
    summary: Mutex<BufWriter<File>>,
}

#[derive(Serialize)]
struct DescriptorRecord<'a> {
    #[serde(flatten)]
    descriptor: &'a ExtractionDescriptor,
    extracted: Option<&'a ExtractedFile>,
    #[serde(flatten)]
    provenance: &'a Provenance,
}

#[derive(Serialize)]
struct SummaryRecord<'a> {
    #[serde(flatten)]
    summary: &'a RunSummary,
    tool_version: &'a str,
    config_hash: &'a str,
    evidence_path: &'a str,
}

impl JsonlSink {
    pub fn new(provenance: Provenance, run_output_dir: &Path) -> Result<Self, MetadataError> {
        let meta_dir = run_output_dir.join("metadata");
        std::fs::create_dir_all(&meta_dir)?;
        let descriptors = File::create(meta_dir.join("descriptors.jsonl"))?;
        let summary = File::create(meta_dir.join("run_summary.jsonl"))?;
        Ok(Self {
            provenance,
            descriptors: Mutex::new(BufWriter::new(descriptors)),
            summary: Mutex::new(BufWriter::new(summary)),
        })
    }
}

impl MetadataSink for JsonlSink {
    fn record_descriptor(
        &self,
        descriptor: &ExtractionDescriptor,
        extracted: Option<&ExtractedFile>,
    ) -> Result<(), MetadataError> {
        let record = DescriptorRecord {
            descriptor,
            extracted,
            provenance: &self.provenance,
        };
        let mut guard = self.descriptors.lock();
        serde_json::to_writer(&mut *guard, &record)?;
        guard.write_all(b"\n")?;
        Ok(())
    }

    fn record_run_summary(&self, summary: &RunSummary) -> Result<(), MetadataError> {
        let record = SummaryRecord {
            summary,
            tool_version: &self.provenance.tool_version,
            config_hash: &self.provenance.config_hash,
            evidence_path: &self.provenance.evidence_path,
        };
        let mut guard = self.summary.lock();
        serde_json::to_writer(&mut *guard, &record)?;
        guard.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&self) -> Result<(), MetadataError> {
        self.descriptors.lock().flush()?;
        self.summary.lock().flush()?;
        Ok(())
    }
}
