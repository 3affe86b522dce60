use std::fs::File;
use std::path::Path;

use parking_lot::Mutex;
use serde::Serialize;

use crate::engine::ExtractionDescriptor;
use crate::extract::ExtractedFile;
use crate::metadata::{MetadataError, MetadataSink, Provenance, RunSummary};

pub struct CsvSink {
    provenance: Provenance,
    descriptors_writer: Mutex<csv::Writer<File>>,
    run_writer: Mutex<csv::Writer<File>>,
}

#[derive(Serialize)]
struct DescriptorCsv<'a> {
    run_id: &'a str,
    dissector: &'a str,
    category: &'a str,
    subcategory: &'a str,
    regions: String,
    region_count: usize,
    total_size: u64,
    suggested_name: &'a str,
    grouped: bool,
    path: Option<&'a str>,
    md5: Option<&'a str>,
    sha256: Option<&'a str>,
    tool_version: &'a str,
    config_hash: &'a str,
    evidence_path: &'a str,
}

#[derive(Serialize)]
struct RunSummaryCsv<'a> {
    run_id: &'a str,
    source_len: u64,
    format_handler: &'a str,
    cancelled: bool,
    bytes_scanned: u64,
    windows: u64,
    candidates_checked: u64,
    findings: u64,
    declined: u64,
    accepted: u64,
    descriptors: u64,
    tool_version: &'a str,
    config_hash: &'a str,
    evidence_path: &'a str,
}

fn format_regions(descriptor: &ExtractionDescriptor) -> String {
    descriptor
        .source_regions
        .iter()
        .map(|r| format!("{}-{}", r.start, r.end))
        .collect::<Vec<_>>()
        .join(";")
}

impl CsvSink {
    pub fn new(provenance: Provenance, run_output_dir: &Path) -> Result<Self, MetadataError> {
        let meta_dir = run_output_dir.join("metadata");
        std::fs::create_dir_all(&meta_dir)?;

        let descriptors_file = File::create(meta_dir.join("descriptors.csv"))?;
        let run_file = File::create(meta_dir.join("run_summary.csv"))?;

        let mut descriptors_writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(descriptors_file);
        let mut run_writer = csv::WriterBuilder::new().has_headers(false).from_writer(run_file);

        descriptors_writer.write_record([
            "run_id",
            "dissector",
            "category",
            "subcategory",
            "regions",
            "region_count",
            "total_size",
            "suggested_name",
            "grouped",
            "path",
            "md5",
            "sha256",
            "tool_version",
            "config_hash",
            "evidence_path",
        ])?;

        run_writer.write_record([
            "run_id",
            "source_len",
            "format_handler",
            "cancelled",
            "bytes_scanned",
            "windows",
            "candidates_checked",
            "findings",
            "declined",
            "accepted",
            "descriptors",
            "tool_version",
            "config_hash",
            "evidence_path",
        ])?;

        Ok(Self {
            provenance,
            descriptors_writer: Mutex::new(descriptors_writer),
            run_writer: Mutex::new(run_writer),
        })
    }
}

impl MetadataSink for CsvSink {
    fn record_descriptor(
        &self,
        descriptor: &ExtractionDescriptor,
        extracted: Option<&ExtractedFile>,
    ) -> Result<(), MetadataError> {
        let record = DescriptorCsv {
            run_id: &self.provenance.run_id,
            dissector: &descriptor.dissector,
            category: descriptor.category.as_str(),
            subcategory: descriptor.subcategory.as_str(),
            regions: format_regions(descriptor),
            region_count: descriptor.source_regions.len(),
            total_size: descriptor.total_size,
            suggested_name: &descriptor.suggested_name,
            grouped: descriptor.is_grouped(),
            path: extracted.map(|e| e.path.as_str()),
            md5: extracted.map(|e| e.md5.as_str()),
            sha256: extracted.map(|e| e.sha256.as_str()),
            tool_version: &self.provenance.tool_version,
            config_hash: &self.provenance.config_hash,
            evidence_path: &self.provenance.evidence_path,
        };
        self.descriptors_writer.lock().serialize(record)?;
        Ok(())
    }

    fn record_run_summary(&self, summary: &RunSummary) -> Result<(), MetadataError> {
        let record = RunSummaryCsv {
            run_id: &summary.run_id,
            source_len: summary.source_len,
            format_handler: &summary.format_handler,
            cancelled: summary.cancelled,
            bytes_scanned: summary.stats.bytes_scanned,
            windows: summary.stats.windows,
            candidates_checked: summary.stats.candidates_checked,
            findings: summary.stats.findings,
            declined: summary.stats.declined,
            accepted: summary.stats.accepted,
            descriptors: summary.descriptors,
            tool_version: &self.provenance.tool_version,
            config_hash: &self.provenance.config_hash,
            evidence_path: &self.provenance.evidence_path,
        };
        self.run_writer.lock().serialize(record)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), MetadataError> {
        self.descriptors_writer.lock().flush()?;
        self.run_writer.lock().flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dissect::{Category, Subcategory};
    use crate::engine::ScanStats;
    use crate::region::ByteRegion;
    use tempfile::tempdir;

    #[test]
    fn writes_csv_files() {
        let dir = tempdir().expect("tempdir");
        let sink = CsvSink::new(
            Provenance {
                run_id: "run1".to_string(),
                tool_version: "0.1.0".to_string(),
                config_hash: "hash".to_string(),
                evidence_path: "/evidence.dd".to_string(),
            },
            dir.path(),
        )
        .expect("csv sink");

        let descriptor = ExtractionDescriptor {
            dissector: "URL".to_string(),
            dissector_index: 3,
            category: Category::Strings,
            subcategory: Subcategory::Url,
            source_regions: vec![ByteRegion { start: 5, end: 25 }, ByteRegion { start: 40, end: 60 }],
            total_size: 40,
            suggested_extension: "txt".to_string(),
            suggested_name: "url_group.txt".to_string(),
            suggested_grouped_name: Some("url_group.txt".to_string()),
        };
        sink.record_descriptor(&descriptor, None).expect("record descriptor");
        sink.record_run_summary(&RunSummary {
            run_id: "run1".to_string(),
            source_len: 100,
            format_handler: "Generic".to_string(),
            cancelled: false,
            descriptors: 1,
            stats: ScanStats::default(),
        })
        .expect("record summary");
        sink.flush().expect("flush");

        let text = std::fs::read_to_string(dir.path().join("metadata").join("descriptors.csv"))
            .expect("read");
        let mut lines = text.lines();
        assert!(lines.next().expect("header").starts_with("run_id,dissector"));
        let row = lines.next().expect("row");
        assert!(row.contains("5-25;40-60"));
        assert!(row.contains("url_group.txt"));
        assert!(dir.path().join("metadata").join("run_summary.csv").exists());
    }
}
