use std::io::Write;

use serde::Serialize;

use crate::cache::ChunkedSource;
use crate::dissect::{Category, DissectorDescriptor, Subcategory};
use crate::engine::EngineError;
use crate::evidence::EvidenceError;
use crate::region::ByteRegion;

/// What an external materializer needs to write one output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionDescriptor {
    pub dissector: String,
    pub dissector_index: usize,
    pub category: Category,
    pub subcategory: Subcategory,
    pub source_regions: Vec<ByteRegion>,
    pub total_size: u64,
    pub suggested_extension: String,
    pub suggested_name: String,
    pub suggested_grouped_name: Option<String>,
}

pub fn single_name(dissector: &str, start: u64, extension: &str) -> String {
    format!("{}_{:012X}.{}", dissector, start, extension)
}

pub fn grouped_name(dissector: &str, extension: &str) -> String {
    format!("{}_group.{}", dissector.to_ascii_lowercase(), extension)
}

impl ExtractionDescriptor {
    pub(crate) fn single(desc: &DissectorDescriptor, index: usize, region: ByteRegion) -> Self {
        Self {
            dissector: desc.name.to_string(),
            dissector_index: index,
            category: desc.category,
            subcategory: desc.subcategory,
            source_regions: vec![region],
            total_size: region.len(),
            suggested_extension: desc.output_extension.to_string(),
            suggested_name: single_name(desc.name, region.start, desc.output_extension),
            suggested_grouped_name: None,
        }
    }

    pub(crate) fn grouped(
        desc: &DissectorDescriptor,
        index: usize,
        regions: Vec<ByteRegion>,
    ) -> Self {
        let name = grouped_name(desc.name, desc.output_extension);
        Self {
            dissector: desc.name.to_string(),
            dissector_index: index,
            category: desc.category,
            subcategory: desc.subcategory,
            total_size: regions.iter().map(ByteRegion::len).sum(),
            source_regions: regions,
            suggested_extension: desc.output_extension.to_string(),
            suggested_name: name.clone(),
            suggested_grouped_name: Some(name),
        }
    }

    pub fn is_grouped(&self) -> bool {
        self.suggested_grouped_name.is_some()
    }

    pub fn first_offset(&self) -> u64 {
        self.source_regions.first().map(|r| r.start).unwrap_or(0)
    }
}

/// Copy exactly `region.len()` bytes to `out`, one cache window at a time.
pub fn copy_region(
    source: &ChunkedSource,
    region: ByteRegion,
    out: &mut dyn Write,
) -> Result<u64, EngineError> {
    let step = source.cache_size().max(1);
    let mut pos = region.start;
    while pos < region.end {
        let want = (region.end - pos).min(step as u64) as usize;
        let window = source.get(pos, want, false)?;
        if window.is_empty() {
            return Err(EngineError::Source(EvidenceError::UnexpectedEof {
                offset: pos,
                missing: region.end - pos,
            }));
        }
        out.write_all(&window).map_err(EngineError::Sink)?;
        pos += window.len() as u64;
    }
    Ok(region.len())
}

/// Copy every region of a descriptor back to back. Grouped text outputs get
/// one line per region.
pub fn copy_descriptor(
    source: &ChunkedSource,
    descriptor: &ExtractionDescriptor,
    out: &mut dyn Write,
) -> Result<u64, EngineError> {
    let mut written = 0u64;
    for region in &descriptor.source_regions {
        written += copy_region(source, *region, out)?;
        if descriptor.is_grouped() {
            out.write_all(b"\n").map_err(EngineError::Sink)?;
            written += 1;
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::EvidenceError;

    #[test]
    fn names_follow_offset_and_group_conventions() {
        assert_eq!(single_name("PDF", 0x1A2B, "pdf"), "PDF_000000001A2B.pdf");
        assert_eq!(grouped_name("URL", "txt"), "url_group.txt");
    }

    #[test]
    fn copies_across_cache_windows() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let source = ChunkedSource::from_bytes(data.clone(), 64);
        let region = ByteRegion::new(10, 900).expect("region");
        let mut out = Vec::new();
        let n = copy_region(&source, region, &mut out).expect("copy");
        assert_eq!(n, 890);
        assert_eq!(out, data[10..900]);
    }

    #[test]
    fn short_source_is_an_error() {
        let source = ChunkedSource::from_bytes(vec![1u8; 100], 64);
        let region = ByteRegion::new(50, 150).expect("region");
        let mut out = Vec::new();
        let err = copy_region(&source, region, &mut out).expect_err("short");
        assert!(matches!(
            err,
            EngineError::Source(EvidenceError::UnexpectedEof { offset: 100, missing: 50 })
        ));
    }
}
