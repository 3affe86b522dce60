//! Portable Executable layout, shared by the PE dissector and the PE format
//! plugin.

use crate::cache::ChunkedSource;
use crate::dissect::{ArtifactDissector, Category, Check, Priority, ResultKind, Subcategory};
use crate::evidence::EvidenceError;
use crate::region::ByteRegion;

const MZ_MAGIC: &[u8; 2] = b"MZ";
const PE_SIGNATURE: &[u8; 4] = b"PE\0\0";
const DOS_HEADER_LEN: usize = 0x40;
const FILE_HEADER_LEN: usize = 20;
const SECTION_HEADER_LEN: usize = 40;
const MAX_SECTIONS: u16 = 96;

/// Upper bound on the bytes needed to parse all headers.
pub const MAX_HEADER_SPAN: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeSection {
    pub name: String,
    pub virtual_address: u32,
    pub virtual_size: u32,
    pub raw_offset: u32,
    pub raw_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeLayout {
    pub pe_offset: u32,
    pub machine: u16,
    pub timestamp: u32,
    pub characteristics: u16,
    pub is_64: bool,
    pub size_of_headers: u32,
    /// Offset just past the section table.
    pub section_table_end: u64,
    pub sections: Vec<PeSection>,
}

impl PeLayout {
    /// Bytes covered by the headers and every section's raw data.
    pub fn image_extent(&self) -> u64 {
        let headers_end = (self.size_of_headers as u64).max(self.section_table_end);
        self.sections
            .iter()
            .filter(|s| s.raw_size > 0)
            .map(|s| s.raw_offset as u64 + s.raw_size as u64)
            .fold(headers_end, u64::max)
    }

    pub fn machine_name(&self) -> &'static str {
        match self.machine {
            0x014c => "x86",
            0x8664 => "x64",
            0x01c0 => "ARM",
            0x01c4 => "ARMv7",
            0xaa64 => "ARM64",
            0x0200 => "IA64",
            _ => "unknown",
        }
    }
}

fn u16_at(buf: &[u8], pos: usize) -> Option<u16> {
    buf.get(pos..pos + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn u32_at(buf: &[u8], pos: usize) -> Option<u32> {
    buf.get(pos..pos + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Parse DOS, COFF, optional and section headers from `buf`, which starts
/// at the `MZ` magic.
pub fn parse_layout(buf: &[u8]) -> Result<PeLayout, &'static str> {
    if buf.len() < DOS_HEADER_LEN {
        return Err("dos header truncated");
    }
    if &buf[..2] != MZ_MAGIC {
        return Err("missing MZ magic");
    }
    let pe_offset = u32_at(buf, 0x3C).ok_or("dos header truncated")?;
    if (pe_offset as usize) < DOS_HEADER_LEN || pe_offset as usize >= MAX_HEADER_SPAN {
        return Err("e_lfanew out of range");
    }
    let pe = pe_offset as usize;
    let signature = buf.get(pe..pe + 4).ok_or("pe header truncated")?;
    if signature != PE_SIGNATURE {
        return Err("missing PE signature");
    }

    let coff = pe + 4;
    let machine = u16_at(buf, coff).ok_or("file header truncated")?;
    let section_count = u16_at(buf, coff + 2).ok_or("file header truncated")?;
    let timestamp = u32_at(buf, coff + 4).ok_or("file header truncated")?;
    let optional_len = u16_at(buf, coff + 16).ok_or("file header truncated")? as usize;
    let characteristics = u16_at(buf, coff + 18).ok_or("file header truncated")?;
    if section_count == 0 || section_count > MAX_SECTIONS {
        return Err("implausible section count");
    }

    let optional = coff + FILE_HEADER_LEN;
    let is_64 = match u16_at(buf, optional).ok_or("optional header truncated")? {
        0x10b => false,
        0x20b => true,
        _ => return Err("unknown optional header magic"),
    };
    let size_of_headers = u32_at(buf, optional + 60).ok_or("optional header truncated")?;

    let table = optional + optional_len;
    let mut sections = Vec::with_capacity(section_count as usize);
    for index in 0..section_count as usize {
        let at = table + index * SECTION_HEADER_LEN;
        let raw = buf
            .get(at..at + SECTION_HEADER_LEN)
            .ok_or("section table truncated")?;
        let name_len = raw[..8].iter().position(|b| *b == 0).unwrap_or(8);
        sections.push(PeSection {
            name: String::from_utf8_lossy(&raw[..name_len]).into_owned(),
            virtual_size: u32_at(raw, 8).unwrap_or(0),
            virtual_address: u32_at(raw, 12).unwrap_or(0),
            raw_size: u32_at(raw, 16).unwrap_or(0),
            raw_offset: u32_at(raw, 20).unwrap_or(0),
        });
    }

    Ok(PeLayout {
        pe_offset,
        machine,
        timestamp,
        characteristics,
        is_64,
        size_of_headers,
        section_table_end: (table + sections.len() * SECTION_HEADER_LEN) as u64,
        sections,
    })
}

/// Carves PE images; the region ends at the furthest section raw data.
/// Images whose sections run past the end of the source are declined.
pub struct PeDissector;

impl ArtifactDissector for PeDissector {
    fn name(&self) -> &'static str {
        "PE"
    }

    fn category(&self) -> Category {
        Category::Executables
    }

    fn subcategory(&self) -> Subcategory {
        Subcategory::PortableExecutable
    }

    fn output_extension(&self) -> &'static str {
        "exe"
    }

    fn priority(&self) -> Priority {
        Priority::BINARY
    }

    fn should_group_in_one_file(&self) -> bool {
        false
    }

    fn magics(&self) -> &[&'static [u8]] {
        &[MZ_MAGIC]
    }

    fn check(
        &self,
        offset: u64,
        source: &ChunkedSource,
        prefix: &[u8],
    ) -> Result<Check, EvidenceError> {
        if prefix.len() < 2 || &prefix[..2] != MZ_MAGIC {
            return Ok(Check::declined("missing MZ magic"));
        }
        if let Some(pe_offset) = u32_at(prefix, 0x3C) {
            if (pe_offset as usize) < DOS_HEADER_LEN || pe_offset as usize >= MAX_HEADER_SPAN {
                return Ok(Check::declined("e_lfanew out of range"));
            }
        }

        let headers = source.get(offset, MAX_HEADER_SPAN, false)?;
        let layout = match parse_layout(&headers) {
            Ok(layout) => layout,
            Err(reason) => return Ok(Check::declined(reason)),
        };

        let end = offset.saturating_add(layout.image_extent());
        if end > source.len() {
            return Ok(Check::declined("section data past end of source"));
        }
        let Some(region) = ByteRegion::new(offset, end) else {
            return Ok(Check::declined("invalid region"));
        };
        Ok(Check::Accepted(self.finding(region, ResultKind::Buffer)))
    }
}
