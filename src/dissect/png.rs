use crate::cache::ChunkedSource;
use crate::dissect::{ArtifactDissector, Category, Check, Priority, ResultKind, Subcategory};
use crate::evidence::EvidenceError;
use crate::region::ByteRegion;

const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";
const CHUNK_HEADER_LEN: u64 = 8;
const CHUNK_CRC_LEN: u64 = 4;
const MAX_CHUNK_LEN: u32 = 0x7FFF_FFFF;

/// Carves PNG images by walking chunks from the signature to `IEND`.
pub struct PngDissector;

impl ArtifactDissector for PngDissector {
    fn name(&self) -> &'static str {
        "PNG"
    }

    fn category(&self) -> Category {
        Category::Images
    }

    fn subcategory(&self) -> Subcategory {
        Subcategory::Png
    }

    fn output_extension(&self) -> &'static str {
        "png"
    }

    fn priority(&self) -> Priority {
        Priority::BINARY
    }

    fn should_group_in_one_file(&self) -> bool {
        false
    }

    fn magics(&self) -> &[&'static [u8]] {
        &[PNG_SIGNATURE]
    }

    fn check(
        &self,
        offset: u64,
        source: &ChunkedSource,
        prefix: &[u8],
    ) -> Result<Check, EvidenceError> {
        if prefix.len() < 16 {
            return Ok(Check::declined("precached buffer too small"));
        }
        if &prefix[..8] != PNG_SIGNATURE {
            return Ok(Check::declined("missing png signature"));
        }
        // First chunk is always a 13 byte IHDR.
        if prefix[8..12] != 13u32.to_be_bytes() || &prefix[12..16] != b"IHDR" {
            return Ok(Check::declined("missing IHDR chunk"));
        }

        let mut pos = offset + PNG_SIGNATURE.len() as u64;
        loop {
            let header = source.get(pos, CHUNK_HEADER_LEN as usize, true)?;
            if header.is_empty() {
                return Ok(Check::declined("end of source before IEND"));
            }
            let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
            let kind = &header[4..8];
            if len > MAX_CHUNK_LEN {
                return Ok(Check::declined("chunk length out of range"));
            }
            if !kind.iter().all(|b| b.is_ascii_alphabetic()) {
                return Ok(Check::declined("invalid chunk type"));
            }

            let next = pos + CHUNK_HEADER_LEN + len as u64 + CHUNK_CRC_LEN;
            if next > source.len() {
                return Ok(Check::declined("chunk runs past end of source"));
            }
            if kind == b"IEND" {
                let Some(region) = ByteRegion::new(offset, next) else {
                    return Ok(Check::declined("invalid region"));
                };
                return Ok(Check::Accepted(self.finding(region, ResultKind::Buffer)));
            }
            pos = next;
        }
    }
}
