use memchr::memmem;

use crate::cache::ChunkedSource;
use crate::dissect::{ArtifactDissector, Category, Check, Priority, ResultKind, Subcategory};
use crate::evidence::EvidenceError;
use crate::region::ByteRegion;

const PDF_MAGIC: &[u8; 4] = b"%PDF";
const PDF_EOF: &[u8] = b"%%EOF";
const SEARCH_BACK_OFFSET: u64 = 200;

/// Structural keywords that must precede the end marker.
const XREF: &[u8] = b"xref";
const TRAILER: &[u8] = b"trailer";
const STARTXREF: &[u8] = b"startxref";

/// Carves PDF documents from the `%PDF` magic to the first `%%EOF` that is
/// preceded by `xref`, `trailer` and `startxref` within 200 bytes.
pub struct PdfDissector;

impl PdfDissector {
    /// Size of each forward scan step.
    pub fn scan_window(source: &ChunkedSource) -> usize {
        (source.cache_size() / 8).max(PDF_EOF.len() + 1)
    }

    fn missing_keyword(
        &self,
        source: &ChunkedSource,
        start: u64,
        eof_at: u64,
    ) -> Result<Option<&'static str>, EvidenceError> {
        let back_start = eof_at.saturating_sub(SEARCH_BACK_OFFSET).max(start);
        let back = source.get(back_start, (eof_at - back_start) as usize, false)?;

        if !has_standalone_xref(&back) {
            return Ok(Some("xref marker not found"));
        }
        if memmem::find(&back, TRAILER).is_none() {
            return Ok(Some("trailer marker not found"));
        }
        if memmem::find(&back, STARTXREF).is_none() {
            return Ok(Some("startxref marker not found"));
        }
        Ok(None)
    }
}

/// `xref` that is not merely the tail of `startxref`.
fn has_standalone_xref(buf: &[u8]) -> bool {
    memmem::find_iter(buf, XREF).any(|pos| pos < 5 || &buf[pos - 5..pos] != b"start")
}

impl ArtifactDissector for PdfDissector {
    fn name(&self) -> &'static str {
        "PDF"
    }

    fn category(&self) -> Category {
        Category::Documents
    }

    fn subcategory(&self) -> Subcategory {
        Subcategory::Pdf
    }

    fn output_extension(&self) -> &'static str {
        "pdf"
    }

    fn priority(&self) -> Priority {
        Priority::BINARY
    }

    fn should_group_in_one_file(&self) -> bool {
        false
    }

    fn magics(&self) -> &[&'static [u8]] {
        &[PDF_MAGIC]
    }

    fn check(
        &self,
        offset: u64,
        source: &ChunkedSource,
        prefix: &[u8],
    ) -> Result<Check, EvidenceError> {
        if prefix.len() < PDF_MAGIC.len() {
            return Ok(Check::declined("precached buffer too small"));
        }
        if &prefix[..PDF_MAGIC.len()] != PDF_MAGIC {
            return Ok(Check::declined("missing %PDF magic"));
        }

        // %PDF-x.y
        if prefix.len() > 7 {
            if !(b'1'..=b'2').contains(&prefix[5]) {
                return Ok(Check::declined("invalid pdf version"));
            }
            if !prefix[7].is_ascii_digit() {
                return Ok(Check::declined("invalid pdf subversion"));
            }
        }

        let window = Self::scan_window(source);
        let mut current = offset;
        loop {
            let buf = source.get(current, window, false)?;
            if buf.len() < PDF_EOF.len() {
                return Ok(Check::declined("end of source before %%EOF"));
            }

            if let Some(pos) = memmem::find(&buf, PDF_EOF) {
                let eof_at = current + pos as u64;
                if let Some(reason) = self.missing_keyword(source, offset, eof_at)? {
                    return Ok(Check::declined(reason));
                }
                let end = eof_at + PDF_EOF.len() as u64;
                let Some(region) = ByteRegion::new(offset, end) else {
                    return Ok(Check::declined("invalid region"));
                };
                return Ok(Check::Accepted(self.finding(region, ResultKind::Buffer)));
            }

            if buf.end_offset() >= source.len() || buf.len() <= PDF_EOF.len() {
                return Ok(Check::declined("end of source before %%EOF"));
            }
            current += (buf.len() - PDF_EOF.len()) as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PdfDissector;
    use crate::cache::ChunkedSource;
    use crate::dissect::{ArtifactDissector, Check};

    fn sample_pdf(body_len: usize) -> Vec<u8> {
        let mut data = b"%PDF-1.7\n".to_vec();
        data.extend(std::iter::repeat_n(b'a', body_len));
        data.extend_from_slice(b"\nxref\n0 1\ntrailer\n<< >>\nstartxref\n9\n%%EOF\n");
        data
    }

    fn check_at(data: &[u8], offset: u64, cache: usize) -> Check {
        let source = ChunkedSource::from_bytes(data.to_vec(), cache);
        let start = offset as usize;
        let prefix = &data[start..(start + 64).min(data.len())];
        PdfDissector
            .check(offset, &source, prefix)
            .expect("check")
    }

    #[test]
    fn ends_right_after_the_marker() {
        let mut data = vec![0u8; 16];
        let pdf = sample_pdf(1000);
        data.extend_from_slice(&pdf);
        data.extend_from_slice(b"trailing garbage");

        match check_at(&data, 16, 4096) {
            Check::Accepted(finding) => {
                assert_eq!(finding.region.start, 16);
                assert_eq!(finding.region.end, 16 + pdf.len() as u64 - 1);
            }
            other => panic!("expected finding, got {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_versions() {
        let mut data = sample_pdf(10);
        data[5] = b'9';
        assert_eq!(check_at(&data, 0, 4096), Check::declined("invalid pdf version"));

        let mut data = sample_pdf(10);
        data[7] = b'x';
        assert_eq!(check_at(&data, 0, 4096), Check::declined("invalid pdf subversion"));
    }

    #[test]
    fn bare_magic_is_not_enough() {
        let data = b"%PDF-1.4\nno end marker anywhere".to_vec();
        assert!(!check_at(&data, 0, 4096).is_accepted());
    }

    #[test]
    fn startxref_alone_does_not_satisfy_xref() {
        let data = b"%PDF-1.4\nbody\ntrailer\nstartxref\n0\n%%EOF".to_vec();
        assert_eq!(check_at(&data, 0, 4096), Check::declined("xref marker not found"));
    }

    #[test]
    fn keywords_further_than_200_bytes_back_do_not_count() {
        let mut data = b"%PDF-1.4\nxref\ntrailer\nstartxref\n".to_vec();
        data.extend(std::iter::repeat_n(b' ', 300));
        data.extend_from_slice(b"%%EOF");
        assert!(!check_at(&data, 0, 4096).is_accepted());
    }

    #[test]
    fn finds_marker_across_many_small_windows() {
        let pdf = sample_pdf(5000);
        match check_at(&pdf, 0, 512) {
            Check::Accepted(finding) => assert_eq!(finding.region.end, pdf.len() as u64 - 1),
            other => panic!("expected finding, got {other:?}"),
        }
    }
}
