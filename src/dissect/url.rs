use crate::cache::ChunkedSource;
use crate::dissect::{ArtifactDissector, Category, Check, Priority, ResultKind, Subcategory};
use crate::evidence::EvidenceError;
use crate::region::ByteRegion;

const SCHEMES: &[&[u8]] = &[b"http://", b"https://", b"ftp://"];
const MIN_BODY_LEN: usize = 4;
const MAX_URL_LEN: usize = 2048;
const TRAILING_PUNCTUATION: &[u8] = b".,;:)'";

fn is_url_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"-._~:/?#[]@!$&'()*+,;=%".contains(&b)
}

/// Extracts ASCII URLs; all hits are written to one grouped text file.
pub struct UrlDissector;

impl ArtifactDissector for UrlDissector {
    fn name(&self) -> &'static str {
        "URL"
    }

    fn category(&self) -> Category {
        Category::Strings
    }

    fn subcategory(&self) -> Subcategory {
        Subcategory::Url
    }

    fn output_extension(&self) -> &'static str {
        "txt"
    }

    fn priority(&self) -> Priority {
        Priority::TEXT
    }

    fn should_group_in_one_file(&self) -> bool {
        true
    }

    fn magics(&self) -> &[&'static [u8]] {
        SCHEMES
    }

    fn check(
        &self,
        offset: u64,
        source: &ChunkedSource,
        prefix: &[u8],
    ) -> Result<Check, EvidenceError> {
        let Some(scheme) = SCHEMES.iter().find(|s| prefix.starts_with(s)) else {
            return Ok(Check::declined("unknown url scheme"));
        };

        let buf = source.get(offset, MAX_URL_LEN, false)?;
        let mut end = scheme.len();
        while end < buf.len() && is_url_byte(buf[end]) {
            end += 1;
        }
        while end > scheme.len() && TRAILING_PUNCTUATION.contains(&buf[end - 1]) {
            end -= 1;
        }
        if end - scheme.len() < MIN_BODY_LEN {
            return Ok(Check::declined("url body too short"));
        }

        let Some(region) = ByteRegion::with_len(offset, end as u64) else {
            return Ok(Check::declined("invalid region"));
        };
        Ok(Check::Accepted(self.finding(region, ResultKind::Ascii)))
    }
}
