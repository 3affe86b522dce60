//! Materializes extraction descriptors as files under the run output
//! directory. Not part of the carving core: it only drives
//! [`copy_descriptor`].

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::cache::ChunkedSource;
use crate::engine::{EngineError, ExtractionDescriptor, copy_descriptor};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedFile {
    /// Path relative to the output root.
    pub path: String,
    pub size: u64,
    pub md5: String,
    pub sha256: String,
}

struct HashingWriter<W: Write> {
    inner: W,
    md5: md5::Context,
    sha256: Sha256,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            md5: md5::Context::new(),
            sha256: Sha256::new(),
        }
    }

    fn finish(mut self) -> std::io::Result<(String, String)> {
        self.inner.flush()?;
        let md5 = format!("{:x}", self.md5.compute());
        let sha256 = hex::encode(self.sha256.finalize());
        Ok((md5, sha256))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.md5.consume(&buf[..n]);
        self.sha256.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Write one descriptor to `<output_root>/<category>/<suggested_name>`.
pub fn extract_descriptor(
    source: &ChunkedSource,
    descriptor: &ExtractionDescriptor,
    output_root: &Path,
) -> Result<ExtractedFile, EngineError> {
    let dir = output_root.join(descriptor.category.as_str());
    std::fs::create_dir_all(&dir).map_err(EngineError::Sink)?;
    let full_path = dir.join(&descriptor.suggested_name);
    let file = File::create(&full_path).map_err(EngineError::Sink)?;

    let mut writer = HashingWriter::new(BufWriter::new(file));
    let size = copy_descriptor(source, descriptor, &mut writer)?;
    let (md5, sha256) = writer.finish().map_err(EngineError::Sink)?;

    let rel_path = full_path
        .strip_prefix(output_root)
        .unwrap_or(&full_path)
        .to_string_lossy()
        .to_string();
    debug!("extracted {} ({} bytes)", rel_path, size);
    Ok(ExtractedFile {
        path: rel_path,
        size,
        md5,
        sha256,
    })
}
