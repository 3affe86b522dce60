//! # Artifact Dissectors
//!
//! A dissector validates and bounds one artifact type at a candidate offset.
//! Dissectors are statically known and registered once, in order; the
//! registration index breaks priority ties during overlap resolution.

pub mod pdf;
pub mod pe;
pub mod png;
pub mod url;

use std::borrow::Cow;

use serde::Serialize;

use crate::cache::ChunkedSource;
use crate::config::ConfigError;
use crate::evidence::EvidenceError;
use crate::region::ByteRegion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Category {
    Archives,
    AudioVideo,
    Cryptographic,
    Documents,
    Executables,
    Images,
    Strings,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Archives => "archives",
            Category::AudioVideo => "audio_video",
            Category::Cryptographic => "cryptographic",
            Category::Documents => "documents",
            Category::Executables => "executables",
            Category::Images => "images",
            Category::Strings => "strings",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Subcategory {
    Pdf,
    Png,
    PortableExecutable,
    Url,
}

impl Subcategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subcategory::Pdf => "pdf",
            Subcategory::Png => "png",
            Subcategory::PortableExecutable => "pe",
            Subcategory::Url => "url",
        }
    }
}

/// Shape of the bytes a finding covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResultKind {
    Buffer,
    Ascii,
}

/// Arbitration weight between dissectors claiming overlapping bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Priority(pub u16);

impl Priority {
    pub const TEXT: Priority = Priority(10);
    pub const BINARY: Priority = Priority(20);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub region: ByteRegion,
    pub result: ResultKind,
    pub category: Category,
    pub subcategory: Subcategory,
    pub priority: Priority,
}

/// Per-candidate outcome. Declines carry a short reason for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    Accepted(Finding),
    Declined(Cow<'static, str>),
}

impl Check {
    pub fn declined(reason: &'static str) -> Self {
        Check::Declined(Cow::Borrowed(reason))
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Check::Accepted(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DissectorDescriptor {
    pub name: &'static str,
    pub category: Category,
    pub subcategory: Subcategory,
    pub output_extension: &'static str,
    pub priority: Priority,
    pub group_in_one_file: bool,
}

pub trait ArtifactDissector: Send + Sync {
    fn name(&self) -> &'static str;
    fn category(&self) -> Category;
    fn subcategory(&self) -> Subcategory;
    fn output_extension(&self) -> &'static str;
    fn priority(&self) -> Priority;
    fn should_group_in_one_file(&self) -> bool;

    /// Byte prefixes that can start an artifact; drives indexed scanning.
    fn magics(&self) -> &[&'static [u8]];

    /// Decide whether an artifact starts at `offset`. `prefix` holds the
    /// bytes already read there. Errors are reserved for source I/O failures.
    fn check(
        &self,
        offset: u64,
        source: &ChunkedSource,
        prefix: &[u8],
    ) -> Result<Check, EvidenceError>;

    fn descriptor(&self) -> DissectorDescriptor {
        DissectorDescriptor {
            name: self.name(),
            category: self.category(),
            subcategory: self.subcategory(),
            output_extension: self.output_extension(),
            priority: self.priority(),
            group_in_one_file: self.should_group_in_one_file(),
        }
    }

    fn finding(&self, region: ByteRegion, result: ResultKind) -> Finding {
        Finding {
            region,
            result,
            category: self.category(),
            subcategory: self.subcategory(),
            priority: self.priority(),
        }
    }
}

type DissectorBuilder = fn() -> Box<dyn ArtifactDissector>;

const BUILTIN_DISSECTORS: &[(&str, DissectorBuilder)] = &[
    ("pe", || Box::new(pe::PeDissector)),
    ("pdf", || Box::new(pdf::PdfDissector)),
    ("png", || Box::new(png::PngDissector)),
    ("url", || Box::new(url::UrlDissector)),
];

pub fn builtin_names() -> impl Iterator<Item = &'static str> {
    BUILTIN_DISSECTORS.iter().map(|(name, _)| *name)
}

pub fn build_builtin(name: &str) -> Option<Box<dyn ArtifactDissector>> {
    let wanted = name.trim().to_ascii_lowercase();
    BUILTIN_DISSECTORS
        .iter()
        .find(|(id, _)| *id == wanted)
        .map(|(_, build)| build())
}

/// Ordered, fixed set of dissectors used by a carving job.
#[derive(Default)]
pub struct DissectorRegistry {
    dissectors: Vec<Box<dyn ArtifactDissector>>,
}

impl DissectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        Self {
            dissectors: BUILTIN_DISSECTORS.iter().map(|(_, build)| build()).collect(),
        }
    }

    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for name in names {
            let dissector = build_builtin(name.as_ref())
                .ok_or_else(|| ConfigError::UnknownDissector(name.as_ref().to_string()))?;
            registry.register(dissector)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, dissector: Box<dyn ArtifactDissector>) -> Result<usize, ConfigError> {
        if self
            .dissectors
            .iter()
            .any(|d| d.name().eq_ignore_ascii_case(dissector.name()))
        {
            return Err(ConfigError::DuplicateDissector(dissector.name().to_string()));
        }
        self.dissectors.push(dissector);
        Ok(self.dissectors.len() - 1)
    }

    pub fn get(&self, index: usize) -> Option<&dyn ArtifactDissector> {
        self.dissectors.get(index).map(|d| d.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn ArtifactDissector> {
        self.dissectors.iter().map(|d| d.as_ref())
    }

    pub fn len(&self) -> usize {
        self.dissectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dissectors.is_empty()
    }

    pub fn descriptors(&self) -> Vec<DissectorDescriptor> {
        self.iter().map(|d| d.descriptor()).collect()
    }
}

impl std::fmt::Debug for DissectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.dissectors.iter().map(|d| d.name()))
            .finish()
    }
}
