use serde::Serialize;

/// Half-open byte range `[start, end)` inside a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ByteRegion {
    pub start: u64,
    pub end: u64,
}

impl ByteRegion {
    /// Returns `None` when `end < start`.
    pub fn new(start: u64, end: u64) -> Option<Self> {
        if end < start {
            return None;
        }
        Some(Self { start, end })
    }

    pub fn with_len(start: u64, len: u64) -> Option<Self> {
        Self::new(start, start.checked_add(len)?)
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn overlaps(&self, other: &ByteRegion) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset < self.end
    }

    /// True when the region lies inside `[0, source_len]`.
    pub fn fits_within(&self, source_len: u64) -> bool {
        self.end >= self.start && self.end <= source_len
    }
}

impl std::fmt::Display for ByteRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[0x{:X}, 0x{:X})", self.start, self.end)
    }
}
