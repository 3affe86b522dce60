//! # Chunked Source
//!
//! Windowed, cached read access over an [`EvidenceSource`].
//!
//! Cache policy: a request that falls inside the cached window is served
//! from it. A forward miss refills a window starting at the requested
//! offset; a backward miss (before the cached window) refills a window that
//! ends at the requested end, so validators walking backwards from a marker
//! keep hitting the cache. Requests larger than the cache size bypass it.
//!
//! Up to [`CACHE_SLOTS`] windows are kept, most recently used first, so
//! workers scanning different parts of the source do not keep evicting each
//! other. Refills happen under the cache lock, so concurrent misses are
//! serialized.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::evidence::{EvidenceError, EvidenceSource, SliceSource, read_full};

pub const DEFAULT_CACHE_SIZE: usize = 1024 * 1024;
pub const MIN_CACHE_SIZE: usize = 64;
/// Windows held at once, each of `cache_size` bytes.
pub const CACHE_SLOTS: usize = 4;

/// Bytes covering `[offset, offset + len)` of the source.
#[derive(Clone)]
pub struct ChunkWindow {
    offset: u64,
    data: Arc<Vec<u8>>,
    start: usize,
    end: usize,
}

impl ChunkWindow {
    pub fn empty(offset: u64) -> Self {
        Self {
            offset,
            data: Arc::new(Vec::new()),
            start: 0,
            end: 0,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Absolute offset one past the last byte.
    pub fn end_offset(&self) -> u64 {
        self.offset + self.len() as u64
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }
}

impl Deref for ChunkWindow {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for ChunkWindow {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::fmt::Debug for ChunkWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkWindow")
            .field("offset", &self.offset)
            .field("len", &self.len())
            .finish()
    }
}

struct CachedWindow {
    offset: u64,
    data: Arc<Vec<u8>>,
}

impl CachedWindow {
    fn covers(&self, offset: u64, len: usize) -> bool {
        offset >= self.offset && offset + len as u64 <= self.offset + self.data.len() as u64
    }
}

pub struct ChunkedSource {
    evidence: Arc<dyn EvidenceSource>,
    len: u64,
    cache_size: usize,
    /// Most recently used first.
    cached: Mutex<VecDeque<CachedWindow>>,
}

impl ChunkedSource {
    pub fn new(evidence: Arc<dyn EvidenceSource>, cache_size: usize) -> Self {
        let len = evidence.len();
        Self {
            evidence,
            len,
            cache_size: cache_size.max(MIN_CACHE_SIZE),
            cached: Mutex::new(VecDeque::with_capacity(CACHE_SLOTS)),
        }
    }

    pub fn from_bytes(data: impl Into<Vec<u8>>, cache_size: usize) -> Self {
        Self::new(Arc::new(SliceSource::new(data)), cache_size)
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    /// Read up to `max_len` bytes at `offset`.
    ///
    /// With `exact`, anything shorter than `max_len` comes back as an empty
    /// window. Offsets at or past the end of the source yield an empty window,
    /// never an error; only genuine I/O failures are reported.
    pub fn get(&self, offset: u64, max_len: usize, exact: bool) -> Result<ChunkWindow, EvidenceError> {
        if offset >= self.len || max_len == 0 {
            return Ok(ChunkWindow::empty(offset));
        }
        let available = (self.len - offset).min(max_len as u64) as usize;
        if exact && available < max_len {
            return Ok(ChunkWindow::empty(offset));
        }

        let window = if available > self.cache_size {
            self.read_uncached(offset, available)?
        } else {
            self.read_cached(offset, available)?
        };

        if exact && window.len() < max_len {
            return Ok(ChunkWindow::empty(offset));
        }
        Ok(window)
    }

    fn read_uncached(&self, offset: u64, len: usize) -> Result<ChunkWindow, EvidenceError> {
        let mut buf = vec![0u8; len];
        let n = read_full(self.evidence.as_ref(), offset, &mut buf)?;
        buf.truncate(n);
        Ok(ChunkWindow {
            offset,
            start: 0,
            end: n,
            data: Arc::new(buf),
        })
    }

    fn read_cached(&self, offset: u64, len: usize) -> Result<ChunkWindow, EvidenceError> {
        let mut cached = self.cached.lock();
        if let Some(hit) = cached.iter().position(|w| w.covers(offset, len)) {
            if let Some(window) = cached.remove(hit) {
                let local = (offset - window.offset) as usize;
                let data = Arc::clone(&window.data);
                cached.push_front(window);
                return Ok(ChunkWindow {
                    offset,
                    data,
                    start: local,
                    end: local + len,
                });
            }
        }

        let backward = cached.front().is_some_and(|w| offset < w.offset);
        let fill_start = if backward {
            (offset + len as u64).saturating_sub(self.cache_size as u64)
        } else {
            offset
        };
        let fill_len = (self.len - fill_start).min(self.cache_size as u64) as usize;
        trace!(
            "cache refill offset={} len={} backward={}",
            fill_start, fill_len, backward
        );

        let mut buf = vec![0u8; fill_len];
        let n = read_full(self.evidence.as_ref(), fill_start, &mut buf)?;
        buf.truncate(n);
        let data = Arc::new(buf);
        cached.push_front(CachedWindow {
            offset: fill_start,
            data: Arc::clone(&data),
        });
        cached.truncate(CACHE_SLOTS);

        let local = (offset - fill_start) as usize;
        let start = local.min(data.len());
        let end = (local + len).min(data.len());
        Ok(ChunkWindow {
            offset,
            data,
            start,
            end,
        })
    }
}

impl std::fmt::Debug for ChunkedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedSource")
            .field("len", &self.len)
            .field("cache_size", &self.cache_size)
            .field("evidence", &"<dyn EvidenceSource>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::ChunkedSource;
    use crate::evidence::{EvidenceError, EvidenceSource};

    struct CountingSource {
        data: Vec<u8>,
        reads: AtomicUsize,
    }

    impl EvidenceSource for CountingSource {
        fn len(&self) -> u64 {
            self.data.len() as u64
        }

        fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, EvidenceError> {
            self.reads.fetch_add(1, Ordering::Relaxed);
            if offset as usize >= self.data.len() {
                return Ok(0);
            }
            let max = self.data.len() - offset as usize;
            let to_copy = buf.len().min(max);
            buf[..to_copy].copy_from_slice(&self.data[offset as usize..offset as usize + to_copy]);
            Ok(to_copy)
        }
    }

    fn pattern_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn best_effort_reads_truncate_at_end() {
        let source = ChunkedSource::from_bytes(pattern_bytes(1000), 256);
        let window = source.get(990, 100, false).expect("get");
        assert_eq!(window.len(), 10);
        assert_eq!(window.offset(), 990);
        assert_eq!(window.end_offset(), 1000);
        assert_eq!(window[0], (990 % 251) as u8);
    }

    #[test]
    fn exact_reads_are_all_or_nothing() {
        let source = ChunkedSource::from_bytes(pattern_bytes(1000), 256);
        assert!(source.get(990, 100, true).expect("get").is_empty());
        let window = source.get(900, 100, true).expect("get");
        assert_eq!(window.len(), 100);
    }

    #[test]
    fn out_of_range_offsets_yield_empty_windows() {
        let source = ChunkedSource::from_bytes(pattern_bytes(100), 256);
        assert!(source.get(100, 10, false).expect("get").is_empty());
        assert!(source.get(u64::MAX, 10, false).expect("get").is_empty());
        assert!(source.get(10, 0, true).expect("get").is_empty());
    }

    #[test]
    fn never_returns_more_than_requested() {
        let source = ChunkedSource::from_bytes(pattern_bytes(5000), 512);
        for offset in [0u64, 7, 511, 512, 4000, 4990] {
            for len in [1usize, 13, 512, 700, 2000] {
                let window = source.get(offset, len, false).expect("get");
                assert!(window.len() <= len);
                assert!(window.end_offset() <= 5000);
            }
        }
    }

    #[test]
    fn serves_repeated_reads_from_cache() {
        let inner = Arc::new(CountingSource {
            data: pattern_bytes(4096),
            reads: AtomicUsize::new(0),
        });
        let source = ChunkedSource::new(inner.clone(), 1024);
        source.get(100, 16, false).expect("get");
        source.get(200, 16, false).expect("get");
        source.get(1000, 24, false).expect("get");
        assert_eq!(inner.reads.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn backward_seek_keeps_walking_backwards_cached() {
        let inner = Arc::new(CountingSource {
            data: pattern_bytes(8192),
            reads: AtomicUsize::new(0),
        });
        let source = ChunkedSource::new(inner.clone(), 1024);
        source.get(6000, 16, false).expect("get");
        let window = source.get(5900, 16, false).expect("get");
        assert_eq!(window[0], (5900 % 251) as u8);
        source.get(5500, 16, false).expect("get");
        source.get(5000, 16, false).expect("get");
        assert_eq!(inner.reads.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn interleaved_readers_keep_their_windows() {
        let inner = Arc::new(CountingSource {
            data: pattern_bytes(16 * 1024),
            reads: AtomicUsize::new(0),
        });
        let source = ChunkedSource::new(inner.clone(), 1024);
        for step in 0..8u64 {
            for base in [0u64, 4000, 8000, 12000] {
                let offset = base + step * 100;
                let window = source.get(offset, 16, false).expect("get");
                assert_eq!(window[0], (offset % 251) as u8);
            }
        }
        assert_eq!(inner.reads.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn shared_between_threads() {
        let source = ChunkedSource::from_bytes(pattern_bytes(64 * 1024), 512);
        std::thread::scope(|scope| {
            for t in 0..4u64 {
                let source = &source;
                scope.spawn(move || {
                    for i in 0..200u64 {
                        let offset = (t * 16 * 1024 + i * 37) % (64 * 1024 - 64);
                        let window = source.get(offset, 64, true).expect("get");
                        assert_eq!(window.len(), 64);
                        assert_eq!(window[63], ((offset + 63) % 251) as u8);
                    }
                });
            }
        });
    }
}
