/// One unit of scan work: candidate offsets `[start, start + valid_length)`
/// plus `length - valid_length` trailing bytes of look-ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub id: u64,
    pub start: u64,
    pub length: u64,
    pub valid_length: u64,
}

/// Lazily walks the windows covering `[0, limit)` of a source of
/// `source_len` bytes. Look-ahead may extend past `limit` but never past
/// the end of the source.
#[derive(Debug, Clone)]
pub struct WindowIter {
    limit: u64,
    source_len: u64,
    window: u64,
    overlap: u64,
    next_start: u64,
    next_id: u64,
}

impl WindowIter {
    pub fn new(limit: u64, source_len: u64, window: u64, overlap: u64) -> Self {
        Self {
            limit: limit.min(source_len),
            source_len,
            window,
            overlap,
            next_start: 0,
            next_id: 0,
        }
    }
}

impl Iterator for WindowIter {
    type Item = ScanWindow;

    fn next(&mut self) -> Option<ScanWindow> {
        if self.window == 0 || self.next_start >= self.limit {
            return None;
        }
        let start = self.next_start;
        let valid_length = (self.limit - start).min(self.window);
        let length = (self.source_len - start).min(self.window.saturating_add(self.overlap));

        self.next_start = start.saturating_add(self.window);
        let id = self.next_id;
        self.next_id += 1;

        Some(ScanWindow {
            id,
            start,
            length,
            valid_length,
        })
    }
}

pub fn window_count(limit: u64, window: u64) -> u64 {
    if window == 0 {
        return 0;
    }
    limit.div_ceil(window)
}
