//! # Carving Engine
//!
//! Walks a [`ChunkedSource`] in scan windows, runs dissectors at candidate
//! offsets, resolves overlapping findings and groups the survivors into
//! extraction descriptors.
//!
//! Candidate offsets come either from every offset of every window
//! ([`ScanMode::Exhaustive`]) or from an Aho-Corasick automaton built over
//! the dissectors' magics ([`ScanMode::Indexed`]). Each `(offset, dissector)`
//! pair is checked at most once. With more than one worker, windows are
//! spread over threads and all findings are reduced after the workers join.

pub mod extraction;
pub mod resolve;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use aho_corasick::AhoCorasick;
use crossbeam_channel::{bounded, unbounded};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::cache::ChunkedSource;
use crate::chunk::{ScanWindow, WindowIter, window_count};
use crate::config::ConfigError;
use crate::dissect::{Check, DissectorDescriptor, DissectorRegistry, Finding};
use crate::evidence::EvidenceError;

pub use extraction::{ExtractionDescriptor, copy_descriptor, copy_region};
pub use resolve::{group_findings, resolve_overlaps};

/// Bytes handed to `check` as the already-read prefix.
pub const PRECACHED_PREFIX_LEN: usize = 64;
pub const DEFAULT_WINDOW_SIZE: u64 = 4 * 1024 * 1024;

const JOBS_PER_WORKER: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    Exhaustive,
    #[default]
    Indexed,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub mode: ScanMode,
    pub workers: usize,
    pub window_size: u64,
    /// Candidates at or past this offset are not considered.
    pub max_offset: Option<u64>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            mode: ScanMode::default(),
            workers: 1,
            window_size: DEFAULT_WINDOW_SIZE,
            max_offset: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("source error: {0}")]
    Source(#[from] EvidenceError),
    #[error("output sink error: {0}")]
    Sink(std::io::Error),
    #[error("scan worker panicked")]
    WorkerPanicked,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub bytes_scanned: u64,
    pub windows: u64,
    pub candidates_checked: u64,
    pub findings: u64,
    pub declined: u64,
    pub accepted: u64,
}

/// A finding together with the registration index of its dissector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateFinding {
    pub dissector: usize,
    pub finding: Finding,
}

#[derive(Debug, Clone)]
pub struct CarvingReport {
    pub accepted: Vec<CandidateFinding>,
    pub descriptors: Vec<ExtractionDescriptor>,
    pub stats: ScanStats,
}

#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed(CarvingReport),
    /// Stopped through the cancel flag. `partial` findings were never
    /// overlap-resolved nor accepted.
    Cancelled {
        partial: Vec<CandidateFinding>,
        stats: ScanStats,
    },
}

impl JobOutcome {
    pub fn stats(&self) -> &ScanStats {
        match self {
            JobOutcome::Completed(report) => &report.stats,
            JobOutcome::Cancelled { stats, .. } => stats,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobOutcome::Cancelled { .. })
    }
}

#[derive(Default)]
struct ScanCounters {
    bytes_scanned: AtomicU64,
    windows: AtomicU64,
    candidates_checked: AtomicU64,
    findings: AtomicU64,
    declined: AtomicU64,
}

impl ScanCounters {
    fn snapshot(&self, accepted: u64) -> ScanStats {
        ScanStats {
            bytes_scanned: self.bytes_scanned.load(Ordering::Relaxed),
            windows: self.windows.load(Ordering::Relaxed),
            candidates_checked: self.candidates_checked.load(Ordering::Relaxed),
            findings: self.findings.load(Ordering::Relaxed),
            declined: self.declined.load(Ordering::Relaxed),
            accepted,
        }
    }
}

struct WindowResult {
    candidates: Vec<CandidateFinding>,
    complete: bool,
}

pub struct CarvingEngine {
    registry: Arc<DissectorRegistry>,
    options: EngineOptions,
    automaton: AhoCorasick,
    /// Pattern id -> dissector index.
    pattern_owner: Vec<usize>,
}

impl CarvingEngine {
    pub fn new(registry: Arc<DissectorRegistry>, options: EngineOptions) -> Result<Self, ConfigError> {
        let mut patterns: Vec<&[u8]> = Vec::new();
        let mut pattern_owner = Vec::new();
        for (index, dissector) in registry.iter().enumerate() {
            for magic in dissector.magics() {
                if magic.is_empty() || magic.len() > PRECACHED_PREFIX_LEN {
                    return Err(ConfigError::Automaton(format!(
                        "dissector `{}` declares a magic of {} bytes",
                        dissector.name(),
                        magic.len()
                    )));
                }
                patterns.push(*magic);
                pattern_owner.push(index);
            }
        }
        let automaton = AhoCorasick::new(&patterns)
            .map_err(|err| ConfigError::Automaton(err.to_string()))?;
        debug!(
            "carving engine: {} dissectors, {} magics, mode={:?}",
            registry.len(),
            patterns.len(),
            options.mode
        );
        Ok(Self {
            registry,
            options,
            automaton,
            pattern_owner,
        })
    }

    pub fn registry(&self) -> &DissectorRegistry {
        &self.registry
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn descriptors(&self) -> Vec<DissectorDescriptor> {
        self.registry.descriptors()
    }

    pub fn job(&self, source: Arc<ChunkedSource>) -> CarvingJob<'_> {
        CarvingJob {
            engine: self,
            source,
            cancel: Arc::new(AtomicBool::new(false)),
            accepted: Vec::new(),
        }
    }

    fn candidates_in<'a>(
        &'a self,
        window: &ScanWindow,
        data: &[u8],
    ) -> Box<dyn Iterator<Item = (usize, usize)> + 'a> {
        let valid = (window.valid_length as usize).min(data.len());
        match self.options.mode {
            ScanMode::Exhaustive => {
                let dissectors = self.registry.len();
                Box::new((0..valid).flat_map(move |local| (0..dissectors).map(move |idx| (local, idx))))
            }
            ScanMode::Indexed => {
                let mut pairs: Vec<(usize, usize)> = self
                    .automaton
                    .find_overlapping_iter(data)
                    .filter(|m| m.start() < valid)
                    .map(|m| (m.start(), self.pattern_owner[m.pattern().as_usize()]))
                    .collect();
                pairs.sort_unstable();
                pairs.dedup();
                Box::new(pairs.into_iter())
            }
        }
    }

    fn scan_window(
        &self,
        source: &ChunkedSource,
        window: &ScanWindow,
        cancel: &AtomicBool,
        counters: &ScanCounters,
    ) -> Result<WindowResult, EngineError> {
        let data = source.get(window.start, window.length as usize, false)?;
        let mut candidates = Vec::new();
        let mut last_offset = None;

        for (local, index) in self.candidates_in(window, &data) {
            if last_offset != Some(local) {
                if cancel.load(Ordering::Relaxed) {
                    return Ok(WindowResult {
                        candidates,
                        complete: false,
                    });
                }
                last_offset = Some(local);
            }
            let Some(dissector) = self.registry.get(index) else {
                continue;
            };

            let offset = window.start + local as u64;
            let prefix = &data[local..(local + PRECACHED_PREFIX_LEN).min(data.len())];
            counters.candidates_checked.fetch_add(1, Ordering::Relaxed);

            match dissector.check(offset, source, prefix)? {
                Check::Accepted(finding) => {
                    let region = finding.region;
                    if region.is_empty() || !region.fits_within(source.len()) {
                        warn!(
                            "{} returned invalid region {} at 0x{:X}",
                            dissector.name(),
                            region,
                            offset
                        );
                        counters.declined.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    debug!("{} finding {}", dissector.name(), region);
                    counters.findings.fetch_add(1, Ordering::Relaxed);
                    candidates.push(CandidateFinding {
                        dissector: index,
                        finding,
                    });
                }
                Check::Declined(reason) => {
                    trace!("{} declined 0x{:X}: {}", dissector.name(), offset, reason);
                    counters.declined.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        counters
            .bytes_scanned
            .fetch_add(window.valid_length, Ordering::Relaxed);
        counters.windows.fetch_add(1, Ordering::Relaxed);
        Ok(WindowResult {
            candidates,
            complete: true,
        })
    }

    fn scan_sequential(
        &self,
        source: &ChunkedSource,
        windows: WindowIter,
        cancel: &AtomicBool,
        counters: &ScanCounters,
    ) -> Result<(Vec<CandidateFinding>, bool), EngineError> {
        let mut found = Vec::new();
        for window in windows {
            if cancel.load(Ordering::Relaxed) {
                return Ok((found, false));
            }
            let result = self.scan_window(source, &window, cancel, counters)?;
            found.extend(result.candidates);
            if !result.complete {
                return Ok((found, false));
            }
        }
        Ok((found, true))
    }

    fn scan_parallel(
        &self,
        source: &ChunkedSource,
        windows: WindowIter,
        total_windows: u64,
        cancel: &AtomicBool,
        counters: &ScanCounters,
    ) -> Result<(Vec<CandidateFinding>, bool), EngineError> {
        let workers = self.options.workers.max(1);
        let (job_tx, job_rx) = bounded::<ScanWindow>(workers * JOBS_PER_WORKER);
        let (result_tx, result_rx) = unbounded::<Result<WindowResult, EngineError>>();
        let abort = AtomicBool::new(false);

        let outcome = std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let abort = &abort;
                handles.push(scope.spawn(move || {
                    for window in job_rx {
                        if abort.load(Ordering::Relaxed) || cancel.load(Ordering::Relaxed) {
                            continue;
                        }
                        let result = self.scan_window(source, &window, cancel, counters);
                        if result.is_err() {
                            abort.store(true, Ordering::Relaxed);
                        }
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                }));
            }
            drop(job_rx);
            drop(result_tx);

            for window in windows {
                if abort.load(Ordering::Relaxed) || cancel.load(Ordering::Relaxed) {
                    break;
                }
                if job_tx.send(window).is_err() {
                    break;
                }
            }
            drop(job_tx);

            let mut found = Vec::new();
            let mut completed = 0u64;
            let mut first_error = None;
            for result in result_rx {
                match result {
                    Ok(window) => {
                        if window.complete {
                            completed += 1;
                        }
                        found.extend(window.candidates);
                    }
                    Err(err) => {
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                }
            }

            let mut panicked = false;
            for handle in handles {
                if handle.join().is_err() {
                    panicked = true;
                }
            }
            if panicked {
                return Err(EngineError::WorkerPanicked);
            }
            if let Some(err) = first_error {
                return Err(err);
            }
            Ok((found, completed == total_windows))
        })?;

        Ok(outcome)
    }

    fn scan(
        &self,
        source: &ChunkedSource,
        cancel: &AtomicBool,
        counters: &ScanCounters,
    ) -> Result<(Vec<CandidateFinding>, bool), EngineError> {
        let limit = self
            .options
            .max_offset
            .unwrap_or(source.len())
            .min(source.len());
        let window_size = self.options.window_size.max(1);
        let windows = WindowIter::new(limit, source.len(), window_size, PRECACHED_PREFIX_LEN as u64);
        let total_windows = window_count(limit, window_size);

        let (mut found, complete) = if self.options.workers <= 1 || total_windows <= 1 {
            self.scan_sequential(source, windows, cancel, counters)?
        } else {
            self.scan_parallel(source, windows, total_windows, cancel, counters)?
        };

        found.sort_by_key(|c| (c.finding.region.start, c.dissector, c.finding.region.end));
        Ok((found, complete))
    }
}

/// One scan of one source. Accepted findings stay available after `run`.
pub struct CarvingJob<'e> {
    engine: &'e CarvingEngine,
    source: Arc<ChunkedSource>,
    cancel: Arc<AtomicBool>,
    accepted: Vec<CandidateFinding>,
}

impl CarvingJob<'_> {
    /// Share an externally owned cancel flag (e.g. wired to Ctrl-C).
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn source(&self) -> &ChunkedSource {
        &self.source
    }

    pub fn accepted(&self) -> &[CandidateFinding] {
        &self.accepted
    }

    pub fn run(&mut self) -> Result<JobOutcome, EngineError> {
        let started = Instant::now();
        let registry = self.engine.registry();
        info!(
            "carving start len={} mode={:?} workers={} dissectors={}",
            self.source.len(),
            self.engine.options.mode,
            self.engine.options.workers,
            registry.len()
        );

        self.accepted.clear();
        let counters = ScanCounters::default();
        let (found, complete) = self.engine.scan(&self.source, &self.cancel, &counters)?;

        if !complete {
            let stats = counters.snapshot(0);
            warn!(
                "carving cancelled after {} windows, {} partial findings",
                stats.windows,
                found.len()
            );
            return Ok(JobOutcome::Cancelled {
                partial: found,
                stats,
            });
        }

        let accepted = resolve_overlaps(found, registry);
        let descriptors = group_findings(&accepted, registry);
        let stats = counters.snapshot(accepted.len() as u64);
        self.accepted = accepted.clone();

        info!(
            "carving done bytes={} candidates={} findings={} accepted={} declined={} descriptors={} elapsed_ms={}",
            stats.bytes_scanned,
            stats.candidates_checked,
            stats.findings,
            stats.accepted,
            stats.declined,
            descriptors.len(),
            started.elapsed().as_millis()
        );

        Ok(JobOutcome::Completed(CarvingReport {
            accepted,
            descriptors,
            stats,
        }))
    }
}
