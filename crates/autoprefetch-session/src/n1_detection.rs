//! N+1 load tracking.
//!
//! Counts the single-row relation loads a session issues per
//! (model, relationship) pair and warns once a pair reaches its threshold.
//! Batch loads are counted separately; they are what a peer-tracked result
//! set turns those single loads into.
//!
//! ```ignore
//! session.enable_n1_detection(3);
//!
//! // Rows without a peer group: one query per row, warns on the third.
//! for hero in &detached_heroes {
//!     Hero::TEAM.get(&cx, &mut session, hero).await;
//! }
//! ```

use std::collections::HashMap;
use std::panic::Location;
use std::time::Instant;

const TARGET: &str = "autoprefetch::n1";

/// Call sites kept per pair for the warning.
const MAX_SITES: usize = 5;

/// Where a single load was triggered.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub parent_type: &'static str,
    pub relationship: &'static str,
    pub file: &'static str,
    pub line: u32,
    pub timestamp: Instant,
}

#[derive(Debug, Default)]
struct PairCounts {
    single: usize,
    batches: usize,
    batched_rows: usize,
    sites: Vec<CallSite>,
}

/// Per-session record of relation loads.
#[derive(Debug)]
pub struct N1QueryTracker {
    pairs: HashMap<(&'static str, &'static str), PairCounts>,
    threshold: usize,
    enabled: bool,
}

impl Default for N1QueryTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of tracker counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct N1Stats {
    /// Single-row loads recorded.
    pub total_loads: usize,
    /// Distinct (model, relationship) pairs loaded one row at a time.
    pub relationships_loaded: usize,
    /// Pairs at or above the threshold.
    pub potential_n1: usize,
    pub batch_loads: usize,
    /// Rows filled by those batches.
    pub batched_rows: usize,
}

impl N1Stats {
    /// Counts accumulated since `earlier`.
    #[must_use]
    pub fn since(&self, earlier: &N1Stats) -> N1Stats {
        N1Stats {
            total_loads: self.total_loads.saturating_sub(earlier.total_loads),
            relationships_loaded: self
                .relationships_loaded
                .saturating_sub(earlier.relationships_loaded),
            potential_n1: self.potential_n1.saturating_sub(earlier.potential_n1),
            batch_loads: self.batch_loads.saturating_sub(earlier.batch_loads),
            batched_rows: self.batched_rows.saturating_sub(earlier.batched_rows),
        }
    }
}

impl N1QueryTracker {
    /// A tracker warning at the third single load of a pair.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pairs: HashMap::new(),
            threshold: 3,
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Record one single-row load, capturing the caller.
    #[track_caller]
    pub fn record_load(&mut self, parent_type: &'static str, relationship: &'static str) {
        self.record_load_at(parent_type, relationship, Location::caller());
    }

    /// Record one single-row load triggered at `location`.
    pub fn record_load_at(
        &mut self,
        parent_type: &'static str,
        relationship: &'static str,
        location: &'static Location<'static>,
    ) {
        if !self.enabled {
            return;
        }
        let pair = self.pairs.entry((parent_type, relationship)).or_default();
        pair.single += 1;
        if pair.sites.len() < MAX_SITES {
            pair.sites.push(CallSite {
                parent_type,
                relationship,
                file: location.file(),
                line: location.line(),
                timestamp: Instant::now(),
            });
        }

        if pair.single == self.threshold {
            tracing::warn!(
                target: TARGET,
                parent = parent_type,
                relationship,
                queries = pair.single,
                threshold = self.threshold,
                "N+1 query pattern: realize the rows through a peer-tracking manager so the relation loads in one batch"
            );
            for (i, site) in pair.sites.iter().enumerate() {
                tracing::debug!(target: TARGET, index = i, "  [{}] {}:{}", i, site.file, site.line);
            }
        }
    }

    /// Record one batch load covering `rows` rows.
    pub fn record_batch(&mut self, parent_type: &'static str, relationship: &'static str, rows: usize) {
        if !self.enabled {
            return;
        }
        let pair = self.pairs.entry((parent_type, relationship)).or_default();
        pair.batches += 1;
        pair.batched_rows += rows;
        tracing::trace!(
            target: TARGET,
            parent = parent_type,
            relationship,
            rows,
            "Batch load recorded"
        );
    }

    /// Forget all counts and call sites.
    pub fn reset(&mut self) {
        self.pairs.clear();
    }

    /// Single loads recorded for one pair.
    #[must_use]
    pub fn count_for(&self, parent_type: &'static str, relationship: &'static str) -> usize {
        self.pairs
            .get(&(parent_type, relationship))
            .map_or(0, |pair| pair.single)
    }

    /// Batches recorded for one pair.
    #[must_use]
    pub fn batches_for(&self, parent_type: &'static str, relationship: &'static str) -> usize {
        self.pairs
            .get(&(parent_type, relationship))
            .map_or(0, |pair| pair.batches)
    }

    #[must_use]
    pub fn stats(&self) -> N1Stats {
        self.pairs
            .values()
            .fold(N1Stats::default(), |mut stats, pair| {
                stats.total_loads += pair.single;
                stats.relationships_loaded += usize::from(pair.single > 0);
                stats.potential_n1 += usize::from(pair.single > 0 && pair.single >= self.threshold);
                stats.batch_loads += pair.batches;
                stats.batched_rows += pair.batched_rows;
                stats
            })
    }

    /// The first call sites of every pair loaded one row at a time.
    #[must_use]
    pub fn call_sites(&self) -> Vec<&CallSite> {
        self.pairs.values().flat_map(|pair| &pair.sites).collect()
    }
}

/// Summary logger for a unit of work such as one request.
///
/// Capture the stats when the work starts, then call
/// [`N1DetectionScope::log_summary`] with the stats at the end.
pub struct N1DetectionScope {
    initial_stats: N1Stats,
    threshold: usize,
    verbose: bool,
}

impl N1DetectionScope {
    #[must_use]
    pub fn new(initial_stats: N1Stats, threshold: usize) -> Self {
        tracing::debug!(target: TARGET, threshold, "N+1 detection scope started");
        Self {
            initial_stats,
            threshold,
            verbose: false,
        }
    }

    #[must_use]
    pub fn from_tracker(tracker: &N1QueryTracker) -> Self {
        Self::new(tracker.stats(), tracker.threshold())
    }

    /// Log the summary even when nothing was found.
    #[must_use]
    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    /// Log what changed since the scope started and return the delta.
    pub fn log_summary(&self, final_stats: &N1Stats) -> N1Stats {
        let delta = final_stats.since(&self.initial_stats);
        if delta.potential_n1 > 0 {
            tracing::warn!(
                target: TARGET,
                potential_n1 = delta.potential_n1,
                total_loads = delta.total_loads,
                batch_loads = delta.batch_loads,
                threshold = self.threshold,
                "N+1 issues detected in this scope"
            );
        } else if self.verbose {
            tracing::info!(
                target: TARGET,
                total_loads = delta.total_loads,
                batch_loads = delta.batch_loads,
                "N+1 scope clean"
            );
        } else {
            tracing::debug!(
                target: TARGET,
                total_loads = delta.total_loads,
                batch_loads = delta.batch_loads,
                "N+1 scope clean"
            );
        }
        delta
    }
}
