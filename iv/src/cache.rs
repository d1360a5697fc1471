//! Bounded, process-wide cache of recent canonical events
//!
//! The cache is shared behind an `Arc` by the ingestion task, subscriber cursors,
//! the snapshot endpoint and the supervisor. All mutation goes through one mutex
//! so the capacity bound holds under concurrent appends.
//!
//! Every `clear()` starts a new generation. Writers that read a line before a
//! clear pass the generation they observed to [`EventCache::append_in`], which
//! discards the event instead of resurrecting pre-truncation history.
//!
//! Once a cache-writing cursor is attached it owns all further appends, and
//! warm-up becomes a no-op so the two never read the same line.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::event::CanonicalEvent;
use crate::normalize::parse_line;

/// Default cache capacity
pub const MAX_CACHE: usize = 500;

/// Default number of trailing file lines read by warm-up
pub const WARMUP_LINES: usize = 200;

#[derive(Debug, Default)]
struct CacheInner {
    events: VecDeque<CanonicalEvent>,
    generation: u64,
}

/// Fixed-capacity, insertion-ordered store of the most recent events
#[derive(Debug)]
pub struct EventCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    live_writer: AtomicBool,
}

impl Default for EventCache {
    fn default() -> Self {
        Self::new(MAX_CACHE)
    }
}

impl EventCache {
    /// Create an empty cache holding at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventCache::new: called");
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity,
            live_writer: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push_trimmed(&self, inner: &mut CacheInner, event: CanonicalEvent) {
        inner.events.push_back(event);
        while inner.events.len() > self.capacity {
            inner.events.pop_front();
        }
    }

    /// Maximum number of retained events
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }

    /// Current generation; bumped by every `clear()`
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Append an event, trimming the oldest entries past capacity
    pub fn append(&self, event: CanonicalEvent) {
        let mut inner = self.lock();
        self.push_trimmed(&mut inner, event);
    }

    /// Append only if no `clear()` happened since `generation` was observed
    ///
    /// Returns `false` when the event was discarded as stale.
    pub fn append_in(&self, generation: u64, event: CanonicalEvent) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            debug!(
                observed = generation,
                current = inner.generation,
                "EventCache::append_in: discarding event from before clear"
            );
            return false;
        }
        self.push_trimmed(&mut inner, event);
        true
    }

    /// Copy of the most recent `n` events, oldest first
    pub fn snapshot(&self, n: usize) -> Vec<CanonicalEvent> {
        let inner = self.lock();
        let skip = inner.events.len().saturating_sub(n);
        inner.events.iter().skip(skip).cloned().collect()
    }

    /// Drop every event and start a new generation
    pub fn clear(&self) -> u64 {
        let mut inner = self.lock();
        inner.events.clear();
        inner.generation += 1;
        debug!(generation = inner.generation, "EventCache::clear: cleared");
        inner.generation
    }

    /// Newest event satisfying `predicate`
    pub fn find_newest<F>(&self, predicate: F) -> Option<CanonicalEvent>
    where
        F: Fn(&CanonicalEvent) -> bool,
    {
        self.lock().events.iter().rev().find(|event| predicate(event)).cloned()
    }

    /// Record that a tailing cursor now appends every new line
    ///
    /// Call after the cursor is positioned. Sticky for the cache's lifetime.
    pub fn mark_live_writer(&self) {
        self.live_writer.store(true, Ordering::SeqCst);
    }

    pub fn has_live_writer(&self) -> bool {
        self.live_writer.load(Ordering::SeqCst)
    }

    /// Seed an empty cache from the last `lines` lines of `path`
    ///
    /// Does nothing if the file is missing, the cache already holds events, or a
    /// live cursor feeds the cache. Undecodable lines are skipped. Returns the
    /// number of events added.
    pub async fn warm_up(&self, path: &Path, lines: usize) -> usize {
        debug!(?path, lines, "EventCache::warm_up: called");
        if self.has_live_writer() {
            debug!("EventCache::warm_up: live cursor attached, skipping");
            return 0;
        }
        if !self.is_empty() {
            debug!("EventCache::warm_up: cache not empty, skipping");
            return 0;
        }

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(?path, "EventCache::warm_up: source file does not exist");
                return 0;
            }
            Err(e) => {
                warn!(?path, error = %e, "Failed to read source file for warm-up");
                return 0;
            }
        };

        let content = String::from_utf8_lossy(&bytes);
        let all: Vec<&str> = content.lines().collect();
        let start = all.len().saturating_sub(lines);
        let events: Vec<CanonicalEvent> = all[start..].iter().filter_map(|line| parse_line(line)).collect();

        // Re-check under the lock so concurrent warm-ups seed only once
        let mut inner = self.lock();
        if !inner.events.is_empty() || self.has_live_writer() {
            debug!("EventCache::warm_up: cache filled concurrently, skipping");
            return 0;
        }
        let added = events.len();
        for event in events {
            self.push_trimmed(&mut inner, event);
        }

        info!(added, ?path, "Warmed up event cache");
        added
    }
}
