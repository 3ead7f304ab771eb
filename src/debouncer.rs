//! Per-path debouncing of filesystem event bursts.
//!
//! Editors and build tools commonly touch a file several times in quick
//! succession (atomic save, formatter rewrite). The debouncer coalesces
//! those bursts so each path dispatches once per quiet period.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::event::FsEvent;

/// Coalesces change events by path.
///
/// Records the latest event per path and releases paths that have been
/// stable for the configured duration. A zero duration releases events on
/// the next poll, which keeps delivery deterministic in tests.
#[derive(Debug)]
pub struct Debouncer {
    /// Pending events: path -> (latest event, last change timestamp).
    pending: HashMap<PathBuf, (FsEvent, Instant)>,
    duration: Duration,
}

impl Debouncer {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            pending: HashMap::new(),
            duration: Duration::from_millis(debounce_ms),
        }
    }

    /// Record an event, resetting the quiet-period timer for its path.
    ///
    /// A later event for the same path replaces the earlier one, so a
    /// create-then-modify burst dispatches a single event.
    pub fn record(&mut self, event: FsEvent) {
        self.pending
            .insert(event.path.clone(), (event, Instant::now()));
    }

    /// Take all events whose paths have been stable for the debounce
    /// duration, oldest first.
    pub fn take_ready(&mut self) -> Vec<FsEvent> {
        let now = Instant::now();
        let mut ready: Vec<(FsEvent, Instant)> = Vec::new();

        self.pending.retain(|_, (event, last_change)| {
            if now.duration_since(*last_change) >= self.duration {
                ready.push((event.clone(), *last_change));
                false
            } else {
                true
            }
        });

        // Preserve arrival order across paths.
        ready.sort_by_key(|(_, at)| *at);
        ready.into_iter().map(|(event, _)| event).collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
