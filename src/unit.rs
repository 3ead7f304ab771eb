//! Caller-supplied watch configuration.
//!
//! A [`Unit`] describes what one project or workspace wants watched and
//! what to run when it changes. Units are owned by the caller's registry;
//! the dispatch tree only keeps back references to them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

/// A runnable piece of work triggered by content changes.
///
/// Failures propagate to the dispatch boundary where they are reported as
/// non-fatal diagnostics; one unit's failure never stops the session.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    async fn run(&self) -> anyhow::Result<()>;
}

/// One declared content watch: a directory, its recursion mode, and the
/// work to run when something inside it changes.
#[derive(Clone)]
pub struct WatchSpec {
    pub dir: PathBuf,
    pub recursive: bool,
    pub work: Arc<dyn UnitOfWork>,
}

impl WatchSpec {
    pub fn new(dir: impl Into<PathBuf>, recursive: bool, work: Arc<dyn UnitOfWork>) -> Self {
        Self {
            dir: dir.into(),
            recursive,
            work,
        }
    }
}

/// Watch configuration for one project/workspace.
pub trait Unit: Send + Sync {
    /// Root directory of the unit. The config watch is rooted here,
    /// non-recursive.
    fn root(&self) -> &Path;

    /// The unit's designated config file. Exactly one per unit; a change
    /// to it re-derives the watch set.
    fn config_path(&self) -> PathBuf;

    /// Declared content watches, in order.
    ///
    /// Re-queried on every reschedule, so the result may legitimately
    /// differ between calls (including becoming empty).
    fn list_watched_dirs(&self) -> Vec<WatchSpec>;
}
