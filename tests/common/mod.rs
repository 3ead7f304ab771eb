//! Shared test doubles: a fake watch backend and recording units of work.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use watchtree::{
    BackendFactory, FsEvent, Settings, SubscribeOutcome, Unit, UnitOfWork, WatchBackend,
    WatchError, WatchSpec,
};

/// Settings tuned for deterministic tests: no debounce window.
pub fn test_settings() -> Settings {
    Settings {
        debounce_ms: 0,
        event_queue_size: 256,
        ..Settings::default()
    }
}

#[derive(Default)]
struct HubState {
    backends: Vec<BackendRecord>,
    missing: HashSet<PathBuf>,
    denied: HashSet<PathBuf>,
    exhausted: HashSet<PathBuf>,
    log: Vec<String>,
}

struct BackendRecord {
    sender: mpsc::Sender<FsEvent>,
    active: Vec<(PathBuf, bool)>,
}

/// Factory plus shared inspection state for all backends it creates.
///
/// Backends are numbered in creation order: the tree root's backend is 0,
/// then one per registered unit.
#[derive(Clone, Default)]
pub struct FakeHub {
    state: Arc<Mutex<HubState>>,
}

impl FakeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subscribes for `path` report the path as not existing yet.
    pub fn mark_missing(&self, path: impl Into<PathBuf>) {
        self.state.lock().missing.insert(path.into());
    }

    pub fn clear_missing(&self, path: &Path) {
        self.state.lock().missing.remove(path);
    }

    /// Make subscribes for `path` fail like a permission error.
    pub fn mark_denied(&self, path: impl Into<PathBuf>) {
        self.state.lock().denied.insert(path.into());
    }

    /// Make subscribes for `path` fail like the OS watch limit being hit.
    pub fn mark_exhausted(&self, path: impl Into<PathBuf>) {
        self.state.lock().exhausted.insert(path.into());
    }

    pub fn backend_count(&self) -> usize {
        self.state.lock().backends.len()
    }

    /// Live subscriptions of one backend, in subscribe order.
    pub fn active(&self, backend: usize) -> Vec<(PathBuf, bool)> {
        self.state.lock().backends[backend].active.clone()
    }

    pub fn active_count(&self, backend: usize) -> usize {
        self.state.lock().backends[backend].active.len()
    }

    /// Event injection channel for one backend's owning node.
    pub fn sender(&self, backend: usize) -> mpsc::Sender<FsEvent> {
        self.state.lock().backends[backend].sender.clone()
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    /// Backend ids in the order their shutdown hook ran.
    pub fn shutdown_order(&self) -> Vec<usize> {
        self.state
            .lock()
            .log
            .iter()
            .filter_map(|line| line.strip_prefix("shutdown "))
            .filter_map(|id| id.parse().ok())
            .collect()
    }

    /// Any unsubscribe that had no matching subscribe.
    pub fn unbalanced_releases(&self) -> Vec<String> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|line| line.starts_with("unsubscribe-miss"))
            .cloned()
            .collect()
    }
}

impl BackendFactory for FakeHub {
    fn create(&self, events: mpsc::Sender<FsEvent>) -> Result<Box<dyn WatchBackend>, WatchError> {
        let mut state = self.state.lock();
        let id = state.backends.len();
        state.backends.push(BackendRecord {
            sender: events,
            active: Vec::new(),
        });
        Ok(Box::new(FakeBackend {
            state: self.state.clone(),
            id,
        }))
    }
}

struct FakeBackend {
    state: Arc<Mutex<HubState>>,
    id: usize,
}

impl WatchBackend for FakeBackend {
    fn subscribe(&mut self, path: &Path, recursive: bool) -> Result<SubscribeOutcome, WatchError> {
        let mut state = self.state.lock();
        if state.exhausted.contains(path) {
            state
                .log
                .push(format!("exhausted {} {}", self.id, path.display()));
            return Err(WatchError::Exhausted {
                reason: "watch limit reached".to_string(),
            });
        }
        if state.denied.contains(path) {
            state.log.push(format!("deny {} {}", self.id, path.display()));
            return Err(WatchError::WatchInstall {
                path: path.to_path_buf(),
                reason: "permission denied".to_string(),
            });
        }
        if state.missing.contains(path) {
            return Ok(SubscribeOutcome::Pending);
        }
        state
            .log
            .push(format!("subscribe {} {}", self.id, path.display()));
        state.backends[self.id]
            .active
            .push((path.to_path_buf(), recursive));
        Ok(SubscribeOutcome::Installed)
    }

    fn unsubscribe(&mut self, path: &Path, recursive: bool) -> Result<(), WatchError> {
        let mut state = self.state.lock();
        let id = self.id;
        let pos = state.backends[id]
            .active
            .iter()
            .position(|(p, r)| p == path && *r == recursive);
        match pos {
            Some(pos) => {
                state.backends[id].active.remove(pos);
                state
                    .log
                    .push(format!("unsubscribe {} {}", id, path.display()));
                Ok(())
            }
            None => {
                state
                    .log
                    .push(format!("unsubscribe-miss {} {}", id, path.display()));
                Err(WatchError::WatchInstall {
                    path: path.to_path_buf(),
                    reason: "no active subscription".to_string(),
                })
            }
        }
    }

    fn shutdown(&mut self) {
        self.state.lock().log.push(format!("shutdown {}", self.id));
    }
}

/// A unit whose declared watch list can change between queries, like a
/// config file being edited mid-session.
pub struct TestUnit {
    root: PathBuf,
    config_file: String,
    dirs: Mutex<Vec<WatchSpec>>,
}

impl TestUnit {
    pub fn new(root: impl Into<PathBuf>, config_file: &str) -> Self {
        Self {
            root: root.into(),
            config_file: config_file.to_string(),
            dirs: Mutex::new(Vec::new()),
        }
    }

    pub fn set_dirs(&self, dirs: Vec<WatchSpec>) {
        *self.dirs.lock() = dirs;
    }
}

impl Unit for TestUnit {
    fn root(&self) -> &Path {
        &self.root
    }

    fn config_path(&self) -> PathBuf {
        self.root.join(&self.config_file)
    }

    fn list_watched_dirs(&self) -> Vec<WatchSpec> {
        self.dirs.lock().clone()
    }
}

/// Unit of work that counts its runs.
pub struct CountingWork {
    name: String,
    runs: AtomicUsize,
}

impl CountingWork {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            runs: AtomicUsize::new(0),
        })
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl UnitOfWork for CountingWork {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Unit of work that always fails, still counting its invocations.
pub struct FailingWork {
    runs: AtomicUsize,
}

impl FailingWork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            runs: AtomicUsize::new(0),
        })
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl UnitOfWork for FailingWork {
    fn name(&self) -> &str {
        "failing"
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("unit of work failed")
    }
}
