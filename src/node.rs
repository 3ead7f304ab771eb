//! Observer nodes: one level of the dispatch tree.
//!
//! A node owns a set of active watches, the handlers keyed to them, its
//! own event-delivery loop, and zero or more child nodes. Lifecycle
//! operations recurse children-first so children are fully running before
//! the parent delivers root-level events, and fully stopped before the
//! parent finishes stopping.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendFactory, SubscribeOutcome, WatchBackend};
use crate::config::Settings;
use crate::debouncer::Debouncer;
use crate::error::WatchError;
use crate::event::FsEvent;
use crate::handler::EventHandler;
use crate::unit::Unit;

/// Identifies one active watch within a node. Tokens are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatchToken(u64);

/// The two structurally independent watch categories.
///
/// A node may hold either or both; rescheduling only ever replaces
/// `Content` watches, the config watch is permanent for the node's
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchCategory {
    Config,
    Content,
}

/// Lifecycle phase of a node. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    Unscheduled,
    ConfigWatchActive,
    ContentWatchesActive,
    Stopped,
}

struct WatchEntry {
    path: PathBuf,
    recursive: bool,
    handler: EventHandler,
    category: WatchCategory,
    /// False while the watched path does not exist yet; the subscription
    /// is retried on the next reschedule.
    installed: bool,
}

impl WatchEntry {
    fn covers(&self, path: &Path) -> bool {
        path_covered(&self.path, self.recursive, path)
    }
}

fn path_covered(watch: &Path, recursive: bool, candidate: &Path) -> bool {
    if recursive {
        candidate.starts_with(watch)
    } else {
        candidate == watch || candidate.parent() == Some(watch)
    }
}

struct NodeState {
    backend: Box<dyn WatchBackend>,
    watches: BTreeMap<WatchToken, WatchEntry>,
    next_token: u64,
    phase: NodePhase,
}

impl NodeState {
    /// Install one watch. `Ok(None)` means the watch was skipped after a
    /// non-fatal install failure; only OS resource exhaustion propagates.
    fn install_watch(
        &mut self,
        path: PathBuf,
        recursive: bool,
        handler: EventHandler,
        category: WatchCategory,
    ) -> Result<Option<WatchToken>, WatchError> {
        let installed = match self.backend.subscribe(&path, recursive) {
            Ok(SubscribeOutcome::Installed) => true,
            Ok(SubscribeOutcome::Pending) => {
                crate::debug_event!("node", "pending", "{}", path.display());
                false
            }
            Err(e @ WatchError::Exhausted { .. }) => return Err(e),
            Err(e) => {
                tracing::warn!("[node] skipping watch {}: {e}", path.display());
                return Ok(None);
            }
        };

        let token = WatchToken(self.next_token);
        self.next_token += 1;
        self.watches.insert(
            token,
            WatchEntry {
                path,
                recursive,
                handler,
                category,
                installed,
            },
        );
        Ok(Some(token))
    }

    /// Drop one watch, releasing its OS subscription if it has one.
    fn remove_watch(&mut self, token: WatchToken) {
        if let Some(entry) = self.watches.remove(&token) {
            if entry.installed {
                if let Err(e) = self.backend.unsubscribe(&entry.path, entry.recursive) {
                    tracing::warn!("[node] failed to unwatch {}: {e}", entry.path.display());
                }
            }
        }
    }

    fn clear_category(&mut self, category: WatchCategory) {
        let tokens: Vec<WatchToken> = self
            .watches
            .iter()
            .filter(|(_, entry)| entry.category == category)
            .map(|(token, _)| *token)
            .collect();
        for token in tokens {
            self.remove_watch(token);
        }
    }
}

/// One level of the dispatch tree.
///
/// Created through [`DispatchTree::register_unit`](crate::tree::DispatchTree::register_unit)
/// for registered units, and internally for the root. The node holds only
/// a back reference to its unit; the unit is owned by the caller.
pub struct ObserverNode {
    unit: Option<Weak<dyn Unit>>,
    weak_self: Weak<ObserverNode>,
    state: Mutex<NodeState>,
    children: Mutex<Vec<Arc<ObserverNode>>>,
    parent: Mutex<Weak<ObserverNode>>,
    /// Serializes reschedule_children per node: a second invocation blocks
    /// until the first completes, so two near-simultaneous config changes
    /// can never interleave an unschedule with a schedule.
    reschedule_lock: Mutex<()>,
    event_rx: Mutex<Option<mpsc::Receiver<FsEvent>>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    debounce_ms: u64,
}

impl ObserverNode {
    pub(crate) fn new(
        unit: Option<Weak<dyn Unit>>,
        factory: &dyn BackendFactory,
        settings: &Settings,
    ) -> Result<Arc<Self>, WatchError> {
        let (tx, rx) = mpsc::channel(settings.event_queue_size.max(1));
        let backend = factory.create(tx)?;

        Ok(Arc::new_cyclic(|weak| Self {
            unit,
            weak_self: weak.clone(),
            state: Mutex::new(NodeState {
                backend,
                watches: BTreeMap::new(),
                next_token: 0,
                phase: NodePhase::Unscheduled,
            }),
            children: Mutex::new(Vec::new()),
            parent: Mutex::new(Weak::new()),
            reschedule_lock: Mutex::new(()),
            event_rx: Mutex::new(Some(rx)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            debounce_ms: settings.debounce_ms,
        }))
    }

    fn unit(&self) -> Option<Arc<dyn Unit>> {
        self.unit.as_ref().and_then(Weak::upgrade)
    }

    /// Install the config watch: exactly one, rooted at the unit's root,
    /// non-recursive. Idempotent; a repeat call replaces the prior watch
    /// rather than duplicating it. A node without a unit has no config
    /// file and this is a no-op.
    pub fn schedule_config_watch(&self) -> Result<(), WatchError> {
        let Some(unit) = self.unit() else {
            crate::debug_event!("node", "no unit, skipping config watch");
            return Ok(());
        };
        let config_path = unit.config_path();
        let Some(file_name) = config_path.file_name().map(|n| n.to_os_string()) else {
            return Err(WatchError::InitFailed {
                reason: format!("config path {} has no file name", config_path.display()),
            });
        };
        let root = unit.root().to_path_buf();

        let mut state = self.state.lock();
        if state.phase == NodePhase::Stopped {
            return Err(WatchError::Stopped);
        }
        state.clear_category(WatchCategory::Config);
        let handler = EventHandler::ConfigChange {
            node: self.weak_self.clone(),
            file_name,
        };
        state.install_watch(root, false, handler, WatchCategory::Config)?;
        if state.phase == NodePhase::Unscheduled {
            state.phase = NodePhase::ConfigWatchActive;
        }
        Ok(())
    }

    /// Install one content watch per (dir, recursive, work) the unit
    /// currently declares. Full replace semantics: previously tracked
    /// content watches are unscheduled first, never merged. An empty
    /// declared list yields zero content watches.
    ///
    /// Returns the number of watches now tracked. Individual install
    /// failures are logged and skipped; only OS resource exhaustion
    /// aborts, leaving cleanup to `stop()`.
    pub fn schedule_content_watches(&self) -> Result<usize, WatchError> {
        // Re-query the unit on every call; its answer may change between
        // calls. A dropped unit declares nothing.
        let specs = match self.unit() {
            Some(unit) => unit.list_watched_dirs(),
            None => Vec::new(),
        };

        let mut state = self.state.lock();
        if state.phase == NodePhase::Stopped {
            return Err(WatchError::Stopped);
        }
        state.clear_category(WatchCategory::Content);

        let mut tracked = 0;
        for spec in specs {
            let handler = EventHandler::Content { work: spec.work };
            if state
                .install_watch(spec.dir, spec.recursive, handler, WatchCategory::Content)?
                .is_some()
            {
                tracked += 1;
            }
        }
        state.phase = NodePhase::ContentWatchesActive;
        Ok(tracked)
    }

    /// Re-derive every child's content watch set from a fresh
    /// `list_watched_dirs()` query. Config watches are never touched.
    ///
    /// Safe to call while events are arriving for other nodes; concurrent
    /// invocations on the same node are serialized.
    pub fn reschedule_children(&self) -> Result<(), WatchError> {
        let _guard = self.reschedule_lock.lock();
        let children = self.children.lock().clone();
        for child in children {
            match child.schedule_content_watches() {
                Ok(count) => {
                    crate::log_event!("node", "rescheduled", "{count} content watches");
                }
                // Raced with a concurrent stop; nothing left to schedule.
                Err(WatchError::Stopped) => continue,
                Err(e @ WatchError::Exhausted { .. }) => return Err(e),
                Err(e) => {
                    tracing::warn!("[node] reschedule failed: {e}");
                }
            }
        }
        Ok(())
    }

    /// Attach a child node, returning it for chaining. No de-duplication;
    /// the registration layer is responsible for not registering the same
    /// unit twice.
    pub fn add_child(&self, child: Arc<ObserverNode>) -> Arc<ObserverNode> {
        *child.parent.lock() = self.weak_self.clone();
        self.children.lock().push(child.clone());
        child
    }

    /// Detach a child node. Returns false if it was not attached.
    pub fn remove_child(&self, child: &Arc<ObserverNode>) -> bool {
        let mut children = self.children.lock();
        if let Some(pos) = children.iter().position(|c| Arc::ptr_eq(c, child)) {
            children.remove(pos);
            *child.parent.lock() = Weak::new();
            true
        } else {
            false
        }
    }

    /// Begin delivering events: children first, then this node.
    ///
    /// Must be called within a tokio runtime. Idempotent while running;
    /// returns `Stopped` once the node has been stopped.
    pub fn start(&self) -> Result<(), WatchError> {
        let children = self.children.lock().clone();
        for child in children {
            child.start()?;
        }
        self.start_local()
    }

    fn start_local(&self) -> Result<(), WatchError> {
        if self.state.lock().phase == NodePhase::Stopped {
            return Err(WatchError::Stopped);
        }
        let rx = self.event_rx.lock().take();
        let Some(rx) = rx else {
            // Already started.
            return Ok(());
        };
        let Some(node) = self.weak_self.upgrade() else {
            return Err(WatchError::InitFailed {
                reason: "node dropped during start".to_string(),
            });
        };
        let task = tokio::spawn(node.event_loop(rx));
        *self.task.lock() = Some(task);
        crate::debug_event!("node", "started");
        Ok(())
    }

    /// Stop delivering events and release every OS subscription: children
    /// first, then this node. Terminal; no further scheduling is valid.
    ///
    /// Only new event delivery stops. A handler already running is allowed
    /// to finish; `join()` waits for it.
    pub fn stop(&self) {
        let children = self.children.lock().clone();
        for child in children {
            child.stop();
        }
        self.stop_local();
    }

    fn stop_local(&self) {
        self.cancel.cancel();
        let mut state = self.state.lock();
        if state.phase == NodePhase::Stopped {
            return;
        }
        let tokens: Vec<WatchToken> = state.watches.keys().copied().collect();
        for token in tokens {
            state.remove_watch(token);
        }
        state.backend.shutdown();
        state.phase = NodePhase::Stopped;
        crate::debug_event!("node", "stopped");
    }

    /// Wait for the event loops to finish: children first, then this
    /// node. Call after `stop()`; joining a running node waits until it is
    /// stopped.
    pub async fn join(&self) -> Result<(), WatchError> {
        let mut nodes = Vec::new();
        self.collect_post_order(&mut nodes);
        for node in nodes {
            node.join_local().await?;
        }
        Ok(())
    }

    async fn join_local(&self) -> Result<(), WatchError> {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.await.map_err(|e| WatchError::TaskFailed {
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Nodes in post order: all descendants before the node itself. The
    /// same ordering backs start/stop/join and forced dispatch.
    pub(crate) fn collect_post_order(&self, out: &mut Vec<Arc<ObserverNode>>) {
        let children = self.children.lock().clone();
        for child in children {
            child.collect_post_order(out);
        }
        if let Some(me) = self.weak_self.upgrade() {
            out.push(me);
        }
    }

    /// Force a one-shot dispatch of this node's handlers with no event
    /// payload. `seen` de-duplicates units of work shared across watches
    /// so each runs exactly once per sweep.
    pub(crate) async fn run_local_handlers(&self, seen: &mut HashSet<usize>) {
        let handlers: Vec<EventHandler> = {
            let state = self.state.lock();
            state
                .watches
                .values()
                .map(|entry| entry.handler.clone())
                .collect()
        };
        for handler in handlers {
            if let EventHandler::Content { work } = &handler {
                let key = Arc::as_ptr(work) as *const () as usize;
                if !seen.insert(key) {
                    continue;
                }
            }
            if let Err(e) = handler.handle(None).await {
                tracing::error!("[{}] handler error: {e}", handler.name());
            }
        }
    }

    async fn event_loop(self: Arc<Self>, mut rx: mpsc::Receiver<FsEvent>) {
        let mut debouncer = Debouncer::new(self.debounce_ms);
        let tick = if self.debounce_ms == 0 {
            Duration::from_millis(5)
        } else {
            Duration::from_millis(self.debounce_ms.min(100))
        };
        // A free-running ticker rather than a per-iteration sleep: a
        // sustained event stream must not starve dispatch.
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                maybe = rx.recv() => {
                    match maybe {
                        Some(event) => debouncer.record(event),
                        None => break,
                    }
                }

                _ = ticker.tick() => {
                    for event in debouncer.take_ready() {
                        self.dispatch(&event).await;
                    }
                }
            }
        }
        crate::debug_event!("node", "event loop exited");
    }

    /// Route one event to every watch covering its path. Handlers run to
    /// completion one at a time, so events within a single watch are
    /// processed in arrival order.
    async fn dispatch(&self, event: &FsEvent) {
        let handlers: Vec<EventHandler> = {
            let state = self.state.lock();
            state
                .watches
                .values()
                .filter(|entry| entry.covers(&event.path))
                .map(|entry| entry.handler.clone())
                .collect()
        };
        for handler in handlers {
            crate::debug_event!(
                handler.name(),
                "event",
                "{:?} {}",
                event.kind,
                event.path.display()
            );
            if let Err(e) = handler.handle(Some(event)).await {
                tracing::error!("[{}] handler error: {e}", handler.name());
            }
        }
    }

    pub fn phase(&self) -> NodePhase {
        self.state.lock().phase
    }

    /// Number of tracked watches in a category, pending ones included.
    pub fn watch_count(&self, category: WatchCategory) -> usize {
        self.state
            .lock()
            .watches
            .values()
            .filter(|entry| entry.category == category)
            .count()
    }

    /// Number of watches with a live OS subscription.
    pub fn installed_watch_count(&self) -> usize {
        self.state
            .lock()
            .watches
            .values()
            .filter(|entry| entry.installed)
            .count()
    }

    /// The (path, recursive) pairs tracked in a category, in schedule
    /// order.
    pub fn watched_paths(&self, category: WatchCategory) -> Vec<(PathBuf, bool)> {
        self.state
            .lock()
            .watches
            .values()
            .filter(|entry| entry.category == category)
            .map(|entry| (entry.path.clone(), entry.recursive))
            .collect()
    }

    pub fn children(&self) -> Vec<Arc<ObserverNode>> {
        self.children.lock().clone()
    }

    pub fn parent(&self) -> Option<Arc<ObserverNode>> {
        self.parent.lock().upgrade()
    }
}
