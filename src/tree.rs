//! The dispatch tree: root composition and external registration API.
//!
//! One tree per watch session. Units register to get an observer node
//! each; the tree starts, stops, and joins the whole forest as a unit. A
//! stopped tree cannot be restarted; create a new one.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::backend::{BackendFactory, NotifyFactory};
use crate::config::Settings;
use crate::error::WatchError;
use crate::node::ObserverNode;
use crate::unit::Unit;

/// Process-wide entry point for a watch session.
///
/// Owns the root [`ObserverNode`]; each registered unit becomes a child of
/// the root. The root itself owns no unit and no watches, it only manages
/// the forest.
pub struct DispatchTree {
    root: Arc<ObserverNode>,
    factory: Arc<dyn BackendFactory>,
    settings: Settings,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl DispatchTree {
    /// Create a builder for configuring the tree.
    pub fn builder() -> DispatchTreeBuilder {
        DispatchTreeBuilder::new()
    }

    /// Create a child node for `unit`, install its config and content
    /// watches, and attach it to the forest.
    ///
    /// The tree holds only a back reference to the unit; the caller keeps
    /// ownership. If the tree is already running the new node starts
    /// immediately.
    pub fn register_unit<U: Unit + 'static>(
        &self,
        unit: &Arc<U>,
    ) -> Result<Arc<ObserverNode>, WatchError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(WatchError::Stopped);
        }

        let dyn_unit: Arc<dyn Unit> = Arc::clone(unit) as Arc<dyn Unit>;
        let weak: Weak<dyn Unit> = Arc::downgrade(&dyn_unit);
        let node = ObserverNode::new(Some(weak), self.factory.as_ref(), &self.settings)?;
        node.schedule_config_watch()?;
        let count = node.schedule_content_watches()?;
        crate::log_event!(
            "tree",
            "registered",
            "{} ({count} content watches)",
            unit.root().display()
        );

        let node = self.root.add_child(node);
        if self.started.load(Ordering::Acquire) {
            node.start()?;
        }
        Ok(node)
    }

    /// Tear down a registered unit's node: its watches are released and it
    /// is detached from the forest. Returns false if the node was not
    /// attached.
    pub fn unregister_unit(&self, node: &Arc<ObserverNode>) -> bool {
        if self.root.remove_child(node) {
            node.stop();
            crate::log_event!("tree", "unregistered");
            true
        } else {
            false
        }
    }

    /// Begin delivering events for the whole forest, children before the
    /// root. Must be called within a tokio runtime.
    pub fn start(&self) -> Result<(), WatchError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(WatchError::Stopped);
        }
        self.root.start()?;
        self.started.store(true, Ordering::Release);
        crate::log_event!("tree", "started");
        Ok(())
    }

    /// Stop the whole forest, children before the root. All OS
    /// subscriptions are released; the tree cannot be restarted.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.root.stop();
        crate::log_event!("tree", "stopped");
    }

    /// Wait for every node's event loop to finish, children before the
    /// root. Call after `stop()`.
    pub async fn join(&self) -> Result<(), WatchError> {
        self.root.join().await
    }

    /// Synchronously invoke every currently registered handler with no
    /// event payload, e.g. to force an initial run on session start.
    ///
    /// Each unit of work runs exactly once per call, independent of
    /// filesystem activity, even when it backs several watches.
    pub async fn dispatch_all_now(&self) -> Result<(), WatchError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(WatchError::Stopped);
        }
        let mut nodes = Vec::new();
        self.root.collect_post_order(&mut nodes);
        let mut seen = HashSet::new();
        for node in nodes {
            node.run_local_handlers(&mut seen).await;
        }
        Ok(())
    }

    /// The root node of the forest.
    pub fn root(&self) -> &Arc<ObserverNode> {
        &self.root
    }
}

/// Builder for constructing a [`DispatchTree`].
pub struct DispatchTreeBuilder {
    factory: Option<Arc<dyn BackendFactory>>,
    settings: Settings,
}

impl DispatchTreeBuilder {
    pub fn new() -> Self {
        Self {
            factory: None,
            settings: Settings::default(),
        }
    }

    /// Substitute the OS-watch backend; defaults to the notify-based
    /// backend.
    pub fn backend_factory(mut self, factory: Arc<dyn BackendFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<DispatchTree, WatchError> {
        let factory: Arc<dyn BackendFactory> = match self.factory {
            Some(factory) => factory,
            None => Arc::new(NotifyFactory),
        };
        let root = ObserverNode::new(None, factory.as_ref(), &self.settings)?;

        Ok(DispatchTree {
            root,
            factory,
            settings: self.settings,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }
}

impl Default for DispatchTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
