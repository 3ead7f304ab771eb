//! Event handlers dispatched by observer nodes.
//!
//! Handlers are a tagged variant rather than a trait hierarchy so dispatch
//! stays exhaustive: a watch is either a config watch (re-derives the
//! sibling watch sets) or a content watch (runs a unit of work).

use std::ffi::OsString;
use std::sync::{Arc, Weak};

use crate::error::WatchError;
use crate::event::FsEvent;
use crate::node::ObserverNode;
use crate::unit::UnitOfWork;

/// Handler invoked when a watched path reports a change.
///
/// Immutable once constructed; handlers never touch a node's watch table
/// directly, they request rescheduling through the node's interface.
#[derive(Clone)]
pub enum EventHandler {
    /// Reacts to changes of one designated config file.
    ///
    /// Holds a back reference to the node the watch lives on; the
    /// reschedule runs on that node's managing parent, so sibling units
    /// re-derive their content watches together. A standalone node with
    /// no parent reschedules its own children.
    ConfigChange {
        node: Weak<ObserverNode>,
        file_name: OsString,
    },

    /// Delegates content changes to a registered unit of work.
    Content { work: Arc<dyn UnitOfWork> },
}

impl EventHandler {
    /// Handler name for diagnostics.
    pub fn name(&self) -> &str {
        match self {
            EventHandler::ConfigChange { .. } => "config",
            EventHandler::Content { work } => work.name(),
        }
    }

    /// Whether an event is relevant to this handler.
    ///
    /// Config handlers match only their designated file name and never
    /// directories. Content handlers take any non-directory event; a
    /// directory being created is not itself content changing.
    pub fn wants(&self, event: &FsEvent) -> bool {
        if event.is_directory {
            return false;
        }
        match self {
            EventHandler::ConfigChange { file_name, .. } => {
                event.path.file_name() == Some(file_name.as_os_str())
            }
            EventHandler::Content { .. } => true,
        }
    }

    /// Process one event, or force a one-shot dispatch with no payload.
    ///
    /// Completes fully (including any triggered run or reschedule) before
    /// the owning node processes its next queued event.
    pub async fn handle(&self, event: Option<&FsEvent>) -> Result<(), WatchError> {
        if let Some(event) = event {
            if !self.wants(event) {
                return Ok(());
            }
        }

        match self {
            EventHandler::ConfigChange { node, .. } => {
                let Some(node) = node.upgrade() else {
                    return Ok(());
                };
                let target = node.parent().unwrap_or(node);
                target.reschedule_children()
            }
            EventHandler::Content { work } => {
                work.run()
                    .await
                    .map_err(|e| WatchError::HandlerExecution {
                        handler: work.name().to_string(),
                        reason: format!("{e:#}"),
                    })
            }
        }
    }
}
