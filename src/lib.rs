//! Hierarchical change-notification dispatch tree.
//!
//! Watches a forest of directory trees for filesystem events, routes each
//! event to the handlers registered for that path, and re-derives a
//! unit's watched path set when its config file changes.
//!
//! # Architecture
//!
//! ```text
//! DispatchTree
//!   - root ObserverNode (owns no unit)
//!   - one child ObserverNode per registered Unit
//!         |
//!    +---------------+---------------+
//!    |                               |
//! ObserverNode (unit A)        ObserverNode (unit B)
//!   - config watch  -> reschedule all siblings' content watches
//!   - content watches -> UnitOfWork::run()
//!   - own event loop over an injected WatchBackend
//! ```
//!
//! Lifecycle operations (`start`/`stop`/`join`) recurse children-first,
//! so children are fully running before the root delivers events and
//! fully stopped before the root finishes stopping.

pub mod backend;
pub mod config;
mod debouncer;
pub mod error;
pub mod event;
pub mod handler;
pub mod logging;
pub mod node;
pub mod tree;
pub mod unit;

pub use backend::{BackendFactory, NotifyBackend, NotifyFactory, SubscribeOutcome, WatchBackend};
pub use config::{LoggingConfig, Settings};
pub use debouncer::Debouncer;
pub use error::WatchError;
pub use event::{FsEvent, FsEventKind};
pub use handler::EventHandler;
pub use node::{NodePhase, ObserverNode, WatchCategory, WatchToken};
pub use tree::{DispatchTree, DispatchTreeBuilder};
pub use unit::{Unit, UnitOfWork, WatchSpec};
