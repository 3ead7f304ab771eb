//! OS-watch abstraction.
//!
//! The low-level change-notification mechanism is consumed through the
//! [`WatchBackend`] trait rather than inherited from, so nodes can run
//! against a fake backend in tests. The production implementation wraps
//! `notify::RecommendedWatcher`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::WatchError;
use crate::event::{FsEvent, FsEventKind};

/// Result of a subscribe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// An OS-level watch is live for the path.
    Installed,
    /// The path does not exist yet. Not an error: directories may be
    /// created later, and the subscription is retried on the next
    /// reschedule.
    Pending,
}

/// Subscription capability of the OS watch layer.
///
/// Every `Installed` subscribe consumes one OS watch resource; callers must
/// issue a matching unsubscribe on every removal path to avoid leaks.
pub trait WatchBackend: Send {
    /// Subscribe to change notifications for a path.
    fn subscribe(&mut self, path: &Path, recursive: bool) -> Result<SubscribeOutcome, WatchError>;

    /// Release a previously installed subscription.
    fn unsubscribe(&mut self, path: &Path, recursive: bool) -> Result<(), WatchError>;

    /// Release everything still held. Called once when the owning node
    /// stops; the backend delivers no events afterwards.
    fn shutdown(&mut self) {}
}

/// Creates one backend per observer node.
///
/// The backend pushes raw events into the node's channel; delivery order
/// within one channel is arrival order.
pub trait BackendFactory: Send + Sync {
    fn create(&self, events: mpsc::Sender<FsEvent>) -> Result<Box<dyn WatchBackend>, WatchError>;
}

/// Factory for the production `notify`-based backend.
pub struct NotifyFactory;

impl BackendFactory for NotifyFactory {
    fn create(&self, events: mpsc::Sender<FsEvent>) -> Result<Box<dyn WatchBackend>, WatchError> {
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    let kind = match event.kind {
                        EventKind::Create(_) => FsEventKind::Created,
                        EventKind::Modify(_) => FsEventKind::Modified,
                        // Removals and renames are outside the event
                        // contract; a recreated config file still arrives
                        // as a creation.
                        _ => return,
                    };
                    for path in event.paths {
                        let is_directory = path.is_dir();
                        let _ = events.blocking_send(FsEvent {
                            path,
                            kind,
                            is_directory,
                        });
                    }
                }
                Err(e) => {
                    tracing::error!("[backend] watch stream error: {e}");
                }
            }
        })?;

        Ok(Box::new(NotifyBackend {
            watcher,
            watched: HashMap::new(),
        }))
    }
}

struct WatchedPath {
    recursive: bool,
    count: usize,
}

/// Backend over `notify::RecommendedWatcher`.
///
/// `notify` keys watches by path, so subscriptions are refcounted per path
/// to keep OS watch add/remove balanced when two handlers share a
/// directory. A recursive subscribe upgrades an existing non-recursive
/// watch in place.
pub struct NotifyBackend {
    watcher: notify::RecommendedWatcher,
    watched: HashMap<PathBuf, WatchedPath>,
}

impl NotifyBackend {
    fn mode(recursive: bool) -> RecursiveMode {
        if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        }
    }
}

impl WatchBackend for NotifyBackend {
    fn subscribe(&mut self, path: &Path, recursive: bool) -> Result<SubscribeOutcome, WatchError> {
        if !path.exists() {
            return Ok(SubscribeOutcome::Pending);
        }

        if let Some(entry) = self.watched.get_mut(path) {
            if recursive && !entry.recursive {
                self.watcher
                    .unwatch(path)
                    .map_err(|e| WatchError::WatchInstall {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    })?;
                self.watcher
                    .watch(path, RecursiveMode::Recursive)
                    .map_err(|e| WatchError::WatchInstall {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    })?;
                entry.recursive = true;
            }
            entry.count += 1;
            return Ok(SubscribeOutcome::Installed);
        }

        match self.watcher.watch(path, Self::mode(recursive)) {
            Ok(()) => {
                self.watched
                    .insert(path.to_path_buf(), WatchedPath { recursive, count: 1 });
                Ok(SubscribeOutcome::Installed)
            }
            Err(e) => match e.kind {
                // Raced with deletion between the exists() check and the
                // watch call.
                notify::ErrorKind::PathNotFound => Ok(SubscribeOutcome::Pending),
                notify::ErrorKind::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound => {
                    Ok(SubscribeOutcome::Pending)
                }
                notify::ErrorKind::MaxFilesWatch => Err(WatchError::Exhausted {
                    reason: e.to_string(),
                }),
                _ => Err(WatchError::WatchInstall {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }),
            },
        }
    }

    fn unsubscribe(&mut self, path: &Path, _recursive: bool) -> Result<(), WatchError> {
        let Some(entry) = self.watched.get_mut(path) else {
            return Err(WatchError::WatchInstall {
                path: path.to_path_buf(),
                reason: "no active subscription for path".to_string(),
            });
        };
        if entry.count > 1 {
            entry.count -= 1;
            return Ok(());
        }
        self.watched.remove(path);
        self.watcher
            .unwatch(path)
            .map_err(|e| WatchError::WatchInstall {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    fn shutdown(&mut self) {
        for path in self.watched.keys() {
            if let Err(e) = self.watcher.unwatch(path) {
                tracing::debug!("[backend] unwatch on shutdown {}: {e}", path.display());
            }
        }
        self.watched.clear();
    }
}
