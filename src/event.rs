//! Filesystem event model shared between backends and handlers.

use std::path::PathBuf;

/// What happened to a watched path.
///
/// Only creation and modification cross the backend boundary; other
/// OS-level event kinds are dropped during translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsEventKind {
    Created,
    Modified,
}

/// A single change notification for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub path: PathBuf,
    pub kind: FsEventKind,
    /// Whether the path is a directory. Directory events are not
    /// "content changing" and handlers ignore them; the file-level
    /// events inside the directory fire once it is watched.
    pub is_directory: bool,
}

impl FsEvent {
    /// Convenience constructor for a file-level event.
    pub fn file(path: impl Into<PathBuf>, kind: FsEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
            is_directory: false,
        }
    }

    /// Convenience constructor for a directory-level event.
    pub fn directory(path: impl Into<PathBuf>, kind: FsEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
            is_directory: true,
        }
    }
}
