//! Filesystem watcher for one project.
//!
//! Watches the project root and every subdirectory (version-control
//! metadata excluded) and normalizes raw notify events into the project's
//! vocabulary: file update, file removal, full restart, or watcher failure.
//! Directory-level changes escalate to a restart, which tears the watcher
//! down and rebuilds it with a fresh directory scan.

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use walkdir::WalkDir;

use crate::error::Result;
use crate::project::fork::SKIPPED_DIRS;

/// A normalized watch event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A file was created or written.
    Update(PathBuf),
    /// A file was removed or renamed away.
    Remove(PathBuf),
    /// A directory appeared or disappeared; a full re-scan is needed.
    Restart,
    /// The watcher backend failed; it stops after this.
    Fail(String),
}

/// A running watcher. Dropping it stops the watch.
pub struct ProjectWatcher {
    // Kept alive for the duration of the watch.
    _watcher: RecommendedWatcher,
}

impl ProjectWatcher {
    /// Start watching `root`, delivering events on the returned channel.
    ///
    /// The watch set is built once from a recursive scan; newly created
    /// directories are only picked up after the restart this triggers.
    pub fn start(root: &Path) -> Result<(ProjectWatcher, mpsc::Receiver<WatchEvent>)> {
        let watch_dirs = subdirs(root)?;
        let (tx, rx) = mpsc::channel(256);

        let dirs_for_handler = watch_dirs.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                match res {
                    Ok(event) => {
                        for ev in normalize(&event, &dirs_for_handler) {
                            let _ = tx.blocking_send(ev);
                        }
                    }
                    Err(err) => {
                        let _ = tx.blocking_send(WatchEvent::Fail(err.to_string()));
                    }
                }
            })?;

        for dir in &watch_dirs {
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
        }

        Ok((ProjectWatcher { _watcher: watcher }, rx))
    }
}

/// Translate one notify event. Access/metadata-only changes are dropped,
/// as is anything under a skipped directory.
fn normalize(event: &notify::Event, watch_dirs: &[PathBuf]) -> Vec<WatchEvent> {
    let mut out = Vec::new();
    for path in &event.paths {
        if path
            .components()
            .any(|c| SKIPPED_DIRS.iter().any(|d| c.as_os_str() == *d))
        {
            continue;
        }
        let ev = match event.kind {
            EventKind::Create(_) | EventKind::Modify(notify::event::ModifyKind::Data(_))
            | EventKind::Modify(notify::event::ModifyKind::Any) => {
                if is_dir(path, watch_dirs) {
                    WatchEvent::Restart
                } else {
                    WatchEvent::Update(path.clone())
                }
            }
            EventKind::Remove(_) | EventKind::Modify(notify::event::ModifyKind::Name(_)) => {
                if is_dir(path, watch_dirs) {
                    WatchEvent::Restart
                } else {
                    WatchEvent::Remove(path.clone())
                }
            }
            _ => continue,
        };
        out.push(ev);
    }
    out
}

/// Is `path` a directory?
///
/// Answered first by binary search over the sorted watch set, then by a
/// stat fallback for directories created after the scan (they must still
/// escalate to a restart before the watch set catches up).
fn is_dir(path: &Path, watch_dirs: &[PathBuf]) -> bool {
    if watch_dirs.binary_search_by(|d| d.as_path().cmp(path)).is_ok() {
        return true;
    }
    path.is_dir()
}

/// All directories under `root`, sorted; version-control metadata and
/// build output excluded.
fn subdirs(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_absolute() {
        return Err(crate::error::CliError::Custom(format!(
            "project dir {} must be an absolute path",
            root.display()
        )));
    }
    let mut dirs = Vec::new();
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !SKIPPED_DIRS.iter().any(|d| e.file_name() == *d))
    {
        let entry = entry.map_err(|err| {
            crate::error::CliError::Custom(format!(
                "building directory structure of {}: {err}",
                root.display()
            ))
        })?;
        if entry.file_type().is_dir() {
            dirs.push(entry.into_path());
        }
    }
    dirs.sort();
    Ok(dirs)
}
