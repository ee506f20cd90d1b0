//! Buffering of raw watch events into reload requests.
//!
//! `ChangeCoalescer` holds no timers itself: it reports when a flush should
//! be scheduled and, when asked to flush, turns the pending set into one
//! reload scope. The watch session drives it with tokio timers.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::paths::{normalize_path, ExcelPaths};
use super::types::Source;

/// Entry in the pending set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PendingChange {
    Path(PathBuf),
    /// The event's path could not be normalized
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoalescerState {
    Idle,
    Buffering,
}

/// Reload to run for a flushed batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadScope {
    All,
    Only(Source, PathBuf),
}

impl ReloadScope {
    pub fn changed_path(&self) -> Option<&Path> {
        match self {
            ReloadScope::All => None,
            ReloadScope::Only(_, path) => Some(path),
        }
    }
}

/// Which cached data a debounced unlink clears
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlinkTarget {
    pub path: PathBuf,
    /// `None` when the path matched neither source
    pub source: Option<Source>,
}

pub struct ChangeCoalescer {
    paths: ExcelPaths,
    normalized_groups: Option<PathBuf>,
    normalized_contacts: Option<PathBuf>,
    pending: HashSet<PendingChange>,
    flush_scheduled: bool,
    pending_unlink: Option<PathBuf>,
}

impl ChangeCoalescer {
    pub fn new(paths: ExcelPaths) -> Self {
        ChangeCoalescer {
            normalized_groups: normalize_path(&paths.groups_path),
            normalized_contacts: normalize_path(&paths.contacts_path),
            paths,
            pending: HashSet::new(),
            flush_scheduled: false,
            pending_unlink: None,
        }
    }

    pub fn paths(&self) -> &ExcelPaths {
        &self.paths
    }

    pub fn state(&self) -> CoalescerState {
        if self.flush_scheduled {
            CoalescerState::Buffering
        } else {
            CoalescerState::Idle
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Record an add or change event. Returns `true` only when this event
    /// should start the flush timer; later events in the same window join
    /// the batch without rescheduling.
    pub fn record_change(&mut self, path: &Path) -> bool {
        let entry = match normalize_path(path) {
            Some(normalized) => PendingChange::Path(normalized),
            None => PendingChange::Unknown,
        };
        self.pending.insert(entry);

        if self.flush_scheduled {
            return false;
        }
        self.flush_scheduled = true;
        true
    }

    /// Drain the pending set into a reload scope. `None` when nothing was
    /// pending.
    pub fn flush(&mut self) -> Option<ReloadScope> {
        self.flush_scheduled = false;

        if self.pending.is_empty() {
            return None;
        }

        let has = |normalized: &Option<PathBuf>| {
            normalized
                .as_ref()
                .is_some_and(|p| self.pending.contains(&PendingChange::Path(p.clone())))
        };
        let has_groups = has(&self.normalized_groups);
        let has_contacts = has(&self.normalized_contacts);
        let has_unknown = self.pending.contains(&PendingChange::Unknown);
        self.pending.clear();

        let scope = if has_unknown || (has_groups && has_contacts) {
            ReloadScope::All
        } else if has_groups {
            ReloadScope::Only(Source::Groups, self.paths.groups_path.clone())
        } else if has_contacts {
            ReloadScope::Only(Source::Contacts, self.paths.contacts_path.clone())
        } else {
            ReloadScope::All
        };

        let target = match &scope {
            ReloadScope::Only(_, path) => path.display().to_string(),
            ReloadScope::All if has_unknown || (has_groups && has_contacts) => {
                "multiple Excel files".to_string()
            }
            ReloadScope::All => "an unknown Excel file".to_string(),
        };
        tracing::info!("File changed: {}", target);

        Some(scope)
    }

    /// Record an unlink. The unlink timer restarts on every call and the
    /// latest path wins.
    pub fn record_unlink(&mut self, path: &Path) {
        self.pending_unlink = Some(path.to_path_buf());
    }

    pub fn unlink_pending(&self) -> bool {
        self.pending_unlink.is_some()
    }

    /// Take the debounced unlink and attribute it to a source
    pub fn take_unlink(&mut self) -> Option<UnlinkTarget> {
        let path = self.pending_unlink.take()?;
        tracing::info!("File deleted: {}", path.display());

        let source = normalize_path(&path).and_then(|normalized| self.paths.source_for(&normalized));

        Some(UnlinkTarget { path, source })
    }

    /// Drop everything buffered
    pub fn reset(&mut self) {
        self.pending.clear();
        self.flush_scheduled = false;
        self.pending_unlink = None;
    }
}
