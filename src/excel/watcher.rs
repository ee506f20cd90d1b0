use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use super::paths::{normalize_path, ExcelPaths};
use super::types::*;

/// Handle to a running watch backend. Closing stops event delivery.
pub trait WatchHandle: Send + 'static {
    fn close(&mut self) -> ExcelResult<()>;
}

/// A watch backend: its event stream plus the handle that stops it
pub struct WatchSource {
    pub events: UnboundedReceiver<WatchEvent>,
    pub handle: Box<dyn WatchHandle>,
}

/// Watches the workbooks through `notify`.
///
/// Each workbook's parent directory is watched non-recursively so deletes
/// and re-creates are seen; only events for the two workbooks are forwarded.
pub struct NotifyWatcher {
    watcher: Option<RecommendedWatcher>,
    dirs: Vec<PathBuf>,
}

impl NotifyWatcher {
    /// Start watching both workbook locations
    pub fn spawn(paths: &ExcelPaths) -> ExcelResult<WatchSource> {
        let (tx, rx) = unbounded_channel();

        let targets: Vec<WatchTarget> = Source::ALL
            .into_iter()
            .map(|source| WatchTarget::new(paths.path_for(source)))
            .collect();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| forward(res, &targets, &tx),
            Config::default(),
        )
        .map_err(|e| ExcelError::watch_error(format!("Failed to create watcher: {}", e)))?;

        let mut dirs: Vec<PathBuf> = Vec::new();
        for source in Source::ALL {
            let dir = paths
                .path_for(source)
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            if dirs.contains(&dir) {
                continue;
            }

            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(|e| ExcelError::watch_error(format!("Failed to watch {}: {}", dir.display(), e)))?;
            tracing::debug!(dir = %dir.display(), "Watching Excel directory");
            dirs.push(dir);
        }

        Ok(WatchSource {
            events: rx,
            handle: Box::new(NotifyWatcher {
                watcher: Some(watcher),
                dirs,
            }),
        })
    }
}

impl WatchHandle for NotifyWatcher {
    fn close(&mut self) -> ExcelResult<()> {
        let Some(mut watcher) = self.watcher.take() else {
            return Ok(());
        };

        let mut first_error = None;
        for dir in self.dirs.drain(..) {
            if let Err(e) = watcher.unwatch(&dir) {
                first_error.get_or_insert_with(|| {
                    ExcelError::watch_error(format!("Failed to unwatch {}: {}", dir.display(), e))
                });
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

/// A workbook path plus the spellings the OS may report it under
struct WatchTarget {
    path: PathBuf,
    aliases: Vec<PathBuf>,
}

impl WatchTarget {
    fn new(path: &Path) -> Self {
        let mut aliases: Vec<PathBuf> = normalize_path(path).into_iter().collect();

        // Backends may report the directory with symlinks resolved
        let canonical = path
            .parent()
            .and_then(|dir| dir.canonicalize().ok())
            .zip(path.file_name())
            .and_then(|(dir, name)| normalize_path(&dir.join(name)));
        if let Some(canonical) = canonical {
            if !aliases.contains(&canonical) {
                aliases.push(canonical);
            }
        }

        WatchTarget {
            path: path.to_path_buf(),
            aliases,
        }
    }

    fn matches(&self, path: &Path) -> bool {
        normalize_path(path).is_some_and(|p| self.aliases.contains(&p))
    }
}

/// Forward one raw notify result as watch events for the target files,
/// reported under the configured workbook path.
fn forward(res: notify::Result<Event>, targets: &[WatchTarget], tx: &UnboundedSender<WatchEvent>) {
    match res {
        Ok(event) => {
            for watch_event in map_event(&event) {
                let Some(target) = watch_event
                    .path()
                    .and_then(|p| targets.iter().find(|t| t.matches(p)))
                else {
                    continue;
                };

                let rewritten = match watch_event {
                    WatchEvent::Add(_) => WatchEvent::Add(target.path.clone()),
                    WatchEvent::Change(_) => WatchEvent::Change(target.path.clone()),
                    WatchEvent::Unlink(_) => WatchEvent::Unlink(target.path.clone()),
                    other => other,
                };
                let _ = tx.send(rewritten);
            }
        }
        Err(e) => {
            let _ = tx.send(WatchEvent::Error(e.to_string()));
        }
    }
}

/// Translate a notify event into add/change/unlink events
fn map_event(event: &Event) -> Vec<WatchEvent> {
    let paths = event.paths.iter().cloned();

    match event.kind {
        EventKind::Create(_) => paths.map(WatchEvent::Add).collect(),
        EventKind::Remove(_) => paths.map(WatchEvent::Unlink).collect(),
        // Metadata-only changes (mtime/atime/chmod) carry no new content
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => paths.map(WatchEvent::Unlink).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => paths.map(WatchEvent::Add).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut events = Vec::new();
            if let Some(from) = event.paths.first() {
                events.push(WatchEvent::Unlink(from.clone()));
            }
            if let Some(to) = event.paths.get(1) {
                events.push(WatchEvent::Add(to.clone()));
            }
            events
        }
        EventKind::Modify(_) => paths.map(WatchEvent::Change).collect(),
        _ => Vec::new(),
    }
}

/// Watch backend fed by hand, for embedders with their own change source
/// and for tests.
pub struct ManualWatcher {
    closed: Arc<AtomicBool>,
}

/// Sending side of a `ManualWatcher`
#[derive(Clone)]
pub struct ManualWatcherController {
    sender: UnboundedSender<WatchEvent>,
    closed: Arc<AtomicBool>,
}

impl ManualWatcher {
    pub fn source() -> (ManualWatcherController, WatchSource) {
        let (sender, events) = unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let controller = ManualWatcherController {
            sender,
            closed: closed.clone(),
        };
        let source = WatchSource {
            events,
            handle: Box::new(ManualWatcher { closed }),
        };
        (controller, source)
    }
}

impl WatchHandle for ManualWatcher {
    fn close(&mut self) -> ExcelResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl ManualWatcherController {
    /// Deliver an event; returns `false` once the session has gone away
    pub fn emit(&self, event: WatchEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    pub fn change(&self, path: impl Into<PathBuf>) -> bool {
        self.emit(WatchEvent::Change(path.into()))
    }

    pub fn add(&self, path: impl Into<PathBuf>) -> bool {
        self.emit(WatchEvent::Add(path.into()))
    }

    pub fn unlink(&self, path: impl Into<PathBuf>) -> bool {
        self.emit(WatchEvent::Unlink(path.into()))
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.emit(WatchEvent::Error(message.into()))
    }

    /// Whether the session closed this watcher's handle
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
