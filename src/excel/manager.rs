//! Entry points the UI layer talks to: reloads, snapshot reads, pushes, and
//! the watch session that turns file events into reloads.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::broadcast::{UpdateBroadcaster, UpdateSink};
use super::cache::ExcelCache;
use super::coalescer::{ChangeCoalescer, ReloadScope, UnlinkTarget};
use super::types::*;
use super::watcher::{NotifyWatcher, WatchHandle, WatchSource};
use crate::config::ExcelConfig;

pub struct ExcelManager {
    cache: Arc<ExcelCache>,
    broadcaster: Arc<UpdateBroadcaster>,
    session: Mutex<Option<WatchCleanup>>,
}

impl ExcelManager {
    pub fn new(config: ExcelConfig) -> Self {
        ExcelManager {
            cache: Arc::new(ExcelCache::new(config)),
            broadcaster: Arc::new(UpdateBroadcaster::new()),
            session: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &Arc<ExcelCache> {
        &self.cache
    }

    /// Attach the UI surface that receives updates
    pub fn attach_ui(&self, sink: Arc<dyn UpdateSink>) {
        self.broadcaster.attach(sink);
    }

    pub fn detach_ui(&self) {
        self.broadcaster.detach();
    }

    /// Reload everything, or only the workbook at `changed_path`
    pub async fn load_excel_files(&self, changed_path: Option<&Path>) -> ExcelResult<ReloadResult> {
        self.cache.load_excel_files(changed_path).await
    }

    pub fn get_cached_data(&self) -> Arc<CacheSnapshot> {
        self.cache.get_cached_data()
    }

    /// Push the current snapshot to the UI
    pub fn send_excel_update(&self) {
        self.broadcaster.broadcast(self.cache.get_cached_data());
    }

    /// Force the snapshot and forget both signatures
    #[doc(hidden)]
    pub fn set_cached_data(&self, snapshot: CacheSnapshot) {
        self.cache.set_cached_data(snapshot);
    }

    /// Initial load and push, then start watching. Failures are logged.
    pub async fn start(&self) -> Option<WatchCleanup> {
        match self.load_excel_files(None).await {
            Ok(_) => self.send_excel_update(),
            Err(e) => tracing::error!("Failed to load Excel data on startup: {}", e),
        }

        match self.watch_excel_files(None) {
            Ok(cleanup) => Some(cleanup),
            Err(e) => {
                tracing::error!("Failed to watch Excel files: {}", e);
                None
            }
        }
    }

    /// Start a watch session against the current workbook paths, replacing
    /// any active one. Pass `watcher` to use a backend other than `notify`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn watch_excel_files(&self, watcher: Option<WatchSource>) -> ExcelResult<WatchCleanup> {
        let mut session = self.session.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(previous) = session.take() {
            previous.shared.replaced.store(true, Ordering::SeqCst);
            previous.cleanup();
        }

        let source = match watcher {
            Some(source) => source,
            None => NotifyWatcher::spawn(&self.cache.paths())?,
        };

        let cleanup = WatchCleanup {
            shared: Arc::new(SessionShared::default()),
        };

        let watch_session = WatchSession {
            coalescer: ChangeCoalescer::new(self.cache.paths()),
            cache: self.cache.clone(),
            broadcaster: self.broadcaster.clone(),
            debounce: self.cache.config().debounce(),
            shared: cleanup.shared.clone(),
        };
        tokio::spawn(watch_session.run(source));

        *session = Some(cleanup.clone());
        Ok(cleanup)
    }

    /// Stop the active watch session, if any
    pub fn close_watcher(&self) {
        let session = self.session.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(cleanup) = session {
            cleanup.cleanup();
        }
    }

    pub fn is_watching(&self) -> bool {
        self.session
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(WatchCleanup::is_active)
    }
}

#[derive(Default)]
struct SessionShared {
    closed: AtomicBool,
    replaced: AtomicBool,
    shutdown: Notify,
}

/// Tears down one watch session. Cloneable; calling it more than once, or
/// after the session already ended, does nothing.
#[derive(Clone)]
pub struct WatchCleanup {
    shared: Arc<SessionShared>,
}

impl WatchCleanup {
    pub fn cleanup(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            self.shared.shutdown.notify_one();
        }
    }

    pub fn is_active(&self) -> bool {
        !self.shared.closed.load(Ordering::SeqCst)
    }
}

struct WatchSession {
    coalescer: ChangeCoalescer,
    cache: Arc<ExcelCache>,
    broadcaster: Arc<UpdateBroadcaster>,
    debounce: Duration,
    shared: Arc<SessionShared>,
}

impl WatchSession {
    async fn run(mut self, source: WatchSource) {
        let WatchSource { mut events, handle } = source;
        let mut flush_at: Option<Instant> = None;
        let mut unlink_at: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = self.shared.shutdown.notified() => break,

                event = events.recv() => match event {
                    Some(WatchEvent::Add(path)) | Some(WatchEvent::Change(path)) => {
                        if self.coalescer.record_change(&path) {
                            flush_at = Some(Instant::now() + self.debounce);
                        }
                    }
                    Some(WatchEvent::Unlink(path)) => {
                        self.coalescer.record_unlink(&path);
                        unlink_at = Some(Instant::now() + self.debounce);
                    }
                    Some(WatchEvent::Error(message)) => {
                        tracing::error!("Watcher error: {}", message);
                        self.broadcaster.watch_error(message);
                        break;
                    }
                    None => {
                        tracing::debug!("Excel watch event stream ended");
                        break;
                    }
                },

                _ = tokio::time::sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                    flush_at = None;
                    if let Some(scope) = self.coalescer.flush() {
                        self.spawn_reload(scope);
                    }
                }

                _ = tokio::time::sleep_until(unlink_at.unwrap_or_else(Instant::now)), if unlink_at.is_some() => {
                    unlink_at = None;
                    if let Some(target) = self.coalescer.take_unlink() {
                        self.spawn_clear(target);
                    }
                }
            }
        }

        self.shared.closed.store(true, Ordering::SeqCst);
        self.coalescer.reset();
        drop(events);
        close_in_background(handle, self.shared.replaced.load(Ordering::SeqCst));
    }

    fn spawn_reload(&self, scope: ReloadScope) {
        let cache = self.cache.clone();
        let broadcaster = self.broadcaster.clone();

        tokio::spawn(async move {
            match cache.load_excel_files(scope.changed_path()).await {
                Ok(result) if result.did_update => broadcaster.broadcast(cache.get_cached_data()),
                Ok(_) => {}
                Err(e) => tracing::error!("Failed to reload Excel data after change: {}", e),
            }
        });
    }

    fn spawn_clear(&self, target: UnlinkTarget) {
        let cache = self.cache.clone();
        let broadcaster = self.broadcaster.clone();

        tokio::spawn(async move {
            cache.clear_source(target.source).await;
            broadcaster.broadcast(cache.get_cached_data());
        });
    }
}

/// Close a watch handle off the session task; failures are only logged
fn close_in_background(mut handle: Box<dyn WatchHandle>, replaced: bool) {
    tokio::task::spawn_blocking(move || {
        if let Err(e) = handle.close() {
            if replaced {
                tracing::error!("Failed to close previous Excel watcher: {}", e);
            } else {
                tracing::error!("Failed to close Excel watcher: {}", e);
            }
        }
    });
}
