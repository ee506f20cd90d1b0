//! Excel workbook cache and change reconciliation.
//!
//! This module provides:
//! - Content signatures for workbook bytes
//! - Reading `groups.xlsx` and `contacts.xlsx` with lock retries
//! - An incremental cache that only reparses what changed
//! - Coalescing of file watch events into scoped reloads
//! - Pushing snapshots to an attached UI surface

pub mod broadcast;
pub mod cache;
pub mod coalescer;
pub mod manager;
pub mod paths;
pub mod reader;
pub mod signature;
pub mod types;
pub mod watcher;
pub mod writer;

#[cfg(test)]
mod test_support;

// Re-export commonly used types and functions
pub use broadcast::{ChannelSink, UiMessage, UpdateBroadcaster, UpdateSink, EXCEL_DATA_UPDATED, EXCEL_WATCH_ERROR};
pub use cache::ExcelCache;
pub use coalescer::{ChangeCoalescer, ReloadScope};
pub use manager::{ExcelManager, WatchCleanup};
pub use paths::{normalize_path, prepare_excel_path_for_opening, resolve_excel_file_path, ExcelPaths};
pub use reader::{read_workbook, RetryPolicy};
pub use signature::compute_signature;
pub use types::*;
pub use watcher::{ManualWatcher, ManualWatcherController, NotifyWatcher, WatchHandle, WatchSource};
pub use writer::{write_sample_workbooks, write_workbook};
