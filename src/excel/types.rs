use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// File name of the groups workbook
pub const GROUPS_FILE_NAME: &str = "groups.xlsx";
/// File name of the contacts workbook
pub const CONTACTS_FILE_NAME: &str = "contacts.xlsx";

/// One row of the groups grid. Column position is the category.
pub type GroupRow = Vec<serde_json::Value>;

/// One contact, keyed by the contacts header row
pub type ContactRecord = serde_json::Map<String, serde_json::Value>;

/// The two spreadsheet sources the cache manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Groups,
    Contacts,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::Groups, Source::Contacts];

    pub fn file_name(&self) -> &'static str {
        match self {
            Source::Groups => GROUPS_FILE_NAME,
            Source::Contacts => CONTACTS_FILE_NAME,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Groups => "groups",
            Source::Contacts => "contacts",
        }
    }

    /// Match a bare file name against the known sources
    pub fn from_file_name(name: &str) -> Option<Self> {
        Source::ALL.into_iter().find(|s| s.file_name() == name)
    }
}

/// Externally visible view of the cache.
///
/// Replaced wholesale on every mutation, so a reader holding an `Arc` to one
/// snapshot never observes a mix of two reloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    pub email_data: Arc<Vec<GroupRow>>,
    pub contact_data: Arc<Vec<ContactRecord>>,
}

impl CacheSnapshot {
    pub fn new(email_data: Vec<GroupRow>, contact_data: Vec<ContactRecord>) -> Self {
        CacheSnapshot {
            email_data: Arc::new(email_data),
            contact_data: Arc::new(contact_data),
        }
    }
}

/// Outcome of a reload call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadResult {
    pub email_changed: bool,
    pub contact_changed: bool,
    pub did_update: bool,
}

impl ReloadResult {
    pub fn new(email_changed: bool, contact_changed: bool) -> Self {
        ReloadResult {
            email_changed,
            contact_changed,
            did_update: email_changed || contact_changed,
        }
    }
}

/// Raw event from a file watch backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Add(PathBuf),
    Change(PathBuf),
    Unlink(PathBuf),
    Error(String),
}

impl WatchEvent {
    pub fn path(&self) -> Option<&Path> {
        match self {
            WatchEvent::Add(p) | WatchEvent::Change(p) | WatchEvent::Unlink(p) => Some(p),
            WatchEvent::Error(_) => None,
        }
    }
}

/// Result type for excel operations
pub type ExcelResult<T> = Result<T, ExcelError>;

/// Excel-specific errors
#[derive(Debug, Error)]
pub enum ExcelError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("File locked after {attempts} attempts: {path}")]
    FileLocked { path: PathBuf, attempts: u32 },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Read(String),

    #[error("Invalid workbook: {0}")]
    InvalidFormat(String),

    #[error("{0}")]
    Write(String),

    #[error("{0}")]
    Watch(String),

    #[error("Invalid configuration at {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl ExcelError {
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        ExcelError::FileNotFound(path.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ExcelError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn read_error(message: impl Into<String>) -> Self {
        ExcelError::Read(message.into())
    }

    pub fn invalid_format(message: impl Into<String>) -> Self {
        ExcelError::InvalidFormat(message.into())
    }

    pub fn write_error(message: impl Into<String>) -> Self {
        ExcelError::Write(message.into())
    }

    pub fn watch_error(message: impl Into<String>) -> Self {
        ExcelError::Watch(message.into())
    }
}
