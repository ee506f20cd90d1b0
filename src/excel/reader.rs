use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use serde_json::Value;
use std::future::Future;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::signature::compute_signature;
use super::types::*;

/// Bounded retry for reads that hit a locked file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: crate::config::DEFAULT_READ_RETRY_ATTEMPTS,
            delay: Duration::from_millis(crate::config::DEFAULT_READ_RETRY_DELAY_MS),
        }
    }
}

/// Whether an I/O error means another process holds the file
pub fn is_transient_lock(error: &io::Error) -> bool {
    if error.kind() == io::ErrorKind::ResourceBusy {
        return true;
    }

    // ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION
    cfg!(windows) && matches!(error.raw_os_error(), Some(32) | Some(33))
}

/// Run `op` until it succeeds, retrying only transient lock errors.
/// Any other error, or the last locked attempt, is returned as is.
pub async fn retry_on_lock<T, F, Fut>(policy: RetryPolicy, path: &Path, mut op: F) -> io::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_transient_lock(&e) && attempt < policy.attempts => {
                tracing::warn!(
                    "File locked, retrying in {}ms: {}",
                    policy.delay.as_millis(),
                    path.display()
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Read a file's bytes, retrying while it is locked
pub async fn read_file_with_retry(path: &Path, policy: RetryPolicy) -> ExcelResult<Vec<u8>> {
    retry_on_lock(policy, path, || tokio::fs::read(path))
        .await
        .map_err(|e| {
            if is_transient_lock(&e) {
                ExcelError::FileLocked {
                    path: path.to_path_buf(),
                    attempts: policy.attempts,
                }
            } else {
                ExcelError::io(format!("Failed to read {}", path.display()), e)
            }
        })
}

/// How the first sheet of a workbook is turned into rows
pub trait ParseMode: Send + Sync + 'static {
    type Row: Clone + Send + Sync + 'static;

    fn parse_range(range: &Range<Data>) -> Vec<Self::Row>;
}

/// Every sheet row as an array of cell values, header row included
pub struct RawRows;

/// First row names the fields; each later row becomes a record
pub struct NamedRecords;

impl ParseMode for RawRows {
    type Row = GroupRow;

    fn parse_range(range: &Range<Data>) -> Vec<GroupRow> {
        range
            .rows()
            .map(|row| {
                let mut values: GroupRow = row
                    .iter()
                    .map(|cell| convert_cell_value(cell).unwrap_or(Value::Null))
                    .collect();
                while values.last().is_some_and(Value::is_null) {
                    values.pop();
                }
                values
            })
            .collect()
    }
}

impl ParseMode for NamedRecords {
    type Row = ContactRecord;

    fn parse_range(range: &Range<Data>) -> Vec<ContactRecord> {
        let mut rows = range.rows();
        let Some(header_row) = rows.next() else {
            return Vec::new();
        };
        let headers = header_names(header_row);

        rows.filter_map(|row| {
            let record: ContactRecord = headers
                .iter()
                .zip(row.iter())
                .filter_map(|(name, cell)| convert_cell_value(cell).map(|v| (name.clone(), v)))
                .collect();
            (!record.is_empty()).then_some(record)
        })
        .collect()
    }
}

/// Field names from a header row. Blank headers become `__EMPTY`,
/// repeated names get a numeric suffix.
fn header_names(row: &[Data]) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(row.len());

    for cell in row {
        let base = match convert_cell_value(cell) {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => "__EMPTY".to_string(),
        };

        let mut name = base.clone();
        let mut suffix = 0;
        while names.contains(&name) {
            suffix += 1;
            name = format!("{}_{}", base, suffix);
        }
        names.push(name);
    }

    names
}

/// Convert a calamine cell to JSON. Empty cells have no value.
fn convert_cell_value(cell: &Data) -> Option<Value> {
    match cell {
        Data::Empty => None,
        Data::String(s) => Some(Value::String(s.clone())),
        Data::Float(f) => Some(
            serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        ),
        Data::Int(i) => Some(Value::from(*i)),
        Data::Bool(b) => Some(Value::Bool(*b)),
        Data::DateTime(dt) => Some(Value::String(format_excel_datetime(dt.as_f64()))),
        Data::DateTimeIso(s) => Some(Value::String(s.clone())),
        Data::DurationIso(s) => Some(Value::String(s.clone())),
        Data::Error(e) => Some(Value::String(format!("{:?}", e))),
    }
}

/// Format Excel datetime (days since 1899-12-30) to ISO 8601
fn format_excel_datetime(value: f64) -> String {
    let days = value.floor() as i64;
    let time_fraction = value.fract();

    let date = chrono::NaiveDate::from_ymd_opt(1899, 12, 30)
        .zip(chrono::TimeDelta::try_days(days))
        .and_then(|(epoch, offset)| epoch.checked_add_signed(offset));
    let Some(date) = date else {
        return value.to_string();
    };

    let total_seconds = (time_fraction * 86400.0).round() as u32;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    let time = chrono::NaiveTime::from_hms_opt(hours, minutes, seconds).unwrap_or_default();
    let datetime = chrono::NaiveDateTime::new(date, time);

    datetime.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Parse the first sheet of an in-memory workbook
pub fn parse_workbook<M: ParseMode>(bytes: Vec<u8>) -> ExcelResult<Vec<M::Row>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| ExcelError::invalid_format(format!("Failed to open workbook: {}", e)))?;

    let Some(sheet_name) = workbook.sheet_names().first().cloned() else {
        return Ok(Vec::new());
    };

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| ExcelError::invalid_format(format!("Failed to read sheet '{}': {}", sheet_name, e)))?;

    Ok(M::parse_range(&range))
}

/// What happened during a single workbook read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// File absent; cached data kept
    Missing,
    /// Bytes matched the previous signature; parsing skipped
    Unchanged,
    Parsed,
    /// Read or parse failed; data emptied, signature kept
    Failed,
}

/// Everything needed to read one source
#[derive(Debug, Clone)]
pub struct WorkbookRequest<R> {
    pub source: Source,
    pub path: PathBuf,
    pub fallback: Arc<Vec<R>>,
    pub fallback_signature: Option<String>,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct WorkbookData<R> {
    pub data: Arc<Vec<R>>,
    pub signature: Option<String>,
    pub status: ReadStatus,
}

/// Read and parse one workbook. Never fails: a missing file keeps the
/// fallback, and read or parse errors yield empty data with the fallback
/// signature so the next reload tries again.
pub async fn read_workbook<M: ParseMode>(request: WorkbookRequest<M::Row>) -> ExcelResult<WorkbookData<M::Row>> {
    let WorkbookRequest {
        source,
        path,
        fallback,
        fallback_signature,
        retry,
    } = request;

    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        match source {
            Source::Groups => tracing::warn!("groups.xlsx not found; using cached group data"),
            Source::Contacts => tracing::warn!("contacts.xlsx not found; using cached contact data"),
        }
        return Ok(WorkbookData {
            data: fallback,
            signature: fallback_signature,
            status: ReadStatus::Missing,
        });
    }

    let failed = |error: ExcelError, fallback_signature: Option<String>| {
        tracing::error!(path = %path.display(), "Error reading {} file: {}", source.as_str(), error);
        WorkbookData {
            data: Arc::new(Vec::new()),
            signature: fallback_signature,
            status: ReadStatus::Failed,
        }
    };

    let bytes = match read_file_with_retry(&path, retry).await {
        Ok(bytes) => bytes,
        Err(e) => return Ok(failed(e, fallback_signature)),
    };

    let signature = compute_signature(&bytes);

    if fallback_signature.as_deref() == Some(signature.as_str()) && !fallback.is_empty() {
        return Ok(WorkbookData {
            data: fallback,
            signature: Some(signature),
            status: ReadStatus::Unchanged,
        });
    }

    // A panic in the parser is a parse failure like any other
    let parsed = tokio::task::spawn_blocking(move || parse_workbook::<M>(bytes))
        .await
        .unwrap_or_else(|e| Err(ExcelError::from(e)));

    match parsed {
        Ok(rows) => {
            tracing::debug!(path = %path.display(), rows = rows.len(), "Parsed {} workbook", source.as_str());
            Ok(WorkbookData {
                data: Arc::new(rows),
                signature: Some(signature),
                status: ReadStatus::Parsed,
            })
        }
        Err(e) => Ok(failed(e, fallback_signature)),
    }
}
