//! Shared fixtures for the excel tests

use serde_json::Value;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::instrument::WithSubscriber;

use super::cache::ExcelCache;
use super::types::CacheSnapshot;
use super::writer::write_workbook;
use crate::config::ExcelConfig;

pub fn seed_groups(path: &Path, email: &str) {
    write_workbook(path, &[vec!["email"], vec![email]]).unwrap();
}

pub fn seed_contacts(path: &Path, name: &str, email: &str) {
    write_workbook(path, &[vec!["Name", "Email"], vec![name, email]]).unwrap();
}

/// Groups workbook whose only value is a date-formatted number
pub fn seed_date_cell(path: &Path, value: f64) {
    let mut book = umya_spreadsheet::new_file();
    let sheet = book.get_sheet_by_name_mut("Sheet1").unwrap();
    sheet.get_cell_mut("A1").set_value_string("email");
    sheet.get_cell_mut("A2").set_value_number(value);
    sheet
        .get_style_mut("A2")
        .get_number_format_mut()
        .set_format_code("yyyy-mm-dd");
    umya_spreadsheet::writer::xlsx::write(&book, path).unwrap();
}

/// Temp directory seeded with one group address and one contact
pub struct Fixture {
    pub dir: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let fixture = Fixture {
            dir: tempfile::tempdir().unwrap(),
        };
        seed_groups(&fixture.groups_path(), "initial@example.com");
        seed_contacts(&fixture.contacts_path(), "Alice", "alice@example.com");
        fixture
    }

    pub fn groups_path(&self) -> PathBuf {
        self.dir.path().join("groups.xlsx")
    }

    pub fn contacts_path(&self) -> PathBuf {
        self.dir.path().join("contacts.xlsx")
    }

    pub fn config(&self) -> ExcelConfig {
        ExcelConfig {
            debounce_ms: 50,
            read_retry_delay_ms: 10,
            cache_dir: self.dir.path().join("cache"),
            ..ExcelConfig::with_data_dir(self.dir.path())
        }
    }

    pub fn cache(&self) -> ExcelCache {
        ExcelCache::new(self.config())
    }

    pub fn contacts_json(&self, snapshot: &CacheSnapshot) -> Value {
        Value::Array(
            snapshot
                .contact_data
                .iter()
                .cloned()
                .map(Value::Object)
                .collect(),
        )
    }
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run a future with a subscriber that records formatted log lines
pub async fn capture_logs<F: Future>(future: F) -> (F::Output, String) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();

    let output = future.with_subscriber(subscriber).await;
    let logs = String::from_utf8_lossy(&buffer.0.lock().unwrap()).into_owned();
    (output, logs)
}
