use std::path::{Path, PathBuf};
use umya_spreadsheet::{new_file, writer};

use super::types::{ExcelError, ExcelResult, Source};

const SHEET_NAME: &str = "Sheet1";

/// Write a single-sheet workbook from string rows. Empty strings leave the
/// cell blank.
pub fn write_workbook<S: AsRef<str>>(path: &Path, rows: &[Vec<S>]) -> ExcelResult<()> {
    let mut book = new_file();

    let worksheet = book
        .get_sheet_by_name_mut(SHEET_NAME)
        .ok_or_else(|| ExcelError::write_error(format!("Sheet not found: {}", SHEET_NAME)))?;

    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, value) in row.iter().enumerate() {
            let value = value.as_ref();
            if value.is_empty() {
                continue;
            }
            // Excel uses 1-based indexing
            let cell = worksheet.get_cell_mut((col_idx as u32 + 1, row_idx as u32 + 1));
            cell.set_value_string(value);
        }
    }

    writer::xlsx::write(&book, path)
        .map_err(|e| ExcelError::write_error(format!("Failed to save workbook {}: {}", path.display(), e)))
}

/// Template rows for a fresh groups workbook
fn sample_groups() -> Vec<Vec<&'static str>> {
    vec![
        vec!["Network", "Database", "On Call"],
        vec!["net-team@example.com", "dba-team@example.com", "oncall@example.com"],
        vec!["net-lead@example.com", "", "pager@example.com"],
    ]
}

/// Template rows for a fresh contacts workbook
fn sample_contacts() -> Vec<Vec<&'static str>> {
    vec![
        vec!["Name", "Title", "Email", "Phone"],
        vec!["Alice Example", "Network Engineer", "alice@example.com", "555-0100"],
        vec!["Bob Example", "Database Administrator", "bob@example.com", "555-0101"],
    ]
}

/// Write template workbooks into `dir`. Existing files are kept unless
/// `overwrite` is set. Returns the paths that were written.
pub fn write_sample_workbooks(dir: &Path, overwrite: bool) -> ExcelResult<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .map_err(|e| ExcelError::io(format!("Failed to create {}", dir.display()), e))?;

    let mut written = Vec::new();

    for source in Source::ALL {
        let path = dir.join(source.file_name());
        if path.exists() && !overwrite {
            tracing::info!("Keeping existing {}", path.display());
            continue;
        }

        let rows = match source {
            Source::Groups => sample_groups(),
            Source::Contacts => sample_contacts(),
        };
        write_workbook(&path, &rows)?;
        written.push(path);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_sample_workbooks_keeps_existing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("groups.xlsx"), b"keep").unwrap();

        let written = write_sample_workbooks(dir.path(), false).unwrap();

        assert_eq!(written, vec![dir.path().join("contacts.xlsx")]);
        assert_eq!(std::fs::read(dir.path().join("groups.xlsx")).unwrap(), b"keep");
    }

    #[test]
    fn test_write_sample_workbooks_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("groups.xlsx"), b"stale").unwrap();

        let written = write_sample_workbooks(dir.path(), true).unwrap();

        assert_eq!(written.len(), 2);
        assert_ne!(std::fs::read(dir.path().join("groups.xlsx")).unwrap(), b"stale");
    }
}
