use std::path::{Component, Path, PathBuf};

use super::types::{ExcelError, ExcelResult, Source};
use crate::config::ExcelConfig;

/// Resolved on-disk locations of the two workbooks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcelPaths {
    pub groups_path: PathBuf,
    pub contacts_path: PathBuf,
}

impl ExcelPaths {
    /// Resolve both workbook paths against the configured search order:
    /// `data_dir`, each of `search_dirs`, then the executable's directory.
    /// The first directory where the file exists wins; otherwise the file is
    /// expected under `data_dir`.
    pub fn resolve(config: &ExcelConfig) -> Self {
        let exec_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));

        let candidates: Vec<&Path> = std::iter::once(config.data_dir.as_path())
            .chain(config.search_dirs.iter().map(PathBuf::as_path))
            .chain(exec_dir.as_deref())
            .collect();

        let resolve_existing = |file_name: &str| -> PathBuf {
            candidates
                .iter()
                .map(|dir| dir.join(file_name))
                .find(|path| path.exists())
                .unwrap_or_else(|| config.data_dir.join(file_name))
        };

        ExcelPaths {
            groups_path: resolve_existing(Source::Groups.file_name()),
            contacts_path: resolve_existing(Source::Contacts.file_name()),
        }
    }

    pub fn path_for(&self, source: Source) -> &Path {
        match source {
            Source::Groups => &self.groups_path,
            Source::Contacts => &self.contacts_path,
        }
    }

    /// Which source, if any, a (normalized) path refers to
    pub fn source_for(&self, normalized: &Path) -> Option<Source> {
        Source::ALL
            .into_iter()
            .find(|source| normalize_path(self.path_for(*source)).as_deref() == Some(normalized))
    }
}

/// Normalize a path for comparison: absolute, lexically folded, and
/// lowercased where the filesystem is case-insensitive.
///
/// Returns `None` when the path is empty or cannot be made absolute.
pub fn normalize_path(path: &Path) -> Option<PathBuf> {
    if path.as_os_str().is_empty() {
        return None;
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };

    let mut folded = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                folded.pop();
            }
            other => folded.push(other.as_os_str()),
        }
    }

    if cfg!(windows) {
        Some(PathBuf::from(folded.to_string_lossy().to_lowercase()))
    } else {
        Some(folded)
    }
}

/// Map a caller-supplied file name onto a workbook path. Only the two known
/// workbook names are accepted; directory parts are ignored.
pub fn resolve_excel_file_path(config: &ExcelConfig, filename: &str) -> Option<PathBuf> {
    let base_name = Path::new(filename).file_name()?.to_str()?;
    let source = Source::from_file_name(base_name)?;
    Some(ExcelPaths::resolve(config).path_for(source).to_path_buf())
}

/// Resolve a workbook for handing to an external viewer. Returns `None`,
/// with a warning, for unknown names or missing files.
///
/// Workbooks found outside the configured data directories (the copies
/// shipped next to the executable) are staged into `cache_dir` first, so
/// the viewer never edits the bundled file. If staging fails the bundled
/// path is returned.
pub fn prepare_excel_path_for_opening(config: &ExcelConfig, filename: &str) -> Option<PathBuf> {
    let Some(path) = resolve_excel_file_path(config, filename) else {
        tracing::warn!(filename, "Blocked attempt to open unexpected Excel file");
        return None;
    };

    if !path.exists() {
        tracing::warn!("Requested Excel file not found: {}", path.display());
        return None;
    }

    if !is_bundled(config, &path) {
        return Some(path);
    }

    match stage_workbook(&path, &config.cache_dir) {
        Ok(staged) => Some(staged),
        Err(e) => {
            tracing::error!("Failed to stage bundled Excel file: {}", e);
            Some(path)
        }
    }
}

/// Whether a resolved workbook lies outside `data_dir` and `search_dirs`
fn is_bundled(config: &ExcelConfig, path: &Path) -> bool {
    let Some(path) = normalize_path(path) else {
        return false;
    };

    !std::iter::once(&config.data_dir)
        .chain(config.search_dirs.iter())
        .filter_map(|dir| normalize_path(dir))
        .any(|dir| path.starts_with(dir))
}

/// Copy a workbook into `cache_dir`, replacing any earlier copy
fn stage_workbook(path: &Path, cache_dir: &Path) -> ExcelResult<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| ExcelError::file_not_found(path))?;

    std::fs::create_dir_all(cache_dir)
        .map_err(|e| ExcelError::io(format!("Failed to create {}", cache_dir.display()), e))?;

    let staged = cache_dir.join(file_name);
    std::fs::copy(path, &staged)
        .map_err(|e| ExcelError::io(format!("Failed to copy {} to {}", path.display(), staged.display()), e))?;

    tracing::debug!(from = %path.display(), to = %staged.display(), "Staged Excel file");
    Ok(staged)
}
