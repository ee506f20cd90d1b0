//! Process-wide workbook cache.
//!
//! `ExcelCache` owns the current `CacheSnapshot` and the signature of the
//! bytes each source was last read from. `load_excel_files` is the only path
//! that fills it; unlink handling clears a source through `clear_source`.

use futures::future::OptionFuture;
use std::path::Path;
use std::sync::{Arc, RwLock};

use super::paths::{normalize_path, ExcelPaths};
use super::reader::{read_workbook, NamedRecords, RawRows, RetryPolicy, WorkbookRequest};
use super::types::*;
use crate::config::ExcelConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Signatures {
    groups: Option<String>,
    contacts: Option<String>,
}

#[derive(Debug, Default)]
struct CacheState {
    snapshot: Arc<CacheSnapshot>,
    signatures: Signatures,
}

pub struct ExcelCache {
    config: ExcelConfig,
    state: RwLock<CacheState>,
    /// Held across a reload's read-modify-write so overlapping reloads and
    /// unlink clears apply one at a time.
    reload_lock: tokio::sync::Mutex<()>,
}

impl ExcelCache {
    /// Create an empty cache: no data, no signatures
    pub fn new(config: ExcelConfig) -> Self {
        ExcelCache {
            config,
            state: RwLock::new(CacheState::default()),
            reload_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ExcelConfig {
        &self.config
    }

    /// Current workbook locations
    pub fn paths(&self) -> ExcelPaths {
        ExcelPaths::resolve(&self.config)
    }

    /// Current snapshot. Unchanged reloads keep returning the same `Arc`.
    pub fn get_cached_data(&self) -> Arc<CacheSnapshot> {
        self.read_state(|state| state.snapshot.clone())
    }

    /// Replace the snapshot and forget both signatures, so the next reload
    /// reparses everything.
    pub fn set_cached_data(&self, snapshot: CacheSnapshot) {
        self.write_state(|state| {
            state.snapshot = Arc::new(snapshot);
            state.signatures = Signatures::default();
        });
    }

    /// Reload the workbooks. With `changed_path`, only the source living at
    /// that path is read; anything else is treated as a full reload only
    /// when no path is given.
    pub async fn load_excel_files(&self, changed_path: Option<&Path>) -> ExcelResult<ReloadResult> {
        let _guard = self.reload_lock.lock().await;

        let paths = self.paths();
        let normalized_changed = changed_path.and_then(normalize_path);

        let in_scope = |source: Source| match &normalized_changed {
            None => true,
            Some(changed) => normalize_path(paths.path_for(source)).as_ref() == Some(changed),
        };
        let reload_groups = in_scope(Source::Groups);
        let reload_contacts = in_scope(Source::Contacts);

        let (previous, signatures) =
            self.read_state(|state| (state.snapshot.clone(), state.signatures.clone()));
        let retry = self.config.retry_policy();

        let groups_read: OptionFuture<_> = reload_groups
            .then(|| {
                read_workbook::<RawRows>(request(
                    Source::Groups,
                    &paths,
                    previous.email_data.clone(),
                    signatures.groups.clone(),
                    retry,
                ))
            })
            .into();
        let contacts_read: OptionFuture<_> = reload_contacts
            .then(|| {
                read_workbook::<NamedRecords>(request(
                    Source::Contacts,
                    &paths,
                    previous.contact_data.clone(),
                    signatures.contacts.clone(),
                    retry,
                ))
            })
            .into();

        let (groups, contacts) = tokio::join!(groups_read, contacts_read);
        let groups = groups.transpose()?;
        let contacts = contacts.transpose()?;

        let email_changed = groups
            .as_ref()
            .is_some_and(|g| g.signature != signatures.groups);
        let contact_changed = contacts
            .as_ref()
            .is_some_and(|c| c.signature != signatures.contacts);

        if email_changed || contact_changed {
            // Data and signature move together: a source whose signature
            // stays put keeps its previous data, even if this read failed.
            let snapshot = CacheSnapshot {
                email_data: match &groups {
                    Some(g) if email_changed => g.data.clone(),
                    _ => previous.email_data.clone(),
                },
                contact_data: match &contacts {
                    Some(c) if contact_changed => c.data.clone(),
                    _ => previous.contact_data.clone(),
                },
            };

            self.write_state(|state| {
                state.snapshot = Arc::new(snapshot);
                if email_changed {
                    state.signatures.groups = groups.and_then(|g| g.signature);
                }
                if contact_changed {
                    state.signatures.contacts = contacts.and_then(|c| c.signature);
                }
            });
        }

        let result = ReloadResult::new(email_changed, contact_changed);
        tracing::debug!(
            email_changed = result.email_changed,
            contact_changed = result.contact_changed,
            "Excel reload finished"
        );
        Ok(result)
    }

    /// Empty one source (or both, for `None`) and drop its signature so the
    /// file is reparsed when it comes back.
    pub async fn clear_source(&self, source: Option<Source>) {
        let _guard = self.reload_lock.lock().await;

        self.write_state(|state| {
            let current = state.snapshot.clone();
            let empty_groups = || Arc::new(Vec::new());
            let empty_contacts = || Arc::new(Vec::new());

            state.snapshot = Arc::new(match source {
                Some(Source::Groups) => CacheSnapshot {
                    email_data: empty_groups(),
                    contact_data: current.contact_data.clone(),
                },
                Some(Source::Contacts) => CacheSnapshot {
                    email_data: current.email_data.clone(),
                    contact_data: empty_contacts(),
                },
                None => CacheSnapshot::default(),
            });

            match source {
                Some(Source::Groups) => state.signatures.groups = None,
                Some(Source::Contacts) => state.signatures.contacts = None,
                None => state.signatures = Signatures::default(),
            }
        });
    }

    fn read_state<T>(&self, f: impl FnOnce(&CacheState) -> T) -> T {
        let guard = self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard)
    }

    fn write_state(&self, f: impl FnOnce(&mut CacheState)) {
        let mut guard = self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

fn request<R>(
    source: Source,
    paths: &ExcelPaths,
    fallback: Arc<Vec<R>>,
    fallback_signature: Option<String>,
    retry: RetryPolicy,
) -> WorkbookRequest<R> {
    WorkbookRequest {
        source,
        path: paths.path_for(source).to_path_buf(),
        fallback,
        fallback_signature,
        retry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::excel::test_support::{capture_logs, seed_contacts, seed_date_cell, seed_groups, Fixture};
    use serde_json::json;

    #[tokio::test]
    async fn test_full_then_scoped_reload() {
        let fixture = Fixture::new();
        let cache = fixture.cache();

        let result = cache.load_excel_files(None).await.unwrap();
        assert_eq!(result, ReloadResult::new(true, true));

        let initial = cache.get_cached_data();
        assert_eq!(initial.email_data[1][0], json!("initial@example.com"));
        assert_eq!(
            fixture.contacts_json(&initial),
            json!([{ "Name": "Alice", "Email": "alice@example.com" }])
        );

        seed_contacts(&fixture.contacts_path(), "Bob", "bob@example.com");
        let result = cache
            .load_excel_files(Some(&fixture.contacts_path()))
            .await
            .unwrap();

        assert_eq!(
            result,
            ReloadResult {
                email_changed: false,
                contact_changed: true,
                did_update: true,
            }
        );
        let updated = cache.get_cached_data();
        assert!(Arc::ptr_eq(&updated.email_data, &initial.email_data));
        assert_eq!(
            fixture.contacts_json(&updated),
            json!([{ "Name": "Bob", "Email": "bob@example.com" }])
        );
    }

    #[tokio::test]
    async fn test_unchanged_reload_keeps_snapshot_identity() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        cache.load_excel_files(None).await.unwrap();

        let before = cache.get_cached_data();
        let first = cache.load_excel_files(Some(&fixture.groups_path())).await.unwrap();
        let second = cache.load_excel_files(Some(&fixture.groups_path())).await.unwrap();

        assert_eq!(first, ReloadResult::default());
        assert_eq!(second, ReloadResult::default());
        assert!(Arc::ptr_eq(&before, &cache.get_cached_data()));
    }

    #[tokio::test]
    async fn test_identical_rewrite_is_not_a_change() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        cache.load_excel_files(None).await.unwrap();

        let bytes = std::fs::read(fixture.contacts_path()).unwrap();
        std::fs::write(fixture.contacts_path(), &bytes).unwrap();

        let result = cache
            .load_excel_files(Some(&fixture.contacts_path()))
            .await
            .unwrap();
        assert!(!result.contact_changed);
        assert!(!result.did_update);
    }

    #[tokio::test]
    async fn test_unrelated_path_reloads_nothing() {
        let fixture = Fixture::new();
        let cache = fixture.cache();

        let other = fixture.dir.path().join("other.xlsx");
        let result = cache.load_excel_files(Some(&other)).await.unwrap();

        assert_eq!(result, ReloadResult::default());
        assert!(cache.get_cached_data().email_data.is_empty());
    }

    #[tokio::test]
    async fn test_missing_groups_retains_cache() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        cache.load_excel_files(None).await.unwrap();
        let initial = cache.get_cached_data();

        std::fs::remove_file(fixture.groups_path()).unwrap();
        let (result, logs) =
            capture_logs(cache.load_excel_files(Some(&fixture.groups_path()))).await;

        assert_eq!(result.unwrap(), ReloadResult::default());
        assert_eq!(cache.get_cached_data().email_data, initial.email_data);
        assert!(logs.contains("groups.xlsx not found"), "logs: {}", logs);
    }

    #[tokio::test]
    async fn test_missing_contacts_retains_cache() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        cache.load_excel_files(None).await.unwrap();
        let initial = cache.get_cached_data();

        std::fs::remove_file(fixture.contacts_path()).unwrap();
        let (result, logs) =
            capture_logs(cache.load_excel_files(Some(&fixture.contacts_path()))).await;

        assert_eq!(result.unwrap(), ReloadResult::default());
        assert_eq!(cache.get_cached_data().contact_data, initial.contact_data);
        assert!(logs.contains("contacts.xlsx not found"), "logs: {}", logs);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_retried_next_time() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        std::fs::write(fixture.groups_path(), b"not a workbook").unwrap();

        let result = cache.load_excel_files(None).await.unwrap();
        assert!(!result.email_changed);
        assert!(result.contact_changed);
        assert!(cache.get_cached_data().email_data.is_empty());

        seed_groups(&fixture.groups_path(), "fixed@example.com");
        let result = cache.load_excel_files(Some(&fixture.groups_path())).await.unwrap();
        assert!(result.email_changed);
        assert_eq!(cache.get_cached_data().email_data[1][0], json!("fixed@example.com"));
    }

    #[tokio::test]
    async fn test_failed_read_keeps_data_alongside_signature() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        cache.load_excel_files(None).await.unwrap();
        let initial = cache.get_cached_data();

        // Half-written groups file while contacts really changed
        let groups_bytes = std::fs::read(fixture.groups_path()).unwrap();
        std::fs::write(fixture.groups_path(), &groups_bytes[..groups_bytes.len() / 2]).unwrap();
        seed_contacts(&fixture.contacts_path(), "Bob", "bob@example.com");

        let result = cache.load_excel_files(None).await.unwrap();
        assert_eq!(result, ReloadResult::new(false, true));
        let during = cache.get_cached_data();
        assert!(Arc::ptr_eq(&during.email_data, &initial.email_data));
        assert_eq!(
            fixture.contacts_json(&during),
            json!([{ "Name": "Bob", "Email": "bob@example.com" }])
        );

        std::fs::write(fixture.groups_path(), &groups_bytes).unwrap();
        let result = cache.load_excel_files(None).await.unwrap();
        assert!(!result.did_update);
        assert_eq!(cache.get_cached_data().email_data[1][0], json!("initial@example.com"));
    }

    #[tokio::test]
    async fn test_out_of_range_date_does_not_reject_reload() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        cache.load_excel_files(None).await.unwrap();

        seed_date_cell(&fixture.groups_path(), 1e9);
        seed_contacts(&fixture.contacts_path(), "Bob", "bob@example.com");

        let result = cache.load_excel_files(None).await.unwrap();
        assert_eq!(result, ReloadResult::new(true, true));
        assert_eq!(
            fixture.contacts_json(&cache.get_cached_data()),
            json!([{ "Name": "Bob", "Email": "bob@example.com" }])
        );
    }

    #[tokio::test]
    async fn test_clear_source_resets_signature() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        cache.load_excel_files(None).await.unwrap();
        let before = cache.get_cached_data();

        cache.clear_source(Some(Source::Contacts)).await;
        let cleared = cache.get_cached_data();
        assert!(cleared.contact_data.is_empty());
        assert!(Arc::ptr_eq(&cleared.email_data, &before.email_data));

        // Same bytes as before the clear, but the signature was forgotten
        let result = cache
            .load_excel_files(Some(&fixture.contacts_path()))
            .await
            .unwrap();
        assert!(result.contact_changed);
        assert_eq!(cache.get_cached_data().contact_data, before.contact_data);
    }

    #[tokio::test]
    async fn test_set_cached_data_forces_reparse() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        cache.load_excel_files(None).await.unwrap();

        cache.set_cached_data(CacheSnapshot::new(vec![vec![json!("stale")]], Vec::new()));
        let result = cache.load_excel_files(None).await.unwrap();

        assert!(result.did_update);
        assert_eq!(cache.get_cached_data().email_data[1][0], json!("initial@example.com"));
    }

    #[tokio::test]
    async fn test_concurrent_reloads_apply_once() {
        let fixture = Fixture::new();
        let cache = Arc::new(fixture.cache());

        let (a, b) = tokio::join!(cache.load_excel_files(None), cache.load_excel_files(None));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(a.did_update ^ b.did_update);
    }
}
