//! File-per-record mail store.
//!
//! Every sent mail lives in `<dir>/<id:08>.json`. The in-memory collection is
//! replaced wholesale by a background reload; until that finishes the store
//! reports not ready and every accessor returns `None`.

use std::collections::BTreeMap;
use std::collections::btree_map::Values;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::model::{Mail, MailId};
use crate::{Error, Result};

/// Outcome of a reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    /// Records now in memory.
    pub loaded: usize,
    /// Files that could not be parsed.
    pub skipped: usize,
    /// Records migrated to the current schema and re-saved.
    pub upgraded: usize,
    /// Wall time spent loading.
    pub elapsed: Duration,
}

#[derive(Debug)]
struct Collection {
    mails: BTreeMap<MailId, Mail>,
    next_id: u32,
}

#[derive(Debug)]
struct Shared {
    ready: AtomicBool,
    loading: AtomicBool,
    collection: RwLock<Collection>,
}

/// Clears the loading flag when the reload task ends, even by panic.
struct LoadingGuard(Arc<Shared>);

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.0.loading.store(false, Ordering::Release);
    }
}

/// Sole owner of the mail collection and its on-disk mirror.
///
/// Cloning yields another handle to the same collection.
#[derive(Debug, Clone)]
pub struct MailStore {
    dir: PathBuf,
    shared: Arc<Shared>,
}

impl MailStore {
    /// Creates an empty, not-ready store over `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            shared: Arc::new(Shared {
                ready: AtomicBool::new(false),
                loading: AtomicBool::new(false),
                collection: RwLock::new(Collection {
                    mails: BTreeMap::new(),
                    next_id: 1,
                }),
            }),
        }
    }

    /// Record directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether the last reload has completed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// Starts a background reload of every record file.
    ///
    /// The store is not ready until the new collection has been swapped in.
    /// `notify`, if given, receives the report after readiness is set.
    /// Returns `None` when a reload is already running.
    pub fn reload(
        &self,
        notify: Option<oneshot::Sender<ReloadReport>>,
    ) -> Option<JoinHandle<ReloadReport>> {
        if self
            .shared
            .loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Reload requested while another reload is running");
            return None;
        }
        self.shared.ready.store(false, Ordering::Release);

        let dir = self.dir.clone();
        let shared = Arc::clone(&self.shared);
        Some(tokio::spawn(async move {
            let guard = LoadingGuard(Arc::clone(&shared));
            let report = match load_records(&dir).await {
                Ok((mails, report)) => {
                    {
                        let mut collection = shared
                            .collection
                            .write()
                            .unwrap_or_else(PoisonError::into_inner);
                        // Loading skips ids without a successor.
                        collection.next_id = mails
                            .keys()
                            .next_back()
                            .and_then(|id| id.next())
                            .map_or(1, |id| id.0);
                        collection.mails = mails;
                    }
                    shared.ready.store(true, Ordering::Release);
                    info!(
                        "Loaded {} mails in {}ms ({} skipped, {} upgraded)",
                        report.loaded,
                        report.elapsed.as_millis(),
                        report.skipped,
                        report.upgraded
                    );
                    report
                }
                Err(e) => {
                    error!("Failed to load mail from {}: {e}", dir.display());
                    ReloadReport::default()
                }
            };
            drop(guard);
            if let Some(tx) = notify {
                let _ = tx.send(report.clone());
            }
            report
        }))
    }

    fn read(&self) -> Option<RwLockReadGuard<'_, Collection>> {
        self.is_ready().then(|| {
            self.shared
                .collection
                .read()
                .unwrap_or_else(PoisonError::into_inner)
        })
    }

    fn write(&self) -> Option<RwLockWriteGuard<'_, Collection>> {
        self.is_ready().then(|| {
            self.shared
                .collection
                .write()
                .unwrap_or_else(PoisonError::into_inner)
        })
    }

    /// Number of records, or `None` while loading.
    #[must_use]
    pub fn len(&self) -> Option<usize> {
        self.read().map(|c| c.mails.len())
    }

    /// Looks up a mail by id.
    #[must_use]
    pub fn get(&self, id: MailId) -> Option<Mail> {
        self.read()?.mails.get(&id).cloned()
    }

    /// Runs `f` over every record in id order.
    pub fn with_mails<R>(&self, f: impl FnOnce(Values<'_, MailId, Mail>) -> R) -> Option<R> {
        let collection = self.read()?;
        Some(f(collection.mails.values()))
    }

    /// Clones every record matching `filter`, in id order.
    pub fn select(&self, filter: impl Fn(&Mail) -> bool) -> Option<Vec<Mail>> {
        self.with_mails(|mails| mails.filter(|m| filter(m)).cloned().collect())
    }

    /// Applies `f` to a record in place and returns its result with a copy
    /// of the updated record for saving.
    pub fn modify<R>(&self, id: MailId, f: impl FnOnce(&mut Mail) -> R) -> Option<(R, Mail)> {
        let mut collection = self.write()?;
        let mail = collection.mails.get_mut(&id)?;
        let result = f(mail);
        Some((result, mail.clone()))
    }

    /// Reserves the next mail id.
    ///
    /// Returns `None` while loading or once the id space is exhausted.
    pub fn allocate_id(&self) -> Option<MailId> {
        let mut collection = self.write()?;
        let id = MailId(collection.next_id);
        let Some(next) = id.next() else {
            error!("Mail id space exhausted at {id}");
            return None;
        };
        collection.next_id = next.0;
        Some(id)
    }

    /// Inserts a sent mail into memory. Drafts and the last id are refused.
    pub fn append(&self, mail: Mail) -> bool {
        let Some(next) = mail.id().next().filter(|_| !mail.is_draft()) else {
            return false;
        };
        let Some(mut collection) = self.write() else {
            return false;
        };
        collection.next_id = collection.next_id.max(next.0);
        collection.mails.insert(mail.id(), mail);
        true
    }

    /// Writes one record to its file. Drafts are never written.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized or written.
    pub async fn save(&self, mail: &Mail) -> Result<()> {
        if mail.is_draft() {
            debug!("Not saving draft from {}", mail.sender());
            return Ok(());
        }
        write_record(&self.dir, mail).await
    }

    /// Removes a record from memory and deletes its file.
    ///
    /// Returns true if the record was in memory. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] while loading, or an I/O error if the file
    /// exists but cannot be removed.
    pub async fn delete(&self, id: MailId) -> Result<bool> {
        let removed = {
            let mut collection = self.write().ok_or(Error::NotReady)?;
            collection.mails.remove(&id).is_some()
        };
        match tokio::fs::remove_file(self.dir.join(id.file_name())).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!("Deleted mail {id}");
        Ok(removed)
    }
}

async fn write_record(dir: &Path, mail: &Mail) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(mail.id().file_name());
    let tmp = dir.join(format!("{}.tmp", mail.id().file_name()));
    let contents = serde_json::to_vec_pretty(mail)?;
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
}

async fn read_record(path: &Path) -> Result<Mail> {
    let contents = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&contents)?)
}

async fn load_records(dir: &Path) -> Result<(BTreeMap<MailId, Mail>, ReloadReport)> {
    let start = Instant::now();
    tokio::fs::create_dir_all(dir).await?;

    let mut mails = BTreeMap::new();
    let mut report = ReloadReport::default();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        let mut mail = match read_record(&path).await {
            Ok(mail) if mail.is_draft() => {
                warn!("Skipping draft record {}", path.display());
                report.skipped += 1;
                continue;
            }
            Ok(mail) if mail.id().next().is_none() => {
                warn!("Skipping record {} with out-of-range id", path.display());
                report.skipped += 1;
                continue;
            }
            Ok(mail) => mail,
            Err(e) => {
                warn!("Skipping unreadable mail record {}: {e}", path.display());
                report.skipped += 1;
                continue;
            }
        };
        if mail.upgrade() {
            if let Err(e) = write_record(dir, &mail).await {
                error!("Failed to save upgraded mail {}: {e}", mail.id());
            }
            report.upgraded += 1;
        }
        mails.insert(mail.id(), mail);
    }

    report.loaded = mails.len();
    report.elapsed = start.elapsed();
    Ok((mails, report))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::identity::Identity;

    fn sent(id: u32) -> Mail {
        let mut mail = Mail::compose(
            Identity::player("a", "Alice"),
            vec![Identity::player("b", "Bob")],
            Vec::new(),
            vec![format!("mail {id}")],
        );
        mail.id = MailId(id);
        mail.to_total = Some(mail.to.clone());
        mail.attachments_original = Some(Vec::new());
        mail
    }

    async fn loaded(dir: &Path) -> MailStore {
        let store = MailStore::new(dir);
        store.reload(None).unwrap().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_not_ready_before_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = MailStore::new(dir.path());
        assert!(!store.is_ready());
        assert!(store.get(MailId(1)).is_none());
        assert!(store.allocate_id().is_none());
        assert!(!store.append(sent(1)));
        assert!(matches!(store.delete(MailId(1)).await, Err(Error::NotReady)));
    }

    #[tokio::test]
    async fn test_reload_computes_next_id_and_skips_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        write_record(dir.path(), &sent(3)).await.unwrap();
        write_record(dir.path(), &sent(7)).await.unwrap();
        std::fs::write(dir.path().join("00000009.json"), "garbage").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = MailStore::new(dir.path());
        let report = store.reload(None).unwrap().await.unwrap();
        assert_eq!(report.loaded, 2);
        assert_eq!(report.skipped, 1);
        assert!(store.is_ready());
        assert_eq!(store.allocate_id(), Some(MailId(8)));
        assert_eq!(store.allocate_id(), Some(MailId(9)));
    }

    #[tokio::test]
    async fn test_last_id_record_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_record(dir.path(), &sent(2)).await.unwrap();
        write_record(dir.path(), &sent(u32::MAX)).await.unwrap();

        let store = MailStore::new(dir.path());
        let report = store.reload(None).unwrap().await.unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped, 1);
        assert!(store.is_ready());
        assert_eq!(store.allocate_id(), Some(MailId(3)));
        assert!(!store.append(sent(u32::MAX)));

        // A later reload is still accepted.
        let again = store.reload(None).unwrap().await.unwrap();
        assert_eq!(again.loaded, 1);
    }

    #[tokio::test]
    async fn test_allocation_stops_at_id_space_end() {
        let dir = tempfile::tempdir().unwrap();
        let store = loaded(dir.path()).await;
        assert!(store.append(sent(u32::MAX - 1)));
        assert_eq!(store.allocate_id(), None);
    }

    #[tokio::test]
    async fn test_empty_directory_starts_at_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = loaded(&dir.path().join("mail")).await;
        assert_eq!(store.len(), Some(0));
        assert_eq!(store.allocate_id(), Some(MailId(1)));
    }

    #[tokio::test]
    async fn test_save_then_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = loaded(dir.path()).await;
        let mail = sent(1);
        store.save(&mail).await.unwrap();
        assert!(store.append(mail.clone()));
        assert!(dir.path().join("00000001.json").exists());

        let reloaded = loaded(dir.path()).await;
        assert_eq!(reloaded.get(MailId(1)), Some(mail));
    }

    #[tokio::test]
    async fn test_drafts_are_never_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = loaded(dir.path()).await;
        store
            .save(&Mail::draft(Identity::Console))
            .await
            .unwrap();
        assert!(!dir.path().join(MailId::DRAFT.file_name()).exists());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = loaded(dir.path()).await;
        let mail = sent(2);
        store.save(&mail).await.unwrap();
        store.append(mail);

        assert!(store.delete(MailId(2)).await.unwrap());
        assert!(!dir.path().join("00000002.json").exists());
        assert!(!store.delete(MailId(2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_reload_upgrades_legacy_records() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = r#"{
            "id": 4,
            "sender": {"kind": "console"},
            "to": [{"kind": "player", "id": "b", "name": "Bob"}],
            "message": ["old"]
        }"#;
        std::fs::write(dir.path().join("00000004.json"), legacy).unwrap();

        let store = MailStore::new(dir.path());
        let report = store.reload(None).unwrap().await.unwrap();
        assert_eq!(report.upgraded, 1);

        let contents = std::fs::read_to_string(dir.path().join("00000004.json")).unwrap();
        let on_disk: Mail = serde_json::from_str(&contents).unwrap();
        assert_eq!(on_disk.schema_version(), crate::mail::SCHEMA_VERSION);
        assert_eq!(on_disk.to_total().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reload_notifies_after_ready() {
        let dir = tempfile::tempdir().unwrap();
        let store = MailStore::new(dir.path());
        let (tx, rx) = oneshot::channel();
        let handle = store.reload(Some(tx)).unwrap();

        let report = rx.await.unwrap();
        assert_eq!(report.loaded, 0);
        assert!(store.is_ready());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_modify_returns_updated_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = loaded(dir.path()).await;
        store.append(sent(5));

        let bob = Identity::player("b", "Bob");
        let (changed, mail) = store.modify(MailId(5), |m| m.mark_read(&bob)).unwrap();
        assert!(changed);
        assert!(mail.is_read(&bob));
        assert!(store.get(MailId(5)).unwrap().is_read(&bob));
        assert!(store.modify(MailId(99), |_| ()).is_none());
    }
}
