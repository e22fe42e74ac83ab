//! Draft manager.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::Result;
use crate::identity::Identity;
use crate::mail::Mail;

/// One draft per identity, persisted to a single recovery file at shutdown.
#[derive(Debug)]
pub struct DraftManager {
    path: PathBuf,
    drafts: HashMap<String, Mail>,
}

impl DraftManager {
    /// Creates an empty manager backed by the recovery file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            drafts: HashMap::new(),
        }
    }

    /// Recovery file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the identity's draft, creating an empty one if needed.
    pub fn get_or_create(&mut self, identity: &Identity) -> &mut Mail {
        self.drafts
            .entry(identity.key())
            .or_insert_with(|| Mail::draft(identity.clone()))
    }

    /// The identity's draft, if any.
    #[must_use]
    pub fn get(&self, identity: &Identity) -> Option<&Mail> {
        self.drafts.get(&identity.key())
    }

    /// The identity's draft for editing, if any.
    pub fn get_mut(&mut self, identity: &Identity) -> Option<&mut Mail> {
        self.drafts.get_mut(&identity.key())
    }

    /// Removes and returns the identity's draft, e.g. to send it.
    pub fn take(&mut self, identity: &Identity) -> Option<Mail> {
        self.drafts.remove(&identity.key())
    }

    /// Discards the identity's draft. Returns true if there was one.
    pub fn clear(&mut self, identity: &Identity) -> bool {
        self.take(identity).is_some()
    }

    /// Number of outstanding drafts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    /// Returns true if no drafts are outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }

    /// Writes every outstanding draft to the recovery file.
    ///
    /// With no drafts outstanding nothing is written.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn persist_all(&self) -> Result<usize> {
        if self.drafts.is_empty() {
            debug!("No drafts to persist");
            return Ok(0);
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let ordered: BTreeMap<&str, &Mail> = self
            .drafts
            .iter()
            .map(|(key, mail)| (key.as_str(), mail))
            .collect();
        let contents = serde_json::to_string_pretty(&ordered)?;
        tokio::fs::write(&self.path, contents).await?;
        info!("Persisted {} drafts to {}", ordered.len(), self.path.display());
        Ok(ordered.len())
    }

    /// Loads drafts from the recovery file, then deletes it.
    ///
    /// A missing file restores nothing. Entries that are not drafts are
    /// ignored. On a parse failure the file is left in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or removed.
    pub async fn restore_all(&mut self) -> Result<usize> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let saved: BTreeMap<String, Mail> = serde_json::from_str(&contents)?;

        let mut restored = 0;
        for (key, mail) in saved {
            if !mail.is_draft() {
                warn!("Ignoring sent mail {} in draft recovery file", mail.id());
                continue;
            }
            self.drafts.insert(key, mail);
            restored += 1;
        }
        tokio::fs::remove_file(&self.path).await?;
        info!("Restored {restored} drafts");
        Ok(restored)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mail::ItemStack;

    fn alice() -> Identity {
        Identity::player("a", "Alice")
    }

    #[test]
    fn test_one_draft_per_identity() {
        let mut drafts = DraftManager::new("drafts.json");
        drafts
            .get_or_create(&alice())
            .set_message_line(0, "hello", 15)
            .unwrap();
        assert_eq!(drafts.get_or_create(&alice()).message(), ["hello"]);
        assert_eq!(drafts.len(), 1);

        assert!(drafts.clear(&alice()));
        assert!(!drafts.clear(&alice()));
        assert!(drafts.get(&alice()).is_none());
    }

    #[test]
    fn test_renamed_player_keeps_draft() {
        let mut drafts = DraftManager::new("drafts.json");
        drafts.get_or_create(&alice());
        assert!(drafts.get(&Identity::player("a", "Alicia")).is_some());
    }

    #[tokio::test]
    async fn test_persist_then_restore_is_single_use() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drafts.json");

        let mut drafts = DraftManager::new(&path);
        let draft = drafts.get_or_create(&alice());
        draft.add_recipient(Identity::Console, 10).unwrap();
        draft.add_attachment(ItemStack::new("stone", 8)).unwrap();
        drafts.get_or_create(&Identity::command_block("door"));
        assert_eq!(drafts.persist_all().await.unwrap(), 2);

        let mut restored = DraftManager::new(&path);
        assert_eq!(restored.restore_all().await.unwrap(), 2);
        assert!(!path.exists());
        assert_eq!(restored.get(&alice()), drafts.get(&alice()));

        let mut again = DraftManager::new(&path);
        assert_eq!(again.restore_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_recovery_file_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drafts.json");
        std::fs::write(&path, "not json").unwrap();

        let mut drafts = DraftManager::new(&path);
        assert!(drafts.restore_all().await.is_err());
        assert!(path.exists());
        assert!(drafts.is_empty());
    }

    #[tokio::test]
    async fn test_persist_nothing_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drafts.json");
        assert_eq!(DraftManager::new(&path).persist_all().await.unwrap(), 0);
        assert!(!path.exists());
    }
}
