//! Group storage repository.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::model::{EXTERNAL_PREFIX, Group, GroupFile, Membership};
use crate::context::AppContext;
use crate::identity::Identity;
use crate::{Error, Result};

/// Characters that may not appear in a group name.
const FORBIDDEN_NAME_CHARS: &[char] = &['\\', '/', '?', '*', ':', '|', '"', '<', '>', '.'];
/// Maximum group name length, in characters.
const MAX_NAME_LEN: usize = 15;

/// Repository for stored groups plus the virtual and external ones.
///
/// Stored groups live one file per group under the group directory, named
/// by the lower-cased group name.
pub struct GroupRegistry {
    ctx: Arc<AppContext>,
    dir: PathBuf,
    groups: HashMap<String, Group>,
    external: HashMap<String, Group>,
}

impl GroupRegistry {
    /// Create a registry holding only the virtual groups.
    #[must_use]
    pub fn new(ctx: Arc<AppContext>) -> Self {
        let dir = ctx.config.group_dir();
        let mut registry = Self {
            ctx,
            dir,
            groups: HashMap::new(),
            external: HashMap::new(),
        };
        registry.insert_virtual_groups();
        registry
    }

    fn insert_virtual_groups(&mut self) {
        let mode = self.ctx.config.virtual_group_send_mode;
        for membership in [Membership::All, Membership::AllConnected, Membership::AllLogin] {
            let group = Group::virtual_group(membership, mode);
            self.groups.insert(group.key(), group);
        }
    }

    /// Reload every stored group from disk.
    ///
    /// Unreadable files are skipped; outdated files are upgraded and saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the group directory cannot be created or listed.
    pub async fn load(&mut self) -> Result<usize> {
        let start = Instant::now();
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut groups = HashMap::new();
        let mut upgraded = 0usize;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let mut file = match read_group_file(&path).await {
                Ok(file) => file,
                Err(e) => {
                    warn!("Skipping unreadable group file {}: {e}", path.display());
                    continue;
                }
            };
            if file.upgrade() {
                let group = file.clone().into_group();
                if let Err(e) = self.save_group(&group).await {
                    warn!("Failed to save upgraded group {}: {e}", group.name());
                }
                upgraded += 1;
            }
            let group = file.into_group();
            groups.insert(group.key(), group);
        }

        let loaded = groups.len();
        self.groups = groups;
        self.insert_virtual_groups();

        info!(
            "Loaded {loaded} groups in {}ms ({upgraded} upgraded)",
            start.elapsed().as_millis()
        );
        Ok(loaded)
    }

    /// Returns true if `name` may be used for a new group.
    #[must_use]
    pub fn is_valid_name(name: &str) -> bool {
        let len = name.chars().count();
        (1..=MAX_NAME_LEN).contains(&len) && !name.contains(FORBIDDEN_NAME_CHARS)
    }

    /// Add a new stored group and save it.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or taken, or the file write fails.
    pub async fn add_group(&mut self, group: Group) -> Result<()> {
        if !group.is_stored() {
            return Err(Error::GroupReadOnly(group.name().to_string()));
        }
        if !Self::is_valid_name(group.name()) {
            return Err(Error::InvalidGroupName(group.name().to_string()));
        }
        if self.exists(group.name()) {
            return Err(Error::GroupExists(group.name().to_string()));
        }
        self.save_group(&group).await?;
        self.groups.insert(group.key(), group);
        Ok(())
    }

    /// Look up a group by name (case-insensitive).
    ///
    /// External groups are served from the cache of the last
    /// [`refresh_external`](Self::refresh_external).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Group> {
        let key = name.to_lowercase();
        if key.starts_with(EXTERNAL_PREFIX) {
            return self.external.get(&key);
        }
        self.groups.get(&key)
    }

    /// Apply `edit` to a stored group and save it.
    ///
    /// # Errors
    ///
    /// Returns an error if the group is unknown or not stored, if `edit`
    /// fails, or if the file write fails.
    pub async fn update<F>(&mut self, name: &str, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Group) -> Result<()>,
    {
        let key = name.to_lowercase();
        let group = self
            .groups
            .get_mut(&key)
            .ok_or_else(|| Error::GroupNotFound(name.to_string()))?;
        if !group.is_stored() {
            return Err(Error::GroupReadOnly(group.name().to_string()));
        }
        edit(group)?;
        let snapshot = group.clone();
        self.save_group(&snapshot).await
    }

    /// Add a member to a stored group, honouring the member limit.
    ///
    /// # Errors
    ///
    /// See [`update`](Self::update).
    pub async fn add_member(&mut self, name: &str, identity: Identity) -> Result<()> {
        let max = self.ctx.config.max_group_member;
        self.update(name, |group| group.add_member(identity, max))
            .await
    }

    /// Remove a member from a stored group.
    ///
    /// # Errors
    ///
    /// See [`update`](Self::update).
    pub async fn remove_member(&mut self, name: &str, identity: &Identity) -> Result<()> {
        self.update(name, |group| group.remove_member(identity).map(|_| ()))
            .await
    }

    /// Remove a stored group and delete its file.
    ///
    /// Returns false if no such group exists.
    ///
    /// # Errors
    ///
    /// Returns an error for virtual groups or if the file cannot be removed.
    pub async fn remove_group(&mut self, name: &str) -> Result<bool> {
        let key = name.to_lowercase();
        match self.groups.get(&key) {
            None => return Ok(false),
            Some(group) if !group.is_stored() => {
                return Err(Error::GroupReadOnly(group.name().to_string()));
            }
            Some(_) => {}
        }
        self.groups.remove(&key);
        match tokio::fs::remove_file(self.group_path(&key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!("Removed group {name}");
        Ok(true)
    }

    /// Save a stored group to its file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save_group(&self, group: &Group) -> Result<()> {
        if !group.is_stored() {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        let contents = serde_json::to_string_pretty(&GroupFile::from_group(group))?;
        tokio::fs::write(self.group_path(&group.key()), contents).await?;
        Ok(())
    }

    fn group_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Names of all stored and virtual groups.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.groups.values().map(|g| g.name().to_string()).collect()
    }

    /// All stored and virtual groups.
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Whether a stored or virtual group with this name exists.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.groups.contains_key(&name.to_lowercase())
    }

    /// Number of groups owned by `identity`.
    #[must_use]
    pub fn owner_group_count(&self, identity: &Identity) -> usize {
        self.groups
            .values()
            .filter(|g| g.owner() == identity)
            .count()
    }

    /// Whether `identity` may create another group.
    #[must_use]
    pub fn can_make_new_group(&self, identity: &Identity) -> bool {
        self.owner_group_count(identity) < self.ctx.config.max_create_group
    }

    /// Groups `identity` belongs to or may send to, sorted by name.
    #[must_use]
    pub fn groups_for_list(&self, identity: &Identity) -> Vec<&Group> {
        let presence = self.ctx.presence.as_ref();
        let mut list: Vec<&Group> = self
            .groups
            .values()
            .filter(|g| g.is_member(identity, presence) || g.can_send(identity, presence))
            .collect();
        list.sort_by_key(|g| g.key());
        list
    }

    /// Groups `identity` may address mail to: stored and virtual ones sorted
    /// by name, followed by external-provider groups.
    pub fn groups_for_selection(&mut self, identity: &Identity) -> Vec<Group> {
        self.refresh_external();
        let presence = self.ctx.presence.as_ref();

        let mut list: Vec<Group> = self
            .groups
            .values()
            .filter(|g| g.can_send(identity, presence))
            .cloned()
            .collect();
        list.sort_by_key(Group::key);

        let mut external: Vec<Group> = self
            .external
            .values()
            .filter(|g| g.can_send(identity, presence))
            .cloned()
            .collect();
        external.sort_by_key(Group::key);
        list.extend(external);
        list
    }

    /// Refresh the external-provider group cache.
    ///
    /// Without a provider the cache is simply emptied.
    pub fn refresh_external(&mut self) {
        self.external.clear();
        let Some(provider) = self.ctx.group_provider.as_ref() else {
            return;
        };
        let default_mode = self.ctx.config.external_group_send_mode;
        for external in provider.list_external_groups() {
            let mode = external.send_mode.unwrap_or(default_mode);
            let group = Group::external(&external.name, external.members, mode);
            self.external.insert(group.key(), group);
        }
        debug!("Cached {} external groups", self.external.len());
    }
}

async fn read_group_file(path: &Path) -> Result<GroupFile> {
    let contents = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&contents)?)
}
