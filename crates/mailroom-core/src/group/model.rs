//! Group data models.

use serde::{Deserialize, Serialize};

use crate::context::Presence;
use crate::identity::Identity;
use crate::{Error, Result};

/// Reserved name of the broadcast group.
pub const ALL_GROUP: &str = "All";
/// Reserved name of the group of connected identities.
pub const ALL_CONNECTED_GROUP: &str = "AllConnected";
/// Reserved name of the group of identities that have ever logged in.
pub const ALL_LOGIN_GROUP: &str = "AllLogin";
/// Name prefix of groups supplied by an external provider.
pub const EXTERNAL_PREFIX: &str = "ext:";

/// Current on-disk schema version of a group file.
pub const GROUP_SCHEMA_VERSION: u32 = 2;

const fn legacy_version() -> u32 {
    1
}

/// Who may perform an action on a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Only the owner.
    Owner,
    /// Members and the owner.
    #[default]
    Member,
    /// Anyone.
    Everyone,
}

impl PermissionMode {
    /// Parse from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "owner" => Some(Self::Owner),
            "member" => Some(Self::Member),
            "everyone" => Some(Self::Everyone),
            _ => None,
        }
    }

    /// Convert to string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Member => "member",
            Self::Everyone => "everyone",
        }
    }
}

/// Where a group's members come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    /// File-backed group with an explicit member list.
    Stored(Vec<Identity>),
    /// Every known identity.
    All,
    /// Every connected identity.
    AllConnected,
    /// Every identity that has ever logged in.
    AllLogin,
    /// Members reported by the external group provider.
    External(Vec<Identity>),
}

/// A named recipient aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    name: String,
    owner: Identity,
    membership: Membership,
    send_mode: PermissionMode,
    modify_mode: PermissionMode,
    dissolve_mode: PermissionMode,
}

impl Group {
    /// Creates a stored group whose only member is its owner.
    #[must_use]
    pub fn new(name: impl Into<String>, owner: Identity) -> Self {
        Self {
            name: name.into(),
            membership: Membership::Stored(vec![owner.clone()]),
            owner,
            send_mode: PermissionMode::Member,
            modify_mode: PermissionMode::Owner,
            dissolve_mode: PermissionMode::Owner,
        }
    }

    /// Creates one of the virtual groups, owned by the console.
    #[must_use]
    pub fn virtual_group(membership: Membership, send_mode: PermissionMode) -> Self {
        let name = match membership {
            Membership::AllConnected => ALL_CONNECTED_GROUP,
            Membership::AllLogin => ALL_LOGIN_GROUP,
            _ => ALL_GROUP,
        };
        Self {
            name: name.to_string(),
            owner: Identity::Console,
            membership,
            send_mode,
            modify_mode: PermissionMode::Owner,
            dissolve_mode: PermissionMode::Owner,
        }
    }

    /// Creates a group mirrored from the external provider.
    #[must_use]
    pub fn external(name: &str, members: Vec<Identity>, send_mode: PermissionMode) -> Self {
        Self {
            name: format!("{EXTERNAL_PREFIX}{name}"),
            owner: Identity::Console,
            membership: Membership::External(members),
            send_mode,
            modify_mode: PermissionMode::Owner,
            dissolve_mode: PermissionMode::Owner,
        }
    }

    /// Group name as entered.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lookup key: the lower-cased name.
    #[must_use]
    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }

    /// Group owner.
    #[must_use]
    pub const fn owner(&self) -> &Identity {
        &self.owner
    }

    /// Membership source.
    #[must_use]
    pub const fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Send permission mode.
    #[must_use]
    pub const fn send_mode(&self) -> PermissionMode {
        self.send_mode
    }

    /// Modify permission mode.
    #[must_use]
    pub const fn modify_mode(&self) -> PermissionMode {
        self.modify_mode
    }

    /// Dissolve permission mode.
    #[must_use]
    pub const fn dissolve_mode(&self) -> PermissionMode {
        self.dissolve_mode
    }

    /// Returns true for file-backed groups.
    #[must_use]
    pub const fn is_stored(&self) -> bool {
        matches!(self.membership, Membership::Stored(_))
    }

    /// Explicit members; empty for virtual groups.
    #[must_use]
    pub fn members(&self) -> &[Identity] {
        match &self.membership {
            Membership::Stored(members) | Membership::External(members) => members,
            _ => &[],
        }
    }

    /// Current members, computing virtual membership on demand.
    #[must_use]
    pub fn resolve_members(&self, presence: &dyn Presence) -> Vec<Identity> {
        match &self.membership {
            Membership::Stored(members) | Membership::External(members) => members.clone(),
            Membership::All => presence.known(),
            Membership::AllConnected => presence.online(),
            Membership::AllLogin => presence.ever_logged_in(),
        }
    }

    /// Whether `identity` is currently a member.
    #[must_use]
    pub fn is_member(&self, identity: &Identity, presence: &dyn Presence) -> bool {
        match &self.membership {
            Membership::Stored(members) | Membership::External(members) => {
                members.contains(identity)
            }
            Membership::All => true,
            _ => self.resolve_members(presence).contains(identity),
        }
    }

    fn permits(&self, mode: PermissionMode, identity: &Identity, presence: &dyn Presence) -> bool {
        match mode {
            PermissionMode::Owner => self.owner == *identity,
            PermissionMode::Member => {
                self.owner == *identity || self.is_member(identity, presence)
            }
            PermissionMode::Everyone => true,
        }
    }

    /// Whether `identity` may address mail to this group.
    #[must_use]
    pub fn can_send(&self, identity: &Identity, presence: &dyn Presence) -> bool {
        self.permits(self.send_mode, identity, presence)
    }

    /// Whether `identity` may change members or settings.
    #[must_use]
    pub fn can_modify(&self, identity: &Identity, presence: &dyn Presence) -> bool {
        self.is_stored() && self.permits(self.modify_mode, identity, presence)
    }

    /// Whether `identity` may dissolve the group.
    #[must_use]
    pub fn can_dissolve(&self, identity: &Identity, presence: &dyn Presence) -> bool {
        self.is_stored() && self.permits(self.dissolve_mode, identity, presence)
    }

    fn stored_members_mut(&mut self) -> Result<&mut Vec<Identity>> {
        match &mut self.membership {
            Membership::Stored(members) => Ok(members),
            _ => Err(Error::GroupReadOnly(self.name.clone())),
        }
    }

    /// Adds a member. Adding an existing member is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error for non-stored groups or when the group is full.
    pub fn add_member(&mut self, identity: Identity, max: usize) -> Result<()> {
        let members = self.stored_members_mut()?;
        if members.contains(&identity) {
            return Ok(());
        }
        if members.len() >= max {
            return Err(Error::LimitExceeded {
                what: "group members",
                max,
            });
        }
        members.push(identity);
        Ok(())
    }

    /// Removes a member. The owner is never removed.
    ///
    /// Returns true if a member was removed.
    ///
    /// # Errors
    ///
    /// Returns an error for non-stored groups.
    pub fn remove_member(&mut self, identity: &Identity) -> Result<bool> {
        if self.owner == *identity {
            return Ok(false);
        }
        let members = self.stored_members_mut()?;
        let before = members.len();
        members.retain(|member| member != identity);
        Ok(before != members.len())
    }

    /// Sets the send mode.
    ///
    /// # Errors
    ///
    /// Returns an error for non-stored groups.
    pub fn set_send_mode(&mut self, mode: PermissionMode) -> Result<()> {
        self.stored_members_mut()?;
        self.send_mode = mode;
        Ok(())
    }

    /// Sets the modify mode.
    ///
    /// # Errors
    ///
    /// Returns an error for non-stored groups.
    pub fn set_modify_mode(&mut self, mode: PermissionMode) -> Result<()> {
        self.stored_members_mut()?;
        self.modify_mode = mode;
        Ok(())
    }

    /// Sets the dissolve mode.
    ///
    /// # Errors
    ///
    /// Returns an error for non-stored groups.
    pub fn set_dissolve_mode(&mut self, mode: PermissionMode) -> Result<()> {
        self.stored_members_mut()?;
        self.dissolve_mode = mode;
        Ok(())
    }
}

/// On-disk shape of a stored group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GroupFile {
    #[serde(default = "legacy_version")]
    pub schema_version: u32,
    pub name: String,
    pub owner: Identity,
    #[serde(default)]
    pub members: Vec<Identity>,
    #[serde(default)]
    pub send_mode: PermissionMode,
    #[serde(default = "owner_mode")]
    pub modify_mode: PermissionMode,
    #[serde(default = "owner_mode")]
    pub dissolve_mode: PermissionMode,
}

const fn owner_mode() -> PermissionMode {
    PermissionMode::Owner
}

impl GroupFile {
    /// Brings an old file up to date. Returns true if it changed.
    pub fn upgrade(&mut self) -> bool {
        if self.schema_version >= GROUP_SCHEMA_VERSION {
            return false;
        }
        if !self.members.contains(&self.owner) {
            self.members.insert(0, self.owner.clone());
        }
        self.schema_version = GROUP_SCHEMA_VERSION;
        true
    }

    pub fn into_group(self) -> Group {
        Group {
            name: self.name,
            owner: self.owner,
            membership: Membership::Stored(self.members),
            send_mode: self.send_mode,
            modify_mode: self.modify_mode,
            dissolve_mode: self.dissolve_mode,
        }
    }

    pub fn from_group(group: &Group) -> Self {
        Self {
            schema_version: GROUP_SCHEMA_VERSION,
            name: group.name.clone(),
            owner: group.owner.clone(),
            members: group.members().to_vec(),
            send_mode: group.send_mode,
            modify_mode: group.modify_mode,
            dissolve_mode: group.dissolve_mode,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::context::OfflinePresence;

    fn owner() -> Identity {
        Identity::player("o", "Owner")
    }

    fn member() -> Identity {
        Identity::player("m", "Member")
    }

    #[test]
    fn test_permission_mode_roundtrip() {
        for mode in [
            PermissionMode::Owner,
            PermissionMode::Member,
            PermissionMode::Everyone,
        ] {
            assert_eq!(PermissionMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(PermissionMode::parse("op"), None);
    }

    #[test]
    fn test_send_permissions_follow_mode() {
        let presence = OfflinePresence;
        let mut group = Group::new("team", owner());
        group.add_member(member(), 10).unwrap();
        let stranger = Identity::player("s", "Stranger");

        assert!(group.can_send(&member(), &presence));
        assert!(!group.can_send(&stranger, &presence));

        group.set_send_mode(PermissionMode::Owner).unwrap();
        assert!(!group.can_send(&member(), &presence));
        assert!(group.can_send(&owner(), &presence));

        group.set_send_mode(PermissionMode::Everyone).unwrap();
        assert!(group.can_send(&stranger, &presence));
    }

    #[test]
    fn test_owner_cannot_be_removed() {
        let mut group = Group::new("team", owner());
        group.add_member(member(), 10).unwrap();
        assert!(!group.remove_member(&owner()).unwrap());
        assert!(group.remove_member(&member()).unwrap());
        assert_eq!(group.members(), [owner()]);
    }

    #[test]
    fn test_member_limit() {
        let mut group = Group::new("tiny", owner());
        let err = group.add_member(member(), 1).unwrap_err();
        assert!(matches!(err, Error::LimitExceeded { max: 1, .. }));
    }

    #[test]
    fn test_virtual_groups_are_read_only() {
        let presence = OfflinePresence;
        let mut all = Group::virtual_group(Membership::All, PermissionMode::Everyone);
        assert_eq!(all.name(), ALL_GROUP);
        assert!(all.is_member(&member(), &presence));
        assert!(matches!(
            all.add_member(member(), 10),
            Err(Error::GroupReadOnly(_))
        ));
        assert!(!all.can_modify(&Identity::Console, &presence));
    }

    #[test]
    fn test_external_group_is_prefixed() {
        let group = Group::external("Staff", vec![member()], PermissionMode::Member);
        assert_eq!(group.key(), "ext:staff");
        assert_eq!(group.resolve_members(&OfflinePresence), [member()]);
    }

    #[test]
    fn test_group_file_upgrade_adds_owner() {
        let json = r#"{
            "name": "Old",
            "owner": {"kind": "player", "id": "o", "name": "Owner"},
            "members": [{"kind": "player", "id": "m", "name": "Member"}]
        }"#;
        let mut file: GroupFile = serde_json::from_str(json).unwrap();
        assert!(file.upgrade());
        assert!(!file.upgrade());

        let group = file.into_group();
        assert_eq!(group.members(), [owner(), member()]);
        assert_eq!(group.modify_mode(), PermissionMode::Owner);
        assert_eq!(group.send_mode(), PermissionMode::Member);
    }
}
