//! Mail participant identities.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Someone who can send or receive mail.
///
/// Identities compare by [`Identity::key`], so a player keeps the same
/// identity across name changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    /// A player, keyed by a stable id.
    Player {
        /// Stable unique id.
        id: String,
        /// Last known display name.
        name: String,
    },
    /// The server console.
    Console,
    /// A command block, keyed by its name.
    CommandBlock {
        /// Block name.
        name: String,
    },
}

impl Identity {
    /// Creates a player identity.
    #[must_use]
    pub fn player(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Player {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Creates a command block identity.
    #[must_use]
    pub fn command_block(name: impl Into<String>) -> Self {
        Self::CommandBlock { name: name.into() }
    }

    /// Stable key used for equality, hashing and draft/session maps.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Player { id, .. } => format!("${id}"),
            Self::Console => "@console".to_string(),
            Self::CommandBlock { name } => format!("#{name}"),
        }
    }

    /// Human-readable name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Player { name, .. } | Self::CommandBlock { name } => name,
            Self::Console => "CONSOLE",
        }
    }

    /// Returns true for player identities.
    #[must_use]
    pub const fn is_player(&self) -> bool {
        matches!(self, Self::Player { .. })
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Player { id: a, .. }, Self::Player { id: b, .. }) => a == b,
            (Self::Console, Self::Console) => true,
            (Self::CommandBlock { name: a }, Self::CommandBlock { name: b }) => a == b,
            _ => false,
        }
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
