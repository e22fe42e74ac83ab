//! Error types for the core library.

use thiserror::Error;

use crate::mail::MailId;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The mail store is still (re)loading.
    #[error("Mail data is still loading")]
    NotReady,

    /// No mail with the given id exists.
    #[error("Mail not found: {0}")]
    MailNotFound(MailId),

    /// The mail has already been sent and can no longer be edited.
    #[error("Mail {0} has already been sent")]
    NotDraft(MailId),

    /// The identity is neither sender nor recipient of the mail.
    #[error("Identity is not related to this mail")]
    NotRelated,

    /// A configured limit would be exceeded.
    #[error("Too many {what} (max {max})")]
    LimitExceeded {
        /// What was being counted.
        what: &'static str,
        /// The configured maximum.
        max: usize,
    },

    /// Group name contains forbidden characters or has a bad length.
    #[error("Invalid group name: {0}")]
    InvalidGroupName(String),

    /// A group with this name already exists.
    #[error("Group already exists: {0}")]
    GroupExists(String),

    /// Group not found.
    #[error("Group not found: {0}")]
    GroupNotFound(String),

    /// Virtual and external groups cannot be modified.
    #[error("Group cannot be modified: {0}")]
    GroupReadOnly(String),

    /// Attachment box operation is not allowed in the current state.
    #[error("Attachment error: {0}")]
    Attachment(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
