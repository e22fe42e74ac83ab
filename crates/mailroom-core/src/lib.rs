//! # mailroom-core
//!
//! Core library for the `Mailroom` persistent mailbox service.
//!
//! This crate provides:
//! - A file-per-record mail store with background reload and a readiness gate
//! - Recipient resolution and the send pipeline
//! - Mailbox views (inbox, outbox, unread, related, trash) with paging
//! - Stored, virtual and external-provider recipient groups
//! - One-draft-per-identity compose buffers with a recovery file
//! - Retention sweeping of old mail

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod context;
pub mod draft;
mod error;
pub mod group;
mod identity;
pub mod mail;
mod mailer;
pub mod retention;
pub mod session;

pub use config::{MailerConfig, MailerConfigBuilder};
pub use context::{
    AppContext, DeliveryNotifier, EconomyFormatter, ExternalGroup, GroupProvider, OfflinePresence,
    Presence, TracingNotifier,
};
pub use draft::DraftManager;
pub use error::{Error, Result};
pub use group::{ALL_GROUP, Group, GroupRegistry, Membership, PermissionMode};
pub use identity::Identity;
pub use mail::{
    AttachmentState, ItemStack, Location, Mail, MailId, MailStore, MailView, Page, Position,
    ReloadReport,
};
pub use mailer::{JOIN_UNREAD_LIMIT, Mailer};
pub use retention::RetentionSweeper;
pub use session::{SessionState, Sessions};
