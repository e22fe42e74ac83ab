//! Mail records, their store, mailbox views and the send pipeline.

mod model;
pub mod query;
pub mod send;
mod store;

pub use model::{AttachmentState, ItemStack, Location, Mail, MailId, SCHEMA_VERSION};
pub use query::{MailView, PAGE_SIZE, Page, Position};
pub use store::{MailStore, ReloadReport};
