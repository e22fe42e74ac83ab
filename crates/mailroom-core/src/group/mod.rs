//! Recipient groups: stored, virtual and external.

mod model;
mod repository;

pub use model::{
    ALL_CONNECTED_GROUP, ALL_GROUP, ALL_LOGIN_GROUP, EXTERNAL_PREFIX, GROUP_SCHEMA_VERSION, Group,
    Membership, PermissionMode,
};
pub use repository::GroupRegistry;
