//! Mailer configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::group::PermissionMode;
use crate::{Error, Result};

/// Mailer configuration, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailerConfig {
    /// Root directory for mail records, group files and the draft recovery file.
    pub data_dir: PathBuf,
    /// Sent mail older than this many days is purged.
    pub retention_days: u32,
    /// Maximum number of message lines.
    pub max_message_lines: usize,
    /// Maximum number of direct recipients.
    pub max_destination: usize,
    /// Maximum number of group recipients.
    pub max_destination_group: usize,
    /// Whether items may be attached.
    pub enable_attachment: bool,
    /// Whether cash-on-delivery fees are allowed.
    pub enable_cod_money: bool,
    /// Whether item-on-delivery fees are allowed.
    pub enable_cod_item: bool,
    /// Maximum number of sent mails per identity still holding attachments.
    pub max_attach_box: usize,
    /// Maximum number of groups one identity may own.
    pub max_create_group: usize,
    /// Maximum number of members in a stored group.
    pub max_group_member: usize,
    /// Send mode of the virtual groups (`All`, `AllConnected`, `AllLogin`).
    pub virtual_group_send_mode: PermissionMode,
    /// Send mode of external-provider groups that do not declare one.
    pub external_group_send_mode: PermissionMode,
    /// Interval between retention sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

impl MailerConfig {
    /// Creates a configuration with default limits rooted at `data_dir`.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            retention_days: 30,
            max_message_lines: 15,
            max_destination: 10,
            max_destination_group: 3,
            enable_attachment: true,
            enable_cod_money: true,
            enable_cod_item: true,
            max_attach_box: 3,
            max_create_group: 5,
            max_group_member: 15,
            virtual_group_send_mode: PermissionMode::Everyone,
            external_group_send_mode: PermissionMode::Member,
            sweep_interval_secs: 3600,
        }
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(data_dir: impl Into<PathBuf>) -> MailerConfigBuilder {
        MailerConfigBuilder {
            config: Self::new(data_dir),
        }
    }

    /// Directory holding one file per sent mail.
    #[must_use]
    pub fn mail_dir(&self) -> PathBuf {
        self.data_dir.join("mail")
    }

    /// Directory holding one file per stored group.
    #[must_use]
    pub fn group_dir(&self) -> PathBuf {
        self.data_dir.join("group")
    }

    /// Draft recovery file.
    #[must_use]
    pub fn drafts_file(&self) -> PathBuf {
        self.data_dir.join("drafts.json")
    }

    /// Retention sweep interval.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Checks values that would make the mailer unusable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.max_message_lines == 0 {
            return Err(Error::Config("max_message_lines must be at least 1".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(Error::Config("sweep_interval_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// Loads the configuration from a JSON file.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or holds
    /// invalid values.
    pub async fn load(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path).await? {
            info!("No configuration at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = tokio::fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration to a JSON file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, contents).await?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// Builder for [`MailerConfig`].
#[derive(Debug, Clone)]
pub struct MailerConfigBuilder {
    config: MailerConfig,
}

impl MailerConfigBuilder {
    /// Sets the retention period in days.
    #[must_use]
    pub const fn retention_days(mut self, days: u32) -> Self {
        self.config.retention_days = days;
        self
    }

    /// Sets the maximum number of message lines.
    #[must_use]
    pub const fn max_message_lines(mut self, lines: usize) -> Self {
        self.config.max_message_lines = lines;
        self
    }

    /// Sets the recipient limits (direct, group).
    #[must_use]
    pub const fn max_destinations(mut self, direct: usize, groups: usize) -> Self {
        self.config.max_destination = direct;
        self.config.max_destination_group = groups;
        self
    }

    /// Enables or disables attachments.
    #[must_use]
    pub const fn enable_attachment(mut self, enabled: bool) -> Self {
        self.config.enable_attachment = enabled;
        self
    }

    /// Enables or disables cash-on-delivery fees.
    #[must_use]
    pub const fn enable_cod_money(mut self, enabled: bool) -> Self {
        self.config.enable_cod_money = enabled;
        self
    }

    /// Enables or disables item-on-delivery fees.
    #[must_use]
    pub const fn enable_cod_item(mut self, enabled: bool) -> Self {
        self.config.enable_cod_item = enabled;
        self
    }

    /// Sets the attach box limit.
    #[must_use]
    pub const fn max_attach_box(mut self, max: usize) -> Self {
        self.config.max_attach_box = max;
        self
    }

    /// Sets the group limits (owned groups per identity, members per group).
    #[must_use]
    pub const fn group_limits(mut self, create: usize, members: usize) -> Self {
        self.config.max_create_group = create;
        self.config.max_group_member = members;
        self
    }

    /// Sets the send mode of the virtual groups.
    #[must_use]
    pub const fn virtual_group_send_mode(mut self, mode: PermissionMode) -> Self {
        self.config.virtual_group_send_mode = mode;
        self
    }

    /// Sets the default send mode of external-provider groups.
    #[must_use]
    pub const fn external_group_send_mode(mut self, mode: PermissionMode) -> Self {
        self.config.external_group_send_mode = mode;
        self
    }

    /// Sets the retention sweep interval.
    #[must_use]
    pub const fn sweep_interval_secs(mut self, secs: u64) -> Self {
        self.config.sweep_interval_secs = secs;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> MailerConfig {
        self.config
    }
}
