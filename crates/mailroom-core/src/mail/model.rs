//! Mail data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::group::ALL_GROUP;
use crate::identity::Identity;
use crate::{Error, Result};

/// Current on-disk schema version of a mail record.
pub const SCHEMA_VERSION: u32 = 2;

/// Records written before the version marker existed.
const fn legacy_version() -> u32 {
    1
}

/// Unique identifier of a mail. `0` marks an unsent draft.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MailId(pub u32);

impl MailId {
    /// Id carried by every draft.
    pub const DRAFT: Self = Self(0);

    /// Create a new mail ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns true for the draft id.
    #[must_use]
    pub const fn is_draft(self) -> bool {
        self.0 == 0
    }

    /// The following id, or `None` at the end of the id space.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    /// Record file name: the id zero-padded to eight digits.
    #[must_use]
    pub fn file_name(self) -> String {
        format!("{:08}.json", self.0)
    }
}

impl std::fmt::Display for MailId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An item stack held in an attachment box or requested as a fee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    /// Item type.
    pub material: String,
    /// Stack size.
    pub amount: u32,
    /// Custom display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl ItemStack {
    /// Creates a plain item stack.
    #[must_use]
    pub fn new(material: impl Into<String>, amount: u32) -> Self {
        Self {
            material: material.into(),
            amount,
            display_name: None,
        }
    }
}

/// A point in a world, captured from the sender at send time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// World name.
    pub world: String,
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
    /// Horizontal rotation.
    #[serde(default)]
    pub yaw: f32,
    /// Vertical rotation.
    #[serde(default)]
    pub pitch: f32,
}

/// State of the attachment box.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AttachmentState {
    /// Waiting for the recipient.
    #[default]
    Open,
    /// Withdrawn by the sender; items go back to the sender.
    Cancelled,
    /// A recipient has opened the box at least once.
    Opened,
    /// Refused by a recipient; items go back to the sender.
    Refused {
        /// Optional reason given by the recipient.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// A mail, either a draft (`id == 0`) or a sent record.
///
/// Addressing, body, sender, timestamp and fee freeze once the mail is sent;
/// the draft setters return [`Error::NotDraft`] afterwards. Read/trash flags
/// and the attachment box stay mutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    #[serde(default = "legacy_version")]
    pub(crate) schema_version: u32,
    pub(crate) id: MailId,
    pub(crate) sender: Identity,
    #[serde(default)]
    pub(crate) to: Vec<Identity>,
    #[serde(default)]
    pub(crate) to_groups: Vec<String>,
    #[serde(default)]
    pub(crate) to_total: Option<Vec<Identity>>,
    #[serde(default)]
    pub(crate) message: Vec<String>,
    #[serde(default)]
    pub(crate) attachments: Vec<ItemStack>,
    #[serde(default)]
    pub(crate) attachments_original: Option<Vec<ItemStack>>,
    #[serde(default)]
    pub(crate) cost_money: f64,
    #[serde(default)]
    pub(crate) cost_item: Option<ItemStack>,
    #[serde(default)]
    pub(crate) attachment_state: AttachmentState,
    #[serde(default)]
    pub(crate) read_by: Vec<Identity>,
    #[serde(default)]
    pub(crate) trashed_by: Vec<Identity>,
    #[serde(default)]
    pub(crate) sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(crate) origin: Option<Location>,
}

impl Mail {
    /// Creates an empty draft owned by `sender`.
    #[must_use]
    pub const fn draft(sender: Identity) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            id: MailId::DRAFT,
            sender,
            to: Vec::new(),
            to_groups: Vec::new(),
            to_total: None,
            message: Vec::new(),
            attachments: Vec::new(),
            attachments_original: None,
            cost_money: 0.0,
            cost_item: None,
            attachment_state: AttachmentState::Open,
            read_by: Vec::new(),
            trashed_by: Vec::new(),
            sent_at: None,
            origin: None,
        }
    }

    /// Creates a text draft addressed to recipients and groups.
    #[must_use]
    pub fn compose(
        sender: Identity,
        to: Vec<Identity>,
        to_groups: Vec<String>,
        message: Vec<String>,
    ) -> Self {
        Self {
            to,
            to_groups,
            message,
            ..Self::draft(sender)
        }
    }

    /// Mail id (`0` for drafts).
    #[must_use]
    pub const fn id(&self) -> MailId {
        self.id
    }

    /// Returns true while the mail is unsent.
    #[must_use]
    pub const fn is_draft(&self) -> bool {
        self.id.is_draft()
    }

    /// Sender identity.
    #[must_use]
    pub const fn sender(&self) -> &Identity {
        &self.sender
    }

    /// Direct recipients.
    #[must_use]
    pub fn to(&self) -> &[Identity] {
        &self.to
    }

    /// Group recipients, by name.
    #[must_use]
    pub fn to_groups(&self) -> &[String] {
        &self.to_groups
    }

    /// Recipients resolved at send time, if the mail has been sent.
    #[must_use]
    pub fn to_total(&self) -> Option<&[Identity]> {
        self.to_total.as_deref()
    }

    /// Message lines.
    #[must_use]
    pub fn message(&self) -> &[String] {
        &self.message
    }

    /// Items currently held in the attachment box.
    #[must_use]
    pub fn attachments(&self) -> &[ItemStack] {
        &self.attachments
    }

    /// Items attached at send time.
    #[must_use]
    pub fn attachments_original(&self) -> Option<&[ItemStack]> {
        self.attachments_original.as_deref()
    }

    /// Cash-on-delivery fee (0 when none).
    #[must_use]
    pub const fn cost_money(&self) -> f64 {
        self.cost_money
    }

    /// Item-on-delivery fee.
    #[must_use]
    pub const fn cost_item(&self) -> Option<&ItemStack> {
        self.cost_item.as_ref()
    }

    /// Attachment box state.
    #[must_use]
    pub const fn attachment_state(&self) -> &AttachmentState {
        &self.attachment_state
    }

    /// Send time.
    #[must_use]
    pub const fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    /// Sender location at send time.
    #[must_use]
    pub const fn origin(&self) -> Option<&Location> {
        self.origin.as_ref()
    }

    /// On-disk schema version.
    #[must_use]
    pub const fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Returns true when addressed to the reserved `All` group.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.to_groups
            .iter()
            .any(|group| group.eq_ignore_ascii_case(ALL_GROUP))
    }

    /// Returns true if `identity` receives this mail.
    #[must_use]
    pub fn is_recipient(&self, identity: &Identity) -> bool {
        self.is_broadcast()
            || self
                .to_total
                .as_ref()
                .is_some_and(|total| total.contains(identity))
            || self.to.contains(identity)
    }

    /// Returns true if `identity` sent or receives this mail.
    #[must_use]
    pub fn is_related_with(&self, identity: &Identity) -> bool {
        self.sender == *identity || self.is_recipient(identity)
    }

    /// Whether `identity` has read this mail.
    #[must_use]
    pub fn is_read(&self, identity: &Identity) -> bool {
        self.read_by.contains(identity)
    }

    /// Whether `identity` has moved this mail to the trash.
    #[must_use]
    pub fn is_trashed(&self, identity: &Identity) -> bool {
        self.trashed_by.contains(identity)
    }

    /// Marks the mail read for `identity`. Returns false if it already was.
    pub fn mark_read(&mut self, identity: &Identity) -> bool {
        insert_flag(&mut self.read_by, identity)
    }

    /// Moves the mail to `identity`'s trash. Returns false if already there.
    pub fn mark_trash(&mut self, identity: &Identity) -> bool {
        insert_flag(&mut self.trashed_by, identity)
    }

    /// Takes the mail out of `identity`'s trash. Returns false if it was not there.
    pub fn restore_from_trash(&mut self, identity: &Identity) -> bool {
        let before = self.trashed_by.len();
        self.trashed_by.retain(|flagged| flagged != identity);
        before != self.trashed_by.len()
    }

    /// Cancelled by the sender or refused by a recipient.
    #[must_use]
    pub const fn is_attachments_cancelled(&self) -> bool {
        matches!(
            self.attachment_state,
            AttachmentState::Cancelled | AttachmentState::Refused { .. }
        )
    }

    /// Opened by a recipient.
    #[must_use]
    pub const fn is_attachments_opened(&self) -> bool {
        matches!(self.attachment_state, AttachmentState::Opened)
    }

    /// Refused by a recipient.
    #[must_use]
    pub const fn is_attachments_refused(&self) -> bool {
        matches!(self.attachment_state, AttachmentState::Refused { .. })
    }

    /// Reason given when the box was refused.
    #[must_use]
    pub fn refused_reason(&self) -> Option<&str> {
        match &self.attachment_state {
            AttachmentState::Refused { reason } => reason.as_deref(),
            _ => None,
        }
    }

    /// One-line summary for recipients.
    #[must_use]
    pub fn inbox_summary(&self) -> String {
        format!("[{}] {}: {}", self.id, self.sender.name(), self.first_line())
    }

    /// One-line summary for the sender.
    #[must_use]
    pub fn outbox_summary(&self) -> String {
        format!("[{}] to {}: {}", self.id, self.recipients_label(), self.first_line())
    }

    /// Direct recipients and groups joined for display.
    #[must_use]
    pub fn recipients_label(&self) -> String {
        self.to
            .iter()
            .map(Identity::name)
            .chain(self.to_groups.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn first_line(&self) -> String {
        const MAX_CHARS: usize = 24;
        let line = self.message.first().map_or("", String::as_str);
        if line.chars().count() > MAX_CHARS {
            let cut: String = line.chars().take(MAX_CHARS).collect();
            format!("{cut}...")
        } else {
            line.to_string()
        }
    }

    /// Migrates an outdated record to the current schema.
    ///
    /// Returns true if anything changed and the record needs saving.
    pub fn upgrade(&mut self) -> bool {
        if self.schema_version >= SCHEMA_VERSION {
            return false;
        }

        if self.to_total.is_none() && !self.is_draft() {
            let mut total: Vec<Identity> = Vec::with_capacity(self.to.len());
            for recipient in &self.to {
                if !total.contains(recipient) {
                    total.push(recipient.clone());
                }
            }
            self.to_total = Some(total);
        }
        if self.attachments_original.is_none() && !self.is_draft() {
            self.attachments_original = Some(self.attachments.clone());
        }
        self.schema_version = SCHEMA_VERSION;
        true
    }

    /// Clears fees that cannot apply.
    ///
    /// Order matters: empty attachments clear both fees, an item fee clears
    /// the money fee, then disabled features clear their own fee.
    pub(crate) fn apply_cost_rules(&mut self, enable_money: bool, enable_item: bool) {
        if self.attachments.is_empty() {
            self.cost_money = 0.0;
            self.cost_item = None;
        }
        if self.cost_item.is_some() {
            self.cost_money = 0.0;
        }
        if !enable_money {
            self.cost_money = 0.0;
        }
        if !enable_item {
            self.cost_item = None;
        }
    }

    fn ensure_draft(&self) -> Result<()> {
        if self.is_draft() {
            Ok(())
        } else {
            Err(Error::NotDraft(self.id))
        }
    }

    /// Adds a direct recipient. Adding an existing recipient is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the mail was sent or `max` recipients are already set.
    pub fn add_recipient(&mut self, identity: Identity, max: usize) -> Result<()> {
        self.ensure_draft()?;
        if self.to.contains(&identity) {
            return Ok(());
        }
        if self.to.len() >= max {
            return Err(Error::LimitExceeded {
                what: "recipients",
                max,
            });
        }
        self.to.push(identity);
        Ok(())
    }

    /// Replaces the recipient at `index`, or appends when `index` is the
    /// current length.
    ///
    /// # Errors
    ///
    /// Returns an error if the mail was sent or the index is past the limit.
    pub fn set_recipient(&mut self, index: usize, identity: Identity, max: usize) -> Result<()> {
        self.ensure_draft()?;
        if index < self.to.len() {
            match self.to.iter().position(|existing| *existing == identity) {
                Some(pos) if pos != index => {
                    self.to.remove(index);
                }
                _ => self.to[index] = identity,
            }
            Ok(())
        } else {
            self.add_recipient(identity, max)
        }
    }

    /// Removes the recipient at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mail was sent.
    pub fn remove_recipient(&mut self, index: usize) -> Result<Option<Identity>> {
        self.ensure_draft()?;
        Ok((index < self.to.len()).then(|| self.to.remove(index)))
    }

    /// Adds a group recipient (case-insensitively deduplicated).
    ///
    /// # Errors
    ///
    /// Returns an error if the mail was sent or `max` groups are already set.
    pub fn add_group(&mut self, name: impl Into<String>, max: usize) -> Result<()> {
        self.ensure_draft()?;
        let name = name.into();
        if self.to_groups.iter().any(|g| g.eq_ignore_ascii_case(&name)) {
            return Ok(());
        }
        if self.to_groups.len() >= max {
            return Err(Error::LimitExceeded {
                what: "recipient groups",
                max,
            });
        }
        self.to_groups.push(name);
        Ok(())
    }

    /// Removes the group recipient at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mail was sent.
    pub fn remove_group(&mut self, index: usize) -> Result<Option<String>> {
        self.ensure_draft()?;
        Ok((index < self.to_groups.len()).then(|| self.to_groups.remove(index)))
    }

    /// Sets message line `index`, padding with empty lines as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the mail was sent or `index` is at or past `max_lines`.
    pub fn set_message_line(
        &mut self,
        index: usize,
        line: impl Into<String>,
        max_lines: usize,
    ) -> Result<()> {
        self.ensure_draft()?;
        if index >= max_lines {
            return Err(Error::LimitExceeded {
                what: "message lines",
                max: max_lines,
            });
        }
        if index >= self.message.len() {
            self.message.resize(index + 1, String::new());
        }
        self.message[index] = line.into();
        Ok(())
    }

    /// Removes message line `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mail was sent.
    pub fn remove_message_line(&mut self, index: usize) -> Result<Option<String>> {
        self.ensure_draft()?;
        Ok((index < self.message.len()).then(|| self.message.remove(index)))
    }

    /// Puts an item into the attachment box.
    ///
    /// # Errors
    ///
    /// Returns an error if the mail was sent.
    pub fn add_attachment(&mut self, item: ItemStack) -> Result<()> {
        self.ensure_draft()?;
        self.attachments.push(item);
        Ok(())
    }

    /// Sets a cash-on-delivery fee, replacing any item fee. `0` removes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the mail was sent or `amount` is negative.
    pub fn set_cost_money(&mut self, amount: f64) -> Result<()> {
        self.ensure_draft()?;
        if amount.is_nan() || amount < 0.0 {
            return Err(Error::Attachment(format!("invalid fee: {amount}")));
        }
        self.cost_money = amount;
        if amount > 0.0 {
            self.cost_item = None;
        }
        Ok(())
    }

    /// Sets an item-on-delivery fee, replacing any money fee. `None` removes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the mail was sent.
    pub fn set_cost_item(&mut self, item: Option<ItemStack>) -> Result<()> {
        self.ensure_draft()?;
        if item.is_some() {
            self.cost_money = 0.0;
        }
        self.cost_item = item;
        Ok(())
    }
}

fn insert_flag(flags: &mut Vec<Identity>, identity: &Identity) -> bool {
    if flags.contains(identity) {
        false
    } else {
        flags.push(identity.clone());
        true
    }
}
