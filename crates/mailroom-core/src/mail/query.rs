//! Mailbox views over the store.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::model::{Mail, MailId};
use super::store::MailStore;
use crate::identity::Identity;

/// Rows per mailbox page.
pub const PAGE_SIZE: usize = 10;

/// A named filter over the mail collection for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailView {
    /// Mail addressed to the identity.
    Inbox,
    /// Mail sent by the identity.
    Outbox,
    /// Inbox mail the identity has not read.
    Unread,
    /// Mail the identity sent or received and has read.
    Related,
    /// Mail the identity has trashed.
    Trash,
}

impl MailView {
    /// Parse from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "inbox" => Some(Self::Inbox),
            "outbox" => Some(Self::Outbox),
            "unread" => Some(Self::Unread),
            "related" => Some(Self::Related),
            "trash" => Some(Self::Trash),
            _ => None,
        }
    }

    /// Convert to string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Outbox => "outbox",
            Self::Unread => "unread",
            Self::Related => "related",
            Self::Trash => "trash",
        }
    }

    /// Whether the detail pager walks this view.
    #[must_use]
    pub const fn has_pager(&self) -> bool {
        !matches!(self, Self::Related)
    }

    /// Whether `mail` belongs in this view for `identity`.
    #[must_use]
    pub fn matches(&self, mail: &Mail, identity: &Identity) -> bool {
        if mail.is_draft() {
            return false;
        }
        let trashed = mail.is_trashed(identity);
        match self {
            Self::Inbox => mail.is_recipient(identity) && !trashed,
            Self::Unread => mail.is_recipient(identity) && !trashed && !mail.is_read(identity),
            Self::Outbox => mail.sender() == identity && !trashed,
            Self::Related => mail.is_related_with(identity) && mail.is_read(identity) && !trashed,
            Self::Trash => mail.is_related_with(identity) && trashed,
        }
    }
}

impl fmt::Display for MailView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sorts newest-first by send time, then by descending id.
pub fn sort_newest_first(mails: &mut [Mail]) {
    mails.sort_by(|a, b| {
        b.sent_at()
            .cmp(&a.sent_at())
            .then_with(|| b.id().cmp(&a.id()))
    });
}

/// Every mail in `view` for `identity`, newest first.
///
/// Returns `None` while the store is loading.
#[must_use]
pub fn select(store: &MailStore, identity: &Identity, view: MailView) -> Option<Vec<Mail>> {
    let mut mails = store.select(|mail| view.matches(mail, identity))?;
    sort_newest_first(&mut mails);
    Some(mails)
}

/// Number of pages for `total` rows; never less than one.
#[must_use]
pub const fn page_count(total: usize) -> usize {
    let pages = total.div_ceil(PAGE_SIZE);
    if pages == 0 { 1 } else { pages }
}

/// One page of a mailbox view.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Rows on this page.
    pub mails: Vec<Mail>,
    /// 1-based page number requested.
    pub page: usize,
    /// Total pages in the view.
    pub page_count: usize,
    /// Total rows in the view.
    pub total: usize,
}

/// Cuts 1-based page `page` out of `mails`.
///
/// Pages outside `1..=page_count` yield no rows.
#[must_use]
pub fn paginate(mails: Vec<Mail>, page: usize) -> Page {
    let total = mails.len();
    let pages = page_count(total);
    let rows = if (1..=pages).contains(&page) {
        mails
            .into_iter()
            .skip((page - 1) * PAGE_SIZE)
            .take(PAGE_SIZE)
            .collect()
    } else {
        Vec::new()
    };
    Page {
        mails: rows,
        page,
        page_count: pages,
        total,
    }
}

/// Where a mail sits within a view, for the detail pager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// 0-based index within the view.
    pub index: usize,
    /// Rows in the view.
    pub total: usize,
    /// Newest mail in the view.
    pub first: MailId,
    /// Next newer mail.
    pub prev: Option<MailId>,
    /// Next older mail.
    pub next: Option<MailId>,
    /// Oldest mail in the view.
    pub last: MailId,
}

/// Locates `id` within an already-sorted view.
#[must_use]
pub fn position_in(mails: &[Mail], id: MailId) -> Option<Position> {
    let index = mails.iter().position(|m| m.id() == id)?;
    Some(Position {
        index,
        total: mails.len(),
        first: mails.first()?.id(),
        prev: index.checked_sub(1).map(|i| mails[i].id()),
        next: mails.get(index + 1).map(Mail::id),
        last: mails.last()?.id(),
    })
}
