//! The mailer: one owner for the store, groups, drafts and sessions.
//!
//! All mutation goes through `&mut Mailer`, so callers sharing a mailer
//! across tasks wrap it in a `tokio::sync::Mutex`. Only the bulk reload runs
//! in the background, and the store's readiness flag gates everything else.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::context::AppContext;
use crate::draft::DraftManager;
use crate::group::GroupRegistry;
use crate::identity::Identity;
use crate::mail::query::{self, MailView, Page, Position};
use crate::mail::send::{resolve_recipients, seal};
use crate::mail::{AttachmentState, ItemStack, Mail, MailId, MailStore, ReloadReport};
use crate::retention;
use crate::session::Sessions;
use crate::{Error, Result};

/// Unread mails listed to an identity when it connects.
pub const JOIN_UNREAD_LIMIT: usize = 5;

/// Mail service facade.
pub struct Mailer {
    ctx: Arc<AppContext>,
    store: MailStore,
    groups: GroupRegistry,
    drafts: DraftManager,
    sessions: Sessions,
}

impl Mailer {
    /// Creates a mailer over the directories named in the context's config.
    ///
    /// Nothing is loaded until [`start`](Self::start).
    #[must_use]
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            store: MailStore::new(ctx.config.mail_dir()),
            groups: GroupRegistry::new(Arc::clone(&ctx)),
            drafts: DraftManager::new(ctx.config.drafts_file()),
            sessions: Sessions::new(),
            ctx,
        }
    }

    /// Shared context.
    #[must_use]
    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// The mail store.
    #[must_use]
    pub const fn store(&self) -> &MailStore {
        &self.store
    }

    /// The group registry.
    #[must_use]
    pub const fn groups(&self) -> &GroupRegistry {
        &self.groups
    }

    /// The group registry, for edits.
    pub const fn groups_mut(&mut self) -> &mut GroupRegistry {
        &mut self.groups
    }

    /// The draft manager.
    #[must_use]
    pub const fn drafts(&self) -> &DraftManager {
        &self.drafts
    }

    /// The draft manager, for edits.
    pub const fn drafts_mut(&mut self) -> &mut DraftManager {
        &mut self.drafts
    }

    /// Session metadata.
    #[must_use]
    pub const fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    /// Restores drafts, loads groups and starts the mail reload.
    ///
    /// Failures to restore drafts or load groups are logged; the mail
    /// reload still starts.
    pub async fn start(&mut self) -> Option<JoinHandle<ReloadReport>> {
        match self.drafts.restore_all().await {
            Ok(0) => {}
            Ok(n) => debug!("Recovered {n} drafts"),
            Err(e) => error!(
                "Failed to restore drafts from {}: {e}",
                self.drafts.path().display()
            ),
        }
        if let Err(e) = self.groups.load().await {
            error!("Failed to load groups: {e}");
        }
        self.store.reload(None)
    }

    /// Starts a background reload of the mail store.
    ///
    /// Returns `None` if a reload is already running.
    pub fn reload(
        &self,
        notify: Option<oneshot::Sender<ReloadReport>>,
    ) -> Option<JoinHandle<ReloadReport>> {
        self.store.reload(notify)
    }

    /// Whether the mail store has finished loading.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.store.is_ready()
    }

    /// Looks up a sent mail.
    #[must_use]
    pub fn get_mail(&self, id: MailId) -> Option<Mail> {
        self.store.get(id)
    }

    /// Composes and sends a text mail.
    pub async fn send_new_mail(
        &mut self,
        from: Identity,
        to: Vec<Identity>,
        groups: Vec<String>,
        lines: Vec<String>,
    ) -> Option<MailId> {
        self.send_mail(Mail::compose(from, to, groups, lines)).await
    }

    /// Sends the identity's current draft.
    ///
    /// The draft is kept while the store is loading.
    pub async fn send_draft(&mut self, identity: &Identity) -> Option<MailId> {
        if !self.is_ready() {
            warn!("Mail data is loading; keeping draft of {identity}");
            return None;
        }
        let draft = self.drafts.take(identity)?;
        self.send_mail(draft).await
    }

    /// Sends a draft.
    ///
    /// Resolves recipients, assigns the next id, persists the record and
    /// notifies online recipients. Returns `None`, after logging, if the
    /// store is loading or `mail` was already sent.
    pub async fn send_mail(&mut self, mut mail: Mail) -> Option<MailId> {
        if !self.is_ready() {
            warn!("Mail data is loading; dropping mail from {}", mail.sender());
            return None;
        }
        if !mail.is_draft() {
            warn!("Mail {} has already been sent", mail.id());
            return None;
        }

        self.groups.refresh_external();
        let presence = self.ctx.presence.as_ref();
        let total = resolve_recipients(&mail, &self.groups, presence);
        let id = self.store.allocate_id()?;
        let now = Utc::now();
        let origin = presence.location_of(mail.sender());
        seal(&mut mail, id, total, now, origin, &self.ctx.config);

        self.persist(&mail).await;
        let sender = mail.sender().clone();
        self.notify_recipients(&mail);
        self.store.append(mail);
        self.sessions.record_send(&sender, now);

        info!("Mail {id} sent by {sender}");
        Some(id)
    }

    fn notify_recipients(&self, mail: &Mail) {
        let summary = mail.inbox_summary();
        let online = self.ctx.presence.online();
        for identity in &online {
            if mail.is_broadcast() || mail.to_total().is_some_and(|t| t.contains(identity)) {
                self.ctx.notifier.notify(identity, &summary);
            }
        }
    }

    async fn persist(&self, mail: &Mail) {
        if let Err(e) = self.store.save(mail).await {
            error!("Failed to save mail {}: {e}", mail.id());
        }
    }

    /// Every mail in `view` for `identity`, newest first.
    ///
    /// Returns `None` while loading.
    #[must_use]
    pub fn mailbox(&self, identity: &Identity, view: MailView) -> Option<Vec<Mail>> {
        query::select(&self.store, identity, view)
    }

    /// One page of `view` for `identity`; remembers the view for the pager.
    ///
    /// Returns `None` while loading.
    pub fn query_mailbox(
        &mut self,
        identity: &Identity,
        view: MailView,
        page: usize,
    ) -> Option<Page> {
        let mails = self.mailbox(identity, view)?;
        self.sessions.record_view(identity, view);
        Some(query::paginate(mails, page))
    }

    /// Up to five newest unread mails, for an identity that just connected.
    #[must_use]
    pub fn unread_on_join(&self, identity: &Identity) -> Option<Vec<Mail>> {
        let mut unread = self.mailbox(identity, MailView::Unread)?;
        unread.truncate(JOIN_UNREAD_LIMIT);
        Some(unread)
    }

    /// Shows a mail to `identity`, marking it read unless it still holds an
    /// unresolved attachment box.
    ///
    /// # Errors
    ///
    /// Returns an error while loading or if the mail does not exist.
    pub async fn display_mail(&mut self, identity: &Identity, id: MailId) -> Result<Mail> {
        self.edit_and_save(id, |mail| {
            let changed = (mail.attachments().is_empty() || mail.is_attachments_cancelled())
                && mail.mark_read(identity);
            Ok((mail.clone(), changed))
        })
        .await
    }

    /// Position of `id` within the list view last shown to `identity`.
    #[must_use]
    pub fn detail_position(&self, identity: &Identity, id: MailId) -> Option<Position> {
        let view = self
            .sessions
            .get(identity)?
            .last_view
            .filter(MailView::has_pager)?;
        let mails = self.mailbox(identity, view)?;
        query::position_in(&mails, id)
    }

    /// Deletes a mail for everyone.
    ///
    /// # Errors
    ///
    /// Returns an error while loading or if the file cannot be removed.
    pub async fn delete_mail(&mut self, id: MailId) -> Result<bool> {
        self.store.delete(id).await
    }

    /// Moves a mail to `identity`'s trash.
    ///
    /// # Errors
    ///
    /// Returns an error while loading, if the mail does not exist, or if
    /// `identity` is neither its sender nor a recipient.
    pub async fn set_trash(&mut self, identity: &Identity, id: MailId) -> Result<bool> {
        self.edit_and_save(id, |mail| {
            ensure_related(mail, identity)?;
            let changed = mail.mark_trash(identity);
            Ok((changed, changed))
        })
        .await
    }

    /// Takes a mail out of `identity`'s trash.
    ///
    /// # Errors
    ///
    /// See [`set_trash`](Self::set_trash).
    pub async fn restore_trash(&mut self, identity: &Identity, id: MailId) -> Result<bool> {
        self.edit_and_save(id, |mail| {
            ensure_related(mail, identity)?;
            let changed = mail.restore_from_trash(identity);
            Ok((changed, changed))
        })
        .await
    }

    /// Withdraws an unopened attachment box; the sender may then take the
    /// items back with [`open_attachments`](Self::open_attachments).
    ///
    /// # Errors
    ///
    /// Returns an error if `identity` is not the sender, the box is empty,
    /// or the box was already opened, cancelled or refused.
    pub async fn cancel_attachments(&mut self, identity: &Identity, id: MailId) -> Result<()> {
        self.edit_and_save(id, |mail| {
            if mail.sender() != identity {
                return Err(Error::NotRelated);
            }
            ensure_open_box(mail)?;
            mail.attachment_state = AttachmentState::Cancelled;
            Ok(((), true))
        })
        .await
    }

    /// Refuses an attachment box on behalf of a recipient.
    ///
    /// # Errors
    ///
    /// Returns an error if `identity` is not a recipient, the box is empty,
    /// or the box was already opened, cancelled or refused.
    pub async fn refuse_attachments(
        &mut self,
        identity: &Identity,
        id: MailId,
        reason: Option<String>,
    ) -> Result<()> {
        self.edit_and_save(id, |mail| {
            if !mail.is_recipient(identity) {
                return Err(Error::NotRelated);
            }
            ensure_open_box(mail)?;
            mail.attachment_state = AttachmentState::Refused { reason };
            Ok(((), true))
        })
        .await
    }

    /// Takes the items out of an attachment box.
    ///
    /// Recipients may open a box that was not cancelled; the sender may open
    /// one that was cancelled or refused. Fee collection is left to the
    /// caller, see [`cost_description`](Self::cost_description).
    ///
    /// # Errors
    ///
    /// Returns an error if `identity` may not open the box or the feature is
    /// disabled.
    pub async fn open_attachments(
        &mut self,
        identity: &Identity,
        id: MailId,
    ) -> Result<Vec<ItemStack>> {
        if !self.ctx.config.enable_attachment {
            return Err(Error::Attachment("attachments are disabled".into()));
        }
        self.edit_and_save(id, |mail| {
            let returned = mail.is_attachments_cancelled();
            let allowed = if returned {
                mail.sender() == identity
            } else {
                mail.is_recipient(identity)
            };
            if !allowed {
                return Err(Error::NotRelated);
            }
            let items = std::mem::take(&mut mail.attachments);
            if !returned {
                mail.attachment_state = AttachmentState::Opened;
            }
            Ok((items, true))
        })
        .await
    }

    /// Sent mails from `identity` that still hold attachments.
    ///
    /// Returns `None` while loading.
    #[must_use]
    pub fn attach_box_usage_count(&self, identity: &Identity) -> Option<usize> {
        self.store.with_mails(|mails| {
            mails
                .filter(|m| m.sender() == identity && !m.attachments().is_empty())
                .count()
        })
    }

    /// Whether `identity` may send another mail with attachments.
    ///
    /// Returns `None` while loading.
    #[must_use]
    pub fn can_use_new_attach_box(&self, identity: &Identity) -> Option<bool> {
        self.attach_box_usage_count(identity)
            .map(|used| used < self.ctx.config.max_attach_box)
    }

    /// Human-readable delivery fee of `mail`, if it carries one.
    #[must_use]
    pub fn cost_description(&self, mail: &Mail) -> Option<String> {
        if mail.cost_money() > 0.0 {
            return Some(self.ctx.format_money(mail.cost_money()));
        }
        mail.cost_item().map(|item| {
            let name = item.display_name.as_deref().unwrap_or(&item.material);
            format!("{name} x{}", item.amount)
        })
    }

    /// Purges mail older than the retention period.
    pub async fn cleanup_expired(&mut self) -> usize {
        self.cleanup_expired_at(Utc::now()).await
    }

    /// Purges mail older than the retention period as of `now`.
    ///
    /// A no-op while loading. Returns the number of records deleted.
    pub async fn cleanup_expired_at(&mut self, now: DateTime<Utc>) -> usize {
        let days = self.ctx.config.retention_days;
        let Some(expired) = retention::expired_ids(&self.store, now, days) else {
            debug!("Skipping retention sweep while mail data is loading");
            return 0;
        };

        let mut purged = 0;
        for id in expired {
            match self.store.delete(id).await {
                Ok(_) => purged += 1,
                Err(e) => error!("Failed to delete expired mail {id}: {e}"),
            }
        }
        if purged > 0 {
            info!("Purged {purged} mails older than {days} days");
        }
        purged
    }

    /// Forgets session metadata for a disconnecting identity.
    pub fn end_session(&mut self, identity: &Identity) {
        self.sessions.end(identity);
    }

    /// Persists outstanding drafts to the recovery file.
    ///
    /// # Errors
    ///
    /// Returns an error if the recovery file cannot be written.
    pub async fn shutdown(&self) -> Result<usize> {
        self.drafts.persist_all().await
    }

    async fn edit_and_save<T, F>(&self, id: MailId, f: F) -> Result<T>
    where
        F: FnOnce(&mut Mail) -> Result<(T, bool)>,
    {
        if !self.is_ready() {
            return Err(Error::NotReady);
        }
        let (result, mail) = self
            .store
            .modify(id, f)
            .ok_or(Error::MailNotFound(id))?;
        let (value, changed) = result?;
        if changed {
            self.persist(&mail).await;
        }
        Ok(value)
    }
}

impl std::fmt::Debug for Mailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailer")
            .field("store", &self.store)
            .field("drafts", &self.drafts.len())
            .finish_non_exhaustive()
    }
}

fn ensure_related(mail: &Mail, identity: &Identity) -> Result<()> {
    if mail.is_related_with(identity) {
        Ok(())
    } else {
        Err(Error::NotRelated)
    }
}

fn ensure_open_box(mail: &Mail) -> Result<()> {
    if mail.attachments().is_empty() {
        return Err(Error::Attachment("the attachment box is empty".into()));
    }
    match mail.attachment_state() {
        AttachmentState::Open => Ok(()),
        AttachmentState::Opened => Err(Error::Attachment("already opened".into())),
        AttachmentState::Cancelled => Err(Error::Attachment("already cancelled".into())),
        AttachmentState::Refused { .. } => Err(Error::Attachment("already refused".into())),
    }
}
