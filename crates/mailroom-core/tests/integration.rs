//! Integration tests for the mailer.
//!
//! These tests drive the public `Mailer` API against a temporary data
//! directory, with a scripted presence and a notifier that records deliveries.

#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tokio_test::assert_ok;

use mailroom_core::{
    AppContext, DeliveryNotifier, Error, Group, Identity, ItemStack, Location, Mailer,
    MailerConfig, MailId, MailView, Presence,
};

/// Presence with a fixed set of online and known identities.
struct ScriptedPresence {
    online: Vec<Identity>,
    known: Vec<Identity>,
}

impl Presence for ScriptedPresence {
    fn online(&self) -> Vec<Identity> {
        self.online.clone()
    }

    fn known(&self) -> Vec<Identity> {
        self.known.clone()
    }

    fn ever_logged_in(&self) -> Vec<Identity> {
        self.known.clone()
    }

    fn location_of(&self, identity: &Identity) -> Option<Location> {
        identity.is_player().then(|| Location {
            world: "world".into(),
            x: 18_586_771.197_324_526,
            y: 64.062_5,
            z: -3.141_592_653_589_793,
            yaw: 271.25,
            pitch: -0.1,
        })
    }
}

/// Notifier capturing every delivery.
#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<(Identity, String)>>,
}

impl DeliveryNotifier for Recorder {
    fn notify(&self, identity: &Identity, summary: &str) {
        self.sent
            .lock()
            .unwrap()
            .push((identity.clone(), summary.to_string()));
    }
}

fn a() -> Identity {
    Identity::player("a", "Anna")
}

fn b() -> Identity {
    Identity::player("b", "Ben")
}

fn c() -> Identity {
    Identity::player("c", "Cleo")
}

fn d() -> Identity {
    Identity::player("d", "Dev")
}

fn context(dir: &Path, recorder: Arc<Recorder>) -> Arc<AppContext> {
    context_with(MailerConfig::new(dir), recorder)
}

fn context_with(config: MailerConfig, recorder: Arc<Recorder>) -> Arc<AppContext> {
    let presence = ScriptedPresence {
        online: vec![b(), c()],
        known: vec![a(), b(), c(), d()],
    };
    Arc::new(AppContext::new(config, Arc::new(presence), recorder))
}

async fn started(ctx: Arc<AppContext>) -> Mailer {
    let mut mailer = Mailer::new(ctx);
    mailer.start().await.unwrap().await.unwrap();
    assert!(mailer.is_ready());
    mailer
}

async fn with_group_g(mailer: &mut Mailer) {
    let mut g = Group::new("G", c());
    g.add_member(d(), 15).unwrap();
    assert_ok!(mailer.groups_mut().add_group(g).await);
}

#[tokio::test]
async fn test_send_to_direct_and_group_recipients() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let mut mailer = started(context(dir.path(), Arc::clone(&recorder))).await;
    with_group_g(&mut mailer).await;

    let id = mailer
        .send_new_mail(a(), vec![b()], vec!["G".into()], vec!["hello".into()])
        .await
        .unwrap();
    assert_eq!(id, MailId(1));
    assert!(dir.path().join("mail").join("00000001.json").exists());

    let mail = mailer.get_mail(id).unwrap();
    assert_eq!(mail.to_total().unwrap(), [b(), c(), d()]);
    assert!(mail.origin().is_some());
    assert!(mail.sent_at().is_some());

    for recipient in [b(), c(), d()] {
        let inbox = mailer.mailbox(&recipient, MailView::Inbox).unwrap();
        assert_eq!(inbox.len(), 1, "inbox of {recipient}");
    }
    assert!(mailer.mailbox(&a(), MailView::Inbox).unwrap().is_empty());
    assert_eq!(mailer.mailbox(&a(), MailView::Outbox).unwrap().len(), 1);

    // Only the online recipients are notified.
    let notified: Vec<Identity> = recorder
        .sent
        .lock()
        .unwrap()
        .iter()
        .map(|(who, _)| who.clone())
        .collect();
    assert_eq!(notified, [b(), c()]);

    let last_send = mailer.sessions().get(&a()).unwrap().last_send;
    assert_eq!(last_send, mail.sent_at());
}

#[tokio::test]
async fn test_recipients_frozen_at_send_time() {
    let dir = tempfile::tempdir().unwrap();
    let mut mailer = started(context(dir.path(), Arc::default())).await;
    with_group_g(&mut mailer).await;

    let id = mailer
        .send_new_mail(a(), Vec::new(), vec!["g".into()], Vec::new())
        .await
        .unwrap();
    assert_ok!(mailer.groups_mut().remove_member("G", &d()).await);

    let mail = mailer.get_mail(id).unwrap();
    assert_eq!(mail.to_total().unwrap(), [c(), d()]);
    assert_eq!(mail.message(), [""]);
    assert_eq!(mailer.mailbox(&d(), MailView::Inbox).unwrap().len(), 1);
}

#[tokio::test]
async fn test_broadcast_reaches_everyone() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let mut mailer = started(context(dir.path(), Arc::clone(&recorder))).await;

    let id = mailer
        .send_new_mail(Identity::Console, Vec::new(), vec!["All".into()], vec!["news".into()])
        .await
        .unwrap();
    let mail = mailer.get_mail(id).unwrap();
    assert!(mail.is_broadcast());
    assert!(mail.to_total().unwrap().is_empty());

    let stranger = Identity::player("z", "Zed");
    assert_eq!(mailer.mailbox(&stranger, MailView::Inbox).unwrap().len(), 1);
    assert_eq!(recorder.sent.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_send_before_ready_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let mut mailer = Mailer::new(context(dir.path(), Arc::default()));

    assert!(!mailer.is_ready());
    let sent = mailer
        .send_new_mail(a(), vec![b()], Vec::new(), vec!["early".into()])
        .await;
    assert!(sent.is_none());
    assert!(mailer.mailbox(&b(), MailView::Inbox).is_none());
    assert!(mailer.query_mailbox(&b(), MailView::Inbox, 1).is_none());
    assert!(mailer.attach_box_usage_count(&a()).is_none());
    assert!(matches!(
        mailer.display_mail(&b(), MailId(1)).await,
        Err(Error::NotReady)
    ));
}

#[tokio::test]
async fn test_read_trash_and_restore() {
    let dir = tempfile::tempdir().unwrap();
    let mut mailer = started(context(dir.path(), Arc::default())).await;
    let id = mailer
        .send_new_mail(a(), vec![b()], Vec::new(), vec!["hi".into()])
        .await
        .unwrap();

    assert_eq!(mailer.mailbox(&b(), MailView::Unread).unwrap().len(), 1);
    assert!(mailer.mailbox(&b(), MailView::Related).unwrap().is_empty());

    let shown = mailer.display_mail(&b(), id).await.unwrap();
    assert!(shown.is_read(&b()));
    assert!(mailer.mailbox(&b(), MailView::Unread).unwrap().is_empty());
    assert_eq!(mailer.mailbox(&b(), MailView::Related).unwrap().len(), 1);

    assert!(mailer.set_trash(&b(), id).await.unwrap());
    assert!(mailer.mailbox(&b(), MailView::Inbox).unwrap().is_empty());
    assert_eq!(mailer.mailbox(&b(), MailView::Trash).unwrap().len(), 1);
    // Trash is per identity.
    assert_eq!(mailer.mailbox(&a(), MailView::Outbox).unwrap().len(), 1);

    assert!(mailer.restore_trash(&b(), id).await.unwrap());
    assert_eq!(mailer.mailbox(&b(), MailView::Inbox).unwrap().len(), 1);

    assert!(matches!(
        mailer.set_trash(&d(), id).await,
        Err(Error::NotRelated)
    ));
}

#[tokio::test]
async fn test_unopened_attachments_stay_unread() {
    let dir = tempfile::tempdir().unwrap();
    let mut mailer = started(context(dir.path(), Arc::default())).await;

    let draft = mailer.drafts_mut().get_or_create(&a());
    draft.add_recipient(b(), 10).unwrap();
    draft.add_attachment(ItemStack::new("diamond", 2)).unwrap();
    draft.set_cost_money(12.5).unwrap();
    let id = mailer.send_draft(&a()).await.unwrap();
    assert!(mailer.drafts().get(&a()).is_none());
    assert_eq!(mailer.attach_box_usage_count(&a()), Some(1));
    assert_eq!(mailer.can_use_new_attach_box(&a()), Some(true));

    let mail = mailer.display_mail(&b(), id).await.unwrap();
    assert!(!mail.is_read(&b()));
    assert_eq!(mailer.cost_description(&mail).as_deref(), Some("12.5"));

    mailer.refuse_attachments(&b(), id, Some("no".into())).await.unwrap();
    let mail = mailer.display_mail(&b(), id).await.unwrap();
    assert!(mail.is_read(&b()));
    assert_eq!(mail.refused_reason(), Some("no"));

    // Displaying again changes nothing.
    let again = mailer.display_mail(&b(), id).await.unwrap();
    assert_eq!(again, mail);

    // The refused box goes back to the sender.
    assert!(mailer.open_attachments(&b(), id).await.is_err());
    let items = mailer.open_attachments(&a(), id).await.unwrap();
    assert_eq!(items, [ItemStack::new("diamond", 2)]);
    assert_eq!(mailer.attach_box_usage_count(&a()), Some(0));
    let original = mailer.get_mail(id).unwrap();
    assert_eq!(original.attachments_original().unwrap().len(), 1);
}

#[tokio::test]
async fn test_recipient_opens_attachments() {
    let dir = tempfile::tempdir().unwrap();
    let mut mailer = started(context(dir.path(), Arc::default())).await;

    let draft = mailer.drafts_mut().get_or_create(&a());
    draft.add_recipient(b(), 10).unwrap();
    draft.add_attachment(ItemStack::new("apple", 5)).unwrap();
    let id = mailer.send_draft(&a()).await.unwrap();

    let items = mailer.open_attachments(&b(), id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert!(mailer.get_mail(id).unwrap().is_attachments_opened());
    assert!(mailer.cancel_attachments(&a(), id).await.is_err());

    let mail = mailer.display_mail(&b(), id).await.unwrap();
    assert!(mail.is_read(&b()));
}

#[tokio::test]
async fn test_reload_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let mut mailer = started(context(dir.path(), Arc::default())).await;
    let draft = mailer.drafts_mut().get_or_create(&a());
    draft.add_recipient(b(), 10).unwrap();
    draft.set_message_line(0, "one", 15).unwrap();
    draft.set_message_line(1, "two", 15).unwrap();
    draft.add_attachment(ItemStack::new("emerald", 7)).unwrap();
    draft.set_cost_money(0.1 + 0.2).unwrap();
    let id = mailer.send_draft(&a()).await.unwrap();
    mailer.display_mail(&b(), id).await.unwrap();
    let before = mailer.get_mail(id).unwrap();
    let origin = before.origin().unwrap();
    assert!((origin.x - 18_586_771.197_324_526).abs() < f64::EPSILON);

    let (tx, rx) = tokio::sync::oneshot::channel();
    let handle = mailer.reload(Some(tx)).unwrap();
    let report = rx.await.unwrap();
    handle.await.unwrap();
    assert_eq!(report.loaded, 1);
    assert_eq!(mailer.get_mail(id).unwrap(), before);

    let mut reopened = started(context(dir.path(), Arc::default())).await;
    assert_eq!(reopened.get_mail(id).unwrap(), before);
    let next = reopened
        .send_new_mail(b(), vec![a()], Vec::new(), Vec::new())
        .await
        .unwrap();
    assert_eq!(next, MailId(2));
}

#[tokio::test]
async fn test_attachments_kept_when_attachments_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let config = MailerConfig::builder(dir.path())
        .enable_attachment(false)
        .build();
    let mut mailer = started(context_with(config, Arc::default())).await;

    let draft = mailer.drafts_mut().get_or_create(&a());
    draft.add_recipient(b(), 10).unwrap();
    draft.add_attachment(ItemStack::new("diamond", 3)).unwrap();
    let id = mailer.send_draft(&a()).await.unwrap();

    let mail = mailer.get_mail(id).unwrap();
    assert_eq!(mail.attachments(), [ItemStack::new("diamond", 3)]);
    assert_eq!(mail.attachments_original().unwrap().len(), 1);

    // The items stay on disk until attachments are enabled again.
    let config = MailerConfig::new(dir.path());
    let mut reopened = started(context_with(config, Arc::default())).await;
    let items = reopened.open_attachments(&b(), id).await.unwrap();
    assert_eq!(items, [ItemStack::new("diamond", 3)]);
}

#[tokio::test]
async fn test_drafts_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut mailer = started(context(dir.path(), Arc::default())).await;
    let draft = mailer.drafts_mut().get_or_create(&a());
    draft.add_recipient(b(), 10).unwrap();
    draft.set_message_line(0, "unfinished", 15).unwrap();
    assert_eq!(mailer.shutdown().await.unwrap(), 1);
    assert!(dir.path().join("drafts.json").exists());

    let restarted = started(context(dir.path(), Arc::default())).await;
    let draft = restarted.drafts().get(&a()).unwrap();
    assert_eq!(draft.message(), ["unfinished"]);
    assert!(!dir.path().join("drafts.json").exists());
}

#[tokio::test]
async fn test_paging_and_detail_position() {
    let dir = tempfile::tempdir().unwrap();
    let mut mailer = started(context(dir.path(), Arc::default())).await;
    for n in 0..12 {
        mailer
            .send_new_mail(a(), vec![b()], Vec::new(), vec![format!("mail {n}")])
            .await
            .unwrap();
    }

    let page = mailer.query_mailbox(&b(), MailView::Inbox, 2).unwrap();
    assert_eq!(page.page_count, 2);
    assert_eq!(page.total, 12);
    assert_eq!(page.mails.len(), 2);
    assert!(mailer.query_mailbox(&b(), MailView::Inbox, 3).unwrap().mails.is_empty());

    let first = mailer.query_mailbox(&b(), MailView::Inbox, 1).unwrap();
    let top = first.mails[0].id();
    let position = mailer.detail_position(&b(), top).unwrap();
    assert_eq!(position.index, 0);
    assert_eq!(position.total, 12);
    assert_eq!(position.first, top);
    assert!(position.prev.is_none());

    let joined = mailer.unread_on_join(&b()).unwrap();
    assert_eq!(joined.len(), 5);
}

#[tokio::test]
async fn test_retention_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let mut mailer = started(context(dir.path(), Arc::default())).await;
    let id = mailer
        .send_new_mail(a(), vec![b()], Vec::new(), vec!["old".into()])
        .await
        .unwrap();

    let retention = i64::from(mailer.context().config.retention_days);
    assert_eq!(mailer.cleanup_expired_at(Utc::now() + Duration::days(retention - 1)).await, 0);
    assert_eq!(mailer.cleanup_expired_at(Utc::now() + Duration::days(retention + 1)).await, 1);
    assert!(mailer.get_mail(id).is_none());
    assert!(!dir.path().join("mail").join(id.file_name()).exists());
    assert!(mailer.mailbox(&b(), MailView::Inbox).unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_is_global_and_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut mailer = started(context(dir.path(), Arc::default())).await;
    let id = mailer
        .send_new_mail(a(), vec![b()], Vec::new(), Vec::new())
        .await
        .unwrap();

    assert!(mailer.delete_mail(id).await.unwrap());
    assert!(!mailer.delete_mail(id).await.unwrap());
    assert!(mailer.mailbox(&a(), MailView::Outbox).unwrap().is_empty());
}
