//! Retention policy and the periodic sweeper.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::mail::{Mail, MailId, MailStore};
use crate::mailer::Mailer;

/// Whole days elapsed between `sent_at` and `now`, rounded down.
#[must_use]
pub fn age_in_days(sent_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - sent_at).num_days()
}

/// Whether `mail` is older than `retention_days` at `now`.
///
/// Drafts and mail without a send time never expire.
#[must_use]
pub fn is_expired(mail: &Mail, now: DateTime<Utc>, retention_days: u32) -> bool {
    mail.sent_at()
        .is_some_and(|sent_at| age_in_days(sent_at, now) > i64::from(retention_days))
}

/// Ids of every expired record, or `None` while the store is loading.
#[must_use]
pub fn expired_ids(store: &MailStore, now: DateTime<Utc>, retention_days: u32) -> Option<Vec<MailId>> {
    store.with_mails(|mails| {
        mails
            .filter(|mail| is_expired(mail, now, retention_days))
            .map(Mail::id)
            .collect()
    })
}

/// Background task purging expired mail on a fixed interval.
#[derive(Debug, Clone, Copy)]
pub struct RetentionSweeper;

impl RetentionSweeper {
    /// Spawns the sweeper. The first sweep runs immediately.
    ///
    /// Abort the returned handle to stop it.
    pub fn spawn(mailer: Arc<Mutex<Mailer>>, period: Duration) -> JoinHandle<()> {
        info!("Retention sweeper running every {}s", period.as_secs());
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let purged = mailer.lock().await.cleanup_expired().await;
                debug!("Retention sweep purged {purged} mails");
            }
        })
    }
}
