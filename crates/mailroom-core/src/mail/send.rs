//! Turning a draft into a sent record.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::model::{Location, Mail, MailId};
use crate::config::MailerConfig;
use crate::context::Presence;
use crate::group::{ALL_GROUP, GroupRegistry};
use crate::identity::Identity;

/// Deduplicated union of the direct recipients and the current members of
/// every addressed group, in first-seen order.
///
/// Unknown groups are skipped. The broadcast group is not expanded; views
/// treat broadcast mail specially.
#[must_use]
pub fn resolve_recipients(
    mail: &Mail,
    groups: &GroupRegistry,
    presence: &dyn Presence,
) -> Vec<Identity> {
    let mut total: Vec<Identity> = Vec::new();
    let mut push = |identity: Identity| {
        if !total.contains(&identity) {
            total.push(identity);
        }
    };

    for recipient in mail.to() {
        push(recipient.clone());
    }
    for name in mail.to_groups() {
        if name.eq_ignore_ascii_case(ALL_GROUP) {
            continue;
        }
        match groups.get(name) {
            Some(group) => group.resolve_members(presence).into_iter().for_each(&mut push),
            None => debug!("Skipping unknown group {name}"),
        }
    }
    total
}

/// Freezes `mail` as sent record `id`.
///
/// An empty body becomes one empty line and the body is cut to the
/// configured line limit, with a warning for the dropped lines. Attachments
/// are kept as composed and snapshotted; fees that cannot apply are cleared.
pub fn seal(
    mail: &mut Mail,
    id: MailId,
    to_total: Vec<Identity>,
    now: DateTime<Utc>,
    origin: Option<Location>,
    config: &MailerConfig,
) {
    if mail.message.is_empty() {
        mail.message.push(String::new());
    }
    let max_lines = config.max_message_lines.max(1);
    if mail.message.len() > max_lines {
        warn!(
            "Mail {id} from {} cut from {} to {max_lines} lines",
            mail.sender,
            mail.message.len()
        );
        mail.message.truncate(max_lines);
    }

    mail.id = id;
    mail.to_total = Some(to_total);
    mail.sent_at = Some(now);
    mail.origin = origin;
    mail.attachments_original = Some(mail.attachments.clone());
    mail.apply_cost_rules(config.enable_cod_money, config.enable_cod_item);
}
