//! Per-identity session metadata.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::identity::Identity;
use crate::mail::MailView;

/// What the mailer remembers about a connected identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// When the identity last sent mail.
    pub last_send: Option<DateTime<Utc>>,
    /// Last mailbox view shown to the identity.
    pub last_view: Option<MailView>,
}

/// Session metadata keyed by identity, dropped on disconnect.
#[derive(Debug, Default)]
pub struct Sessions {
    states: HashMap<String, SessionState>,
}

impl Sessions {
    /// Creates an empty session map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Session of `identity`, created on first use.
    pub fn state_mut(&mut self, identity: &Identity) -> &mut SessionState {
        self.states.entry(identity.key()).or_default()
    }

    /// Session of `identity`, if one exists.
    #[must_use]
    pub fn get(&self, identity: &Identity) -> Option<&SessionState> {
        self.states.get(&identity.key())
    }

    /// Records a send by `identity` at `at`.
    pub fn record_send(&mut self, identity: &Identity, at: DateTime<Utc>) {
        self.state_mut(identity).last_send = Some(at);
    }

    /// Records the list view last shown to `identity`.
    pub fn record_view(&mut self, identity: &Identity, view: MailView) {
        self.state_mut(identity).last_view = Some(view);
    }

    /// Drops the session of `identity`.
    pub fn end(&mut self, identity: &Identity) -> Option<SessionState> {
        self.states.remove(&identity.key())
    }
}
