//! Application context and the collaborators the mailer talks to.
//!
//! Everything outside the mail repository (who is online, where they stand,
//! how a notification reaches them, which external permission groups exist)
//! is reached through the traits here. An [`AppContext`] bundles them with
//! the configuration and is handed to every component constructor.

use std::sync::Arc;

use tracing::info;

use crate::config::MailerConfig;
use crate::group::PermissionMode;
use crate::identity::Identity;
use crate::mail::Location;

/// Source of connection state and identity listings.
pub trait Presence: Send + Sync {
    /// Identities currently connected.
    fn online(&self) -> Vec<Identity>;

    /// Every identity known to the server.
    fn known(&self) -> Vec<Identity>;

    /// Every identity that has ever logged in.
    fn ever_logged_in(&self) -> Vec<Identity>;

    /// Current location of an identity, if it has one.
    fn location_of(&self, identity: &Identity) -> Option<Location>;

    /// Whether an identity is currently connected.
    fn is_online(&self, identity: &Identity) -> bool {
        self.online().contains(identity)
    }
}

/// Delivers a one-line notice to an online identity.
pub trait DeliveryNotifier: Send + Sync {
    /// Notify `identity` with `summary`.
    fn notify(&self, identity: &Identity, summary: &str);
}

/// A group supplied by an external permission authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalGroup {
    /// Group name as known to the provider.
    pub name: String,
    /// Current members.
    pub members: Vec<Identity>,
    /// Send mode declared by the provider, if any.
    pub send_mode: Option<PermissionMode>,
}

/// External permission-group authority.
pub trait GroupProvider: Send + Sync {
    /// Groups flagged as mail recipients.
    fn list_external_groups(&self) -> Vec<ExternalGroup>;
}

/// Formats currency amounts.
pub trait EconomyFormatter: Send + Sync {
    /// Formats `amount` for display.
    fn format(&self, amount: f64) -> String;
}

/// Notifier that only writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl DeliveryNotifier for TracingNotifier {
    fn notify(&self, identity: &Identity, summary: &str) {
        info!(recipient = %identity, "{summary}");
    }
}

/// Presence for a host without connected clients.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflinePresence;

impl Presence for OfflinePresence {
    fn online(&self) -> Vec<Identity> {
        Vec::new()
    }

    fn known(&self) -> Vec<Identity> {
        Vec::new()
    }

    fn ever_logged_in(&self) -> Vec<Identity> {
        Vec::new()
    }

    fn location_of(&self, _identity: &Identity) -> Option<Location> {
        None
    }
}

/// Configuration plus collaborators, shared by all components.
pub struct AppContext {
    /// Mailer configuration.
    pub config: MailerConfig,
    /// Connection state.
    pub presence: Arc<dyn Presence>,
    /// Delivery notifications.
    pub notifier: Arc<dyn DeliveryNotifier>,
    /// External group authority, if one is installed.
    pub group_provider: Option<Arc<dyn GroupProvider>>,
    /// Currency formatting, if an economy is installed.
    pub economy: Option<Arc<dyn EconomyFormatter>>,
}

impl AppContext {
    /// Creates a context with the given config, presence and notifier.
    #[must_use]
    pub fn new(
        config: MailerConfig,
        presence: Arc<dyn Presence>,
        notifier: Arc<dyn DeliveryNotifier>,
    ) -> Self {
        Self {
            config,
            presence,
            notifier,
            group_provider: None,
            economy: None,
        }
    }

    /// Creates a context with no connected clients that logs notifications.
    #[must_use]
    pub fn offline(config: MailerConfig) -> Self {
        Self::new(config, Arc::new(OfflinePresence), Arc::new(TracingNotifier))
    }

    /// Installs an external group provider.
    #[must_use]
    pub fn with_group_provider(mut self, provider: Arc<dyn GroupProvider>) -> Self {
        self.group_provider = Some(provider);
        self
    }

    /// Installs an economy formatter.
    #[must_use]
    pub fn with_economy(mut self, economy: Arc<dyn EconomyFormatter>) -> Self {
        self.economy = Some(economy);
        self
    }

    /// Formats a fee, falling back to the plain number without an economy.
    #[must_use]
    pub fn format_money(&self, amount: f64) -> String {
        self.economy
            .as_ref()
            .map_or_else(|| amount.to_string(), |eco| eco.format(amount))
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("group_provider", &self.group_provider.is_some())
            .field("economy", &self.economy.is_some())
            .finish_non_exhaustive()
    }
}
