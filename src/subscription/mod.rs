//! Single source of truth for what the client is subscribed to.
//!
//! The channel set is written once at startup and is read without locking
//! afterwards. The user-status watch list may change at runtime; both are
//! re-announced every time the connection enters `Subscribing`.

use std::collections::BTreeSet;
use std::sync::{Mutex, OnceLock};

use crate::error::RegistryError;
use crate::models::{Channel, ChannelKind};
use crate::protocol::ProtocolCodec;

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    channels: OnceLock<Vec<Channel>>,
    watched_users: Mutex<BTreeSet<i64>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with `channels`.
    pub fn with_channels(channels: Vec<Channel>) -> Self {
        let registry = Self::new();
        // A fresh registry is always unset.
        let _ = registry.set_channels(channels);
        registry
    }

    /// Install the channel set. May only succeed once.
    ///
    /// Duplicate channels are dropped, first occurrence wins.
    pub fn set_channels(&self, channels: Vec<Channel>) -> Result<(), RegistryError> {
        let mut unique: Vec<Channel> = Vec::with_capacity(channels.len());
        for channel in channels {
            if !unique.contains(&channel) {
                unique.push(channel);
            }
        }
        self.channels
            .set(unique)
            .map_err(|_| RegistryError::AlreadyConfigured)
    }

    pub fn is_configured(&self) -> bool {
        self.channels.get().is_some()
    }

    pub fn channels(&self) -> &[Channel] {
        self.channels.get().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Subscribe request for the current channel set.
    pub fn build_subscription_request(&self) -> String {
        ProtocolCodec::encode_subscribe(self.channels())
    }

    /// Value of the `CHANNEL_ID` query parameter: private ids first, then
    /// shared ids, joined with `/`.
    pub fn channel_id_param(&self) -> String {
        let channels = self.channels();
        channels
            .iter()
            .filter(|c| c.kind == ChannelKind::Private)
            .chain(channels.iter().filter(|c| c.kind == ChannelKind::Shared))
            .map(|c| c.id.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Private channel if there is one, otherwise the first shared channel.
    pub fn primary_channel(&self) -> Option<&Channel> {
        let channels = self.channels();
        channels
            .iter()
            .find(|c| c.is_private())
            .or_else(|| channels.first())
    }

    /// Add `user_id` to the status watch list. Returns false if already watched.
    pub fn watch_user(&self, user_id: i64) -> bool {
        self.users().insert(user_id)
    }

    /// Remove `user_id` from the watch list. Returns false if it was not watched.
    pub fn unwatch_user(&self, user_id: i64) -> bool {
        self.users().remove(&user_id)
    }

    pub fn watched_users(&self) -> Vec<i64> {
        self.users().iter().copied().collect()
    }

    /// One `subscribeStatusChange` request per watched user.
    pub fn build_status_requests(&self, mut next_rpc_id: impl FnMut() -> i64) -> Vec<String> {
        self.watched_users()
            .into_iter()
            .map(|user_id| ProtocolCodec::encode_user_status_subscription(user_id, true, next_rpc_id()))
            .collect()
    }

    fn users(&self) -> std::sync::MutexGuard<'_, BTreeSet<i64>> {
        self.watched_users
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
