//! Subscription channels.

use serde::{Deserialize, Serialize};

use super::deserialize_id;

/// Whether a channel is user-specific or broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Channel bound to the current user
    Private,
    /// Broadcast channel shared across users
    Shared,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Private => "private",
            ChannelKind::Shared => "shared",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A subscription topic assigned by the server-side configuration.
///
/// Channels are immutable once created; the full set is handed to the
/// connection manager at startup and never changes during a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    /// Opaque channel id (servers sometimes send it as a number)
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(rename = "type", alias = "kind")]
    pub kind: ChannelKind,
}

impl Channel {
    pub fn new(id: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }

    pub fn private(id: impl Into<String>) -> Self {
        Self::new(id, ChannelKind::Private)
    }

    pub fn shared(id: impl Into<String>) -> Self {
        Self::new(id, ChannelKind::Shared)
    }

    pub fn is_private(&self) -> bool {
        self.kind == ChannelKind::Private
    }
}
