use serde::{Deserialize, Serialize};

/// Connection status of a push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelStatus {
    Connecting,
    Open,
    Closed,
}

/// Handle describing the single live push channel of an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionChannel {
    pub channel_id: String,
    pub topic: String,
    pub owner: String,
    pub status: ChannelStatus,
}

/// Topic name a channel for `owner` subscribes to.
pub fn topic_for(owner: &str) -> String {
    format!("bookmarks-{}", owner)
}
