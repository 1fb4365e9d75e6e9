//! Chat platform seams
//!
//! The engine reads voice-channel occupancy through `MembershipSource` and
//! maintains its status message through `MessageChannel`. Failures from
//! either are reported as `QueueError::TransientPlatform` by callers.

pub mod memory;

use crate::error::Result;
use crate::types::{ChannelId, Presence, ServerId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::InMemoryPlatform;

/// Platform identifier of a posted message
pub type MessageId = u64;

/// A message in a text channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub from_bot: bool,
    pub content: String,
}

/// Source of voice-channel membership snapshots
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MembershipSource: Send + Sync {
    /// Members currently present in the server's queue voice channel
    async fn list_present_members(
        &self,
        server_id: ServerId,
        voice_channel: ChannelId,
    ) -> Result<Vec<Presence>>;
}

/// The text channel carrying a server's status message
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// The newest message in the channel, if the bot wrote it
    async fn find_last_bot_message(
        &self,
        server_id: ServerId,
        channel: ChannelId,
    ) -> Result<Option<PostedMessage>>;

    async fn edit_message(&self, message: &PostedMessage, text: &str) -> Result<()>;

    /// Remove the bot's earlier messages and post a fresh one
    async fn purge_and_post(
        &self,
        server_id: ServerId,
        channel: ChannelId,
        text: &str,
    ) -> Result<PostedMessage>;
}
