//! In-process platform bridge
//!
//! Holds the latest occupancy reported for each queue voice channel and the
//! history of each text channel. The HTTP presence feed writes into it and
//! the reconciler reads from it, so any gateway that can push occupancy
//! snapshots can drive the service.

use crate::error::Result;
use crate::platform::{MembershipSource, MessageChannel, MessageId, PostedMessage};
use crate::types::{ChannelId, Presence, ServerId};
use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tracing::debug;

/// Bot messages purged per post, newest first, as the platform API limits bulk deletes
const PURGE_LIMIT: usize = 100;

#[derive(Debug, Default)]
pub struct InMemoryPlatform {
    presence: RwLock<HashMap<(ServerId, ChannelId), Vec<Presence>>>,
    history: RwLock<HashMap<ChannelId, Vec<PostedMessage>>>,
    next_message_id: AtomicU64,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the occupancy of a voice channel
    pub fn set_presence(&self, server_id: ServerId, channel: ChannelId, members: Vec<Presence>) {
        if let Ok(mut presence) = self.presence.write() {
            debug!(
                "Presence update for server {} channel {}: {} members",
                server_id,
                channel,
                members.len()
            );
            presence.insert((server_id, channel), members);
        }
    }

    /// Record a message written by someone other than the bot
    pub fn post_user_message(&self, channel: ChannelId, text: &str) -> MessageId {
        self.push_message(channel, false, text)
    }

    /// Full history of a text channel, oldest first
    pub fn messages(&self, channel: ChannelId) -> Vec<PostedMessage> {
        self.history
            .read()
            .map(|history| history.get(&channel).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Content of the newest bot message in a channel
    pub fn latest_bot_text(&self, channel: ChannelId) -> Option<String> {
        self.messages(channel)
            .into_iter()
            .rev()
            .find(|m| m.from_bot)
            .map(|m| m.content)
    }

    fn push_message(&self, channel: ChannelId, from_bot: bool, text: &str) -> MessageId {
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut history) = self.history.write() {
            history.entry(channel).or_default().push(PostedMessage {
                id,
                channel_id: channel,
                from_bot,
                content: text.to_string(),
            });
        }
        id
    }
}

#[async_trait]
impl MembershipSource for InMemoryPlatform {
    async fn list_present_members(
        &self,
        server_id: ServerId,
        voice_channel: ChannelId,
    ) -> Result<Vec<Presence>> {
        let presence = self
            .presence
            .read()
            .map_err(|_| anyhow!("Failed to acquire presence lock"))?;
        Ok(presence
            .get(&(server_id, voice_channel))
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl MessageChannel for InMemoryPlatform {
    async fn find_last_bot_message(
        &self,
        _server_id: ServerId,
        channel: ChannelId,
    ) -> Result<Option<PostedMessage>> {
        let history = self
            .history
            .read()
            .map_err(|_| anyhow!("Failed to acquire history lock"))?;
        Ok(history
            .get(&channel)
            .and_then(|messages| messages.last())
            .filter(|m| m.from_bot)
            .cloned())
    }

    async fn edit_message(&self, message: &PostedMessage, text: &str) -> Result<()> {
        let mut history = self
            .history
            .write()
            .map_err(|_| anyhow!("Failed to acquire history lock"))?;
        let target = history
            .get_mut(&message.channel_id)
            .and_then(|messages| messages.iter_mut().find(|m| m.id == message.id))
            .ok_or_else(|| anyhow!("Message {} no longer exists", message.id))?;
        target.content = text.to_string();
        Ok(())
    }

    async fn purge_and_post(
        &self,
        _server_id: ServerId,
        channel: ChannelId,
        text: &str,
    ) -> Result<PostedMessage> {
        {
            let mut history = self
                .history
                .write()
                .map_err(|_| anyhow!("Failed to acquire history lock"))?;
            if let Some(messages) = history.get_mut(&channel) {
                let purged: HashSet<MessageId> = messages
                    .iter()
                    .rev()
                    .filter(|m| m.from_bot)
                    .take(PURGE_LIMIT)
                    .map(|m| m.id)
                    .collect();
                messages.retain(|m| !purged.contains(&m.id));
            }
        }

        let id = self.push_message(channel, true, text);
        Ok(PostedMessage {
            id,
            channel_id: channel,
            from_bot: true,
            content: text.to_string(),
        })
    }
}
