//! Common types used throughout the queue tracking service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Platform identifier of a member (user)
pub type MemberId = u64;

/// Platform identifier of a tracked server (guild)
pub type ServerId = u64;

/// Platform identifier of a channel
pub type ChannelId = u64;

/// Identifier of a persisted queue entry or related row
pub type EntryId = Uuid;

/// Default minimum queued time before a timeout countdown may begin
pub const DEFAULT_WAIT_THRESHOLD_SECONDS: u64 = 330;

/// Default time a timed-out entry may stay absent before counted removal
pub const DEFAULT_TIMEOUT_DURATION_SECONDS: u64 = 300;

/// Global member identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    /// Global display reference such as `name#0001`
    pub display_ref: String,
    pub is_superuser: bool,
}

impl Member {
    pub fn new(id: MemberId, display_ref: impl Into<String>) -> Self {
        Self {
            id,
            display_ref: display_ref.into(),
            is_superuser: false,
        }
    }

    pub fn superuser(id: MemberId, display_ref: impl Into<String>) -> Self {
        Self {
            id,
            display_ref: display_ref.into(),
            is_superuser: true,
        }
    }
}

/// A tracked community
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: ServerId,
    /// Voice channel whose occupants form the queue
    pub voice_channel: Option<ChannelId>,
    /// Text channel carrying the status message
    pub output_channel: Option<ChannelId>,
    pub bot_channel: Option<ChannelId>,
    pub admin_channel: Option<ChannelId>,
    /// Seconds an entry must be queued before absence starts a timeout
    pub wait_threshold_seconds: u64,
    /// Seconds a timed-out entry may stay absent before counted removal
    pub timeout_duration_seconds: u64,
}

impl Server {
    /// A freshly initialised server with no channels configured
    pub fn new(id: ServerId) -> Self {
        Self {
            id,
            voice_channel: None,
            output_channel: None,
            bot_channel: None,
            admin_channel: None,
            wait_threshold_seconds: DEFAULT_WAIT_THRESHOLD_SECONDS,
            timeout_duration_seconds: DEFAULT_TIMEOUT_DURATION_SECONDS,
        }
    }

    pub fn wait_threshold(&self) -> Duration {
        Duration::from_secs(self.wait_threshold_seconds)
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_duration_seconds)
    }

    /// Voice and output channels are both required before tracking
    pub fn missing_channels(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.voice_channel.is_none() {
            missing.push("queue");
        }
        if self.output_channel.is_none() {
            missing.push("output");
        }
        missing
    }

    pub fn is_configured(&self) -> bool {
        self.missing_channels().is_empty()
    }
}

/// One member's place in one server's queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,
    pub member_id: MemberId,
    pub server_id: ServerId,
    pub join_time: DateTime<Utc>,
    /// Set while the entry is on timeout, `None` while actively queued
    pub timeout_start: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn new(member_id: MemberId, server_id: ServerId, join_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            member_id,
            server_id,
            join_time,
            timeout_start: None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        self.timeout_start.is_some()
    }
}

/// Per-server profile and accumulated statistics of a member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Related {
    pub id: EntryId,
    pub server_id: ServerId,
    pub member_id: MemberId,
    pub nick: String,
    pub queue_count: u64,
    pub queue_time: Duration,
    pub is_admin: bool,
}

impl Related {
    pub fn new(server_id: ServerId, member_id: MemberId, nick: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            server_id,
            member_id,
            nick: nick.into(),
            queue_count: 0,
            queue_time: Duration::ZERO,
            is_admin: false,
        }
    }
}

/// A member observed in a server's queue voice channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Presence {
    pub id: MemberId,
    /// Global reference, stored on `Member::display_ref`
    pub name: String,
    /// Server nickname, stored on `Related::nick`
    pub display_name: String,
}

impl Presence {
    pub fn new(id: MemberId, name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            display_name: display_name.into(),
        }
    }
}

/// Any of the forms a member can be referred to by at the boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum MemberRef {
    Id(MemberId),
    /// Chat mention such as `<@123>` or `<@!123>`
    Mention(String),
    Record(Member),
}

impl MemberRef {
    /// Extract the member id without consulting storage
    pub fn member_id(&self) -> Option<MemberId> {
        match self {
            MemberRef::Id(id) => Some(*id),
            MemberRef::Record(member) => Some(member.id),
            MemberRef::Mention(raw) => {
                let inner = raw.trim().strip_prefix("<@")?.strip_suffix('>')?;
                inner.trim_start_matches('!').parse().ok()
            }
        }
    }
}

impl std::fmt::Display for MemberRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberRef::Id(id) => write!(f, "{}", id),
            MemberRef::Mention(raw) => write!(f, "{}", raw),
            MemberRef::Record(member) => write!(f, "{}", member.display_ref),
        }
    }
}

/// Which server channel an administrator is configuring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// The voice channel forming the queue
    Queue,
    Output,
    Bot,
    Admin,
}

impl std::str::FromStr for ChannelKind {
    type Err = crate::error::QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "queue" => Ok(ChannelKind::Queue),
            "output" => Ok(ChannelKind::Output),
            "bot" => Ok(ChannelKind::Bot),
            "admin" => Ok(ChannelKind::Admin),
            other => Err(crate::error::QueueError::InvalidChannelKind {
                kind: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Queue => write!(f, "queue"),
            ChannelKind::Output => write!(f, "output"),
            ChannelKind::Bot => write!(f, "bot"),
            ChannelKind::Admin => write!(f, "admin"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let server = Server::new(42);
        assert_eq!(server.wait_threshold(), Duration::from_secs(330));
        assert_eq!(server.timeout_duration(), Duration::from_secs(300));
        assert!(!server.is_configured());
        assert_eq!(server.missing_channels(), vec!["queue", "output"]);
    }

    #[test]
    fn test_member_ref_parsing() {
        assert_eq!(MemberRef::Mention("<@123>".into()).member_id(), Some(123));
        assert_eq!(MemberRef::Mention("<@!456>".into()).member_id(), Some(456));
        assert_eq!(MemberRef::Mention("@someone".into()).member_id(), None);
        assert_eq!(MemberRef::Id(9).member_id(), Some(9));
        assert_eq!(
            MemberRef::Record(Member::new(5, "five#0005")).member_id(),
            Some(5)
        );
    }

    #[test]
    fn test_channel_kind_parsing() {
        assert_eq!("queue".parse::<ChannelKind>().unwrap(), ChannelKind::Queue);
        assert_eq!("Admin".parse::<ChannelKind>().unwrap(), ChannelKind::Admin);
        assert!("music".parse::<ChannelKind>().is_err());
    }
}
