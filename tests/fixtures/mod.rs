//! Test fixtures and fake collaborators for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use cuebot::admin::AdminService;
use cuebot::error::Result;
use cuebot::platform::{InMemoryPlatform, MembershipSource, MessageChannel, PostedMessage};
use cuebot::queue::QueueReconciler;
use cuebot::session::{Region, SessionSchedule};
use cuebot::storage::{InMemoryRepository, Repository};
use cuebot::types::{ChannelId, Member, Presence, Server, ServerId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Kept clear of the small ids the tests use for queued members
pub const SUPERUSER: u64 = 900;
pub const VOICE: ChannelId = 100;
pub const OUTPUT: ChannelId = 200;

/// Platform fake that can be told to fail, wrapping the in-memory bridge
#[derive(Default)]
pub struct FlakyPlatform {
    inner: InMemoryPlatform,
    fail_membership: AtomicBool,
    fail_messages: AtomicBool,
    membership_calls: AtomicUsize,
    message_writes: AtomicUsize,
}

impl FlakyPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_presence(&self, server_id: ServerId, channel: ChannelId, members: Vec<Presence>) {
        self.inner.set_presence(server_id, channel, members);
    }

    pub fn fail_membership(&self, fail: bool) {
        self.fail_membership.store(fail, Ordering::SeqCst);
    }

    pub fn fail_messages(&self, fail: bool) {
        self.fail_messages.store(fail, Ordering::SeqCst);
    }

    pub fn membership_calls(&self) -> usize {
        self.membership_calls.load(Ordering::SeqCst)
    }

    pub fn message_writes(&self) -> usize {
        self.message_writes.load(Ordering::SeqCst)
    }

    pub fn latest_bot_text(&self, channel: ChannelId) -> Option<String> {
        self.inner.latest_bot_text(channel)
    }

    pub fn messages(&self, channel: ChannelId) -> Vec<PostedMessage> {
        self.inner.messages(channel)
    }

    pub fn post_user_message(&self, channel: ChannelId, text: &str) {
        self.inner.post_user_message(channel, text);
    }

    fn check_messages(&self) -> Result<()> {
        if self.fail_messages.load(Ordering::SeqCst) {
            anyhow::bail!("message endpoint unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl MembershipSource for FlakyPlatform {
    async fn list_present_members(
        &self,
        server_id: ServerId,
        voice_channel: ChannelId,
    ) -> Result<Vec<Presence>> {
        self.membership_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_membership.load(Ordering::SeqCst) {
            anyhow::bail!("gateway timed out");
        }
        self.inner.list_present_members(server_id, voice_channel).await
    }
}

#[async_trait]
impl MessageChannel for FlakyPlatform {
    async fn find_last_bot_message(
        &self,
        server_id: ServerId,
        channel: ChannelId,
    ) -> Result<Option<PostedMessage>> {
        self.check_messages()?;
        self.inner.find_last_bot_message(server_id, channel).await
    }

    async fn edit_message(&self, message: &PostedMessage, text: &str) -> Result<()> {
        self.check_messages()?;
        self.message_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.edit_message(message, text).await
    }

    async fn purge_and_post(
        &self,
        server_id: ServerId,
        channel: ChannelId,
        text: &str,
    ) -> Result<PostedMessage> {
        self.check_messages()?;
        self.message_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.purge_and_post(server_id, channel, text).await
    }
}

/// A reconciler, admin service and their collaborators wired together
pub struct TestSystem {
    pub repository: Arc<InMemoryRepository>,
    pub platform: Arc<FlakyPlatform>,
    pub reconciler: Arc<QueueReconciler>,
    pub admin: AdminService,
}

impl TestSystem {
    pub async fn new() -> Self {
        let repository = Arc::new(InMemoryRepository::new());
        repository
            .upsert_member(Member::superuser(SUPERUSER, "owner#0001"))
            .await
            .unwrap();
        let platform = Arc::new(FlakyPlatform::new());
        let reconciler = Arc::new(QueueReconciler::new(
            repository.clone(),
            platform.clone(),
            platform.clone(),
            schedule(),
        ));
        let admin = AdminService::new(reconciler.clone());

        Self {
            repository,
            platform,
            reconciler,
            admin,
        }
    }

    /// Store a server with both tracking channels set
    pub async fn add_server(&self, server_id: ServerId) {
        self.repository
            .upsert_server(configured_server(server_id))
            .await
            .unwrap();
    }
}

/// US session 01:00-07:00, EU session 14:00-22:00, 30 minute pre-queue
pub fn schedule() -> SessionSchedule {
    let t = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap();
    SessionSchedule::new(
        Region::new("USTZ SRE", t(1), t(7)),
        Region::new("EUTZ SRE", t(14), t(22)),
        Duration::from_secs(30 * 60),
    )
    .unwrap()
}

pub fn configured_server(server_id: ServerId) -> Server {
    let mut server = Server::new(server_id);
    server.voice_channel = Some(VOICE);
    server.output_channel = Some(OUTPUT);
    server
}

pub fn presence(id: u64) -> Presence {
    Presence::new(id, format!("member#{:04}", id), format!("nick{}", id))
}

pub fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 14, hour, minute, second).unwrap()
}

pub fn secs(n: i64) -> TimeDelta {
    TimeDelta::seconds(n)
}
