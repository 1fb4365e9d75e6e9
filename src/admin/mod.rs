//! Administrative operations
//!
//! Direct mutations on `Server` and `Related` rows issued by server
//! administrators. Every mutation holds the server's reconciliation lock so
//! it never interleaves with a pass, and asks the scheduler for a fresh pass
//! when the status message depends on what changed.
//!
//! Permission: the acting member is the superuser, or has `is_admin` on its
//! `Related` row for the server.

use crate::error::{QueueError, Result};
use crate::queue::{stats, QueueReconciler};
use crate::scheduler::ReconcileTrigger;
use crate::storage::{resolve_member, Changeset, Repository};
use crate::types::{ChannelId, ChannelKind, MemberId, MemberRef, Related, Server, ServerId};
use crate::utils::format_dhms;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Soft size limit of one `full_queue_info` message
pub const FULL_INFO_CHUNK_LIMIT: usize = 1500;

/// Statistics of one member in one server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueInfo {
    pub nick: String,
    pub queue_count: u64,
    pub queue_time: Duration,
}

impl std::fmt::Display for QueueInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} has queued {} times for a total of {}",
            self.nick,
            self.queue_count,
            format_dhms(self.queue_time)
        )
    }
}

/// A command as received over the admin endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum AdminCommand {
    InitServer,
    SetChannel {
        actor: MemberId,
        kind: String,
        channel: ChannelId,
    },
    SetWaitThreshold {
        actor: MemberId,
        seconds: u64,
    },
    SetTimeoutDuration {
        actor: MemberId,
        seconds: u64,
    },
    ResetStats {
        actor: MemberId,
    },
    AddAdmin {
        actor: MemberId,
        target: MemberRef,
    },
    /// Statistics of `target`, or of the caller when no target is given
    QueueInfo {
        actor: MemberId,
        #[serde(default)]
        target: Option<MemberRef>,
    },
    FullQueueInfo {
        actor: MemberId,
    },
}

/// Administrative operations over the repository
pub struct AdminService {
    repository: Arc<dyn Repository>,
    reconciler: Arc<QueueReconciler>,
    trigger: Option<ReconcileTrigger>,
}

impl AdminService {
    pub fn new(reconciler: Arc<QueueReconciler>) -> Self {
        Self {
            repository: reconciler.repository(),
            reconciler,
            trigger: None,
        }
    }

    pub fn with_trigger(mut self, trigger: ReconcileTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Run a command and render its reply text
    pub async fn execute(&self, server_id: ServerId, command: AdminCommand) -> Result<Vec<String>> {
        let reply = match command {
            AdminCommand::InitServer => {
                self.init_server(server_id).await?;
                format!("Initialising database for server {}", server_id)
            }
            AdminCommand::SetChannel {
                actor,
                kind,
                channel,
            } => {
                let kind: ChannelKind = kind.parse()?;
                self.set_channel(actor, server_id, kind, channel).await?;
                format!("Server {} channel set.", kind)
            }
            AdminCommand::SetWaitThreshold { actor, seconds } => {
                self.set_wait_threshold(actor, server_id, seconds).await?;
                format!("Timeout wait time set to {}s", seconds)
            }
            AdminCommand::SetTimeoutDuration { actor, seconds } => {
                self.set_timeout_duration(actor, server_id, seconds).await?;
                format!("Timeout duration set to {}s", seconds)
            }
            AdminCommand::ResetStats { actor } => {
                self.reset_stats(actor, server_id).await?;
                "All user queue details reset.".to_string()
            }
            AdminCommand::AddAdmin { actor, target } => {
                let row = self.add_admin(actor, server_id, &target).await?;
                format!("Added {} as admin for server {}", row.member_id, server_id)
            }
            AdminCommand::QueueInfo { actor, target } => {
                let target = target.unwrap_or(MemberRef::Id(actor));
                self.queue_info(server_id, &target).await?.to_string()
            }
            AdminCommand::FullQueueInfo { actor } => {
                return self.full_queue_info(actor, server_id).await;
            }
        };
        Ok(vec![reply])
    }

    /// Start tracking a server with default thresholds and no channels
    pub async fn init_server(&self, server_id: ServerId) -> Result<Server> {
        let lock = self.reconciler.server_lock(server_id)?;
        let _guard = lock.lock().await;

        if self.repository.get_server(server_id).await?.is_some() {
            return Err(QueueError::AlreadyInitialized { server_id }.into());
        }
        let server = Server::new(server_id);
        self.repository.upsert_server(server.clone()).await?;
        info!("Initialised server {}", server_id);
        Ok(server)
    }

    pub async fn set_channel(
        &self,
        actor: MemberId,
        server_id: ServerId,
        kind: ChannelKind,
        channel: ChannelId,
    ) -> Result<Server> {
        let server = self
            .update_server(actor, server_id, |server| match kind {
                ChannelKind::Queue => server.voice_channel = Some(channel),
                ChannelKind::Output => server.output_channel = Some(channel),
                ChannelKind::Bot => server.bot_channel = Some(channel),
                ChannelKind::Admin => server.admin_channel = Some(channel),
            })
            .await?;
        info!("Set {} channel {} for server {}", kind, channel, server_id);
        Ok(server)
    }

    pub async fn set_wait_threshold(
        &self,
        actor: MemberId,
        server_id: ServerId,
        seconds: u64,
    ) -> Result<Server> {
        let server = self
            .update_server(actor, server_id, |server| {
                server.wait_threshold_seconds = seconds
            })
            .await?;
        info!(
            "{} set timeout wait time to {}s for server {}",
            actor, seconds, server_id
        );
        Ok(server)
    }

    pub async fn set_timeout_duration(
        &self,
        actor: MemberId,
        server_id: ServerId,
        seconds: u64,
    ) -> Result<Server> {
        let server = self
            .update_server(actor, server_id, |server| {
                server.timeout_duration_seconds = seconds
            })
            .await?;
        info!(
            "{} set timeout duration to {}s for server {}",
            actor, seconds, server_id
        );
        Ok(server)
    }

    /// Zero every member's statistics in the server
    pub async fn reset_stats(&self, actor: MemberId, server_id: ServerId) -> Result<usize> {
        self.authorize(actor, server_id).await?;
        let lock = self.reconciler.server_lock(server_id)?;
        let count = {
            let _guard = lock.lock().await;
            self.require_server(server_id).await?;

            let mut changes = Changeset::new(server_id);
            for mut row in self.repository.list_related(server_id).await? {
                stats::reset(&mut row);
                changes.related.push(row);
            }
            let count = changes.related.len();
            self.repository.commit(changes).await?;
            count
        };

        warn!("{} reset all queue details for server {}", actor, server_id);
        self.request_pass(server_id);
        Ok(count)
    }

    /// Grant admin permission to a member already seen in the server
    pub async fn add_admin(
        &self,
        actor: MemberId,
        server_id: ServerId,
        target: &MemberRef,
    ) -> Result<Related> {
        self.authorize(actor, server_id).await?;
        let member = resolve_member(self.repository.as_ref(), target).await?;

        let lock = self.reconciler.server_lock(server_id)?;
        let _guard = lock.lock().await;
        let mut row = self
            .repository
            .get_related(member.id, server_id)
            .await?
            .ok_or_else(|| QueueError::MemberNotFound {
                reference: target.to_string(),
            })?;
        row.is_admin = true;
        self.repository.upsert_related(row.clone()).await?;

        warn!(
            "{} added {} as admin for server {}",
            actor, member.id, server_id
        );
        Ok(row)
    }

    /// Statistics of one member; open to everyone
    pub async fn queue_info(&self, server_id: ServerId, target: &MemberRef) -> Result<QueueInfo> {
        self.require_server(server_id).await?;
        let member = resolve_member(self.repository.as_ref(), target).await?;
        let row = self
            .repository
            .get_related(member.id, server_id)
            .await?
            .ok_or_else(|| QueueError::MemberNotFound {
                reference: target.to_string(),
            })?;

        Ok(QueueInfo {
            nick: row.nick,
            queue_count: row.queue_count,
            queue_time: row.queue_time,
        })
    }

    /// Statistics of every member, as code blocks of bounded size
    pub async fn full_queue_info(&self, actor: MemberId, server_id: ServerId) -> Result<Vec<String>> {
        self.authorize(actor, server_id).await?;
        self.require_server(server_id).await?;
        let rows = self.repository.list_related(server_id).await?;
        Ok(render_full_queue_info(&rows, FULL_INFO_CHUNK_LIMIT))
    }

    async fn update_server(
        &self,
        actor: MemberId,
        server_id: ServerId,
        change: impl FnOnce(&mut Server),
    ) -> Result<Server> {
        self.authorize(actor, server_id).await?;
        let lock = self.reconciler.server_lock(server_id)?;
        let server = {
            let _guard = lock.lock().await;
            let mut server = self.require_server(server_id).await?;
            change(&mut server);
            self.repository.upsert_server(server.clone()).await?;
            server
        };

        if server.is_configured() {
            self.request_pass(server_id);
        }
        Ok(server)
    }

    async fn require_server(&self, server_id: ServerId) -> Result<Server> {
        self.repository
            .get_server(server_id)
            .await?
            .ok_or_else(|| QueueError::ServerNotInitialized { server_id }.into())
    }

    async fn authorize(&self, actor: MemberId, server_id: ServerId) -> Result<()> {
        if let Some(member) = self.repository.get_member(actor).await? {
            if member.is_superuser {
                return Ok(());
            }
        }
        let is_admin = self
            .repository
            .get_related(actor, server_id)
            .await?
            .map(|row| row.is_admin)
            .unwrap_or(false);
        if is_admin {
            Ok(())
        } else {
            Err(QueueError::PermissionDenied {
                member_id: actor,
                server_id,
            }
            .into())
        }
    }

    fn request_pass(&self, server_id: ServerId) {
        if let Some(trigger) = &self.trigger {
            trigger.request(server_id);
        }
    }
}

/// Render statistics rows into code blocks of at most `limit` characters.
///
/// A single line longer than the limit still gets a block of its own.
pub fn render_full_queue_info(rows: &[Related], limit: usize) -> Vec<String> {
    const FENCE: &str = "```";

    let mut chunks = Vec::new();
    let mut current = format!("{}User queue records:\n\n", FENCE);
    let mut has_lines = false;

    for row in rows {
        let line = format!(
            "{}: {} times queued, {}\n",
            row.nick,
            row.queue_count,
            format_dhms(row.queue_time)
        );
        if has_lines && current.len() + line.len() + FENCE.len() > limit {
            current.push_str(FENCE);
            chunks.push(std::mem::replace(&mut current, FENCE.to_string()));
        }
        current.push_str(&line);
        has_lines = true;
    }

    current.push_str(FENCE);
    chunks.push(current);
    chunks
}
