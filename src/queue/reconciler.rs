//! Presence reconciliation
//!
//! A pass compares the membership snapshot of a server's queue channel with
//! the persisted entries and drives every entry through the timeout state
//! machine. Planning is a pure function producing a `Changeset`;
//! `QueueReconciler` wraps it with the I/O, renders the status message and
//! commits the changeset in one unit.
//!
//! Passes for the same server are serialized by a per-server async mutex.
//! Passes for different servers share nothing but the repository.

use crate::error::{QueueError, Result};
use crate::metrics::{MetricsCollector, PassOutcome};
use crate::platform::{MembershipSource, MessageChannel};
use crate::queue::renderer::{render, QueueView};
use crate::queue::stats;
use crate::queue::timeout::{DiscardReason, TimeoutPolicy, Transition};
use crate::session::{SessionPhase, SessionSchedule};
use crate::storage::{Changeset, Repository};
use crate::types::{
    ChannelId, EntryId, Member, MemberId, Presence, QueueEntry, Related, ServerId,
};
use crate::utils::current_timestamp;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Everything a pass reads, sampled once
#[derive(Debug, Clone)]
pub struct PassInput<'a> {
    pub server_id: ServerId,
    pub policy: TimeoutPolicy,
    pub active: bool,
    pub present: &'a [Presence],
    pub entries: &'a [QueueEntry],
    pub related: &'a [Related],
    pub known_members: &'a HashSet<MemberId>,
    pub now: DateTime<Utc>,
}

/// What happened to one pre-existing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryOutcome {
    pub entry_id: EntryId,
    pub member_id: MemberId,
    pub transition: Transition,
}

impl EntryOutcome {
    /// The contradiction behind a discarded entry, if its timestamps were inconsistent
    pub fn anomaly(&self) -> Option<QueueError> {
        match &self.transition {
            Transition::RemoveDiscarded {
                reason: DiscardReason::InvalidTimeout(detail),
            } => Some(QueueError::InvalidTimeout {
                member_id: self.member_id,
                reason: detail.clone(),
            }),
            _ => None,
        }
    }
}

/// Tallies of a pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassCounts {
    pub joined: u64,
    pub timed_out: u64,
    pub resumed: u64,
    pub removed_counted: u64,
    pub removed_discarded: u64,
    pub anomalies: u64,
    pub nick_refreshes: u64,
    pub members_created: u64,
    pub related_created: u64,
}

/// Result of planning a pass
#[derive(Debug, Clone)]
pub struct PassPlan {
    pub changes: Changeset,
    /// Entries as they stand once the changeset is committed
    pub entries: Vec<QueueEntry>,
    /// Related rows as they stand once the changeset is committed
    pub related: HashMap<MemberId, Related>,
    pub outcomes: Vec<EntryOutcome>,
    pub counts: PassCounts,
}

/// Plan the minimal set of mutations for one pass.
///
/// While the session is active, present members get an entry (created if
/// missing, resumed if timed out) and absent members' entries progress
/// through `TimeoutPolicy::on_absent`. While inactive, every remaining entry
/// is force-removed whether or not its member is present, and nobody joins.
/// Nicks of present members are refreshed in both cases.
pub fn plan_pass(input: &PassInput<'_>) -> PassPlan {
    let mut present: BTreeMap<MemberId, &Presence> = BTreeMap::new();
    for presence in input.present {
        present.entry(presence.id).or_insert(presence);
    }

    let mut changes = Changeset::new(input.server_id);
    let mut counts = PassCounts::default();
    let mut related: HashMap<MemberId, Related> = input
        .related
        .iter()
        .filter(|row| row.server_id == input.server_id)
        .map(|row| (row.member_id, row.clone()))
        .collect();
    let mut dirty: BTreeSet<MemberId> = BTreeSet::new();

    for (&member_id, presence) in &present {
        if !input.known_members.contains(&member_id) {
            changes
                .members
                .push(Member::new(member_id, presence.name.clone()));
            counts.members_created += 1;
        }

        match related.get_mut(&member_id) {
            Some(row) => {
                if row.nick != presence.display_name {
                    row.nick = presence.display_name.clone();
                    dirty.insert(member_id);
                    counts.nick_refreshes += 1;
                }
            }
            None => {
                related.insert(
                    member_id,
                    Related::new(input.server_id, member_id, presence.display_name.clone()),
                );
                dirty.insert(member_id);
                counts.related_created += 1;
            }
        }
    }

    let mut ordered: Vec<&QueueEntry> = input
        .entries
        .iter()
        .filter(|entry| entry.server_id == input.server_id)
        .collect();
    ordered.sort_by(|a, b| a.join_time.cmp(&b.join_time).then(a.id.cmp(&b.id)));

    let mut entries = Vec::with_capacity(ordered.len() + present.len());
    let mut outcomes = Vec::new();
    let mut seen: HashSet<MemberId> = HashSet::new();

    for entry in ordered {
        seen.insert(entry.member_id);

        let transition = if !input.active {
            input.policy.on_session_closed(entry, input.now)
        } else if present.contains_key(&entry.member_id) {
            input.policy.on_present(entry)
        } else {
            input.policy.on_absent(entry, input.now)
        };

        match &transition {
            Transition::Unchanged => {
                entries.push(entry.clone());
                continue;
            }
            Transition::StartTimeout { .. } | Transition::Resume => {
                let mut updated = entry.clone();
                transition.apply(&mut updated);
                if matches!(transition, Transition::Resume) {
                    counts.resumed += 1;
                } else {
                    counts.timed_out += 1;
                }
                changes.entry_upserts.push(updated.clone());
                entries.push(updated);
            }
            Transition::RemoveCounted { accrued } => {
                let row = related.entry(entry.member_id).or_insert_with(|| {
                    Related::new(input.server_id, entry.member_id, entry.member_id.to_string())
                });
                stats::apply_counted_removal(row, *accrued);
                dirty.insert(entry.member_id);
                changes.entry_deletes.push(entry.id);
                counts.removed_counted += 1;
            }
            Transition::RemoveDiscarded { reason } => {
                if matches!(reason, DiscardReason::InvalidTimeout(_)) {
                    counts.anomalies += 1;
                }
                changes.entry_deletes.push(entry.id);
                counts.removed_discarded += 1;
            }
        }

        outcomes.push(EntryOutcome {
            entry_id: entry.id,
            member_id: entry.member_id,
            transition,
        });
    }

    if input.active {
        for &member_id in present.keys() {
            if seen.contains(&member_id) {
                continue;
            }
            let entry = QueueEntry::new(member_id, input.server_id, input.now);
            changes.entry_upserts.push(entry.clone());
            entries.push(entry);
            counts.joined += 1;
        }
    }

    changes.related = dirty
        .iter()
        .filter_map(|member_id| related.get(member_id).cloned())
        .collect();

    PassPlan {
        changes,
        entries,
        related,
        outcomes,
        counts,
    }
}

/// How the status message was brought up to date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageUpdate {
    /// Last bot message already showed this text
    Unchanged,
    Edited,
    /// Old bot messages purged and a new one posted
    Posted,
    /// Dry run, nothing written
    Skipped,
}

impl MessageUpdate {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageUpdate::Unchanged => "unchanged",
            MessageUpdate::Edited => "edited",
            MessageUpdate::Posted => "posted",
            MessageUpdate::Skipped => "skipped",
        }
    }
}

/// Summary of a completed pass
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub server_id: ServerId,
    pub at: DateTime<Utc>,
    pub phase: SessionPhase,
    pub active: bool,
    pub present: usize,
    pub queued: usize,
    pub on_timeout: usize,
    pub counts: PassCounts,
    pub mutations: usize,
    pub message: MessageUpdate,
    pub rendered: String,
}

/// Runs reconciliation passes against injected collaborators
pub struct QueueReconciler {
    repository: Arc<dyn Repository>,
    membership: Arc<dyn MembershipSource>,
    messages: Arc<dyn MessageChannel>,
    schedule: SessionSchedule,
    metrics: Option<Arc<MetricsCollector>>,
    dry_run: bool,
    locks: std::sync::Mutex<HashMap<ServerId, Arc<Mutex<()>>>>,
    reports: std::sync::RwLock<HashMap<ServerId, PassReport>>,
}

impl QueueReconciler {
    pub fn new(
        repository: Arc<dyn Repository>,
        membership: Arc<dyn MembershipSource>,
        messages: Arc<dyn MessageChannel>,
        schedule: SessionSchedule,
    ) -> Self {
        Self {
            repository,
            membership,
            messages,
            schedule,
            metrics: None,
            dry_run: false,
            locks: std::sync::Mutex::new(HashMap::new()),
            reports: std::sync::RwLock::new(HashMap::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Plan and render passes without touching the platform or repository
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn repository(&self) -> Arc<dyn Repository> {
        self.repository.clone()
    }

    pub fn schedule(&self) -> &SessionSchedule {
        &self.schedule
    }

    /// The mutex serializing every mutation of one server's queue
    pub fn server_lock(&self, server_id: ServerId) -> Result<Arc<Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| QueueError::InternalError {
            message: "Failed to acquire server lock table".to_string(),
        })?;
        Ok(locks.entry(server_id).or_default().clone())
    }

    /// Report of the most recent successful pass for a server
    pub fn last_report(&self, server_id: ServerId) -> Option<PassReport> {
        self.reports
            .read()
            .ok()
            .and_then(|reports| reports.get(&server_id).cloned())
    }

    /// Reconcile one server at the current wall-clock time
    pub async fn reconcile(&self, server_id: ServerId) -> Result<PassReport> {
        let lock = self.server_lock(server_id)?;
        let _guard = lock.lock().await;
        let now = current_timestamp();
        self.run_locked(server_id, now).await
    }

    /// Reconcile one server as of `now`
    pub async fn reconcile_at(&self, server_id: ServerId, now: DateTime<Utc>) -> Result<PassReport> {
        let lock = self.server_lock(server_id)?;
        let _guard = lock.lock().await;
        self.run_locked(server_id, now).await
    }

    async fn run_locked(&self, server_id: ServerId, now: DateTime<Utc>) -> Result<PassReport> {
        let started = Instant::now();
        let result = self.run_pass(server_id, now).await;

        let outcome = match &result {
            Ok(_) => PassOutcome::Success,
            Err(e) => match e.downcast_ref::<QueueError>() {
                Some(QueueError::Validation { .. }) => PassOutcome::Skipped,
                Some(err) if err.is_transient() => PassOutcome::Transient,
                _ => PassOutcome::Failed,
            },
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_pass(outcome, started.elapsed());
        }

        if let Ok(report) = &result {
            if let Ok(mut reports) = self.reports.write() {
                reports.insert(server_id, report.clone());
            }
        }
        result
    }

    async fn run_pass(&self, server_id: ServerId, now: DateTime<Utc>) -> Result<PassReport> {
        let server = self
            .repository
            .get_server(server_id)
            .await?
            .ok_or(QueueError::ServerNotFound { server_id })?;

        let (voice_channel, output_channel) = match (server.voice_channel, server.output_channel) {
            (Some(voice), Some(output)) => (voice, output),
            _ => {
                return Err(QueueError::Validation {
                    server_id,
                    reason: format!("missing {} channel", server.missing_channels().join(", ")),
                }
                .into())
            }
        };

        let status = self.schedule.evaluate(now);
        debug!(
            "Server {} pass at {}: phase {}, active {}",
            server_id, now, status.phase, status.active
        );

        let present = self
            .membership
            .list_present_members(server_id, voice_channel)
            .await
            .map_err(|e| QueueError::TransientPlatform {
                message: format!("membership fetch for server {} failed: {:#}", server_id, e),
            })?;

        let entries = self.repository.list_queue_entries(server_id).await?;
        let related = self.repository.list_related(server_id).await?;
        let mut known_members = HashSet::new();
        for presence in &present {
            if known_members.contains(&presence.id) {
                continue;
            }
            if self.repository.get_member(presence.id).await?.is_some() {
                known_members.insert(presence.id);
            }
        }

        let policy = TimeoutPolicy::for_server(&server);
        let plan = plan_pass(&PassInput {
            server_id,
            policy,
            active: status.active,
            present: &present,
            entries: &entries,
            related: &related,
            known_members: &known_members,
            now,
        });
        self.log_outcomes(server_id, &plan);

        let rendered = render(&QueueView {
            preamble: &status.preamble,
            active: status.active,
            entries: &plan.entries,
            related: &plan.related,
            policy,
            now,
        });

        let on_timeout = plan.entries.iter().filter(|e| e.is_timed_out()).count();
        let queued = plan.entries.len() - on_timeout;
        let mutations = plan.changes.mutation_count();

        let message = if self.dry_run {
            info!(
                "Dry run for server {}: {} mutations planned\n{}",
                server_id, mutations, rendered
            );
            MessageUpdate::Skipped
        } else {
            let message = self
                .publish(server_id, output_channel, &rendered)
                .await
                .map_err(|e| QueueError::TransientPlatform {
                    message: format!("status update for server {} failed: {:#}", server_id, e),
                })?;
            self.repository.commit(plan.changes).await?;
            message
        };

        if let Some(metrics) = &self.metrics {
            let label = server_id.to_string();
            metrics.record_status_message(message.as_str());
            if !self.dry_run {
                metrics.record_queue_changes(
                    &label,
                    plan.counts.joined,
                    plan.counts.removed_counted,
                    plan.counts.removed_discarded,
                    plan.counts.anomalies,
                );
            }
            metrics.set_queue_depth(&label, queued, on_timeout);
        }

        Ok(PassReport {
            server_id,
            at: now,
            phase: status.phase,
            active: status.active,
            present: present.iter().map(|p| p.id).collect::<HashSet<_>>().len(),
            queued,
            on_timeout,
            counts: plan.counts,
            mutations,
            message,
            rendered,
        })
    }

    /// Edit the last bot message in place, or purge and repost
    async fn publish(
        &self,
        server_id: ServerId,
        channel: ChannelId,
        text: &str,
    ) -> Result<MessageUpdate> {
        match self.messages.find_last_bot_message(server_id, channel).await? {
            Some(last) if last.content == text => Ok(MessageUpdate::Unchanged),
            Some(last) => {
                self.messages.edit_message(&last, text).await?;
                Ok(MessageUpdate::Edited)
            }
            None => {
                self.messages
                    .purge_and_post(server_id, channel, text)
                    .await?;
                Ok(MessageUpdate::Posted)
            }
        }
    }

    fn log_outcomes(&self, server_id: ServerId, plan: &PassPlan) {
        for outcome in &plan.outcomes {
            match &outcome.transition {
                Transition::StartTimeout { at } => info!(
                    "Member {} on queue timeout in server {} since {}",
                    outcome.member_id, server_id, at
                ),
                Transition::Resume => info!(
                    "Member {} returned from timeout in server {}",
                    outcome.member_id, server_id
                ),
                Transition::RemoveCounted { accrued } => info!(
                    "Member {} removed from queue in server {}, credited {}s",
                    outcome.member_id,
                    server_id,
                    accrued.as_secs()
                ),
                Transition::RemoveDiscarded {
                    reason: DiscardReason::UnderWaitThreshold,
                } => info!(
                    "Member {} left queue in server {} before the wait threshold",
                    outcome.member_id, server_id
                ),
                Transition::RemoveDiscarded {
                    reason: DiscardReason::InvalidTimeout(_),
                } => {
                    if let Some(anomaly) = outcome.anomaly() {
                        warn!(
                            "Discarding entry {} in server {}: {}",
                            outcome.entry_id, server_id, anomaly
                        );
                    }
                }
                Transition::Unchanged => {}
            }
        }
        if plan.counts.joined > 0 {
            info!(
                "{} members joined the queue in server {}",
                plan.counts.joined, server_id
            );
        }
    }
}

/// Log a failed pass at the level its error kind deserves
pub fn log_pass_failure(server_id: ServerId, error: &anyhow::Error) {
    match error.downcast_ref::<QueueError>() {
        Some(QueueError::Validation { reason, .. }) => {
            warn!("Skipping server {}: {}", server_id, reason)
        }
        Some(err) if err.is_transient() => {
            warn!("Pass for server {} abandoned, retrying next tick: {}", server_id, err)
        }
        _ => error!("Pass for server {} failed: {:#}", server_id, error),
    }
}
