//! Queue entry timeout state machine
//!
//! An entry is either actively `Queued` or `TimedOut` while its member is
//! away. Absence during an active session moves it towards removal, renewed
//! presence brings a timed-out entry back, and a closing session forces
//! removal straight away. Removals are either counted towards the member's
//! statistics or discarded.

use crate::types::{QueueEntry, Server};
use crate::utils::{non_negative, to_delta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Observable state of a persisted entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Queued,
    TimedOut { since: DateTime<Utc> },
}

impl EntryState {
    pub fn of(entry: &QueueEntry) -> Self {
        match entry.timeout_start {
            None => EntryState::Queued,
            Some(since) => EntryState::TimedOut { since },
        }
    }
}

/// Why an entry was dropped without touching statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscardReason {
    /// Left before the wait threshold elapsed
    UnderWaitThreshold,
    /// Timestamps contradict each other (clock skew or reordering)
    InvalidTimeout(String),
}

/// Outcome of applying one event to one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changes
    Unchanged,
    /// `Queued -> TimedOut`, countdown starts at the given instant
    StartTimeout { at: DateTime<Utc> },
    /// `TimedOut -> Queued`
    Resume,
    /// Terminal; statistics credited with `accrued`
    RemoveCounted { accrued: Duration },
    /// Terminal; statistics untouched
    RemoveDiscarded { reason: DiscardReason },
}

impl Transition {
    pub fn is_removal(&self) -> bool {
        matches!(
            self,
            Transition::RemoveCounted { .. } | Transition::RemoveDiscarded { .. }
        )
    }

    /// Apply a non-terminal transition to the entry, returning whether it changed
    pub fn apply(&self, entry: &mut QueueEntry) -> bool {
        match self {
            Transition::StartTimeout { at } => {
                entry.timeout_start = Some(*at);
                true
            }
            Transition::Resume => {
                entry.timeout_start = None;
                true
            }
            _ => false,
        }
    }
}

/// Per-server thresholds driving the transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub wait_threshold: Duration,
    pub timeout_duration: Duration,
}

impl TimeoutPolicy {
    pub fn new(wait_threshold: Duration, timeout_duration: Duration) -> Self {
        Self {
            wait_threshold,
            timeout_duration,
        }
    }

    pub fn for_server(server: &Server) -> Self {
        Self::new(server.wait_threshold(), server.timeout_duration())
    }

    /// Member missing from the snapshot during an active session
    pub fn on_absent(&self, entry: &QueueEntry, now: DateTime<Utc>) -> Transition {
        let queued_for = now.signed_duration_since(entry.join_time);
        let wait = to_delta(self.wait_threshold);

        match EntryState::of(entry) {
            EntryState::Queued => {
                if queued_for < wait {
                    Transition::RemoveDiscarded {
                        reason: DiscardReason::UnderWaitThreshold,
                    }
                } else {
                    Transition::StartTimeout { at: now }
                }
            }
            EntryState::TimedOut { since } => {
                let away_for = now.signed_duration_since(since);
                if away_for < chrono::TimeDelta::zero() {
                    Transition::RemoveDiscarded {
                        reason: DiscardReason::InvalidTimeout(format!(
                            "timeout started {}s in the future",
                            -away_for.num_seconds()
                        )),
                    }
                } else if queued_for < wait {
                    Transition::RemoveDiscarded {
                        reason: DiscardReason::InvalidTimeout(format!(
                            "on timeout after only {}s queued",
                            queued_for.num_seconds()
                        )),
                    }
                } else if away_for >= to_delta(self.timeout_duration) {
                    Transition::RemoveCounted {
                        accrued: self.accrued(entry, now),
                    }
                } else {
                    Transition::Unchanged
                }
            }
        }
    }

    /// Member seen in the snapshot during an active session
    pub fn on_present(&self, entry: &QueueEntry) -> Transition {
        match EntryState::of(entry) {
            EntryState::Queued => Transition::Unchanged,
            EntryState::TimedOut { .. } => Transition::Resume,
        }
    }

    /// Session closed while the entry still exists, whatever its state
    pub fn on_session_closed(&self, entry: &QueueEntry, now: DateTime<Utc>) -> Transition {
        let queued_for = now.signed_duration_since(entry.join_time);
        if queued_for < to_delta(self.wait_threshold) {
            Transition::RemoveDiscarded {
                reason: DiscardReason::UnderWaitThreshold,
            }
        } else {
            Transition::RemoveCounted {
                accrued: self.accrued(entry, now),
            }
        }
    }

    /// Queued time beyond the wait threshold, clamped at zero
    pub fn accrued(&self, entry: &QueueEntry, now: DateTime<Utc>) -> Duration {
        non_negative(now.signed_duration_since(entry.join_time))
            .saturating_sub(self.wait_threshold)
    }

    /// Time left before a timed-out entry is removed, zero once overdue
    pub fn remaining_timeout(&self, entry: &QueueEntry, now: DateTime<Utc>) -> Option<Duration> {
        let since = entry.timeout_start?;
        let away_for = non_negative(now.signed_duration_since(since));
        Some(self.timeout_duration.saturating_sub(away_for))
    }
}
