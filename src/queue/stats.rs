//! Per-member queue statistics
//!
//! Counted removals credit the member's `Related` row for the server. The
//! reconciler invokes this exactly once per removed entry, inside the same
//! changeset that deletes the entry.

use crate::types::Related;
use std::time::Duration;

/// Credit one counted removal to a member's statistics
pub fn apply_counted_removal(related: &mut Related, accrued: Duration) {
    related.queue_count += 1;
    related.queue_time = related.queue_time.saturating_add(accrued);
}

/// Zero a member's statistics; the only way they ever decrease
pub fn reset(related: &mut Related) {
    related.queue_count = 0;
    related.queue_time = Duration::ZERO;
}

/// Aggregate of one server's statistics, for reporting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSummary {
    pub members: usize,
    pub total_count: u64,
    pub total_time: Duration,
}

impl StatsSummary {
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a Related>) -> Self {
        rows.into_iter().fold(Self::default(), |mut summary, row| {
            summary.members += 1;
            summary.total_count += row.queue_count;
            summary.total_time = summary.total_time.saturating_add(row.queue_time);
            summary
        })
    }
}
