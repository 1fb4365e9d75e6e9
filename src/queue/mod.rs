//! Queue engine: timeout state machine, statistics, reconciliation and
//! rendering of the status message.

pub mod reconciler;
pub mod renderer;
pub mod stats;
pub mod timeout;

pub use reconciler::{
    log_pass_failure, plan_pass, MessageUpdate, PassCounts, PassInput, PassPlan, PassReport,
    QueueReconciler,
};
pub use renderer::{render, QueueView};
pub use stats::StatsSummary;
pub use timeout::{DiscardReason, EntryState, TimeoutPolicy, Transition};
