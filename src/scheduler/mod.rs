//! Reconciliation scheduler
//!
//! A periodic tick reconciles every known server; ad-hoc triggers (presence
//! updates, admin changes) reconcile a single server through the same entry
//! point. Shutdown is only observed between passes, so a pass in flight
//! always reaches its commit boundary.

use crate::error::Result;
use crate::queue::{log_pass_failure, QueueReconciler};
use crate::types::ServerId;
use anyhow::anyhow;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Cloneable handle requesting an out-of-band pass for one server
#[derive(Debug, Clone)]
pub struct ReconcileTrigger {
    tx: mpsc::Sender<ServerId>,
}

impl ReconcileTrigger {
    /// Create a trigger and the receiving end the scheduler consumes
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ServerId>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    /// Request a pass; returns false when the request was dropped
    pub fn request(&self, server_id: ServerId) -> bool {
        match self.tx.try_send(server_id) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                // The next tick covers it
                debug!("Trigger buffer full, dropping request for server {}", server_id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Scheduler stopped, dropping request for server {}", server_id);
                false
            }
        }
    }
}

/// Outcome counts of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub servers: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Reconcile every server concurrently; one failure never affects another
pub async fn reconcile_all(reconciler: &QueueReconciler) -> TickSummary {
    let servers = match reconciler.repository().list_servers().await {
        Ok(servers) => servers,
        Err(e) => {
            error!("Failed to list servers for reconciliation: {:#}", e);
            return TickSummary::default();
        }
    };

    let passes = servers.iter().map(|server| async move {
        let result = reconciler.reconcile(server.id).await;
        if let Err(e) = &result {
            log_pass_failure(server.id, e);
        }
        result.is_ok()
    });
    let results = join_all(passes).await;

    let succeeded = results.iter().filter(|ok| **ok).count();
    TickSummary {
        servers: results.len(),
        succeeded,
        failed: results.len() - succeeded,
    }
}

/// Shared view of whether a scheduler loop is currently running
#[derive(Debug, Clone, Default)]
pub struct SchedulerLiveness(Arc<AtomicBool>);

impl SchedulerLiveness {
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self, running: bool) {
        self.0.store(running, Ordering::SeqCst);
    }
}

/// Clears the liveness flag however the loop exits, panics included
struct RunningGuard(SchedulerLiveness);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Drives the reconciler from a timer and a trigger channel
pub struct ReconcileScheduler {
    reconciler: Arc<QueueReconciler>,
    refresh: Duration,
    triggers: mpsc::Receiver<ServerId>,
    liveness: SchedulerLiveness,
}

impl ReconcileScheduler {
    pub fn new(
        reconciler: Arc<QueueReconciler>,
        refresh: Duration,
        buffer: usize,
    ) -> (Self, ReconcileTrigger) {
        let (trigger, triggers) = ReconcileTrigger::channel(buffer);
        (
            Self {
                reconciler,
                refresh,
                triggers,
                liveness: SchedulerLiveness::default(),
            },
            trigger,
        )
    }

    /// Flag that is true while `run` is looping
    pub fn liveness(&self) -> SchedulerLiveness {
        self.liveness.clone()
    }

    /// Run until `shutdown` turns true or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let ReconcileScheduler {
            reconciler,
            refresh,
            mut triggers,
            liveness,
        } = self;
        liveness.set(true);
        let _running = RunningGuard(liveness);

        let mut interval = tokio::time::interval(refresh);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Reconciliation scheduler started ({}s interval)", refresh.as_secs());

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    let summary = reconcile_all(&reconciler).await;
                    debug!(
                        "Tick finished: {} servers, {} ok, {} failed",
                        summary.servers, summary.succeeded, summary.failed
                    );
                }
                Some(server_id) = triggers.recv() => {
                    debug!("Triggered pass for server {}", server_id);
                    if let Err(e) = reconciler.reconcile(server_id).await {
                        log_pass_failure(server_id, &e);
                    }
                }
            }
        }

        info!("Reconciliation scheduler stopped");
    }

    /// Run on a background task
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        SchedulerHandle { shutdown_tx, task }
    }
}

/// Owner of a spawned scheduler
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal shutdown and wait for the in-flight pass to finish
    pub async fn shutdown(self, timeout: Duration) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        match tokio::time::timeout(timeout, self.task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(anyhow!("Scheduler task failed: {}", e)),
            Err(_) => Err(anyhow!(
                "Scheduler did not stop within {}s",
                timeout.as_secs()
            )),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
