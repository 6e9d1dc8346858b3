/// Periodic driver for a [`MergeSet`].
///
/// # Overlap
///
/// A tick runs to completion before the loop looks at the timer again, and
/// the timer skips ticks missed while a run was in flight. Two runs over the
/// same pairs therefore never overlap.
///
/// # Stopping
///
/// [`Shutdown::trigger`] is observed between ticks. A tick already in
/// progress finishes all of its jobs first, so no job is cut off between
/// protocol steps.
use anyhow::{ensure, Result};
use merge::{Appender, StreamAppender};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::MergeSet;

/// Cloneable stop signal shared between the scheduler and whoever decides
/// to stop it (signal handler, test, embedding application).
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Asks every holder of this signal to stop. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`Shutdown::trigger`] has been called.
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Runs a [`MergeSet`] once immediately and then every `interval`.
pub struct Scheduler<A: Appender = StreamAppender> {
    merge_set: Arc<MergeSet<A>>,
    interval: Duration,
}

impl<A: Appender + 'static> Scheduler<A> {
    /// # Errors
    ///
    /// Returns an error if `interval` is zero.
    pub fn new(merge_set: MergeSet<A>, interval: Duration) -> Result<Self> {
        ensure!(!interval.is_zero(), "scheduler interval must be greater than zero");
        Ok(Self {
            merge_set: Arc::new(merge_set),
            interval,
        })
    }

    pub fn merge_set(&self) -> &Arc<MergeSet<A>> {
        &self.merge_set
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Recovers leftover staging files, then ticks until `shutdown` fires.
    /// Returns the number of ticks run.
    pub async fn run(&self, mut shutdown: Shutdown) -> u64 {
        let recovered = self.merge_set.recover().await;
        if recovered > 0 {
            info!(recovered, "startup recovery complete");
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut ticks = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    info!(ticks, "scheduler received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.merge_set.run_once().await;
                    ticks += 1;
                }
            }
        }
        ticks
    }
}
