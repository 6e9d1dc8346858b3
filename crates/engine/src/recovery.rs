/// Startup recovery: fold every staging file left behind by a previous
/// process into its aggregate before the first tick.
///
/// Ticks reconcile on their own as well, so this sweep is not required for
/// correctness. It makes leftovers visible in the logs at startup and gets
/// the archives complete before the first probe.
use merge::Appender;
use std::sync::Arc;
use tracing::{info, warn};

use crate::MergeSet;

impl<A: Appender + 'static> MergeSet<A> {
    /// Reconciles all leftover staging files and returns how many were
    /// folded. Failures are logged and left for the next tick to retry.
    pub async fn recover(&self) -> usize {
        let groups = Arc::clone(&self.groups);
        let executor = Arc::clone(&self.executor);

        let task = tokio::task::spawn_blocking(move || {
            let mut recovered = 0;
            for group in groups.iter() {
                for cache in &group.caches {
                    match executor.reconcile(cache, &group.aggregate) {
                        Ok(Some(bytes)) => {
                            info!(
                                cache = %cache.display(),
                                aggregate = %group.aggregate.display(),
                                bytes,
                                "recovered staging file from a previous run"
                            );
                            recovered += 1;
                        }
                        Ok(None) => {}
                        Err(e) => warn!(
                            cache = %cache.display(),
                            error = %e,
                            "could not recover staging file, will retry on next tick"
                        ),
                    }
                }
            }
            recovered
        });

        match task.await {
            Ok(recovered) => recovered,
            Err(e) => {
                warn!(error = %e, "startup recovery task panicked");
                0
            }
        }
    }
}
