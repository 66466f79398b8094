use std::time::Duration;

use tokio::time::MissedTickBehavior;

use super::engine::Engine;

impl Engine {
    /// Start the maintenance loop (cache purge, degradation exit checks,
    /// registry pruning) and the auto-scaler. Stopped by [`Engine::shutdown`].
    pub fn start_background(&self) {
        let cfg = self.config();
        let period = Duration::from_secs(cfg.cache.purge_interval_secs.max(1));
        let retention = cfg.pool.task_retention();

        let engine = self.clone();
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        self.track(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => engine.maintain(retention),
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("maintenance loop stopped");
        }));

        if cfg.scaling.enabled {
            let scaler = self.inner.scaler.clone();
            let shutdown = self.inner.shutdown_tx.subscribe();
            self.track(tokio::spawn(scaler.run(shutdown)));
        }
        tracing::info!(period_secs = period.as_secs(), "background maintenance started");
    }

    fn maintain(&self, retention: Duration) {
        let purged = self.cache().purge_expired();
        self.degradation().tick();
        let pruned = self.registry().prune(retention);
        if purged > 0 || pruned > 0 {
            tracing::debug!(purged, pruned, "maintenance pass");
        }
    }
}
