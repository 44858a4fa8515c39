//! Queue ticker
//!
//! Each tick promotes one balanced batch if every faction has one, wakes idle
//! arenas, then republishes next-slot pricing whether or not anything moved.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::metrics::Metrics;
use crate::queue::system::{BattleQueue, Promotion};

/// Arenas that can be asked to start a battle
#[async_trait]
pub trait ArenaPool: Send + Sync {
    /// Start a battle on every idle arena; returns how many began
    async fn begin_idle_battles(&self) -> usize;
}

pub struct BattleQueueScheduler {
    queue: Arc<BattleQueue>,
    arenas: Arc<dyn ArenaPool>,
    interval: Duration,
    metrics: Arc<Metrics>,
}

impl BattleQueueScheduler {
    pub fn new(queue: Arc<BattleQueue>, arenas: Arc<dyn ArenaPool>, metrics: Arc<Metrics>) -> Self {
        let interval = queue.config().tick_interval;
        Self {
            queue,
            arenas,
            interval,
            metrics,
        }
    }

    /// One scheduler pass
    pub async fn tick(&self) {
        Metrics::incr(&self.metrics.queue_ticks);

        match self.queue.promote().await {
            Ok(Promotion::Promoted(n)) => debug!("Queue tick promoted {} mechs", n),
            Ok(Promotion::Short(_)) => {}
            Err(e) => {
                // Nothing was committed; the next tick starts over
                warn!("Queue tick abandoned: {}", e);
                return;
            }
        }

        let started = self.arenas.begin_idle_battles().await;
        if started > 0 {
            info!("Queue tick started {} battles", started);
        }

        self.queue.broadcast_status().await;
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Battle queue scheduler running every {:?}", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Battle queue scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::war_machine::test_profile;
    use crate::game::types::Faction;
    use crate::queue::memory::FailPoint;
    use crate::queue::system::tests::harness;
    use crate::services::pubsub::keys;
    use parking_lot::Mutex;
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    /// One arena that composes a battle when asked
    struct OneArena {
        queue: Arc<BattleQueue>,
        battles: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl ArenaPool for OneArena {
        async fn begin_idle_battles(&self) -> usize {
            if !self.battles.lock().is_empty() {
                return 0;
            }
            let id = Uuid::new_v4();
            match self.queue.compose_battle(id).await {
                Ok(Some(_)) => {
                    self.battles.lock().push(id);
                    1
                }
                _ => 0,
            }
        }
    }

    #[tokio::test]
    async fn test_tick_promotes_then_starts_battle() {
        let h = harness();
        let arena = Arc::new(OneArena {
            queue: h.queue.clone(),
            battles: Mutex::new(Vec::new()),
        });
        let scheduler = BattleQueueScheduler::new(h.queue.clone(), arena.clone(), h.metrics.clone());

        for faction in Faction::ALL {
            for i in 0..3 {
                h.queue.join(test_profile(faction, &i.to_string())).await.unwrap();
            }
        }
        let status_before = h.publisher.with_key(keys::QUEUE_STATUS).len();

        scheduler.tick().await;
        assert_eq!(arena.battles.lock().len(), 1);
        assert_eq!(h.store.backlog_len(), 0);
        assert_eq!(h.store.active_len(), 0);
        assert_eq!(
            h.publisher.with_key(keys::QUEUE_STATUS).len(),
            status_before + Faction::ALL.len()
        );

        // Nothing queued: status still goes out
        scheduler.tick().await;
        assert_eq!(h.metrics.queue_ticks.load(Ordering::Relaxed), 2);
        assert_eq!(h.metrics.queue_ticks_skipped.load(Ordering::Relaxed), 1);
        assert_eq!(
            h.publisher.with_key(keys::QUEUE_STATUS).len(),
            status_before + 2 * Faction::ALL.len()
        );
    }

    #[tokio::test]
    async fn test_failed_tick_is_abandoned() {
        let h = harness();
        let arena = Arc::new(OneArena {
            queue: h.queue.clone(),
            battles: Mutex::new(Vec::new()),
        });
        let scheduler = BattleQueueScheduler::new(h.queue.clone(), arena.clone(), h.metrics.clone());
        for faction in Faction::ALL {
            for i in 0..3 {
                h.queue.join(test_profile(faction, &i.to_string())).await.unwrap();
            }
        }

        h.store.inject_failure(FailPoint::Promote);
        scheduler.tick().await;
        assert!(arena.battles.lock().is_empty());
        assert_eq!(h.store.backlog_len(), 9);

        scheduler.tick().await;
        assert_eq!(arena.battles.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let h = harness();
        let arena = Arc::new(OneArena {
            queue: h.queue.clone(),
            battles: Mutex::new(Vec::new()),
        });
        let scheduler = BattleQueueScheduler::new(h.queue.clone(), arena, h.metrics.clone());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(rx));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(h.metrics.queue_ticks.load(Ordering::Relaxed) >= 3);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
