//! Battle queue
//!
//! The only writer of the backlog, active queue and in-battle tables. Store
//! calls are single transactions; payments are called only after the store
//! has committed, and every refund outcome is written back to the store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::battle::war_machine::WarMachineProfile;
use crate::config::QueueConfig;
use crate::game::types::{BattleId, Faction, MechId, PlayerId};
use crate::metrics::Metrics;
use crate::queue::pricing::{calc_next_queue_status, estimate_eta_seconds, QueueStatus};
use crate::queue::store::{within, PaidFee, QueueEntry, QueueSlot, QueueStore, RefundStatus, StoreError};
use crate::services::payments::{
    bounded, PaymentError, PaymentsClient, SpendSupsRequest, TransactionId, TreasuryAccount,
};
use crate::services::pubsub::{keys, publish_event, topics, Publisher};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Mech {0} is already queued")]
    AlreadyQueued(MechId),
    #[error("Mech {0} is not queued")]
    NotQueued(MechId),
    #[error("Mech {0} is in battle")]
    InBattle(MechId),
    #[error("Queue store error: {0}")]
    Store(#[from] StoreError),
    #[error("Queue fee payment failed: {0}")]
    Payment(#[from] PaymentError),
}

/// Result of one promotion attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    /// Entries moved from backlog to the active queue
    Promoted(usize),
    /// A faction had fewer eligible entries than a batch; nothing moved
    Short(Faction),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinReceipt {
    pub mech_id: MechId,
    pub position: usize,
    pub eta_seconds: u64,
    pub fee: Decimal,
    pub transaction_id: TransactionId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct MechQueuePosition {
    mech_id: MechId,
    position: usize,
    eta_seconds: u64,
}

pub struct BattleQueue {
    store: Arc<dyn QueueStore>,
    payments: Arc<dyn PaymentsClient>,
    publisher: Arc<dyn Publisher>,
    config: QueueConfig,
    timeout: Duration,
    metrics: Arc<Metrics>,
}

impl BattleQueue {
    pub fn new(
        store: Arc<dyn QueueStore>,
        payments: Arc<dyn PaymentsClient>,
        publisher: Arc<dyn Publisher>,
        config: QueueConfig,
        timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            payments,
            publisher,
            config,
            timeout,
            metrics,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Price of the next slot for `faction`
    pub async fn status(&self, faction: Faction) -> Result<QueueStatus, QueueError> {
        let length = within(self.timeout, self.store.faction_queue_count(faction)).await?;
        Ok(calc_next_queue_status(length as u64, &self.config))
    }

    /// Charge the current fee and put the mech in its faction's backlog
    pub async fn join(&self, mech: WarMachineProfile) -> Result<JoinReceipt, QueueError> {
        let mech_id = mech.id;
        let faction = mech.faction;

        match within(self.timeout, self.store.locate(mech_id)).await? {
            None => {}
            Some(QueueSlot::InBattle(_)) => return Err(QueueError::InBattle(mech_id)),
            Some(_) => return Err(QueueError::AlreadyQueued(mech_id)),
        }

        let status = self.status(faction).await?;
        let transaction_id = bounded(
            self.timeout,
            self.payments.spend_sups(SpendSupsRequest {
                from: mech.owner_id,
                to: TreasuryAccount::BattleQueue,
                amount: status.queue_cost,
                reference: format!("queue_join:{}:{}", mech_id, Utc::now().timestamp_millis()),
                description: format!("Battle queue fee for {}", mech.name),
            }),
        )
        .await?;

        let entry = QueueEntry {
            mech,
            fee: PaidFee {
                transaction_id: transaction_id.clone(),
                amount: status.queue_cost,
            },
            queued_at: Utc::now(),
        };

        if let Err(e) = within(self.timeout, self.store.enqueue_backlog(entry)).await {
            warn!("Enqueue of {} failed, refunding fee {}: {}", mech_id, transaction_id, e);
            if let Err(refund_err) = bounded(self.timeout, self.payments.refund_sups(&transaction_id)).await {
                Metrics::incr(&self.metrics.refunds_failed);
                error!(
                    "Refund of queue fee {} ({} for mech {}) failed: {}",
                    transaction_id, status.queue_cost, mech_id, refund_err
                );
            } else {
                Metrics::incr(&self.metrics.refunds_issued);
            }
            return Err(match e {
                StoreError::AlreadyQueued(id) => QueueError::AlreadyQueued(id),
                other => other.into(),
            });
        }

        let position = within(self.timeout, self.store.queue_position(mech_id))
            .await?
            .unwrap_or(0);
        let eta_seconds = estimate_eta_seconds(position as u64, &self.config);
        self.publish_position(faction, mech_id, position);
        self.publish_status(faction).await;

        info!("Mech {} joined {} queue at position {}", mech_id, faction, position);
        Ok(JoinReceipt {
            mech_id,
            position,
            eta_seconds,
            fee: status.queue_cost,
            transaction_id,
        })
    }

    /// Take a queued mech out and refund its fee
    pub async fn leave(&self, mech_id: MechId, owner_id: PlayerId) -> Result<RefundStatus, QueueError> {
        let entry = match within(self.timeout, self.store.remove_entry(mech_id, owner_id)).await {
            Ok(entry) => entry,
            Err(StoreError::NotQueued(id)) => return Err(QueueError::NotQueued(id)),
            Err(StoreError::InBattle(id)) => return Err(QueueError::InBattle(id)),
            Err(e) => return Err(e.into()),
        };

        let status = self.refund(&entry).await;
        self.publish_status(entry.faction()).await;
        info!("Mech {} left the {} queue", mech_id, entry.faction());
        Ok(status)
    }

    /// Move one batch per faction from backlog to the active queue, or none
    pub async fn promote(&self) -> Result<Promotion, QueueError> {
        let limit = self.config.faction_mech_limit;
        let blacklist = within(self.timeout, self.store.previous_battle_owner_ids()).await?;

        let mut batch = Vec::with_capacity(limit * Faction::ALL.len());
        for faction in Faction::ALL {
            let pending = within(
                self.timeout,
                self.store.pending_backlog(faction, &blacklist, limit),
            )
            .await?;
            if pending.len() < limit {
                Metrics::incr(&self.metrics.queue_ticks_skipped);
                debug!("{} backlog has {}/{} eligible, skipping promotion", faction, pending.len(), limit);
                return Ok(Promotion::Short(faction));
            }
            batch.extend(pending);
        }

        within(self.timeout, self.store.promote_backlog_batch(&batch)).await?;
        Metrics::add(&self.metrics.queue_promotions, batch.len() as u64);
        info!("Promoted {} mechs into the active queue", batch.len());

        for entry in &batch {
            match within(self.timeout, self.store.queue_position(entry.mech_id())).await {
                Ok(Some(position)) => self.publish_position(entry.faction(), entry.mech_id(), position),
                Ok(None) => {}
                Err(e) => warn!("Position lookup for {} failed: {}", entry.mech_id(), e),
            }
        }

        Ok(Promotion::Promoted(batch.len()))
    }

    /// Trim every faction's active queue to a common multiple of the batch size
    ///
    /// Repairs imbalance left by an unclean shutdown. Running it twice in a
    /// row culls nothing the second time.
    pub async fn reconcile(&self) -> Result<usize, QueueError> {
        let limit = self.config.faction_mech_limit.max(1);

        let mut min_count = usize::MAX;
        for faction in Faction::ALL {
            let count = within(self.timeout, self.store.active_queue_count(faction)).await?;
            min_count = min_count.min(count);
        }
        let keep = min_count / limit * limit;

        let mut culled = 0;
        for faction in Faction::ALL {
            let removed = within(self.timeout, self.store.cull_excess_queue(faction, keep)).await?;
            if removed.is_empty() {
                continue;
            }
            info!("Culled {} {} active queue entries down to {}", removed.len(), faction, keep);

            // Committed; refund before a later faction can fail the pass
            for entry in &removed {
                self.refund(entry).await;
            }
            Metrics::add(&self.metrics.queue_culled, removed.len() as u64);
            culled += removed.len();
        }
        Ok(culled)
    }

    /// Publish next-slot pricing for every faction
    pub async fn broadcast_status(&self) {
        for faction in Faction::ALL {
            self.publish_status(faction).await;
        }
    }

    /// Reserve a balanced roster for a new battle
    pub async fn compose_battle(&self, battle_id: BattleId) -> Result<Option<Vec<WarMachineProfile>>, QueueError> {
        let roster = within(
            self.timeout,
            self.store.take_battle_roster(battle_id, self.config.faction_mech_limit),
        )
        .await?;
        Ok(roster.map(|entries| entries.into_iter().map(|e| e.mech).collect()))
    }

    /// Release a finished battle's roster; its owners sit out the next promotion
    pub async fn settle_battle(&self, battle_id: BattleId) -> Result<usize, QueueError> {
        let owners = within(self.timeout, self.store.complete_battle(battle_id)).await?;
        debug!("Battle {} settled, {} owners blacklisted for the next tick", battle_id, owners.len());
        Ok(owners.len())
    }

    async fn refund(&self, entry: &QueueEntry) -> RefundStatus {
        let tx = &entry.fee.transaction_id;
        let status = match bounded(self.timeout, self.payments.refund_sups(tx)).await {
            Ok(refund_id) => {
                Metrics::incr(&self.metrics.refunds_issued);
                RefundStatus::Refunded(refund_id)
            }
            Err(e) => {
                Metrics::incr(&self.metrics.refunds_failed);
                error!(
                    "Refund of queue fee {} ({} to {} for mech {}) failed: {}",
                    tx,
                    entry.fee.amount,
                    entry.owner_id(),
                    entry.mech_id(),
                    e
                );
                RefundStatus::Failed(e.to_string())
            }
        };

        if let Err(e) = within(self.timeout, self.store.refund_fee(tx, status.clone())).await {
            error!("Could not record refund outcome for {}: {}", tx, e);
        }
        status
    }

    fn publish_position(&self, faction: Faction, mech_id: MechId, position: usize) {
        publish_event(
            self.publisher.as_ref(),
            topics::mech_queue(faction, mech_id),
            keys::MECH_QUEUE_POSITION,
            &MechQueuePosition {
                mech_id,
                position,
                eta_seconds: estimate_eta_seconds(position as u64, &self.config),
            },
        );
    }

    async fn publish_status(&self, faction: Faction) {
        match self.status(faction).await {
            Ok(status) => publish_event(
                self.publisher.as_ref(),
                topics::queue_status(faction),
                keys::QUEUE_STATUS,
                &status,
            ),
            Err(e) => warn!("Queue status for {} unavailable: {}", faction, e),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::battle::war_machine::test_profile;
    use crate::game::types::sups;
    use crate::queue::memory::{FailPoint, MemoryQueueStore};
    use crate::services::payments::LocalPayments;
    use crate::services::pubsub::testing::RecordingPublisher;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    pub(crate) struct Harness {
        pub queue: Arc<BattleQueue>,
        pub store: Arc<MemoryQueueStore>,
        pub payments: Arc<LocalPayments>,
        pub publisher: Arc<RecordingPublisher>,
        pub metrics: Arc<Metrics>,
    }

    pub(crate) fn harness() -> Harness {
        let store = Arc::new(MemoryQueueStore::new());
        let payments = Arc::new(LocalPayments::new(sups(dec!(1000))));
        let publisher = Arc::new(RecordingPublisher::default());
        let metrics = Arc::new(Metrics::new());
        let queue = Arc::new(BattleQueue::new(
            store.clone(),
            payments.clone(),
            publisher.clone(),
            QueueConfig::default(),
            Duration::from_secs(5),
            metrics.clone(),
        ));
        Harness {
            queue,
            store,
            payments,
            publisher,
            metrics,
        }
    }

    async fn fill_backlog(h: &Harness, counts: [usize; 3]) -> Vec<WarMachineProfile> {
        let mut mechs = Vec::new();
        for (faction, n) in Faction::ALL.into_iter().zip(counts) {
            for i in 0..n {
                let mech = test_profile(faction, &format!("{}-{}", faction, i));
                h.queue.join(mech.clone()).await.unwrap();
                mechs.push(mech);
            }
        }
        mechs
    }

    #[tokio::test]
    async fn test_join_charges_and_rejects_duplicates() {
        let h = harness();
        let mech = test_profile(Faction::Zaibatsu, "z1");
        let owner = mech.owner_id;

        let receipt = h.queue.join(mech.clone()).await.unwrap();
        assert_eq!(receipt.position, 1);
        assert_eq!(receipt.eta_seconds, 300);
        assert_eq!(h.payments.balance(owner), sups(dec!(1000)) - receipt.fee);
        assert!(matches!(h.queue.join(mech.clone()).await, Err(QueueError::AlreadyQueued(_))));

        assert_eq!(h.publisher.with_key(keys::MECH_QUEUE_POSITION).len(), 1);
        assert!(!h.publisher.with_key(keys::QUEUE_STATUS).is_empty());

        // Second slot costs more than the first
        let next = h.queue.status(Faction::Zaibatsu).await.unwrap();
        assert!(next.queue_cost >= receipt.fee);
        assert_eq!(next.queue_length, 1);
    }

    #[tokio::test]
    async fn test_leave_refunds_fee() {
        let h = harness();
        let mech = test_profile(Faction::RedMountain, "r1");
        let receipt = h.queue.join(mech.clone()).await.unwrap();

        let status = h.queue.leave(mech.id, mech.owner_id).await.unwrap();
        assert!(matches!(status, RefundStatus::Refunded(_)));
        assert_eq!(h.payments.balance(mech.owner_id), sups(dec!(1000)));
        assert!(h.payments.is_refunded(&receipt.transaction_id));

        assert!(matches!(
            h.queue.leave(mech.id, mech.owner_id).await,
            Err(QueueError::NotQueued(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_enqueue_refunds_fee() {
        let h = harness();
        let mech = test_profile(Faction::BostonCybernetics, "b1");
        h.store.inject_failure(FailPoint::Enqueue);

        assert!(matches!(h.queue.join(mech.clone()).await, Err(QueueError::Store(_))));
        assert_eq!(h.payments.balance(mech.owner_id), sups(dec!(1000)));
        assert_eq!(h.store.backlog_len(), 0);
    }

    #[tokio::test]
    async fn test_promotion_is_all_or_nothing() {
        let h = harness();
        fill_backlog(&h, [3, 3, 2]).await;

        let outcome = h.queue.promote().await.unwrap();
        assert_eq!(outcome, Promotion::Short(Faction::BostonCybernetics));
        assert_eq!(h.store.active_len(), 0);
        assert_eq!(h.store.backlog_len(), 8);

        h.queue
            .join(test_profile(Faction::BostonCybernetics, "late"))
            .await
            .unwrap();
        assert_eq!(h.queue.promote().await.unwrap(), Promotion::Promoted(9));
        assert_eq!(h.store.active_len(), 9);
        assert_eq!(h.store.backlog_len(), 0);
    }

    #[tokio::test]
    async fn test_failed_promotion_commits_nothing() {
        let h = harness();
        fill_backlog(&h, [3, 3, 3]).await;
        h.store.inject_failure(FailPoint::Promote);

        assert!(h.queue.promote().await.is_err());
        assert_eq!(h.store.backlog_len(), 9);
        assert_eq!(h.store.active_len(), 0);

        assert_eq!(h.queue.promote().await.unwrap(), Promotion::Promoted(9));
    }

    #[tokio::test]
    async fn test_previous_owners_sit_out() {
        let h = harness();
        fill_backlog(&h, [3, 3, 3]).await;
        h.queue.promote().await.unwrap();

        let battle = Uuid::new_v4();
        let roster = h.queue.compose_battle(battle).await.unwrap().unwrap();
        assert_eq!(roster.len(), 9);
        assert!(h.queue.compose_battle(Uuid::new_v4()).await.unwrap().is_none());
        assert!(matches!(
            h.queue.leave(roster[0].id, roster[0].owner_id).await,
            Err(QueueError::InBattle(_))
        ));

        // The same owners queue again straight after the battle
        for mech in &roster {
            let mut again = test_profile(mech.faction, "again");
            again.owner_id = mech.owner_id;
            h.queue.join(again).await.unwrap();
        }
        assert_eq!(h.queue.settle_battle(battle).await.unwrap(), 9);
        assert_eq!(h.queue.promote().await.unwrap(), Promotion::Short(Faction::Zaibatsu));
    }

    /// Put a paid entry straight into the active queue, bypassing promotion
    async fn seed_paid(h: &Harness, faction: Faction, name: &str, queued_at: chrono::DateTime<Utc>) -> QueueEntry {
        let mech = test_profile(faction, name);
        let transaction_id = h
            .payments
            .spend_sups(SpendSupsRequest {
                from: mech.owner_id,
                to: TreasuryAccount::BattleQueue,
                amount: sups(dec!(1)),
                reference: format!("seed:{}", name),
                description: "seed".to_string(),
            })
            .await
            .unwrap();
        let entry = QueueEntry {
            mech,
            fee: PaidFee {
                transaction_id,
                amount: sups(dec!(1)),
            },
            queued_at,
        };
        h.store.seed_active([entry.clone()]);
        entry
    }

    #[tokio::test]
    async fn test_reconcile_culls_oldest_and_is_idempotent() {
        let h = harness();
        fill_backlog(&h, [3, 3, 3]).await;
        h.queue.promote().await.unwrap();

        // Leftovers from a crash: queued before everything promoted above
        let hour_ago = Utc::now() - chrono::Duration::hours(1);
        let oldest = seed_paid(&h, Faction::Zaibatsu, "x0", hour_ago - chrono::Duration::minutes(5)).await;
        let older = seed_paid(&h, Faction::Zaibatsu, "x1", hour_ago).await;
        assert_eq!(h.store.active_len(), 11);

        assert_eq!(h.queue.reconcile().await.unwrap(), 2);
        assert_eq!(h.store.active_len(), 9);
        assert_eq!(h.store.active_queue_count(Faction::Zaibatsu).await.unwrap(), 3);
        assert_eq!(h.metrics.refunds_failed.load(std::sync::atomic::Ordering::Relaxed), 0);

        let refunds = h.store.refunds().await.unwrap();
        let mut refunded: Vec<&str> = refunds.iter().map(|r| r.fee.transaction_id.as_str()).collect();
        refunded.sort_unstable();
        let mut expected = vec![oldest.fee.transaction_id.as_str(), older.fee.transaction_id.as_str()];
        expected.sort_unstable();
        assert_eq!(refunded, expected);
        assert!(refunds.iter().all(|r| r.reason == "queue_cull"));
        assert!(refunds.iter().all(|r| matches!(r.status, RefundStatus::Refunded(_))));
        assert!(h.payments.is_refunded(&oldest.fee.transaction_id));
        assert_eq!(h.store.locate(oldest.mech_id()).await.unwrap(), None);

        assert_eq!(h.queue.reconcile().await.unwrap(), 0);
        assert_eq!(h.store.active_len(), 9);
    }

    #[tokio::test]
    async fn test_reconcile_failure_still_refunds_committed_culls() {
        let h = harness();
        let now = Utc::now();
        let mut zaibatsu = Vec::new();
        for (faction, n) in [
            (Faction::Zaibatsu, 5),
            (Faction::RedMountain, 3),
            (Faction::BostonCybernetics, 5),
        ] {
            for i in 0..n {
                let queued_at = now + chrono::Duration::seconds(i as i64);
                let entry = seed_paid(&h, faction, &format!("{}-{}", faction, i), queued_at).await;
                if faction == Faction::Zaibatsu {
                    zaibatsu.push(entry);
                }
            }
        }
        h.store.inject_failure(FailPoint::Cull(Faction::BostonCybernetics));

        assert!(matches!(h.queue.reconcile().await, Err(QueueError::Store(_))));

        // Zaibatsu's cull committed and was refunded; Boston's rolled back
        assert_eq!(h.store.active_queue_count(Faction::Zaibatsu).await.unwrap(), 3);
        assert_eq!(h.store.active_queue_count(Faction::BostonCybernetics).await.unwrap(), 5);
        let refunds = h.store.refunds().await.unwrap();
        assert_eq!(refunds.len(), 2);
        assert!(refunds.iter().all(|r| matches!(r.status, RefundStatus::Refunded(_))));
        for entry in &zaibatsu[..2] {
            assert!(h.payments.is_refunded(&entry.fee.transaction_id));
            assert_eq!(h.payments.balance(entry.owner_id()), sups(dec!(1000)));
        }

        // The next pass finishes the job
        assert_eq!(h.queue.reconcile().await.unwrap(), 2);
        assert_eq!(h.store.active_queue_count(Faction::BostonCybernetics).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_failed_refund_is_flagged() {
        let h = harness();
        let mech = test_profile(Faction::Zaibatsu, "z1");
        h.queue.join(mech.clone()).await.unwrap();
        h.payments.set_refunds_available(false);

        let status = h.queue.leave(mech.id, mech.owner_id).await.unwrap();
        assert!(matches!(status, RefundStatus::Failed(_)));
        let refunds = h.store.refunds().await.unwrap();
        assert_eq!(refunds.len(), 1);
        assert!(matches!(refunds[0].status, RefundStatus::Failed(_)));
        assert_eq!(h.metrics.refunds_failed.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
