//! Queue table storage
//!
//! Three tables hold every queued mech: the backlog, the active queue and
//! the in-battle roster. A mech id is in at most one of them. Every method
//! is one transaction: it either commits entirely or changes nothing.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::battle::war_machine::WarMachineProfile;
use crate::game::types::{BattleId, Faction, MechId, PlayerId};
use crate::services::payments::TransactionId;

/// Fee paid when joining the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaidFee {
    pub transaction_id: TransactionId,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub mech: WarMachineProfile,
    pub fee: PaidFee,
    pub queued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn mech_id(&self) -> MechId {
        self.mech.id
    }

    pub fn owner_id(&self) -> PlayerId {
        self.mech.owner_id
    }

    pub fn faction(&self) -> Faction {
        self.mech.faction
    }
}

/// Which table a mech currently sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSlot {
    Backlog,
    Active,
    InBattle(BattleId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Refunded(TransactionId),
    Failed(String),
}

/// Fee refund bookkeeping; written before the entry is deleted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundRecord {
    pub fee: PaidFee,
    pub mech_id: MechId,
    pub owner_id: PlayerId,
    pub reason: &'static str,
    pub status: RefundStatus,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Mech {0} is already queued")]
    AlreadyQueued(MechId),
    #[error("Mech {0} is not queued")]
    NotQueued(MechId),
    #[error("Mech {0} is in battle")]
    InBattle(MechId),
    #[error("No refund recorded for transaction {0}")]
    UnknownRefund(TransactionId),
    #[error("Unknown battle {0}")]
    UnknownBattle(BattleId),
    #[error("Consistency violation in {operation}: expected {expected} rows, affected {actual}")]
    Consistency {
        operation: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store call timed out")]
    Timeout,
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn locate(&self, mech_id: MechId) -> Result<Option<QueueSlot>, StoreError>;

    /// Backlog plus active entries for the faction
    async fn faction_queue_count(&self, faction: Faction) -> Result<usize, StoreError>;

    async fn active_queue_count(&self, faction: Faction) -> Result<usize, StoreError>;

    /// 1-based place in the faction's line, active queue first
    async fn queue_position(&self, mech_id: MechId) -> Result<Option<usize>, StoreError>;

    async fn enqueue_backlog(&self, entry: QueueEntry) -> Result<(), StoreError>;

    /// Remove an owner's backlog or active entry, recording its refund as pending
    async fn remove_entry(&self, mech_id: MechId, owner_id: PlayerId) -> Result<QueueEntry, StoreError>;

    /// Owners who fought in the most recent battle
    async fn previous_battle_owner_ids(&self) -> Result<HashSet<PlayerId>, StoreError>;

    /// Oldest backlog entries for `faction`, skipping `exclude` owners
    async fn pending_backlog(
        &self,
        faction: Faction,
        exclude: &HashSet<PlayerId>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, StoreError>;

    /// Move `batch` from backlog to active queue, all or nothing
    async fn promote_backlog_batch(&self, batch: &[QueueEntry]) -> Result<(), StoreError>;

    /// Delete the oldest active entries beyond `keep`, recording refunds first
    async fn cull_excess_queue(&self, faction: Faction, keep: usize) -> Result<Vec<QueueEntry>, StoreError>;

    async fn refund_fee(&self, transaction_id: &str, status: RefundStatus) -> Result<(), StoreError>;

    async fn refunds(&self) -> Result<Vec<RefundRecord>, StoreError>;

    /// Take `per_faction` active entries of every faction into a battle.
    /// `None` when any faction is short.
    async fn take_battle_roster(
        &self,
        battle_id: BattleId,
        per_faction: usize,
    ) -> Result<Option<Vec<QueueEntry>>, StoreError>;

    /// Release a battle's roster; its owners become the new blacklist
    async fn complete_battle(&self, battle_id: BattleId) -> Result<Vec<PlayerId>, StoreError>;
}

/// Cap a store call
pub async fn within<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout),
    }
}
