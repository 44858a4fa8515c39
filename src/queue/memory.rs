//! In-memory queue store
//!
//! Each operation runs against a staged copy of the tables and only swaps it
//! in once everything succeeded, so a failure part way leaves no trace.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use crate::game::types::{BattleId, Faction, MechId, PlayerId};
use crate::queue::store::{
    QueueEntry, QueueSlot, QueueStore, RefundRecord, RefundStatus, StoreError,
};

/// Operations that can be made to fail once, for exercising rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Enqueue,
    Promote,
    Cull(Faction),
    TakeRoster,
}

#[derive(Debug, Clone, Default)]
struct QueueTables {
    backlog: Vec<QueueEntry>,
    active: Vec<QueueEntry>,
    in_battle: HashMap<BattleId, Vec<QueueEntry>>,
    blacklist: HashSet<PlayerId>,
    refunds: Vec<RefundRecord>,
}

impl QueueTables {
    fn locate(&self, mech_id: MechId) -> Option<QueueSlot> {
        if self.backlog.iter().any(|e| e.mech_id() == mech_id) {
            return Some(QueueSlot::Backlog);
        }
        if self.active.iter().any(|e| e.mech_id() == mech_id) {
            return Some(QueueSlot::Active);
        }
        self.in_battle
            .iter()
            .find(|(_, roster)| roster.iter().any(|e| e.mech_id() == mech_id))
            .map(|(battle, _)| QueueSlot::InBattle(*battle))
    }

    fn record_refund(&mut self, entry: &QueueEntry, reason: &'static str) {
        self.refunds.push(RefundRecord {
            fee: entry.fee.clone(),
            mech_id: entry.mech_id(),
            owner_id: entry.owner_id(),
            reason,
            status: RefundStatus::Pending,
            recorded_at: Utc::now(),
        });
    }
}

#[derive(Default)]
pub struct MemoryQueueStore {
    tables: Mutex<QueueTables>,
    fail_next: Mutex<Option<FailPoint>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `point` operation fail after staging its changes
    pub fn inject_failure(&self, point: FailPoint) {
        *self.fail_next.lock() = Some(point);
    }

    /// Seed the active queue directly, bypassing fees and promotion
    pub fn seed_active(&self, entries: impl IntoIterator<Item = QueueEntry>) {
        self.tables.lock().active.extend(entries);
    }

    pub fn backlog_len(&self) -> usize {
        self.tables.lock().backlog.len()
    }

    pub fn active_len(&self) -> usize {
        self.tables.lock().active.len()
    }

    fn check_fail(&self, point: FailPoint) -> Result<(), StoreError> {
        let mut fail = self.fail_next.lock();
        if *fail == Some(point) {
            *fail = None;
            return Err(StoreError::Unavailable(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }

    fn read<R>(&self, f: impl FnOnce(&QueueTables) -> R) -> R {
        f(&self.tables.lock())
    }

    /// Run `f` on a staged copy; commit only on success
    fn transaction<R>(
        &self,
        f: impl FnOnce(&mut QueueTables) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut tables = self.tables.lock();
        let mut staged = tables.clone();
        let out = f(&mut staged)?;
        *tables = staged;
        Ok(out)
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn locate(&self, mech_id: MechId) -> Result<Option<QueueSlot>, StoreError> {
        Ok(self.read(|t| t.locate(mech_id)))
    }

    async fn faction_queue_count(&self, faction: Faction) -> Result<usize, StoreError> {
        Ok(self.read(|t| {
            t.backlog.iter().filter(|e| e.faction() == faction).count()
                + t.active.iter().filter(|e| e.faction() == faction).count()
        }))
    }

    async fn active_queue_count(&self, faction: Faction) -> Result<usize, StoreError> {
        Ok(self.read(|t| t.active.iter().filter(|e| e.faction() == faction).count()))
    }

    async fn queue_position(&self, mech_id: MechId) -> Result<Option<usize>, StoreError> {
        Ok(self.read(|t| {
            let faction = t
                .active
                .iter()
                .chain(t.backlog.iter())
                .find(|e| e.mech_id() == mech_id)?
                .faction();
            t.active
                .iter()
                .chain(t.backlog.iter())
                .filter(|e| e.faction() == faction)
                .position(|e| e.mech_id() == mech_id)
                .map(|i| i + 1)
        }))
    }

    async fn enqueue_backlog(&self, entry: QueueEntry) -> Result<(), StoreError> {
        self.transaction(|t| {
            if t.locate(entry.mech_id()).is_some() {
                return Err(StoreError::AlreadyQueued(entry.mech_id()));
            }
            t.backlog.push(entry);
            self.check_fail(FailPoint::Enqueue)
        })
    }

    async fn remove_entry(&self, mech_id: MechId, owner_id: PlayerId) -> Result<QueueEntry, StoreError> {
        self.transaction(|t| {
            let owned = |e: &QueueEntry| e.mech_id() == mech_id && e.owner_id() == owner_id;

            let entry = if let Some(i) = t.backlog.iter().position(owned) {
                t.backlog.remove(i)
            } else if let Some(i) = t.active.iter().position(owned) {
                t.active.remove(i)
            } else if let Some(QueueSlot::InBattle(_)) = t.locate(mech_id) {
                return Err(StoreError::InBattle(mech_id));
            } else {
                return Err(StoreError::NotQueued(mech_id));
            };

            t.record_refund(&entry, "queue_leave");
            Ok(entry)
        })
    }

    async fn previous_battle_owner_ids(&self) -> Result<HashSet<PlayerId>, StoreError> {
        Ok(self.read(|t| t.blacklist.clone()))
    }

    async fn pending_backlog(
        &self,
        faction: Faction,
        exclude: &HashSet<PlayerId>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, StoreError> {
        Ok(self.read(|t| {
            t.backlog
                .iter()
                .filter(|e| e.faction() == faction && !exclude.contains(&e.owner_id()))
                .take(limit)
                .cloned()
                .collect()
        }))
    }

    async fn promote_backlog_batch(&self, batch: &[QueueEntry]) -> Result<(), StoreError> {
        self.transaction(|t| {
            let ids: HashSet<MechId> = batch.iter().map(|e| e.mech_id()).collect();
            let before = t.backlog.len();
            let (moved, kept): (Vec<_>, Vec<_>) =
                std::mem::take(&mut t.backlog).into_iter().partition(|e| ids.contains(&e.mech_id()));

            if moved.len() != batch.len() {
                return Err(StoreError::Consistency {
                    operation: "promote_backlog_batch",
                    expected: batch.len(),
                    actual: before - kept.len(),
                });
            }

            t.backlog = kept;
            // Keep the batch order so positions follow arrival
            for entry in batch {
                if let Some(e) = moved.iter().find(|m| m.mech_id() == entry.mech_id()) {
                    t.active.push(e.clone());
                }
            }
            self.check_fail(FailPoint::Promote)
        })
    }

    async fn cull_excess_queue(&self, faction: Faction, keep: usize) -> Result<Vec<QueueEntry>, StoreError> {
        self.transaction(|t| {
            let count = t.active.iter().filter(|e| e.faction() == faction).count();
            let surplus = count.saturating_sub(keep);
            if surplus == 0 {
                return Ok(Vec::new());
            }

            let mut by_age: Vec<&QueueEntry> = t.active.iter().filter(|e| e.faction() == faction).collect();
            by_age.sort_by_key(|e| e.queued_at);
            let doomed: HashSet<MechId> = by_age.into_iter().take(surplus).map(|e| e.mech_id()).collect();

            let (culled, remaining): (Vec<_>, Vec<_>) = std::mem::take(&mut t.active)
                .into_iter()
                .partition(|e| doomed.contains(&e.mech_id()));
            t.active = remaining;

            for entry in &culled {
                t.record_refund(entry, "queue_cull");
            }
            self.check_fail(FailPoint::Cull(faction))?;
            debug!("Culled {} {} entries down to {}", culled.len(), faction, keep);
            Ok(culled)
        })
    }

    async fn refund_fee(&self, transaction_id: &str, status: RefundStatus) -> Result<(), StoreError> {
        self.transaction(|t| {
            let record = t
                .refunds
                .iter_mut()
                .rev()
                .find(|r| r.fee.transaction_id == transaction_id)
                .ok_or_else(|| StoreError::UnknownRefund(transaction_id.to_string()))?;
            record.status = status;
            Ok(())
        })
    }

    async fn refunds(&self) -> Result<Vec<RefundRecord>, StoreError> {
        Ok(self.read(|t| t.refunds.clone()))
    }

    async fn take_battle_roster(
        &self,
        battle_id: BattleId,
        per_faction: usize,
    ) -> Result<Option<Vec<QueueEntry>>, StoreError> {
        self.transaction(|t| {
            let mut roster = Vec::with_capacity(per_faction * Faction::ALL.len());
            for faction in Faction::ALL {
                let picked: Vec<QueueEntry> = t
                    .active
                    .iter()
                    .filter(|e| e.faction() == faction)
                    .take(per_faction)
                    .cloned()
                    .collect();
                if picked.len() < per_faction {
                    return Ok(None);
                }
                roster.extend(picked);
            }

            let ids: HashSet<MechId> = roster.iter().map(|e| e.mech_id()).collect();
            t.active.retain(|e| !ids.contains(&e.mech_id()));
            t.in_battle.insert(battle_id, roster.clone());
            self.check_fail(FailPoint::TakeRoster)?;
            Ok(Some(roster))
        })
    }

    async fn complete_battle(&self, battle_id: BattleId) -> Result<Vec<PlayerId>, StoreError> {
        self.transaction(|t| {
            let roster = t
                .in_battle
                .remove(&battle_id)
                .ok_or(StoreError::UnknownBattle(battle_id))?;
            let owners: Vec<PlayerId> = roster.iter().map(|e| e.owner_id()).collect();
            t.blacklist = owners.iter().copied().collect();
            Ok(owners)
        })
    }
}
