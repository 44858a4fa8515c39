//! All arenas of this process

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::arena::commands::CommandError;
use crate::arena::Arena;
use crate::battle::war_machine::WarMachineProfile;
use crate::game::types::{MechId, PlayerId};
use crate::queue::store::RefundStatus;
use crate::queue::system::JoinReceipt;
use crate::queue::{ArenaPool, BattleQueue};

pub struct ArenaManager {
    arenas: Vec<Arc<Arena>>,
    queue: Arc<BattleQueue>,
}

impl ArenaManager {
    pub fn new(queue: Arc<BattleQueue>) -> Self {
        Self {
            arenas: Vec::new(),
            queue,
        }
    }

    pub fn add(&mut self, arena: Arc<Arena>) {
        self.arenas.push(arena);
    }

    pub fn arenas(&self) -> &[Arc<Arena>] {
        &self.arenas
    }

    pub fn get(&self, id: Uuid) -> Option<&Arc<Arena>> {
        self.arenas.iter().find(|a| a.id() == id)
    }

    pub fn idle_count(&self) -> usize {
        self.arenas.iter().filter(|a| a.is_idle()).count()
    }

    /// Queue a mech for the next balanced battle
    pub async fn join_queue(&self, mech: WarMachineProfile) -> Result<JoinReceipt, CommandError> {
        Ok(self.queue.join(mech).await?)
    }

    pub async fn leave_queue(&self, mech_id: MechId, owner_id: PlayerId) -> Result<RefundStatus, CommandError> {
        Ok(self.queue.leave(mech_id, owner_id).await?)
    }

    /// Stop background work on every arena
    pub fn shutdown_all(&self) {
        for arena in &self.arenas {
            arena.shutdown();
        }
    }
}

#[async_trait]
impl ArenaPool for ArenaManager {
    async fn begin_idle_battles(&self) -> usize {
        let mut started = 0;
        for arena in self.arenas.iter().filter(|a| a.is_idle()) {
            match arena.begin_battle().await {
                Ok(Some(_)) => started += 1,
                Ok(None) => {}
                Err(e) => warn!("Arena {}: begin battle failed: {}", arena.id(), e),
            }
        }
        started
    }
}
