//! Pub/sub publishing
//!
//! `publish` must never block: phase changes are broadcast immediately from
//! inside timer tasks and request handlers.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::game::types::{BattleId, Faction, MechId};

/// Message keys understood by subscribers
pub mod keys {
    pub const QUEUE_STATUS: &str = "BATTLE:QUEUE:STATUS";
    pub const MECH_QUEUE_POSITION: &str = "BATTLE:QUEUE:MECH_POSITION";
    pub const BATTLE_INIT: &str = "BATTLE:INIT";
    pub const BATTLE_END: &str = "BATTLE:END_DETAIL";
    pub const WAR_MACHINE_STAT: &str = "BATTLE:WAR_MACHINE_STAT";
    pub const WAR_MACHINE_DESTROYED: &str = "BATTLE:WAR_MACHINE_DESTROYED";
    pub const BRIBE_STAGE: &str = "BRIBE:STAGE:UPDATED";
    pub const ABILITY_PROGRESS: &str = "ABILITY:PROGRESS";
    pub const LOCATION_SELECT: &str = "ABILITY:LOCATION_SELECT";
    pub const NOTIFICATION: &str = "GAME:NOTIFICATION";
}

/// Topic builders
pub mod topics {
    use super::*;

    pub fn queue_status(faction: Faction) -> String {
        format!("/faction/{}/queue", faction.key())
    }

    pub fn mech_queue(faction: Faction, mech: MechId) -> String {
        format!("/faction/{}/queue/{}", faction.key(), mech)
    }

    pub fn arena_battle(arena: Uuid) -> String {
        format!("/arena/{}/battle", arena)
    }

    pub fn war_machine_stat(arena: Uuid, participant_id: u8) -> String {
        format!("/arena/{}/mech/{}", arena, participant_id)
    }

    pub fn battle_bribe_stage(battle: BattleId) -> String {
        format!("/battle/{}/bribe_stage", battle)
    }

    pub fn faction_ability_stage(battle: BattleId, faction: Faction) -> String {
        format!("/battle/{}/faction/{}/ability_stage", battle, faction.key())
    }

    pub fn ability_progress(battle: BattleId, faction: Faction) -> String {
        format!("/battle/{}/faction/{}/ability_progress", battle, faction.key())
    }

    pub fn notifications(arena: Uuid) -> String {
        format!("/arena/{}/notification", arena)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BusMessage {
    pub topic: String,
    pub key: &'static str,
    pub payload: serde_json::Value,
}

pub trait Publisher: Send + Sync {
    fn publish(&self, topic: String, key: &'static str, payload: serde_json::Value);
}

/// Serialize and publish; payload types here always serialize
pub fn publish_event<T: Serialize>(
    publisher: &dyn Publisher,
    topic: String,
    key: &'static str,
    payload: &T,
) {
    match serde_json::to_value(payload) {
        Ok(value) => publisher.publish(topic, key, value),
        Err(e) => tracing::error!("Failed to encode {} for {}: {}", key, topic, e),
    }
}

/// In-process broadcast bus
pub struct BroadcastBus {
    tx: broadcast::Sender<BusMessage>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Publisher for BroadcastBus {
    fn publish(&self, topic: String, key: &'static str, payload: serde_json::Value) {
        tracing::trace!("publish {} {}", key, topic);
        // No subscribers is fine
        let _ = self.tx.send(BusMessage {
            topic,
            key,
            payload,
        });
    }
}
