//! War machine roster entries
//!
//! Identity is immutable once the battle is composed. Live stats sit behind a
//! per-machine `RwLock`: the arena read loop is the only writer, AI tasks and
//! broadcast snapshots are readers. Never take an ability ledger lock while
//! holding one of these.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::battle::tick::TickUpdate;
use crate::game::types::{Faction, GameLocation, MechId, PlayerId};

/// What the queue knows about a mech
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarMachineProfile {
    pub id: MechId,
    /// Simulation-side correlation key
    pub hash: String,
    pub owner_id: PlayerId,
    pub faction: Faction,
    pub name: String,
    pub max_health: u32,
    pub max_shield: u32,
    pub speed: u32,
}

/// Fields updated from tick frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStats {
    pub health: u32,
    pub shield: u32,
    pub position: GameLocation,
    pub rotation: i32,
}

/// Snapshot broadcast on `BATTLE:WAR_MACHINE_STAT`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarMachineStat {
    #[serde(rename = "participantID")]
    pub participant_id: u8,
    #[serde(flatten)]
    pub stats: LiveStats,
}

/// Roster entry in the `BATTLE:INIT` payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarMachineInit<'a> {
    #[serde(rename = "id")]
    pub mech_id: MechId,
    pub hash: &'a str,
    #[serde(rename = "participantID")]
    pub participant_id: u8,
    #[serde(rename = "factionID")]
    pub faction: Faction,
    #[serde(rename = "ownedByID")]
    pub owner_id: PlayerId,
    pub name: &'a str,
    pub max_health: u32,
    pub health: u32,
    pub max_shield: u32,
    pub shield: u32,
    pub speed: u32,
    pub position: GameLocation,
    pub rotation: i32,
}

#[derive(Debug)]
pub struct WarMachine {
    pub profile: WarMachineProfile,
    participant_id: AtomicU8,
    is_ai: AtomicBool,
    stats: RwLock<LiveStats>,
}

impl WarMachine {
    pub fn new(profile: WarMachineProfile) -> Self {
        let stats = LiveStats {
            health: profile.max_health,
            shield: profile.max_shield,
            ..Default::default()
        };
        Self {
            profile,
            participant_id: AtomicU8::new(0),
            is_ai: AtomicBool::new(false),
            stats: RwLock::new(stats),
        }
    }

    pub fn participant_id(&self) -> u8 {
        self.participant_id.load(Ordering::Acquire)
    }

    pub fn set_participant_id(&self, id: u8) {
        self.participant_id.store(id, Ordering::Release);
    }

    pub fn is_ai(&self) -> bool {
        self.is_ai.load(Ordering::Relaxed)
    }

    pub fn mark_ai(&self) {
        self.is_ai.store(true, Ordering::Relaxed);
    }

    pub fn stats(&self) -> LiveStats {
        *self.stats.read()
    }

    pub fn is_alive(&self) -> bool {
        self.stats.read().health > 0
    }

    /// Below a quarter of max health
    pub fn needs_repair(&self) -> bool {
        let stats = self.stats.read();
        stats.health > 0 && self.profile.max_health > stats.health.saturating_mul(4)
    }

    pub fn apply(&self, update: &TickUpdate) -> WarMachineStat {
        let mut stats = self.stats.write();
        if let Some((position, rotation)) = update.position {
            stats.position = position;
            stats.rotation = rotation;
        }
        if let Some(health) = update.health {
            stats.health = health;
        }
        if let Some(shield) = update.shield {
            stats.shield = shield;
        }
        WarMachineStat {
            participant_id: self.participant_id(),
            stats: *stats,
        }
    }

    pub fn destroy(&self) {
        let mut stats = self.stats.write();
        stats.health = 0;
        stats.shield = 0;
    }

    pub fn init_entry(&self) -> WarMachineInit<'_> {
        let stats = self.stats();
        WarMachineInit {
            mech_id: self.profile.id,
            hash: &self.profile.hash,
            participant_id: self.participant_id(),
            faction: self.profile.faction,
            owner_id: self.profile.owner_id,
            name: &self.profile.name,
            max_health: self.profile.max_health,
            health: stats.health,
            max_shield: self.profile.max_shield,
            shield: stats.shield,
            speed: self.profile.speed,
            position: stats.position,
            rotation: stats.rotation,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_profile(faction: Faction, hash: &str) -> WarMachineProfile {
    WarMachineProfile {
        id: uuid::Uuid::new_v4(),
        hash: hash.to_string(),
        owner_id: uuid::Uuid::new_v4(),
        faction,
        name: format!("Mech {}", hash),
        max_health: 1000,
        max_shield: 500,
        speed: 2750,
    }
}
