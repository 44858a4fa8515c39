//! Pilots for AI-owned war machines
//!
//! One task per AI machine. It wakes on a short random timer, moves towards
//! allies early on and towards the nearest opponent later, and fires a single
//! repair when the machine gets low. The task exits when the battle's
//! shutdown signal fires or the machine dies.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::battle::war_machine::WarMachine;
use crate::game::constants::ai::*;
use crate::game::types::GameLocation;
use crate::net::link::{send_command, AbilityCheck, SimulationLink};
use crate::net::protocol::{commands, GameAbilityEvent};

pub struct AiPilot {
    machine: Arc<WarMachine>,
    roster: Arc<[Arc<WarMachine>]>,
    link: Arc<dyn SimulationLink>,
}

impl AiPilot {
    pub fn new(machine: Arc<WarMachine>, roster: Arc<[Arc<WarMachine>]>, link: Arc<dyn SimulationLink>) -> Self {
        Self { machine, roster, link }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let started = Instant::now();
        let approach_after = Duration::from_secs(APPROACH_OPPONENT_AFTER_SECS);
        let mut next_decision = started + Duration::from_secs(FIRST_DECISION_SECS);
        let mut repaired = false;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_decision) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() || !self.machine.is_alive() {
                break;
            }

            if !repaired && self.machine.needs_repair() {
                repaired = self.trigger_repair().await;
            }

            let approach = started.elapsed() >= approach_after;
            if let Some(destination) = self.pick_destination(approach) {
                match self.move_to(destination).await {
                    AbilityCheck::Valid => {}
                    AbilityCheck::Invalid => debug!("{} move target not available", self.machine.profile.hash),
                    AbilityCheck::TimedOut | AbilityCheck::Unavailable => {
                        debug!("{} move check timed out", self.machine.profile.hash)
                    }
                }
            }

            let secs = rand::thread_rng().gen_range(FIRST_DECISION_SECS..=MAX_DECISION_SECS);
            next_decision = Instant::now() + Duration::from_secs(secs);
        }

        debug!("AI pilot for {} stopped", self.machine.profile.hash);
    }

    /// Nearest ally before `approach`, nearest opponent after (humans first)
    pub fn pick_destination(&self, approach: bool) -> Option<GameLocation> {
        let me = self.machine.stats().position;
        let faction = self.machine.profile.faction;

        let mut allies = Vec::new();
        let mut humans = Vec::new();
        let mut bots = Vec::new();

        for other in self.roster.iter() {
            if Arc::ptr_eq(other, &self.machine) || !other.is_alive() {
                continue;
            }
            let position = other.stats().position;
            if other.profile.faction == faction {
                allies.push(position);
            } else if other.is_ai() {
                bots.push(position);
            } else {
                humans.push(position);
            }
        }

        let candidates = match (approach, humans.is_empty()) {
            (false, _) => allies,
            (true, false) => humans,
            (true, true) => bots,
        };

        candidates.into_iter().min_by_key(|p| p.distance_sq(&me))
    }

    async fn move_to(&self, destination: GameLocation) -> AbilityCheck {
        let event = GameAbilityEvent {
            is_triggered: true,
            game_client_ability_id: MOVE_COMMAND_ABILITY_ID,
            war_machine_hash: Some(self.machine.profile.hash.clone()),
            participant_id: Some(self.machine.participant_id()),
            event_id: Uuid::new_v4(),
            game_location: Some(destination),
        };
        self.link.check_ability(event).await
    }

    async fn trigger_repair(&self) -> bool {
        let event = GameAbilityEvent {
            is_triggered: true,
            game_client_ability_id: REPAIR_ABILITY_ID,
            war_machine_hash: Some(self.machine.profile.hash.clone()),
            participant_id: Some(self.machine.participant_id()),
            event_id: Uuid::new_v4(),
            game_location: None,
        };
        match send_command(self.link.as_ref(), commands::BATTLE_ABILITY, &event).await {
            Ok(()) => true,
            Err(e) => {
                warn!("AI repair for {} failed: {}", self.machine.profile.hash, e);
                false
            }
        }
    }
}
