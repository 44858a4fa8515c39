//! One battle on an arena
//!
//! A `Battle` is composed from queued mechs, announced with `BATTLE:INIT`,
//! then driven by inbound simulation events until `BATTLE:END`. Tick
//! ingestion happens only on the arena read loop, so the roster has a
//! single writer.

#[cfg(feature = "ai_control")]
pub mod ai_control;
pub mod tick;
pub mod war_machine;

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::VoteTimings;
use crate::game::types::{BattleId, Faction, MechId, PlayerId};
use crate::metrics::Metrics;
use crate::net::link::SimulationLink;
use crate::net::protocol::{
    BattleEndPayload, BattleStartPayload, DamageHistory, MapDetails, WarMachineDestroyedPayload,
};
use crate::services::payments::PaymentsClient;
use crate::services::pubsub::{keys, publish_event, topics, Publisher};
use crate::voting::ability::{AbilityCatalog, MechTarget};
use crate::voting::session::SessionContext;
use crate::voting::system::AbilitySystem;

use tick::{decode_tick, TickBatch, TickError};
use war_machine::{WarMachine, WarMachineInit, WarMachineProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum BattleStage {
    Start = 0,
    End = 1,
}

#[derive(Debug, thiserror::Error)]
pub enum BattleError {
    #[error("Event for battle {actual}, current battle is {expected}")]
    WrongBattle { expected: BattleId, actual: BattleId },
    #[error("Game client build {build:?} is older than {min}")]
    OutdatedClient { build: Option<String>, min: u64 },
    #[error("Unknown war machine {0}")]
    UnknownWarMachine(String),
    #[error("Unknown participant {0}")]
    UnknownParticipant(u8),
    #[error("Malformed tick: {0}")]
    Tick(#[from] TickError),
    #[error("Battle already ended")]
    AlreadyEnded,
}

/// Everything a battle needs from its arena
#[derive(Clone)]
pub struct BattleDeps {
    pub arena_id: Uuid,
    pub link: Arc<dyn SimulationLink>,
    pub ctx_template: SessionTemplate,
    pub catalog: Arc<AbilityCatalog>,
    pub publisher: Arc<dyn Publisher>,
    pub metrics: Arc<Metrics>,
    pub ai_players: Arc<HashSet<PlayerId>>,
    pub game_client_min_build: u64,
}

/// Session settings shared by every battle of an arena
#[derive(Clone)]
pub struct SessionTemplate {
    pub timings: VoteTimings,
    pub collaborator_timeout: Duration,
    pub payments: Arc<dyn PaymentsClient>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarMachineBrief {
    pub mech_id: MechId,
    pub hash: String,
    pub name: String,
    pub faction: Faction,
    pub owner_id: PlayerId,
}

impl From<&WarMachine> for WarMachineBrief {
    fn from(wm: &WarMachine) -> Self {
        Self {
            mech_id: wm.profile.id,
            hash: wm.profile.hash.clone(),
            name: wm.profile.name.clone(),
            faction: wm.profile.faction,
            owner_id: wm.profile.owner_id,
        }
    }
}

/// Bookkeeping for one `BATTLE:WAR_MACHINE_DESTROYED`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestroyedRecord {
    pub destroyed_war_machine: WarMachineBrief,
    pub killed_by_war_machine: Option<WarMachineBrief>,
    pub killed_by: String,
    pub related_event_id: Option<String>,
    pub damage_records: Vec<DamageHistory>,
    /// Owner may repair the mech; AI owners never do
    pub repair_eligible: bool,
    pub destroyed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerBrief {
    #[serde(flatten)]
    pub war_machine: WarMachineBrief,
    pub health: u32,
}

/// Summary handed to queue settlement and subscribers on `BATTLE:END`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleEndDetail {
    pub battle_id: BattleId,
    pub battle_number: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    pub win_condition: String,
    pub winning_faction: Option<Faction>,
    pub winning_war_machines: Vec<WinnerBrief>,
    pub destroyed_count: usize,
    pub mech_ids: Vec<MechId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleInitPayload<'a> {
    #[serde(rename = "battleID")]
    pub battle_id: BattleId,
    pub battle_number: u64,
    pub map_name: Option<String>,
    pub war_machines: Vec<WarMachineInit<'a>>,
}

pub struct Battle {
    id: BattleId,
    number: u64,
    deps: BattleDeps,
    stage: AtomicU8,
    started: AtomicBool,
    war_machines: Arc<[Arc<WarMachine>]>,
    by_hash: FxHashMap<String, usize>,
    by_participant: RwLock<FxHashMap<u8, usize>>,
    map: RwLock<Option<MapDetails>>,
    abilities: AbilitySystem,
    destroyed: Mutex<Vec<DestroyedRecord>>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    ended_at: RwLock<Option<DateTime<Utc>>>,
    shutdown: watch::Sender<bool>,
}

impl Battle {
    pub fn new(id: BattleId, number: u64, roster: Vec<WarMachineProfile>, deps: BattleDeps) -> Self {
        let war_machines: Arc<[Arc<WarMachine>]> = roster
            .into_iter()
            .map(|profile| {
                let wm = WarMachine::new(profile);
                if deps.ai_players.contains(&wm.profile.owner_id) {
                    wm.mark_ai();
                }
                Arc::new(wm)
            })
            .collect();

        let by_hash = war_machines
            .iter()
            .enumerate()
            .map(|(i, wm)| (wm.profile.hash.clone(), i))
            .collect();

        let mut targets: BTreeMap<Faction, Vec<MechTarget>> = BTreeMap::new();
        for wm in war_machines.iter() {
            targets.entry(wm.profile.faction).or_default().push(MechTarget {
                hash: wm.profile.hash.clone(),
                name: wm.profile.name.clone(),
            });
        }

        let ctx = Arc::new(SessionContext::new(
            id,
            deps.arena_id,
            deps.ctx_template.timings.clone(),
            deps.ctx_template.collaborator_timeout,
            deps.link.clone(),
            deps.ctx_template.payments.clone(),
            deps.publisher.clone(),
            deps.metrics.clone(),
        ));
        let abilities = AbilitySystem::new(ctx, deps.catalog.clone(), &targets);
        let (shutdown, _) = watch::channel(false);

        Self {
            id,
            number,
            deps,
            stage: AtomicU8::new(BattleStage::Start as u8),
            started: AtomicBool::new(false),
            war_machines,
            by_hash,
            by_participant: RwLock::new(FxHashMap::default()),
            map: RwLock::new(None),
            abilities,
            destroyed: Mutex::new(Vec::new()),
            started_at: RwLock::new(None),
            ended_at: RwLock::new(None),
            shutdown,
        }
    }

    pub fn id(&self) -> BattleId {
        self.id
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn stage(&self) -> BattleStage {
        match self.stage.load(Ordering::Acquire) {
            0 => BattleStage::Start,
            _ => BattleStage::End,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.read()
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        *self.ended_at.read()
    }

    pub fn war_machines(&self) -> &[Arc<WarMachine>] {
        &self.war_machines
    }

    pub fn abilities(&self) -> &AbilitySystem {
        &self.abilities
    }

    pub fn map_name(&self) -> Option<String> {
        self.map.read().as_ref().map(|m| m.name.clone())
    }

    pub fn mech_ids(&self) -> Vec<MechId> {
        self.war_machines.iter().map(|wm| wm.profile.id).collect()
    }

    fn check_battle(&self, actual: BattleId) -> Result<(), BattleError> {
        if actual != self.id {
            return Err(BattleError::WrongBattle {
                expected: self.id,
                actual,
            });
        }
        Ok(())
    }

    fn by_hash(&self, hash: &str) -> Option<&Arc<WarMachine>> {
        self.by_hash.get(hash).map(|&i| &self.war_machines[i])
    }

    /// `BATTLE:INIT` payload
    pub fn init_payload(&self) -> BattleInitPayload<'_> {
        BattleInitPayload {
            battle_id: self.id,
            battle_number: self.number,
            map_name: self.map_name(),
            war_machines: self.war_machines.iter().map(|wm| wm.init_entry()).collect(),
        }
    }

    /// `BATTLE:MAP_DETAILS`
    pub fn set_map(&self, battle_id: BattleId, details: MapDetails) -> Result<(), BattleError> {
        self.check_battle(battle_id)?;
        debug!("Battle {} map: {}", self.id, details.name);
        *self.map.write() = Some(details);
        Ok(())
    }

    /// `BATTLE:START`: attach participant ids and open the ability sessions
    pub fn start(&self, payload: &BattleStartPayload) -> Result<(), BattleError> {
        self.check_battle(payload.battle_id)?;

        let min = self.deps.game_client_min_build;
        if min > 0 {
            let build = payload
                .client_build_no
                .as_deref()
                .and_then(|b| b.trim().parse::<u64>().ok());
            if build.map_or(true, |b| b < min) {
                return Err(BattleError::OutdatedClient {
                    build: payload.client_build_no.clone(),
                    min,
                });
            }
        }
        if self.stage() == BattleStage::End {
            return Err(BattleError::AlreadyEnded);
        }

        {
            let mut by_participant = self.by_participant.write();
            by_participant.clear();
            for entry in &payload.war_machines {
                match self.by_hash.get(&entry.hash) {
                    Some(&i) => {
                        self.war_machines[i].set_participant_id(entry.participant_id);
                        by_participant.insert(entry.participant_id, i);
                    }
                    None => warn!("BATTLE:START lists unknown war machine {}", entry.hash),
                }
            }
        }

        // A resent START after a reconnect only refreshes participant ids
        if self.started.swap(true, Ordering::AcqRel) {
            info!("Battle {} participants refreshed", self.id);
            return Ok(());
        }

        *self.started_at.write() = Some(Utc::now());
        self.abilities.start(self.war_machines.len());
        self.spawn_ai_pilots();
        Metrics::incr(&self.deps.metrics.battles_started);
        info!(
            "Battle {} (#{}) started with {} war machines",
            self.id,
            self.number,
            self.war_machines.len()
        );
        Ok(())
    }

    #[cfg(feature = "ai_control")]
    fn spawn_ai_pilots(&self) {
        use ai_control::AiPilot;

        for wm in self.war_machines.iter().filter(|wm| wm.is_ai()) {
            AiPilot::new(wm.clone(), self.war_machines.clone(), self.deps.link.clone())
                .spawn(self.shutdown.subscribe());
        }
    }

    #[cfg(not(feature = "ai_control"))]
    fn spawn_ai_pilots(&self) {}

    /// Apply one binary tick. Returns the number of roster machines updated.
    ///
    /// An unknown participant aborts the whole tick before anything is applied.
    pub fn tick(&self, data: &[u8]) -> Result<usize, BattleError> {
        if self.stage() == BattleStage::End || !self.is_started() {
            return Ok(0);
        }

        let batch: TickBatch = decode_tick(data)?;
        let indices: Vec<(usize, usize)> = {
            let by_participant = self.by_participant.read();
            let mut indices = Vec::with_capacity(batch.len());
            for (n, update) in batch.iter().enumerate() {
                if update.is_spawned_ai() {
                    continue;
                }
                let i = by_participant
                    .get(&update.participant_id)
                    .copied()
                    .ok_or(BattleError::UnknownParticipant(update.participant_id))?;
                indices.push((n, i));
            }
            indices
        };

        for &(n, i) in &indices {
            let stat = self.war_machines[i].apply(&batch[n]);
            publish_event(
                self.deps.publisher.as_ref(),
                topics::war_machine_stat(self.deps.arena_id, stat.participant_id),
                keys::WAR_MACHINE_STAT,
                &stat,
            );
        }
        Metrics::incr(&self.deps.metrics.ticks_processed);
        Ok(indices.len())
    }

    /// `BATTLE:WAR_MACHINE_DESTROYED`
    pub fn destroyed(&self, payload: WarMachineDestroyedPayload) -> Result<DestroyedRecord, BattleError> {
        self.check_battle(payload.battle_id)?;
        let event = payload.event;

        let destroyed = self
            .by_hash(&event.destroyed_war_machine_hash)
            .ok_or_else(|| BattleError::UnknownWarMachine(event.destroyed_war_machine_hash.clone()))?;
        destroyed.destroy();

        let killer = event
            .kill_by_war_machine_hash
            .as_deref()
            .filter(|h| !h.is_empty())
            .and_then(|h| self.by_hash(h))
            .map(|wm| WarMachineBrief::from(wm.as_ref()));

        let record = DestroyedRecord {
            destroyed_war_machine: WarMachineBrief::from(destroyed.as_ref()),
            killed_by_war_machine: killer,
            killed_by: event.killed_by,
            related_event_id: event.related_event_id.filter(|id| !id.is_empty()),
            damage_records: event.damage_history,
            repair_eligible: !self.deps.ai_players.contains(&destroyed.profile.owner_id),
            destroyed_at: Utc::now(),
        };

        info!(
            "Battle {}: {} destroyed by {}",
            self.id,
            record.destroyed_war_machine.name,
            record
                .killed_by_war_machine
                .as_ref()
                .map(|k| k.name.as_str())
                .unwrap_or(record.killed_by.as_str())
        );

        self.destroyed.lock().push(record.clone());
        Metrics::incr(&self.deps.metrics.war_machines_destroyed);
        publish_event(
            self.deps.publisher.as_ref(),
            topics::arena_battle(self.deps.arena_id),
            keys::WAR_MACHINE_DESTROYED,
            &record,
        );
        Ok(record)
    }

    pub fn destroyed_record(&self, mech_id: MechId) -> Option<DestroyedRecord> {
        self.destroyed
            .lock()
            .iter()
            .find(|r| r.destroyed_war_machine.mech_id == mech_id)
            .cloned()
    }

    /// `BATTLE:END`. Succeeds once; later calls get `AlreadyEnded`.
    pub fn end(&self, payload: &BattleEndPayload) -> Result<BattleEndDetail, BattleError> {
        self.check_battle(payload.battle_id)?;

        if self
            .stage
            .compare_exchange(
                BattleStage::Start as u8,
                BattleStage::End as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(BattleError::AlreadyEnded);
        }

        self.shutdown.send_replace(true);
        self.abilities.stop();

        let ended_at = Utc::now();
        *self.ended_at.write() = Some(ended_at);

        let winning_war_machines: Vec<WinnerBrief> = payload
            .winning_war_machines
            .iter()
            .filter_map(|w| match self.by_hash(&w.hash) {
                Some(wm) => Some(WinnerBrief {
                    war_machine: WarMachineBrief::from(wm.as_ref()),
                    health: w.health,
                }),
                None => {
                    warn!("BATTLE:END lists unknown winner {}", w.hash);
                    None
                }
            })
            .collect();

        let detail = BattleEndDetail {
            battle_id: self.id,
            battle_number: self.number,
            started_at: *self.started_at.read(),
            ended_at,
            win_condition: payload.win_condition.clone(),
            winning_faction: winning_war_machines.first().map(|w| w.war_machine.faction),
            winning_war_machines,
            destroyed_count: self.destroyed.lock().len(),
            mech_ids: self.mech_ids(),
        };

        Metrics::incr(&self.deps.metrics.battles_ended);
        info!(
            "Battle {} ended ({}), winner: {:?}",
            self.id, detail.win_condition, detail.winning_faction
        );
        publish_event(
            self.deps.publisher.as_ref(),
            topics::arena_battle(self.deps.arena_id),
            keys::BATTLE_END,
            &detail,
        );
        Ok(detail)
    }

    /// Stop background work without an END (arena shutdown)
    pub fn abort(&self) {
        self.shutdown.send_replace(true);
        self.abilities.stop();
    }
}

impl Drop for Battle {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::net::link::AbilityCheck;
    use crate::net::protocol::{
        DestroyedWarMachineEvent, StartWarMachine, WinningWarMachine,
    };
    use crate::services::payments::LocalPayments;
    use crate::services::pubsub::testing::RecordingPublisher;
    use crate::voting::session::tests::FakeLink;
    use crate::voting::BribePhase;
    use rust_decimal_macros::dec;
    use tick::{encode_tick, TickUpdate};
    use war_machine::test_profile;

    pub(crate) fn deps(publisher: Arc<RecordingPublisher>, ai_players: HashSet<PlayerId>) -> BattleDeps {
        BattleDeps {
            arena_id: Uuid::new_v4(),
            link: FakeLink::new(AbilityCheck::Valid),
            ctx_template: SessionTemplate {
                timings: VoteTimings::default(),
                collaborator_timeout: Duration::from_secs(5),
                payments: Arc::new(LocalPayments::new(dec!(1000))),
            },
            catalog: Arc::new(AbilityCatalog::standard()),
            publisher,
            metrics: Arc::new(Metrics::new()),
            ai_players: Arc::new(ai_players),
            game_client_min_build: 0,
        }
    }

    pub(crate) fn roster() -> Vec<WarMachineProfile> {
        Faction::ALL
            .iter()
            .enumerate()
            .map(|(i, f)| test_profile(*f, &format!("h{}", i)))
            .collect()
    }

    fn start_payload(battle: &Battle) -> BattleStartPayload {
        BattleStartPayload {
            war_machines: battle
                .war_machines()
                .iter()
                .enumerate()
                .map(|(i, wm)| StartWarMachine {
                    hash: wm.profile.hash.clone(),
                    participant_id: i as u8 + 1,
                })
                .collect(),
            battle_id: battle.id(),
            client_build_no: Some("42".into()),
        }
    }

    #[tokio::test]
    async fn test_tick_before_start_is_ignored() {
        let publisher = Arc::new(RecordingPublisher::default());
        let battle = Battle::new(Uuid::new_v4(), 1, roster(), deps(publisher.clone(), HashSet::new()));
        let frame = encode_tick(&[TickUpdate {
            participant_id: 1,
            position: None,
            health: Some(5),
            shield: None,
        }]);
        assert_eq!(battle.tick(&frame).unwrap(), 0);
        assert!(publisher.messages().is_empty());
    }

    #[tokio::test]
    async fn test_start_tick_and_unknown_participant() {
        let publisher = Arc::new(RecordingPublisher::default());
        let battle = Battle::new(Uuid::new_v4(), 1, roster(), deps(publisher.clone(), HashSet::new()));
        battle.start(&start_payload(&battle)).unwrap();
        assert!(battle.is_started());
        assert_eq!(
            battle.abilities().battle_session().phase().phase,
            BribePhase::WaitMechIntro
        );

        let frame = encode_tick(&[
            TickUpdate {
                participant_id: 2,
                position: None,
                health: Some(640),
                shield: None,
            },
            TickUpdate {
                participant_id: 120,
                position: None,
                health: Some(1),
                shield: None,
            },
        ]);
        assert_eq!(battle.tick(&frame).unwrap(), 1);
        assert_eq!(battle.war_machines()[1].stats().health, 640);
        assert_eq!(publisher.with_key(keys::WAR_MACHINE_STAT).len(), 1);

        // Participant 9 is not on the roster; nothing from this tick lands
        let frame = encode_tick(&[
            TickUpdate {
                participant_id: 1,
                position: None,
                health: Some(10),
                shield: None,
            },
            TickUpdate {
                participant_id: 9,
                position: None,
                health: Some(10),
                shield: None,
            },
        ]);
        assert!(matches!(battle.tick(&frame), Err(BattleError::UnknownParticipant(9))));
        assert_eq!(battle.war_machines()[0].stats().health, 1000);
    }

    #[tokio::test]
    async fn test_outdated_client_rejected() {
        let publisher = Arc::new(RecordingPublisher::default());
        let mut deps = deps(publisher, HashSet::new());
        deps.game_client_min_build = 100;
        let battle = Battle::new(Uuid::new_v4(), 1, roster(), deps);

        let result = battle.start(&start_payload(&battle));
        assert!(matches!(result, Err(BattleError::OutdatedClient { min: 100, .. })));
        assert!(!battle.is_started());
    }

    #[tokio::test]
    async fn test_destroyed_record_and_repair_eligibility() {
        let publisher = Arc::new(RecordingPublisher::default());
        let profiles = roster();
        let ai_owner = profiles[0].owner_id;
        let battle = Battle::new(Uuid::new_v4(), 1, profiles, deps(publisher.clone(), HashSet::from([ai_owner])));
        battle.start(&start_payload(&battle)).unwrap();

        let event = |victim: &str, killer: Option<&str>| WarMachineDestroyedPayload {
            event: DestroyedWarMachineEvent {
                destroyed_war_machine_hash: victim.into(),
                kill_by_war_machine_hash: killer.map(Into::into),
                related_event_id: None,
                damage_history: vec![DamageHistory {
                    amount: 300,
                    instigator_hash: "h2".into(),
                    source_hash: "rocket".into(),
                    source_name: "Rocket Pod".into(),
                }],
                killed_by: "Rocket Pod".into(),
            },
            battle_id: battle.id(),
        };

        let record = battle.destroyed(event("h0", Some("h2"))).unwrap();
        assert!(!record.repair_eligible);
        assert_eq!(record.killed_by_war_machine.unwrap().hash, "h2");
        assert!(!battle.war_machines()[0].is_alive());

        let record = battle.destroyed(event("h1", None)).unwrap();
        assert!(record.repair_eligible);
        assert!(record.killed_by_war_machine.is_none());

        let mech = battle.war_machines()[1].profile.id;
        assert_eq!(battle.destroyed_record(mech).unwrap().damage_records.len(), 1);
        assert!(matches!(
            battle.destroyed(event("nope", None)),
            Err(BattleError::UnknownWarMachine(_))
        ));
    }

    #[tokio::test]
    async fn test_end_once_and_wrong_battle() {
        let publisher = Arc::new(RecordingPublisher::default());
        let battle = Battle::new(Uuid::new_v4(), 7, roster(), deps(publisher.clone(), HashSet::new()));
        battle.start(&start_payload(&battle)).unwrap();

        let mut payload = BattleEndPayload {
            winning_war_machines: vec![WinningWarMachine {
                hash: "h1".into(),
                health: 420,
            }],
            battle_id: Uuid::new_v4(),
            win_condition: "LAST_ALIVE".into(),
        };
        assert!(matches!(battle.end(&payload), Err(BattleError::WrongBattle { .. })));
        assert_eq!(battle.stage(), BattleStage::Start);

        payload.battle_id = battle.id();
        let detail = battle.end(&payload).unwrap();
        assert_eq!(detail.winning_faction, Some(Faction::RedMountain));
        assert_eq!(detail.battle_number, 7);
        assert_eq!(detail.mech_ids.len(), 3);
        assert!(detail.started_at.is_some());

        assert!(matches!(battle.end(&payload), Err(BattleError::AlreadyEnded)));
        assert_eq!(battle.stage(), BattleStage::End);
        assert_eq!(publisher.with_key(keys::BATTLE_END).len(), 1);
        assert_eq!(
            battle.abilities().battle_session().phase().phase,
            BribePhase::Hold
        );

        // Ticks after END are dropped
        let frame = encode_tick(&[TickUpdate {
            participant_id: 1,
            position: None,
            health: Some(1),
            shield: None,
        }]);
        assert_eq!(battle.tick(&frame).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_init_payload() {
        let publisher = Arc::new(RecordingPublisher::default());
        let battle = Battle::new(Uuid::new_v4(), 3, roster(), deps(publisher, HashSet::new()));
        battle
            .set_map(
                battle.id(),
                MapDetails {
                    name: "DesertCity".into(),
                    ..Default::default()
                },
            )
            .unwrap();

        let json = serde_json::to_value(battle.init_payload()).unwrap();
        assert_eq!(json["battleNumber"], 3);
        assert_eq!(json["mapName"], "DesertCity");
        assert_eq!(json["warMachines"].as_array().unwrap().len(), 3);
    }
}
