//! Timed ability bribing session
//!
//! Phases cycle `WaitMechIntro -> VoteCooldown -> VoteAbilityRight ->
//! (NextVoteWin) -> LocationSelect -> VoteCooldown ...` until the battle ends
//! and the session returns to `Hold`. A driver task owns the timers; request
//! handlers only move the phase forward when a round is won or a location
//! is confirmed.
//!
//! Lock order: session state, then ability ledgers. Payments, pub/sub and
//! socket calls are made with no session lock held (pub/sub `publish` is
//! non-blocking and is the one exception, so phase updates keep their order).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::VoteTimings;
use crate::game::constants::vote::PRICE_RAISE_FACTOR;
use crate::game::types::{BattleId, Faction, GameLocation, PlayerId};
use crate::metrics::Metrics;
use crate::net::link::{send_command, AbilityCheck, SimulationLink};
use crate::net::protocol::{commands, GameAbilityEvent};
use crate::services::payments::{
    bounded, PaymentError, PaymentsClient, SpendSupsRequest, TransactionId, TreasuryAccount,
};
use crate::services::pubsub::{keys, publish_event, topics, Publisher};
use crate::voting::ability::{AbilityCatalog, AbilityTarget, GameAbility, MechTarget};
use crate::voting::ledger::ContributionReceipt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BribePhase {
    Hold,
    WaitMechIntro,
    VoteCooldown,
    VoteAbilityRight,
    NextVoteWin,
    LocationSelect,
}

/// Broadcast on every phase change
#[derive(Debug, Clone, Serialize)]
pub struct PhaseUpdate {
    pub phase: BribePhase,
    pub end_time: Option<DateTime<Utc>>,
    pub round: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "faction", rename_all = "snake_case")]
pub enum SessionScope {
    /// Shared battle ability, one offering per faction
    Battle,
    /// Faction-unique abilities
    Faction(Faction),
}

#[derive(Debug, thiserror::Error)]
pub enum VoteError {
    #[error("Not accepting contributions during {0:?}")]
    NotAccepting(BribePhase),
    #[error("Unknown ability {0}")]
    UnknownAbility(String),
    #[error("Ability already funded")]
    AbilityClosed,
    #[error("Invalid amount {0}")]
    InvalidAmount(Decimal),
    #[error("Player is not the current location decider")]
    NotDecider,
    #[error("A location check is already in flight")]
    CheckInProgress,
    #[error("Location rejected by the simulation")]
    InvalidLocation,
    #[error("Payment failed: {0}")]
    Payment(#[from] PaymentError),
}

/// A refund that could not be completed and needs reconciliation
#[derive(Debug, Clone, Serialize)]
pub struct FlaggedRefund {
    pub transaction_id: TransactionId,
    pub player_id: PlayerId,
    pub amount: Decimal,
    pub reason: String,
}

/// Collaborators shared by every session of one battle
pub struct SessionContext {
    pub battle_id: BattleId,
    pub arena_id: Uuid,
    pub timings: VoteTimings,
    pub collaborator_timeout: Duration,
    pub link: Arc<dyn SimulationLink>,
    pub payments: Arc<dyn PaymentsClient>,
    pub publisher: Arc<dyn Publisher>,
    pub metrics: Arc<Metrics>,
    flagged: Mutex<Vec<FlaggedRefund>>,
}

impl SessionContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        battle_id: BattleId,
        arena_id: Uuid,
        timings: VoteTimings,
        collaborator_timeout: Duration,
        link: Arc<dyn SimulationLink>,
        payments: Arc<dyn PaymentsClient>,
        publisher: Arc<dyn Publisher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            battle_id,
            arena_id,
            timings,
            collaborator_timeout,
            link,
            payments,
            publisher,
            metrics,
            flagged: Mutex::new(Vec::new()),
        }
    }

    pub fn flagged_refunds(&self) -> Vec<FlaggedRefund> {
        self.flagged.lock().clone()
    }

    fn notify(&self, payload: serde_json::Value) {
        self.publisher
            .publish(topics::notifications(self.arena_id), keys::NOTIFICATION, payload);
    }
}

/// Where each round's offerings come from
pub enum OfferingSource {
    /// A random battle ability offered to every faction
    BattleAbility { catalog: Arc<AbilityCatalog> },
    /// The faction's unique abilities, one per mech for mech-targeted ones
    FactionAbilities {
        faction: Faction,
        catalog: Arc<AbilityCatalog>,
        mechs: Vec<MechTarget>,
    },
}

impl OfferingSource {
    fn next_round(&self) -> Vec<Arc<GameAbility>> {
        match self {
            OfferingSource::BattleAbility { catalog } => {
                let Some(template) = catalog.random_battle_ability(&mut rand::thread_rng()) else {
                    return Vec::new();
                };
                Faction::ALL
                    .iter()
                    .map(|f| Arc::new(GameAbility::new(template.clone(), *f, None)))
                    .collect()
            }
            OfferingSource::FactionAbilities { faction, catalog, mechs } => {
                let mut offerings = Vec::new();
                for template in catalog.faction_abilities(*faction) {
                    if template.target == AbilityTarget::WarMachine {
                        for mech in mechs {
                            offerings.push(Arc::new(GameAbility::new(
                                template.clone(),
                                *faction,
                                Some(mech.clone()),
                            )));
                        }
                    } else {
                        offerings.push(Arc::new(GameAbility::new(template.clone(), *faction, None)));
                    }
                }
                offerings
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContributionOutcome {
    pub offering_id: Uuid,
    pub identity: String,
    pub transaction_id: TransactionId,
    pub receipt: ContributionReceipt,
    /// This contribution decided the round
    pub won_round: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationOutcome {
    Triggered,
    /// No verdict from the simulation in time; nothing charged, nothing fired
    Abandoned,
}

#[derive(Debug, Serialize)]
struct AbilityProgress<'a> {
    offering_id: Uuid,
    identity: &'a str,
    label: &'a str,
    cumulative: Decimal,
    target: Decimal,
    contributors: usize,
}

#[derive(Debug, Serialize)]
struct LocationSelectNotice<'a> {
    offering_id: Uuid,
    identity: &'a str,
    faction: Faction,
    player_id: PlayerId,
    end_time: Option<DateTime<Utc>>,
}

/// Ability to fire once no lock is held
struct PendingTrigger {
    ability: Arc<GameAbility>,
    triggered_by: Option<PlayerId>,
}

struct SessionState {
    phase: BribePhase,
    round: u64,
    deadline: Option<Instant>,
    end_time: Option<DateTime<Utc>>,
    offerings: Vec<Arc<GameAbility>>,
    winner: Option<Arc<GameAbility>>,
    deciders: VecDeque<PlayerId>,
    check_in_flight: bool,
    /// Targets carried into the next round, by faction and offering identity
    prices: HashMap<(Faction, String), Decimal>,
}

enum Wake {
    Deadline,
    PriceTick,
    Nudge,
    Shutdown,
}

pub struct AbilityBribeSession {
    scope: SessionScope,
    ctx: Arc<SessionContext>,
    source: OfferingSource,
    state: Mutex<SessionState>,
    wake: Notify,
}

impl AbilityBribeSession {
    pub fn new(scope: SessionScope, ctx: Arc<SessionContext>, source: OfferingSource) -> Arc<Self> {
        Arc::new(Self {
            scope,
            ctx,
            source,
            state: Mutex::new(SessionState {
                phase: BribePhase::Hold,
                round: 0,
                deadline: None,
                end_time: None,
                offerings: Vec::new(),
                winner: None,
                deciders: VecDeque::new(),
                check_in_flight: false,
                prices: HashMap::new(),
            }),
            wake: Notify::new(),
        })
    }

    pub fn scope(&self) -> SessionScope {
        self.scope
    }

    pub fn phase(&self) -> PhaseUpdate {
        let state = self.state.lock();
        PhaseUpdate {
            phase: state.phase,
            end_time: state.end_time,
            round: state.round,
        }
    }

    pub fn offerings(&self) -> Vec<Arc<GameAbility>> {
        self.state.lock().offerings.clone()
    }

    /// Player who may currently pick a location
    pub fn current_decider(&self) -> Option<PlayerId> {
        let state = self.state.lock();
        match state.phase {
            BribePhase::LocationSelect => state.deciders.front().copied(),
            _ => None,
        }
    }

    fn topic(&self) -> String {
        match self.scope {
            SessionScope::Battle => topics::battle_bribe_stage(self.ctx.battle_id),
            SessionScope::Faction(f) => topics::faction_ability_stage(self.ctx.battle_id, f),
        }
    }

    /// Move to `phase`; publishes immediately and wakes the driver
    fn enter(&self, state: &mut SessionState, phase: BribePhase, duration: Option<Duration>) {
        state.phase = phase;
        state.deadline = duration.map(|d| Instant::now() + d);
        state.end_time = duration
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d);

        debug!("{:?} session for battle {} -> {:?}", self.scope, self.ctx.battle_id, phase);
        publish_event(
            self.ctx.publisher.as_ref(),
            self.topic(),
            keys::BRIBE_STAGE,
            &PhaseUpdate {
                phase,
                end_time: state.end_time,
                round: state.round,
            },
        );
        self.wake.notify_one();
    }

    /// Battle intro started
    pub fn start(&self, mech_count: usize) {
        let mut state = self.state.lock();
        if state.phase != BribePhase::Hold {
            warn!("{:?} session already running", self.scope);
            return;
        }
        let intro = self.ctx.timings.intro_duration(mech_count);
        self.enter(&mut state, BribePhase::WaitMechIntro, Some(intro));
    }

    /// Battle over; close every ledger and park in `Hold`
    pub fn stop(&self) {
        let mut state = self.state.lock();
        for offering in &state.offerings {
            offering.ledger.close();
        }
        state.deciders.clear();
        state.winner = None;
        if state.phase != BribePhase::Hold {
            self.enter(&mut state, BribePhase::Hold, None);
        }
    }

    /// Fund an offering. `identity` selects among several offerings of the faction.
    ///
    /// The charge is taken before the ledger records it. If the window
    /// closes while the charge is in flight the charge is refunded.
    pub async fn contribute(
        &self,
        faction: Faction,
        player: PlayerId,
        identity: Option<&str>,
        amount: Decimal,
    ) -> Result<ContributionOutcome, VoteError> {
        if amount <= Decimal::ZERO {
            return Err(VoteError::InvalidAmount(amount));
        }

        let (ability, round) = {
            let state = self.state.lock();
            if !matches!(state.phase, BribePhase::VoteAbilityRight | BribePhase::NextVoteWin) {
                return Err(VoteError::NotAccepting(state.phase));
            }
            let ability = state
                .offerings
                .iter()
                .find(|a| a.faction == faction && identity.map_or(true, |id| a.identity() == id))
                .cloned()
                .ok_or_else(|| VoteError::UnknownAbility(identity.unwrap_or("battle ability").to_string()))?;
            if ability.ledger.is_closed() {
                return Err(VoteError::AbilityClosed);
            }
            (ability, state.round)
        };

        let transaction_id = bounded(
            self.ctx.collaborator_timeout,
            self.ctx.payments.spend_sups(SpendSupsRequest {
                from: player,
                to: TreasuryAccount::BattleSpoils,
                amount,
                reference: format!("ability_contribution|{}|{}", ability.offering_id, Uuid::new_v4()),
                description: format!("Contribution to {}", ability.template.label),
            }),
        )
        .await?;

        // Phase as of now, not as of the request
        let phase = {
            let state = self.state.lock();
            (state.round == round).then_some(state.phase)
        };
        let recorded = match phase {
            Some(BribePhase::VoteAbilityRight | BribePhase::NextVoteWin) => ability
                .ledger
                .contribute(player, amount)
                .map_err(|_| VoteError::AbilityClosed),
            Some(phase) => Err(VoteError::NotAccepting(phase)),
            None => Err(VoteError::AbilityClosed),
        };
        let receipt = match recorded {
            Ok(receipt) => receipt,
            Err(e) => {
                debug!("Contribution from {} rejected after charge: {}", player, e);
                Metrics::incr(&self.ctx.metrics.contributions_rejected);
                self.refund(&transaction_id, player, amount).await;
                return Err(e);
            }
        };
        Metrics::incr(&self.ctx.metrics.contributions);

        let identity = ability.identity();
        self.publish_progress(&ability);

        let mut won_round = false;
        if receipt.winning || phase == Some(BribePhase::NextVoteWin) {
            let trigger = {
                let mut state = self.state.lock();
                if state.round == round
                    && matches!(state.phase, BribePhase::VoteAbilityRight | BribePhase::NextVoteWin)
                {
                    won_round = true;
                    self.resolve_round(&mut state, ability.clone(), Some(player))
                } else {
                    None
                }
            };
            if let Some(trigger) = trigger {
                self.fire(trigger).await;
            }
        }

        Ok(ContributionOutcome {
            offering_id: ability.offering_id,
            identity,
            transaction_id,
            receipt,
            won_round,
        })
    }

    /// Winner picks where the ability lands
    pub async fn select_location(
        &self,
        player: PlayerId,
        location: GameLocation,
    ) -> Result<LocationOutcome, VoteError> {
        let (ability, round) = {
            let mut state = self.state.lock();
            if state.phase != BribePhase::LocationSelect {
                return Err(VoteError::NotAccepting(state.phase));
            }
            if state.deciders.front() != Some(&player) {
                return Err(VoteError::NotDecider);
            }
            if state.check_in_flight {
                return Err(VoteError::CheckInProgress);
            }
            let Some(ability) = state.winner.clone() else {
                return Err(VoteError::NotAccepting(state.phase));
            };
            state.check_in_flight = true;
            (ability, state.round)
        };

        let event = GameAbilityEvent {
            is_triggered: true,
            game_client_ability_id: ability.template.game_client_ability_id,
            war_machine_hash: ability.mech.as_ref().map(|m| m.hash.clone()),
            participant_id: None,
            event_id: Uuid::new_v4(),
            game_location: Some(location),
        };
        let verdict = self.ctx.link.check_ability(event).await;

        let mut state = self.state.lock();
        state.check_in_flight = false;

        match verdict {
            AbilityCheck::Valid => {
                if state.round == round {
                    state.deciders.clear();
                    state.winner = None;
                    let cooldown = self.ctx.timings.cooldown;
                    self.enter(&mut state, BribePhase::VoteCooldown, Some(cooldown));
                }
                drop(state);

                Metrics::incr(&self.ctx.metrics.abilities_triggered);
                info!(
                    "{} triggered by {} at ({}, {}) in battle {}",
                    ability.template.label, player, location.x, location.y, self.ctx.battle_id
                );
                self.ctx.notify(serde_json::json!({
                    "type": "ABILITY_TRIGGERED",
                    "ability": ability.template.label,
                    "faction": ability.faction,
                    "player_id": player,
                    "location": location,
                }));
                Ok(LocationOutcome::Triggered)
            }
            AbilityCheck::Invalid => Err(VoteError::InvalidLocation),
            AbilityCheck::TimedOut | AbilityCheck::Unavailable => {
                debug!("Location check for {} abandoned", ability.identity());
                Ok(LocationOutcome::Abandoned)
            }
        }
    }

    /// Close the round for `ability`. Caller holds the state lock.
    fn resolve_round(
        &self,
        state: &mut SessionState,
        ability: Arc<GameAbility>,
        crossed_by: Option<PlayerId>,
    ) -> Option<PendingTrigger> {
        for offering in &state.offerings {
            offering.ledger.close();
            let mut target = offering.ledger.target();
            if Arc::ptr_eq(offering, &ability) {
                target *= PRICE_RAISE_FACTOR;
            }
            state.prices.insert((offering.faction, offering.identity()), target);
        }

        let mut deciders: VecDeque<PlayerId> = ability
            .ledger
            .ranked_contributors()
            .into_iter()
            .map(|(player, _)| player)
            .collect();
        if let Some(player) = crossed_by {
            deciders.retain(|p| *p != player);
            deciders.push_front(player);
        }

        info!(
            "{:?} round {} won by {} ({})",
            self.scope,
            state.round,
            ability.faction,
            ability.identity()
        );

        if ability.needs_location() && !deciders.is_empty() {
            state.deciders = deciders;
            state.winner = Some(ability.clone());
            let window = self.ctx.timings.location_select;
            self.enter(state, BribePhase::LocationSelect, Some(window));
            self.announce_decider(state, &ability);
            None
        } else {
            state.deciders.clear();
            state.winner = None;
            let cooldown = self.ctx.timings.cooldown;
            self.enter(state, BribePhase::VoteCooldown, Some(cooldown));
            Some(PendingTrigger {
                ability,
                triggered_by: crossed_by.or_else(|| deciders.front().copied()),
            })
        }
    }

    fn publish_progress(&self, ability: &GameAbility) {
        let snapshot = ability.ledger.snapshot();
        publish_event(
            self.ctx.publisher.as_ref(),
            topics::ability_progress(self.ctx.battle_id, ability.faction),
            keys::ABILITY_PROGRESS,
            &AbilityProgress {
                offering_id: ability.offering_id,
                identity: &ability.identity(),
                label: &ability.template.label,
                cumulative: snapshot.cumulative,
                target: snapshot.target,
                contributors: snapshot.contributors,
            },
        );
    }

    fn announce_decider(&self, state: &SessionState, ability: &GameAbility) {
        if let Some(player) = state.deciders.front() {
            publish_event(
                self.ctx.publisher.as_ref(),
                self.topic(),
                keys::LOCATION_SELECT,
                &LocationSelectNotice {
                    offering_id: ability.offering_id,
                    identity: &ability.identity(),
                    faction: ability.faction,
                    player_id: *player,
                    end_time: state.end_time,
                },
            );
        }
    }

    /// Timer expiry for the current phase
    fn on_deadline(&self) -> Option<PendingTrigger> {
        let mut state = self.state.lock();
        match state.deadline {
            Some(at) if at <= Instant::now() => {}
            _ => return None,
        }

        match state.phase {
            BribePhase::WaitMechIntro => {
                let cooldown = self.ctx.timings.cooldown;
                self.enter(&mut state, BribePhase::VoteCooldown, Some(cooldown));
                None
            }
            BribePhase::VoteCooldown => {
                state.round += 1;
                let offerings = self.source.next_round();
                for offering in &offerings {
                    if let Some(target) = state.prices.get(&(offering.faction, offering.identity())) {
                        offering.ledger.reset(*target);
                    }
                }
                state.offerings = offerings;
                state.winner = None;
                state.deciders.clear();
                let window = self.ctx.timings.ability_right;
                self.enter(&mut state, BribePhase::VoteAbilityRight, Some(window));
                None
            }
            BribePhase::VoteAbilityRight => {
                let mut best: Option<&Arc<GameAbility>> = None;
                for offering in state.offerings.iter().filter(|o| !o.ledger.is_empty()) {
                    if best.map_or(true, |b| offering.ledger.cumulative() > b.ledger.cumulative()) {
                        best = Some(offering);
                    }
                }
                match best.cloned() {
                    Some(ability) => self.resolve_round(&mut state, ability, None),
                    None => {
                        self.enter(&mut state, BribePhase::NextVoteWin, None);
                        None
                    }
                }
            }
            BribePhase::LocationSelect => {
                if let Some(skipped) = state.deciders.pop_front() {
                    debug!("Decider {} ran out of time", skipped);
                }
                match (state.winner.clone(), state.deciders.is_empty()) {
                    (Some(ability), false) => {
                        let window = self.ctx.timings.location_select;
                        self.enter(&mut state, BribePhase::LocationSelect, Some(window));
                        self.announce_decider(&state, &ability);
                    }
                    (ability, _) => {
                        if let Some(ability) = ability {
                            self.ctx.notify(serde_json::json!({
                                "type": "ABILITY_CANCELLED",
                                "ability": ability.template.label,
                                "faction": ability.faction,
                            }));
                        }
                        state.winner = None;
                        state.deciders.clear();
                        let cooldown = self.ctx.timings.cooldown;
                        self.enter(&mut state, BribePhase::VoteCooldown, Some(cooldown));
                    }
                }
                None
            }
            BribePhase::Hold | BribePhase::NextVoteWin => None,
        }
    }

    /// Decay every open offering's target
    ///
    /// An offering whose target falls to what it has already raised wins
    /// the round, with its top contributor deciding.
    fn on_price_tick(&self) -> Option<PendingTrigger> {
        let rate = match self.scope {
            SessionScope::Battle => self.ctx.timings.battle_price_drop_rate,
            SessionScope::Faction(_) => self.ctx.timings.faction_price_drop_rate,
        };
        if rate >= Decimal::ONE {
            return None;
        }

        let mut state = self.state.lock();
        if state.phase != BribePhase::VoteAbilityRight {
            return None;
        }

        let floor = self.ctx.timings.price_floor;
        let mut crossed = None;
        for offering in &state.offerings {
            if let Some(moved) = offering.ledger.decay(rate, floor) {
                self.publish_progress(offering);
                if moved.crossed && crossed.is_none() {
                    crossed = Some(offering.clone());
                }
            }
        }

        let ability = crossed?;
        debug!("{} target fell to its funded total", ability.identity());
        self.resolve_round(&mut state, ability, None)
    }

    async fn fire(&self, trigger: PendingTrigger) {
        let ability = trigger.ability;
        let event = GameAbilityEvent {
            is_triggered: true,
            game_client_ability_id: ability.template.game_client_ability_id,
            war_machine_hash: ability.mech.as_ref().map(|m| m.hash.clone()),
            participant_id: None,
            event_id: Uuid::new_v4(),
            game_location: None,
        };

        match send_command(self.ctx.link.as_ref(), commands::BATTLE_ABILITY, &event).await {
            Ok(()) => {
                Metrics::incr(&self.ctx.metrics.abilities_triggered);
                self.ctx.notify(serde_json::json!({
                    "type": "ABILITY_TRIGGERED",
                    "ability": ability.template.label,
                    "faction": ability.faction,
                    "player_id": trigger.triggered_by,
                    "war_machine": ability.mech.as_ref().map(|m| m.name.clone()),
                }));
            }
            Err(e) => error!("Failed to trigger {}: {}", ability.identity(), e),
        }
    }

    async fn refund(&self, transaction_id: &str, player: PlayerId, amount: Decimal) {
        match bounded(
            self.ctx.collaborator_timeout,
            self.ctx.payments.refund_sups(transaction_id),
        )
        .await
        {
            Ok(_) => Metrics::incr(&self.ctx.metrics.refunds_issued),
            Err(e) => {
                Metrics::incr(&self.ctx.metrics.refunds_failed);
                error!(
                    "Failed to refund contribution tx={} player={} amount={}: {}",
                    transaction_id, player, amount, e
                );
                self.ctx.flagged.lock().push(FlaggedRefund {
                    transaction_id: transaction_id.to_string(),
                    player_id: player,
                    amount,
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Timer driver; exits when `shutdown` flips to true or its sender drops
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut prices = tokio::time::interval(self.ctx.timings.price_tick);
        prices.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let deadline = self.state.lock().deadline;
            let phase_timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let wake = tokio::select! {
                _ = phase_timer => Wake::Deadline,
                _ = prices.tick() => Wake::PriceTick,
                _ = self.wake.notified() => Wake::Nudge,
                changed = shutdown.changed() => match changed {
                    Ok(()) => Wake::Nudge,
                    Err(_) => Wake::Shutdown,
                },
            };

            let trigger = match wake {
                Wake::Deadline => self.on_deadline(),
                Wake::PriceTick => self.on_price_tick(),
                Wake::Nudge => None,
                Wake::Shutdown => break,
            };
            if let Some(trigger) = trigger {
                self.fire(trigger).await;
            }
        }
        debug!("{:?} session driver for battle {} stopped", self.scope, self.ctx.battle_id);
    }
}
