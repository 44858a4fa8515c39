//! Per-battle ability system
//!
//! One shared battle-ability session plus one session per faction. All of
//! them share a shutdown signal that flips when the battle ends.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::info;

use crate::game::types::{Faction, GameLocation, PlayerId};
use crate::voting::ability::{AbilityCatalog, MechTarget};
use crate::voting::session::{
    AbilityBribeSession, ContributionOutcome, FlaggedRefund, LocationOutcome, OfferingSource,
    PhaseUpdate, SessionContext, SessionScope, VoteError,
};

pub struct AbilitySystem {
    ctx: Arc<SessionContext>,
    battle: Arc<AbilityBribeSession>,
    factions: BTreeMap<Faction, Arc<AbilityBribeSession>>,
    shutdown: watch::Sender<bool>,
}

impl AbilitySystem {
    /// `roster` lists each faction's mechs for mech-targeted abilities
    pub fn new(
        ctx: Arc<SessionContext>,
        catalog: Arc<AbilityCatalog>,
        roster: &BTreeMap<Faction, Vec<MechTarget>>,
    ) -> Self {
        let battle = AbilityBribeSession::new(
            SessionScope::Battle,
            ctx.clone(),
            OfferingSource::BattleAbility {
                catalog: catalog.clone(),
            },
        );

        let factions = Faction::ALL
            .iter()
            .map(|f| {
                let session = AbilityBribeSession::new(
                    SessionScope::Faction(*f),
                    ctx.clone(),
                    OfferingSource::FactionAbilities {
                        faction: *f,
                        catalog: catalog.clone(),
                        mechs: roster.get(f).cloned().unwrap_or_default(),
                    },
                );
                (*f, session)
            })
            .collect();

        let (shutdown, _) = watch::channel(false);
        Self {
            ctx,
            battle,
            factions,
            shutdown,
        }
    }

    fn sessions(&self) -> impl Iterator<Item = &Arc<AbilityBribeSession>> {
        std::iter::once(&self.battle).chain(self.factions.values())
    }

    /// Spawn the session drivers and enter the intro phase
    pub fn start(&self, mech_count: usize) {
        for session in self.sessions() {
            tokio::spawn(session.clone().run(self.shutdown.subscribe()));
            session.start(mech_count);
        }
        info!("Ability sessions started for battle {}", self.ctx.battle_id);
    }

    /// Park every session in `Hold` and stop the drivers
    pub fn stop(&self) {
        for session in self.sessions() {
            session.stop();
        }
        self.shutdown.send_replace(true);
    }

    pub fn battle_session(&self) -> &Arc<AbilityBribeSession> {
        &self.battle
    }

    pub fn faction_session(&self, faction: Faction) -> Option<&Arc<AbilityBribeSession>> {
        self.factions.get(&faction)
    }

    /// Bribe towards the faction's offering of the shared battle ability
    pub async fn bribe_battle_ability(
        &self,
        faction: Faction,
        player: PlayerId,
        amount: Decimal,
    ) -> Result<ContributionOutcome, VoteError> {
        self.battle.contribute(faction, player, None, amount).await
    }

    /// Contribute to one of the faction's own abilities
    pub async fn contribute_faction_ability(
        &self,
        faction: Faction,
        player: PlayerId,
        identity: &str,
        amount: Decimal,
    ) -> Result<ContributionOutcome, VoteError> {
        let session = self
            .factions
            .get(&faction)
            .ok_or_else(|| VoteError::UnknownAbility(identity.to_string()))?;
        session.contribute(faction, player, Some(identity), amount).await
    }

    /// Route a location pick to whichever session is waiting on `player`
    pub async fn select_location(
        &self,
        faction: Faction,
        player: PlayerId,
        location: GameLocation,
    ) -> Result<LocationOutcome, VoteError> {
        if self.battle.current_decider() == Some(player) {
            return self.battle.select_location(player, location).await;
        }
        match self.factions.get(&faction) {
            Some(session) if session.current_decider() == Some(player) => {
                session.select_location(player, location).await
            }
            _ => Err(VoteError::NotDecider),
        }
    }

    pub fn phases(&self) -> Vec<(SessionScope, PhaseUpdate)> {
        self.sessions().map(|s| (s.scope(), s.phase())).collect()
    }

    pub fn flagged_refunds(&self) -> Vec<FlaggedRefund> {
        self.ctx.flagged_refunds()
    }
}

impl Drop for AbilitySystem {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}
