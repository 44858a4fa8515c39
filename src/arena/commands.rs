//! Player commands against an arena's current battle
//!
//! Spectator traffic races battle teardown, so every command snapshots the
//! current battle once and treats "no battle" as a no-op. Errors carry a
//! player-readable message; the internal cause stays on `source()`.

use rust_decimal::Decimal;
use tracing::debug;

use crate::arena::Arena;
use crate::game::types::{Faction, GameLocation, PlayerId};
use crate::metrics::Metrics;
use crate::queue::QueueError;
use crate::services::payments::PaymentError;
use crate::voting::session::ContributionOutcome;
use crate::voting::{LocationOutcome, RateLimitViolation, VoteError};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Too many contributions, slow down")]
    RateLimited(#[source] RateLimitViolation),
    #[error("Bribing is not open right now")]
    Closed(#[source] VoteError),
    #[error("That ability is no longer available")]
    Unavailable(#[source] VoteError),
    #[error("Amount must be greater than zero")]
    InvalidAmount(#[source] VoteError),
    #[error("Not enough SUPS")]
    InsufficientFunds(#[source] VoteError),
    #[error("It is not your turn to pick a location")]
    NotDecider(#[source] VoteError),
    #[error("Your location is still being checked")]
    Busy(#[source] VoteError),
    #[error("That location cannot be targeted, pick another")]
    InvalidLocation(#[source] VoteError),
    #[error("Mech is already queued")]
    AlreadyQueued(#[source] QueueError),
    #[error("Mech is not in the queue")]
    NotQueued(#[source] QueueError),
    #[error("Mech is already in a battle")]
    InBattle(#[source] QueueError),
    #[error("Not enough SUPS for the queue fee")]
    QueueFee(#[source] QueueError),
    #[error("Something went wrong, please try again")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<VoteError> for CommandError {
    fn from(e: VoteError) -> Self {
        match e {
            VoteError::NotAccepting(_) => CommandError::Closed(e),
            VoteError::UnknownAbility(_) | VoteError::AbilityClosed => CommandError::Unavailable(e),
            VoteError::InvalidAmount(_) => CommandError::InvalidAmount(e),
            VoteError::NotDecider => CommandError::NotDecider(e),
            VoteError::CheckInProgress => CommandError::Busy(e),
            VoteError::InvalidLocation => CommandError::InvalidLocation(e),
            VoteError::Payment(PaymentError::InsufficientFunds { .. }) => CommandError::InsufficientFunds(e),
            VoteError::Payment(_) => CommandError::Internal(Box::new(e)),
        }
    }
}

impl From<QueueError> for CommandError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::AlreadyQueued(_) => CommandError::AlreadyQueued(e),
            QueueError::NotQueued(_) => CommandError::NotQueued(e),
            QueueError::InBattle(_) => CommandError::InBattle(e),
            QueueError::Payment(PaymentError::InsufficientFunds { .. }) => CommandError::QueueFee(e),
            QueueError::Store(_) | QueueError::Payment(_) => CommandError::Internal(Box::new(e)),
        }
    }
}

impl Arena {
    fn rate_limit(&self, player: PlayerId) -> Result<(), CommandError> {
        self.limiter.check(player).map_err(|e| {
            Metrics::incr(&self.metrics.contributions_rejected);
            CommandError::RateLimited(e)
        })
    }

    /// Bribe towards the shared battle ability for `faction`
    pub async fn bribe_battle_ability(
        &self,
        faction: Faction,
        player: PlayerId,
        amount: Decimal,
    ) -> Result<Option<ContributionOutcome>, CommandError> {
        self.rate_limit(player)?;
        let Some(battle) = self.current_battle() else {
            debug!("Bribe from {} with no battle on arena {}", player, self.id);
            return Ok(None);
        };
        let outcome = battle
            .abilities()
            .bribe_battle_ability(faction, player, amount)
            .await?;
        Ok(Some(outcome))
    }

    pub async fn contribute_faction_ability(
        &self,
        faction: Faction,
        player: PlayerId,
        identity: &str,
        amount: Decimal,
    ) -> Result<Option<ContributionOutcome>, CommandError> {
        self.rate_limit(player)?;
        let Some(battle) = self.current_battle() else {
            return Ok(None);
        };
        let outcome = battle
            .abilities()
            .contribute_faction_ability(faction, player, identity, amount)
            .await?;
        Ok(Some(outcome))
    }

    /// Location pick from the current decider
    pub async fn select_location(
        &self,
        faction: Faction,
        player: PlayerId,
        location: GameLocation,
    ) -> Result<Option<LocationOutcome>, CommandError> {
        let Some(battle) = self.current_battle() else {
            return Ok(None);
        };
        let outcome = battle.abilities().select_location(faction, player, location).await?;
        Ok(Some(outcome))
    }
}
