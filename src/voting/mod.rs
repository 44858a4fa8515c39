//! Ability bribing: offerings, contribution ledgers and the timed sessions
//! that decide which faction gets to fire an ability.

pub mod ability;
pub mod ledger;
pub mod rate_limiter;
pub mod session;
pub mod system;

pub use ability::{AbilityCatalog, AbilityTarget, AbilityTemplate, GameAbility, MechTarget};
pub use rate_limiter::{ContributionRateLimiter, RateLimitViolation};
pub use session::{AbilityBribeSession, BribePhase, LocationOutcome, VoteError};
pub use system::AbilitySystem;
