//! Queue fee pricing
//!
//! The log term is computed in `f64` and only then lifted into `Decimal`;
//! money stays fixed-point everywhere else.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::QueueConfig;
use crate::game::types::sups;

/// Price of the next queue slot for a faction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub queue_length: u64,
    /// SUP base units
    pub queue_cost: Decimal,
    /// SUP base units
    pub contract_reward: Decimal,
}

/// Pure function of the current queue length and config
pub fn calc_next_queue_status(length: u64, config: &QueueConfig) -> QueueStatus {
    let l = length.saturating_add(1).saturating_add(config.fee_addage);
    let l_dec = Decimal::from(l);

    let min_cost = sups(l_dec / Decimal::from(4));

    let multiplier = (l as f64).ln() / config.fee_log_multiplier * 0.25;
    let multiplier = Decimal::from_f64(multiplier).unwrap_or(Decimal::ZERO);
    let cost = sups(l_dec * multiplier).max(min_cost);

    QueueStatus {
        queue_length: length,
        queue_cost: cost,
        contract_reward: sups(l_dec * Decimal::from(2)),
    }
}

/// Seconds until a mech at 1-based `position` can expect to fight
pub fn estimate_eta_seconds(position: u64, config: &QueueConfig) -> u64 {
    let limit = config.faction_mech_limit.max(1) as u64;
    position.div_ceil(limit) * config.average_battle.as_secs()
}
