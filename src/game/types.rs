//! Shared domain types

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PlayerId = Uuid;
pub type MechId = Uuid;
pub type BattleId = Uuid;

/// One SUP in its smallest on-chain unit (18 decimals)
pub const SUPS_UNIT: Decimal = dec!(1_000_000_000_000_000_000);

/// Convert a whole or fractional SUP amount into base units
pub fn sups(amount: Decimal) -> Decimal {
    amount * SUPS_UNIT
}

/// Convert base units back into SUPs for display
pub fn as_sups(units: Decimal) -> Decimal {
    units / SUPS_UNIT
}

/// The three competing factions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Faction {
    Zaibatsu,
    RedMountain,
    BostonCybernetics,
}

impl Faction {
    pub const ALL: [Faction; 3] = [
        Faction::Zaibatsu,
        Faction::RedMountain,
        Faction::BostonCybernetics,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Faction::Zaibatsu => "Zaibatsu Heavy Industries",
            Faction::RedMountain => "Red Mountain Offworld Mining Corporation",
            Faction::BostonCybernetics => "Boston Cybernetics",
        }
    }

    /// Topic-safe key
    pub fn key(self) -> &'static str {
        match self {
            Faction::Zaibatsu => "zaibatsu",
            Faction::RedMountain => "red_mountain",
            Faction::BostonCybernetics => "boston_cybernetics",
        }
    }
}

impl fmt::Display for Faction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Map coordinate in simulation grid cells
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameLocation {
    pub x: i32,
    pub y: i32,
}

impl GameLocation {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Squared distance, enough for nearest-neighbour comparisons
    pub fn distance_sq(&self, other: &GameLocation) -> i64 {
        let dx = self.x as i64 - other.x as i64;
        let dy = self.y as i64 - other.y as i64;
        dx * dx + dy * dy
    }
}
