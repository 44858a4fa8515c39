//! Game constants
//!
//! Defaults for values that are also tunable through `ServerConfig`.

/// Battle queue constants
pub mod queue {
    /// Mechs promoted per faction per batch
    pub const FACTION_MECH_LIMIT: usize = 3;
    /// Scheduler tick interval in seconds
    pub const TICK_INTERVAL_SECS: u64 = 1;
    /// Divisor applied to `ln(L)` when pricing the next queue slot
    pub const FEE_LOG_MULTIPLIER: f64 = 3.25;
    /// Rough length of one battle round, used for queue ETA
    pub const AVERAGE_BATTLE_SECS: u64 = 300;
}

/// Battle lifecycle constants
pub mod battle {
    /// Wait between `BATTLE:END` and the next init
    pub const END_COOLDOWN_SECS: u64 = 30;
    /// Intro animation budget per mech
    pub const INTRO_SECS_PER_MECH: u64 = 3;
    /// Fixed intro animation budget
    pub const INTRO_BASE_SECS: u64 = 7;
    /// Participant ids above this belong to mechs spawned by the simulation
    pub const SPAWNED_AI_PARTICIPANT_MIN: u8 = 100;
}

/// Ability voting constants
pub mod vote {
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    pub const COOLDOWN_SECS: u64 = 5;
    pub const ABILITY_RIGHT_SECS: u64 = 30;
    pub const LOCATION_SELECT_SECS: u64 = 15;
    /// Contribution commands allowed per player per window
    pub const BUCKET_CAPACITY: u32 = 8;
    pub const BUCKET_WINDOW_SECS: u64 = 8;

    /// Target prices move once per tick while a round is open
    pub const PRICE_TICK_SECS: u64 = 1;
    /// Per-tick multiplier for the shared battle ability target
    pub const BATTLE_PRICE_DROP_RATE: Decimal = dec!(0.93304);
    /// Per-tick multiplier for faction-unique ability targets
    pub const FACTION_PRICE_DROP_RATE: Decimal = dec!(0.9977);
    /// A triggered ability comes back at this multiple of its target
    pub const PRICE_RAISE_FACTOR: Decimal = dec!(2);
}

/// AI mech control constants
pub mod ai {
    /// Simulation-side ability id for a mech move command
    pub const MOVE_COMMAND_ABILITY_ID: u8 = 8;
    /// Simulation-side ability id for a field repair
    pub const REPAIR_ABILITY_ID: u8 = 2;
    /// AI mechs stay with allies for this long before hunting
    pub const APPROACH_OPPONENT_AFTER_SECS: u64 = 90;
    pub const FIRST_DECISION_SECS: u64 = 1;
    pub const MAX_DECISION_SECS: u64 = 5;
}

/// Networking constants
pub mod net {
    /// Maximum frame size accepted from the simulation process
    pub const MAX_MESSAGE_SIZE: usize = 1 << 20;
    pub const WRITE_TIMEOUT_SECS: u64 = 10;
    /// Location check round trip timeout
    pub const LOCATION_CHECK_TIMEOUT_MS: u64 = 1500;
    /// Cap on payments and store calls
    pub const COLLABORATOR_TIMEOUT_SECS: u64 = 5;
}
