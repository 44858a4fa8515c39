use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::game::constants::{battle, net, queue, vote};
use crate::game::types::{sups, PlayerId};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the simulation socket binds to
    pub bind_address: IpAddr,
    /// Port of the first arena; further arenas use consecutive ports
    pub arena_port: u16,
    /// Number of arenas (one simulation process each)
    pub arena_count: usize,
    /// Port for the metrics HTTP endpoint
    pub metrics_port: u16,
    pub queue: QueueConfig,
    pub vote: VoteTimings,
    /// Wait between `BATTLE:END` and the next battle init
    pub battle_end_cooldown: Duration,
    /// Bound on a single socket write
    pub write_timeout: Duration,
    /// Bound on a location check round trip
    pub location_check_timeout: Duration,
    /// Bound on payments and store calls
    pub collaborator_timeout: Duration,
    /// `BATTLE:START` from older simulation builds is rejected; 0 disables
    pub game_client_min_build: u64,
    /// Players whose mechs are piloted by the server
    pub ai_player_ids: HashSet<PlayerId>,
}

/// Battle queue tuning
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub faction_mech_limit: usize,
    pub tick_interval: Duration,
    /// `logMultiplier` in the fee formula
    pub fee_log_multiplier: f64,
    /// Added to the queue length before pricing
    pub fee_addage: u64,
    pub average_battle: Duration,
}

/// Ability bribing phase lengths and target price movement
#[derive(Debug, Clone)]
pub struct VoteTimings {
    pub intro_per_mech: Duration,
    pub intro_base: Duration,
    pub cooldown: Duration,
    pub ability_right: Duration,
    pub location_select: Duration,
    pub bucket_capacity: u32,
    pub bucket_window: Duration,
    pub price_tick: Duration,
    /// Per-tick target multiplier; 1 keeps prices fixed
    pub battle_price_drop_rate: Decimal,
    pub faction_price_drop_rate: Decimal,
    /// Targets never decay below this
    pub price_floor: Decimal,
}

impl VoteTimings {
    /// Intro animation budget for a roster of `mech_count`
    pub fn intro_duration(&self, mech_count: usize) -> Duration {
        self.intro_per_mech * mech_count as u32 + self.intro_base
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            faction_mech_limit: queue::FACTION_MECH_LIMIT,
            tick_interval: Duration::from_secs(queue::TICK_INTERVAL_SECS),
            fee_log_multiplier: queue::FEE_LOG_MULTIPLIER,
            fee_addage: 0,
            average_battle: Duration::from_secs(queue::AVERAGE_BATTLE_SECS),
        }
    }
}

impl Default for VoteTimings {
    fn default() -> Self {
        Self {
            intro_per_mech: Duration::from_secs(battle::INTRO_SECS_PER_MECH),
            intro_base: Duration::from_secs(battle::INTRO_BASE_SECS),
            cooldown: Duration::from_secs(vote::COOLDOWN_SECS),
            ability_right: Duration::from_secs(vote::ABILITY_RIGHT_SECS),
            location_select: Duration::from_secs(vote::LOCATION_SELECT_SECS),
            bucket_capacity: vote::BUCKET_CAPACITY,
            bucket_window: Duration::from_secs(vote::BUCKET_WINDOW_SECS),
            price_tick: Duration::from_secs(vote::PRICE_TICK_SECS),
            battle_price_drop_rate: vote::BATTLE_PRICE_DROP_RATE,
            faction_price_drop_rate: vote::FACTION_PRICE_DROP_RATE,
            price_floor: sups(Decimal::ONE),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            arena_port: 8083,
            arena_count: 1,
            metrics_port: 9090,
            queue: QueueConfig::default(),
            vote: VoteTimings::default(),
            battle_end_cooldown: Duration::from_secs(battle::END_COOLDOWN_SECS),
            write_timeout: Duration::from_secs(net::WRITE_TIMEOUT_SECS),
            location_check_timeout: Duration::from_millis(net::LOCATION_CHECK_TIMEOUT_MS),
            collaborator_timeout: Duration::from_secs(net::COLLABORATOR_TIMEOUT_SECS),
            game_client_min_build: 0,
            ai_player_ids: HashSet::new(),
        }
    }
}

/// Parse an env var, keeping `current` when unset or invalid
fn env_or<T: FromStr>(key: &str, current: T, valid: impl Fn(&T) -> bool) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(parsed) if valid(&parsed) => parsed,
            Ok(_) => {
                tracing::warn!("{} '{}' out of range, using default", key, raw);
                current
            }
            Err(_) => {
                tracing::warn!("Invalid {} '{}', using default", key, raw);
                current
            }
        },
        Err(_) => current,
    }
}

/// Comma separated UUIDs; bad entries are skipped with a warning
fn parse_player_ids(raw: &str) -> HashSet<PlayerId> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<PlayerId>() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!("Ignoring invalid AI player id '{}'", s);
                None
            }
        })
        .collect()
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        config.bind_address = env_or("BIND_ADDRESS", config.bind_address, |_| true);
        config.arena_port = env_or("ARENA_PORT", config.arena_port, |p| *p > 0);
        config.arena_count = env_or("ARENA_COUNT", config.arena_count, |n| (1..=64).contains(n));
        config.metrics_port = env_or("METRICS_PORT", config.metrics_port, |p| *p > 0);

        config.queue.faction_mech_limit = env_or(
            "FACTION_MECH_LIMIT",
            config.queue.faction_mech_limit,
            |n| (1..=50).contains(n),
        );
        config.queue.tick_interval = Duration::from_secs(env_or(
            "QUEUE_TICK_INTERVAL_SECS",
            config.queue.tick_interval.as_secs(),
            |s| *s > 0,
        ));
        config.queue.fee_log_multiplier = env_or(
            "QUEUE_FEE_LOG_MULTIPLIER",
            config.queue.fee_log_multiplier,
            |m| m.is_finite() && *m > 0.0,
        );
        config.queue.fee_addage = env_or("QUEUE_FEE_ADDAGE", config.queue.fee_addage, |_| true);
        config.queue.average_battle = Duration::from_secs(env_or(
            "AVERAGE_BATTLE_SECS",
            config.queue.average_battle.as_secs(),
            |s| *s > 0,
        ));

        let drop_rate = |r: &Decimal| *r > Decimal::ZERO && *r <= Decimal::ONE;
        config.vote.battle_price_drop_rate = env_or(
            "BATTLE_ABILITY_PRICE_DROP_RATE",
            config.vote.battle_price_drop_rate,
            drop_rate,
        );
        config.vote.faction_price_drop_rate = env_or(
            "FACTION_ABILITY_PRICE_DROP_RATE",
            config.vote.faction_price_drop_rate,
            drop_rate,
        );

        config.battle_end_cooldown = Duration::from_secs(env_or(
            "BATTLE_END_COOLDOWN_SECS",
            config.battle_end_cooldown.as_secs(),
            |_| true,
        ));
        config.write_timeout = Duration::from_secs(env_or(
            "WRITE_TIMEOUT_SECS",
            config.write_timeout.as_secs(),
            |s| *s > 0,
        ));
        config.location_check_timeout = Duration::from_millis(env_or(
            "LOCATION_CHECK_TIMEOUT_MS",
            config.location_check_timeout.as_millis() as u64,
            |ms| *ms > 0,
        ));
        config.collaborator_timeout = Duration::from_secs(env_or(
            "COLLABORATOR_TIMEOUT_SECS",
            config.collaborator_timeout.as_secs(),
            |s| *s > 0,
        ));
        config.game_client_min_build =
            env_or("GAME_CLIENT_MIN_BUILD", config.game_client_min_build, |_| true);
        if let Ok(raw) = std::env::var("AI_PLAYER_IDS") {
            config.ai_player_ids = parse_player_ids(&raw);
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.arena_port == 0 {
            return Err("arena_port cannot be 0".to_string());
        }
        if self.arena_count == 0 {
            return Err("arena_count must be at least 1".to_string());
        }
        if (self.arena_port as usize) + self.arena_count - 1 > u16::MAX as usize {
            return Err("arena ports overflow the port range".to_string());
        }
        if self.queue.faction_mech_limit == 0 {
            return Err("faction_mech_limit must be at least 1".to_string());
        }
        if self.queue.fee_log_multiplier.is_nan() || self.queue.fee_log_multiplier <= 0.0 {
            return Err("fee_log_multiplier must be positive".to_string());
        }
        if self.vote.bucket_capacity == 0 {
            return Err("bucket_capacity must be at least 1".to_string());
        }
        for rate in [self.vote.battle_price_drop_rate, self.vote.faction_price_drop_rate] {
            if rate <= Decimal::ZERO || rate > Decimal::ONE {
                return Err(format!("price drop rate {} must be in (0, 1]", rate));
            }
        }
        if self.vote.price_floor <= Decimal::ZERO {
            return Err("price_floor must be positive".to_string());
        }
        Ok(())
    }
}
