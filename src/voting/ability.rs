//! Ability catalog and per-battle ability offerings

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use uuid::Uuid;

use crate::game::types::{sups, Faction};
use crate::voting::ledger::ContributionLedger;

/// What an ability needs from the winner before it can fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbilityTarget {
    /// Winner picks a map location
    Location,
    /// Applies to one war machine of the faction
    WarMachine,
    /// Fires as soon as it is funded
    Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct AbilityTemplate {
    pub identity: String,
    pub label: String,
    pub game_client_ability_id: u8,
    /// Funding target in SUP base units
    pub sups_cost: Decimal,
    pub target: AbilityTarget,
}

impl AbilityTemplate {
    fn new(
        identity: &str,
        label: &str,
        game_client_ability_id: u8,
        cost_in_sups: Decimal,
        target: AbilityTarget,
    ) -> Self {
        Self {
            identity: identity.to_string(),
            label: label.to_string(),
            game_client_ability_id,
            sups_cost: sups(cost_in_sups),
            target,
        }
    }
}

/// War machine an offering is bound to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MechTarget {
    pub hash: String,
    pub name: String,
}

/// One fundable ability in a session round
#[derive(Debug)]
pub struct GameAbility {
    pub offering_id: Uuid,
    pub template: AbilityTemplate,
    pub faction: Faction,
    pub mech: Option<MechTarget>,
    pub ledger: ContributionLedger,
}

impl GameAbility {
    pub fn new(template: AbilityTemplate, faction: Faction, mech: Option<MechTarget>) -> Self {
        let ledger = ContributionLedger::new(template.sups_cost);
        Self {
            offering_id: Uuid::new_v4(),
            template,
            faction,
            mech,
            ledger,
        }
    }

    /// Key players use to address this offering
    pub fn identity(&self) -> String {
        match &self.mech {
            Some(mech) => format!("{}:{}", self.template.identity, mech.hash),
            None => self.template.identity.clone(),
        }
    }

    pub fn needs_location(&self) -> bool {
        self.template.target == AbilityTarget::Location
    }
}

/// Abilities available to battles
#[derive(Debug, Clone)]
pub struct AbilityCatalog {
    battle: Vec<AbilityTemplate>,
    faction: BTreeMap<Faction, Vec<AbilityTemplate>>,
}

impl AbilityCatalog {
    pub fn new(battle: Vec<AbilityTemplate>, faction: BTreeMap<Faction, Vec<AbilityTemplate>>) -> Self {
        Self { battle, faction }
    }

    /// Stock abilities shipped with the simulation client
    pub fn standard() -> Self {
        use AbilityTarget::*;

        let battle = vec![
            AbilityTemplate::new("AIRSTRIKE", "Airstrike", 0, dec!(100), Location),
            AbilityTemplate::new("NUKE", "Nuke", 1, dec!(150), Location),
            AbilityTemplate::new("ROBOT_DOGS", "Robot Dogs", 3, dec!(80), Location),
            AbilityTemplate::new("EMP", "EMP", 4, dec!(60), Instant),
        ];

        let mut faction = BTreeMap::new();
        for f in Faction::ALL {
            let signature = match f {
                Faction::Zaibatsu => AbilityTemplate::new("OVERCHARGE", "Overcharge", 5, dec!(40), WarMachine),
                Faction::RedMountain => AbilityTemplate::new("REINFORCEMENTS", "Reinforcements", 6, dec!(120), Location),
                Faction::BostonCybernetics => AbilityTemplate::new("SHIELD_OVERDRIVE", "Shield Overdrive", 7, dec!(40), WarMachine),
            };
            faction.insert(
                f,
                vec![
                    AbilityTemplate::new("REPAIR", "Repair", 2, dec!(30), WarMachine),
                    signature,
                ],
            );
        }

        Self { battle, faction }
    }

    pub fn battle_abilities(&self) -> &[AbilityTemplate] {
        &self.battle
    }

    pub fn faction_abilities(&self, faction: Faction) -> &[AbilityTemplate] {
        self.faction.get(&faction).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Pick the next shared battle ability
    pub fn random_battle_ability<R: Rng>(&self, rng: &mut R) -> Option<&AbilityTemplate> {
        self.battle.choose(rng)
    }
}

impl Default for AbilityCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
