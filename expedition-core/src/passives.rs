//! Passive trigger tracker and the picto passive table.
//!
//! Triggered picto passives are rate-limited per (character, passive) by a
//! tracker row. The current turn number is the battle's `round` counter.

use crate::battle::{Battle, CharacterId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// How often a passive may fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerScope {
    OncePerBattle,
    OncePerTurn,
    /// Unlimited; the row only counts activations.
    Counter,
}

impl fmt::Display for TriggerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerScope::OncePerBattle => write!(f, "once-per-battle"),
            TriggerScope::OncePerTurn => write!(f, "once-per-turn"),
            TriggerScope::Counter => write!(f, "counter"),
        }
    }
}

impl FromStr for TriggerScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once-per-battle" => Ok(TriggerScope::OncePerBattle),
            "once-per-turn" => Ok(TriggerScope::OncePerTurn),
            "counter" => Ok(TriggerScope::Counter),
            _ => Err(format!("unknown trigger scope: {s}")),
        }
    }
}

/// One tracker row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PictoEffectTracker {
    pub character_id: CharacterId,
    pub passive_name: String,
    pub scope: TriggerScope,
    pub times_triggered: u32,
    pub last_turn_triggered: Option<u32>,
    pub reset_on_turn_end: bool,
}

/// Tracker rows for every character in a battle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassiveTracker {
    pub rows: Vec<PictoEffectTracker>,
}

impl PassiveTracker {
    pub fn get(&self, character_id: CharacterId, passive_name: &str) -> Option<&PictoEffectTracker> {
        self.rows
            .iter()
            .find(|r| r.character_id == character_id && r.passive_name == passive_name)
    }

    /// Whether a passive may fire during turn `current_turn`.
    pub fn can_activate(
        &self,
        character_id: CharacterId,
        passive_name: &str,
        scope: TriggerScope,
        current_turn: u32,
    ) -> bool {
        let Some(row) = self.get(character_id, passive_name) else {
            return true;
        };
        match scope {
            TriggerScope::OncePerBattle => row.times_triggered == 0,
            TriggerScope::OncePerTurn => row.last_turn_triggered != Some(current_turn),
            TriggerScope::Counter => true,
        }
    }

    /// Record an activation. Returns the updated trigger count.
    pub fn track(
        &mut self,
        character_id: CharacterId,
        passive_name: &str,
        scope: TriggerScope,
        current_turn: u32,
    ) -> u32 {
        let reset_on_turn_end = scope == TriggerScope::OncePerTurn;
        match self
            .rows
            .iter_mut()
            .find(|r| r.character_id == character_id && r.passive_name == passive_name)
        {
            Some(row) => {
                row.times_triggered += 1;
                row.last_turn_triggered = Some(current_turn);
                row.scope = scope;
                row.reset_on_turn_end = reset_on_turn_end;
                row.times_triggered
            }
            None => {
                self.rows.push(PictoEffectTracker {
                    character_id,
                    passive_name: passive_name.to_string(),
                    scope,
                    times_triggered: 1,
                    last_turn_triggered: Some(current_turn),
                    reset_on_turn_end,
                });
                1
            }
        }
    }

    /// Drop rows flagged for end-of-turn reset, for one character or all.
    pub fn reset_turn_scoped(&mut self, character_id: Option<CharacterId>) -> usize {
        let before = self.rows.len();
        self.rows.retain(|r| {
            !(r.reset_on_turn_end && character_id.map_or(true, |id| r.character_id == id))
        });
        before - self.rows.len()
    }

    pub fn remove_character(&mut self, character_id: CharacterId) {
        self.rows.retain(|r| r.character_id != character_id);
    }
}

// ============================================================================
// Picto passives
// ============================================================================

/// The moment a picto passive is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassiveTrigger {
    /// After the holder lands a damaging hit.
    OnHit,
    /// When the holder's roll has at least one critical.
    OnCritical,
    /// When the holder would drop to zero HP.
    OnLethalDamage,
    /// The holder's first basic attack of the battle.
    FirstHit,
    /// Always-on rule read by the resolver; never tracked.
    Static,
}

/// A triggered passive granted by an equipped picto.
#[derive(Debug, Clone, Copy)]
pub struct PictoPassive {
    pub name: &'static str,
    pub trigger: PassiveTrigger,
    pub scope: TriggerScope,
}

pub const BURNING_SHOTS: &str = "burning-shots";
pub const ENERGISING_CRITS: &str = "energising-crits";
pub const SECOND_CHANCE: &str = "second-chance";
pub const FIRST_STRIKE: &str = "first-strike";
pub const CRITICAL_BURN: &str = "critical-burn";

lazy_static::lazy_static! {
    pub static ref PICTO_PASSIVES: HashMap<&'static str, PictoPassive> = {
        let passives = [
            (BURNING_SHOTS, PassiveTrigger::OnHit, TriggerScope::OncePerTurn),
            (ENERGISING_CRITS, PassiveTrigger::OnCritical, TriggerScope::Counter),
            (SECOND_CHANCE, PassiveTrigger::OnLethalDamage, TriggerScope::OncePerBattle),
            (FIRST_STRIKE, PassiveTrigger::FirstHit, TriggerScope::OncePerBattle),
            (CRITICAL_BURN, PassiveTrigger::Static, TriggerScope::Counter),
        ];
        let mut m = HashMap::new();
        for (name, trigger, scope) in passives {
            m.insert(name, PictoPassive { name, trigger, scope });
        }
        m
    };
}

pub fn picto_passive(name: &str) -> Option<&'static PictoPassive> {
    PICTO_PASSIVES.get(name)
}

impl Battle {
    /// Whether a character has the picto equipped and its tracker allows it.
    pub fn passive_ready(
        &self,
        character_id: CharacterId,
        passive_name: &str,
        active_picto_slots: usize,
    ) -> bool {
        let Some(passive) = picto_passive(passive_name) else {
            return false;
        };
        let equipped = self
            .character(character_id)
            .is_some_and(|c| c.has_active_picto(passive_name, active_picto_slots));
        equipped
            && (passive.trigger == PassiveTrigger::Static
                || self
                    .trackers
                    .can_activate(character_id, passive_name, passive.scope, self.round))
    }

    /// Record that a passive fired this round.
    pub fn track_passive(&mut self, character_id: CharacterId, passive_name: &str) -> u32 {
        let scope = picto_passive(passive_name).map_or(TriggerScope::Counter, |p| p.scope);
        let round = self.round;
        let count = self.trackers.track(character_id, passive_name, scope, round);
        tracing::debug!(
            battle = %self.id,
            character = %character_id,
            passive = passive_name,
            count,
            "passive triggered"
        );
        count
    }
}
