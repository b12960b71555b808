//! Status immunity and anti-status gates.
//!
//! Two independent checks guard every status application. The anti-status
//! cleanse runs first: a player wearing the matching anti-status picto in an
//! active slot has every existing instance of that status deleted and the new
//! application blocked. Otherwise the immunity table decides: an `immune` row
//! always blocks, a `resist` row blocks when a percentile roll lands under its
//! chance.

use crate::battle::{Battle, CharacterId, CharacterKind};
use crate::dice::DiceSource;
use crate::status::StatusType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

lazy_static::lazy_static! {
    /// Anti-status pictos and the status each one protects against.
    pub static ref ANTI_STATUS_PICTOS: HashMap<&'static str, StatusType> = {
        let mut m = HashMap::new();
        m.insert("anti-burn", StatusType::Burning);
        m.insert("anti-freeze", StatusType::Frozen);
        m.insert("anti-stun", StatusType::Stunned);
        m.insert("anti-blight", StatusType::Plagued);
        m.insert("anti-silence", StatusType::Silenced);
        m.insert("anti-curse", StatusType::Cursed);
        m
    };
}

/// The status an anti-status picto protects against, if it is one.
pub fn anti_status_for(picto: &str) -> Option<StatusType> {
    ANTI_STATUS_PICTOS.get(picto).copied()
}

/// Why a status application did not land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockReason {
    /// An `immune` row matched.
    Immune,
    /// A `resist` row matched and the roll came in under the chance.
    Resisted { roll: u32, chance: u32 },
    /// An anti-status picto cleansed and blocked it.
    Cleansed,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Immune => write!(f, "immune"),
            BlockReason::Resisted { roll, chance } => {
                write!(f, "resisted (rolled {roll} under {chance}%)")
            }
            BlockReason::Cleansed => write!(f, "cleansed by anti-status picto"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImmunityType {
    Immune,
    Resist,
}

impl FromStr for ImmunityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immune" => Ok(ImmunityType::Immune),
            "resist" => Ok(ImmunityType::Resist),
            _ => Err(format!("unknown immunity type: {s}")),
        }
    }
}

/// One immunity row for a (character, status type) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusImmunity {
    pub character_id: CharacterId,
    pub status_type: StatusType,
    pub immunity_type: ImmunityType,
    /// 0–100; only read for `Resist` rows.
    pub resist_chance: u32,
}

/// Every immunity row in a battle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusImmunityTable {
    pub rows: Vec<StatusImmunity>,
}

impl StatusImmunityTable {
    pub fn add(
        &mut self,
        character_id: CharacterId,
        status_type: StatusType,
        immunity_type: ImmunityType,
        resist_chance: u32,
    ) {
        self.rows.push(StatusImmunity {
            character_id,
            status_type,
            immunity_type,
            resist_chance: resist_chance.min(100),
        });
    }

    /// Remove every row for a pair. Returns how many were removed.
    pub fn remove(&mut self, character_id: CharacterId, status_type: StatusType) -> usize {
        let before = self.rows.len();
        self.rows
            .retain(|r| !(r.character_id == character_id && r.status_type == status_type));
        before - self.rows.len()
    }

    pub fn remove_character(&mut self, character_id: CharacterId) {
        self.rows.retain(|r| r.character_id != character_id);
    }

    pub fn for_character(&self, character_id: CharacterId) -> impl Iterator<Item = &StatusImmunity> {
        self.rows.iter().filter(move |r| r.character_id == character_id)
    }

    /// Decide whether a status may land.
    ///
    /// Immune rows win over resist rows. A resist row draws exactly one
    /// percentile roll; with several resist rows the highest chance is used.
    pub fn can_apply(
        &self,
        character_id: CharacterId,
        status_type: StatusType,
        dice: &mut dyn DiceSource,
    ) -> Result<(), BlockReason> {
        let matching: Vec<&StatusImmunity> = self
            .for_character(character_id)
            .filter(|r| r.status_type == status_type)
            .collect();

        if matching
            .iter()
            .any(|r| r.immunity_type == ImmunityType::Immune)
        {
            return Err(BlockReason::Immune);
        }

        let chance = matching
            .iter()
            .filter(|r| r.immunity_type == ImmunityType::Resist)
            .map(|r| r.resist_chance)
            .max();

        match chance {
            Some(chance) => {
                let roll = dice.percentile();
                if roll < chance {
                    Err(BlockReason::Resisted { roll, chance })
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }
}

impl Battle {
    /// Run the anti-status cleanse for one incoming status.
    ///
    /// Returns true when the application is blocked. Existing instances of the
    /// protected status are deleted in the same call.
    pub fn check_and_cleanse(
        &mut self,
        character_id: CharacterId,
        status_type: StatusType,
        active_picto_slots: usize,
    ) -> bool {
        let Some(character) = self.character(character_id) else {
            return false;
        };
        if character.kind != CharacterKind::Player {
            return false;
        }

        let protected = character
            .active_pictos(active_picto_slots)
            .any(|p| anti_status_for(p) == Some(status_type));
        if !protected {
            return false;
        }

        let removed = self.statuses.remove_type(character_id, status_type);
        tracing::debug!(
            battle = %self.id,
            character = %character_id,
            status = %status_type,
            removed,
            "anti-status picto blocked application"
        );
        true
    }
}
