//! Error types for battle operations.
//!
//! Validation failures are detected before any state is touched and are
//! reported back to the player as inline rejections. Storage failures are
//! fatal to the operation and never leave partial writes behind.

use crate::battle::{BattleId, CharacterId};
use crate::dice::DiceError;
use crate::skills::SkillId;
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A resource a skill can cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resource {
    MagicPoints,
    GradientCharges,
    Stains,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::MagicPoints => write!(f, "MP"),
            Resource::GradientCharges => write!(f, "gradient charges"),
            Resource::Stains => write!(f, "stains"),
        }
    }
}

/// Errors from battle operations.
#[derive(Debug, Error)]
pub enum BattleError {
    #[error("Not enough {resource}: requires {required}, has {available}")]
    InsufficientResource {
        resource: Resource,
        required: u32,
        available: u32,
    },

    #[error("Character {character_id} does not know skill {skill}")]
    NotOwned {
        character_id: CharacterId,
        skill: SkillId,
    },

    #[error("Invalid target {character_id}: {reason}")]
    InvalidTarget {
        character_id: CharacterId,
        reason: String,
    },

    #[error("Character not found: {0}")]
    CharacterNotFound(CharacterId),

    #[error("Skill not found: {0}")]
    SkillNotFound(SkillId),

    #[error("Battle not found: {0}")]
    BattleNotFound(BattleId),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Dice error: {0}")]
    Dice(#[from] DiceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl BattleError {
    pub fn invalid_target(character_id: CharacterId, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            character_id,
            reason: reason.into(),
        }
    }

    /// Whether this failure is a user-facing rejection that happened before
    /// any state was touched.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, BattleError::Storage(_))
    }
}
