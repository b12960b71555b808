//! Status effects and the per-battle status store.
//!
//! Each character holds at most one instance of each [`StatusType`].
//! Re-applying a status merges into the existing instance according to the
//! type's [`StackPolicy`]:
//!
//! - `Additive`: amounts add up and the longer duration wins.
//! - `Refresh`: the larger amount wins and the duration resets to the new one.
//!
//! An instance whose `remaining_turns` is `None` is indefinite and is never
//! expired by the end-of-turn tick.

use crate::battle::{Battle, CharacterId};
use crate::dice::DiceSource;
use crate::immunity::BlockReason;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Status types
// ============================================================================

/// Every status effect the rules know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusType {
    Hastened,
    Empowered,
    Protected,
    Regeneration,
    Unprotected,
    Slowed,
    Weakened,
    Cursed,
    Stunned,
    Confused,
    Frozen,
    Entangled,
    Shielded,
    Exhausted,
    Frenzy,
    Rage,
    Inverted,
    Marked,
    Plagued,
    Burning,
    Silenced,
    Dizzy,
    Foretell,
    Twilight,
    Taunt,
    FireVulnerability,
    Fragile,
}

/// How re-application merges into an existing instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPolicy {
    Additive,
    Refresh,
}

/// Buff/debuff classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
    Neutral,
}

impl StatusType {
    pub const ALL: [StatusType; 27] = [
        StatusType::Hastened,
        StatusType::Empowered,
        StatusType::Protected,
        StatusType::Regeneration,
        StatusType::Unprotected,
        StatusType::Slowed,
        StatusType::Weakened,
        StatusType::Cursed,
        StatusType::Stunned,
        StatusType::Confused,
        StatusType::Frozen,
        StatusType::Entangled,
        StatusType::Shielded,
        StatusType::Exhausted,
        StatusType::Frenzy,
        StatusType::Rage,
        StatusType::Inverted,
        StatusType::Marked,
        StatusType::Plagued,
        StatusType::Burning,
        StatusType::Silenced,
        StatusType::Dizzy,
        StatusType::Foretell,
        StatusType::Twilight,
        StatusType::Taunt,
        StatusType::FireVulnerability,
        StatusType::Fragile,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StatusType::Hastened => "Hastened",
            StatusType::Empowered => "Empowered",
            StatusType::Protected => "Protected",
            StatusType::Regeneration => "Regeneration",
            StatusType::Unprotected => "Unprotected",
            StatusType::Slowed => "Slowed",
            StatusType::Weakened => "Weakened",
            StatusType::Cursed => "Cursed",
            StatusType::Stunned => "Stunned",
            StatusType::Confused => "Confused",
            StatusType::Frozen => "Frozen",
            StatusType::Entangled => "Entangled",
            StatusType::Shielded => "Shielded",
            StatusType::Exhausted => "Exhausted",
            StatusType::Frenzy => "Frenzy",
            StatusType::Rage => "Rage",
            StatusType::Inverted => "Inverted",
            StatusType::Marked => "Marked",
            StatusType::Plagued => "Plagued",
            StatusType::Burning => "Burning",
            StatusType::Silenced => "Silenced",
            StatusType::Dizzy => "Dizzy",
            StatusType::Foretell => "Foretell",
            StatusType::Twilight => "Twilight",
            StatusType::Taunt => "Taunt",
            StatusType::FireVulnerability => "FireVulnerability",
            StatusType::Fragile => "Fragile",
        }
    }

    pub fn stack_policy(&self) -> StackPolicy {
        match self {
            StatusType::Burning
            | StatusType::Foretell
            | StatusType::Shielded
            | StatusType::Plagued
            | StatusType::Regeneration => StackPolicy::Additive,
            _ => StackPolicy::Refresh,
        }
    }

    pub fn polarity(&self) -> Polarity {
        match self {
            StatusType::Hastened
            | StatusType::Empowered
            | StatusType::Protected
            | StatusType::Regeneration
            | StatusType::Shielded
            | StatusType::Frenzy
            | StatusType::Rage => Polarity::Positive,
            StatusType::Unprotected
            | StatusType::Slowed
            | StatusType::Weakened
            | StatusType::Cursed
            | StatusType::Stunned
            | StatusType::Confused
            | StatusType::Frozen
            | StatusType::Entangled
            | StatusType::Exhausted
            | StatusType::Inverted
            | StatusType::Marked
            | StatusType::Plagued
            | StatusType::Burning
            | StatusType::Silenced
            | StatusType::Dizzy
            | StatusType::FireVulnerability
            | StatusType::Fragile => Polarity::Negative,
            StatusType::Foretell | StatusType::Twilight | StatusType::Taunt => Polarity::Neutral,
        }
    }

    pub fn is_positive(&self) -> bool {
        self.polarity() == Polarity::Positive
    }

    pub fn is_negative(&self) -> bool {
        self.polarity() == Polarity::Negative
    }
}

impl fmt::Display for StatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for StatusType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StatusType::ALL
            .iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unknown status type: {s}"))
    }
}

// ============================================================================
// Status store
// ============================================================================

/// An active effect on one character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEffect {
    pub character_id: CharacterId,
    pub effect_type: StatusType,
    /// Stack size; meaning varies by type.
    pub amount: u32,
    /// `None` means indefinite.
    pub remaining_turns: Option<u32>,
}

/// All active status effects in a battle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusStore {
    pub effects: Vec<StatusEffect>,
}

impl StatusStore {
    pub fn for_character(&self, id: CharacterId) -> impl Iterator<Item = &StatusEffect> {
        self.effects.iter().filter(move |e| e.character_id == id)
    }

    pub fn get(&self, id: CharacterId, effect_type: StatusType) -> Option<&StatusEffect> {
        self.effects
            .iter()
            .find(|e| e.character_id == id && e.effect_type == effect_type)
    }

    pub fn has(&self, id: CharacterId, effect_type: StatusType) -> bool {
        self.get(id, effect_type).is_some()
    }

    pub fn amount_of(&self, id: CharacterId, effect_type: StatusType) -> u32 {
        self.get(id, effect_type).map_or(0, |e| e.amount)
    }

    /// Merge a new application into the store. No gates are checked here.
    pub fn stack(
        &mut self,
        id: CharacterId,
        effect_type: StatusType,
        amount: u32,
        remaining_turns: Option<u32>,
    ) -> StatusEffect {
        let existing = self
            .effects
            .iter_mut()
            .find(|e| e.character_id == id && e.effect_type == effect_type);

        match existing {
            Some(effect) => {
                match effect_type.stack_policy() {
                    StackPolicy::Additive => {
                        effect.amount = effect.amount.saturating_add(amount);
                        effect.remaining_turns = match (effect.remaining_turns, remaining_turns) {
                            (Some(a), Some(b)) => Some(a.max(b)),
                            _ => None,
                        };
                    }
                    StackPolicy::Refresh => {
                        effect.amount = effect.amount.max(amount);
                        effect.remaining_turns = remaining_turns;
                    }
                }
                effect.clone()
            }
            None => {
                let effect = StatusEffect {
                    character_id: id,
                    effect_type,
                    amount,
                    remaining_turns,
                };
                self.effects.push(effect.clone());
                effect
            }
        }
    }

    /// Remove every instance of one type. Returns how many were removed.
    pub fn remove_type(&mut self, id: CharacterId, effect_type: StatusType) -> usize {
        let before = self.effects.len();
        self.effects
            .retain(|e| !(e.character_id == id && e.effect_type == effect_type));
        before - self.effects.len()
    }

    /// Remove every effect on a character.
    pub fn remove_all(&mut self, id: CharacterId) -> usize {
        let before = self.effects.len();
        self.effects.retain(|e| e.character_id != id);
        before - self.effects.len()
    }

    /// Reduce a status by a resolved magnitude.
    ///
    /// Returns the remaining amount, or `None` if the character had no such
    /// status. The instance is removed once its amount reaches zero.
    pub fn resolve(
        &mut self,
        id: CharacterId,
        effect_type: StatusType,
        total_value: u32,
    ) -> Option<u32> {
        let index = self
            .effects
            .iter()
            .position(|e| e.character_id == id && e.effect_type == effect_type)?;
        let effect = &mut self.effects[index];
        effect.amount = effect.amount.saturating_sub(total_value);
        let remaining = effect.amount;
        if remaining == 0 {
            self.effects.remove(index);
        }
        Some(remaining)
    }

    /// Count down timed effects on one character and drop expired ones.
    ///
    /// Returns the types that expired.
    pub fn tick_end_of_turn(&mut self, id: CharacterId) -> Vec<StatusType> {
        let mut expired = Vec::new();
        self.effects.retain_mut(|e| {
            if e.character_id != id {
                return true;
            }
            match e.remaining_turns.as_mut() {
                Some(turns) => {
                    *turns = turns.saturating_sub(1);
                    if *turns == 0 {
                        expired.push(e.effect_type);
                        false
                    } else {
                        true
                    }
                }
                None => true,
            }
        });
        expired
    }

    /// Remove every negative effect on a character. Returns what was removed.
    pub fn cleanse_all(&mut self, id: CharacterId) -> Vec<StatusType> {
        let mut removed = Vec::new();
        self.effects.retain(|e| {
            if e.character_id == id && e.effect_type.is_negative() {
                removed.push(e.effect_type);
                false
            } else {
                true
            }
        });
        removed
    }

    /// Positive effects on a character, for buff-copy skills.
    pub fn positive_effects(&self, id: CharacterId) -> Vec<StatusEffect> {
        self.for_character(id)
            .filter(|e| e.effect_type.is_positive())
            .cloned()
            .collect()
    }
}

// ============================================================================
// Gated application
// ============================================================================

/// What happened to an attempted status application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyOutcome {
    Applied(StatusEffect),
    Blocked(BlockReason),
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied(_))
    }
}

impl Battle {
    /// Apply a status through the anti-status and immunity gates.
    ///
    /// The anti-status cleanse runs first; the immunity check (which may draw
    /// a percentile roll) runs only if the cleanse did not block.
    pub fn apply_status(
        &mut self,
        id: CharacterId,
        effect_type: StatusType,
        amount: u32,
        remaining_turns: Option<u32>,
        active_picto_slots: usize,
        dice: &mut dyn DiceSource,
    ) -> ApplyOutcome {
        if self.check_and_cleanse(id, effect_type, active_picto_slots) {
            return ApplyOutcome::Blocked(BlockReason::Cleansed);
        }
        if let Err(reason) = self.immunities.can_apply(id, effect_type, dice) {
            return ApplyOutcome::Blocked(reason);
        }
        ApplyOutcome::Applied(self.statuses.stack(id, effect_type, amount, remaining_turns))
    }
}
