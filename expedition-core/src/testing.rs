//! Testing utilities for the battle engine.
//!
//! This module provides tools for deterministic tests:
//! - `ScriptedDice` for replaying exact die faces and resist rolls
//! - `BattleHarness` for scripted battle scenarios
//! - Assertion helpers for verifying battle state

use crate::battle::{Battle, BattleCharacter, BattleId, CharacterId};
use crate::config::EngineConfig;
use crate::dice::{DieFace, DiceSource, RollGroup};
use crate::error::BattleError;
use crate::modifiers::AttackCategory;
use crate::resistance::Element;
use crate::rules::{AttackOutcome, RulesEngine, SkillOutcome, UseSkill};
use crate::skills::{EffectSpec, SkillBook, SkillCost, SkillDefinition, TargetScope};
use crate::status::StatusType;
use std::collections::VecDeque;

/// Face returned once the scripted faces run out.
pub const FALLBACK_FACE: u32 = 3;

/// Percentile returned once the scripted percentiles run out; never resists.
pub const FALLBACK_PERCENTILE: u32 = 99;

/// A dice source that returns scripted values in order.
///
/// Faces are clamped to 1..=6. When a queue is exhausted the source falls
/// back to [`FALLBACK_FACE`], [`FALLBACK_PERCENTILE`] and index 0.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDice {
    rolls: VecDeque<Vec<RollGroup>>,
    faces: VecDeque<u32>,
    percentiles: VecDeque<u32>,
    picks: VecDeque<usize>,
}

impl ScriptedDice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue single faces, consumed one per die.
    pub fn with_faces(mut self, faces: &[u32]) -> Self {
        self.faces.extend(faces.iter().map(|f| (*f).clamp(1, 6)));
        self
    }

    /// Queue a complete roll, returned whole by the next `roll` call.
    ///
    /// Takes priority over queued faces.
    pub fn with_roll(mut self, groups: &[&[u32]]) -> Self {
        let groups = groups
            .iter()
            .map(|values| RollGroup {
                rolls: values
                    .iter()
                    .map(|v| DieFace {
                        value: (*v).clamp(1, 6),
                    })
                    .collect(),
            })
            .collect();
        self.rolls.push_back(groups);
        self
    }

    pub fn with_percentiles(mut self, values: &[u32]) -> Self {
        self.percentiles.extend(values.iter().map(|v| (*v).min(99)));
        self
    }

    pub fn with_picks(mut self, picks: &[usize]) -> Self {
        self.picks.extend(picks.iter().copied());
        self
    }

    /// Whether every scripted value has been used.
    pub fn is_exhausted(&self) -> bool {
        self.rolls.is_empty()
            && self.faces.is_empty()
            && self.percentiles.is_empty()
            && self.picks.is_empty()
    }
}

impl DiceSource for ScriptedDice {
    fn roll(&mut self, die_count: u32) -> Vec<RollGroup> {
        if let Some(groups) = self.rolls.pop_front() {
            return groups;
        }
        let rolls = (0..die_count)
            .map(|_| DieFace {
                value: self.faces.pop_front().unwrap_or(FALLBACK_FACE),
            })
            .collect();
        vec![RollGroup { rolls }]
    }

    fn percentile(&mut self) -> u32 {
        self.percentiles.pop_front().unwrap_or(FALLBACK_PERCENTILE)
    }

    fn pick(&mut self, len: usize) -> usize {
        self.picks
            .pop_front()
            .map(|p| p % len.max(1))
            .unwrap_or(0)
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// A player character with a modest MP pool.
pub fn sample_player(name: &str) -> BattleCharacter {
    BattleCharacter::player(name, 120)
        .with_magic_points(10, 10)
        .with_gradient_points(0)
        .with_weapon_power(40)
        .with_hability(5)
}

/// An enemy NPC.
pub fn sample_enemy(name: &str, health_points: u32) -> BattleCharacter {
    BattleCharacter::npc(name, health_points)
        .with_weapon_power(20)
        .with_hability(2)
}

/// A small skill book covering the common skill shapes.
///
/// - `strike`: free, 20 power, physical
/// - `fireball`: 3 MP, fire, `2d6` dice, applies 2 Burning for 3 turns
/// - `mend`: 2 MP, ally, applies Regeneration
/// - `guard`: free, self, applies Shielded
pub fn sample_skill_book() -> SkillBook {
    let mut book = SkillBook::new();
    let skills = [
        SkillDefinition::new("strike", "Strike").with_power(20),
        SkillDefinition::new("fireball", "Fireball")
            .with_cost(SkillCost::Mp(3))
            .with_element(Element::Fire)
            .with_dice("2d6")
            .with_power(10)
            .with_effect(EffectSpec::on_target(StatusType::Burning, 2, Some(3))),
        SkillDefinition::new("mend", "Mend")
            .with_cost(SkillCost::Mp(2))
            .with_target(TargetScope::Ally)
            .with_effect(EffectSpec::on_target(StatusType::Regeneration, 1, Some(3))),
        SkillDefinition::new("guard", "Guard")
            .with_target(TargetScope::SelfOnly)
            .with_effect(EffectSpec::on_actor(StatusType::Shielded, 1, None)),
    ];
    for skill in skills {
        book.insert(skill).expect("sample skills carry valid dice notation");
    }
    book
}

// ============================================================================
// Harness
// ============================================================================

/// Test harness for running battle scenarios without the async store.
pub struct BattleHarness {
    pub battle: Battle,
    pub config: EngineConfig,
    pub book: SkillBook,
    pub dice: ScriptedDice,
}

impl Default for BattleHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl BattleHarness {
    /// An empty battle with the sample skill book.
    pub fn new() -> Self {
        Self::with_book(sample_skill_book())
    }

    pub fn with_book(book: SkillBook) -> Self {
        Self {
            battle: Battle::new(BattleId(1), "Harness"),
            config: EngineConfig::default(),
            book,
            dice: ScriptedDice::new(),
        }
    }

    /// Add a character knowing every skill in the book.
    pub fn add(&mut self, character: BattleCharacter) -> CharacterId {
        let mut character = character;
        for skill in self.book.iter() {
            if !character.skills.contains(&skill.id) {
                character.skills.push(skill.id.clone());
            }
        }
        self.battle.add_character(character)
    }

    /// Replace the scripted dice.
    pub fn script(&mut self, dice: ScriptedDice) -> &mut Self {
        self.dice = dice;
        self
    }

    pub fn use_skill(
        &mut self,
        actor: CharacterId,
        skill: &str,
        target: CharacterId,
    ) -> Result<SkillOutcome, BattleError> {
        let engine = RulesEngine::new(&self.config, &self.book);
        let request = UseSkill::new(actor, skill).on(target);
        engine.use_skill(&mut self.battle, &mut self.dice, &request)
    }

    pub fn attack(
        &mut self,
        actor: CharacterId,
        target: CharacterId,
    ) -> Result<AttackOutcome, BattleError> {
        let engine = RulesEngine::new(&self.config, &self.book);
        engine.basic_attack(
            &mut self.battle,
            &mut self.dice,
            actor,
            target,
            AttackCategory::Basic,
        )
    }

    pub fn hp(&self, id: CharacterId) -> u32 {
        self.battle
            .character(id)
            .map(|c| c.health_points)
            .unwrap_or(0)
    }

    pub fn mp(&self, id: CharacterId) -> Option<u32> {
        self.battle.character(id).and_then(|c| c.magic_points)
    }

    pub fn has_status(&self, id: CharacterId, status: StatusType) -> bool {
        self.battle.statuses.has(id, status)
    }
}

// ============================================================================
// Assertions
// ============================================================================

/// Assert a character's current HP.
pub fn assert_hp(battle: &Battle, id: CharacterId, expected: u32) {
    let actual = battle.character(id).map(|c| c.health_points);
    assert_eq!(
        actual,
        Some(expected),
        "Expected character {id} to have {expected} HP, got {actual:?}"
    );
}

/// Assert a character carries a status.
pub fn assert_has_status(battle: &Battle, id: CharacterId, status: StatusType) {
    assert!(
        battle.statuses.has(id, status),
        "Expected character {id} to have {status}"
    );
}

/// Assert a character does not carry a status.
pub fn assert_no_status(battle: &Battle, id: CharacterId, status: StatusType) {
    assert!(
        !battle.statuses.has(id, status),
        "Expected character {id} not to have {status}"
    );
}

/// Assert a character is defeated and its per-battle rows are cleared.
pub fn assert_defeated(battle: &Battle, id: CharacterId) {
    assert_hp(battle, id, 0);
    assert_eq!(
        battle.statuses.for_character(id).count(),
        0,
        "Defeated character {id} still has statuses"
    );
    assert!(
        !battle.turns.contains(id),
        "Defeated character {id} is still in the turn queue"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::SkillId;

    #[test]
    fn test_scripted_faces_then_fallback() {
        let mut dice = ScriptedDice::new().with_faces(&[6, 9]);
        let groups = dice.roll(3);
        let faces: Vec<u32> = groups[0].rolls.iter().map(|f| f.value).collect();
        assert_eq!(faces, vec![6, 6, FALLBACK_FACE]);
        assert!(dice.is_exhausted());
    }

    #[test]
    fn test_scripted_roll_groups() {
        let mut dice = ScriptedDice::new().with_roll(&[&[6, 5], &[1]]);
        let groups = dice.roll(1);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].rolls[0].value, 1);
    }

    #[test]
    fn test_percentiles_and_picks() {
        let mut dice = ScriptedDice::new()
            .with_percentiles(&[10])
            .with_picks(&[5]);
        assert_eq!(dice.percentile(), 10);
        assert_eq!(dice.percentile(), FALLBACK_PERCENTILE);
        assert_eq!(dice.pick(3), 2);
        assert_eq!(dice.pick(3), 0);
    }

    #[test]
    fn test_sample_skill_book_is_complete() {
        let book = sample_skill_book();
        for id in ["strike", "fireball", "mend", "guard"] {
            assert!(book.get(&SkillId::from(id)).is_some(), "missing {id}");
        }
    }

    #[test]
    fn test_harness_strike() {
        let mut harness = BattleHarness::new();
        let hero = harness.add(sample_player("Maelle"));
        let foe = harness.add(sample_enemy("Nevron", 50));

        let outcome = harness.use_skill(hero, "strike", foe).unwrap();

        assert_eq!(outcome.total_damage(), 20);
        assert_hp(&harness.battle, foe, 30);
    }

    #[test]
    fn test_harness_fireball_burns() {
        let mut harness = BattleHarness::new();
        let hero = harness.add(sample_player("Lune"));
        let foe = harness.add(sample_enemy("Nevron", 100));
        harness.script(ScriptedDice::new().with_faces(&[4, 3]));

        harness.use_skill(hero, "fireball", foe).unwrap();

        assert_eq!(harness.mp(hero), Some(7));
        assert_has_status(&harness.battle, foe, StatusType::Burning);
    }
}
