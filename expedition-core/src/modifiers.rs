//! Damage modifier pipeline.
//!
//! Standing modifiers on a character adjust the damage it deals. A modifier
//! is scoped to an attack category and optionally gated by a condition. For
//! one hit the pipeline:
//!
//! 1. takes every active modifier on the attacker (none: damage unchanged),
//! 2. keeps those whose type matches the attack category,
//! 3. keeps those whose condition holds right now,
//! 4. multiplies all surviving multipliers into the base damage, then adds
//!    all surviving flat bonuses once,
//! 5. rounds to the nearest integer and clamps at zero.
//!
//! Flat bonuses are added after every multiplier so they are never amplified.

use crate::battle::{Battle, CharacterId};
use crate::config::EngineConfig;
use crate::status::StatusType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which attacks a modifier applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModifierType {
    All,
    BaseAttack,
    Counter,
    FreeAim,
    Skill,
    FirstHit,
    /// Only matches when the hit's context carries this tag.
    Custom(String),
}

impl FromStr for ModifierType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "all" => ModifierType::All,
            "base-attack" => ModifierType::BaseAttack,
            "counter" => ModifierType::Counter,
            "free-aim" => ModifierType::FreeAim,
            "skill" => ModifierType::Skill,
            "first-hit" => ModifierType::FirstHit,
            "" => return Err("empty modifier type".to_string()),
            other => ModifierType::Custom(other.to_string()),
        })
    }
}

impl fmt::Display for ModifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModifierType::All => write!(f, "all"),
            ModifierType::BaseAttack => write!(f, "base-attack"),
            ModifierType::Counter => write!(f, "counter"),
            ModifierType::FreeAim => write!(f, "free-aim"),
            ModifierType::Skill => write!(f, "skill"),
            ModifierType::FirstHit => write!(f, "first-hit"),
            ModifierType::Custom(tag) => write!(f, "{tag}"),
        }
    }
}

/// The kind of attack being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttackCategory {
    Basic,
    Counter,
    FreeShot,
    Skill,
}

/// Gate on a modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModifierCondition {
    Solo,
    FullHp,
    LowHp,
    EnemyBurning,
    EnemyMarked,
    EnemyFragile,
    HasCharges,
    MaxCharges,
    TwilightActive,
}

impl FromStr for ModifierCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "solo" => Ok(ModifierCondition::Solo),
            "full-hp" => Ok(ModifierCondition::FullHp),
            "low-hp" => Ok(ModifierCondition::LowHp),
            "enemy-burning" => Ok(ModifierCondition::EnemyBurning),
            "enemy-marked" => Ok(ModifierCondition::EnemyMarked),
            "enemy-fragile" => Ok(ModifierCondition::EnemyFragile),
            "has-charges" => Ok(ModifierCondition::HasCharges),
            "max-charges" => Ok(ModifierCondition::MaxCharges),
            "twilight-active" => Ok(ModifierCondition::TwilightActive),
            _ => Err(format!("unknown modifier condition: {s}")),
        }
    }
}

/// Identifier for a modifier row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModifierId(pub u64);

/// A standing damage adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageModifier {
    pub id: ModifierId,
    pub character_id: CharacterId,
    pub modifier_type: ModifierType,
    pub multiplier: f64,
    pub flat_bonus: i32,
    pub condition: Option<ModifierCondition>,
    pub is_active: bool,
}

/// The shape of a modifier before it is attached to a character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifierSpec {
    pub modifier_type: ModifierType,
    pub multiplier: f64,
    pub flat_bonus: i32,
    pub condition: Option<ModifierCondition>,
}

impl ModifierSpec {
    pub fn multiplier(modifier_type: ModifierType, multiplier: f64) -> Self {
        Self {
            modifier_type,
            multiplier,
            flat_bonus: 0,
            condition: None,
        }
    }

    pub fn flat(modifier_type: ModifierType, flat_bonus: i32) -> Self {
        Self {
            modifier_type,
            multiplier: 1.0,
            flat_bonus,
            condition: None,
        }
    }

    pub fn when(mut self, condition: ModifierCondition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Everything about the hit the pipeline cannot read off the attacker.
#[derive(Debug, Clone, Default)]
pub struct DamageContext {
    pub target: Option<CharacterId>,
    pub is_first_hit: bool,
    pub tags: Vec<String>,
}

impl DamageContext {
    pub fn against(target: CharacterId) -> Self {
        Self {
            target: Some(target),
            ..Self::default()
        }
    }

    pub fn first_hit(mut self, is_first_hit: bool) -> Self {
        self.is_first_hit = is_first_hit;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Every damage modifier in a battle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModifierStore {
    pub modifiers: Vec<DamageModifier>,
    next_id: u64,
}

impl ModifierStore {
    pub fn add(&mut self, character_id: CharacterId, spec: ModifierSpec) -> ModifierId {
        self.next_id += 1;
        let id = ModifierId(self.next_id);
        self.modifiers.push(DamageModifier {
            id,
            character_id,
            modifier_type: spec.modifier_type,
            multiplier: spec.multiplier,
            flat_bonus: spec.flat_bonus,
            condition: spec.condition,
            is_active: true,
        });
        id
    }

    pub fn remove(&mut self, id: ModifierId) -> bool {
        let before = self.modifiers.len();
        self.modifiers.retain(|m| m.id != id);
        before != self.modifiers.len()
    }

    /// Remove every modifier of one type from a character.
    pub fn remove_by_type(&mut self, character_id: CharacterId, modifier_type: &ModifierType) -> usize {
        let before = self.modifiers.len();
        self.modifiers
            .retain(|m| !(m.character_id == character_id && &m.modifier_type == modifier_type));
        before - self.modifiers.len()
    }

    pub fn set_active(&mut self, id: ModifierId, active: bool) -> bool {
        match self.modifiers.iter_mut().find(|m| m.id == id) {
            Some(m) => {
                m.is_active = active;
                true
            }
            None => false,
        }
    }

    pub fn remove_character(&mut self, character_id: CharacterId) {
        self.modifiers.retain(|m| m.character_id != character_id);
    }

    pub fn active_for(&self, character_id: CharacterId) -> impl Iterator<Item = &DamageModifier> {
        self.modifiers
            .iter()
            .filter(move |m| m.character_id == character_id && m.is_active)
    }
}

fn matches_category(
    modifier_type: &ModifierType,
    category: AttackCategory,
    ctx: &DamageContext,
) -> bool {
    match modifier_type {
        ModifierType::All => true,
        ModifierType::BaseAttack => category == AttackCategory::Basic,
        ModifierType::Counter => category == AttackCategory::Counter,
        ModifierType::FreeAim => category == AttackCategory::FreeShot,
        ModifierType::Skill => category == AttackCategory::Skill,
        ModifierType::FirstHit => category == AttackCategory::Basic && ctx.is_first_hit,
        ModifierType::Custom(tag) => ctx.tags.iter().any(|t| t == tag),
    }
}

impl Battle {
    /// Evaluate one modifier condition for an attacker and the hit context.
    pub fn condition_holds(
        &self,
        character_id: CharacterId,
        condition: ModifierCondition,
        ctx: &DamageContext,
        config: &EngineConfig,
    ) -> bool {
        let Some(me) = self.character(character_id) else {
            return false;
        };
        let target_has = |status| {
            ctx.target
                .is_some_and(|t| self.statuses.has(t, status))
        };

        match condition {
            ModifierCondition::Solo => self.is_solo(character_id),
            ModifierCondition::FullHp => me.is_full_hp(),
            ModifierCondition::LowHp => me.hp_ratio() < config.low_hp_ratio,
            ModifierCondition::EnemyBurning => target_has(StatusType::Burning),
            ModifierCondition::EnemyMarked => target_has(StatusType::Marked),
            ModifierCondition::EnemyFragile => target_has(StatusType::Fragile),
            ModifierCondition::HasCharges => me.has_charges(),
            ModifierCondition::MaxCharges => me.at_max_charges(),
            ModifierCondition::TwilightActive => self.statuses.has(character_id, StatusType::Twilight),
        }
    }

    /// Run the modifier pipeline for one hit dealt by `character_id`.
    pub fn calculate_modified_damage(
        &self,
        character_id: CharacterId,
        base_damage: u32,
        category: AttackCategory,
        ctx: &DamageContext,
        config: &EngineConfig,
    ) -> u32 {
        let mut active = self.modifiers.active_for(character_id).peekable();
        if active.peek().is_none() {
            return base_damage;
        }

        let surviving: Vec<&DamageModifier> = active
            .filter(|m| matches_category(&m.modifier_type, category, ctx))
            .filter(|m| {
                m.condition
                    .map_or(true, |c| self.condition_holds(character_id, c, ctx, config))
            })
            .collect();

        let scaled = surviving
            .iter()
            .fold(base_damage as f64, |acc, m| acc * m.multiplier);
        let flat: i64 = surviving.iter().map(|m| m.flat_bonus as i64).sum();

        (scaled + flat as f64).round().max(0.0) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::{BattleCharacter, BattleId};

    fn setup() -> (Battle, CharacterId, CharacterId) {
        let mut battle = Battle::new(BattleId(1), "Test");
        let hero = battle.add_character(BattleCharacter::player("Gustave", 120));
        let foe = battle.add_character(BattleCharacter::npc("Lancer", 80));
        (battle, hero, foe)
    }

    #[test]
    fn test_no_modifiers_returns_base() {
        let (battle, hero, foe) = setup();
        let config = EngineConfig::default();
        let dmg = battle.calculate_modified_damage(
            hero,
            40,
            AttackCategory::Basic,
            &DamageContext::against(foe),
            &config,
        );
        assert_eq!(dmg, 40);
    }

    #[test]
    fn test_base_attack_multiplier() {
        let (mut battle, hero, foe) = setup();
        let config = EngineConfig::default();
        battle
            .modifiers
            .add(hero, ModifierSpec::multiplier(ModifierType::BaseAttack, 1.5));

        let ctx = DamageContext::against(foe);
        assert_eq!(
            battle.calculate_modified_damage(hero, 40, AttackCategory::Basic, &ctx, &config),
            60
        );
        assert_eq!(
            battle.calculate_modified_damage(hero, 40, AttackCategory::Skill, &ctx, &config),
            40
        );
    }

    #[test]
    fn test_multiply_then_add_in_any_order() {
        let config = EngineConfig::default();
        for flat_first in [false, true] {
            let (mut battle, hero, foe) = setup();
            let mult = ModifierSpec::multiplier(ModifierType::All, 1.5);
            let flat = ModifierSpec::flat(ModifierType::All, 10);
            if flat_first {
                battle.modifiers.add(hero, flat);
                battle.modifiers.add(hero, mult);
            } else {
                battle.modifiers.add(hero, mult);
                battle.modifiers.add(hero, flat);
            }
            let dmg = battle.calculate_modified_damage(
                hero,
                100,
                AttackCategory::Skill,
                &DamageContext::against(foe),
                &config,
            );
            assert_eq!(dmg, 160);
        }
    }

    #[test]
    fn test_first_hit_needs_basic_and_flag() {
        let (mut battle, hero, foe) = setup();
        let config = EngineConfig::default();
        battle
            .modifiers
            .add(hero, ModifierSpec::flat(ModifierType::FirstHit, 5));

        let first = DamageContext::against(foe).first_hit(true);
        let later = DamageContext::against(foe);
        assert_eq!(
            battle.calculate_modified_damage(hero, 10, AttackCategory::Basic, &first, &config),
            15
        );
        assert_eq!(
            battle.calculate_modified_damage(hero, 10, AttackCategory::Basic, &later, &config),
            10
        );
        assert_eq!(
            battle.calculate_modified_damage(hero, 10, AttackCategory::Counter, &first, &config),
            10
        );
    }

    #[test]
    fn test_condition_enemy_burning() {
        let (mut battle, hero, foe) = setup();
        let config = EngineConfig::default();
        battle.modifiers.add(
            hero,
            ModifierSpec::multiplier(ModifierType::All, 2.0).when(ModifierCondition::EnemyBurning),
        );
        let ctx = DamageContext::against(foe);

        assert_eq!(
            battle.calculate_modified_damage(hero, 10, AttackCategory::Skill, &ctx, &config),
            10
        );
        battle.statuses.stack(foe, StatusType::Burning, 1, Some(2));
        assert_eq!(
            battle.calculate_modified_damage(hero, 10, AttackCategory::Skill, &ctx, &config),
            20
        );
    }

    #[test]
    fn test_condition_low_hp_and_solo() {
        let (mut battle, hero, foe) = setup();
        let config = EngineConfig::default();
        let ctx = DamageContext::against(foe);

        assert!(battle.condition_holds(hero, ModifierCondition::Solo, &ctx, &config));
        assert!(battle.condition_holds(hero, ModifierCondition::FullHp, &ctx, &config));
        assert!(!battle.condition_holds(hero, ModifierCondition::LowHp, &ctx, &config));

        battle.apply_damage(hero, 90);
        assert!(battle.condition_holds(hero, ModifierCondition::LowHp, &ctx, &config));
    }

    #[test]
    fn test_inactive_modifier_ignored_and_clamped() {
        let (mut battle, hero, foe) = setup();
        let config = EngineConfig::default();
        let id = battle
            .modifiers
            .add(hero, ModifierSpec::multiplier(ModifierType::All, 3.0));
        battle.modifiers.add(hero, ModifierSpec::flat(ModifierType::All, -50));
        battle.modifiers.set_active(id, false);

        let dmg = battle.calculate_modified_damage(
            hero,
            20,
            AttackCategory::Skill,
            &DamageContext::against(foe),
            &config,
        );
        assert_eq!(dmg, 0);
    }

    #[test]
    fn test_custom_modifier_needs_tag() {
        let (mut battle, hero, foe) = setup();
        let config = EngineConfig::default();
        battle.modifiers.add(
            hero,
            ModifierSpec::flat("gradient".parse().unwrap(), 7),
        );
        let plain = DamageContext::against(foe);
        let tagged = DamageContext::against(foe).with_tag("gradient");
        assert_eq!(
            battle.calculate_modified_damage(hero, 1, AttackCategory::Skill, &plain, &config),
            1
        );
        assert_eq!(
            battle.calculate_modified_damage(hero, 1, AttackCategory::Skill, &tagged, &config),
            8
        );
    }
}
