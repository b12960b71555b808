//! Skill definitions and the skill book.
//!
//! A skill is data: a cost, a targeting scope, an optional die command, a
//! damage profile, the status effects it applies, and an ordered list of
//! [`SkillMechanic`]s. The resolver in [`crate::rules`] reads these; adding a
//! new special mechanic means adding a variant here and one arm there.

use crate::battle::Stance;
use crate::dice::{DiceError, DiceExpression};
use crate::modifiers::{ModifierSpec, ModifierType};
use crate::resistance::Element;
use crate::stains::{Stain, StainCost};
use crate::status::StatusType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identifier for a skill.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SkillId(pub String);

impl From<&str> for SkillId {
    fn from(s: &str) -> Self {
        SkillId(s.to_string())
    }
}

impl From<String> for SkillId {
    fn from(s: String) -> Self {
        SkillId(s)
    }
}

impl fmt::Display for SkillId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Skill parts
// ============================================================================

/// What using a skill costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkillCost {
    Free,
    /// Magic points.
    Mp(u32),
    /// Whole gradient charges.
    Gradient(u32),
}

/// Who a skill may be aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetScope {
    SelfOnly,
    Enemy,
    Ally,
    Any,
}

/// Which side of the exchange an effect lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectTarget {
    Target,
    Actor,
}

/// A status application declared by a skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectSpec {
    pub status: StatusType,
    pub amount: u32,
    pub turns: Option<u32>,
    pub target: EffectTarget,
}

impl EffectSpec {
    pub fn on_target(status: StatusType, amount: u32, turns: Option<u32>) -> Self {
        Self {
            status,
            amount,
            turns,
            target: EffectTarget::Target,
        }
    }

    pub fn on_actor(status: StatusType, amount: u32, turns: Option<u32>) -> Self {
        Self {
            status,
            amount,
            turns,
            target: EffectTarget::Actor,
        }
    }
}

/// When a conditional effect applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectCondition {
    TargetHas(StatusType),
    TargetLacks(StatusType),
    ActorHas(StatusType),
    ActorInStance(Stance),
    TargetBelowHpPercent(u32),
    /// The skill's roll had at least one critical.
    Critical,
    /// Every stain requirement of the skill was paid.
    StainsConsumed,
}

impl FromStr for EffectCondition {
    type Err = String;

    /// Parse `target-has:Burning`, `actor-in-stance:offensive`,
    /// `target-below-hp:50`, `critical`, `stains-consumed`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, arg) = match s.split_once(':') {
            Some((kind, arg)) => (kind, Some(arg)),
            None => (s, None),
        };
        let need = || arg.ok_or_else(|| format!("condition {kind} needs an argument"));

        match kind {
            "target-has" => Ok(EffectCondition::TargetHas(need()?.parse()?)),
            "target-lacks" => Ok(EffectCondition::TargetLacks(need()?.parse()?)),
            "actor-has" => Ok(EffectCondition::ActorHas(need()?.parse()?)),
            "actor-in-stance" => Ok(EffectCondition::ActorInStance(need()?.parse()?)),
            "target-below-hp" => need()?
                .parse()
                .map(EffectCondition::TargetBelowHpPercent)
                .map_err(|_| format!("bad hp percent in {s}")),
            "critical" => Ok(EffectCondition::Critical),
            "stains-consumed" => Ok(EffectCondition::StainsConsumed),
            _ => Err(format!("unknown effect condition: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalEffect {
    pub condition: EffectCondition,
    pub effect: EffectSpec,
}

/// What a skill does to the user's stance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StanceChange {
    #[default]
    Keep,
    Set(Stance),
    Clear,
}

/// Damage bonus unlocked by paying every stain requirement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StainBonus {
    pub damage_multiplier: f64,
}

/// How a skill interacts with the user's stain slots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StainUsage {
    /// The skill cannot be used unless all four elements are present.
    pub requires_all: bool,
    pub consumes: Vec<StainCost>,
    pub generates: Vec<Stain>,
    pub bonus: Option<StainBonus>,
}

/// One special mechanic, applied in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkillMechanic {
    /// Damage × (1 + per_stack × target's Burning stacks).
    BurnScaling { per_stack: f64 },
    /// Damage × (1 + per_charge × user's charge points).
    ChargeScaling { per_charge: f64, consume: bool },
    /// Damage × multiplier against a Marked target.
    MarkedBonus { multiplier: f64, consume_mark: bool },
    /// Flat base damage per critical die.
    CriticalBonus { per_critical: u32 },
    /// A target left under this HP percentage is defeated outright.
    Execution { threshold_percent: u32 },
    /// Spread the team's MP evenly between the user and its allies.
    RedistributeMp,
    /// Apply an effect to one random living ally.
    RandomAllyBuff { effect: EffectSpec },
    /// Cleanse the target's debuffs, then copy the user's buffs onto it.
    CleanseAndCopyBuffs,
    /// Restore MP to the target.
    GrantMp { amount: u32 },
    /// Attach a damage modifier to the user.
    GrantModifier { modifier: ModifierSpec },
    /// Strip the user's modifiers of one type.
    RemoveModifiers { modifier_type: ModifierType },
    /// Turn one of the user's stains into another.
    TransformStain { from: Stain, to: Stain },
}

impl SkillMechanic {
    /// Whether the mechanic shapes per-hit damage rather than running after.
    pub fn is_damage_stage(&self) -> bool {
        matches!(
            self,
            SkillMechanic::BurnScaling { .. }
                | SkillMechanic::ChargeScaling { .. }
                | SkillMechanic::MarkedBonus { .. }
                | SkillMechanic::CriticalBonus { .. }
                | SkillMechanic::Execution { .. }
        )
    }
}

// ============================================================================
// Skill definition
// ============================================================================

/// Everything the resolver needs to know about a skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillDefinition {
    pub id: SkillId,
    pub name: String,
    pub cost: SkillCost,
    pub target_scope: TargetScope,
    pub element: Element,
    /// Die command such as `2d6+1`; no roll when absent.
    pub dice: Option<String>,
    pub power: u32,
    pub hits: u32,
    #[serde(default)]
    pub primary_effects: Vec<EffectSpec>,
    #[serde(default)]
    pub conditional_effects: Vec<ConditionalEffect>,
    #[serde(default)]
    pub stance: StanceChange,
    #[serde(default)]
    pub stains: StainUsage,
    #[serde(default)]
    pub mechanics: Vec<SkillMechanic>,
}

impl SkillDefinition {
    pub fn new(id: impl Into<SkillId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            cost: SkillCost::Free,
            target_scope: TargetScope::Enemy,
            element: Element::Physical,
            dice: None,
            power: 0,
            hits: 1,
            primary_effects: Vec::new(),
            conditional_effects: Vec::new(),
            stance: StanceChange::Keep,
            stains: StainUsage::default(),
            mechanics: Vec::new(),
        }
    }

    pub fn with_cost(mut self, cost: SkillCost) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_target(mut self, scope: TargetScope) -> Self {
        self.target_scope = scope;
        self
    }

    pub fn with_element(mut self, element: Element) -> Self {
        self.element = element;
        self
    }

    pub fn with_dice(mut self, notation: impl Into<String>) -> Self {
        self.dice = Some(notation.into());
        self
    }

    pub fn with_power(mut self, power: u32) -> Self {
        self.power = power;
        self
    }

    pub fn with_hits(mut self, hits: u32) -> Self {
        self.hits = hits;
        self
    }

    pub fn with_effect(mut self, effect: EffectSpec) -> Self {
        self.primary_effects.push(effect);
        self
    }

    pub fn with_conditional(mut self, condition: EffectCondition, effect: EffectSpec) -> Self {
        self.conditional_effects
            .push(ConditionalEffect { condition, effect });
        self
    }

    pub fn with_stance(mut self, stance: StanceChange) -> Self {
        self.stance = stance;
        self
    }

    pub fn with_stains(mut self, stains: StainUsage) -> Self {
        self.stains = stains;
        self
    }

    pub fn with_mechanic(mut self, mechanic: SkillMechanic) -> Self {
        self.mechanics.push(mechanic);
        self
    }

    /// Whether the skill deals damage to its target.
    pub fn deals_damage(&self) -> bool {
        self.target_scope != TargetScope::SelfOnly && (self.power > 0 || self.dice.is_some())
    }

    /// Parse the die command, if any.
    pub fn dice_expression(&self) -> Result<Option<DiceExpression>, DiceError> {
        self.dice.as_deref().map(DiceExpression::parse).transpose()
    }
}

// ============================================================================
// Skill book
// ============================================================================

#[derive(Debug, Error)]
pub enum SkillBookError {
    #[error("Skill {skill} has a bad die command: {source}")]
    Dice {
        skill: SkillId,
        #[source]
        source: DiceError,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Registry of every skill the engine can resolve.
#[derive(Debug, Clone, Default)]
pub struct SkillBook {
    skills: HashMap<SkillId, SkillDefinition>,
}

impl SkillBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a skill after checking its die command. Replaces any skill
    /// with the same id.
    pub fn insert(&mut self, skill: SkillDefinition) -> Result<(), SkillBookError> {
        skill.dice_expression().map_err(|source| SkillBookError::Dice {
            skill: skill.id.clone(),
            source,
        })?;
        self.skills.insert(skill.id.clone(), skill);
        Ok(())
    }

    pub fn with_skill(mut self, skill: SkillDefinition) -> Result<Self, SkillBookError> {
        self.insert(skill)?;
        Ok(self)
    }

    /// Load a JSON array of skill definitions.
    pub fn from_json(json: &str) -> Result<Self, SkillBookError> {
        let skills: Vec<SkillDefinition> = serde_json::from_str(json)?;
        let mut book = Self::new();
        for skill in skills {
            book.insert(skill)?;
        }
        Ok(book)
    }

    pub fn get(&self, id: &SkillId) -> Option<&SkillDefinition> {
        self.skills.get(id)
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SkillDefinition> {
        self.skills.values()
    }
}
