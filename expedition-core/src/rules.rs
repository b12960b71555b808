//! Battle rules engine.
//!
//! The rules engine turns a request (use a skill, swing a weapon, let a burn
//! tick) into state changes on a [`Battle`] plus an ordered list of
//! [`Effect`]s describing what happened. The presentation layer renders the
//! effect list as the combat log.
//!
//! A skill resolves as a fixed sequence, stopping at the first failure:
//!
//! 1. Validate the user, the skill, the target and the cost. Nothing is
//!    written until every check has passed.
//! 2. Spend the cost and roll the skill's die command.
//! 3. Resolve each hit: element, damage modifiers, stain and mechanic
//!    bonuses, status factors, shields, then the HP write.
//! 4. Apply primary effects, then conditional effects whose condition holds.
//! 5. Change stance, generate stains, run the remaining mechanics.
//!
//! A critical failure (every die a 1) still spends the cost but deals no
//! damage and applies nothing.

use crate::battle::{Battle, CharacterId, DamageResult, Stance};
use crate::config::EngineConfig;
use crate::dice::{DiceExpression, DiceOutcome, DiceSource, MAX_DICE};
use crate::error::{BattleError, Resource};
use crate::immunity::BlockReason;
use crate::modifiers::{AttackCategory, DamageContext, ModifierId, ModifierType};
use crate::passives::{
    TriggerScope, BURNING_SHOTS, CRITICAL_BURN, ENERGISING_CRITS, FIRST_STRIKE, SECOND_CHANCE,
};
use crate::resistance::{Element, ElementFactor};
use crate::skills::{
    EffectCondition, EffectSpec, EffectTarget, SkillBook, SkillCost, SkillDefinition, SkillId,
    SkillMechanic, StanceChange, TargetScope,
};
use crate::stains::{Stain, StainConsumption};
use crate::status::{ApplyOutcome, StatusType};
use crate::store::ActionToken;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Requests and outcomes
// ============================================================================

/// A request to use a skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UseSkill {
    pub actor: CharacterId,
    pub skill: SkillId,
    pub target: Option<CharacterId>,
    /// Client-supplied key that makes retries safe.
    pub token: Option<ActionToken>,
}

impl UseSkill {
    pub fn new(actor: CharacterId, skill: impl Into<SkillId>) -> Self {
        Self {
            actor,
            skill: skill.into(),
            target: None,
            token: None,
        }
    }

    pub fn on(mut self, target: CharacterId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_token(mut self, token: ActionToken) -> Self {
        self.token = Some(token);
        self
    }
}

/// A status application attempted by a skill, and how it went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedEffect {
    pub target: CharacterId,
    pub status: StatusType,
    pub outcome: ApplyOutcome,
}

/// Result of using a skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillOutcome {
    pub skill: SkillId,
    pub actor: CharacterId,
    pub target: CharacterId,
    pub dice: Option<DiceOutcome>,
    /// Damage of each hit after every factor; 0 for negated hits.
    pub per_hit_damage: Vec<u32>,
    pub applied_effects: Vec<AppliedEffect>,
    pub log: Vec<Effect>,
    pub narrative: String,
}

impl SkillOutcome {
    pub fn total_damage(&self) -> u32 {
        self.per_hit_damage.iter().fold(0, |acc, d| acc.saturating_add(*d))
    }

    pub fn is_critical_failure(&self) -> bool {
        self.dice.as_ref().is_some_and(|d| d.critical_failure)
    }
}

/// Result of a weapon attack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackOutcome {
    pub actor: CharacterId,
    pub target: CharacterId,
    pub category: AttackCategory,
    pub damage: u32,
    pub is_first_hit: bool,
    pub log: Vec<Effect>,
}

/// Result of a Burning tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurnResolution {
    pub character_id: CharacterId,
    pub dice: DiceOutcome,
    pub damage: u32,
    pub remaining_stacks: u32,
    pub log: Vec<Effect>,
}

// ============================================================================
// Effects
// ============================================================================

/// Why a hit dealt nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HitNegation {
    ElementImmune,
    Shielded,
}

/// One entry of the combat log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    /// A skill cost was paid.
    ResourceSpent {
        character_id: CharacterId,
        resource: Resource,
        amount: u32,
    },

    /// Charge points were drained by a scaling skill.
    ChargesConsumed { character_id: CharacterId, amount: u32 },

    /// A dice pool was rolled.
    DiceRolled {
        character_id: CharacterId,
        outcome: DiceOutcome,
        purpose: String,
    },

    /// Every die came up 1.
    CriticalFailure { character_id: CharacterId },

    /// A hit connected.
    HitLanded {
        target_id: CharacterId,
        hit: u32,
        damage: u32,
    },

    /// A hit was negated.
    HitNegated {
        target_id: CharacterId,
        hit: u32,
        reason: HitNegation,
    },

    /// HP changed (damage or healing).
    HpChanged {
        target_id: CharacterId,
        amount: i32,
        new_current: u32,
        new_max: u32,
        dropped_to_zero: bool,
    },

    CharacterDefeated { character_id: CharacterId },

    /// An execution threshold finished the target off.
    Executed { target_id: CharacterId },

    StatusApplied {
        target_id: CharacterId,
        status: StatusType,
        amount: u32,
        remaining_turns: Option<u32>,
    },

    /// A status application was refused. Not an error.
    StatusBlocked {
        target_id: CharacterId,
        status: StatusType,
        reason: BlockReason,
    },

    StatusRemoved {
        target_id: CharacterId,
        status: StatusType,
    },

    StanceChanged {
        character_id: CharacterId,
        from: Option<Stance>,
        to: Option<Stance>,
    },

    StainsConsumed {
        character_id: CharacterId,
        consumed: Vec<StainConsumption>,
    },

    StainsGenerated {
        character_id: CharacterId,
        added: Vec<Stain>,
        lost: Vec<Stain>,
    },

    StainTransformed {
        character_id: CharacterId,
        from: Stain,
        to: Stain,
    },

    MpChanged {
        character_id: CharacterId,
        amount: i32,
        new_current: u32,
    },

    ModifierGranted {
        character_id: CharacterId,
        modifier_id: ModifierId,
        modifier_type: ModifierType,
    },

    ModifiersRemoved {
        character_id: CharacterId,
        modifier_type: ModifierType,
        count: usize,
    },

    BuffsCopied {
        from: CharacterId,
        to: CharacterId,
        statuses: Vec<StatusType>,
    },

    PassiveTriggered {
        character_id: CharacterId,
        passive: String,
    },
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::ResourceSpent {
                character_id,
                resource,
                amount,
            } => write!(f, "#{character_id} spends {amount} {resource}"),
            Effect::ChargesConsumed {
                character_id,
                amount,
            } => write!(f, "#{character_id} releases {amount} charges"),
            Effect::DiceRolled {
                outcome, purpose, ..
            } => write!(f, "{purpose}: {outcome}"),
            Effect::CriticalFailure { character_id } => {
                write!(f, "#{character_id} critically fails")
            }
            Effect::HitLanded {
                target_id,
                hit,
                damage,
            } => write!(f, "Hit {hit} on #{target_id} for {damage}"),
            Effect::HitNegated {
                target_id,
                hit,
                reason,
            } => match reason {
                HitNegation::ElementImmune => {
                    write!(f, "Hit {hit} had no effect on #{target_id} (immune)")
                }
                HitNegation::Shielded => write!(f, "Hit {hit} absorbed by #{target_id}'s shield"),
            },
            Effect::HpChanged {
                target_id,
                new_current,
                new_max,
                ..
            } => write!(f, "#{target_id} HP {new_current}/{new_max}"),
            Effect::CharacterDefeated { character_id } => write!(f, "#{character_id} is defeated"),
            Effect::Executed { target_id } => write!(f, "#{target_id} is executed"),
            Effect::StatusApplied {
                target_id,
                status,
                amount,
                ..
            } => write!(f, "#{target_id} gains {status} ({amount})"),
            Effect::StatusBlocked {
                target_id,
                status,
                reason,
            } => write!(f, "{status} had no effect on #{target_id}: {reason}"),
            Effect::StatusRemoved { target_id, status } => {
                write!(f, "#{target_id} loses {status}")
            }
            Effect::StanceChanged {
                character_id, to, ..
            } => match to {
                Some(stance) => write!(f, "#{character_id} enters {stance} stance"),
                None => write!(f, "#{character_id} leaves their stance"),
            },
            Effect::StainsConsumed {
                character_id,
                consumed,
            } => write!(f, "#{character_id} consumes {} stain groups", consumed.len()),
            Effect::StainsGenerated {
                character_id,
                added,
                ..
            } => write!(f, "#{character_id} gains {} stains", added.len()),
            Effect::StainTransformed {
                character_id,
                from,
                to,
            } => write!(f, "#{character_id} turns a {from} stain into {to}"),
            Effect::MpChanged {
                character_id,
                amount,
                new_current,
            } => write!(f, "#{character_id} MP {amount:+} (now {new_current})"),
            Effect::ModifierGranted {
                character_id,
                modifier_type,
                ..
            } => write!(f, "#{character_id} gains a {modifier_type} modifier"),
            Effect::ModifiersRemoved {
                character_id,
                modifier_type,
                count,
            } => write!(f, "#{character_id} loses {count} {modifier_type} modifiers"),
            Effect::BuffsCopied { from, to, statuses } => {
                write!(f, "#{from} shares {} buffs with #{to}", statuses.len())
            }
            Effect::PassiveTriggered {
                character_id,
                passive,
            } => write!(f, "#{character_id}'s {passive} triggers"),
        }
    }
}

// ============================================================================
// Rules engine
// ============================================================================

/// Stateless resolver over a battle; the caller owns transactions.
pub struct RulesEngine<'a> {
    config: &'a EngineConfig,
    skills: &'a SkillBook,
}

impl<'a> RulesEngine<'a> {
    pub fn new(config: &'a EngineConfig, skills: &'a SkillBook) -> Self {
        Self { config, skills }
    }

    /// Resolve a skill use end to end.
    pub fn use_skill(
        &self,
        battle: &mut Battle,
        dice: &mut dyn DiceSource,
        request: &UseSkill,
    ) -> Result<SkillOutcome, BattleError> {
        let actor = battle
            .character(request.actor)
            .ok_or(BattleError::CharacterNotFound(request.actor))?;
        let skill = self
            .skills
            .get(&request.skill)
            .ok_or_else(|| BattleError::SkillNotFound(request.skill.clone()))?;
        if !actor.knows_skill(&skill.id) {
            return Err(BattleError::NotOwned {
                character_id: actor.id,
                skill: skill.id.clone(),
            });
        }
        let target = self.validate_skill(battle, skill, request)?;
        let expression = skill.dice_expression()?;

        let mut resolver = Resolver::new(battle, self.config, dice);
        let outcome = resolver.run_skill(skill, request.actor, target, expression.as_ref());

        tracing::info!(
            battle = %battle.id,
            actor = %request.actor,
            target = %target,
            skill = %skill.id,
            damage = outcome.total_damage(),
            effects = outcome.applied_effects.len(),
            "skill resolved"
        );
        Ok(outcome)
    }

    /// Everything that must hold before a skill touches any state.
    fn validate_skill(
        &self,
        battle: &Battle,
        skill: &SkillDefinition,
        request: &UseSkill,
    ) -> Result<CharacterId, BattleError> {
        let actor = battle
            .character(request.actor)
            .ok_or(BattleError::CharacterNotFound(request.actor))?;
        if actor.is_defeated() {
            return Err(BattleError::invalid_target(actor.id, "user is defeated"));
        }

        let target_id = match (skill.target_scope, request.target) {
            (TargetScope::SelfOnly, None) => actor.id,
            (TargetScope::SelfOnly, Some(t)) if t == actor.id => t,
            (TargetScope::SelfOnly, Some(t)) => {
                return Err(BattleError::invalid_target(t, "skill only targets its user"))
            }
            (_, None) => return Err(BattleError::invalid_target(actor.id, "skill needs a target")),
            (_, Some(t)) => t,
        };
        let target = battle
            .character(target_id)
            .ok_or_else(|| BattleError::invalid_target(target_id, "not in this battle"))?;
        if target.is_defeated() {
            return Err(BattleError::invalid_target(target_id, "target is defeated"));
        }
        match skill.target_scope {
            TargetScope::Enemy if target.is_enemy == actor.is_enemy => {
                return Err(BattleError::invalid_target(target_id, "not an enemy"));
            }
            TargetScope::Ally if target.is_enemy != actor.is_enemy => {
                return Err(BattleError::invalid_target(target_id, "not an ally"));
            }
            _ => {}
        }

        match skill.cost {
            SkillCost::Free => {}
            SkillCost::Mp(required) => {
                let available = actor.magic_points.unwrap_or(0);
                if available < required {
                    return Err(BattleError::InsufficientResource {
                        resource: Resource::MagicPoints,
                        required,
                        available,
                    });
                }
            }
            SkillCost::Gradient(required) => {
                let available = actor.gradient_charges(self.config.gradient_points_per_charge);
                if available < required {
                    return Err(BattleError::InsufficientResource {
                        resource: Resource::GradientCharges,
                        required,
                        available,
                    });
                }
            }
        }

        if skill.stains.requires_all && !actor.stains.has_all_elements() {
            let present = Stain::ELEMENTAL
                .iter()
                .filter(|s| actor.stains.count(**s) > 0)
                .count() as u32;
            return Err(BattleError::InsufficientResource {
                resource: Resource::Stains,
                required: Stain::ELEMENTAL.len() as u32,
                available: (present + actor.stains.count(Stain::Light))
                    .min(Stain::ELEMENTAL.len() as u32),
            });
        }

        Ok(target_id)
    }

    /// Resolve a weapon attack of a non-skill category.
    pub fn basic_attack(
        &self,
        battle: &mut Battle,
        dice: &mut dyn DiceSource,
        actor: CharacterId,
        target: CharacterId,
        category: AttackCategory,
    ) -> Result<AttackOutcome, BattleError> {
        let attacker = battle
            .character(actor)
            .ok_or(BattleError::CharacterNotFound(actor))?;
        if attacker.is_defeated() {
            return Err(BattleError::invalid_target(actor, "attacker is defeated"));
        }
        let defender = battle
            .character(target)
            .ok_or_else(|| BattleError::invalid_target(target, "not in this battle"))?;
        if defender.is_defeated() {
            return Err(BattleError::invalid_target(target, "target is defeated"));
        }
        if defender.is_enemy == attacker.is_enemy {
            return Err(BattleError::invalid_target(target, "not an enemy"));
        }
        let power = attacker.weapon_power;

        let mut resolver = Resolver::new(battle, self.config, dice);
        let is_first_hit = category == AttackCategory::Basic
            && resolver.battle.trackers.can_activate(
                actor,
                FIRST_STRIKE,
                TriggerScope::OncePerBattle,
                resolver.battle.round,
            );
        if is_first_hit {
            resolver.battle.track_passive(actor, FIRST_STRIKE);
        }

        let ctx = DamageContext::against(target).first_hit(is_first_hit);
        let damage = resolver.strike(actor, target, 1, power, Element::Physical, category, &ctx, 1.0);

        tracing::info!(
            battle = %resolver.battle.id,
            actor = %actor,
            target = %target,
            ?category,
            damage,
            "attack resolved"
        );
        Ok(AttackOutcome {
            actor,
            target,
            category,
            damage,
            is_first_hit,
            log: resolver.log,
        })
    }

    /// Roll one d6 per Burning stack, deal the total, then burn off a stack.
    pub fn resolve_burning(
        &self,
        battle: &mut Battle,
        dice: &mut dyn DiceSource,
        character_id: CharacterId,
    ) -> Result<BurnResolution, BattleError> {
        battle
            .character(character_id)
            .ok_or(BattleError::CharacterNotFound(character_id))?;
        let stacks = battle.statuses.amount_of(character_id, StatusType::Burning);
        if stacks == 0 {
            return Ok(BurnResolution {
                character_id,
                dice: DiceOutcome::default(),
                damage: 0,
                remaining_stacks: 0,
                log: Vec::new(),
            });
        }

        let mut resolver = Resolver::new(battle, self.config, dice);
        let outcome = DiceOutcome::evaluate(resolver.dice.roll(stacks.min(MAX_DICE)), false);
        resolver.log.push(Effect::DiceRolled {
            character_id,
            outcome: outcome.clone(),
            purpose: StatusType::Burning.to_string(),
        });

        let damage = resolver.deal_damage(character_id, outcome.total);
        let remaining_stacks = match resolver
            .battle
            .statuses
            .resolve(character_id, StatusType::Burning, 1)
        {
            Some(0) => {
                resolver.log.push(Effect::StatusRemoved {
                    target_id: character_id,
                    status: StatusType::Burning,
                });
                0
            }
            Some(remaining) => remaining,
            None => 0,
        };

        tracing::debug!(
            battle = %resolver.battle.id,
            character = %character_id,
            damage,
            remaining_stacks,
            "burning resolved"
        );
        Ok(BurnResolution {
            character_id,
            dice: outcome,
            damage,
            remaining_stacks,
            log: resolver.log,
        })
    }

    /// Reduce a status by a resolved magnitude. Returns the remaining amount.
    pub fn resolve_status(
        &self,
        battle: &mut Battle,
        character_id: CharacterId,
        status: StatusType,
        total_value: u32,
    ) -> Result<u32, BattleError> {
        battle
            .character(character_id)
            .ok_or(BattleError::CharacterNotFound(character_id))?;
        let remaining = battle
            .statuses
            .resolve(character_id, status, total_value)
            .unwrap_or(0);
        tracing::debug!(
            battle = %battle.id,
            character = %character_id,
            %status,
            remaining,
            "status resolved"
        );
        Ok(remaining)
    }

    /// Apply a status directly, through the usual gates.
    pub fn apply_status(
        &self,
        battle: &mut Battle,
        dice: &mut dyn DiceSource,
        target: CharacterId,
        status: StatusType,
        amount: u32,
        turns: Option<u32>,
    ) -> Result<AppliedEffect, BattleError> {
        let character = battle
            .character(target)
            .ok_or(BattleError::CharacterNotFound(target))?;
        if character.is_defeated() {
            return Err(BattleError::invalid_target(target, "target is defeated"));
        }
        let mut resolver = Resolver::new(battle, self.config, dice);
        Ok(resolver.apply_effect(target, status, amount, turns))
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Working state for one resolution.
struct Resolver<'b> {
    battle: &'b mut Battle,
    config: &'b EngineConfig,
    dice: &'b mut dyn DiceSource,
    log: Vec<Effect>,
}

impl<'b> Resolver<'b> {
    fn new(
        battle: &'b mut Battle,
        config: &'b EngineConfig,
        dice: &'b mut dyn DiceSource,
    ) -> Self {
        Self {
            battle,
            config,
            dice,
            log: Vec::new(),
        }
    }

    fn slots(&self) -> usize {
        self.config.active_picto_slots
    }

    fn is_standing(&self, id: CharacterId) -> bool {
        self.battle.character(id).is_some_and(|c| !c.is_defeated())
    }

    fn run_skill(
        &mut self,
        skill: &SkillDefinition,
        actor: CharacterId,
        target: CharacterId,
        expression: Option<&DiceExpression>,
    ) -> SkillOutcome {
        let actor_name = self
            .battle
            .character(actor)
            .map(|c| c.name.clone())
            .unwrap_or_default();
        self.spend_cost(actor, skill.cost);

        let roll = match expression {
            Some(expr) => {
                let count_fives = self.battle.passive_ready(actor, CRITICAL_BURN, self.slots())
                    && self.battle.statuses.has(target, StatusType::Burning);
                let outcome = expr.roll(&mut *self.dice, count_fives);
                self.log.push(Effect::DiceRolled {
                    character_id: actor,
                    outcome: outcome.clone(),
                    purpose: skill.name.clone(),
                });
                Some(outcome)
            }
            None => None,
        };

        if roll.as_ref().is_some_and(|o| o.critical_failure) {
            self.log.push(Effect::CriticalFailure {
                character_id: actor,
            });
            return SkillOutcome {
                skill: skill.id.clone(),
                actor,
                target,
                dice: roll,
                per_hit_damage: vec![0; skill.hits as usize],
                applied_effects: Vec::new(),
                log: std::mem::take(&mut self.log),
                narrative: format!("{actor_name} fumbles {}", skill.name),
            };
        }
        if let Some(outcome) = &roll {
            self.energising_crits(actor, outcome);
        }

        let stains_paid = self.consume_stains(actor, skill);

        let per_hit_damage = if skill.deals_damage() {
            self.skill_hits(skill, actor, target, expression, roll.as_ref(), stains_paid)
        } else {
            Vec::new()
        };

        let mut applied_effects = Vec::new();
        for spec in &skill.primary_effects {
            applied_effects.extend(self.apply_spec(actor, target, spec));
        }
        for conditional in &skill.conditional_effects {
            if self.condition_holds(conditional.condition, actor, target, roll.as_ref(), stains_paid)
            {
                applied_effects.extend(self.apply_spec(actor, target, &conditional.effect));
            }
        }

        self.change_stance(actor, skill.stance);
        self.generate_stains(actor, &skill.stains.generates);
        for mechanic in skill.mechanics.iter().filter(|m| !m.is_damage_stage()) {
            self.run_mechanic(mechanic, actor, target, &mut applied_effects);
        }

        SkillOutcome {
            skill: skill.id.clone(),
            actor,
            target,
            dice: roll,
            per_hit_damage,
            applied_effects,
            log: std::mem::take(&mut self.log),
            narrative: format!("{actor_name} uses {}", skill.name),
        }
    }

    fn spend_cost(&mut self, actor: CharacterId, cost: SkillCost) {
        let per_charge = self.config.gradient_points_per_charge;
        let Some(character) = self.battle.character_mut(actor) else {
            return;
        };
        let (resource, amount) = match cost {
            SkillCost::Free => return,
            SkillCost::Mp(n) => {
                character.magic_points = character.magic_points.map(|mp| mp.saturating_sub(n));
                (Resource::MagicPoints, n)
            }
            SkillCost::Gradient(n) => {
                character.gradient_points = character
                    .gradient_points
                    .map(|gp| gp.saturating_sub(n * per_charge));
                (Resource::GradientCharges, n)
            }
        };
        if amount > 0 {
            self.log.push(Effect::ResourceSpent {
                character_id: actor,
                resource,
                amount,
            });
        }
    }

    /// Consume the skill's stains. Returns true when every requirement was paid.
    fn consume_stains(&mut self, actor: CharacterId, skill: &SkillDefinition) -> bool {
        if skill.stains.consumes.is_empty() {
            return false;
        }
        let Some(character) = self.battle.character_mut(actor) else {
            return false;
        };
        let report = character.stains.consume(&skill.stains.consumes);
        if !report.consumed.is_empty() {
            self.log.push(Effect::StainsConsumed {
                character_id: actor,
                consumed: report.consumed.clone(),
            });
        }
        report.all_satisfied()
    }

    fn generate_stains(&mut self, actor: CharacterId, stains: &[Stain]) {
        if stains.is_empty() {
            return;
        }
        let Some(character) = self.battle.character_mut(actor) else {
            return;
        };
        let lost = character.stains.add(stains);
        self.log.push(Effect::StainsGenerated {
            character_id: actor,
            added: stains.to_vec(),
            lost,
        });
    }

    fn skill_hits(
        &mut self,
        skill: &SkillDefinition,
        actor: CharacterId,
        target: CharacterId,
        expression: Option<&DiceExpression>,
        roll: Option<&DiceOutcome>,
        stains_paid: bool,
    ) -> Vec<u32> {
        let dice_total = match (expression, roll) {
            (Some(expr), Some(outcome)) => expr.total_with_modifier(outcome),
            _ => 0,
        };
        let criticals = roll.map_or(0, |o| o.criticals);
        let critical_bonus: u32 = skill
            .mechanics
            .iter()
            .map(|m| match m {
                SkillMechanic::CriticalBonus { per_critical } => {
                    per_critical.saturating_mul(criticals)
                }
                _ => 0,
            })
            .fold(0, u32::saturating_add);
        let base = skill
            .power
            .saturating_add(dice_total)
            .saturating_add(critical_bonus);

        let stain_bonus = match (stains_paid, skill.stains.bonus) {
            (true, Some(bonus)) => bonus.damage_multiplier,
            _ => 1.0,
        };
        let (mechanic_bonus, consume_mark) = self.mechanic_multiplier(skill, actor, target);
        let ctx = DamageContext::against(target);

        let mut damages = Vec::with_capacity(skill.hits as usize);
        for hit in 1..=skill.hits {
            if !self.is_standing(target) {
                break;
            }
            let damage = self.strike(
                actor,
                target,
                hit,
                base,
                skill.element,
                AttackCategory::Skill,
                &ctx,
                stain_bonus * mechanic_bonus,
            );
            damages.push(damage);
            self.check_execution(skill, target);
        }

        if consume_mark && self.battle.statuses.remove_type(target, StatusType::Marked) > 0 {
            self.log.push(Effect::StatusRemoved {
                target_id: target,
                status: StatusType::Marked,
            });
        }
        for mechanic in &skill.mechanics {
            if let SkillMechanic::ChargeScaling { consume: true, .. } = mechanic {
                self.drain_charges(actor);
            }
        }
        damages
    }

    /// Product of the damage-stage mechanic multipliers, and whether a mark
    /// should be consumed afterwards.
    fn mechanic_multiplier(
        &self,
        skill: &SkillDefinition,
        actor: CharacterId,
        target: CharacterId,
    ) -> (f64, bool) {
        let statuses = &self.battle.statuses;
        let charges = self
            .battle
            .character(actor)
            .and_then(|c| c.charge_points)
            .unwrap_or(0);

        let mut multiplier = 1.0;
        let mut consume_mark = false;
        for mechanic in &skill.mechanics {
            match mechanic {
                SkillMechanic::BurnScaling { per_stack } => {
                    let stacks = statuses.amount_of(target, StatusType::Burning);
                    multiplier *= 1.0 + per_stack * stacks as f64;
                }
                SkillMechanic::ChargeScaling { per_charge, .. } => {
                    multiplier *= 1.0 + per_charge * charges as f64;
                }
                SkillMechanic::MarkedBonus {
                    multiplier: bonus,
                    consume_mark: consume,
                } if statuses.has(target, StatusType::Marked) => {
                    multiplier *= bonus;
                    consume_mark |= *consume;
                }
                _ => {}
            }
        }
        (multiplier, consume_mark)
    }

    /// Resolve one hit from base damage to HP write. Returns the hit's damage.
    #[allow(clippy::too_many_arguments)]
    fn strike(
        &mut self,
        actor: CharacterId,
        target: CharacterId,
        hit: u32,
        base: u32,
        element: Element,
        category: AttackCategory,
        ctx: &DamageContext,
        bonus: f64,
    ) -> u32 {
        let factor = self.battle.resistances.resolve(target, element);
        if factor == ElementFactor::Immune {
            self.log.push(Effect::HitNegated {
                target_id: target,
                hit,
                reason: HitNegation::ElementImmune,
            });
            return 0;
        }

        let modified = self.battle.calculate_modified_damage(
            actor,
            factor.apply(base),
            category,
            ctx,
            self.config,
        );
        let damage = (modified as f64 * bonus * self.status_factor(actor, target, element))
            .round()
            .max(0.0) as u32;

        if damage > 0
            && self.config.shield_blocks_hits
            && self.battle.statuses.has(target, StatusType::Shielded)
        {
            self.log.push(Effect::HitNegated {
                target_id: target,
                hit,
                reason: HitNegation::Shielded,
            });
            if self.battle.statuses.resolve(target, StatusType::Shielded, 1) == Some(0) {
                self.log.push(Effect::StatusRemoved {
                    target_id: target,
                    status: StatusType::Shielded,
                });
            }
            return 0;
        }

        self.log.push(Effect::HitLanded {
            target_id: target,
            hit,
            damage,
        });
        let dealt = self.deal_damage(target, damage);
        if dealt > 0 {
            self.on_hit_passives(actor, target);
        }
        damage
    }

    fn status_factor(&self, attacker: CharacterId, defender: CharacterId, element: Element) -> f64 {
        let statuses = &self.battle.statuses;
        let mut factor = 1.0;
        if statuses.has(attacker, StatusType::Empowered) {
            factor *= self.config.status_amplify;
        }
        if statuses.has(attacker, StatusType::Weakened) {
            factor *= self.config.status_dampen;
        }
        if statuses.has(defender, StatusType::Unprotected) {
            factor *= self.config.status_amplify;
        }
        if statuses.has(defender, StatusType::Protected) {
            factor *= self.config.status_dampen;
        }
        if element == Element::Fire && statuses.has(defender, StatusType::FireVulnerability) {
            factor *= self.config.fire_vulnerability;
        }
        factor
    }

    /// Write damage to HP, giving second-chance a look first.
    fn deal_damage(&mut self, target: CharacterId, damage: u32) -> u32 {
        let Some(hp) = self.battle.character(target).map(|c| c.health_points) else {
            return 0;
        };
        let mut damage = damage;
        if hp > 0 && damage >= hp && self.battle.passive_ready(target, SECOND_CHANCE, self.slots())
        {
            damage = hp - 1;
            self.battle.track_passive(target, SECOND_CHANCE);
            self.log.push(Effect::PassiveTriggered {
                character_id: target,
                passive: SECOND_CHANCE.to_string(),
            });
        }
        match self.battle.apply_damage(target, damage) {
            Some(result) => {
                self.log_damage(target, result);
                result.damage_taken
            }
            None => 0,
        }
    }

    fn log_damage(&mut self, target: CharacterId, result: DamageResult) {
        let new_max = self
            .battle
            .character(target)
            .map_or(0, |c| c.max_health_points);
        self.log.push(Effect::HpChanged {
            target_id: target,
            amount: -(result.damage_taken as i32),
            new_current: result.new_hp,
            new_max,
            dropped_to_zero: result.dropped_to_zero,
        });
        if result.dropped_to_zero {
            self.log.push(Effect::CharacterDefeated {
                character_id: target,
            });
        }
    }

    fn on_hit_passives(&mut self, attacker: CharacterId, target: CharacterId) {
        if self.is_standing(target) && self.battle.passive_ready(attacker, BURNING_SHOTS, self.slots())
        {
            self.battle.track_passive(attacker, BURNING_SHOTS);
            self.log.push(Effect::PassiveTriggered {
                character_id: attacker,
                passive: BURNING_SHOTS.to_string(),
            });
            self.apply_effect(target, StatusType::Burning, 1, Some(3));
        }
    }

    fn energising_crits(&mut self, actor: CharacterId, outcome: &DiceOutcome) {
        if outcome.criticals == 0 || !self.battle.passive_ready(actor, ENERGISING_CRITS, self.slots())
        {
            return;
        }
        self.battle.track_passive(actor, ENERGISING_CRITS);
        self.log.push(Effect::PassiveTriggered {
            character_id: actor,
            passive: ENERGISING_CRITS.to_string(),
        });
        self.grant_mp(actor, 1);
    }

    fn check_execution(&mut self, skill: &SkillDefinition, target: CharacterId) {
        for mechanic in &skill.mechanics {
            let SkillMechanic::Execution { threshold_percent } = mechanic else {
                continue;
            };
            let Some(character) = self.battle.character(target) else {
                return;
            };
            if character.is_defeated() {
                return;
            }
            let hp = character.health_points as u64;
            let max = character.max_health_points as u64;
            if hp * 100 < max * *threshold_percent as u64 {
                self.log.push(Effect::Executed { target_id: target });
                if let Some(result) = self.battle.apply_damage(target, hp as u32) {
                    self.log_damage(target, result);
                }
                return;
            }
        }
    }

    fn drain_charges(&mut self, actor: CharacterId) {
        let Some(character) = self.battle.character_mut(actor) else {
            return;
        };
        let amount = character.charge_points.unwrap_or(0);
        if amount == 0 {
            return;
        }
        character.charge_points = Some(0);
        self.log.push(Effect::ChargesConsumed {
            character_id: actor,
            amount,
        });
    }

    fn apply_effect(
        &mut self,
        target: CharacterId,
        status: StatusType,
        amount: u32,
        turns: Option<u32>,
    ) -> AppliedEffect {
        let outcome = self.battle.apply_status(
            target,
            status,
            amount,
            turns,
            self.config.active_picto_slots,
            &mut *self.dice,
        );
        match &outcome {
            ApplyOutcome::Applied(effect) => self.log.push(Effect::StatusApplied {
                target_id: target,
                status,
                amount: effect.amount,
                remaining_turns: effect.remaining_turns,
            }),
            ApplyOutcome::Blocked(reason) => {
                tracing::debug!(
                    battle = %self.battle.id,
                    character = %target,
                    %status,
                    %reason,
                    "status blocked"
                );
                self.log.push(Effect::StatusBlocked {
                    target_id: target,
                    status,
                    reason: *reason,
                });
            }
        }
        AppliedEffect {
            target,
            status,
            outcome,
        }
    }

    /// Apply a declared effect unless its recipient is down.
    fn apply_spec(
        &mut self,
        actor: CharacterId,
        target: CharacterId,
        spec: &EffectSpec,
    ) -> Option<AppliedEffect> {
        let recipient = match spec.target {
            EffectTarget::Target => target,
            EffectTarget::Actor => actor,
        };
        if !self.is_standing(recipient) {
            return None;
        }
        Some(self.apply_effect(recipient, spec.status, spec.amount, spec.turns))
    }

    fn condition_holds(
        &self,
        condition: EffectCondition,
        actor: CharacterId,
        target: CharacterId,
        roll: Option<&DiceOutcome>,
        stains_paid: bool,
    ) -> bool {
        let statuses = &self.battle.statuses;
        match condition {
            EffectCondition::TargetHas(status) => statuses.has(target, status),
            EffectCondition::TargetLacks(status) => !statuses.has(target, status),
            EffectCondition::ActorHas(status) => statuses.has(actor, status),
            EffectCondition::ActorInStance(stance) => {
                self.battle.character(actor).and_then(|c| c.stance) == Some(stance)
            }
            EffectCondition::TargetBelowHpPercent(percent) => {
                self.battle.character(target).is_some_and(|c| {
                    !c.is_defeated()
                        && (c.health_points as u64) * 100 < (c.max_health_points as u64) * percent as u64
                })
            }
            EffectCondition::Critical => roll.is_some_and(|o| o.criticals > 0),
            EffectCondition::StainsConsumed => stains_paid,
        }
    }

    fn change_stance(&mut self, actor: CharacterId, change: StanceChange) {
        let to = match change {
            StanceChange::Keep => return,
            StanceChange::Set(stance) => Some(stance),
            StanceChange::Clear => None,
        };
        let Some(character) = self.battle.character_mut(actor) else {
            return;
        };
        let from = character.stance;
        if from != to {
            character.stance = to;
            self.log.push(Effect::StanceChanged {
                character_id: actor,
                from,
                to,
            });
        }
    }

    fn grant_mp(&mut self, character_id: CharacterId, amount: u32) {
        let Some(character) = self.battle.character_mut(character_id) else {
            return;
        };
        let gained = character.restore_mp(amount);
        if gained > 0 {
            let new_current = character.magic_points.unwrap_or(0);
            self.log.push(Effect::MpChanged {
                character_id,
                amount: gained as i32,
                new_current,
            });
        }
    }

    fn run_mechanic(
        &mut self,
        mechanic: &SkillMechanic,
        actor: CharacterId,
        target: CharacterId,
        applied: &mut Vec<AppliedEffect>,
    ) {
        match mechanic {
            SkillMechanic::RedistributeMp => self.redistribute_mp(actor),
            SkillMechanic::RandomAllyBuff { effect } => {
                let allies = self.battle.allies_of(actor);
                if allies.is_empty() {
                    return;
                }
                let ally = allies[self.dice.pick(allies.len()).min(allies.len() - 1)];
                applied.push(self.apply_effect(ally, effect.status, effect.amount, effect.turns));
            }
            SkillMechanic::CleanseAndCopyBuffs => {
                if !self.is_standing(target) {
                    return;
                }
                for status in self.battle.statuses.cleanse_all(target) {
                    self.log.push(Effect::StatusRemoved {
                        target_id: target,
                        status,
                    });
                }
                if target == actor {
                    return;
                }
                let buffs = self.battle.statuses.positive_effects(actor);
                let mut copied = Vec::new();
                for buff in buffs {
                    let result = self.apply_effect(
                        target,
                        buff.effect_type,
                        buff.amount,
                        buff.remaining_turns,
                    );
                    if result.outcome.is_applied() {
                        copied.push(buff.effect_type);
                    }
                    applied.push(result);
                }
                self.log.push(Effect::BuffsCopied {
                    from: actor,
                    to: target,
                    statuses: copied,
                });
            }
            SkillMechanic::GrantMp { amount } => {
                if self.is_standing(target) {
                    self.grant_mp(target, *amount);
                }
            }
            SkillMechanic::GrantModifier { modifier } => {
                let modifier_id = self.battle.modifiers.add(actor, modifier.clone());
                self.log.push(Effect::ModifierGranted {
                    character_id: actor,
                    modifier_id,
                    modifier_type: modifier.modifier_type.clone(),
                });
            }
            SkillMechanic::RemoveModifiers { modifier_type } => {
                let count = self.battle.modifiers.remove_by_type(actor, modifier_type);
                if count > 0 {
                    self.log.push(Effect::ModifiersRemoved {
                        character_id: actor,
                        modifier_type: modifier_type.clone(),
                        count,
                    });
                }
            }
            SkillMechanic::TransformStain { from, to } => {
                let transformed = self
                    .battle
                    .character_mut(actor)
                    .is_some_and(|c| c.stains.transform(*from, *to));
                if transformed {
                    self.log.push(Effect::StainTransformed {
                        character_id: actor,
                        from: *from,
                        to: *to,
                    });
                }
            }
            SkillMechanic::BurnScaling { .. }
            | SkillMechanic::ChargeScaling { .. }
            | SkillMechanic::MarkedBonus { .. }
            | SkillMechanic::CriticalBonus { .. }
            | SkillMechanic::Execution { .. } => {}
        }
    }

    /// Pool the MP of the user and its living allies and share it out evenly,
    /// respecting each maximum. Earlier roster entries get the remainder.
    fn redistribute_mp(&mut self, actor: CharacterId) {
        let mut members = vec![actor];
        members.extend(self.battle.allies_of(actor));
        let pool: Vec<(CharacterId, u32, u32)> = members
            .iter()
            .filter_map(|id| {
                let c = self.battle.character(*id)?;
                Some((*id, c.magic_points?, c.max_magic_points?))
            })
            .collect();
        if pool.len() < 2 {
            return;
        }

        let total: u32 = pool.iter().map(|(_, mp, _)| mp).sum();
        let share = total / pool.len() as u32;
        let mut targets: Vec<u32> = pool.iter().map(|(_, _, max)| share.min(*max)).collect();
        let mut leftover = total - targets.iter().sum::<u32>();
        for (slot, (_, _, max)) in targets.iter_mut().zip(&pool) {
            let room = max - *slot;
            let give = room.min(leftover);
            *slot += give;
            leftover -= give;
        }

        for ((id, before, _), after) in pool.into_iter().zip(targets) {
            if before == after {
                continue;
            }
            if let Some(character) = self.battle.character_mut(id) {
                character.magic_points = Some(after);
            }
            self.log.push(Effect::MpChanged {
                character_id: id,
                amount: after as i32 - before as i32,
                new_current: after,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::{BattleCharacter, BattleId};
    use crate::immunity::ImmunityType;
    use crate::modifiers::ModifierSpec;
    use crate::resistance::ResistanceType;
    use crate::skills::{StainBonus, StainUsage};
    use crate::stains::{StainCost, StainSlots};
    use crate::testing::ScriptedDice;

    struct Fixture {
        battle: Battle,
        config: EngineConfig,
        book: SkillBook,
        hero: CharacterId,
        foe: CharacterId,
    }

    fn fixture(skill: SkillDefinition) -> Fixture {
        let mut battle = Battle::new(BattleId(1), "Test");
        let hero = battle.add_character(
            BattleCharacter::player("Gustave", 120)
                .with_magic_points(5, 10)
                .with_gradient_points(30)
                .with_weapon_power(40)
                .with_skill(skill.id.clone()),
        );
        let foe = battle.add_character(BattleCharacter::npc("Lancer", 100));
        let mut book = SkillBook::new();
        book.insert(skill).unwrap();
        Fixture {
            battle,
            config: EngineConfig::default(),
            book,
            hero,
            foe,
        }
    }

    impl Fixture {
        fn use_skill(
            &mut self,
            dice: &mut ScriptedDice,
            skill: &str,
            target: Option<CharacterId>,
        ) -> Result<SkillOutcome, BattleError> {
            let engine = RulesEngine::new(&self.config, &self.book);
            let mut request = UseSkill::new(self.hero, skill);
            request.target = target;
            engine.use_skill(&mut self.battle, dice, &request)
        }

        fn hp(&self, id: CharacterId) -> u32 {
            self.battle.character(id).unwrap().health_points
        }
    }

    #[test]
    fn test_mp_cost_rejected_without_mutation() {
        let skill = SkillDefinition::new("nova", "Nova")
            .with_cost(SkillCost::Mp(8))
            .with_power(10);
        let mut f = fixture(skill);
        let mut dice = ScriptedDice::new();
        let foe = f.foe;

        let err = f.use_skill(&mut dice, "nova", Some(foe)).unwrap_err();

        assert!(matches!(
            err,
            BattleError::InsufficientResource {
                resource: Resource::MagicPoints,
                required: 8,
                available: 5
            }
        ));
        assert_eq!(f.hp(foe), 100);
        assert_eq!(f.battle.character(f.hero).unwrap().magic_points, Some(5));
    }

    #[test]
    fn test_gradient_cost() {
        let skill = SkillDefinition::new("burst", "Burst")
            .with_cost(SkillCost::Gradient(3))
            .with_power(10);
        let mut f = fixture(skill);
        let mut dice = ScriptedDice::new();
        let foe = f.foe;

        let err = f.use_skill(&mut dice, "burst", Some(foe)).unwrap_err();
        assert!(matches!(
            err,
            BattleError::InsufficientResource {
                resource: Resource::GradientCharges,
                required: 3,
                available: 2
            }
        ));

        f.battle.character_mut(f.hero).unwrap().gradient_points = Some(40);
        f.use_skill(&mut dice, "burst", Some(foe)).unwrap();
        assert_eq!(f.battle.character(f.hero).unwrap().gradient_points, Some(4));
    }

    #[test]
    fn test_not_owned_and_bad_target() {
        let skill = SkillDefinition::new("strike", "Strike").with_power(10);
        let mut f = fixture(skill.clone());
        f.book
            .insert(SkillDefinition::new("secret", "Secret").with_power(5))
            .unwrap();
        let mut dice = ScriptedDice::new();
        let foe = f.foe;
        let hero = f.hero;

        assert!(matches!(
            f.use_skill(&mut dice, "secret", Some(foe)),
            Err(BattleError::NotOwned { .. })
        ));
        assert!(matches!(
            f.use_skill(&mut dice, "strike", Some(hero)),
            Err(BattleError::InvalidTarget { .. })
        ));
        assert!(matches!(
            f.use_skill(&mut dice, "strike", Some(CharacterId(99))),
            Err(BattleError::InvalidTarget { .. })
        ));
        assert!(matches!(
            f.use_skill(&mut dice, "missing", Some(foe)),
            Err(BattleError::SkillNotFound(_))
        ));
    }

    #[test]
    fn test_damage_with_dice_and_multiple_hits() {
        let skill = SkillDefinition::new("flurry", "Flurry")
            .with_power(5)
            .with_dice("2d6")
            .with_hits(3);
        let mut f = fixture(skill);
        let mut dice = ScriptedDice::new().with_faces(&[4, 2]);
        let foe = f.foe;

        let outcome = f.use_skill(&mut dice, "flurry", Some(foe)).unwrap();

        assert_eq!(outcome.per_hit_damage, vec![11, 11, 11]);
        assert_eq!(f.hp(foe), 67);
    }

    #[test]
    fn test_critical_failure_spends_cost_only() {
        let skill = SkillDefinition::new("ember", "Ember")
            .with_cost(SkillCost::Mp(2))
            .with_dice("2d6")
            .with_power(5)
            .with_effect(EffectSpec::on_target(StatusType::Burning, 1, Some(3)));
        let mut f = fixture(skill);
        let mut dice = ScriptedDice::new().with_faces(&[1, 1]);
        let foe = f.foe;

        let outcome = f.use_skill(&mut dice, "ember", Some(foe)).unwrap();

        assert!(outcome.is_critical_failure());
        assert_eq!(outcome.total_damage(), 0);
        assert!(outcome.applied_effects.is_empty());
        assert_eq!(f.hp(foe), 100);
        assert_eq!(f.battle.character(f.hero).unwrap().magic_points, Some(3));
    }

    #[test]
    fn test_element_immunity_short_circuits() {
        let skill = SkillDefinition::new("frost", "Frost")
            .with_element(Element::Ice)
            .with_power(50);
        let mut f = fixture(skill);
        let (hero, foe) = (f.hero, f.foe);
        f.battle
            .resistances
            .upsert(foe, Element::Ice, ResistanceType::Immune, 1.0);
        f.battle
            .modifiers
            .add(hero, ModifierSpec::multiplier(ModifierType::All, 3.0));
        let mut dice = ScriptedDice::new();

        let outcome = f.use_skill(&mut dice, "frost", Some(foe)).unwrap();

        assert_eq!(outcome.per_hit_damage, vec![0]);
        assert_eq!(f.hp(foe), 100);
    }

    #[test]
    fn test_weak_element_then_modifiers() {
        let skill = SkillDefinition::new("flame", "Flame")
            .with_element(Element::Fire)
            .with_power(20);
        let mut f = fixture(skill);
        let (hero, foe) = (f.hero, f.foe);
        f.battle
            .resistances
            .upsert(foe, Element::Fire, ResistanceType::Weak, 1.5);
        f.battle
            .modifiers
            .add(hero, ModifierSpec::flat(ModifierType::Skill, 5));
        let mut dice = ScriptedDice::new();

        let outcome = f.use_skill(&mut dice, "flame", Some(foe)).unwrap();

        assert_eq!(outcome.per_hit_damage, vec![35]);
    }

    #[test]
    fn test_shield_absorbs_one_hit() {
        let skill = SkillDefinition::new("double", "Double").with_power(10).with_hits(2);
        let mut f = fixture(skill);
        let foe = f.foe;
        f.battle.statuses.stack(foe, StatusType::Shielded, 1, None);
        let mut dice = ScriptedDice::new();

        let outcome = f.use_skill(&mut dice, "double", Some(foe)).unwrap();

        assert_eq!(outcome.per_hit_damage, vec![0, 10]);
        assert!(!f.battle.statuses.has(foe, StatusType::Shielded));
        assert_eq!(f.hp(foe), 90);
    }

    #[test]
    fn test_blocked_effect_is_reported_not_error() {
        let skill = SkillDefinition::new("stun", "Stun")
            .with_effect(EffectSpec::on_target(StatusType::Stunned, 1, Some(1)));
        let mut f = fixture(skill);
        let foe = f.foe;
        f.battle
            .immunities
            .add(foe, StatusType::Stunned, ImmunityType::Immune, 0);
        let mut dice = ScriptedDice::new();

        let outcome = f.use_skill(&mut dice, "stun", Some(foe)).unwrap();

        assert_eq!(
            outcome.applied_effects[0].outcome,
            ApplyOutcome::Blocked(BlockReason::Immune)
        );
        assert!(outcome.log.iter().any(|e| matches!(e, Effect::StatusBlocked { .. })));
    }

    #[test]
    fn test_conditional_effect_on_burning_target() {
        let skill = SkillDefinition::new("sear", "Sear").with_conditional(
            EffectCondition::TargetHas(StatusType::Burning),
            EffectSpec::on_target(StatusType::FireVulnerability, 1, Some(2)),
        );
        let mut f = fixture(skill);
        let foe = f.foe;
        let mut dice = ScriptedDice::new();

        f.use_skill(&mut dice, "sear", Some(foe)).unwrap();
        assert!(!f.battle.statuses.has(foe, StatusType::FireVulnerability));

        f.battle.statuses.stack(foe, StatusType::Burning, 1, Some(3));
        f.use_skill(&mut dice, "sear", Some(foe)).unwrap();
        assert!(f.battle.statuses.has(foe, StatusType::FireVulnerability));
    }

    #[test]
    fn test_stain_bonus_and_generation() {
        let skill = SkillDefinition::new("prism", "Prism")
            .with_power(10)
            .with_stains(StainUsage {
                requires_all: false,
                consumes: vec![StainCost::new(Stain::Fire, 1)],
                generates: vec![Stain::Ice],
                bonus: Some(StainBonus {
                    damage_multiplier: 2.0,
                }),
            });
        let mut f = fixture(skill);
        let (hero, foe) = (f.hero, f.foe);
        f.battle.character_mut(hero).unwrap().stains = StainSlots::from_stains(&[Stain::Fire]);
        let mut dice = ScriptedDice::new();

        let first = f.use_skill(&mut dice, "prism", Some(foe)).unwrap();
        let second = f.use_skill(&mut dice, "prism", Some(foe)).unwrap();

        assert_eq!(first.per_hit_damage, vec![20]);
        assert_eq!(second.per_hit_damage, vec![10]);
        assert_eq!(f.battle.character(hero).unwrap().stains.count(Stain::Ice), 2);
    }

    #[test]
    fn test_requires_all_stains() {
        let skill = SkillDefinition::new("elemental", "Elemental")
            .with_power(10)
            .with_stains(StainUsage {
                requires_all: true,
                ..StainUsage::default()
            });
        let mut f = fixture(skill);
        let (hero, foe) = (f.hero, f.foe);
        f.battle.character_mut(hero).unwrap().stains =
            StainSlots::from_stains(&[Stain::Fire, Stain::Ice]);
        let mut dice = ScriptedDice::new();

        assert!(matches!(
            f.use_skill(&mut dice, "elemental", Some(foe)),
            Err(BattleError::InsufficientResource {
                resource: Resource::Stains,
                required: 4,
                available: 2
            })
        ));
    }

    #[test]
    fn test_burn_scaling_and_marked_bonus() {
        let skill = SkillDefinition::new("hunt", "Hunt")
            .with_power(10)
            .with_mechanic(SkillMechanic::BurnScaling { per_stack: 0.1 })
            .with_mechanic(SkillMechanic::MarkedBonus {
                multiplier: 2.0,
                consume_mark: true,
            });
        let mut f = fixture(skill);
        let foe = f.foe;
        f.battle.statuses.stack(foe, StatusType::Burning, 5, Some(3));
        f.battle.statuses.stack(foe, StatusType::Marked, 1, Some(3));
        let mut dice = ScriptedDice::new();

        let outcome = f.use_skill(&mut dice, "hunt", Some(foe)).unwrap();

        assert_eq!(outcome.per_hit_damage, vec![30]);
        assert!(!f.battle.statuses.has(foe, StatusType::Marked));
    }

    #[test]
    fn test_execution_threshold() {
        let skill = SkillDefinition::new("reap", "Reap")
            .with_power(60)
            .with_mechanic(SkillMechanic::Execution {
                threshold_percent: 50,
            });
        let mut f = fixture(skill);
        let foe = f.foe;
        let mut dice = ScriptedDice::new();

        let outcome = f.use_skill(&mut dice, "reap", Some(foe)).unwrap();

        assert_eq!(f.hp(foe), 0);
        assert!(outcome.log.iter().any(|e| matches!(e, Effect::Executed { .. })));
    }

    #[test]
    fn test_stance_set_and_self_target() {
        let skill = SkillDefinition::new("guard", "Guard")
            .with_target(TargetScope::SelfOnly)
            .with_stance(StanceChange::Set(Stance::Defensive))
            .with_effect(EffectSpec::on_actor(StatusType::Protected, 1, Some(2)));
        let mut f = fixture(skill);
        let hero = f.hero;
        let mut dice = ScriptedDice::new();

        let outcome = f.use_skill(&mut dice, "guard", None).unwrap();

        assert_eq!(outcome.target, hero);
        assert_eq!(
            f.battle.character(hero).unwrap().stance,
            Some(Stance::Defensive)
        );
        assert!(f.battle.statuses.has(hero, StatusType::Protected));
    }

    #[test]
    fn test_redistribute_mp() {
        let skill = SkillDefinition::new("share", "Share")
            .with_target(TargetScope::SelfOnly)
            .with_mechanic(SkillMechanic::RedistributeMp);
        let mut f = fixture(skill);
        let hero = f.hero;
        let ally = f
            .battle
            .add_character(BattleCharacter::player("Maelle", 90).with_magic_points(1, 10));
        let mut dice = ScriptedDice::new();

        f.use_skill(&mut dice, "share", None).unwrap();

        assert_eq!(f.battle.character(hero).unwrap().magic_points, Some(3));
        assert_eq!(f.battle.character(ally).unwrap().magic_points, Some(3));
    }

    #[test]
    fn test_cleanse_and_copy_buffs() {
        let skill = SkillDefinition::new("purify", "Purify")
            .with_target(TargetScope::Ally)
            .with_mechanic(SkillMechanic::CleanseAndCopyBuffs);
        let mut f = fixture(skill);
        let hero = f.hero;
        let ally = f
            .battle
            .add_character(BattleCharacter::player("Sciel", 90));
        f.battle.statuses.stack(ally, StatusType::Cursed, 1, Some(3));
        f.battle.statuses.stack(hero, StatusType::Hastened, 1, Some(2));
        let mut dice = ScriptedDice::new();

        f.use_skill(&mut dice, "purify", Some(ally)).unwrap();

        assert!(!f.battle.statuses.has(ally, StatusType::Cursed));
        assert!(f.battle.statuses.has(ally, StatusType::Hastened));
    }

    #[test]
    fn test_basic_attack_first_hit_and_burning_shots() {
        let mut f = fixture(SkillDefinition::new("noop", "Noop"));
        let (hero, foe) = (f.hero, f.foe);
        f.battle.character_mut(hero).unwrap().pictos = vec![Some(BURNING_SHOTS.to_string())];
        f.battle
            .modifiers
            .add(hero, ModifierSpec::flat(ModifierType::FirstHit, 10));
        let engine = RulesEngine::new(&f.config, &f.book);
        let mut dice = ScriptedDice::new();

        let first = engine
            .basic_attack(&mut f.battle, &mut dice, hero, foe, AttackCategory::Basic)
            .unwrap();
        let second = engine
            .basic_attack(&mut f.battle, &mut dice, hero, foe, AttackCategory::Basic)
            .unwrap();

        assert!(first.is_first_hit);
        assert_eq!(first.damage, 50);
        assert!(!second.is_first_hit);
        assert_eq!(second.damage, 40);
        assert_eq!(f.battle.statuses.amount_of(foe, StatusType::Burning), 1);
    }

    #[test]
    fn test_second_chance_survives_once() {
        let mut f = fixture(SkillDefinition::new("noop", "Noop"));
        let (hero, foe) = (f.hero, f.foe);
        f.battle.character_mut(foe).unwrap().pictos = vec![Some(SECOND_CHANCE.to_string())];
        f.battle.character_mut(hero).unwrap().weapon_power = 150;
        let engine = RulesEngine::new(&f.config, &f.book);
        let mut dice = ScriptedDice::new();

        engine
            .basic_attack(&mut f.battle, &mut dice, hero, foe, AttackCategory::Basic)
            .unwrap();
        assert_eq!(f.hp(foe), 1);

        engine
            .basic_attack(&mut f.battle, &mut dice, hero, foe, AttackCategory::Counter)
            .unwrap();
        assert_eq!(f.hp(foe), 0);
    }

    #[test]
    fn test_resolve_burning() {
        let mut f = fixture(SkillDefinition::new("noop", "Noop"));
        let foe = f.foe;
        f.battle.statuses.stack(foe, StatusType::Burning, 2, Some(3));
        let engine = RulesEngine::new(&f.config, &f.book);
        let mut dice = ScriptedDice::new().with_faces(&[5, 6]);

        let burn = engine.resolve_burning(&mut f.battle, &mut dice, foe).unwrap();

        assert_eq!(burn.damage, 11);
        assert_eq!(burn.remaining_stacks, 1);
        assert_eq!(f.hp(foe), 89);
    }

    #[test]
    fn test_huge_power_saturates_instead_of_overflowing() {
        let skill = SkillDefinition::new("cataclysm", "Cataclysm")
            .with_dice("2d6")
            .with_power(u32::MAX)
            .with_mechanic(SkillMechanic::CriticalBonus {
                per_critical: u32::MAX,
            });
        let mut f = fixture(skill);
        let foe = f.foe;
        let mut dice = ScriptedDice::new().with_faces(&[6, 6]);

        let outcome = f.use_skill(&mut dice, "cataclysm", Some(foe)).unwrap();

        assert_eq!(outcome.per_hit_damage.len(), 1);
        assert!(outcome.total_damage() >= 100);
        assert_eq!(f.hp(foe), 0);
    }

    #[test]
    fn test_burning_roll_is_capped() {
        let mut f = fixture(SkillDefinition::new("noop", "Noop"));
        let foe = f.foe;
        f.battle
            .statuses
            .stack(foe, StatusType::Burning, u32::MAX, Some(3));
        let engine = RulesEngine::new(&f.config, &f.book);
        let mut dice = ScriptedDice::new();

        let burn = engine.resolve_burning(&mut f.battle, &mut dice, foe).unwrap();

        let rolled: usize = burn.dice.groups.iter().map(|g| g.rolls.len()).sum();
        assert_eq!(rolled, MAX_DICE as usize);
        assert_eq!(f.hp(foe), 0);
    }
}
