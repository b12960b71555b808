//! BattleEngine - the primary public API for battle resolution.
//!
//! This module wraps the battle store, the skill book, the rules engine and
//! the dice source into a single async interface. Every mutating call runs
//! inside one store transaction, so a failed operation leaves the battle
//! exactly as it was.

use crate::battle::{Battle, BattleCharacter, BattleId, CharacterId};
use crate::config::{ConfigError, EngineConfig};
use crate::dice::{DiceSource, RngDice};
use crate::error::BattleError;
use crate::immunity::ImmunityType;
use crate::modifiers::{AttackCategory, ModifierId, ModifierSpec};
use crate::persist::{battle_save_path, SavedBattle};
use crate::resistance::{Element, ResistanceType};
use crate::rules::{AppliedEffect, AttackOutcome, BurnResolution, RulesEngine, SkillOutcome, UseSkill};
use crate::skills::SkillBook;
use crate::stains::{ConsumeReport, Stain, StainCost};
use crate::status::StatusType;
use crate::store::{BattleStore, StoreError};
use crate::turns::{InitiativeEntry, InitiativeRoll, TurnAdvance};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// The battle engine.
///
/// Holds every live battle and resolves actions against them. Battles are
/// independent; actions on the same battle run one at a time.
pub struct BattleEngine {
    store: BattleStore,
    skills: SkillBook,
    config: EngineConfig,
    dice: Mutex<Box<dyn DiceSource>>,
}

impl BattleEngine {
    /// Create an engine with entropy-seeded dice.
    pub fn new(config: EngineConfig, skills: SkillBook) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store: BattleStore::new(),
            skills,
            config,
            dice: Mutex::new(Box::new(RngDice::from_entropy())),
        })
    }

    /// Replace the dice source, e.g. with seeded or scripted dice.
    pub fn with_dice(self, dice: impl DiceSource + 'static) -> Self {
        Self {
            dice: Mutex::new(Box::new(dice)),
            ..self
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn skills(&self) -> &SkillBook {
        &self.skills
    }

    fn rules(&self) -> RulesEngine<'_> {
        RulesEngine::new(&self.config, &self.skills)
    }

    fn dice(&self) -> MutexGuard<'_, Box<dyn DiceSource>> {
        self.dice.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========================================================================
    // Battle lifecycle
    // ========================================================================

    pub async fn create_battle(&self, name: impl Into<String>) -> BattleId {
        let name = name.into();
        let id = self.store.create(name.as_str()).await;
        tracing::info!(battle = %id, %name, "battle created");
        id
    }

    /// End a battle and drop all of its state. Returns the final battle.
    pub async fn end_battle(&self, battle_id: BattleId) -> Result<Battle, BattleError> {
        let battle = self.store.remove(battle_id).await.map_err(missing_battle)?;
        tracing::info!(battle = %battle_id, round = battle.round, "battle ended");
        Ok(battle)
    }

    pub async fn battles(&self) -> Vec<BattleId> {
        self.store.ids().await
    }

    /// A consistent copy of a battle.
    pub async fn snapshot(&self, battle_id: BattleId) -> Result<Battle, BattleError> {
        self.store.snapshot(battle_id).await.map_err(missing_battle)
    }

    pub async fn character(
        &self,
        battle_id: BattleId,
        character_id: CharacterId,
    ) -> Result<BattleCharacter, BattleError> {
        self.snapshot(battle_id)
            .await?
            .character(character_id)
            .cloned()
            .ok_or(BattleError::CharacterNotFound(character_id))
    }

    pub async fn add_character(
        &self,
        battle_id: BattleId,
        character: BattleCharacter,
    ) -> Result<CharacterId, BattleError> {
        let id = self
            .transact(battle_id, |battle| Ok(battle.add_character(character)))
            .await?;
        tracing::debug!(battle = %battle_id, character = %id, "character joined");
        Ok(id)
    }

    pub async fn remove_character(
        &self,
        battle_id: BattleId,
        character_id: CharacterId,
    ) -> Result<BattleCharacter, BattleError> {
        self.transact(battle_id, |battle| {
            battle
                .remove_character(character_id)
                .ok_or(BattleError::CharacterNotFound(character_id))
        })
        .await
    }

    /// Save a battle as JSON under `dir`. Returns the file written.
    pub async fn save_battle(
        &self,
        battle_id: BattleId,
        dir: impl AsRef<Path>,
    ) -> Result<PathBuf, BattleError> {
        let battle = self.snapshot(battle_id).await?;
        let path = battle_save_path(dir, &battle);
        SavedBattle::new(battle)
            .save_json(&path)
            .await
            .map_err(StoreError::from)?;
        tracing::info!(battle = %battle_id, path = %path.display(), "battle saved");
        Ok(path)
    }

    /// Load a saved battle into the store under its saved id.
    pub async fn load_battle(&self, path: impl AsRef<Path>) -> Result<BattleId, BattleError> {
        let path = path.as_ref();
        let saved = SavedBattle::load_json(path)
            .await
            .map_err(StoreError::from)?;
        let id = self.store.insert(saved.battle).await?;
        tracing::info!(battle = %id, path = %path.display(), "battle loaded");
        Ok(id)
    }

    // ========================================================================
    // Actions
    // ========================================================================

    /// Use a skill.
    ///
    /// A request carrying an [`ActionToken`](crate::store::ActionToken) that
    /// already succeeded returns the recorded outcome without touching the
    /// battle again.
    pub async fn use_skill(
        &self,
        battle_id: BattleId,
        request: UseSkill,
    ) -> Result<SkillOutcome, BattleError> {
        let rules = self.rules();
        let result = self
            .store
            .transaction_once(battle_id, request.token, |battle| {
                rules.use_skill(battle, &mut **self.dice(), &request)
            })
            .await;
        log_rejection(battle_id, "use_skill", result)
    }

    /// Resolve a weapon attack.
    pub async fn basic_attack(
        &self,
        battle_id: BattleId,
        actor: CharacterId,
        target: CharacterId,
        category: AttackCategory,
    ) -> Result<AttackOutcome, BattleError> {
        let rules = self.rules();
        let result = self
            .transact(battle_id, |battle| {
                rules.basic_attack(battle, &mut **self.dice(), actor, target, category)
            })
            .await;
        log_rejection(battle_id, "basic_attack", result)
    }

    /// Apply a status through the anti-status and immunity gates.
    pub async fn apply_status(
        &self,
        battle_id: BattleId,
        target: CharacterId,
        status: StatusType,
        amount: u32,
        turns: Option<u32>,
    ) -> Result<AppliedEffect, BattleError> {
        let rules = self.rules();
        self.transact(battle_id, |battle| {
            rules.apply_status(battle, &mut **self.dice(), target, status, amount, turns)
        })
        .await
    }

    /// Reduce a status by a resolved magnitude. Returns the remaining amount.
    pub async fn resolve_status(
        &self,
        battle_id: BattleId,
        character_id: CharacterId,
        status: StatusType,
        total_value: u32,
    ) -> Result<u32, BattleError> {
        let rules = self.rules();
        self.transact(battle_id, |battle| {
            rules.resolve_status(battle, character_id, status, total_value)
        })
        .await
    }

    pub async fn resolve_burning(
        &self,
        battle_id: BattleId,
        character_id: CharacterId,
    ) -> Result<BurnResolution, BattleError> {
        let rules = self.rules();
        self.transact(battle_id, |battle| {
            rules.resolve_burning(battle, &mut **self.dice(), character_id)
        })
        .await
    }

    /// Remove every negative status from a character.
    pub async fn cleanse_all(
        &self,
        battle_id: BattleId,
        character_id: CharacterId,
    ) -> Result<Vec<StatusType>, BattleError> {
        self.transact(battle_id, |battle| {
            require_character(battle, character_id)?;
            Ok(battle.statuses.cleanse_all(character_id))
        })
        .await
    }

    // ========================================================================
    // Turns and initiative
    // ========================================================================

    /// Build the turn queue from initiative and start round 1.
    pub async fn start_battle(&self, battle_id: BattleId) -> Result<Vec<CharacterId>, BattleError> {
        let order = self
            .transact(battle_id, |battle| Ok(battle.start_battle()))
            .await?;
        tracing::info!(battle = %battle_id, combatants = order.len(), "battle started");
        Ok(order)
    }

    pub async fn advance_turn(&self, battle_id: BattleId) -> Result<TurnAdvance, BattleError> {
        let advance = self
            .transact(battle_id, |battle| Ok(battle.advance_turn()))
            .await?;
        tracing::info!(
            battle = %battle_id,
            ended = ?advance.ended,
            round = advance.round,
            expired = advance.expired.len(),
            "turn advanced"
        );
        Ok(advance)
    }

    pub async fn roll_initiative(
        &self,
        battle_id: BattleId,
        character_id: CharacterId,
    ) -> Result<InitiativeRoll, BattleError> {
        let die_count = self.config.initiative_dice;
        self.transact(battle_id, |battle| {
            battle.roll_initiative(character_id, die_count, &mut **self.dice())
        })
        .await
    }

    /// Replace the turn order with a permutation of the current one.
    pub async fn reorder_turns(
        &self,
        battle_id: BattleId,
        order: &[CharacterId],
    ) -> Result<Vec<CharacterId>, BattleError> {
        self.transact(battle_id, |battle| {
            battle.turns.reorder(order)?;
            Ok(battle.turns.order())
        })
        .await
    }

    pub async fn reorder_initiative(
        &self,
        battle_id: BattleId,
        order: &[CharacterId],
    ) -> Result<Vec<InitiativeEntry>, BattleError> {
        self.transact(battle_id, |battle| {
            battle.initiative.reorder(order)?;
            Ok(battle.initiative.entries.clone())
        })
        .await
    }

    pub async fn set_play_first(
        &self,
        battle_id: BattleId,
        character_id: CharacterId,
        play_first: bool,
    ) -> Result<Vec<InitiativeEntry>, BattleError> {
        self.transact(battle_id, |battle| {
            battle.set_play_first(character_id, play_first)
        })
        .await
    }

    // ========================================================================
    // Tables
    // ========================================================================

    pub async fn set_resistance(
        &self,
        battle_id: BattleId,
        character_id: CharacterId,
        element: Element,
        resistance_type: ResistanceType,
        damage_multiplier: f64,
    ) -> Result<(), BattleError> {
        self.transact(battle_id, |battle| {
            require_character(battle, character_id)?;
            battle
                .resistances
                .upsert(character_id, element, resistance_type, damage_multiplier);
            Ok(())
        })
        .await
    }

    pub async fn remove_resistance(
        &self,
        battle_id: BattleId,
        character_id: CharacterId,
        element: Element,
    ) -> Result<bool, BattleError> {
        self.transact(battle_id, |battle| {
            Ok(battle.resistances.remove(character_id, element))
        })
        .await
    }

    pub async fn add_immunity(
        &self,
        battle_id: BattleId,
        character_id: CharacterId,
        status: StatusType,
        immunity_type: ImmunityType,
        resist_chance: u32,
    ) -> Result<(), BattleError> {
        self.transact(battle_id, |battle| {
            require_character(battle, character_id)?;
            battle
                .immunities
                .add(character_id, status, immunity_type, resist_chance);
            Ok(())
        })
        .await
    }

    pub async fn remove_immunity(
        &self,
        battle_id: BattleId,
        character_id: CharacterId,
        status: StatusType,
    ) -> Result<usize, BattleError> {
        self.transact(battle_id, |battle| {
            Ok(battle.immunities.remove(character_id, status))
        })
        .await
    }

    pub async fn add_modifier(
        &self,
        battle_id: BattleId,
        character_id: CharacterId,
        spec: ModifierSpec,
    ) -> Result<ModifierId, BattleError> {
        self.transact(battle_id, |battle| {
            require_character(battle, character_id)?;
            Ok(battle.modifiers.add(character_id, spec))
        })
        .await
    }

    pub async fn remove_modifier(
        &self,
        battle_id: BattleId,
        modifier_id: ModifierId,
    ) -> Result<bool, BattleError> {
        self.transact(battle_id, |battle| Ok(battle.modifiers.remove(modifier_id)))
            .await
    }

    pub async fn set_modifier_active(
        &self,
        battle_id: BattleId,
        modifier_id: ModifierId,
        active: bool,
    ) -> Result<bool, BattleError> {
        self.transact(battle_id, |battle| {
            Ok(battle.modifiers.set_active(modifier_id, active))
        })
        .await
    }

    /// Add stains to a character. Returns the stains that were lost.
    pub async fn add_stains(
        &self,
        battle_id: BattleId,
        character_id: CharacterId,
        stains: &[Stain],
    ) -> Result<Vec<Stain>, BattleError> {
        self.transact(battle_id, |battle| {
            let character = battle
                .character_mut(character_id)
                .ok_or(BattleError::CharacterNotFound(character_id))?;
            Ok(character.stains.add(stains))
        })
        .await
    }

    pub async fn consume_stains(
        &self,
        battle_id: BattleId,
        character_id: CharacterId,
        requirements: &[StainCost],
    ) -> Result<ConsumeReport, BattleError> {
        self.transact(battle_id, |battle| {
            let character = battle
                .character_mut(character_id)
                .ok_or(BattleError::CharacterNotFound(character_id))?;
            Ok(character.stains.consume(requirements))
        })
        .await
    }

    async fn transact<T, F>(&self, battle_id: BattleId, operation: F) -> Result<T, BattleError>
    where
        F: FnOnce(&mut Battle) -> Result<T, BattleError>,
    {
        self.store
            .transaction(battle_id, operation)
            .await
            .map_err(missing_battle)
    }
}

fn require_character(battle: &Battle, character_id: CharacterId) -> Result<(), BattleError> {
    battle
        .character(character_id)
        .map(|_| ())
        .ok_or(BattleError::CharacterNotFound(character_id))
}

/// Surface a missing battle as the operation-level not-found error.
fn missing_battle<E: Into<BattleError>>(err: E) -> BattleError {
    match err.into() {
        BattleError::Storage(StoreError::BattleMissing(id)) => BattleError::BattleNotFound(id),
        other => other,
    }
}

fn log_rejection<T>(
    battle_id: BattleId,
    operation: &str,
    result: Result<T, BattleError>,
) -> Result<T, BattleError> {
    if let Err(e) = &result {
        if e.is_rejection() {
            tracing::warn!(battle = %battle_id, operation, error = %e, "action rejected");
        }
    }
    result
}
