//! Turn-based battle resolution engine for tabletop expedition campaigns.
//!
//! This crate provides:
//! - Dice evaluation with criticals, failures and critical failures
//! - Skill resolution: costs, damage pipeline, status effects, stains
//! - Element resistances, status immunities and anti-status pictos
//! - Turn order, initiative and per-turn status expiry
//! - Transactional, per-battle serialized state with JSON save files
//!
//! # Quick Start
//!
//! ```ignore
//! use expedition_core::{BattleCharacter, BattleEngine, EngineConfig, SkillBook, UseSkill};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let skills = SkillBook::from_json(include_str!("skills.json"))?;
//!     let engine = BattleEngine::new(EngineConfig::default(), skills)?;
//!
//!     let battle = engine.create_battle("Gestral Beach").await;
//!     let hero = engine
//!         .add_character(battle, BattleCharacter::player("Gustave", 120).with_skill("overcharge"))
//!         .await?;
//!     let foe = engine.add_character(battle, BattleCharacter::npc("Lancer", 80)).await?;
//!     engine.start_battle(battle).await?;
//!
//!     let outcome = engine.use_skill(battle, UseSkill::new(hero, "overcharge").on(foe)).await?;
//!     println!("{}", outcome.narrative);
//!     Ok(())
//! }
//! ```

pub mod battle;
pub mod config;
pub mod dice;
pub mod engine;
pub mod error;
pub mod immunity;
pub mod modifiers;
pub mod passives;
pub mod persist;
pub mod resistance;
pub mod rules;
pub mod skills;
pub mod stains;
pub mod status;
pub mod store;
pub mod testing;
pub mod turns;

// Primary public API
pub use battle::{Battle, BattleCharacter, BattleId, CharacterId, CharacterKind, Stance};
pub use config::{ConfigError, EngineConfig};
pub use dice::{DiceExpression, DiceOutcome, DiceSource, RngDice};
pub use engine::BattleEngine;
pub use error::{BattleError, Resource};
pub use modifiers::{AttackCategory, ModifierCondition, ModifierSpec, ModifierType};
pub use resistance::{Element, ResistanceType};
pub use rules::{Effect, RulesEngine, SkillOutcome, UseSkill};
pub use skills::{SkillBook, SkillDefinition, SkillId};
pub use stains::{Stain, StainSlots};
pub use status::{ApplyOutcome, StatusType};
pub use store::{ActionToken, BattleStore};
pub use testing::{BattleHarness, ScriptedDice};
