//! Save/load tests through the engine.
//!
//! Run with: `cargo test -p expedition-core --test persistence`

use expedition_core::persist::list_saves;
use expedition_core::status::StatusType;
use expedition_core::testing::{sample_enemy, sample_player, sample_skill_book, ScriptedDice};
use expedition_core::{BattleEngine, BattleError, EngineConfig, Stain, UseSkill};
use tempfile::TempDir;

fn engine() -> BattleEngine {
    BattleEngine::new(EngineConfig::default(), sample_skill_book())
        .expect("default config is valid")
        .with_dice(ScriptedDice::new().with_faces(&[3, 3]))
}

#[tokio::test]
async fn test_save_and_resume_battle() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = engine();
    let battle = engine.create_battle("Flying Waters").await;
    let hero = engine
        .add_character(battle, sample_player("Lune").with_skill("fireball"))
        .await
        .unwrap();
    let foe = engine
        .add_character(battle, sample_enemy("Nevron", 100))
        .await
        .unwrap();
    engine
        .add_stains(battle, hero, &[Stain::Fire, Stain::Ice])
        .await
        .unwrap();
    engine.start_battle(battle).await.unwrap();
    engine
        .use_skill(battle, UseSkill::new(hero, "fireball").on(foe))
        .await
        .unwrap();
    engine.advance_turn(battle).await.unwrap();

    let path = engine.save_battle(battle, temp_dir.path()).await.unwrap();
    let before = engine.end_battle(battle).await.unwrap();
    let restored = engine.load_battle(&path).await.unwrap();
    let after = engine.snapshot(restored).await.unwrap();

    assert_eq!(restored, battle);
    assert_eq!(after.round, before.round);
    assert_eq!(after.turns.order(), before.turns.order());
    assert_eq!(
        after.character(foe).unwrap().health_points,
        before.character(foe).unwrap().health_points
    );
    assert!(after.statuses.has(foe, StatusType::Burning));
    assert_eq!(after.character(hero).unwrap().stains.count(Stain::Fire), 1);
}

#[tokio::test]
async fn test_load_into_occupied_id_fails() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = engine();
    let battle = engine.create_battle("Lumière").await;
    let path = engine.save_battle(battle, temp_dir.path()).await.unwrap();

    let err = engine.load_battle(&path).await.unwrap_err();

    assert!(matches!(err, BattleError::Storage(_)));
    assert!(!err.is_rejection());
}

#[tokio::test]
async fn test_list_saves_after_engine_saves() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = engine();
    for name in ["Spring Meadows", "Old Lumière", "Visages"] {
        let battle = engine.create_battle(name).await;
        engine.save_battle(battle, temp_dir.path()).await.unwrap();
    }

    let saves = list_saves(temp_dir.path()).await.unwrap();

    let names: Vec<&str> = saves.iter().map(|s| s.metadata.name.as_str()).collect();
    assert_eq!(names, vec!["Spring Meadows", "Old Lumière", "Visages"]);
}
