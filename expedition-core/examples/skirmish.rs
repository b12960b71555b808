//! Run a short seeded skirmish and print the combat log.

use expedition_core::modifiers::AttackCategory;
use expedition_core::testing::{sample_enemy, sample_player, sample_skill_book};
use expedition_core::{BattleEngine, EngineConfig, RngDice, UseSkill};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let engine = BattleEngine::new(EngineConfig::default(), sample_skill_book())?
        .with_dice(RngDice::seeded(7));

    let battle = engine.create_battle("Gestral Beach").await;
    let hero = engine
        .add_character(battle, sample_player("Lune").with_skill("fireball"))
        .await?;
    let foe = engine
        .add_character(battle, sample_enemy("Nevron", 90))
        .await?;

    for id in [hero, foe] {
        let roll = engine.roll_initiative(battle, id).await?;
        println!("Initiative for #{id}: {}", roll.value);
    }
    let order = engine.start_battle(battle).await?;
    println!("Turn order: {order:?}\n");

    let outcome = engine
        .use_skill(battle, UseSkill::new(hero, "fireball").on(foe))
        .await?;
    println!("{}", outcome.narrative);
    for effect in &outcome.log {
        println!("  {effect}");
    }

    while !engine.character(battle, foe).await?.is_defeated() {
        let burn = engine.resolve_burning(battle, foe).await?;
        if burn.damage == 0 {
            let attack = engine
                .basic_attack(battle, hero, foe, AttackCategory::Basic)
                .await?;
            println!("Lune swings for {}", attack.damage);
        } else {
            println!("Burning deals {} ({} stacks left)", burn.damage, burn.remaining_stacks);
        }
        let advance = engine.advance_turn(battle).await?;
        println!("Round {}", advance.round);
    }

    println!("\nNevron falls.");
    Ok(())
}
