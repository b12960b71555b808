//! Property tests for the rules laws that must hold for every input.
//!
//! Run with: `cargo test -p expedition-core --test properties`

use expedition_core::battle::{Battle, BattleCharacter, BattleId};
use expedition_core::config::EngineConfig;
use expedition_core::dice::{self, RollGroup};
use expedition_core::modifiers::{AttackCategory, DamageContext, ModifierSpec, ModifierType};
use expedition_core::passives::TriggerScope;
use expedition_core::resistance::{Element, ElementFactor, ResistanceType};
use expedition_core::stains::{Stain, StainCost, StainSlots};
use proptest::prelude::*;

fn face() -> impl Strategy<Value = u32> {
    1u32..=6
}

fn groups() -> impl Strategy<Value = Vec<RollGroup>> {
    prop::collection::vec(prop::collection::vec(face(), 0..6), 0..4).prop_map(|groups| {
        groups
            .iter()
            .map(|values| RollGroup::from_values(values).expect("faces are in range"))
            .collect()
    })
}

fn stain() -> impl Strategy<Value = Stain> {
    prop_oneof![
        Just(Stain::Lightning),
        Just(Stain::Earth),
        Just(Stain::Fire),
        Just(Stain::Ice),
        Just(Stain::Light),
    ]
}

fn slots() -> impl Strategy<Value = StainSlots> {
    prop::collection::vec(prop::option::of(stain()), 4).prop_map(|v| {
        let mut slots = StainSlots::default();
        for (slot, value) in slots.slots.iter_mut().zip(v) {
            *slot = value;
        }
        slots
    })
}

fn modifier() -> impl Strategy<Value = ModifierSpec> {
    prop_oneof![
        prop::sample::select(vec![0.5f64, 0.75, 1.25, 1.5, 2.0])
            .prop_map(|m| ModifierSpec::multiplier(ModifierType::All, m)),
        (-20i32..40).prop_map(|f| ModifierSpec::flat(ModifierType::BaseAttack, f)),
    ]
}

proptest! {
    #[test]
    fn test_criticals_and_failures_cancel(groups in groups(), count_fives in any::<bool>()) {
        let crits = dice::count_criticals(&groups, count_fives);
        let fails = dice::count_failures(&groups);
        if !count_fives {
            prop_assert!(crits == 0 || fails == 0);
        }
        let faces: Vec<u32> = groups.iter().flat_map(|g| g.rolls.iter().map(|f| f.value)).collect();
        let sixes = faces.iter().filter(|v| **v == 6).count() as u32;
        let ones = faces.iter().filter(|v| **v == 1).count() as u32;
        prop_assert_eq!(fails, ones.saturating_sub(sixes));
        prop_assert_eq!(dice::total(&groups), faces.iter().sum::<u32>());
    }

    #[test]
    fn test_critical_failure_iff_all_ones(groups in groups()) {
        let faces: Vec<u32> = groups.iter().flat_map(|g| g.rolls.iter().map(|f| f.value)).collect();
        let expected = !faces.is_empty() && faces.iter().all(|v| *v == 1);
        prop_assert_eq!(dice::is_critical_failure(&groups), expected);
    }

    #[test]
    fn test_modifier_order_is_irrelevant(
        base in 0u32..500,
        mods in prop::collection::vec(modifier(), 0..6),
    ) {
        let config = EngineConfig::default();
        let mut forward = Battle::new(BattleId(1), "Forward");
        let mut reverse = Battle::new(BattleId(2), "Reverse");
        let a = forward.add_character(BattleCharacter::player("Gustave", 100));
        let b = reverse.add_character(BattleCharacter::player("Gustave", 100));
        for spec in &mods {
            forward.modifiers.add(a, spec.clone());
        }
        for spec in mods.iter().rev() {
            reverse.modifiers.add(b, spec.clone());
        }

        let ctx = DamageContext::default();
        let left = forward.calculate_modified_damage(a, base, AttackCategory::Basic, &ctx, &config);
        let right = reverse.calculate_modified_damage(b, base, AttackCategory::Basic, &ctx, &config);
        prop_assert_eq!(left, right);

        let scaled: f64 = mods.iter().fold(base as f64, |acc, m| acc * m.multiplier);
        let flat: i64 = mods.iter().map(|m| m.flat_bonus as i64).sum();
        prop_assert_eq!(left, (scaled + flat as f64).round().max(0.0) as u32);
    }

    #[test]
    fn test_immune_element_always_zero(damage in 0u32..10_000, multiplier in 0.0f64..5.0) {
        let mut battle = Battle::new(BattleId(1), "Test");
        let foe = battle.add_character(BattleCharacter::npc("Golem", 100));
        battle.resistances.upsert(foe, Element::Earth, ResistanceType::Immune, multiplier);
        let factor = battle.resistances.resolve(foe, Element::Earth);
        prop_assert_eq!(factor, ElementFactor::Immune);
        prop_assert_eq!(factor.apply(damage), 0);
    }

    #[test]
    fn test_consume_never_partial(slots in slots(), wanted in stain(), count in 1u32..5) {
        let mut after = slots;
        let report = after.consume(&[StainCost::new(wanted, count)]);
        let available = if wanted == Stain::Light {
            slots.count(Stain::Light)
        } else {
            slots.count(wanted) + slots.count(Stain::Light)
        };
        if available < count {
            prop_assert_eq!(after, slots);
            prop_assert_eq!(report.skipped.len(), 1);
        } else {
            let filled = |s: &StainSlots| s.slots.iter().filter(|x| x.is_some()).count() as u32;
            prop_assert_eq!(filled(&slots) - filled(&after), count);
        }
    }

    #[test]
    fn test_add_never_evicts_light(slots in slots(), incoming in stain()) {
        let mut after = slots;
        let lost = after.add(&[incoming]);
        let all_light = slots.slots.iter().all(|s| *s == Some(Stain::Light));
        if all_light {
            prop_assert_eq!(lost, vec![incoming]);
            prop_assert_eq!(after, slots);
        } else {
            prop_assert!(lost.is_empty());
            prop_assert!(after.count(Stain::Light) >= slots.count(Stain::Light));
        }
    }

    #[test]
    fn test_once_per_battle_fires_once(turns in prop::collection::vec(1u32..50, 1..10)) {
        let mut battle = Battle::new(BattleId(1), "Test");
        let hero = battle.add_character(BattleCharacter::player("Maelle", 100));
        battle.trackers.track(hero, "second-chance", TriggerScope::OncePerBattle, turns[0]);
        for turn in turns {
            prop_assert!(!battle.trackers.can_activate(
                hero,
                "second-chance",
                TriggerScope::OncePerBattle,
                turn
            ));
        }
    }

    #[test]
    fn test_once_per_turn_rearms_next_turn(turn in 1u32..1000) {
        let mut battle = Battle::new(BattleId(1), "Test");
        let hero = battle.add_character(BattleCharacter::player("Verso", 100));
        battle.trackers.track(hero, "energising-crits", TriggerScope::OncePerTurn, turn);
        prop_assert!(!battle.trackers.can_activate(hero, "energising-crits", TriggerScope::OncePerTurn, turn));
        prop_assert!(battle.trackers.can_activate(hero, "energising-crits", TriggerScope::OncePerTurn, turn + 1));
    }
}
