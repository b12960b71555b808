//! Battle state types.
//!
//! A [`Battle`] is the single aggregate that owns every piece of mutable
//! combat state: the character arena plus the row tables for status effects,
//! damage modifiers, resistances, immunities, passive trackers and the turn
//! and initiative queues. Resolution code only ever mutates a battle through
//! `&mut Battle`, which the store hands out one transaction at a time.

use crate::immunity::StatusImmunityTable;
use crate::modifiers::ModifierStore;
use crate::passives::PassiveTracker;
use crate::resistance::ElementResistanceTable;
use crate::skills::SkillId;
use crate::stains::StainSlots;
use crate::status::StatusStore;
use crate::turns::{InitiativeQueue, TurnQueue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ID Types
// ============================================================================

/// Identifier for a battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BattleId(pub u64);

impl fmt::Display for BattleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Battle-scoped identifier for a combatant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CharacterId(pub u64);

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Character
// ============================================================================

/// Whether a combatant is driven by a player or is an NPC template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CharacterKind {
    Player,
    Npc,
}

/// Modal combat stance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stance {
    Defensive,
    Offensive,
    Virtuous,
}

impl Stance {
    pub fn name(&self) -> &'static str {
        match self {
            Stance::Defensive => "Defensive",
            Stance::Offensive => "Offensive",
            Stance::Virtuous => "Virtuous",
        }
    }
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Stance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "defensive" => Ok(Stance::Defensive),
            "offensive" => Ok(Stance::Offensive),
            "virtuous" => Ok(Stance::Virtuous),
            _ => Err(format!("unknown stance: {s}")),
        }
    }
}

/// One combatant instance inside one battle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleCharacter {
    pub id: CharacterId,
    /// Player id or NPC template id outside the battle.
    pub external_id: String,
    pub name: String,
    pub kind: CharacterKind,
    pub is_enemy: bool,
    pub health_points: u32,
    pub max_health_points: u32,
    pub magic_points: Option<u32>,
    pub max_magic_points: Option<u32>,
    pub charge_points: Option<u32>,
    pub max_charge_points: Option<u32>,
    pub gradient_points: Option<u32>,
    pub stance: Option<Stance>,
    pub stains: StainSlots,
    pub skills: Vec<SkillId>,
    /// Equipped pictos by slot; only the first few slots are active.
    pub pictos: Vec<Option<String>>,
    /// Power of a basic weapon attack.
    pub weapon_power: u32,
    /// Initiative tiebreak attribute.
    pub hability: i32,
}

impl BattleCharacter {
    pub fn new(name: impl Into<String>, kind: CharacterKind, max_health_points: u32) -> Self {
        let name = name.into();
        Self {
            id: CharacterId(0),
            external_id: name.to_lowercase(),
            name,
            kind,
            is_enemy: kind == CharacterKind::Npc,
            health_points: max_health_points,
            max_health_points,
            magic_points: None,
            max_magic_points: None,
            charge_points: None,
            max_charge_points: None,
            gradient_points: None,
            stance: None,
            stains: StainSlots::default(),
            skills: Vec::new(),
            pictos: Vec::new(),
            weapon_power: 0,
            hability: 0,
        }
    }

    pub fn player(name: impl Into<String>, max_health_points: u32) -> Self {
        Self::new(name, CharacterKind::Player, max_health_points)
    }

    pub fn npc(name: impl Into<String>, max_health_points: u32) -> Self {
        Self::new(name, CharacterKind::Npc, max_health_points)
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = external_id.into();
        self
    }

    pub fn with_enemy(mut self, is_enemy: bool) -> Self {
        self.is_enemy = is_enemy;
        self
    }

    pub fn with_magic_points(mut self, current: u32, maximum: u32) -> Self {
        self.magic_points = Some(current.min(maximum));
        self.max_magic_points = Some(maximum);
        self
    }

    pub fn with_charge_points(mut self, current: u32, maximum: u32) -> Self {
        self.charge_points = Some(current.min(maximum));
        self.max_charge_points = Some(maximum);
        self
    }

    pub fn with_gradient_points(mut self, points: u32) -> Self {
        self.gradient_points = Some(points);
        self
    }

    pub fn with_stance(mut self, stance: Stance) -> Self {
        self.stance = Some(stance);
        self
    }

    pub fn with_stains(mut self, stains: StainSlots) -> Self {
        self.stains = stains;
        self
    }

    pub fn with_skill(mut self, skill: impl Into<SkillId>) -> Self {
        self.skills.push(skill.into());
        self
    }

    pub fn with_picto(mut self, picto: impl Into<String>) -> Self {
        self.pictos.push(Some(picto.into()));
        self
    }

    pub fn with_pictos(mut self, pictos: Vec<Option<String>>) -> Self {
        self.pictos = pictos;
        self
    }

    pub fn with_weapon_power(mut self, power: u32) -> Self {
        self.weapon_power = power;
        self
    }

    pub fn with_hability(mut self, hability: i32) -> Self {
        self.hability = hability;
        self
    }

    pub fn is_defeated(&self) -> bool {
        self.health_points == 0
    }

    pub fn is_full_hp(&self) -> bool {
        self.health_points >= self.max_health_points
    }

    pub fn hp_ratio(&self) -> f64 {
        if self.max_health_points == 0 {
            return 0.0;
        }
        self.health_points as f64 / self.max_health_points as f64
    }

    /// Whole gradient charges available to spend.
    pub fn gradient_charges(&self, points_per_charge: u32) -> u32 {
        match (self.gradient_points, points_per_charge) {
            (Some(points), per) if per > 0 => points / per,
            _ => 0,
        }
    }

    /// Gradient charges as shown on the character sheet.
    pub fn display_charges(&self, points_per_charge: u32, cap: u32) -> u32 {
        self.gradient_charges(points_per_charge).min(cap)
    }

    pub fn knows_skill(&self, skill: &SkillId) -> bool {
        self.skills.iter().any(|s| s == skill)
    }

    /// Whether a picto is equipped in one of the first `active_slots` slots.
    pub fn has_active_picto(&self, picto: &str, active_slots: usize) -> bool {
        self.pictos
            .iter()
            .take(active_slots)
            .flatten()
            .any(|p| p == picto)
    }

    /// Active picto ids, in slot order.
    pub fn active_pictos(&self, active_slots: usize) -> impl Iterator<Item = &str> {
        self.pictos.iter().take(active_slots).flatten().map(String::as_str)
    }

    pub fn has_charges(&self) -> bool {
        self.charge_points.unwrap_or(0) > 0
    }

    pub fn at_max_charges(&self) -> bool {
        match (self.charge_points, self.max_charge_points) {
            (Some(current), Some(max)) => max > 0 && current >= max,
            _ => false,
        }
    }

    /// Add MP up to the maximum. Returns the MP actually gained.
    pub fn restore_mp(&mut self, amount: u32) -> u32 {
        let (Some(current), Some(max)) = (self.magic_points, self.max_magic_points) else {
            return 0;
        };
        let new = current.saturating_add(amount).min(max);
        self.magic_points = Some(new);
        new - current
    }
}

/// Result of applying damage to a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageResult {
    pub damage_taken: u32,
    pub new_hp: u32,
    pub dropped_to_zero: bool,
}

// ============================================================================
// Battle
// ============================================================================

/// The complete state of one battle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Battle {
    pub id: BattleId,
    pub name: String,
    characters: BTreeMap<CharacterId, BattleCharacter>,
    pub statuses: StatusStore,
    pub modifiers: ModifierStore,
    pub resistances: ElementResistanceTable,
    pub immunities: StatusImmunityTable,
    pub trackers: PassiveTracker,
    pub turns: TurnQueue,
    pub initiative: InitiativeQueue,
    /// Explicit round counter, incremented once everyone queued has acted.
    pub round: u32,
    /// Queued characters that have not yet acted this round.
    #[serde(default)]
    pub due_this_round: BTreeSet<CharacterId>,
    next_character_id: u64,
}

impl Battle {
    pub fn new(id: BattleId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            characters: BTreeMap::new(),
            statuses: StatusStore::default(),
            modifiers: ModifierStore::default(),
            resistances: ElementResistanceTable::default(),
            immunities: StatusImmunityTable::default(),
            trackers: PassiveTracker::default(),
            turns: TurnQueue::default(),
            initiative: InitiativeQueue::default(),
            round: 1,
            due_this_round: BTreeSet::new(),
            next_character_id: 1,
        }
    }

    /// Add a character to the roster and assign its battle-scoped id.
    pub fn add_character(&mut self, mut character: BattleCharacter) -> CharacterId {
        let id = CharacterId(self.next_character_id);
        self.next_character_id += 1;
        character.id = id;
        character.health_points = character.health_points.min(character.max_health_points);
        self.characters.insert(id, character);
        id
    }

    /// Remove a character and every row that references it.
    pub fn remove_character(&mut self, id: CharacterId) -> Option<BattleCharacter> {
        let removed = self.characters.remove(&id)?;
        self.statuses.remove_all(id);
        self.modifiers.remove_character(id);
        self.resistances.remove_character(id);
        self.immunities.remove_character(id);
        self.trackers.remove_character(id);
        self.turns.remove_character(id);
        self.due_this_round.remove(&id);
        self.initiative.remove_character(id);
        Some(removed)
    }

    pub fn character(&self, id: CharacterId) -> Option<&BattleCharacter> {
        self.characters.get(&id)
    }

    pub fn character_mut(&mut self, id: CharacterId) -> Option<&mut BattleCharacter> {
        self.characters.get_mut(&id)
    }

    pub fn characters(&self) -> impl Iterator<Item = &BattleCharacter> {
        self.characters.values()
    }

    pub fn living(&self) -> impl Iterator<Item = &BattleCharacter> {
        self.characters.values().filter(|c| !c.is_defeated())
    }

    /// Living teammates of `id`, excluding `id` itself.
    pub fn allies_of(&self, id: CharacterId) -> Vec<CharacterId> {
        let Some(me) = self.character(id) else {
            return Vec::new();
        };
        self.living()
            .filter(|c| c.is_enemy == me.is_enemy && c.id != id)
            .map(|c| c.id)
            .collect()
    }

    /// Living members of the opposing team.
    pub fn enemies_of(&self, id: CharacterId) -> Vec<CharacterId> {
        let Some(me) = self.character(id) else {
            return Vec::new();
        };
        self.living()
            .filter(|c| c.is_enemy != me.is_enemy)
            .map(|c| c.id)
            .collect()
    }

    /// Whether `id` is the only living member of its team.
    pub fn is_solo(&self, id: CharacterId) -> bool {
        self.character(id).is_some_and(|c| !c.is_defeated()) && self.allies_of(id).is_empty()
    }

    /// Apply damage, clamping HP at zero and handling defeat.
    pub fn apply_damage(&mut self, target: CharacterId, amount: u32) -> Option<DamageResult> {
        let character = self.characters.get_mut(&target)?;
        let was_standing = !character.is_defeated();
        let taken = amount.min(character.health_points);
        character.health_points -= taken;
        let result = DamageResult {
            damage_taken: taken,
            new_hp: character.health_points,
            dropped_to_zero: was_standing && character.health_points == 0,
        };

        if result.dropped_to_zero {
            self.handle_defeat(target);
        }
        Some(result)
    }

    /// Clear everything a defeated character no longer takes part in.
    fn handle_defeat(&mut self, target: CharacterId) {
        self.statuses.remove_all(target);
        self.turns.remove_character(target);
        self.due_this_round.remove(&target);
        if let Some(character) = self.characters.get_mut(&target) {
            if character.magic_points.is_some() {
                character.magic_points = Some(0);
            }
        }
        tracing::debug!(battle = %self.id, character = %target, "character defeated");
    }

    /// Heal up to maximum HP. Returns the HP actually restored.
    pub fn heal(&mut self, target: CharacterId, amount: u32) -> Option<u32> {
        let character = self.characters.get_mut(&target)?;
        let old = character.health_points;
        character.health_points = old.saturating_add(amount).min(character.max_health_points);
        Some(character.health_points - old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusType;
    use crate::turns::TurnEntry;

    fn battle_with_fighter() -> (Battle, CharacterId) {
        let mut battle = Battle::new(BattleId(1), "Test");
        let id = battle.add_character(
            BattleCharacter::player("Gustave", 120).with_magic_points(5, 10),
        );
        (battle, id)
    }

    #[test]
    fn test_add_assigns_ids() {
        let (mut battle, first) = battle_with_fighter();
        let second = battle.add_character(BattleCharacter::npc("Lancer", 50));
        assert_eq!(first, CharacterId(1));
        assert_eq!(second, CharacterId(2));
        assert!(battle.character(second).unwrap().is_enemy);
    }

    #[test]
    fn test_damage_clamps_at_zero() {
        let (mut battle, id) = battle_with_fighter();
        let result = battle.apply_damage(id, 500).unwrap();
        assert_eq!(result.new_hp, 0);
        assert_eq!(result.damage_taken, 120);
        assert!(result.dropped_to_zero);
    }

    #[test]
    fn test_defeat_clears_statuses_turns_and_mp() {
        let (mut battle, id) = battle_with_fighter();
        battle.statuses.stack(id, StatusType::Burning, 2, Some(3));
        battle.turns.entries.push(TurnEntry {
            character_id: id,
            play_order: 1,
        });

        battle.apply_damage(id, 120);

        assert!(battle.statuses.for_character(id).next().is_none());
        assert!(battle.turns.entries.is_empty());
        assert_eq!(battle.character(id).unwrap().magic_points, Some(0));
    }

    #[test]
    fn test_heal_caps_at_max() {
        let (mut battle, id) = battle_with_fighter();
        battle.apply_damage(id, 30);
        assert_eq!(battle.heal(id, 100), Some(30));
        assert_eq!(battle.character(id).unwrap().health_points, 120);
    }

    #[test]
    fn test_gradient_charges() {
        let c = BattleCharacter::player("Lune", 80).with_gradient_points(40);
        assert_eq!(c.gradient_charges(12), 3);
        let c = c.with_gradient_points(50);
        assert_eq!(c.gradient_charges(12), 4);
        assert_eq!(c.display_charges(12, 3), 3);
    }

    #[test]
    fn test_solo_and_teams() {
        let (mut battle, id) = battle_with_fighter();
        let enemy = battle.add_character(BattleCharacter::npc("Lancer", 50));
        assert!(battle.is_solo(id));
        let ally = battle.add_character(BattleCharacter::player("Maelle", 90));
        assert!(!battle.is_solo(id));
        assert_eq!(battle.allies_of(id), vec![ally]);
        assert_eq!(battle.enemies_of(id), vec![enemy]);
    }

    #[test]
    fn test_active_picto_slots() {
        let c = BattleCharacter::player("Sciel", 90).with_pictos(vec![
            None,
            Some("anti-burn".to_string()),
            None,
            Some("anti-stun".to_string()),
        ]);
        assert!(c.has_active_picto("anti-burn", 3));
        assert!(!c.has_active_picto("anti-stun", 3));
    }

    #[test]
    fn test_stance_parse() {
        assert_eq!("offensive".parse::<Stance>(), Ok(Stance::Offensive));
        assert!("angry".parse::<Stance>().is_err());
    }
}
