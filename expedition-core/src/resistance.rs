//! Element resistance table.

use crate::battle::CharacterId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Damage elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Element {
    Physical,
    Fire,
    Ice,
    Lightning,
    Earth,
    Light,
    Dark,
    Void,
}

impl Element {
    pub fn name(&self) -> &'static str {
        match self {
            Element::Physical => "Physical",
            Element::Fire => "Fire",
            Element::Ice => "Ice",
            Element::Lightning => "Lightning",
            Element::Earth => "Earth",
            Element::Light => "Light",
            Element::Dark => "Dark",
            Element::Void => "Void",
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Element {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "physical" => Ok(Element::Physical),
            "fire" => Ok(Element::Fire),
            "ice" => Ok(Element::Ice),
            "lightning" => Ok(Element::Lightning),
            "earth" => Ok(Element::Earth),
            "light" => Ok(Element::Light),
            "dark" => Ok(Element::Dark),
            "void" => Ok(Element::Void),
            _ => Err(format!("unknown element: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResistanceType {
    Immune,
    Resist,
    Weak,
}

impl FromStr for ResistanceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immune" => Ok(ResistanceType::Immune),
            "resist" => Ok(ResistanceType::Resist),
            "weak" => Ok(ResistanceType::Weak),
            _ => Err(format!("unknown resistance type: {s}")),
        }
    }
}

/// How an element affects a hit on one character.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElementFactor {
    /// The hit deals nothing, whatever else applies.
    Immune,
    Scaled(f64),
}

impl ElementFactor {
    /// Scale damage by this factor, rounding to the nearest integer.
    pub fn apply(&self, damage: u32) -> u32 {
        match self {
            ElementFactor::Immune => 0,
            ElementFactor::Scaled(m) => (damage as f64 * m).round().max(0.0) as u32,
        }
    }
}

/// One resistance row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementResistance {
    pub character_id: CharacterId,
    pub element: Element,
    pub resistance_type: ResistanceType,
    pub damage_multiplier: f64,
}

/// Element resistances for every character in a battle.
///
/// At most one row per (character, element).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElementResistanceTable {
    pub rows: Vec<ElementResistance>,
}

impl ElementResistanceTable {
    pub fn get(&self, character_id: CharacterId, element: Element) -> Option<&ElementResistance> {
        self.rows
            .iter()
            .find(|r| r.character_id == character_id && r.element == element)
    }

    /// Look up the factor for a hit. No row means a plain 1.0.
    pub fn resolve(&self, character_id: CharacterId, element: Element) -> ElementFactor {
        match self.get(character_id, element) {
            Some(row) if row.resistance_type == ResistanceType::Immune => ElementFactor::Immune,
            Some(row) => ElementFactor::Scaled(row.damage_multiplier),
            None => ElementFactor::Scaled(1.0),
        }
    }

    /// Insert or replace the row for a pair.
    pub fn upsert(
        &mut self,
        character_id: CharacterId,
        element: Element,
        resistance_type: ResistanceType,
        damage_multiplier: f64,
    ) {
        self.remove(character_id, element);
        self.rows.push(ElementResistance {
            character_id,
            element,
            resistance_type,
            damage_multiplier,
        });
    }

    pub fn remove(&mut self, character_id: CharacterId, element: Element) -> bool {
        let before = self.rows.len();
        self.rows
            .retain(|r| !(r.character_id == character_id && r.element == element));
        before != self.rows.len()
    }

    pub fn remove_character(&mut self, character_id: CharacterId) {
        self.rows.retain(|r| r.character_id != character_id);
    }

    pub fn for_character(
        &self,
        character_id: CharacterId,
    ) -> impl Iterator<Item = &ElementResistance> {
        self.rows.iter().filter(move |r| r.character_id == character_id)
    }
}
