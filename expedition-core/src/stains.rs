//! Stain ledger.
//!
//! Every character carries four ordered stain slots. Skills consume stains
//! to unlock bonus effects and generate stains as a side effect. `Light` is
//! a wildcard: it can stand in for any single missing elemental stain and is
//! never evicted when new stains arrive.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of stain slots per character.
pub const STAIN_SLOTS: usize = 4;

/// An elemental stain token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stain {
    Lightning,
    Earth,
    Fire,
    Ice,
    Light,
}

impl Stain {
    /// The four elemental stains, excluding the Light wildcard.
    pub const ELEMENTAL: [Stain; 4] = [Stain::Lightning, Stain::Earth, Stain::Fire, Stain::Ice];

    pub fn name(&self) -> &'static str {
        match self {
            Stain::Lightning => "Lightning",
            Stain::Earth => "Earth",
            Stain::Fire => "Fire",
            Stain::Ice => "Ice",
            Stain::Light => "Light",
        }
    }
}

impl fmt::Display for Stain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Stain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lightning" => Ok(Stain::Lightning),
            "earth" => Ok(Stain::Earth),
            "fire" => Ok(Stain::Fire),
            "ice" => Ok(Stain::Ice),
            "light" => Ok(Stain::Light),
            _ => Err(format!("unknown stain: {s}")),
        }
    }
}

/// A `(stain, count)` consumption requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StainCost {
    pub stain: Stain,
    pub count: u32,
}

impl StainCost {
    pub fn new(stain: Stain, count: u32) -> Self {
        Self { stain, count }
    }
}

/// What one requirement actually took out of the slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StainConsumption {
    pub requirement: StainCost,
    pub specific_used: u32,
    pub light_used: u32,
}

/// Result of a consumption pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeReport {
    pub consumed: Vec<StainConsumption>,
    pub skipped: Vec<StainCost>,
}

impl ConsumeReport {
    /// True when every requirement was paid in full (and there was at least one).
    pub fn all_satisfied(&self) -> bool {
        !self.consumed.is_empty() && self.skipped.is_empty()
    }
}

/// The four ordered stain slots of one character.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StainSlots {
    pub slots: [Option<Stain>; STAIN_SLOTS],
}

impl StainSlots {
    pub fn new(slots: [Option<Stain>; STAIN_SLOTS]) -> Self {
        Self { slots }
    }

    /// Fill slots from the front with the given stains.
    pub fn from_stains(stains: &[Stain]) -> Self {
        let mut slots = Self::default();
        for (slot, stain) in slots.slots.iter_mut().zip(stains) {
            *slot = Some(*stain);
        }
        slots
    }

    pub fn count(&self, stain: Stain) -> u32 {
        self.slots.iter().filter(|s| **s == Some(stain)).count() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Whether all four elemental types are present, letting each Light
    /// stain cover one missing type.
    pub fn has_all_elements(&self) -> bool {
        let missing = Stain::ELEMENTAL
            .iter()
            .filter(|s| self.count(**s) == 0)
            .count() as u32;
        missing <= self.count(Stain::Light)
    }

    /// Consume each requirement in full or not at all.
    ///
    /// Specific stains are taken first; Light makes up any remainder.
    pub fn consume(&mut self, requirements: &[StainCost]) -> ConsumeReport {
        let mut report = ConsumeReport::default();

        for requirement in requirements {
            let specific = self.count(requirement.stain);
            let available = if requirement.stain == Stain::Light {
                specific
            } else {
                specific + self.count(Stain::Light)
            };

            if available < requirement.count {
                report.skipped.push(*requirement);
                continue;
            }

            let specific_used = self.remove(requirement.stain, requirement.count);
            let light_used = if requirement.stain == Stain::Light {
                0
            } else {
                self.remove(Stain::Light, requirement.count - specific_used)
            };

            report.consumed.push(StainConsumption {
                requirement: *requirement,
                specific_used,
                light_used,
            });
        }

        report
    }

    /// Remove up to `count` stains of one type, front to back.
    fn remove(&mut self, stain: Stain, count: u32) -> u32 {
        let mut removed = 0;
        for slot in self.slots.iter_mut() {
            if removed == count {
                break;
            }
            if *slot == Some(stain) {
                *slot = None;
                removed += 1;
            }
        }
        removed
    }

    /// Add stains. Returns the stains that were lost.
    ///
    /// Each incoming stain fills the first empty slot, else overwrites the
    /// first non-Light slot. When all four slots hold Light it is discarded.
    pub fn add(&mut self, stains: &[Stain]) -> Vec<Stain> {
        let mut lost = Vec::new();
        for &stain in stains {
            if let Some(slot) = self.slots.iter_mut().find(|s| s.is_none()) {
                *slot = Some(stain);
            } else if let Some(slot) = self
                .slots
                .iter_mut()
                .find(|s| **s != Some(Stain::Light))
            {
                *slot = Some(stain);
            } else {
                lost.push(stain);
            }
        }
        lost
    }

    /// Replace the first `from` stain with `to`. Returns false if none found.
    pub fn transform(&mut self, from: Stain, to: Stain) -> bool {
        match self.slots.iter_mut().find(|s| **s == Some(from)) {
            Some(slot) => {
                *slot = Some(to);
                true
            }
            None => false,
        }
    }

    /// Most frequent stain; ties go to the one seen first. Lightning when empty.
    pub fn dominant_element(&self) -> Stain {
        let mut best: Option<(Stain, u32)> = None;
        for stain in self.slots.iter().flatten() {
            let count = self.count(*stain);
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((*stain, count));
            }
        }
        best.map_or(Stain::Lightning, |(s, _)| s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Stain::*;

    #[test]
    fn test_all_elements_present() {
        let slots = StainSlots::from_stains(&[Lightning, Earth, Fire, Ice]);
        assert!(slots.has_all_elements());
    }

    #[test]
    fn test_light_substitutes_missing_element() {
        let slots = StainSlots::from_stains(&[Lightning, Earth, Fire, Light]);
        assert!(slots.has_all_elements());

        let slots = StainSlots::from_stains(&[Lightning, Earth, Light]);
        assert!(!slots.has_all_elements());

        let slots = StainSlots::from_stains(&[Lightning, Earth, Light, Light]);
        assert!(slots.has_all_elements());
    }

    #[test]
    fn test_consume_specific_then_light() {
        let mut slots = StainSlots::from_stains(&[Fire, Light, Ice, Light]);
        let report = slots.consume(&[StainCost::new(Fire, 2)]);
        assert!(report.all_satisfied());
        assert_eq!(report.consumed[0].specific_used, 1);
        assert_eq!(report.consumed[0].light_used, 1);
        assert_eq!(slots.slots, [None, None, Some(Ice), Some(Light)]);
    }

    #[test]
    fn test_consume_insufficient_leaves_slots() {
        let mut slots = StainSlots::from_stains(&[Fire, Ice]);
        let before = slots;
        let report = slots.consume(&[StainCost::new(Fire, 2)]);
        assert_eq!(slots, before);
        assert_eq!(report.skipped, vec![StainCost::new(Fire, 2)]);
        assert!(!report.all_satisfied());
    }

    #[test]
    fn test_consume_light_requirement_counts_light_only() {
        let mut slots = StainSlots::from_stains(&[Light, Fire]);
        let report = slots.consume(&[StainCost::new(Light, 2)]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(slots.count(Light), 1);
    }

    #[test]
    fn test_add_fills_empty_first() {
        let mut slots = StainSlots::from_stains(&[Fire]);
        let lost = slots.add(&[Ice]);
        assert!(lost.is_empty());
        assert_eq!(slots.slots[1], Some(Ice));
    }

    #[test]
    fn test_add_overwrites_first_non_light() {
        let mut slots = StainSlots::from_stains(&[Light, Fire, Ice, Earth]);
        slots.add(&[Lightning]);
        assert_eq!(
            slots.slots,
            [Some(Light), Some(Lightning), Some(Ice), Some(Earth)]
        );
    }

    #[test]
    fn test_add_to_all_light_is_lost() {
        let mut slots = StainSlots::from_stains(&[Light, Light, Light, Light]);
        let before = slots;
        let lost = slots.add(&[Fire]);
        assert_eq!(lost, vec![Fire]);
        assert_eq!(slots, before);
    }

    #[test]
    fn test_transform() {
        let mut slots = StainSlots::from_stains(&[Ice, Fire, Fire]);
        assert!(slots.transform(Fire, Light));
        assert_eq!(slots.slots, [Some(Ice), Some(Light), Some(Fire), None]);
        assert!(!slots.transform(Earth, Light));
    }

    #[test]
    fn test_dominant_element() {
        assert_eq!(StainSlots::default().dominant_element(), Lightning);
        let slots = StainSlots::from_stains(&[Ice, Fire, Fire]);
        assert_eq!(slots.dominant_element(), Fire);
        let slots = StainSlots::from_stains(&[Earth, Fire, Fire, Earth]);
        assert_eq!(slots.dominant_element(), Earth);
    }
}
