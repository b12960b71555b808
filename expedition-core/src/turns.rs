//! Turn and initiative sequencing.
//!
//! Before a battle, every combatant rolls initiative into the
//! [`InitiativeQueue`]. `start_battle` seeds the [`TurnQueue`] from that
//! order; from then on `advance_turn` rotates the queue one entry at a time
//! and bumps the battle's round counter whenever everyone has acted.
//! Both queues keep `play_order` contiguous from 1.

use crate::battle::{Battle, CharacterId};
use crate::dice::{DiceOutcome, DiceSource};
use crate::error::BattleError;
use crate::status::StatusType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A queued turn in a running battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnEntry {
    pub character_id: CharacterId,
    pub play_order: u32,
}

/// The in-battle turn order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnQueue {
    pub entries: Vec<TurnEntry>,
}

impl TurnQueue {
    pub fn from_order(order: impl IntoIterator<Item = CharacterId>) -> Self {
        let mut queue = Self {
            entries: order
                .into_iter()
                .map(|character_id| TurnEntry {
                    character_id,
                    play_order: 0,
                })
                .collect(),
        };
        queue.renumber();
        queue
    }

    /// Character ids in play order.
    pub fn order(&self) -> Vec<CharacterId> {
        let mut entries = self.entries.clone();
        entries.sort_by_key(|e| e.play_order);
        entries.into_iter().map(|e| e.character_id).collect()
    }

    /// Whose turn it is.
    pub fn current(&self) -> Option<CharacterId> {
        self.entries
            .iter()
            .min_by_key(|e| e.play_order)
            .map(|e| e.character_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, character_id: CharacterId) -> bool {
        self.entries.iter().any(|e| e.character_id == character_id)
    }

    /// Sort by play order and renumber 1..N.
    pub fn renumber(&mut self) {
        self.entries.sort_by_key(|e| e.play_order);
        for (i, entry) in self.entries.iter_mut().enumerate() {
            entry.play_order = i as u32 + 1;
        }
    }

    /// Move the front entry to the back. No-op with fewer than two entries.
    pub fn rotate(&mut self) -> bool {
        if self.entries.len() <= 1 {
            return false;
        }
        self.entries.sort_by_key(|e| e.play_order);
        self.entries.rotate_left(1);
        for (i, entry) in self.entries.iter_mut().enumerate() {
            entry.play_order = i as u32 + 1;
        }
        true
    }

    /// Replace the order with an explicit permutation of the current ids.
    pub fn reorder(&mut self, order: &[CharacterId]) -> Result<(), BattleError> {
        let current: Vec<CharacterId> = self.entries.iter().map(|e| e.character_id).collect();
        check_permutation(&current, order)?;
        self.entries = order
            .iter()
            .enumerate()
            .map(|(i, &character_id)| TurnEntry {
                character_id,
                play_order: i as u32 + 1,
            })
            .collect();
        Ok(())
    }

    pub fn remove_character(&mut self, character_id: CharacterId) {
        self.entries.retain(|e| e.character_id != character_id);
        self.renumber();
    }
}

/// One pre-battle initiative row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiativeEntry {
    pub character_id: CharacterId,
    pub value: u32,
    pub hability: i32,
    pub play_first: bool,
    pub play_order: u32,
}

impl InitiativeEntry {
    pub fn new(character_id: CharacterId, value: u32, hability: i32) -> Self {
        Self {
            character_id,
            value,
            hability,
            play_first: false,
            play_order: 0,
        }
    }

    pub fn with_play_first(mut self, play_first: bool) -> Self {
        self.play_first = play_first;
        self
    }
}

/// The pre-battle initiative list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitiativeQueue {
    pub entries: Vec<InitiativeEntry>,
}

impl InitiativeQueue {
    pub fn get(&self, character_id: CharacterId) -> Option<&InitiativeEntry> {
        self.entries.iter().find(|e| e.character_id == character_id)
    }

    /// Stable sort: play-first rows, then highest value, then highest hability.
    pub fn sort(&mut self) {
        self.entries.sort_by(|a, b| {
            b.play_first
                .cmp(&a.play_first)
                .then(b.value.cmp(&a.value))
                .then(b.hability.cmp(&a.hability))
        });
        for (i, entry) in self.entries.iter_mut().enumerate() {
            entry.play_order = i as u32 + 1;
        }
    }

    /// Insert or update a row, keeping any existing play-first flag.
    pub fn upsert(&mut self, character_id: CharacterId, value: u32, hability: i32) {
        match self.entries.iter_mut().find(|e| e.character_id == character_id) {
            Some(entry) => {
                entry.value = value;
                entry.hability = hability;
            }
            None => self
                .entries
                .push(InitiativeEntry::new(character_id, value, hability)),
        }
    }

    pub fn order(&self) -> Vec<CharacterId> {
        let mut entries = self.entries.clone();
        entries.sort_by_key(|e| e.play_order);
        entries.into_iter().map(|e| e.character_id).collect()
    }

    pub fn reorder(&mut self, order: &[CharacterId]) -> Result<(), BattleError> {
        let current: Vec<CharacterId> = self.entries.iter().map(|e| e.character_id).collect();
        check_permutation(&current, order)?;
        for (i, id) in order.iter().enumerate() {
            if let Some(entry) = self.entries.iter_mut().find(|e| e.character_id == *id) {
                entry.play_order = i as u32 + 1;
            }
        }
        self.entries.sort_by_key(|e| e.play_order);
        Ok(())
    }

    pub fn remove_character(&mut self, character_id: CharacterId) {
        self.entries.retain(|e| e.character_id != character_id);
    }
}

fn check_permutation(current: &[CharacterId], order: &[CharacterId]) -> Result<(), BattleError> {
    let expected: HashSet<CharacterId> = current.iter().copied().collect();
    let given: HashSet<CharacterId> = order.iter().copied().collect();
    if order.len() != current.len() || given.len() != order.len() || given != expected {
        return Err(BattleError::InvalidOrder(format!(
            "expected a permutation of {} entries, got {}",
            current.len(),
            order.len()
        )));
    }
    Ok(())
}

// ============================================================================
// Battle operations
// ============================================================================

/// Result of rolling initiative for one character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiativeRoll {
    pub character_id: CharacterId,
    pub value: u32,
    pub outcome: DiceOutcome,
    pub sorted_queue: Vec<InitiativeEntry>,
}

/// Result of advancing the turn queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnAdvance {
    /// The character whose turn just ended.
    pub ended: Option<CharacterId>,
    /// Statuses that expired on that character.
    pub expired: Vec<StatusType>,
    pub new_order: Vec<CharacterId>,
    pub round: u32,
    pub new_round: bool,
}

impl Battle {
    /// Seed the turn queue from initiative and start round 1.
    ///
    /// Living characters without an initiative row go last, by id.
    pub fn start_battle(&mut self) -> Vec<CharacterId> {
        let mut order: Vec<CharacterId> = self
            .initiative
            .order()
            .into_iter()
            .filter(|id| self.character(*id).is_some_and(|c| !c.is_defeated()))
            .collect();
        let unranked: Vec<CharacterId> = self
            .living()
            .map(|c| c.id)
            .filter(|id| !order.contains(id))
            .collect();
        order.extend(unranked);

        self.turns = TurnQueue::from_order(order.iter().copied());
        self.round = 1;
        self.due_this_round = order.iter().copied().collect();
        tracing::debug!(battle = %self.id, combatants = order.len(), "battle started");
        order
    }

    /// End the current turn and move to the next one.
    pub fn advance_turn(&mut self) -> TurnAdvance {
        let Some(ended) = self.turns.current() else {
            return TurnAdvance {
                ended: None,
                expired: Vec::new(),
                new_order: Vec::new(),
                round: self.round,
                new_round: false,
            };
        };

        let expired = self.statuses.tick_end_of_turn(ended);
        self.trackers.reset_turn_scoped(Some(ended));
        self.turns.rotate();

        self.due_this_round.remove(&ended);
        let new_round = self.due_this_round.is_empty();
        if new_round {
            self.round += 1;
            self.due_this_round = self.turns.order().into_iter().collect();
        }

        TurnAdvance {
            ended: Some(ended),
            expired,
            new_order: self.turns.order(),
            round: self.round,
            new_round,
        }
    }

    /// Roll initiative for one character and re-sort the queue.
    pub fn roll_initiative(
        &mut self,
        character_id: CharacterId,
        die_count: u32,
        dice: &mut dyn DiceSource,
    ) -> Result<InitiativeRoll, BattleError> {
        let hability = self
            .character(character_id)
            .ok_or(BattleError::CharacterNotFound(character_id))?
            .hability;

        let outcome = DiceOutcome::evaluate(dice.roll(die_count.max(1)), false);
        let value = outcome.total;
        self.initiative.upsert(character_id, value, hability);
        self.initiative.sort();

        Ok(InitiativeRoll {
            character_id,
            value,
            outcome,
            sorted_queue: self.initiative.entries.clone(),
        })
    }

    /// Flag a character to act before everyone without the flag.
    pub fn set_play_first(
        &mut self,
        character_id: CharacterId,
        play_first: bool,
    ) -> Result<Vec<InitiativeEntry>, BattleError> {
        let hability = self
            .character(character_id)
            .ok_or(BattleError::CharacterNotFound(character_id))?
            .hability;
        if self.initiative.get(character_id).is_none() {
            self.initiative.upsert(character_id, 0, hability);
        }
        if let Some(entry) = self
            .initiative
            .entries
            .iter_mut()
            .find(|e| e.character_id == character_id)
        {
            entry.play_first = play_first;
        }
        self.initiative.sort();
        Ok(self.initiative.entries.clone())
    }
}
