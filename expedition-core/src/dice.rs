//! Dice sources and the dice outcome evaluator.
//!
//! Every roll in a battle is a pool of six-sided dice. A die command such as
//! `3d6+2` names how many dice to request from a [`DiceSource`]; the faces that
//! come back are grouped into [`RollGroup`]s and read by the evaluator:
//! sixes are criticals, ones are failures, and the two cancel one for one.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of faces on every battle die.
pub const DIE_SIDES: u32 = 6;

/// Most dice a single die command may request.
pub const MAX_DICE: u32 = 100;

/// Error type for dice parsing.
#[derive(Debug, Error, PartialEq)]
pub enum DiceError {
    #[error("Invalid dice notation: {0}")]
    InvalidNotation(String),
    #[error("Invalid die size: {0} (battle dice are d6)")]
    InvalidDieSize(u32),
    #[error("No dice specified")]
    NoDice,
    #[error("Die face out of range: {0}")]
    FaceOutOfRange(u32),
    #[error("Too many dice: {0} (at most {max})", max = MAX_DICE)]
    TooManyDice(String),
}

// ============================================================================
// Faces and groups
// ============================================================================

/// The face value of a single die.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DieFace {
    pub value: u32,
}

impl DieFace {
    pub fn new(value: u32) -> Result<Self, DiceError> {
        if (1..=DIE_SIDES).contains(&value) {
            Ok(Self { value })
        } else {
            Err(DiceError::FaceOutOfRange(value))
        }
    }
}

/// One invocation of N dice for one sub-action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollGroup {
    pub rolls: Vec<DieFace>,
}

impl RollGroup {
    /// Build a group from raw face values.
    pub fn from_values(values: &[u32]) -> Result<Self, DiceError> {
        let rolls = values
            .iter()
            .map(|&v| DieFace::new(v))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rolls })
    }

    fn faces(&self) -> impl Iterator<Item = u32> + '_ {
        self.rolls.iter().map(|d| d.value)
    }
}

fn faces(groups: &[RollGroup]) -> impl Iterator<Item = u32> + '_ {
    groups.iter().flat_map(RollGroup::faces)
}

fn count_face(groups: &[RollGroup], face: u32) -> u32 {
    faces(groups).filter(|&v| v == face).count() as u32
}

// ============================================================================
// Evaluator
// ============================================================================

/// Criticals left after ones cancel them.
///
/// Sixes always count; fives also count when `count_fives` is set.
pub fn count_criticals(groups: &[RollGroup], count_fives: bool) -> u32 {
    let mut crits = count_face(groups, 6);
    if count_fives {
        crits += count_face(groups, 5);
    }
    crits.saturating_sub(count_face(groups, 1))
}

/// Failures left after sixes cancel them.
pub fn count_failures(groups: &[RollGroup]) -> u32 {
    count_face(groups, 1).saturating_sub(count_face(groups, 6))
}

/// Sum of every face across every group.
pub fn total(groups: &[RollGroup]) -> u32 {
    faces(groups).sum()
}

/// True iff the pool is non-empty and every die shows 1.
pub fn is_critical_failure(groups: &[RollGroup]) -> bool {
    let mut any = false;
    for v in faces(groups) {
        if v != 1 {
            return false;
        }
        any = true;
    }
    any
}

/// Everything the resolver needs to know about one pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceOutcome {
    pub groups: Vec<RollGroup>,
    pub criticals: u32,
    pub failures: u32,
    pub total: u32,
    pub critical_failure: bool,
}

impl DiceOutcome {
    pub fn evaluate(groups: Vec<RollGroup>, count_fives: bool) -> Self {
        Self {
            criticals: count_criticals(&groups, count_fives),
            failures: count_failures(&groups),
            total: total(&groups),
            critical_failure: is_critical_failure(&groups),
            groups,
        }
    }

    /// Format the individual dice for a combat log.
    pub fn dice_display(&self) -> String {
        let parts: Vec<String> = self
            .groups
            .iter()
            .map(|g| {
                format!(
                    "[{}]",
                    g.faces()
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
            .collect();
        parts.join(" + ")
    }
}

impl fmt::Display for DiceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.dice_display(), self.total)
    }
}

// ============================================================================
// Die commands
// ============================================================================

/// A die command like `3d6+2`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceExpression {
    pub count: u32,
    pub modifier: i32,
    pub original: String,
}

impl DiceExpression {
    /// Parse a die command.
    pub fn parse(notation: &str) -> Result<Self, DiceError> {
        let notation = notation.trim().to_lowercase();
        if notation.is_empty() {
            return Err(DiceError::NoDice);
        }

        let mut count = 0;
        let mut modifier: i32 = 0;
        let mut current = String::new();
        let mut sign: i32 = 1;

        for ch in notation.chars() {
            match ch {
                '+' | '-' => {
                    if !current.is_empty() {
                        Self::parse_component(&current, sign, &mut count, &mut modifier)?;
                        current.clear();
                    }
                    sign = if ch == '+' { 1 } else { -1 };
                }
                ' ' => continue,
                _ => current.push(ch),
            }
        }

        if !current.is_empty() {
            Self::parse_component(&current, sign, &mut count, &mut modifier)?;
        }

        if count == 0 {
            return Err(DiceError::NoDice);
        }

        Ok(DiceExpression {
            count,
            modifier,
            original: notation,
        })
    }

    fn parse_component(
        s: &str,
        sign: i32,
        count: &mut u32,
        modifier: &mut i32,
    ) -> Result<(), DiceError> {
        if let Some(d_pos) = s.find('d') {
            if sign < 0 {
                return Err(DiceError::InvalidNotation(s.to_string()));
            }
            let count_str = &s[..d_pos];
            let dice: u32 = if count_str.is_empty() {
                1
            } else {
                count_str
                    .parse()
                    .map_err(|_| DiceError::InvalidNotation(s.to_string()))?
            };
            let sides: u32 = s[d_pos + 1..]
                .parse()
                .map_err(|_| DiceError::InvalidNotation(s.to_string()))?;
            if sides != DIE_SIDES {
                return Err(DiceError::InvalidDieSize(sides));
            }
            *count = count
                .checked_add(dice)
                .filter(|total| *total <= MAX_DICE)
                .ok_or_else(|| DiceError::TooManyDice(s.to_string()))?;
        } else {
            let value: i32 = s
                .parse()
                .map_err(|_| DiceError::InvalidNotation(s.to_string()))?;
            *modifier = modifier
                .checked_add(sign * value)
                .ok_or_else(|| DiceError::InvalidNotation(s.to_string()))?;
        }

        Ok(())
    }

    /// Roll through a dice source and evaluate the pool.
    pub fn roll(&self, source: &mut dyn DiceSource, count_fives: bool) -> DiceOutcome {
        DiceOutcome::evaluate(source.roll(self.count), count_fives)
    }

    /// Dice total plus the flat modifier, never below zero.
    pub fn total_with_modifier(&self, outcome: &DiceOutcome) -> u32 {
        (outcome.total as i64 + self.modifier as i64).max(0) as u32
    }
}

impl FromStr for DiceExpression {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiceExpression::parse(s)
    }
}

impl fmt::Display for DiceExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

// ============================================================================
// Dice sources
// ============================================================================

/// Where the engine gets its randomness.
///
/// Die faces are the main product; the percentile roll gates status resists
/// and `pick` chooses among candidates (random ally buffs).
pub trait DiceSource: Send {
    /// Roll `die_count` six-sided dice.
    fn roll(&mut self, die_count: u32) -> Vec<RollGroup>;

    /// A uniform integer in `[0, 100)`.
    fn percentile(&mut self) -> u32;

    /// A uniform index in `[0, len)`. `len` is never zero.
    fn pick(&mut self, len: usize) -> usize;
}

/// A [`DiceSource`] backed by a `rand` generator.
pub struct RngDice<R: Rng + Send> {
    rng: R,
}

impl<R: Rng + Send> RngDice<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl RngDice<rand::rngs::StdRng> {
    /// Entropy-seeded dice for live play.
    pub fn from_entropy() -> Self {
        use rand::SeedableRng;
        Self::new(rand::rngs::StdRng::from_entropy())
    }

    /// Reproducible dice for replays.
    pub fn seeded(seed: u64) -> Self {
        use rand::SeedableRng;
        Self::new(rand::rngs::StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng + Send> DiceSource for RngDice<R> {
    fn roll(&mut self, die_count: u32) -> Vec<RollGroup> {
        let rolls = (0..die_count)
            .map(|_| DieFace {
                value: self.rng.gen_range(1..=DIE_SIDES),
            })
            .collect();
        vec![RollGroup { rolls }]
    }

    fn percentile(&mut self) -> u32 {
        self.rng.gen_range(0..100)
    }

    fn pick(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len.max(1))
    }
}
