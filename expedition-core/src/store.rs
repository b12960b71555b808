//! In-memory battle store.
//!
//! Each battle lives behind its own async mutex, so operations on one battle
//! run strictly one after another while different battles never wait on each
//! other. Every mutation goes through [`BattleStore::transaction`]: the
//! operation runs against a working copy and the copy replaces the stored
//! battle only if the operation succeeds.

use crate::battle::{Battle, BattleId};
use crate::error::BattleError;
use crate::persist::PersistError;
use crate::rules::SkillOutcome;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Errors from the battle store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Battle not found: {0}")]
    BattleMissing(BattleId),

    #[error("Battle already exists: {0}")]
    DuplicateBattle(BattleId),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),
}

/// Client-supplied key that makes a skill use safe to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionToken(pub Uuid);

impl ActionToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How many token-keyed outcomes each battle remembers.
pub const REPLAY_WINDOW: usize = 64;

/// Outcomes of the most recent token-keyed actions, oldest first.
#[derive(Default)]
struct ReplayLog {
    order: VecDeque<ActionToken>,
    outcomes: HashMap<ActionToken, SkillOutcome>,
}

impl ReplayLog {
    fn get(&self, token: &ActionToken) -> Option<&SkillOutcome> {
        self.outcomes.get(token)
    }

    fn record(&mut self, token: ActionToken, outcome: SkillOutcome) {
        if self.outcomes.insert(token, outcome).is_none() {
            self.order.push_back(token);
        }
        while self.order.len() > REPLAY_WINDOW {
            if let Some(oldest) = self.order.pop_front() {
                self.outcomes.remove(&oldest);
            }
        }
    }
}

/// One stored battle plus the outcomes of token-keyed actions against it.
struct BattleSlot {
    battle: Battle,
    replays: ReplayLog,
}

/// Every live battle.
pub struct BattleStore {
    battles: RwLock<HashMap<BattleId, Arc<Mutex<BattleSlot>>>>,
    next_id: AtomicU64,
}

impl Default for BattleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BattleStore {
    pub fn new() -> Self {
        Self {
            battles: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create an empty battle with a fresh id.
    pub async fn create(&self, name: impl Into<String>) -> BattleId {
        let mut battles = self.battles.write().await;
        let mut id = BattleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        while battles.contains_key(&id) {
            id = BattleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        }
        battles.insert(id, Self::slot_for(Battle::new(id, name)));
        id
    }

    /// Store an existing battle, e.g. one loaded from disk.
    pub async fn insert(&self, battle: Battle) -> Result<BattleId, StoreError> {
        let id = battle.id;
        let mut battles = self.battles.write().await;
        if battles.contains_key(&id) {
            return Err(StoreError::DuplicateBattle(id));
        }
        self.next_id.fetch_max(id.0 + 1, Ordering::Relaxed);
        battles.insert(id, Self::slot_for(battle));
        Ok(id)
    }

    /// Drop a battle and everything that belongs to it.
    pub async fn remove(&self, id: BattleId) -> Result<Battle, StoreError> {
        let slot = self
            .battles
            .write()
            .await
            .remove(&id)
            .ok_or(StoreError::BattleMissing(id))?;
        let slot = slot.lock().await;
        Ok(slot.battle.clone())
    }

    pub async fn ids(&self) -> Vec<BattleId> {
        let mut ids: Vec<BattleId> = self.battles.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// A consistent copy of a battle.
    pub async fn snapshot(&self, id: BattleId) -> Result<Battle, StoreError> {
        let slot = self.slot(id).await?;
        let slot = slot.lock().await;
        Ok(slot.battle.clone())
    }

    /// Run an operation as one all-or-nothing unit against a battle.
    pub async fn transaction<T, F>(&self, id: BattleId, operation: F) -> Result<T, BattleError>
    where
        F: FnOnce(&mut Battle) -> Result<T, BattleError>,
    {
        let slot = self.slot(id).await?;
        let mut slot = slot.lock().await;
        Self::commit(&mut slot.battle, operation)
    }

    /// Like [`transaction`](Self::transaction) for skill uses, replaying the
    /// recorded outcome when the token has already been honored.
    pub async fn transaction_once<F>(
        &self,
        id: BattleId,
        token: Option<ActionToken>,
        operation: F,
    ) -> Result<SkillOutcome, BattleError>
    where
        F: FnOnce(&mut Battle) -> Result<SkillOutcome, BattleError>,
    {
        let slot = self.slot(id).await?;
        let mut slot = slot.lock().await;

        if let Some(outcome) = token.and_then(|t| slot.replays.get(&t)) {
            tracing::info!(battle = %id, token = ?token, "replaying recorded outcome");
            return Ok(outcome.clone());
        }

        let outcome = Self::commit(&mut slot.battle, operation)?;
        if let Some(token) = token {
            slot.replays.record(token, outcome.clone());
        }
        Ok(outcome)
    }

    async fn slot(&self, id: BattleId) -> Result<Arc<Mutex<BattleSlot>>, StoreError> {
        self.battles
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::BattleMissing(id))
    }

    fn slot_for(battle: Battle) -> Arc<Mutex<BattleSlot>> {
        Arc::new(Mutex::new(BattleSlot {
            battle,
            replays: ReplayLog::default(),
        }))
    }

    fn commit<T, F>(stored: &mut Battle, operation: F) -> Result<T, BattleError>
    where
        F: FnOnce(&mut Battle) -> Result<T, BattleError>,
    {
        let mut working = stored.clone();
        match operation(&mut working) {
            Ok(value) => {
                *stored = working;
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(battle = %stored.id, error = %e, "operation rolled back");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::{BattleCharacter, CharacterId};

    #[tokio::test]
    async fn test_create_and_snapshot() {
        let store = BattleStore::new();
        let id = store.create("Gestral Beach").await;
        let battle = store.snapshot(id).await.unwrap();
        assert_eq!(battle.name, "Gestral Beach");
        assert_eq!(store.ids().await, vec![id]);
    }

    #[tokio::test]
    async fn test_failed_transaction_rolls_back() {
        let store = BattleStore::new();
        let id = store.create("Test").await;
        let hero = store
            .transaction(id, |b| Ok(b.add_character(BattleCharacter::player("Lune", 80))))
            .await
            .unwrap();

        let result: Result<(), BattleError> = store
            .transaction(id, |b| {
                b.apply_damage(hero, 50);
                Err(BattleError::InvalidOrder("late failure".to_string()))
            })
            .await;

        assert!(result.is_err());
        let battle = store.snapshot(id).await.unwrap();
        assert_eq!(battle.character(hero).unwrap().health_points, 80);
    }

    #[tokio::test]
    async fn test_missing_battle() {
        let store = BattleStore::new();
        let err = store.snapshot(BattleId(9)).await.unwrap_err();
        assert!(matches!(err, StoreError::BattleMissing(BattleId(9))));
        let err = store.transaction(BattleId(9), |_| Ok(())).await.unwrap_err();
        assert!(matches!(
            err,
            BattleError::Storage(StoreError::BattleMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_insert_duplicate() {
        let store = BattleStore::new();
        store.insert(Battle::new(BattleId(5), "A")).await.unwrap();
        let err = store.insert(Battle::new(BattleId(5), "B")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateBattle(BattleId(5))));
        let next = store.create("C").await;
        assert_eq!(next, BattleId(6));
    }

    #[tokio::test]
    async fn test_concurrent_transactions_serialize() {
        let store = Arc::new(BattleStore::new());
        let id = store.create("Test").await;
        let hero = store
            .transaction(id, |b| Ok(b.add_character(BattleCharacter::player("Verso", 100))))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .transaction(id, |b| Ok(b.apply_damage(hero, 5)))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let battle = store.snapshot(id).await.unwrap();
        assert_eq!(battle.character(hero).unwrap().health_points, 50);
    }

    fn outcome(label: &str) -> SkillOutcome {
        SkillOutcome {
            skill: label.into(),
            actor: CharacterId(1),
            target: CharacterId(1),
            dice: None,
            per_hit_damage: Vec::new(),
            applied_effects: Vec::new(),
            log: Vec::new(),
            narrative: label.to_string(),
        }
    }

    #[tokio::test]
    async fn test_replay_log_keeps_recent_tokens_only() {
        let store = BattleStore::new();
        let id = store.create("Test").await;
        let tokens: Vec<ActionToken> = (0..=REPLAY_WINDOW).map(|_| ActionToken::new()).collect();
        for token in &tokens {
            store
                .transaction_once(id, Some(*token), |_| Ok(outcome("first")))
                .await
                .unwrap();
        }

        let recent = store
            .transaction_once(id, tokens.last().copied(), |_| Ok(outcome("again")))
            .await
            .unwrap();
        assert_eq!(recent.narrative, "first");

        let evicted = store
            .transaction_once(id, Some(tokens[0]), |_| Ok(outcome("again")))
            .await
            .unwrap();
        assert_eq!(evicted.narrative, "again");
    }
}
