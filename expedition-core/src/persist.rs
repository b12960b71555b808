//! Battle persistence for save/load functionality.
//!
//! A battle snapshot is written as pretty JSON so it can be inspected and
//! hand-edited between sessions.

use crate::battle::{Battle, BattleId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current save file version.
const SAVE_VERSION: u32 = 1;

/// A saved battle with all state needed to resume it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedBattle {
    /// Save format version for compatibility checking.
    pub version: u32,

    /// When the save was created, in seconds since the Unix epoch.
    pub saved_at: String,

    pub metadata: SaveMetadata,

    pub battle: Battle,
}

/// Summary fields readable without loading the whole battle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveMetadata {
    pub battle_id: BattleId,
    pub name: String,
    pub round: u32,
    pub combatants: usize,
    pub standing: usize,
}

impl SavedBattle {
    pub fn new(battle: Battle) -> Self {
        let metadata = SaveMetadata {
            battle_id: battle.id,
            name: battle.name.clone(),
            round: battle.round,
            combatants: battle.characters().count(),
            standing: battle.living().count(),
        };
        Self {
            version: SAVE_VERSION,
            saved_at: chrono_now(),
            metadata,
            battle,
        }
    }

    /// Save to a JSON file.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Load from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        let saved: Self = serde_json::from_str(&content)?;

        if saved.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: saved.version,
            });
        }

        Ok(saved)
    }

    /// Read only the metadata of a save file.
    pub async fn peek_metadata(path: impl AsRef<Path>) -> Result<SaveMetadata, PersistError> {
        let content = fs::read_to_string(path).await?;

        #[derive(Deserialize)]
        struct Partial {
            version: u32,
            metadata: SaveMetadata,
        }

        let partial: Partial = serde_json::from_str(&content)?;
        if partial.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: partial.version,
            });
        }
        Ok(partial.metadata)
    }
}

/// Information about a save file.
#[derive(Debug, Clone)]
pub struct SaveInfo {
    pub path: PathBuf,
    pub metadata: SaveMetadata,
}

/// List every readable battle save in a directory, sorted by battle id.
///
/// A missing directory yields an empty list.
pub async fn list_saves(dir: impl AsRef<Path>) -> Result<Vec<SaveInfo>, PersistError> {
    let dir = dir.as_ref();
    if !fs::try_exists(dir).await? {
        return Ok(Vec::new());
    }

    let mut saves = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            match SavedBattle::peek_metadata(&path).await {
                Ok(metadata) => saves.push(SaveInfo { path, metadata }),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable save"),
            }
        }
    }

    saves.sort_by_key(|s| s.metadata.battle_id);
    Ok(saves)
}

/// File name for a battle save.
pub fn battle_save_path(dir: impl AsRef<Path>, battle: &Battle) -> PathBuf {
    let sanitized = battle
        .name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>();
    dir.as_ref()
        .join(format!("battle_{}_{sanitized}.json", battle.id))
}

/// Current time as seconds since the Unix epoch.
fn chrono_now() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}", now.as_secs())
}
