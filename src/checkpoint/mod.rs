use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};

use chrono::Utc;

use crate::core::{
    models::{
        BookState,
        STATE_VERSION,
    },
    AnkimineError,
};

pub const CHECKPOINT_FILENAME: &str = "checkpoint.json";
const TMP_SUFFIX: &str = "tmp";
const BACKUP_SUFFIX: &str = "bak";

/// Owns the durable copy of a book's pipeline state. One manager per book
/// output directory; concurrent saves for the same book must go through the
/// same manager (single-writer).
pub struct CheckpointManager {
    checkpoint_path: PathBuf,
}

impl CheckpointManager {
    pub fn new(output_dir: &Path) -> Self {
        Self { checkpoint_path: output_dir.join(CHECKPOINT_FILENAME) }
    }

    pub fn path(&self) -> &Path {
        &self.checkpoint_path
    }

    pub fn exists(&self) -> bool {
        self.checkpoint_path.exists()
    }

    /// Atomically persist the complete book state. The write goes to a
    /// temporary file that is renamed over the checkpoint, so a crash
    /// mid-save leaves the previous commit intact. The previous commit is
    /// also kept as a .bak alongside.
    pub fn save(&self, state: &mut BookState) -> Result<(), AnkimineError> {
        state.updated_at = Utc::now();

        if let Some(parent) = self.checkpoint_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AnkimineError::PersistenceWrite(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(state)?;

        let tmp_path = self.checkpoint_path.with_extension(TMP_SUFFIX);
        fs::write(&tmp_path, json).map_err(|e| AnkimineError::PersistenceWrite(e.to_string()))?;

        if self.checkpoint_path.exists() {
            fs::copy(&self.checkpoint_path, self.checkpoint_path.with_extension(BACKUP_SUFFIX))
                .map_err(|e| AnkimineError::PersistenceWrite(e.to_string()))?;
        }

        fs::rename(&tmp_path, &self.checkpoint_path)
            .map_err(|e| AnkimineError::PersistenceWrite(e.to_string()))?;

        log::debug!("checkpoint saved to {}", self.checkpoint_path.display());
        Ok(())
    }

    /// Restore the most recently committed state. A missing file is
    /// NotFound; a present-but-unreadable file is CorruptCheckpoint and is
    /// never deleted or repaired here.
    pub fn load(&self) -> Result<BookState, AnkimineError> {
        let path = self.checkpoint_path.display().to_string();

        if !self.exists() {
            return Err(AnkimineError::CheckpointNotFound(path));
        }

        let content = fs::read_to_string(&self.checkpoint_path)
            .map_err(|e| AnkimineError::CorruptCheckpoint { path: path.clone(), reason: e.to_string() })?;

        let state: BookState = serde_json::from_str(&content)
            .map_err(|e| AnkimineError::CorruptCheckpoint { path: path.clone(), reason: e.to_string() })?;

        if state.version != STATE_VERSION {
            return Err(AnkimineError::CorruptCheckpoint {
                path,
                reason: format!("unsupported checkpoint version {}", state.version),
            });
        }

        Ok(state)
    }

    /// Remove the checkpoint (and its backup). Only called on an explicit
    /// user request; a corrupt checkpoint is never cleared automatically.
    pub fn delete(&self) -> Result<bool, AnkimineError> {
        let backup = self.checkpoint_path.with_extension(BACKUP_SUFFIX);
        if backup.exists() {
            fs::remove_file(&backup)?;
        }
        if self.exists() {
            fs::remove_file(&self.checkpoint_path)?;
            return Ok(true);
        }
        Ok(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResumeSummary {
    pub title: String,
    pub author: String,
    pub chapters_finalized: usize,
    pub chapters_total: usize,
    pub total_cards: usize,
    pub updated_at: chrono::DateTime<Utc>,
}

pub fn resume_summary(state: &BookState) -> ResumeSummary {
    ResumeSummary {
        title: state.title.clone(),
        author: state.author.clone(),
        chapters_finalized: state.finalized_indices().len(),
        chapters_total: state.chapter_count,
        total_cards: state.total_cards(),
        updated_at: state.updated_at,
    }
}
