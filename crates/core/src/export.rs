use crate::config::SessionConfig;
use crate::error::BuildError;
use crate::index::IndexSnapshot;
use crate::models::{ChatTurn, Chunk, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Everything the export collaborator needs to assemble a downloadable
/// bundle: the cleaned text, chunk list with offsets, the index snapshot
/// (ids, vectors, metric identifier) for bit-faithful reload, the chat
/// history, and the effective configuration. Read-only with respect to the
/// session; the collaborator never mutates core state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionBundle {
    pub session_id: Uuid,
    pub exported_at: DateTime<Utc>,
    pub config: SessionConfig,
    pub document: Document,
    pub chunks: Vec<Chunk>,
    pub index: IndexSnapshot,
    pub history: Vec<ChatTurn>,
}

impl SessionBundle {
    /// Write the bundle as individual files into `dir`, creating it if
    /// needed. File layout matches what the ZIP-building collaborator
    /// expects: `cleaned_text.txt`, `chunks.json`, `index.json`,
    /// `chat_history.json`, `config.json`.
    pub fn write_to_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, BuildError> {
        fs::create_dir_all(dir)?;

        let text_path = dir.join("cleaned_text.txt");
        fs::write(&text_path, &self.document.text)?;

        let chunks_path = dir.join("chunks.json");
        fs::write(&chunks_path, serde_json::to_string_pretty(&self.chunks)?)?;

        let index_path = dir.join("index.json");
        fs::write(&index_path, serde_json::to_string_pretty(&self.index)?)?;

        let history_path = dir.join("chat_history.json");
        fs::write(&history_path, serde_json::to_string_pretty(&self.history)?)?;

        let config_path = dir.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(&self.config)?)?;

        info!(session_id = %self.session_id, dir = %dir.display(), "session exported");
        Ok(vec![
            text_path,
            chunks_path,
            index_path,
            history_path,
            config_path,
        ])
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Reload just the index snapshot written by [`SessionBundle::write_to_dir`].
pub fn read_index_snapshot(dir: &Path) -> Result<IndexSnapshot, BuildError> {
    let raw = fs::read_to_string(dir.join("index.json"))?;
    Ok(serde_json::from_str(&raw)?)
}
