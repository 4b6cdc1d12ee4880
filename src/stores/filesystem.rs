//! Filesystem [`Store`]: one directory per key holding a pretty-printed
//! `state.json`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{sanitize_key, Store, STATE_FILE};
use crate::models::IndexState;

pub struct FilesystemStore {
    base_dir: PathBuf,
}

impl FilesystemStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn key_dir(&self, key: &str) -> Result<PathBuf> {
        Ok(self.base_dir.join(sanitize_key(key)?))
    }
}

#[async_trait]
impl Store for FilesystemStore {
    async fn load(&self, key: &str) -> Result<Option<IndexState>> {
        let path = self.key_dir(key)?.join(STATE_FILE);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        let state = serde_json::from_slice(&data)
            .with_context(|| format!("Malformed index state: {}", path.display()))?;
        Ok(Some(state))
    }

    async fn save(&self, key: &str, state: &IndexState) -> Result<()> {
        let dir = self.key_dir(key)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let json = serde_json::to_vec_pretty(state)?;
        // Write then rename so a crash never leaves a half-written state file.
        let tmp = dir.join(format!("{}.tmp", STATE_FILE));
        let path = dir.join(STATE_FILE);
        tokio::fs::write(&tmp, &json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        debug!(key, path = %path.display(), "saved index state");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let dir = self.key_dir(key)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", dir.display())),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to list {}", self.base_dir.display()))
            }
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let state_path = entry.path().join(STATE_FILE);
            let Ok(data) = tokio::fs::read(&state_path).await else {
                continue;
            };
            if serde_json::from_slice::<IndexState>(&data).is_err() {
                debug!(path = %state_path.display(), "skipping malformed index state");
                continue;
            }
            keys.push(entry.file_name().to_string_lossy().to_string());
        }

        keys.sort();
        Ok(keys)
    }
}
