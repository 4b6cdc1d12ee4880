//! Persistence for [`IndexState`], keyed by a logical index name.
//!
//! | Backend | Module | Layout |
//! |---------|--------|--------|
//! | Filesystem | [`filesystem`] | `<dir>/<sanitized key>/state.json` |
//! | S3 / S3-compatible | [`s3`] | `<prefix><sanitized key>/state.json` |
//! | In-memory | [`memory`] | `HashMap` keyed by sanitized key |
//!
//! Callers always pass the unsanitized key; each backend runs it through
//! [`sanitize_key`] before touching storage. [`Store::list`] returns the
//! sanitized form.

pub mod filesystem;
pub mod memory;
pub mod s3;

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use crate::config::StoreConfig;
use crate::error::IndexError;
use crate::models::IndexState;

/// File name holding the serialized state inside each key's directory.
pub const STATE_FILE: &str = "state.json";

/// Abstract persistence backend for index state.
///
/// Implementations must not retain file handles or connections between
/// calls beyond what their client library pools internally.
#[async_trait]
pub trait Store: Send + Sync {
    /// Load the state for `key`, or `None` if nothing is stored.
    async fn load(&self, key: &str) -> Result<Option<IndexState>>;

    /// Persist `state` under `key`, replacing any previous state.
    async fn save(&self, key: &str, state: &IndexState) -> Result<()>;

    /// Remove the state for `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List stored keys (sanitized form).
    async fn list(&self) -> Result<Vec<String>>;
}

/// Make a key safe for use as a path segment or object-key component.
///
/// Characters outside `[A-Za-z0-9_-]` become `_`, runs of `_` collapse to
/// one, and leading/trailing `_` are trimmed.
pub fn sanitize_key(key: &str) -> Result<String> {
    let mut out = String::with_capacity(key.len());
    for ch in key.chars() {
        let mapped = if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            ch
        } else {
            '_'
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        return Err(IndexError::InvalidKey {
            key: key.to_string(),
        }
        .into());
    }
    Ok(trimmed.to_string())
}

/// Build the store described by `[store]`.
///
/// `default_dir` is used by the filesystem store when no path is configured.
pub fn create_store(config: &StoreConfig, default_dir: &Path) -> Result<Box<dyn Store>> {
    match config {
        StoreConfig::Filesystem { path } => {
            let dir = path.clone().unwrap_or_else(|| default_dir.to_path_buf());
            Ok(Box::new(filesystem::FilesystemStore::new(dir)))
        }
        StoreConfig::S3(s3_config) => {
            let creds = s3::AwsCredentials::from_env()?;
            Ok(Box::new(s3::S3Store::new(s3_config.clone(), creds)))
        }
        StoreConfig::Memory => Ok(Box::new(memory::MemoryStore::new())),
    }
}
