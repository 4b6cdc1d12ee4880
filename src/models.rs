//! Core data models used throughout Context Connectors.
//!
//! These types describe the files that flow from a [`Source`](crate::sources::Source)
//! into the context engine, and the state persisted by a
//! [`Store`](crate::stores::Store) between indexing runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A file produced by a source during indexing. Contents are always complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the source root, `/`-separated.
    pub path: String,
    /// Full UTF-8 contents.
    pub contents: String,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

/// A listed file without its contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
}

/// The kind of source that produced an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Filesystem,
    Github,
    Gitlab,
    Website,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Filesystem => "filesystem",
            SourceType::Github => "github",
            SourceType::Gitlab => "gitlab",
            SourceType::Website => "website",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an index came from and the point it was synced at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMetadata {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// Absolute path, `owner/repo`, GitLab project path, or base URL.
    pub identifier: String,
    /// Resolved commit for VCS sources.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
    pub synced_at: DateTime<Utc>,
}

/// The unit of persistence: opaque engine state plus source metadata.
///
/// `context_state` is never interpreted here; it round-trips untouched
/// between the engine's export and import calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexState {
    pub context_state: serde_json::Value,
    pub source: SourceMetadata,
}

/// Which code path an `index()` call took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    Full,
    Incremental,
    Unchanged,
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexType::Full => f.write_str("full"),
            IndexType::Incremental => f.write_str("incremental"),
            IndexType::Unchanged => f.write_str("unchanged"),
        }
    }
}

/// Outcome of a single [`Indexer::index`](crate::indexer::Indexer::index) call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexResult {
    #[serde(rename = "type")]
    pub index_type: IndexType,
    pub files_indexed: usize,
    pub files_removed: usize,
    /// Wall-clock duration in milliseconds.
    pub duration: u64,
}

/// Files that changed since a previous sync point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChanges {
    pub added: Vec<FileEntry>,
    pub modified: Vec<FileEntry>,
    pub removed: Vec<String>,
}

impl FileChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

/// Result of asking a source what changed.
///
/// `Unsupported` is a control-flow signal, not an error: the caller falls
/// back to a full index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDetection {
    Unsupported { reason: String },
    Changes(FileChanges),
}

impl ChangeDetection {
    pub fn unsupported(reason: impl Into<String>) -> Self {
        ChangeDetection::Unsupported {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_state_json_shape() {
        let state = IndexState {
            context_state: serde_json::json!({ "checkpoint": "abc", "blobs": [1, 2] }),
            source: SourceMetadata {
                source_type: SourceType::Github,
                identifier: "acme/widgets".to_string(),
                git_ref: Some("deadbeef".to_string()),
                synced_at: Utc::now(),
            },
        };
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["source"]["type"], "github");
        assert_eq!(value["source"]["ref"], "deadbeef");
        assert!(value["source"]["syncedAt"].is_string());
        assert_eq!(value["contextState"]["checkpoint"], "abc");
    }

    #[test]
    fn test_missing_ref_is_omitted() {
        let meta = SourceMetadata {
            source_type: SourceType::Filesystem,
            identifier: "/tmp/x".to_string(),
            git_ref: None,
            synced_at: Utc::now(),
        };
        let value = serde_json::to_value(&meta).unwrap();
        assert!(value.get("ref").is_none());
        let back: SourceMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(back.git_ref, None);
    }

    #[test]
    fn test_file_changes_is_empty() {
        let mut changes = FileChanges::default();
        assert!(changes.is_empty());
        changes.removed.push("gone.rs".to_string());
        assert!(!changes.is_empty());
    }
}
