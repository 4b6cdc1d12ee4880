//! Content sources.
//!
//! A source enumerates files for the indexer, describes the point it was
//! synced at, and optionally reports what changed since an earlier sync.
//!
//! | Type | Module | Change detection |
//! |------|--------|------------------|
//! | `filesystem` | [`filesystem`] | never (every run is full) |
//! | `github` | [`github`] | compare API between commits |
//! | `gitlab` | [`gitlab`] | compare API between commits |
//! | `website` | [`website`] | never |
//!
//! Every file a source yields has already passed the
//! [file filter](crate::file_filter) and the ignore rules that apply to it.

pub mod archive;
pub mod filesystem;
pub mod github;
pub mod gitlab;
pub mod vcs;
pub mod website;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::SourceConfig;
use crate::models::{ChangeDetection, FileEntry, FileInfo, SourceMetadata, SourceType};

/// The capability set shared by every source.
#[async_trait]
pub trait Source: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Every indexable file at the current sync point.
    async fn fetch_all(&self) -> Result<Vec<FileEntry>>;

    /// Files changed since `previous`, or `Unsupported` when the caller
    /// must fall back to [`fetch_all`](Source::fetch_all).
    async fn fetch_changes(&self, previous: &SourceMetadata) -> Result<ChangeDetection>;

    /// Identifier and sync point of the current content.
    async fn metadata(&self) -> Result<SourceMetadata>;

    /// Files under `dir` (recursively), or every file when `dir` is `None`.
    ///
    /// Paths that escape the source yield an empty list.
    async fn list_files(&self, dir: Option<&str>) -> Result<Vec<FileInfo>>;

    /// Contents of a single file, or `None` if it is missing, filtered, or
    /// outside the source.
    async fn read_file(&self, path: &str) -> Result<Option<String>>;
}

/// Build the source described by a `[sources.<name>]` table.
pub fn create_source(config: &SourceConfig) -> Result<Box<dyn Source>> {
    match config {
        SourceConfig::Filesystem(c) => Ok(Box::new(filesystem::FilesystemSource::new(c.clone()))),
        SourceConfig::Github(c) => Ok(Box::new(github::GitHubSource::new(c.clone())?)),
        SourceConfig::Gitlab(c) => Ok(Box::new(gitlab::GitLabSource::new(c.clone())?)),
        SourceConfig::Website(c) => Ok(Box::new(website::WebsiteSource::new(c.clone())?)),
    }
}

/// Normalize a caller-supplied directory into a `/`-terminated prefix.
///
/// Returns `None` if the directory contains a `..` segment. The root
/// (`None`, `""`, `"."`, `"/"`) maps to the empty prefix.
pub(crate) fn dir_prefix(dir: Option<&str>) -> Option<String> {
    let dir = dir.unwrap_or("").trim_matches('/');
    if crate::file_filter::has_parent_segment(dir) {
        return None;
    }
    if dir.is_empty() || dir == "." {
        return Some(String::new());
    }
    Some(format!("{}/", dir))
}

/// Keep the paths under `prefix`, sorted, as [`FileInfo`]s.
pub(crate) fn listing_under<'a>(
    paths: impl IntoIterator<Item = &'a str>,
    prefix: &str,
) -> Vec<FileInfo> {
    let mut files: Vec<FileInfo> = paths
        .into_iter()
        .filter(|p| p.starts_with(prefix))
        .map(|p| FileInfo {
            path: p.to_string(),
        })
        .collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}
