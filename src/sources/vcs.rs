//! Change handling shared by the hosted-VCS sources.
//!
//! GitHub and GitLab both answer "what changed between two commits" with a
//! list of per-file statuses. They are normalized into [`Change`] and then
//! turned into [`FileChanges`] by fetching each added or modified file at
//! the new commit and running it through the same pipeline as a full
//! archive.

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::archive::accept_file;
use crate::file_filter::has_parent_segment;
use crate::ignore_rules::{is_ignore_file, IgnoreRules, AUGMENTIGNORE};
use crate::models::{ChangeDetection, FileChanges, FileEntry};

/// One file's status between two commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Added(String),
    Modified(String),
    Removed(String),
    Renamed { from: String, to: String },
}

impl Change {
    fn paths(&self) -> impl Iterator<Item = &str> {
        let (a, b) = match self {
            Change::Added(p) | Change::Modified(p) | Change::Removed(p) => (p.as_str(), None),
            Change::Renamed { from, to } => (from.as_str(), Some(to.as_str())),
        };
        std::iter::once(a).chain(b)
    }
}

/// Raw file access at a given commit.
#[async_trait]
pub trait RawFiles: Send + Sync {
    /// File bytes at `sha`, or `None` if the path does not exist there.
    async fn raw_file(&self, sha: &str, path: &str) -> Result<Option<Vec<u8>>>;
}

/// Limits past which a diff is not worth applying incrementally.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub max_commits: usize,
    pub max_files: usize,
}

/// Decide whether a compare result can be applied incrementally.
///
/// Returns the reason to fall back to a full index, if any.
pub fn unsupported_reason(
    commit_count: usize,
    changes: &[Change],
    thresholds: Thresholds,
) -> Option<String> {
    if commit_count > thresholds.max_commits {
        return Some(format!(
            "{} commits since last sync exceeds max_commits ({})",
            commit_count, thresholds.max_commits
        ));
    }
    if changes.len() > thresholds.max_files {
        return Some(format!(
            "{} changed files exceeds max_files ({})",
            changes.len(),
            thresholds.max_files
        ));
    }
    if changes.iter().flat_map(Change::paths).any(is_ignore_file) {
        return Some("ignore rules changed".to_string());
    }
    None
}

/// `.augmentignore` at `sha`, or empty rules if it does not exist.
pub async fn augment_rules(files: &dyn RawFiles, sha: &str) -> Result<IgnoreRules> {
    let contents = files.raw_file(sha, AUGMENTIGNORE).await?;
    let text = contents.map(|b| String::from_utf8_lossy(&b).into_owned());
    IgnoreRules::from_contents(text.as_deref(), None, &[])
}

/// Read one file at `sha`, applying `.augmentignore` and the filter.
pub async fn read_filtered(
    files: &dyn RawFiles,
    sha: &str,
    path: &str,
    max_file_size: usize,
) -> Result<Option<String>> {
    if has_parent_segment(path) {
        return Ok(None);
    }
    let rules = augment_rules(files, sha).await?;
    if rules.augment_ignored(path, false) {
        return Ok(None);
    }
    let Some(bytes) = files.raw_file(sha, path).await? else {
        return Ok(None);
    };
    Ok(accept_file(&rules, path, bytes, max_file_size).map(|entry| entry.contents))
}

/// Turn normalized changes into [`FileChanges`] against commit `sha`.
///
/// A modified file that no longer passes the filter is reported as
/// removed, since an earlier version of it may be in the index.
pub async fn resolve_changes(
    files: &dyn RawFiles,
    sha: &str,
    changes: Vec<Change>,
    max_file_size: usize,
) -> Result<ChangeDetection> {
    let rules = augment_rules(files, sha).await?;
    let mut result = FileChanges::default();

    for change in changes {
        match change {
            Change::Removed(path) => result.removed.push(path),
            Change::Added(path) => {
                if let Some(entry) = fetch_entry(files, &rules, sha, &path, max_file_size).await? {
                    result.added.push(entry);
                }
            }
            Change::Renamed { from, to } => {
                result.removed.push(from);
                if let Some(entry) = fetch_entry(files, &rules, sha, &to, max_file_size).await? {
                    result.added.push(entry);
                }
            }
            Change::Modified(path) => {
                match fetch_entry(files, &rules, sha, &path, max_file_size).await? {
                    Some(entry) => result.modified.push(entry),
                    None => result.removed.push(path),
                }
            }
        }
    }

    debug!(
        added = result.added.len(),
        modified = result.modified.len(),
        removed = result.removed.len(),
        "resolved changes"
    );
    Ok(ChangeDetection::Changes(result))
}

async fn fetch_entry(
    files: &dyn RawFiles,
    rules: &IgnoreRules,
    sha: &str,
    path: &str,
    max_file_size: usize,
) -> Result<Option<FileEntry>> {
    if has_parent_segment(path) || rules.augment_ignored(path, false) {
        return Ok(None);
    }
    let Some(bytes) = files.raw_file(sha, path).await? else {
        return Ok(None);
    };
    Ok(accept_file(rules, path, bytes, max_file_size))
}

/// True if `s` looks like a full 40-character commit SHA.
pub fn is_commit_sha(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeFiles(HashMap<&'static str, Vec<u8>>);

    #[async_trait]
    impl RawFiles for FakeFiles {
        async fn raw_file(&self, _sha: &str, path: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.0.get(path).cloned())
        }
    }

    fn limits() -> Thresholds {
        Thresholds {
            max_commits: 100,
            max_files: 500,
        }
    }

    #[test]
    fn test_ignore_file_change_is_unsupported() {
        let changes = vec![
            Change::Modified("src/lib.rs".to_string()),
            Change::Modified("docs/.gitignore".to_string()),
        ];
        assert_eq!(
            unsupported_reason(1, &changes, limits()).as_deref(),
            Some("ignore rules changed")
        );

        let renamed = vec![Change::Renamed {
            from: ".augmentignore".to_string(),
            to: "old.augmentignore".to_string(),
        }];
        assert!(unsupported_reason(1, &renamed, limits()).is_some());
    }

    #[test]
    fn test_thresholds() {
        let changes = vec![Change::Added("a".to_string()), Change::Added("b".to_string())];
        let tight = Thresholds {
            max_commits: 3,
            max_files: 1,
        };
        assert!(unsupported_reason(4, &changes, limits()).is_none());
        assert!(unsupported_reason(4, &changes[..1], tight)
            .unwrap()
            .contains("max_commits"));
        assert!(unsupported_reason(1, &changes, tight)
            .unwrap()
            .contains("max_files"));
    }

    #[tokio::test]
    async fn test_resolve_changes() {
        let files = FakeFiles(HashMap::from([
            (".augmentignore", b"vendor/\n".to_vec()),
            ("new.rs", b"fn new() {}".to_vec()),
            ("moved.rs", b"fn moved() {}".to_vec()),
            ("edited.rs", b"fn edited() {}".to_vec()),
            ("now-binary.dat", vec![0xff, 0xfe]),
            ("vendor/lib.rs", b"fn vendored() {}".to_vec()),
        ]));
        let changes = vec![
            Change::Added("new.rs".to_string()),
            Change::Added("vendor/lib.rs".to_string()),
            Change::Renamed {
                from: "old.rs".to_string(),
                to: "moved.rs".to_string(),
            },
            Change::Modified("edited.rs".to_string()),
            Change::Modified("now-binary.dat".to_string()),
            Change::Removed("gone.rs".to_string()),
        ];

        let ChangeDetection::Changes(result) =
            resolve_changes(&files, "sha", changes, 1024).await.unwrap()
        else {
            panic!("expected changes");
        };

        let added: Vec<_> = result.added.iter().map(|f| f.path.as_str()).collect();
        let modified: Vec<_> = result.modified.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(added, vec!["new.rs", "moved.rs"]);
        assert_eq!(modified, vec!["edited.rs"]);
        assert_eq!(result.removed, vec!["old.rs", "now-binary.dat", "gone.rs"]);
    }

    #[test]
    fn test_is_commit_sha() {
        assert!(is_commit_sha("0123456789abcdef0123456789abcdef01234567"));
        assert!(!is_commit_sha("main"));
        assert!(!is_commit_sha("0123456"));
    }
}
