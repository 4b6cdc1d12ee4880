//! GitHub repository source.
//!
//! Resolves the configured ref to a commit once per instance, downloads the
//! zipball at that commit for full indexes, and uses the compare API for
//! incremental ones.
//!
//! # Configuration
//!
//! ```toml
//! [sources.widgets]
//! type = "github"
//! owner = "acme"
//! repo = "widgets"
//! ref = "main"              # branch, tag, or SHA; default HEAD
//! # token = "ghp_..."       # or GITHUB_TOKEN
//! # api_url = "https://github.example.com/api/v3"
//! max_commits = 100
//! max_files = 500
//! ```
//!
//! # Force pushes
//!
//! A compare that fails (no common ancestor) or reports `diverged` falls
//! back to a full index. A force push back to an older commit that is
//! still an ancestor of the indexed one compares as `behind` with no file
//! changes and is reported as unchanged.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::archive::{extract_zip, select_files};
use super::vcs::{
    augment_rules, is_commit_sha, read_filtered, resolve_changes, unsupported_reason, Change,
    RawFiles, Thresholds,
};
use super::{dir_prefix, listing_under, Source};
use crate::config::GitHubSourceConfig;
use crate::file_filter::should_filter_path;
use crate::http::{ensure_success, is_not_found, uri_encode, uri_encode_path};
use crate::models::{ChangeDetection, FileChanges, FileEntry, FileInfo, SourceMetadata, SourceType};

const API_VERSION: &str = "2022-11-28";

/// GitHub truncates the compare `files` list at this many entries, and
/// paging the compare only pages commits.
const COMPARE_FILE_LIMIT: usize = 300;

#[derive(Debug, Deserialize)]
struct GitHubCommit {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    status: String,
    #[serde(default)]
    total_commits: usize,
    #[serde(default)]
    files: Vec<CompareFile>,
}

#[derive(Debug, Deserialize)]
struct CompareFile {
    filename: String,
    status: String,
    #[serde(default)]
    previous_filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: Option<usize>,
}

pub struct GitHubSource {
    config: GitHubSourceConfig,
    token: Option<String>,
    client: Client,
    resolved: OnceCell<String>,
}

impl GitHubSource {
    pub fn new(config: GitHubSourceConfig) -> Result<Self> {
        let token = config.resolve_token();
        let client = Client::builder()
            .user_agent(concat!("context-connectors/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            config,
            token,
            client,
            resolved: OnceCell::new(),
        })
    }

    fn repo_path(&self) -> String {
        format!("/repos/{}/{}", self.config.owner, self.config.repo)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.get_as(path, "application/vnd.github+json")
    }

    fn get_as(&self, path: &str, accept: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.api_url.trim_end_matches('/'), path);
        let mut req = self
            .client
            .get(url)
            .header(ACCEPT, accept)
            .header("X-GitHub-Api-Version", API_VERSION);
        if let Some(token) = &self.token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        req
    }

    /// The commit SHA the configured ref points at, resolved once.
    pub async fn resolve_ref(&self) -> Result<String> {
        self.resolved
            .get_or_try_init(|| async {
                if is_commit_sha(&self.config.git_ref) {
                    return Ok(self.config.git_ref.to_lowercase());
                }
                let path = format!(
                    "{}/commits/{}",
                    self.repo_path(),
                    uri_encode(&self.config.git_ref)
                );
                let resp = self.get(&path).send().await.context("GitHub request failed")?;
                let resp = ensure_success(resp, "GitHub ref resolution").await?;
                let commit: GitHubCommit = resp.json().await?;
                debug!(git_ref = %self.config.git_ref, sha = %commit.sha, "resolved ref");
                Ok::<_, anyhow::Error>(commit.sha)
            })
            .await
            .cloned()
    }

    fn identifier(&self) -> String {
        format!("{}/{}", self.config.owner, self.config.repo)
    }

    fn thresholds(&self) -> Thresholds {
        Thresholds {
            max_commits: self.config.max_commits,
            max_files: self.config.max_files,
        }
    }
}

fn to_change(file: CompareFile) -> Option<Change> {
    match file.status.as_str() {
        "removed" => Some(Change::Removed(file.filename)),
        "added" | "copied" => Some(Change::Added(file.filename)),
        "modified" | "changed" => Some(Change::Modified(file.filename)),
        "renamed" => Some(match file.previous_filename {
            Some(from) => Change::Renamed {
                from,
                to: file.filename,
            },
            None => Change::Added(file.filename),
        }),
        _ => None,
    }
}

#[async_trait]
impl RawFiles for GitHubSource {
    async fn raw_file(&self, sha: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let url = format!(
            "{}/contents/{}?ref={}",
            self.repo_path(),
            uri_encode_path(path),
            sha
        );
        let resp = self
            .get_as(&url, "application/vnd.github.raw")
            .send()
            .await
            .context("GitHub request failed")?;
        if is_not_found(resp.status()) {
            return Ok(None);
        }
        let resp = ensure_success(resp, "GitHub file download").await?;
        Ok(Some(resp.bytes().await?.to_vec()))
    }
}

#[async_trait]
impl Source for GitHubSource {
    fn source_type(&self) -> SourceType {
        SourceType::Github
    }

    async fn fetch_all(&self) -> Result<Vec<FileEntry>> {
        let sha = self.resolve_ref().await?;
        info!(repo = %self.identifier(), sha = %sha, "downloading archive");

        let path = format!("{}/zipball/{}", self.repo_path(), sha);
        let resp = self.get(&path).send().await.context("GitHub request failed")?;
        let resp = ensure_success(resp, "GitHub archive download").await?;
        let bytes = resp.bytes().await?;

        let files = select_files(
            extract_zip(&bytes, self.config.max_file_size)?,
            self.config.max_file_size,
        )?;
        debug!(repo = %self.identifier(), files = files.len(), "extracted archive");
        Ok(files)
    }

    async fn fetch_changes(&self, previous: &SourceMetadata) -> Result<ChangeDetection> {
        let Some(base) = previous.git_ref.as_deref() else {
            return Ok(ChangeDetection::unsupported("previous index has no commit ref"));
        };
        let head = self.resolve_ref().await?;
        if base == head {
            return Ok(ChangeDetection::Changes(FileChanges::default()));
        }

        let path = format!("{}/compare/{}...{}", self.repo_path(), base, head);
        let resp = self.get(&path).send().await.context("GitHub request failed")?;
        if matches!(
            resp.status(),
            StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY
        ) {
            return Ok(ChangeDetection::unsupported(
                "no common ancestor with previous commit (force push?)",
            ));
        }
        let resp = ensure_success(resp, "GitHub compare").await?;
        let compare: CompareResponse = resp.json().await?;

        if compare.status == "diverged" {
            return Ok(ChangeDetection::unsupported(
                "history diverged from previous commit (force push?)",
            ));
        }

        if compare.files.len() >= COMPARE_FILE_LIMIT {
            return Ok(ChangeDetection::unsupported(
                "compare file list truncated by GitHub",
            ));
        }

        let changes: Vec<Change> = compare.files.into_iter().filter_map(to_change).collect();
        if let Some(reason) = unsupported_reason(compare.total_commits, &changes, self.thresholds())
        {
            return Ok(ChangeDetection::Unsupported { reason });
        }

        resolve_changes(self, &head, changes, self.config.max_file_size).await
    }

    async fn metadata(&self) -> Result<SourceMetadata> {
        let sha = self.resolve_ref().await?;
        Ok(SourceMetadata {
            source_type: SourceType::Github,
            identifier: self.identifier(),
            git_ref: Some(sha),
            synced_at: Utc::now(),
        })
    }

    async fn list_files(&self, dir: Option<&str>) -> Result<Vec<FileInfo>> {
        let Some(prefix) = dir_prefix(dir) else {
            return Ok(Vec::new());
        };
        let sha = self.resolve_ref().await?;

        let path = format!("{}/git/trees/{}?recursive=1", self.repo_path(), sha);
        let resp = self.get(&path).send().await.context("GitHub request failed")?;
        let resp = ensure_success(resp, "GitHub tree listing").await?;
        let tree: TreeResponse = resp.json().await?;
        if tree.truncated {
            debug!(repo = %self.identifier(), "tree listing truncated by GitHub");
        }

        let rules = augment_rules(self, &sha).await?;
        let paths: Vec<&str> = tree
            .tree
            .iter()
            .filter(|e| e.kind == "blob")
            .filter(|e| !should_filter_path(&e.path, e.size, Some(self.config.max_file_size)))
            .filter(|e| !rules.augment_ignored(&e.path, false))
            .map(|e| e.path.as_str())
            .collect();
        Ok(listing_under(paths, &prefix))
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>> {
        let sha = self.resolve_ref().await?;
        read_filtered(self, &sha, path.trim_start_matches('/'), self.config.max_file_size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HEAD: &str = "2222222222222222222222222222222222222222";
    const BASE: &str = "1111111111111111111111111111111111111111";

    fn source_for(server: &MockServer) -> GitHubSource {
        let mut config = GitHubSourceConfig::new("acme", "widgets", "main");
        config.api_url = server.uri();
        config.token = Some("test-token".to_string());
        GitHubSource::new(config).unwrap()
    }

    fn previous() -> SourceMetadata {
        SourceMetadata {
            source_type: SourceType::Github,
            identifier: "acme/widgets".to_string(),
            git_ref: Some(BASE.to_string()),
            synced_at: Utc::now(),
        }
    }

    async fn mount_ref(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/commits/main"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "sha": HEAD })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_ref_resolved_once() {
        let server = MockServer::start().await;
        mount_ref(&server).await;

        let source = source_for(&server);
        assert_eq!(source.resolve_ref().await.unwrap(), HEAD);
        assert_eq!(source.metadata().await.unwrap().git_ref.as_deref(), Some(HEAD));
    }

    #[tokio::test]
    async fn test_compare_failure_is_unsupported() {
        let server = MockServer::start().await;
        mount_ref(&server).await;
        Mock::given(method("GET"))
            .and(path(format!("/repos/acme/widgets/compare/{}...{}", BASE, HEAD)))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = source_for(&server).fetch_changes(&previous()).await.unwrap();
        assert!(matches!(result, ChangeDetection::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_diverged_is_unsupported() {
        let server = MockServer::start().await;
        mount_ref(&server).await;
        Mock::given(method("GET"))
            .and(path(format!("/repos/acme/widgets/compare/{}...{}", BASE, HEAD)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "diverged",
                "total_commits": 2,
                "files": [{ "filename": "a.rs", "status": "modified" }]
            })))
            .mount(&server)
            .await;

        let result = source_for(&server).fetch_changes(&previous()).await.unwrap();
        assert!(matches!(result, ChangeDetection::Unsupported { reason } if reason.contains("diverged")));
    }

    #[tokio::test]
    async fn test_compare_maps_statuses() {
        let server = MockServer::start().await;
        mount_ref(&server).await;
        Mock::given(method("GET"))
            .and(path(format!("/repos/acme/widgets/compare/{}...{}", BASE, HEAD)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ahead",
                "total_commits": 3,
                "files": [
                    { "filename": "src/new.rs", "status": "added" },
                    { "filename": "src/lib.rs", "status": "modified" },
                    { "filename": "src/old.rs", "status": "removed" },
                    { "filename": "src/renamed.rs", "status": "renamed", "previous_filename": "src/before.rs" }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/contents/.augmentignore"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        for (file, body) in [
            ("src/new.rs", "fn new() {}"),
            ("src/lib.rs", "pub mod new;"),
            ("src/renamed.rs", "fn renamed() {}"),
        ] {
            Mock::given(method("GET"))
                .and(path(format!("/repos/acme/widgets/contents/{}", file)))
                .and(header("accept", "application/vnd.github.raw"))
                .respond_with(ResponseTemplate::new(200).set_body_string(body))
                .mount(&server)
                .await;
        }

        let ChangeDetection::Changes(changes) =
            source_for(&server).fetch_changes(&previous()).await.unwrap()
        else {
            panic!("expected changes");
        };
        assert_eq!(
            changes.added,
            vec![
                FileEntry::new("src/new.rs", "fn new() {}"),
                FileEntry::new("src/renamed.rs", "fn renamed() {}"),
            ]
        );
        assert_eq!(changes.modified, vec![FileEntry::new("src/lib.rs", "pub mod new;")]);
        assert_eq!(changes.removed, vec!["src/old.rs", "src/before.rs"]);
    }

    #[tokio::test]
    async fn test_truncated_compare_is_unsupported() {
        let server = MockServer::start().await;
        mount_ref(&server).await;
        let files: Vec<_> = (0..COMPARE_FILE_LIMIT)
            .map(|i| serde_json::json!({ "filename": format!("src/f{}.rs", i), "status": "modified" }))
            .collect();
        Mock::given(method("GET"))
            .and(path(format!("/repos/acme/widgets/compare/{}...{}", BASE, HEAD)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ahead",
                "total_commits": 4,
                "files": files
            })))
            .mount(&server)
            .await;

        let mut config = GitHubSourceConfig::new("acme", "widgets", "main");
        config.api_url = server.uri();
        config.token = Some("test-token".to_string());
        config.max_files = 500;
        let source = GitHubSource::new(config).unwrap();

        let result = source.fetch_changes(&previous()).await.unwrap();
        assert!(matches!(result, ChangeDetection::Unsupported { reason } if reason.contains("truncated")));
        let contents_requests = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.url.path().contains("/contents/"))
            .count();
        assert_eq!(contents_requests, 0);
    }

    #[tokio::test]
    async fn test_gitignore_change_forces_full_index() {
        let server = MockServer::start().await;
        mount_ref(&server).await;
        Mock::given(method("GET"))
            .and(path(format!("/repos/acme/widgets/compare/{}...{}", BASE, HEAD)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ahead",
                "total_commits": 1,
                "files": [{ "filename": ".gitignore", "status": "modified" }]
            })))
            .mount(&server)
            .await;

        let result = source_for(&server).fetch_changes(&previous()).await.unwrap();
        assert_eq!(result, ChangeDetection::unsupported("ignore rules changed"));
    }

    #[tokio::test]
    async fn test_same_commit_is_empty_changes() {
        let server = MockServer::start().await;
        let mut config = GitHubSourceConfig::new("acme", "widgets", BASE);
        config.api_url = server.uri();
        let source = GitHubSource::new(config).unwrap();

        let result = source.fetch_changes(&previous()).await.unwrap();
        assert_eq!(result, ChangeDetection::Changes(FileChanges::default()));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_file_rejects_traversal_without_requests() {
        let server = MockServer::start().await;
        let mut config = GitHubSourceConfig::new("acme", "widgets", BASE);
        config.api_url = server.uri();
        let source = GitHubSource::new(config).unwrap();

        assert_eq!(source.read_file("../etc/passwd").await.unwrap(), None);
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
