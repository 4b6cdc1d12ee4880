//! GitLab project source.
//!
//! Same shape as the GitHub source: the ref is resolved to a commit once,
//! full indexes download `archive.zip`, and incremental ones use the
//! repository compare API.
//!
//! # Configuration
//!
//! ```toml
//! [sources.infra]
//! type = "gitlab"
//! project = "ops/infra"
//! ref = "main"
//! # token = "glpat-..."     # or GITLAB_TOKEN
//! # api_url = "https://gitlab.example.com/api/v4"
//! ```
//!
//! GitLab's compare does not report divergence. A compare that fails is
//! treated as a history rewrite; anything else is trusted.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
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
use crate::config::GitLabSourceConfig;
use crate::file_filter::should_filter_path;
use crate::http::{ensure_success, is_not_found, uri_encode};
use crate::models::{ChangeDetection, FileChanges, FileEntry, FileInfo, SourceMetadata, SourceType};

#[derive(Debug, Deserialize)]
struct GitLabCommit {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    #[serde(default)]
    commits: Vec<serde_json::Value>,
    #[serde(default)]
    diffs: Vec<CompareDiff>,
}

#[derive(Debug, Deserialize)]
struct CompareDiff {
    old_path: String,
    new_path: String,
    #[serde(default)]
    new_file: bool,
    #[serde(default)]
    renamed_file: bool,
    #[serde(default)]
    deleted_file: bool,
}

impl CompareDiff {
    fn into_change(self) -> Change {
        if self.deleted_file {
            Change::Removed(self.old_path)
        } else if self.new_file {
            Change::Added(self.new_path)
        } else if self.renamed_file {
            Change::Renamed {
                from: self.old_path,
                to: self.new_path,
            }
        } else {
            Change::Modified(self.new_path)
        }
    }
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

pub struct GitLabSource {
    config: GitLabSourceConfig,
    token: Option<String>,
    client: Client,
    resolved: OnceCell<String>,
}

impl GitLabSource {
    pub fn new(config: GitLabSourceConfig) -> Result<Self> {
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

    fn project_path(&self) -> String {
        format!("/projects/{}/repository", uri_encode(&self.config.project))
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.api_url.trim_end_matches('/'), path);
        let mut req = self.client.get(url);
        if let Some(token) = &self.token {
            req = req.header("PRIVATE-TOKEN", token);
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
                    self.project_path(),
                    uri_encode(&self.config.git_ref)
                );
                let resp = self.get(&path).send().await.context("GitLab request failed")?;
                let resp = ensure_success(resp, "GitLab ref resolution").await?;
                let commit: GitLabCommit = resp.json().await?;
                debug!(git_ref = %self.config.git_ref, sha = %commit.id, "resolved ref");
                Ok::<_, anyhow::Error>(commit.id)
            })
            .await
            .cloned()
    }

    /// Every blob path in the repository tree at `sha`, following
    /// `x-next-page` pagination.
    async fn tree(&self, sha: &str) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        let mut page = "1".to_string();
        loop {
            let path = format!(
                "{}/tree?recursive=true&per_page=100&ref={}&page={}",
                self.project_path(),
                sha,
                page
            );
            let resp = self.get(&path).send().await.context("GitLab request failed")?;
            let resp = ensure_success(resp, "GitLab tree listing").await?;
            let next = resp
                .headers()
                .get("x-next-page")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .unwrap_or_default();
            let entries: Vec<TreeEntry> = resp.json().await?;
            paths.extend(entries.into_iter().filter(|e| e.kind == "blob").map(|e| e.path));

            if next.is_empty() {
                break;
            }
            page = next;
        }
        Ok(paths)
    }
}

#[async_trait]
impl RawFiles for GitLabSource {
    async fn raw_file(&self, sha: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let url = format!(
            "{}/files/{}/raw?ref={}",
            self.project_path(),
            uri_encode(path),
            sha
        );
        let resp = self.get(&url).send().await.context("GitLab request failed")?;
        if is_not_found(resp.status()) {
            return Ok(None);
        }
        let resp = ensure_success(resp, "GitLab file download").await?;
        Ok(Some(resp.bytes().await?.to_vec()))
    }
}

#[async_trait]
impl Source for GitLabSource {
    fn source_type(&self) -> SourceType {
        SourceType::Gitlab
    }

    async fn fetch_all(&self) -> Result<Vec<FileEntry>> {
        let sha = self.resolve_ref().await?;
        info!(project = %self.config.project, sha = %sha, "downloading archive");

        let path = format!("{}/archive.zip?sha={}", self.project_path(), sha);
        let resp = self.get(&path).send().await.context("GitLab request failed")?;
        let resp = ensure_success(resp, "GitLab archive download").await?;
        let bytes = resp.bytes().await?;

        let files = select_files(
            extract_zip(&bytes, self.config.max_file_size)?,
            self.config.max_file_size,
        )?;
        debug!(project = %self.config.project, files = files.len(), "extracted archive");
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

        let path = format!("{}/compare?from={}&to={}", self.project_path(), base, head);
        let resp = self.get(&path).send().await.context("GitLab request failed")?;
        if matches!(
            resp.status(),
            StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY
        ) {
            return Ok(ChangeDetection::unsupported(
                "no common ancestor with previous commit (force push?)",
            ));
        }
        let resp = ensure_success(resp, "GitLab compare").await?;
        let compare: CompareResponse = resp.json().await?;

        let changes: Vec<Change> = compare.diffs.into_iter().map(CompareDiff::into_change).collect();
        let thresholds = Thresholds {
            max_commits: self.config.max_commits,
            max_files: self.config.max_files,
        };
        if let Some(reason) = unsupported_reason(compare.commits.len(), &changes, thresholds) {
            return Ok(ChangeDetection::Unsupported { reason });
        }

        resolve_changes(self, &head, changes, self.config.max_file_size).await
    }

    async fn metadata(&self) -> Result<SourceMetadata> {
        let sha = self.resolve_ref().await?;
        Ok(SourceMetadata {
            source_type: SourceType::Gitlab,
            identifier: self.config.project.clone(),
            git_ref: Some(sha),
            synced_at: Utc::now(),
        })
    }

    async fn list_files(&self, dir: Option<&str>) -> Result<Vec<FileInfo>> {
        let Some(prefix) = dir_prefix(dir) else {
            return Ok(Vec::new());
        };
        let sha = self.resolve_ref().await?;
        let all = self.tree(&sha).await?;
        let rules = augment_rules(self, &sha).await?;

        let paths: Vec<&str> = all
            .iter()
            .map(String::as_str)
            .filter(|p| !should_filter_path(p, None, None))
            .filter(|p| !rules.augment_ignored(p, false))
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
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HEAD: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const BASE: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn source_for(server: &MockServer, git_ref: &str) -> GitLabSource {
        let mut config = GitLabSourceConfig::new("ops/infra", git_ref);
        config.api_url = server.uri();
        config.token = Some("glpat-test".to_string());
        GitLabSource::new(config).unwrap()
    }

    fn previous() -> SourceMetadata {
        SourceMetadata {
            source_type: SourceType::Gitlab,
            identifier: "ops/infra".to_string(),
            git_ref: Some(BASE.to_string()),
            synced_at: Utc::now(),
        }
    }

    #[test]
    fn test_diff_to_change() {
        let diff = |old: &str, new: &str, n: bool, r: bool, d: bool| CompareDiff {
            old_path: old.to_string(),
            new_path: new.to_string(),
            new_file: n,
            renamed_file: r,
            deleted_file: d,
        };
        assert_eq!(diff("a", "a", true, false, false).into_change(), Change::Added("a".into()));
        assert_eq!(diff("a", "a", false, false, true).into_change(), Change::Removed("a".into()));
        assert_eq!(
            diff("a", "b", false, true, false).into_change(),
            Change::Renamed {
                from: "a".into(),
                to: "b".into()
            }
        );
        assert_eq!(diff("a", "a", false, false, false).into_change(), Change::Modified("a".into()));
    }

    #[tokio::test]
    async fn test_resolve_ref_uses_encoded_project() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/ops%2Finfra/repository/commits/main"))
            .and(header("PRIVATE-TOKEN", "glpat-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": HEAD })))
            .expect(1)
            .mount(&server)
            .await;

        let source = source_for(&server, "main");
        let meta = source.metadata().await.unwrap();
        assert_eq!(meta.git_ref.as_deref(), Some(HEAD));
        assert_eq!(meta.identifier, "ops/infra");
        assert_eq!(source.resolve_ref().await.unwrap(), HEAD);
    }

    #[tokio::test]
    async fn test_compare_failure_is_unsupported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/ops%2Finfra/repository/compare"))
            .and(query_param("from", BASE))
            .and(query_param("to", HEAD))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = source_for(&server, HEAD).fetch_changes(&previous()).await.unwrap();
        assert!(matches!(result, ChangeDetection::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_commit_threshold() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/ops%2Finfra/repository/compare"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "commits": [{}, {}, {}],
                "diffs": [{ "old_path": "a.rs", "new_path": "a.rs" }]
            })))
            .mount(&server)
            .await;

        let mut config = GitLabSourceConfig::new("ops/infra", HEAD);
        config.api_url = server.uri();
        config.max_commits = 2;
        let source = GitLabSource::new(config).unwrap();

        let result = source.fetch_changes(&previous()).await.unwrap();
        assert!(matches!(result, ChangeDetection::Unsupported { reason } if reason.contains("max_commits")));
    }

    #[tokio::test]
    async fn test_tree_follows_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/ops%2Finfra/repository/tree"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "path": "src/b.rs", "type": "blob" }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/ops%2Finfra/repository/tree"))
            .and(query_param("page", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-next-page", "2")
                    .set_body_json(serde_json::json!([
                        { "path": "src", "type": "tree" },
                        { "path": "src/a.rs", "type": "blob" },
                        { "path": "deploy.pem", "type": "blob" }
                    ])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/ops%2Finfra/repository/files/.augmentignore/raw"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = source_for(&server, HEAD);
        let listed: Vec<_> = source
            .list_files(Some("src"))
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();
        assert_eq!(listed, vec!["src/a.rs", "src/b.rs"]);
    }
}
