//! TOML configuration parsing and validation.
//!
//! # Example
//!
//! ```toml
//! [store]
//! type = "filesystem"
//! # path = "/var/lib/context-connectors"
//!
//! [engine]
//! provider = "memory"
//!
//! [server]
//! bind = "127.0.0.1:8787"
//!
//! [webhook]
//! delete_on_branch_delete = true
//! branches = ["main"]
//!
//! [sources.docs]
//! type = "filesystem"
//! root = "./docs"
//!
//! [sources.widgets]
//! type = "github"
//! owner = "acme"
//! repo = "widgets"
//! ref = "main"
//! ```
//!
//! Secrets fall back to environment variables when not set in the file:
//! `AUGMENT_API_TOKEN`, `AUGMENT_API_URL`, `GITHUB_TOKEN`, `GITLAB_TOKEN`,
//! `GITHUB_WEBHOOK_SECRET`, and the `AWS_*` credentials.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::file_filter::DEFAULT_MAX_FILE_SIZE;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
    /// Filesystem store directory used when `[store].path` is unset.
    /// Resolved once by [`load_config`].
    #[serde(skip)]
    pub default_store_dir: PathBuf,
}

// ============ Store ============

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    Filesystem {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    S3(S3StoreConfig),
    Memory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Filesystem { path: None }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3StoreConfig {
    pub bucket: String,
    #[serde(default = "default_s3_prefix")]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_s3_prefix() -> String {
    "context-connectors/".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

// ============ Engine ============

#[derive(Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_engine_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: default_engine_provider(),
            api_key: None,
            api_url: None,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_url", &self.api_url)
            .finish()
    }
}

fn default_engine_provider() -> String {
    "memory".to_string()
}

// ============ Server / webhook ============

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

#[derive(Deserialize, Clone, Default)]
pub struct WebhookConfig {
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub delete_on_branch_delete: bool,
    /// Only these branches trigger indexing. Unset means every branch.
    #[serde(default)]
    pub branches: Option<Vec<String>>,
    /// Token used to fetch pushed repositories.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
}

impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("delete_on_branch_delete", &self.delete_on_branch_delete)
            .field("branches", &self.branches)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl WebhookConfig {
    /// Secret from the config file, else `GITHUB_WEBHOOK_SECRET`.
    pub fn resolve_secret(&self) -> Option<String> {
        self.secret
            .clone()
            .or_else(|| std::env::var("GITHUB_WEBHOOK_SECRET").ok())
            .filter(|s| !s.is_empty())
    }
}

// ============ Sources ============

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    Filesystem(FilesystemSourceConfig),
    Github(GitHubSourceConfig),
    Gitlab(GitLabSourceConfig),
    Website(WebsiteSourceConfig),
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemSourceConfig {
    pub root: PathBuf,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
    /// Extra gitignore-style patterns, lowest priority.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

impl FilesystemSourceConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            ignore_patterns: Vec::new(),
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct GitHubSourceConfig {
    pub owner: String,
    pub repo: String,
    /// Branch, tag, or commit. Resolved to a commit SHA before use.
    #[serde(rename = "ref", default = "default_git_ref")]
    pub git_ref: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
    #[serde(default = "default_max_commits")]
    pub max_commits: usize,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl GitHubSourceConfig {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, git_ref: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            git_ref: git_ref.into(),
            token: None,
            api_url: default_github_api_url(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_commits: default_max_commits(),
            max_files: default_max_files(),
        }
    }

    /// Token from the config, else `GITHUB_TOKEN`.
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
            .filter(|t| !t.is_empty())
    }
}

impl fmt::Debug for GitHubSourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubSourceConfig")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("git_ref", &self.git_ref)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("api_url", &self.api_url)
            .field("max_file_size", &self.max_file_size)
            .field("max_commits", &self.max_commits)
            .field("max_files", &self.max_files)
            .finish()
    }
}

#[derive(Deserialize, Clone)]
pub struct GitLabSourceConfig {
    /// Project path, e.g. `group/subgroup/project`.
    pub project: String,
    #[serde(rename = "ref", default = "default_git_ref")]
    pub git_ref: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_gitlab_api_url")]
    pub api_url: String,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
    #[serde(default = "default_max_commits")]
    pub max_commits: usize,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl GitLabSourceConfig {
    pub fn new(project: impl Into<String>, git_ref: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            git_ref: git_ref.into(),
            token: None,
            api_url: default_gitlab_api_url(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_commits: default_max_commits(),
            max_files: default_max_files(),
        }
    }

    /// Token from the config, else `GITLAB_TOKEN`.
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var("GITLAB_TOKEN").ok())
            .filter(|t| !t.is_empty())
    }
}

impl fmt::Debug for GitLabSourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitLabSourceConfig")
            .field("project", &self.project)
            .field("git_ref", &self.git_ref)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("api_url", &self.api_url)
            .field("max_file_size", &self.max_file_size)
            .field("max_commits", &self.max_commits)
            .field("max_files", &self.max_files)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebsiteSourceConfig {
    pub url: String,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    /// Globs on the URL path; only matching pages are indexed.
    #[serde(default)]
    pub include: Vec<String>,
    /// Globs on the URL path; matching pages are not indexed.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Pause between page requests.
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
}

impl WebsiteSourceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_depth: default_max_depth(),
            max_pages: default_max_pages(),
            include: Vec::new(),
            exclude: Vec::new(),
            delay_ms: 0,
            user_agent: default_user_agent(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

fn default_git_ref() -> String {
    "HEAD".to_string()
}
fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_gitlab_api_url() -> String {
    "https://gitlab.com/api/v4".to_string()
}
fn default_max_file_size() -> usize {
    DEFAULT_MAX_FILE_SIZE
}
fn default_max_commits() -> usize {
    100
}
fn default_max_files() -> usize {
    500
}
fn default_max_depth() -> usize {
    3
}
fn default_max_pages() -> usize {
    100
}
fn default_user_agent() -> String {
    concat!("context-connectors/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Resolve the default filesystem store directory.
///
/// `CONTEXT_CONNECTORS_STORE`, else `$HOME/.context-connectors`, else
/// `./.context-connectors`.
pub fn resolve_default_store_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CONTEXT_CONNECTORS_STORE") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    match std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        Some(home) => PathBuf::from(home).join(".context-connectors"),
        None => PathBuf::from(".context-connectors"),
    }
}

/// Parse and validate a config string.
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.default_store_dir = resolve_default_store_dir();
    validate(&config)?;
    Ok(config)
}

/// Load a config file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        let config = Config {
            default_store_dir: resolve_default_store_dir(),
            ..Config::default()
        };
        return Ok(config);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

fn validate(config: &Config) -> Result<()> {
    if let StoreConfig::S3(s3) = &config.store {
        if s3.bucket.trim().is_empty() {
            bail!("store.bucket must be set when store.type is 's3'");
        }
    }

    match config.engine.provider.as_str() {
        "memory" => {}
        other => bail!("Unknown engine provider: '{}'. Must be memory.", other),
    }

    for (name, source) in &config.sources {
        let max_file_size = match source {
            SourceConfig::Filesystem(c) => c.max_file_size,
            SourceConfig::Github(c) => c.max_file_size,
            SourceConfig::Gitlab(c) => c.max_file_size,
            SourceConfig::Website(c) => {
                if c.max_pages == 0 {
                    bail!("sources.{}.max_pages must be >= 1", name);
                }
                c.max_file_size
            }
        };
        if max_file_size == 0 {
            bail!("sources.{}.max_file_size must be > 0", name);
        }
    }

    Ok(())
}
