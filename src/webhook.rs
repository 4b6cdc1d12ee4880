//! GitHub push webhooks.
//!
//! A verified `push` delivery becomes at most one [`Indexer::index`] call
//! against a GitHub source pinned to the pushed commit. Everything else is
//! a documented skip.
//!
//! | Delivery | Result |
//! |----------|--------|
//! | event other than `push` | `skipped` |
//! | branch deletion, `delete_on_branch_delete = true` | index deleted, `deleted` |
//! | branch deletion otherwise | `skipped`, index preserved |
//! | ref rejected by `should_index` | `skipped` |
//! | indexing succeeded | `indexed` |
//! | indexing failed | `error` with message |
//!
//! Signatures are checked by [`verify_signature`] over the exact request
//! bytes before anything is parsed.

use anyhow::Result;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{GitHubSourceConfig, WebhookConfig};
use crate::indexer::Indexer;
use crate::models::IndexResult;
use crate::sources::github::GitHubSource;
use crate::sources::Source;
use crate::stores::Store;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Check a `sha256=<hex>` signature over `body` in constant time.
///
/// A signature of the wrong length is rejected before comparing.
pub fn verify_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    let Some(hex_sig) = signature.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(provided) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    if provided.len() != mac.clone().finalize().into_bytes().len() {
        return false;
    }
    mac.verify_slice(&provided).is_ok()
}

/// Compute the `sha256=<hex>` header value for `body`.
pub fn sign(body: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
}

// ============ Payload ============

/// The parts of a GitHub `push` payload this crate reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub before: String,
    #[serde(default)]
    pub after: String,
    #[serde(default)]
    pub deleted: bool,
    pub repository: PushRepository,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRepository {
    /// `owner/name`.
    pub full_name: String,
    #[serde(default)]
    pub default_branch: Option<String>,
}

impl PushEvent {
    /// Branch name for `refs/heads/*` refs.
    pub fn branch(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/heads/")
    }

    /// `(owner, repo)` from the repository's full name.
    pub fn owner_repo(&self) -> Option<(&str, &str)> {
        self.repository.full_name.split_once('/')
    }
}

// ============ Result ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Indexed,
    Deleted,
    Skipped,
    Error,
}

/// Outcome of one delivery. Always serializable; never a panic or a raw error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookResult {
    pub status: WebhookStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<IndexResult>,
}

impl WebhookResult {
    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            status: WebhookStatus::Skipped,
            key: None,
            message: Some(message.into()),
            result: None,
        }
    }

    fn error(key: Option<String>, err: &anyhow::Error) -> Self {
        Self {
            status: WebhookStatus::Error,
            key,
            message: Some(format!("{:#}", err)),
            result: None,
        }
    }
}

// ============ Handler ============

type ShouldIndexFn = dyn Fn(&PushEvent) -> bool + Send + Sync;
type KeyFn = dyn Fn(&PushEvent) -> String + Send + Sync;
type SourceFn = dyn Fn(&PushEvent) -> Result<Box<dyn Source>> + Send + Sync;
type IndexedFn = dyn Fn(&str, &IndexResult) + Send + Sync;
type ErrorFn = dyn Fn(&anyhow::Error, &PushEvent) + Send + Sync;

/// Turns push deliveries into indexing runs.
///
/// Defaults: only `refs/heads/*` (restricted to `[webhook].branches` when
/// set), key `owner/repo/branch`, GitHub source at the pushed commit.
pub struct WebhookHandler {
    indexer: Arc<Indexer>,
    store: Arc<dyn Store>,
    delete_on_branch_delete: bool,
    should_index: Box<ShouldIndexFn>,
    get_key: Box<KeyFn>,
    make_source: Box<SourceFn>,
    on_indexed: Option<Box<IndexedFn>>,
    on_error: Option<Box<ErrorFn>>,
}

impl WebhookHandler {
    pub fn new(indexer: Arc<Indexer>, store: Arc<dyn Store>, config: &WebhookConfig) -> Self {
        let branches = config.branches.clone();
        let token = config.token.clone();
        let api_url = config.api_url.clone();

        Self {
            indexer,
            store,
            delete_on_branch_delete: config.delete_on_branch_delete,
            should_index: Box::new(move |event: &PushEvent| match event.branch() {
                Some(branch) => branches
                    .as_ref()
                    .map(|allowed| allowed.iter().any(|b| b == branch))
                    .unwrap_or(true),
                None => false,
            }),
            get_key: Box::new(default_key),
            make_source: Box::new(move |event: &PushEvent| -> Result<Box<dyn Source>> {
                let (owner, repo) = event.owner_repo().ok_or_else(|| {
                    anyhow::anyhow!("repository full_name is not owner/repo: {}", event.repository.full_name)
                })?;
                let mut source_config = GitHubSourceConfig::new(owner, repo, event.after.clone());
                source_config.token = token.clone();
                if let Some(url) = &api_url {
                    source_config.api_url = url.clone();
                }
                Ok(Box::new(GitHubSource::new(source_config)?) as Box<dyn Source>)
            }),
            on_indexed: None,
            on_error: None,
        }
    }

    pub fn with_should_index(
        mut self,
        f: impl Fn(&PushEvent) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_index = Box::new(f);
        self
    }

    pub fn with_key(mut self, f: impl Fn(&PushEvent) -> String + Send + Sync + 'static) -> Self {
        self.get_key = Box::new(f);
        self
    }

    /// Replace how the source for a push is built.
    pub fn with_source(
        mut self,
        f: impl Fn(&PushEvent) -> Result<Box<dyn Source>> + Send + Sync + 'static,
    ) -> Self {
        self.make_source = Box::new(f);
        self
    }

    pub fn on_indexed(mut self, f: impl Fn(&str, &IndexResult) + Send + Sync + 'static) -> Self {
        self.on_indexed = Some(Box::new(f));
        self
    }

    pub fn on_error(
        mut self,
        f: impl Fn(&anyhow::Error, &PushEvent) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Route a verified delivery by its `X-GitHub-Event` name.
    ///
    /// Only a malformed `push` body is an `Err`; every other outcome is a
    /// [`WebhookResult`].
    pub async fn handle(&self, event_name: &str, body: &[u8]) -> Result<WebhookResult, serde_json::Error> {
        if event_name != "push" {
            return Ok(WebhookResult::skipped(format!("event '{}' is not handled", event_name)));
        }
        let event: PushEvent = serde_json::from_slice(body)?;
        Ok(self.handle_push(&event).await)
    }

    pub async fn handle_push(&self, event: &PushEvent) -> WebhookResult {
        let key = (self.get_key)(event);

        if event.deleted {
            if !self.delete_on_branch_delete {
                return WebhookResult::skipped("ref deleted; index preserved");
            }
            return match self.store.delete(&key).await {
                Ok(()) => {
                    info!(key = %key, "deleted index for removed ref");
                    WebhookResult {
                        status: WebhookStatus::Deleted,
                        key: Some(key),
                        message: None,
                        result: None,
                    }
                }
                Err(e) => self.fail(key, e, event),
            };
        }

        if !(self.should_index)(event) {
            return WebhookResult::skipped(format!("ref '{}' not selected for indexing", event.git_ref));
        }

        let source = match (self.make_source)(event) {
            Ok(source) => source,
            Err(e) => return self.fail(key, e, event),
        };

        match self.indexer.index(source.as_ref(), self.store.as_ref(), &key).await {
            Ok(result) => {
                info!(key = %key, index_type = %result.index_type, files = result.files_indexed, "webhook index complete");
                if let Some(callback) = &self.on_indexed {
                    callback(&key, &result);
                }
                WebhookResult {
                    status: WebhookStatus::Indexed,
                    key: Some(key),
                    message: None,
                    result: Some(result),
                }
            }
            Err(e) => self.fail(key, e, event),
        }
    }

    fn fail(&self, key: String, err: anyhow::Error, event: &PushEvent) -> WebhookResult {
        warn!(key = %key, error = %format!("{:#}", err), "webhook handling failed");
        if let Some(callback) = &self.on_error {
            callback(&err, event);
        }
        WebhookResult::error(Some(key), &err)
    }
}

/// `owner/repo/branch`, or `owner/repo/<ref>` for refs outside `refs/heads/`.
pub fn default_key(event: &PushEvent) -> String {
    let name = event
        .branch()
        .or_else(|| event.git_ref.strip_prefix("refs/tags/"))
        .unwrap_or(&event.git_ref);
    format!("{}/{}", event.repository.full_name, name)
}
