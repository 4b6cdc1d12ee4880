//! Context engine abstraction.
//!
//! The engine owns embedding, ranking, and the layout of its exported
//! state. This crate only drives it: add and remove files, export the
//! opaque state for persistence, import it again, and search.
//!
//! [`MemoryEngine`](memory::MemoryEngine) is a local reference engine used
//! by the CLI and the tests.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::EngineConfig;
use crate::models::FileEntry;

/// Counts reported by [`ContextEngine::add_to_index`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddResult {
    pub newly_indexed: Vec<String>,
    pub already_indexed: Vec<String>,
}

/// A live engine instance.
#[async_trait]
pub trait ContextEngine: Send + Sync {
    async fn add_to_index(&mut self, files: &[FileEntry]) -> Result<AddResult>;

    async fn remove_from_index(&mut self, paths: &[String]) -> Result<()>;

    /// Export the engine's state as an opaque JSON value.
    async fn export(&self) -> Result<serde_json::Value>;

    /// Run a query and return formatted results.
    async fn search(&self, query: &str, max_output_length: Option<usize>) -> Result<String>;
}

/// Creates engine instances, either fresh or from exported state.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn ContextEngine>>;

    async fn import(&self, state: &serde_json::Value) -> Result<Box<dyn ContextEngine>>;
}

/// Engine API credentials. Never logged.
#[derive(Clone, Default)]
pub struct EngineCredentials {
    pub api_key: Option<String>,
    pub api_url: Option<String>,
}

impl EngineCredentials {
    /// Explicit values win; `AUGMENT_API_TOKEN` and `AUGMENT_API_URL` fill gaps.
    pub fn resolve(api_key: Option<String>, api_url: Option<String>) -> Self {
        Self {
            api_key: api_key.or_else(|| std::env::var("AUGMENT_API_TOKEN").ok()),
            api_url: api_url.or_else(|| std::env::var("AUGMENT_API_URL").ok()),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::resolve(config.api_key.clone(), config.api_url.clone())
    }
}

impl fmt::Debug for EngineCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineCredentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// Build the engine factory named by `[engine].provider`.
pub fn create_engine_factory(config: &EngineConfig) -> Result<Box<dyn EngineFactory>> {
    let credentials = EngineCredentials::from_config(config);
    match config.provider.as_str() {
        "memory" => Ok(Box::new(memory::MemoryEngineFactory::new(credentials))),
        other => anyhow::bail!("Unknown engine provider: '{}'", other),
    }
}
