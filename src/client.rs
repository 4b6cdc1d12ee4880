//! Read-side access to a stored index.
//!
//! An [`IndexClient`] loads the state for one key, rebuilds the engine from
//! it, and answers searches. When opened with a [`Source`] it also serves
//! file listings and reads straight from that source.

use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

use crate::engine::{ContextEngine, EngineFactory};
use crate::error::IndexError;
use crate::models::{FileInfo, SourceMetadata};
use crate::sources::Source;
use crate::stores::Store;

pub struct IndexClient {
    key: String,
    metadata: SourceMetadata,
    engine: Box<dyn ContextEngine>,
    source: Option<Arc<dyn Source>>,
}

impl IndexClient {
    /// Load `key` from `store` and import its engine state.
    ///
    /// Fails with [`IndexError::NotFound`] if nothing is stored under the
    /// key, and with [`IndexError::TypeMismatch`] if `source` is of a
    /// different type than the one the index was built from.
    pub async fn open(
        store: &dyn Store,
        key: &str,
        source: Option<Arc<dyn Source>>,
        engines: &dyn EngineFactory,
    ) -> Result<Self> {
        let state = store.load(key).await?.ok_or_else(|| IndexError::NotFound {
            key: key.to_string(),
        })?;

        if let Some(source) = &source {
            if source.source_type() != state.source.source_type {
                return Err(IndexError::TypeMismatch {
                    expected: state.source.source_type,
                    found: source.source_type(),
                }
                .into());
            }
        }

        let engine = engines.import(&state.context_state).await?;
        debug!(key, source = %state.source.source_type, "opened index");
        Ok(Self {
            key: key.to_string(),
            metadata: state.source,
            engine,
            source,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Source metadata recorded at the last sync.
    pub fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub async fn search(&self, query: &str, max_output_length: Option<usize>) -> Result<String> {
        self.engine.search(query, max_output_length).await
    }

    pub async fn list_files(&self, dir: Option<&str>) -> Result<Vec<FileInfo>> {
        self.source()?.list_files(dir).await
    }

    pub async fn read_file(&self, path: &str) -> Result<Option<String>> {
        self.source()?.read_file(path).await
    }

    fn source(&self) -> Result<&dyn Source> {
        self.source
            .as_deref()
            .ok_or_else(|| IndexError::FileAccessUnavailable.into())
    }
}
