//! Indexing orchestration.
//!
//! [`Indexer::index`] picks one of three paths for a key:
//!
//! | Previous state | `fetch_changes` | Path |
//! |----------------|-----------------|------|
//! | none | not called | full |
//! | present | `Unsupported` | full |
//! | present | empty changes | unchanged (engine and store untouched) |
//! | present | non-empty changes | incremental |
//!
//! Errors from the source, the engine, or the store propagate unchanged.
//! `Store::save` is always the last step, so a failed run never persists
//! partial state.
//!
//! Concurrent calls for the same key inside one process are serialized on
//! a per-key lock, which is dropped from the lock table once no call holds
//! or waits on it. Separate processes sharing a store are not coordinated;
//! the last `save` wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{anyhow, Result};
use tracing::{debug, info};

use crate::engine::EngineFactory;
use crate::error::IndexError;
use crate::models::{
    ChangeDetection, FileChanges, FileEntry, IndexResult, IndexState, IndexType,
};
use crate::sources::Source;
use crate::stores::{sanitize_key, Store};

type LockTable = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

pub struct Indexer {
    engines: Arc<dyn EngineFactory>,
    locks: LockTable,
}

/// Drops the key's entry from the lock table once nobody else holds it.
struct LockLease<'a> {
    locks: &'a LockTable,
    key: String,
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        if let Ok(mut locks) = self.locks.lock() {
            if locks
                .get(&self.key)
                .is_some_and(|lock| Arc::strong_count(lock) == 1)
            {
                locks.remove(&self.key);
            }
        }
    }
}

impl Indexer {
    pub fn new(engines: Arc<dyn EngineFactory>) -> Self {
        Self {
            engines,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, key: &str) -> Result<(LockLease<'_>, Arc<tokio::sync::Mutex<()>>)> {
        let sanitized = sanitize_key(key)?;
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| anyhow!("indexer lock table poisoned"))?;
        let lock = locks.entry(sanitized.clone()).or_default().clone();
        Ok((
            LockLease {
                locks: &self.locks,
                key: sanitized,
            },
            lock,
        ))
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    /// Bring the index stored under `key` up to date with `source`.
    pub async fn index(&self, source: &dyn Source, store: &dyn Store, key: &str) -> Result<IndexResult> {
        // `_guard` is declared last so it is released before the lease.
        let (_lease, lock) = self.lock_for(key)?;
        let _guard = lock.lock_owned().await;
        let start = Instant::now();

        let Some(previous) = store.load(key).await? else {
            info!(key, source = %source.source_type(), "no previous index; running full index");
            return self.full_index(source, store, key, start).await;
        };

        if previous.source.source_type != source.source_type() {
            return Err(IndexError::TypeMismatch {
                expected: previous.source.source_type,
                found: source.source_type(),
            }
            .into());
        }

        match source.fetch_changes(&previous.source).await? {
            ChangeDetection::Unsupported { reason } => {
                info!(key, reason = %reason, "incremental index not possible; running full index");
                self.full_index(source, store, key, start).await
            }
            ChangeDetection::Changes(changes) if changes.is_empty() => {
                debug!(key, "no changes since last sync");
                Ok(IndexResult {
                    index_type: IndexType::Unchanged,
                    files_indexed: 0,
                    files_removed: 0,
                    duration: elapsed_ms(start),
                })
            }
            ChangeDetection::Changes(changes) => {
                self.incremental_index(source, store, key, previous, changes, start)
                    .await
            }
        }
    }

    async fn full_index(
        &self,
        source: &dyn Source,
        store: &dyn Store,
        key: &str,
        start: Instant,
    ) -> Result<IndexResult> {
        let mut engine = self.engines.create().await?;
        let files = source.fetch_all().await?;
        if !files.is_empty() {
            engine.add_to_index(&files).await?;
        }

        let metadata = source.metadata().await?;
        let context_state = engine.export().await?;
        store
            .save(
                key,
                &IndexState {
                    context_state,
                    source: metadata,
                },
            )
            .await?;

        let result = IndexResult {
            index_type: IndexType::Full,
            files_indexed: files.len(),
            files_removed: 0,
            duration: elapsed_ms(start),
        };
        info!(key, files = result.files_indexed, duration_ms = result.duration, "full index complete");
        Ok(result)
    }

    async fn incremental_index(
        &self,
        source: &dyn Source,
        store: &dyn Store,
        key: &str,
        previous: IndexState,
        changes: FileChanges,
        start: Instant,
    ) -> Result<IndexResult> {
        let mut engine = self.engines.import(&previous.context_state).await?;

        if !changes.removed.is_empty() {
            engine.remove_from_index(&changes.removed).await?;
        }

        let upserts: Vec<FileEntry> = changes
            .added
            .into_iter()
            .chain(changes.modified)
            .collect();
        if !upserts.is_empty() {
            engine.add_to_index(&upserts).await?;
        }

        let metadata = source.metadata().await?;
        let context_state = engine.export().await?;
        store
            .save(
                key,
                &IndexState {
                    context_state,
                    source: metadata,
                },
            )
            .await?;

        let result = IndexResult {
            index_type: IndexType::Incremental,
            files_indexed: upserts.len(),
            files_removed: changes.removed.len(),
            duration: elapsed_ms(start),
        };
        info!(
            key,
            files = result.files_indexed,
            removed = result.files_removed,
            duration_ms = result.duration,
            "incremental index complete"
        );
        Ok(result)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
