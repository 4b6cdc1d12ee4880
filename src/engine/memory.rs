//! In-memory [`ContextEngine`] for local use and tests.
//!
//! Exported state is `{"version": 1, "files": {path: contents}}`. Search is
//! a case-insensitive term match over lines, grouped per file in path
//! order; there is no scoring.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{AddResult, ContextEngine, EngineCredentials, EngineFactory};
use crate::models::FileEntry;

const STATE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct ExportedState {
    version: u32,
    files: BTreeMap<String, String>,
}

/// Local engine holding file contents in a sorted map.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    files: BTreeMap<String, String>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: &serde_json::Value) -> Result<Self> {
        let exported: ExportedState = serde_json::from_value(state.clone())
            .context("Context state is not a memory engine export")?;
        if exported.version != STATE_VERSION {
            bail!(
                "Unsupported memory engine state version {} (expected {})",
                exported.version,
                STATE_VERSION
            );
        }
        Ok(Self {
            files: exported.files,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[async_trait]
impl ContextEngine for MemoryEngine {
    async fn add_to_index(&mut self, files: &[FileEntry]) -> Result<AddResult> {
        let mut result = AddResult::default();
        for file in files {
            match self.files.get(&file.path) {
                Some(existing) if existing == &file.contents => {
                    result.already_indexed.push(file.path.clone());
                }
                _ => {
                    self.files.insert(file.path.clone(), file.contents.clone());
                    result.newly_indexed.push(file.path.clone());
                }
            }
        }
        Ok(result)
    }

    async fn remove_from_index(&mut self, paths: &[String]) -> Result<()> {
        for path in paths {
            self.files.remove(path);
        }
        Ok(())
    }

    async fn export(&self) -> Result<serde_json::Value> {
        let state = ExportedState {
            version: STATE_VERSION,
            files: self.files.clone(),
        };
        Ok(serde_json::to_value(state)?)
    }

    async fn search(&self, query: &str, max_output_length: Option<usize>) -> Result<String> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        if terms.is_empty() {
            bail!("query must not be empty");
        }

        let mut output = String::new();
        for (path, contents) in &self.files {
            let mut hits = Vec::new();
            for (i, line) in contents.lines().enumerate() {
                let lower = line.to_lowercase();
                if terms.iter().any(|t| lower.contains(t.as_str())) {
                    hits.push(format!("{:>6}  {}", i + 1, line));
                }
            }
            if hits.is_empty() {
                continue;
            }
            output.push_str("Path: ");
            output.push_str(path);
            output.push('\n');
            for hit in hits {
                output.push_str(&hit);
                output.push('\n');
            }
            output.push('\n');
        }

        if output.is_empty() {
            output.push_str("No results.");
        }

        if let Some(max) = max_output_length {
            if output.chars().count() > max {
                output = output.chars().take(max).collect();
            }
        }

        Ok(output)
    }
}

/// Factory for [`MemoryEngine`]. Credentials are accepted and ignored.
#[derive(Debug, Default)]
pub struct MemoryEngineFactory {
    _credentials: EngineCredentials,
}

impl MemoryEngineFactory {
    pub fn new(credentials: EngineCredentials) -> Self {
        Self {
            _credentials: credentials,
        }
    }
}

#[async_trait]
impl EngineFactory for MemoryEngineFactory {
    async fn create(&self) -> Result<Box<dyn ContextEngine>> {
        Ok(Box::new(MemoryEngine::new()))
    }

    async fn import(&self, state: &serde_json::Value) -> Result<Box<dyn ContextEngine>> {
        Ok(Box::new(MemoryEngine::from_state(state)?))
    }
}
