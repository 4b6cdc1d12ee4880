//! In-memory [`Store`] for tests.
//!
//! States are cloned on the way in and on the way out, so callers can never
//! reach the stored copy through a value they hold.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{sanitize_key, Store};
use crate::models::IndexState;

#[derive(Default)]
pub struct MemoryStore {
    states: RwLock<HashMap<String, IndexState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("memory store lock poisoned")
}

#[async_trait]
impl Store for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<IndexState>> {
        let key = sanitize_key(key)?;
        let states = self.states.read().map_err(poisoned)?;
        Ok(states.get(&key).cloned())
    }

    async fn save(&self, key: &str, state: &IndexState) -> Result<()> {
        let key = sanitize_key(key)?;
        let mut states = self.states.write().map_err(poisoned)?;
        states.insert(key, state.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = sanitize_key(key)?;
        let mut states = self.states.write().map_err(poisoned)?;
        states.remove(&key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let states = self.states.read().map_err(poisoned)?;
        let mut keys: Vec<String> = states.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
