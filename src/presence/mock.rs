//! Mock location state store for testing.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{LocationState, LocationStateStore, PresenceError, Result};

/// In-memory location state store with a failure switch.
#[derive(Default)]
pub struct MockLocationStateStore {
    docs: RwLock<HashMap<String, LocationState>>,
    fail: RwLock<bool>,
}

impl MockLocationStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with a store error.
    pub async fn set_fail(&self, fail: bool) {
        *self.fail.write().await = fail;
    }

    /// Pre-populate a location's NPC set.
    pub async fn seed_npcs(&self, location_id: &str, npcs: Vec<i64>) {
        let mut docs = self.docs.write().await;
        let state = docs
            .entry(location_id.to_string())
            .or_insert_with(|| LocationState {
                location_id: location_id.to_string(),
                ..Default::default()
            });
        state.npcs = npcs;
    }

    async fn check_fail(&self) -> Result<()> {
        if *self.fail.read().await {
            return Err(PresenceError::Store("mock store failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LocationStateStore for MockLocationStateStore {
    async fn get(&self, location_id: &str) -> Result<Option<LocationState>> {
        self.check_fail().await?;
        Ok(self.docs.read().await.get(location_id).cloned())
    }

    async fn add_player(&self, location_id: &str, character_id: i64) -> Result<()> {
        self.check_fail().await?;
        let mut docs = self.docs.write().await;
        let state = docs
            .entry(location_id.to_string())
            .or_insert_with(|| LocationState {
                location_id: location_id.to_string(),
                ..Default::default()
            });
        if !state.players.contains(&character_id) {
            state.players.push(character_id);
        }
        state.last_update = Some(Utc::now());
        Ok(())
    }

    async fn remove_player(&self, location_id: &str, character_id: i64) -> Result<bool> {
        self.check_fail().await?;
        let mut docs = self.docs.write().await;
        match docs.get_mut(location_id) {
            Some(state) => {
                let before = state.players.len();
                state.players.retain(|id| *id != character_id);
                state.last_update = Some(Utc::now());
                Ok(state.players.len() < before)
            }
            None => Ok(false),
        }
    }
}
