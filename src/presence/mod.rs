//! Location presence state manager.
//!
//! Tracks which characters are currently present in each game location.
//! State lives in a document store, one document per location, mutated
//! with single-document atomic updates only; no cross-document
//! transactions. Consistency is eventually exact, not serializable.
//!
//! Every operation returns a summary; store failures are logged and
//! surfaced as the zero-value summary so a presence hiccup never aborts
//! the command flow it is embedded in.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};

pub mod mock;
pub mod mongodb;

pub use mock::MockLocationStateStore;
pub use mongodb::MongoLocationStateStore;

/// Result type for presence-store operations.
pub type Result<T> = std::result::Result<T, PresenceError>;

/// Errors from the document store.
#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error("Document store error: {0}")]
    Store(String),
}

/// Current state of one location document.
#[derive(Debug, Clone, Default)]
pub struct LocationState {
    pub location_id: String,
    pub players: Vec<i64>,
    pub npcs: Vec<i64>,
    pub last_update: Option<DateTime<Utc>>,
}

/// Derived counts handed back to callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocationSummary {
    pub players_in_location: u64,
    pub npcs_in_location: u64,
    pub last_update: Option<DateTime<Utc>>,
}

impl From<&LocationState> for LocationSummary {
    fn from(state: &LocationState) -> Self {
        Self {
            players_in_location: state.players.len() as u64,
            npcs_in_location: state.npcs.len() as u64,
            last_update: state.last_update,
        }
    }
}

/// Keyed access to location documents.
///
/// Implementations:
/// - `MongoLocationStateStore`: one document per location
/// - `MockLocationStateStore`: in-memory, for tests
#[async_trait]
pub trait LocationStateStore: Send + Sync {
    async fn get(&self, location_id: &str) -> Result<Option<LocationState>>;

    /// Idempotently add the character and refresh `last_update`. Creates
    /// the document on first presence event.
    async fn add_player(&self, location_id: &str, character_id: i64) -> Result<()>;

    /// Idempotently remove the character; refreshes `last_update` when the
    /// document exists. Returns whether the character was present.
    async fn remove_player(&self, location_id: &str, character_id: i64) -> Result<bool>;
}

/// Business-level presence operations over a `LocationStateStore`.
pub struct PresenceManager {
    store: Arc<dyn LocationStateStore>,
}

impl PresenceManager {
    pub fn new(store: Arc<dyn LocationStateStore>) -> Self {
        Self { store }
    }

    /// Add a character to a location and report the resulting state.
    pub async fn add_player(&self, location_id: &str, character_id: i64) -> LocationSummary {
        if let Err(e) = self.store.add_player(location_id, character_id).await {
            error!(
                location_id,
                character_id,
                error = %e,
                "Failed to add character to location"
            );
            return LocationSummary::default();
        }
        debug!(location_id, character_id, "Character entered location");
        self.summary(location_id).await
    }

    /// Remove a character from a location. Absence is not an error.
    pub async fn remove_player(&self, location_id: &str, character_id: i64) -> LocationSummary {
        match self.store.remove_player(location_id, character_id).await {
            Ok(true) => {
                debug!(location_id, character_id, "Character left location");
            }
            Ok(false) => {
                warn!(
                    location_id,
                    character_id, "Character was not present in location"
                );
            }
            Err(e) => {
                error!(
                    location_id,
                    character_id,
                    error = %e,
                    "Failed to remove character from location"
                );
                return LocationSummary::default();
            }
        }
        self.summary(location_id).await
    }

    /// Move a character between locations and report the destination state.
    ///
    /// Removal runs first: a character briefly absent from both documents
    /// is the preferred failure mode over present in both.
    pub async fn move_character(
        &self,
        old_location_id: Option<&str>,
        new_location_id: &str,
        character_id: i64,
    ) -> LocationSummary {
        if let Some(old) = old_location_id {
            self.remove_player(old, character_id).await;
        }
        self.add_player(new_location_id, character_id).await
    }

    /// Read-only summary of a location. Unknown locations summarize to zero.
    pub async fn summary(&self, location_id: &str) -> LocationSummary {
        match self.store.get(location_id).await {
            Ok(Some(state)) => LocationSummary::from(&state),
            Ok(None) => LocationSummary::default(),
            Err(e) => {
                error!(location_id, error = %e, "Failed to read location state");
                LocationSummary::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (PresenceManager, Arc<MockLocationStateStore>) {
        let store = Arc::new(MockLocationStateStore::new());
        (PresenceManager::new(store.clone()), store)
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let (manager, _) = manager();

        let first = manager.add_player("loc-1", 42).await;
        let second = manager.add_player("loc-1", 42).await;

        assert_eq!(first.players_in_location, 1);
        assert_eq!(second.players_in_location, 1);
    }

    #[tokio::test]
    async fn remove_twice_leaves_state_unchanged() {
        let (manager, _) = manager();
        manager.add_player("loc-1", 42).await;

        let first = manager.remove_player("loc-1", 42).await;
        let second = manager.remove_player("loc-1", 42).await;

        assert_eq!(first.players_in_location, 0);
        assert_eq!(second.players_in_location, 0);
    }

    #[tokio::test]
    async fn move_round_trip_restores_counts() {
        let (manager, _) = manager();
        manager.add_player("tavern", 1).await;
        manager.add_player("tavern", 2).await;
        manager.add_player("road", 3).await;

        manager.move_character(Some("tavern"), "road", 2).await;
        assert_eq!(manager.summary("tavern").await.players_in_location, 1);
        assert_eq!(manager.summary("road").await.players_in_location, 2);

        manager.move_character(Some("road"), "tavern", 2).await;
        assert_eq!(manager.summary("tavern").await.players_in_location, 2);
        assert_eq!(manager.summary("road").await.players_in_location, 1);
    }

    #[tokio::test]
    async fn move_without_origin_only_adds() {
        let (manager, _) = manager();

        let summary = manager.move_character(None, "gate", 9).await;
        assert_eq!(summary.players_in_location, 1);
    }

    #[tokio::test]
    async fn store_failure_yields_zero_summary() {
        let (manager, store) = manager();
        manager.add_player("loc-1", 42).await;
        store.set_fail(true).await;

        let summary = manager.add_player("loc-1", 43).await;
        assert_eq!(summary, LocationSummary::default());

        let summary = manager.summary("loc-1").await;
        assert_eq!(summary, LocationSummary::default());
    }

    #[tokio::test]
    async fn summary_counts_npcs() {
        let (manager, store) = manager();
        store.seed_npcs("loc-1", vec![100, 101]).await;
        manager.add_player("loc-1", 42).await;

        let summary = manager.summary("loc-1").await;
        assert_eq!(summary.players_in_location, 1);
        assert_eq!(summary.npcs_in_location, 2);
        assert!(summary.last_update.is_some());
    }
}
