//! MongoDB implementation of the location state store.
//!
//! One document per location in the `active_locations` collection, keyed
//! by `_id = location_id`. Membership updates use `$addToSet`/`$pull` so
//! each mutation is a single atomic document operation and repeated
//! applications are no-ops.

use async_trait::async_trait;
use mongodb::bson::{doc, DateTime as BsonDateTime};
use mongodb::options::UpdateOptions;
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{LocationState, LocationStateStore, PresenceError, Result};

/// Collection holding one document per live location.
pub(crate) const ACTIVE_LOCATIONS_COLLECTION: &str = "active_locations";

impl From<mongodb::error::Error> for PresenceError {
    fn from(e: mongodb::error::Error) -> Self {
        PresenceError::Store(e.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LocationStateDoc {
    #[serde(rename = "_id")]
    location_id: String,
    #[serde(default)]
    players: Vec<i64>,
    #[serde(default)]
    npcs: Vec<i64>,
    #[serde(default)]
    last_update: Option<BsonDateTime>,
}

impl From<LocationStateDoc> for LocationState {
    fn from(doc: LocationStateDoc) -> Self {
        Self {
            location_id: doc.location_id,
            players: doc.players,
            npcs: doc.npcs,
            last_update: doc
                .last_update
                .and_then(|t| chrono::DateTime::from_timestamp_millis(t.timestamp_millis())),
        }
    }
}

/// MongoDB-backed location state store.
pub struct MongoLocationStateStore {
    locations: Collection<LocationStateDoc>,
}

impl MongoLocationStateStore {
    /// Create a store over an existing client.
    pub fn new(client: &Client, database_name: &str) -> Self {
        let locations = client
            .database(database_name)
            .collection(ACTIVE_LOCATIONS_COLLECTION);
        Self { locations }
    }

    /// Connect to the document store.
    pub async fn connect(url: &str, database_name: &str) -> Result<Self> {
        let client = Client::with_uri_str(url).await?;
        info!(database = database_name, "Connected to document store");
        Ok(Self::new(&client, database_name))
    }
}

#[async_trait]
impl LocationStateStore for MongoLocationStateStore {
    async fn get(&self, location_id: &str) -> Result<Option<LocationState>> {
        let found = self
            .locations
            .find_one(doc! { "_id": location_id })
            .await?;
        Ok(found.map(LocationState::from))
    }

    async fn add_player(&self, location_id: &str, character_id: i64) -> Result<()> {
        let update = doc! {
            "$addToSet": { "players": character_id },
            "$set": { "last_update": BsonDateTime::now() },
        };
        let options = UpdateOptions::builder().upsert(true).build();

        self.locations
            .update_one(doc! { "_id": location_id }, update)
            .with_options(options)
            .await?;

        Ok(())
    }

    async fn remove_player(&self, location_id: &str, character_id: i64) -> Result<bool> {
        // Pull first so modified_count reflects membership, then refresh
        // the timestamp; both are single-document atomic updates.
        let pulled = self
            .locations
            .update_one(
                doc! { "_id": location_id },
                doc! { "$pull": { "players": character_id } },
            )
            .await?;

        self.locations
            .update_one(
                doc! { "_id": location_id },
                doc! { "$set": { "last_update": BsonDateTime::now() } },
            )
            .await?;

        Ok(pulled.modified_count > 0)
    }
}
