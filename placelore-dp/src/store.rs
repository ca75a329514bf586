//! Persistence for location records
//!
//! The pipeline consumes the document store through the narrow `PlaceStore`
//! interface; no transactional multi-record guarantees are assumed. The
//! SQLite implementation backs the service, the in-memory implementation
//! backs tests and ephemeral dev runs.

use crate::models::{CanonicalRecord, GeoPoint, ModerationState, StoredPlace};
use chrono::{DateTime, Utc};
use placelore_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Narrow document-store interface the pipeline consumes
#[async_trait::async_trait]
pub trait PlaceStore: Send + Sync {
    async fn get_all(&self) -> Result<Vec<StoredPlace>>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<StoredPlace>>;

    /// Insert or replace a place record
    async fn save(&self, place: &StoredPlace) -> Result<()>;

    /// Update the moderation state of an existing record
    async fn update_status(&self, id: Uuid, state: ModerationState) -> Result<()>;

    /// Replace the canonical record of an existing place (enrichment backfill)
    async fn update_record(&self, id: Uuid, record: &CanonicalRecord) -> Result<()>;
}

// ============================================================================
// SQLite implementation
// ============================================================================

/// Initialize the database connection pool and schema
///
/// `":memory:"` yields an ephemeral database for dev runs.
pub async fn init_database_pool(database_path: &str) -> Result<Pool<Sqlite>> {
    let db_url = if database_path == ":memory:" {
        "sqlite::memory:".to_string()
    } else {
        if let Some(parent) = std::path::Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        // mode=rwc: read, write, create
        format!("sqlite://{}?mode=rwc", database_path)
    };
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = sqlx::SqlitePool::connect(&db_url).await?;
    create_places_table(&pool).await?;
    Ok(pool)
}

/// Create the places table if it does not exist
pub async fn create_places_table(db: &Pool<Sqlite>) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS places (
            guid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            address TEXT NOT NULL,
            lat REAL,
            lng REAL,
            category TEXT NOT NULL,
            service_type TEXT NOT NULL,
            hours TEXT,
            price_range INTEGER,
            images TEXT NOT NULL DEFAULT '[]',
            confidence REAL NOT NULL,
            missing_fields TEXT NOT NULL DEFAULT '[]',
            state TEXT NOT NULL DEFAULT 'pending',
            source TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(db)
    .await?;
    Ok(())
}

/// SQLite-backed place store
pub struct SqlitePlaceStore {
    db: Pool<Sqlite>,
}

impl SqlitePlaceStore {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    fn row_to_place(row: &SqliteRow) -> Result<StoredPlace> {
        let guid: String = row.try_get("guid")?;
        let id = Uuid::parse_str(&guid)
            .map_err(|e| Error::Internal(format!("Invalid UUID in database: {}", e)))?;

        let lat: Option<f64> = row.try_get("lat")?;
        let lng: Option<f64> = row.try_get("lng")?;
        let coordinates = match (lat, lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
            _ => None,
        };

        let images_json: String = row.try_get("images")?;
        let images: Vec<String> = serde_json::from_str(&images_json).unwrap_or_default();
        let missing_json: String = row.try_get("missing_fields")?;
        let missing_fields: Vec<String> = serde_json::from_str(&missing_json).unwrap_or_default();

        let state_str: String = row.try_get("state")?;
        let state = ModerationState::from_str(&state_str).map_err(Error::Internal)?;

        let price_range: Option<i64> = row.try_get("price_range")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

        Ok(StoredPlace {
            id,
            record: CanonicalRecord {
                name: row.try_get("name")?,
                address: row.try_get("address")?,
                coordinates,
                category: row.try_get("category")?,
                service_type: row.try_get("service_type")?,
                hours: row.try_get("hours")?,
                price_range: price_range.map(|p| p as u8),
                images,
                confidence: row.try_get("confidence")?,
                missing_fields,
            },
            state,
            source: row.try_get("source")?,
            created_at,
            updated_at,
        })
    }
}

#[async_trait::async_trait]
impl PlaceStore for SqlitePlaceStore {
    async fn get_all(&self) -> Result<Vec<StoredPlace>> {
        let rows = sqlx::query("SELECT * FROM places ORDER BY created_at")
            .fetch_all(&self.db)
            .await?;
        rows.iter().map(Self::row_to_place).collect()
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<StoredPlace>> {
        let row = sqlx::query("SELECT * FROM places WHERE guid = ?")
            .bind(id.to_string())
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(Self::row_to_place).transpose()
    }

    async fn save(&self, place: &StoredPlace) -> Result<()> {
        let images = serde_json::to_string(&place.record.images)
            .map_err(|e| Error::Internal(format!("Failed to serialize JSON: {}", e)))?;
        let missing = serde_json::to_string(&place.record.missing_fields)
            .map_err(|e| Error::Internal(format!("Failed to serialize JSON: {}", e)))?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO places
                (guid, name, address, lat, lng, category, service_type, hours,
                 price_range, images, confidence, missing_fields, state, source,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(place.id.to_string())
        .bind(&place.record.name)
        .bind(&place.record.address)
        .bind(place.record.coordinates.map(|c| c.lat))
        .bind(place.record.coordinates.map(|c| c.lng))
        .bind(&place.record.category)
        .bind(&place.record.service_type)
        .bind(&place.record.hours)
        .bind(place.record.price_range.map(|p| p as i64))
        .bind(images)
        .bind(place.record.confidence)
        .bind(missing)
        .bind(place.state.as_str())
        .bind(&place.source)
        .bind(place.created_at)
        .bind(place.updated_at)
        .execute(&self.db)
        .await?;

        tracing::debug!(id = %place.id, name = %place.record.name, "Place saved");
        Ok(())
    }

    async fn update_status(&self, id: Uuid, state: ModerationState) -> Result<()> {
        let result = sqlx::query("UPDATE places SET state = ?, updated_at = ? WHERE guid = ?")
            .bind(state.as_str())
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Place {} not found", id)));
        }
        Ok(())
    }

    async fn update_record(&self, id: Uuid, record: &CanonicalRecord) -> Result<()> {
        let images = serde_json::to_string(&record.images)
            .map_err(|e| Error::Internal(format!("Failed to serialize JSON: {}", e)))?;
        let missing = serde_json::to_string(&record.missing_fields)
            .map_err(|e| Error::Internal(format!("Failed to serialize JSON: {}", e)))?;

        let result = sqlx::query(
            r#"
            UPDATE places SET
                name = ?, address = ?, lat = ?, lng = ?, category = ?,
                service_type = ?, hours = ?, price_range = ?, images = ?,
                confidence = ?, missing_fields = ?, updated_at = ?
            WHERE guid = ?
            "#,
        )
        .bind(&record.name)
        .bind(&record.address)
        .bind(record.coordinates.map(|c| c.lat))
        .bind(record.coordinates.map(|c| c.lng))
        .bind(&record.category)
        .bind(&record.service_type)
        .bind(&record.hours)
        .bind(record.price_range.map(|p| p as i64))
        .bind(images)
        .bind(record.confidence)
        .bind(missing)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Place {} not found", id)));
        }
        Ok(())
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// In-memory place store for tests and ephemeral dev runs
#[derive(Default)]
pub struct MemoryPlaceStore {
    places: RwLock<HashMap<Uuid, StoredPlace>>,
}

impl MemoryPlaceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PlaceStore for MemoryPlaceStore {
    async fn get_all(&self) -> Result<Vec<StoredPlace>> {
        let places = self.places.read().await;
        let mut all: Vec<StoredPlace> = places.values().cloned().collect();
        all.sort_by_key(|p| p.created_at);
        Ok(all)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<StoredPlace>> {
        Ok(self.places.read().await.get(&id).cloned())
    }

    async fn save(&self, place: &StoredPlace) -> Result<()> {
        self.places.write().await.insert(place.id, place.clone());
        Ok(())
    }

    async fn update_status(&self, id: Uuid, state: ModerationState) -> Result<()> {
        let mut places = self.places.write().await;
        let place = places
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Place {} not found", id)))?;
        place.state = state;
        place.updated_at = Utc::now();
        Ok(())
    }

    async fn update_record(&self, id: Uuid, record: &CanonicalRecord) -> Result<()> {
        let mut places = self.places.write().await;
        let place = places
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Place {} not found", id)))?;
        place.record = record.clone();
        place.updated_at = Utc::now();
        Ok(())
    }
}
