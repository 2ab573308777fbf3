use crate::config::DatabaseConfig;
use crate::filter::FilterKind;
use crate::models::{Event, Photo};
use crate::store::{EventStore, StoreError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Row shape of the `events` table
#[derive(Debug, Clone, FromRow)]
struct EventRow {
    id: Uuid,
    name: String,
    upload_start: Option<DateTime<Utc>>,
    upload_end: Option<DateTime<Utc>>,
    reveal_time: DateTime<Utc>,
    expiry_date: Option<DateTime<Utc>>,
    timezone: String,
    max_photos: Option<i32>,
    filter_type: String,
    allow_guest_deletion: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        let filter_type = row.filter_type.parse().unwrap_or_else(|e| {
            warn!(event_id = %row.id, error = %e, "Unknown stored filter, rendering unfiltered");
            FilterKind::None
        });

        Event {
            id: row.id,
            name: row.name,
            upload_start: row.upload_start,
            upload_end: row.upload_end,
            reveal_time: row.reveal_time,
            expiry_date: row.expiry_date,
            timezone: row.timezone,
            max_photos: row.max_photos.and_then(|m| u32::try_from(m).ok()),
            filter_type,
            allow_guest_deletion: row.allow_guest_deletion,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Row shape of the `photos` table
#[derive(Debug, Clone, FromRow)]
struct PhotoRow {
    id: Uuid,
    event_id: Uuid,
    storage_key: String,
    thumbnail_key: Option<String>,
    captured_at: DateTime<Utc>,
    content_type: String,
    size_bytes: i64,
    width: i32,
    height: i32,
    session_id: Option<String>,
}

impl From<PhotoRow> for Photo {
    fn from(row: PhotoRow) -> Self {
        Photo {
            id: row.id,
            event_id: row.event_id,
            storage_key: row.storage_key,
            thumbnail_key: row.thumbnail_key,
            captured_at: row.captured_at,
            content_type: row.content_type,
            size_bytes: row.size_bytes,
            width: row.width,
            height: row.height,
            session_id: row.session_id,
        }
    }
}

const EVENT_COLUMNS: &str = "id, name, upload_start, upload_end, reveal_time, expiry_date, \
     timezone, max_photos, filter_type, allow_guest_deletion, created_at, updated_at";

const PHOTO_COLUMNS: &str = "id, event_id, storage_key, thumbnail_key, captured_at, \
     content_type, size_bytes, width, height, session_id";

/// Event and photo records in PostgreSQL
pub struct MetadataStore {
    pool: PgPool,
}

impl MetadataStore {
    /// Create a new metadata store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

fn max_photos_column(event: &Event) -> Option<i32> {
    event
        .max_photos
        .map(|m| i32::try_from(m).unwrap_or(i32::MAX))
}

#[async_trait]
impl EventStore for MetadataStore {
    #[instrument(skip(self, event), fields(event_id = %event.id))]
    async fn create_event(&self, event: &Event) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO events (
                id, name, upload_start, upload_end, reveal_time, expiry_date,
                timezone, max_photos, filter_type, allow_guest_deletion,
                created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6,
                $7, $8, $9, $10,
                $11, $12
            )
            "#,
        )
        .bind(event.id)
        .bind(&event.name)
        .bind(event.upload_start)
        .bind(event.upload_end)
        .bind(event.reveal_time)
        .bind(event.expiry_date)
        .bind(&event.timezone)
        .bind(max_photos_column(event))
        .bind(event.filter_type.as_str())
        .bind(event.allow_guest_deletion)
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert event")?;

        info!(event_id = %event.id, "Event created");
        Ok(())
    }

    async fn get_event(&self, event_id: Uuid) -> Result<Event, StoreError> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query event")?;

        row.map(Event::from)
            .ok_or_else(|| StoreError::not_found("event", event_id))
    }

    #[instrument(skip(self, event), fields(event_id = %event.id))]
    async fn update_event(&self, event: &Event) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE events SET
                name = $2,
                upload_start = $3,
                upload_end = $4,
                reveal_time = $5,
                expiry_date = $6,
                timezone = $7,
                max_photos = $8,
                filter_type = $9,
                allow_guest_deletion = $10,
                updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(event.id)
        .bind(&event.name)
        .bind(event.upload_start)
        .bind(event.upload_end)
        .bind(event.reveal_time)
        .bind(event.expiry_date)
        .bind(&event.timezone)
        .bind(max_photos_column(event))
        .bind(event.filter_type.as_str())
        .bind(event.allow_guest_deletion)
        .bind(event.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to update event")?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("event", event.id));
        }

        debug!("Event updated");
        Ok(())
    }

    async fn count_photos(&self, event_id: Uuid) -> Result<u64, StoreError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM photos WHERE event_id = $1")
            .bind(event_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count photos")?;

        Ok(count.0.max(0) as u64)
    }

    #[instrument(skip(self, photo), fields(photo_id = %photo.id, event_id = %photo.event_id))]
    async fn insert_photo_record(&self, photo: &Photo) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO photos (
                id, event_id, storage_key, thumbnail_key, captured_at,
                content_type, size_bytes, width, height, session_id, created_at
            ) VALUES (
                $1, $2, $3, $4, $5,
                $6, $7, $8, $9, $10, NOW()
            )
            "#,
        )
        .bind(photo.id)
        .bind(photo.event_id)
        .bind(&photo.storage_key)
        .bind(&photo.thumbnail_key)
        .bind(photo.captured_at)
        .bind(&photo.content_type)
        .bind(photo.size_bytes)
        .bind(photo.width)
        .bind(photo.height)
        .bind(&photo.session_id)
        .execute(&self.pool)
        .await
        .context("Failed to insert photo record")?;

        metrics::counter!("darkroom.photos.indexed").increment(1);
        Ok(())
    }

    async fn get_photo(&self, photo_id: Uuid) -> Result<Photo, StoreError> {
        let row = sqlx::query_as::<_, PhotoRow>(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos WHERE id = $1"
        ))
        .bind(photo_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query photo")?;

        row.map(Photo::from)
            .ok_or_else(|| StoreError::not_found("photo", photo_id))
    }

    #[instrument(skip(self))]
    async fn list_photos(&self, event_id: Uuid) -> Result<Vec<Photo>, StoreError> {
        let rows = sqlx::query_as::<_, PhotoRow>(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos WHERE event_id = $1 ORDER BY captured_at ASC, id ASC"
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list photos")?;

        Ok(rows.into_iter().map(Photo::from).collect())
    }

    #[instrument(skip(self))]
    async fn delete_photo_record(&self, photo_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM photos WHERE id = $1")
            .bind(photo_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete photo record")?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("photo", photo_id));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures;

    fn row(filter_type: &str, max_photos: Option<i32>) -> EventRow {
        let event = fixtures::event();
        EventRow {
            id: event.id,
            name: event.name,
            upload_start: event.upload_start,
            upload_end: event.upload_end,
            reveal_time: event.reveal_time,
            expiry_date: event.expiry_date,
            timezone: event.timezone,
            max_photos,
            filter_type: filter_type.to_string(),
            allow_guest_deletion: false,
            created_at: event.created_at,
            updated_at: event.updated_at,
        }
    }

    #[test]
    fn test_event_row_conversion() {
        let event = Event::from(row("film35mm", Some(200)));
        assert_eq!(event.filter_type, FilterKind::Film35mm);
        assert_eq!(event.max_photos, Some(200));
    }

    #[test]
    fn test_event_row_tolerates_bad_values() {
        let event = Event::from(row("polaroid", Some(-1)));
        assert_eq!(event.filter_type, FilterKind::None);
        assert_eq!(event.max_photos, None);
    }

    #[test]
    fn test_filter_column_round_trips() {
        for kind in [FilterKind::None, FilterKind::Vintage, FilterKind::Film35mm] {
            assert_eq!(Event::from(row(kind.as_str(), None)).filter_type, kind);
        }
    }
}
