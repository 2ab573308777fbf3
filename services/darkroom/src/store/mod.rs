//! Storage collaborators.
//!
//! Event and photo records live behind `EventStore`, image bytes behind
//! `BlobStore`. The service ships PostgreSQL and S3 implementations plus an
//! in-memory one for local runs and tests.

pub mod memory;

pub use memory::InMemoryStore;

use crate::models::{Event, Photo};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by storage backends
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Storage backend error: {0:#}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Variant requested from `BlobStore::signed_url`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobTransform {
    /// The small variant stored next to the photo
    Thumbnail,
}

/// Record store for events and photos
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn create_event(&self, event: &Event) -> Result<(), StoreError>;

    async fn get_event(&self, event_id: Uuid) -> Result<Event, StoreError>;

    /// Replace the stored event with `event`
    async fn update_event(&self, event: &Event) -> Result<(), StoreError>;

    async fn count_photos(&self, event_id: Uuid) -> Result<u64, StoreError>;

    async fn insert_photo_record(&self, photo: &Photo) -> Result<(), StoreError>;

    async fn get_photo(&self, photo_id: Uuid) -> Result<Photo, StoreError>;

    /// Photos of an event, oldest capture first
    async fn list_photos(&self, event_id: Uuid) -> Result<Vec<Photo>, StoreError>;

    async fn delete_photo_record(&self, photo_id: Uuid) -> Result<(), StoreError>;

    /// Cheap liveness probe
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Object store for image bytes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, returning the reference to persist
    async fn put_blob(&self, key: &str, bytes: Bytes, content_type: &str)
        -> Result<String, StoreError>;

    async fn get_blob(&self, key: &str) -> Result<Bytes, StoreError>;

    /// Time-limited read URL for `key`, or for its `transform` variant
    async fn signed_url(
        &self,
        key: &str,
        ttl: Duration,
        transform: Option<BlobTransform>,
    ) -> Result<String, StoreError>;

    async fn delete_blob(&self, key: &str) -> Result<(), StoreError>;
}

/// Key of the thumbnail stored beside `key`; thumbnails are always JPEG
pub fn thumbnail_key(key: &str) -> String {
    let name_start = key.rfind('/').map_or(0, |slash| slash + 1);
    let stem = match key[name_start..].rfind('.') {
        Some(dot) => &key[..name_start + dot],
        None => key,
    };
    format!("{stem}_thumb.jpg")
}

/// Key a blob is actually read from for a given transform
pub fn resolve_key(key: &str, transform: Option<BlobTransform>) -> String {
    match transform {
        Some(BlobTransform::Thumbnail) => thumbnail_key(key),
        None => key.to_string(),
    }
}

/// Replace anything outside `[A-Za-z0-9_-]` so ids cannot escape their prefix
pub fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Blob key for a new photo.
///
/// Format: `events/{event_id}/{YYYY-MM-DD}/{HHMMSSmmm}_{photo_id}.{ext}`. The
/// date partition keeps listings per day cheap, the time prefix keeps keys
/// in capture order.
pub fn photo_key(
    event_id: Uuid,
    photo_id: Uuid,
    captured_at: chrono::DateTime<chrono::Utc>,
    content_type: &str,
) -> String {
    format!(
        "events/{event}/{date}/{time}_{photo}.{ext}",
        event = sanitize_path_component(&event_id.to_string()),
        date = captured_at.format("%Y-%m-%d"),
        time = captured_at.format("%H%M%S%3f"),
        photo = photo_id,
        ext = extension_for(content_type),
    )
}

/// File extension for a stored content type
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_photo_key_layout() {
        let event = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let photo = Uuid::parse_str("6fa459ea-ee8a-3ca4-894e-db77e160355e").unwrap();
        let at = Utc.with_ymd_and_hms(2025, 1, 15, 19, 30, 45).unwrap();

        assert_eq!(
            photo_key(event, photo, at, "image/jpeg"),
            "events/550e8400-e29b-41d4-a716-446655440000/2025-01-15/193045000_6fa459ea-ee8a-3ca4-894e-db77e160355e.jpg"
        );
        assert!(photo_key(event, photo, at, "image/png").ends_with(".png"));
    }

    #[test]
    fn test_thumbnail_key() {
        assert_eq!(thumbnail_key("events/a/b/c.jpg"), "events/a/b/c_thumb.jpg");
        assert_eq!(thumbnail_key("events/a/b/c.png"), "events/a/b/c_thumb.jpg");
        assert_eq!(thumbnail_key("dir.v2/photo"), "dir.v2/photo_thumb.jpg");
        assert_eq!(
            resolve_key("x.jpg", Some(BlobTransform::Thumbnail)),
            "x_thumb.jpg"
        );
        assert_eq!(resolve_key("x.jpg", None), "x.jpg");
    }

    #[test]
    fn test_sanitize_path_component() {
        assert_eq!(sanitize_path_component("phone-001"), "phone-001");
        assert_eq!(sanitize_path_component("../etc"), "___etc");
        assert_eq!(sanitize_path_component("hello world"), "hello_world");
    }
}
