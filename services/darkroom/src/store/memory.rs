use super::{resolve_key, BlobStore, BlobTransform, EventStore, StoreError};
use crate::models::{Event, Photo};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredBlob {
    bytes: Bytes,
    content_type: String,
}

/// Process-local store for development and tests.
///
/// Signed URLs use a `memory://` scheme and are not fetchable; the render
/// endpoint reads bytes through `get_blob` instead.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    events: RwLock<HashMap<Uuid, Event>>,
    photos: RwLock<HashMap<Uuid, Photo>>,
    blobs: RwLock<HashMap<String, StoredBlob>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn has_blob(&self, key: &str) -> bool {
        self.blobs.read().contains_key(key)
    }

    pub fn content_type_of(&self, key: &str) -> Option<String> {
        self.blobs.read().get(key).map(|b| b.content_type.clone())
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn create_event(&self, event: &Event) -> Result<(), StoreError> {
        self.events.write().insert(event.id, event.clone());
        Ok(())
    }

    async fn get_event(&self, event_id: Uuid) -> Result<Event, StoreError> {
        self.events
            .read()
            .get(&event_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("event", event_id))
    }

    async fn update_event(&self, event: &Event) -> Result<(), StoreError> {
        match self.events.write().get_mut(&event.id) {
            Some(stored) => {
                *stored = event.clone();
                Ok(())
            }
            None => Err(StoreError::not_found("event", event.id)),
        }
    }

    async fn count_photos(&self, event_id: Uuid) -> Result<u64, StoreError> {
        Ok(self
            .photos
            .read()
            .values()
            .filter(|p| p.event_id == event_id)
            .count() as u64)
    }

    async fn insert_photo_record(&self, photo: &Photo) -> Result<(), StoreError> {
        self.photos.write().insert(photo.id, photo.clone());
        Ok(())
    }

    async fn get_photo(&self, photo_id: Uuid) -> Result<Photo, StoreError> {
        self.photos
            .read()
            .get(&photo_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("photo", photo_id))
    }

    async fn list_photos(&self, event_id: Uuid) -> Result<Vec<Photo>, StoreError> {
        let mut photos: Vec<Photo> = self
            .photos
            .read()
            .values()
            .filter(|p| p.event_id == event_id)
            .cloned()
            .collect();
        photos.sort_by_key(|p| (p.captured_at, p.id));
        Ok(photos)
    }

    async fn delete_photo_record(&self, photo_id: Uuid) -> Result<(), StoreError> {
        self.photos
            .write()
            .remove(&photo_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("photo", photo_id))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl BlobStore for InMemoryStore {
    async fn put_blob(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<String, StoreError> {
        debug!(key, size_bytes = bytes.len(), "Storing blob in memory");
        self.blobs.write().insert(
            key.to_string(),
            StoredBlob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(key.to_string())
    }

    async fn get_blob(&self, key: &str) -> Result<Bytes, StoreError> {
        self.blobs
            .read()
            .get(key)
            .map(|b| b.bytes.clone())
            .ok_or_else(|| StoreError::not_found("blob", key))
    }

    async fn signed_url(
        &self,
        key: &str,
        ttl: Duration,
        transform: Option<BlobTransform>,
    ) -> Result<String, StoreError> {
        let resolved = resolve_key(key, transform);
        if !self.blobs.read().contains_key(&resolved) {
            return Err(StoreError::not_found("blob", resolved));
        }
        Ok(format!("memory://{}?ttl={}", resolved, ttl.as_secs()))
    }

    async fn delete_blob(&self, key: &str) -> Result<(), StoreError> {
        // Deleting a missing object is not an error, matching S3
        self.blobs.write().remove(key);
        Ok(())
    }
}
