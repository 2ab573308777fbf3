//! Events and photos as the rest of the service sees them.

use crate::event_clock::{ClockError, EventClock};
use crate::filter::FilterKind;
use crate::lifecycle::{EventSchedule, ScheduleError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Reasons an event configuration is refused
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventConfigError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Timezone(#[from] ClockError),

    #[error("max_photos must be at least 1")]
    ZeroPhotoLimit,

    #[error("Event name must not be empty")]
    EmptyName,
}

/// A photo event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub upload_start: Option<DateTime<Utc>>,
    pub upload_end: Option<DateTime<Utc>>,
    pub reveal_time: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
    /// IANA zone used for display only
    pub timezone: String,
    pub max_photos: Option<u32>,
    #[serde(default)]
    pub filter_type: FilterKind,
    #[serde(default)]
    pub allow_guest_deletion: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn schedule(&self) -> EventSchedule {
        EventSchedule {
            upload_start: self.upload_start,
            upload_end: self.upload_end,
            reveal_time: self.reveal_time,
            expiry_date: self.expiry_date,
        }
    }

    pub fn clock(&self) -> Result<EventClock, ClockError> {
        EventClock::from_tz_id(&self.timezone)
    }

    /// Full configuration check, run before any write
    pub fn validate(&self) -> Result<(), EventConfigError> {
        if self.name.trim().is_empty() {
            return Err(EventConfigError::EmptyName);
        }
        if self.max_photos == Some(0) {
            return Err(EventConfigError::ZeroPhotoLimit);
        }
        self.schedule().validate()?;
        self.clock()?;
        Ok(())
    }

    /// True once the stored photo count meets the cap
    pub fn quota_reached(&self, photo_count: u64) -> bool {
        self.max_photos
            .is_some_and(|max| photo_count >= u64::from(max))
    }
}

/// Fields needed to create an event
#[derive(Debug, Clone, Deserialize)]
pub struct NewEvent {
    pub name: String,
    pub upload_start: Option<DateTime<Utc>>,
    pub upload_end: Option<DateTime<Utc>>,
    pub reveal_time: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub timezone: String,
    pub max_photos: Option<u32>,
    #[serde(default)]
    pub filter_type: FilterKind,
    #[serde(default)]
    pub allow_guest_deletion: bool,
}

impl NewEvent {
    pub fn into_event(self, now: DateTime<Utc>) -> Result<Event, EventConfigError> {
        let event = Event {
            id: Uuid::new_v4(),
            name: self.name,
            upload_start: self.upload_start,
            upload_end: self.upload_end,
            reveal_time: self.reveal_time,
            expiry_date: self.expiry_date,
            timezone: self.timezone,
            max_photos: self.max_photos,
            filter_type: self.filter_type,
            allow_guest_deletion: self.allow_guest_deletion,
            created_at: now,
            updated_at: now,
        };
        event.validate()?;
        Ok(event)
    }
}

/// Partial update of an event.
///
/// Nullable fields use `Option<Option<_>>`: absent leaves the field alone,
/// `null` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventPatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub upload_start: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "present")]
    pub upload_end: Option<Option<DateTime<Utc>>>,
    pub reveal_time: Option<DateTime<Utc>>,
    /// Set the reveal time to the moment the patch is applied
    #[serde(default)]
    pub reveal_now: bool,
    #[serde(default, deserialize_with = "present")]
    pub expiry_date: Option<Option<DateTime<Utc>>>,
    pub timezone: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub max_photos: Option<Option<u32>>,
    pub filter_type: Option<FilterKind>,
    pub allow_guest_deletion: Option<bool>,
}

impl EventPatch {
    /// The patched event, validated; `event` itself is untouched
    pub fn apply(&self, event: &Event, now: DateTime<Utc>) -> Result<Event, EventConfigError> {
        let mut next = event.clone();

        if let Some(name) = &self.name {
            next.name = name.clone();
        }
        if let Some(upload_start) = self.upload_start {
            next.upload_start = upload_start;
        }
        if let Some(upload_end) = self.upload_end {
            next.upload_end = upload_end;
        }
        if let Some(reveal_time) = self.reveal_time {
            next.reveal_time = reveal_time;
        }
        if self.reveal_now {
            next.reveal_time = now;
        }
        if let Some(expiry_date) = self.expiry_date {
            next.expiry_date = expiry_date;
        }
        if let Some(timezone) = &self.timezone {
            next.timezone = timezone.clone();
        }
        if let Some(max_photos) = self.max_photos {
            next.max_photos = max_photos;
        }
        if let Some(filter_type) = self.filter_type {
            next.filter_type = filter_type;
        }
        if let Some(allow) = self.allow_guest_deletion {
            next.allow_guest_deletion = allow;
        }

        next.validate()?;
        next.updated_at = now;
        Ok(next)
    }
}

fn present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// A stored photo. Immutable apart from deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    pub id: Uuid,
    pub event_id: Uuid,
    /// Blob key of the compressed upload
    pub storage_key: String,
    /// Blob key of the small variant, when one was stored
    pub thumbnail_key: Option<String>,
    pub captured_at: DateTime<Utc>,
    pub content_type: String,
    pub size_bytes: i64,
    pub width: i32,
    pub height: i32,
    pub session_id: Option<String>,
}

/// Who is asking for a deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    #[default]
    Guest,
    Operator,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    /// The wedding used across the lifecycle scenarios
    pub fn event() -> Event {
        Event {
            id: Uuid::new_v4(),
            name: "Ana & Luis".to_string(),
            upload_start: Some(ts("2025-01-15T18:00:00Z")),
            upload_end: Some(ts("2025-01-16T06:00:00Z")),
            reveal_time: ts("2025-01-17T12:00:00Z"),
            expiry_date: None,
            timezone: "Europe/Madrid".to_string(),
            max_photos: None,
            filter_type: FilterKind::Vintage,
            allow_guest_deletion: false,
            created_at: ts("2025-01-01T00:00:00Z"),
            updated_at: ts("2025-01-01T00:00:00Z"),
        }
    }
}
