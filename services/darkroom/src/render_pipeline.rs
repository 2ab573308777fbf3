//! Capture and viewing orchestration.
//!
//! Uploads run lifecycle check -> gate check -> quota count -> compress ->
//! store write -> gate append, all under the session's attempt lock. An
//! event already seen at its cap answers `QuotaExceeded` ahead of the gate,
//! since waiting out a rate limit cannot help there. Views
//! run lifecycle check -> fetch -> filter -> encode. Every failure is turned
//! into one of the small error enums below before it leaves this module.

use crate::compressor::{CompressError, CompressedImage, Compressor};
use crate::config::{CaptureConfig, CompressionConfig, Config, GalleryConfig};
use crate::event_clock::{Clock, Countdown, EventClock};
use crate::filter::{FilterEngine, FilterError, FilterKind, GrainSeed, RenderedImage, Resolution};
use crate::lifecycle::EventState;
use crate::models::{Actor, Event, EventConfigError, EventPatch, NewEvent, Photo};
use crate::sessions::{Session, SessionRegistry};
use crate::store::{photo_key, thumbnail_key, BlobStore, BlobTransform, EventStore, StoreError};
use crate::upload_gate::{GatePolicy, GateRejection, GateSnapshot};
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Outcome of a capture attempt that did not store a photo
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Capture is closed while the event is {state}")]
    Closed { state: EventState },

    #[error("Too many uploads, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Cooling down for another {remaining_secs}s")]
    CooldownActive { remaining_secs: u64 },

    #[error("The event has reached its photo limit")]
    QuotaExceeded,

    #[error("Upload failed")]
    UploadFailed { retry_available: bool },

    #[error("Unsupported or malformed image: {0}")]
    DecodeFailed(String),

    #[error("Event upload window is misconfigured")]
    InvalidWindow,

    #[error("Nothing to retry")]
    NoPendingRetry,

    #[error("Event not found")]
    EventNotFound,

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<GateRejection> for CaptureError {
    fn from(rejection: GateRejection) -> Self {
        match rejection {
            GateRejection::RateLimited { retry_after_secs } => {
                CaptureError::RateLimited { retry_after_secs }
            }
            GateRejection::CooldownActive { remaining_secs } => {
                CaptureError::CooldownActive { remaining_secs }
            }
        }
    }
}

impl CaptureError {
    /// Label used on the rejection counter
    pub fn reason(&self) -> &'static str {
        match self {
            CaptureError::Closed { .. } => "closed",
            CaptureError::RateLimited { .. } => "rate_limited",
            CaptureError::CooldownActive { .. } => "cooldown",
            CaptureError::QuotaExceeded => "quota",
            CaptureError::UploadFailed { .. } => "upload_failed",
            CaptureError::DecodeFailed(_) => "decode",
            CaptureError::InvalidWindow => "invalid_window",
            CaptureError::NoPendingRetry => "no_retry",
            CaptureError::EventNotFound => "not_found",
            CaptureError::Unavailable(_) => "unavailable",
        }
    }
}

/// Errors from the viewing side
#[derive(Debug, Error)]
pub enum ViewError {
    #[error("The gallery is not available while the event is {state}")]
    NotRevealed { state: EventState },

    #[error("Event not found")]
    EventNotFound,

    #[error("Photo not found")]
    PhotoNotFound,

    #[error("Failed to render photo: {0}")]
    Render(#[from] FilterError),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// Errors from event administration and deletion
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Event not found")]
    EventNotFound,

    #[error("Photo not found")]
    PhotoNotFound,

    #[error("Invalid event configuration: {0}")]
    Invalid(#[from] EventConfigError),

    #[error("Guests may not delete photos for this event")]
    Forbidden,

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

fn event_lookup<E>(err: StoreError, not_found: E, unavailable: impl FnOnce(String) -> E) -> E {
    match err {
        StoreError::NotFound { .. } => not_found,
        other => {
            error!(error = %other, "Store call failed");
            unavailable(other.to_string())
        }
    }
}

/// Tunables the pipeline needs from the service config
#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    pub capture: CaptureConfig,
    pub compression: CompressionConfig,
    pub gallery: GalleryConfig,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            capture: config.capture.clone(),
            compression: config.compression.clone(),
            gallery: config.gallery.clone(),
        }
    }
}

/// A stored upload
#[derive(Debug, Clone, Serialize)]
pub struct CaptureReceipt {
    pub photo_id: Uuid,
    pub captured_at: DateTime<Utc>,
    pub size_bytes: usize,
    /// JPEG quality used; absent when the original already fit
    pub quality: Option<u8>,
    pub gate: GateSnapshot,
    /// Photos left before the event cap, when there is one
    pub photos_remaining: Option<u64>,
}

/// Everything a guest screen needs to decide what to show
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventStatus {
    pub event_id: Uuid,
    pub name: String,
    pub state: EventState,
    /// The stored schedule is invalid; guests see `not_started`
    pub misconfigured: bool,
    /// Capture is allowed right now (active and under the cap)
    pub capture_open: bool,
    pub can_view_gallery: bool,
    pub quota_reached: bool,
    pub photo_count: u64,
    pub max_photos: Option<u32>,
    pub filter_type: FilterKind,
    pub timezone: String,
    pub now: DateTime<Utc>,
    pub local_time: String,
    pub reveal_time: DateTime<Utc>,
    pub reveal_local: String,
    /// `today`, `tomorrow` or `on <date>`
    pub reveal_label: String,
    pub next_transition: Option<DateTime<Utc>>,
    pub countdown: Option<Countdown>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateSnapshot>,
}

impl EventStatus {
    /// Pure projection of an event at `now`
    pub fn compute(
        event: &Event,
        now: DateTime<Utc>,
        photo_count: u64,
        gate: Option<GateSnapshot>,
    ) -> Self {
        let schedule = event.schedule();
        let misconfigured = schedule.validate().is_err();
        let state = schedule.guest_state_at(now);
        let clock = event.clock().unwrap_or(EventClock::new(Tz::UTC));
        let quota_reached = event.quota_reached(photo_count);

        let next_transition = if misconfigured {
            None
        } else {
            schedule.next_transition(now)
        };

        Self {
            event_id: event.id,
            name: event.name.clone(),
            state,
            misconfigured,
            capture_open: state.can_capture() && !quota_reached,
            can_view_gallery: state.can_view_gallery(),
            quota_reached,
            photo_count,
            max_photos: event.max_photos,
            filter_type: event.filter_type,
            timezone: event.timezone.clone(),
            now,
            local_time: clock.format_local(now),
            reveal_time: event.reveal_time,
            reveal_local: clock.format_local(event.reveal_time),
            reveal_label: clock.day_label(event.reveal_time, now).to_string(),
            next_transition,
            countdown: next_transition.map(|at| clock.countdown(at, now)),
            gate,
        }
    }
}

/// Revealed gallery listing
#[derive(Debug, Clone, Serialize)]
pub struct Gallery {
    pub event_id: Uuid,
    pub filter_type: FilterKind,
    pub photos: Vec<GalleryPhoto>,
    pub urls_expire_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GalleryPhoto {
    pub id: Uuid,
    pub captured_at: DateTime<Utc>,
    pub captured_local: String,
    pub width: i32,
    pub height: i32,
    pub thumbnail_url: Option<String>,
    pub url: Option<String>,
}

/// Parameters for a live camera preview
#[derive(Debug, Clone, Serialize)]
pub struct FilterPreview {
    pub filter_type: FilterKind,
    /// CSS `filter` value, absent for the identity filter
    pub css_filter: Option<String>,
    /// CSS `background` overlay emulating the vignette
    pub vignette_overlay: Option<String>,
    pub grain_intensity: f32,
}

impl FilterPreview {
    pub fn for_kind(kind: FilterKind) -> Self {
        match kind.spec() {
            None => Self {
                filter_type: kind,
                css_filter: None,
                vignette_overlay: None,
                grain_intensity: 0.0,
            },
            Some(spec) => Self {
                filter_type: kind,
                css_filter: Some(spec.css_approximation()),
                vignette_overlay: Some(spec.vignette.css_radial_gradient()),
                grain_intensity: spec.grain_intensity,
            },
        }
    }
}

/// Requested render size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderSize {
    #[default]
    Preview,
    Full,
}

/// Capture, view and admin flows over the storage collaborators
pub struct RenderPipeline {
    events: Arc<dyn EventStore>,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    sessions: SessionRegistry,
    compressor: Compressor,
    filter: FilterEngine,
    settings: PipelineSettings,
    /// Events last seen at their cap, keyed to the cap that was full
    exhausted: RwLock<HashMap<Uuid, u32>>,
}

impl RenderPipeline {
    pub fn new(
        events: Arc<dyn EventStore>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        settings: PipelineSettings,
    ) -> Self {
        let sessions = SessionRegistry::new(
            GatePolicy::from(&settings.capture),
            settings.capture.session_idle(),
        );

        Self {
            events,
            blobs,
            clock,
            sessions,
            compressor: Compressor::new(settings.compression.clone()),
            filter: FilterEngine::new(),
            settings,
            exhausted: RwLock::new(HashMap::new()),
        }
    }

    /// Whether this event's current cap was already seen full
    fn known_exhausted(&self, event: &Event) -> bool {
        event
            .max_photos
            .is_some_and(|max| self.exhausted.read().get(&event.id) == Some(&max))
    }

    fn mark_exhausted(&self, event: &Event) {
        if let Some(max) = event.max_photos {
            self.exhausted.write().insert(event.id, max);
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Store liveness, for readiness probes
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.events.ping().await
    }

    // ---- capture ----

    /// Submit a new capture for `session_id`
    #[instrument(skip(self, payload), fields(size_bytes = payload.len()))]
    pub async fn submit(
        &self,
        event_id: Uuid,
        session_id: &str,
        payload: Bytes,
    ) -> Result<CaptureReceipt, CaptureError> {
        let session = self.sessions.get_or_create(event_id, session_id, self.now());
        let _attempt = session.begin_attempt().await;
        self.attempt(&session, payload).await
    }

    /// Replay the session's last failed payload
    #[instrument(skip(self))]
    pub async fn retry(
        &self,
        event_id: Uuid,
        session_id: &str,
    ) -> Result<CaptureReceipt, CaptureError> {
        let session = self
            .sessions
            .get(event_id, session_id)
            .ok_or(CaptureError::NoPendingRetry)?;
        let _attempt = session.begin_attempt().await;

        let pending = session
            .gate()
            .pending_retry()
            .ok_or(CaptureError::NoPendingRetry)?;

        info!(
            session_id,
            failed_at = %pending.failed_at,
            size_bytes = pending.payload.len(),
            "Retrying failed upload"
        );
        self.attempt(&session, pending.payload).await
    }

    /// Drop a session's gate and retry slot
    pub fn end_session(&self, event_id: Uuid, session_id: &str) -> bool {
        self.sessions.end(event_id, session_id)
    }

    /// Remove idle sessions
    pub fn sweep_sessions(&self) -> usize {
        let removed = self.sessions.sweep_idle(self.now());
        if removed > 0 {
            debug!(removed, "Swept idle sessions");
        }
        removed
    }

    async fn attempt(
        &self,
        session: &Session,
        payload: Bytes,
    ) -> Result<CaptureReceipt, CaptureError> {
        let result = self.try_attempt(session, payload).await;

        match &result {
            Ok(receipt) => {
                metrics::counter!("darkroom.uploads.accepted").increment(1);
                info!(
                    event_id = %session.event_id(),
                    photo_id = %receipt.photo_id,
                    size_bytes = receipt.size_bytes,
                    "Photo accepted"
                );
            }
            Err(CaptureError::UploadFailed { .. }) => {
                metrics::counter!("darkroom.uploads.failed").increment(1);
            }
            Err(rejection) => {
                metrics::counter!("darkroom.uploads.rejected", "reason" => rejection.reason())
                    .increment(1);
                debug!(reason = rejection.reason(), "Capture rejected");
            }
        }

        result
    }

    async fn try_attempt(
        &self,
        session: &Session,
        payload: Bytes,
    ) -> Result<CaptureReceipt, CaptureError> {
        let event_id = session.event_id();
        let gate = session.gate();

        let event = self.events.get_event(event_id).await.map_err(|e| {
            event_lookup(e, CaptureError::EventNotFound, CaptureError::Unavailable)
        })?;

        let schedule = event.schedule();
        if schedule.validate().is_err() {
            warn!(%event_id, "Capture attempted on an event with an inverted upload window");
            return Err(CaptureError::InvalidWindow);
        }

        let state = schedule.state_at(self.now());
        if !state.can_capture() {
            return Err(CaptureError::Closed { state });
        }

        // A cap known to be full wins over the rate limit, still without a store call
        if self.known_exhausted(&event) {
            gate.clear_retry();
            return Err(CaptureError::QuotaExceeded);
        }

        gate.check(self.now())?;

        let photo_count = self.events.count_photos(event_id).await.map_err(|e| {
            error!(error = %e, %event_id, "Failed to count photos");
            CaptureError::Unavailable(e.to_string())
        })?;
        if event.quota_reached(photo_count) {
            self.mark_exhausted(&event);
            gate.clear_retry();
            return Err(CaptureError::QuotaExceeded);
        }

        let (compressed, thumbnail) = match self.prepare(payload.clone()).await {
            Ok(prepared) => prepared,
            Err(CompressError::Decode(reason)) => {
                gate.clear_retry();
                return Err(CaptureError::DecodeFailed(reason));
            }
            Err(e) => return Err(CaptureError::Unavailable(e.to_string())),
        };

        let captured_at = self.now();
        let photo = match self
            .store(&event, session, &compressed, thumbnail, captured_at)
            .await
        {
            Ok(photo) => photo,
            Err(e) => {
                warn!(error = %e, %event_id, session_id = session.id(), "Upload failed, keeping payload for retry");
                gate.record_failure(payload, self.now());
                return Err(CaptureError::UploadFailed {
                    retry_available: true,
                });
            }
        };

        // Only a confirmed write counts against the window
        let confirmed_at = self.now();
        gate.record_success(confirmed_at);
        if event.quota_reached(photo_count + 1) {
            self.mark_exhausted(&event);
        }

        Ok(CaptureReceipt {
            photo_id: photo.id,
            captured_at: photo.captured_at,
            size_bytes: compressed.len(),
            quality: compressed.quality,
            gate: gate.snapshot(confirmed_at),
            photos_remaining: event
                .max_photos
                .map(|max| u64::from(max).saturating_sub(photo_count + 1)),
        })
    }

    /// Compress the upload and cut its thumbnail off the async runtime
    async fn prepare(
        &self,
        payload: Bytes,
    ) -> Result<(CompressedImage, Option<Bytes>), CompressError> {
        let compressor = self.compressor.clone();
        let thumbnail_edge = self.settings.gallery.thumbnail_edge;

        tokio::task::spawn_blocking(move || -> Result<_, CompressError> {
            let compressed = compressor.compress(payload)?;
            let thumbnail = match compressor.thumbnail(&compressed.bytes, thumbnail_edge) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(error = %e, "Thumbnail generation failed, storing photo without one");
                    None
                }
            };
            Ok((compressed, thumbnail))
        })
        .await
        .map_err(|e| CompressError::Encode(format!("compression task failed: {e}")))?
    }

    /// Write blobs and the record, each bounded by the storage timeout.
    /// A record failure removes the blobs it would have pointed at.
    async fn store(
        &self,
        event: &Event,
        session: &Session,
        compressed: &CompressedImage,
        thumbnail: Option<Bytes>,
        captured_at: DateTime<Utc>,
    ) -> Result<Photo, StoreError> {
        let timeout = self.settings.capture.storage_timeout();
        let photo_id = Uuid::new_v4();
        let key = photo_key(event.id, photo_id, captured_at, compressed.content_type);

        let storage_key = with_timeout(
            timeout,
            self.blobs
                .put_blob(&key, compressed.bytes.clone(), compressed.content_type),
        )
        .await?;

        let thumbnail_key = match thumbnail {
            Some(bytes) => {
                let thumb_key = thumbnail_key(&storage_key);
                match with_timeout(timeout, self.blobs.put_blob(&thumb_key, bytes, "image/jpeg"))
                    .await
                {
                    Ok(stored) => Some(stored),
                    Err(e) => {
                        warn!(error = %e, key = %thumb_key, "Thumbnail upload failed");
                        None
                    }
                }
            }
            None => None,
        };

        let photo = Photo {
            id: photo_id,
            event_id: event.id,
            storage_key,
            thumbnail_key,
            captured_at,
            content_type: compressed.content_type.to_string(),
            size_bytes: compressed.len() as i64,
            width: i32::try_from(compressed.width).unwrap_or(i32::MAX),
            height: i32::try_from(compressed.height).unwrap_or(i32::MAX),
            session_id: Some(session.id().to_string()),
        };

        if let Err(e) = with_timeout(timeout, self.events.insert_photo_record(&photo)).await {
            self.remove_blobs(&photo).await;
            return Err(e);
        }

        Ok(photo)
    }

    async fn remove_blobs(&self, photo: &Photo) {
        let keys = std::iter::once(&photo.storage_key).chain(photo.thumbnail_key.as_ref());
        for key in keys {
            if let Err(e) = self.blobs.delete_blob(key).await {
                warn!(error = %e, key = %key, "Failed to delete blob, leaving orphan");
            }
        }
    }

    // ---- viewing ----

    /// Event and live photo count
    pub async fn status_inputs(&self, event_id: Uuid) -> Result<(Event, u64), ViewError> {
        let event = self.load_event(event_id).await?;
        let count = self.events.count_photos(event_id).await.map_err(|e| {
            event_lookup(e, ViewError::EventNotFound, ViewError::Unavailable)
        })?;
        Ok((event, count))
    }

    /// Current status, with the session's gate when one is named
    pub async fn status(
        &self,
        event_id: Uuid,
        session_id: Option<&str>,
    ) -> Result<EventStatus, ViewError> {
        let (event, count) = self.status_inputs(event_id).await?;
        let now = self.now();
        let gate = session_id
            .and_then(|id| self.sessions.get(event_id, id))
            .map(|session| session.gate().snapshot(now));

        Ok(EventStatus::compute(&event, now, count, gate))
    }

    /// Live-preview parameters for the event's filter
    pub async fn filter_preview(&self, event_id: Uuid) -> Result<FilterPreview, ViewError> {
        let event = self.load_event(event_id).await?;
        Ok(FilterPreview::for_kind(event.filter_type))
    }

    /// Signed links to every photo, once revealed
    #[instrument(skip(self))]
    pub async fn gallery(&self, event_id: Uuid) -> Result<Gallery, ViewError> {
        let event = self.load_event(event_id).await?;
        let now = self.now();
        self.require_revealed(&event, now)?;

        let photos = self.events.list_photos(event_id).await.map_err(|e| {
            event_lookup(e, ViewError::EventNotFound, ViewError::Unavailable)
        })?;

        let ttl = self.settings.gallery.signed_url_ttl();
        let clock = event.clock().unwrap_or(EventClock::new(Tz::UTC));
        let mut entries = Vec::with_capacity(photos.len());

        for photo in photos {
            let thumbnail_url = if photo.thumbnail_key.is_some() {
                self.signed(&photo, ttl, Some(BlobTransform::Thumbnail)).await
            } else {
                None
            };
            let url = self.signed(&photo, ttl, None).await;

            entries.push(GalleryPhoto {
                id: photo.id,
                captured_at: photo.captured_at,
                captured_local: clock.format_local(photo.captured_at),
                width: photo.width,
                height: photo.height,
                thumbnail_url: thumbnail_url.or_else(|| url.clone()),
                url,
            });
        }

        Ok(Gallery {
            event_id,
            filter_type: event.filter_type,
            photos: entries,
            urls_expire_at: now + TimeDelta::seconds(ttl.as_secs() as i64),
        })
    }

    async fn signed(
        &self,
        photo: &Photo,
        ttl: Duration,
        transform: Option<BlobTransform>,
    ) -> Option<String> {
        match self.blobs.signed_url(&photo.storage_key, ttl, transform).await {
            Ok(url) => Some(url),
            Err(e) => {
                error!(error = %e, photo_id = %photo.id, "Failed to sign photo URL");
                None
            }
        }
    }

    /// Filtered JPEG of one photo.
    ///
    /// Previews get fresh grain on every call; full-size exports use a seed
    /// derived from the photo so repeated downloads are identical.
    #[instrument(skip(self))]
    pub async fn render_photo(
        &self,
        event_id: Uuid,
        photo_id: Uuid,
        size: RenderSize,
    ) -> Result<RenderedImage, ViewError> {
        let event = self.load_event(event_id).await?;
        self.require_revealed(&event, self.now())?;

        let photo = self.load_photo(event_id, photo_id).await?;
        let source = self.blobs.get_blob(&photo.storage_key).await.map_err(|e| {
            event_lookup(e, ViewError::PhotoNotFound, ViewError::Unavailable)
        })?;

        let (resolution, seed) = match size {
            RenderSize::Preview => (
                Resolution::Preview {
                    max_edge: self.settings.gallery.preview_edge,
                },
                GrainSeed::Random,
            ),
            RenderSize::Full => (Resolution::Full, GrainSeed::for_photo(photo.id)),
        };
        let engine = self.filter;
        let kind = event.filter_type;
        let quality = self.settings.gallery.export_quality;

        tokio::task::spawn_blocking(move || {
            engine.render_encoded(&source, kind, resolution, seed, quality)
        })
        .await
        .map_err(|e| ViewError::Unavailable(format!("render task failed: {e}")))?
        .map_err(ViewError::from)
    }

    fn require_revealed(&self, event: &Event, now: DateTime<Utc>) -> Result<(), ViewError> {
        let state = event.schedule().guest_state_at(now);
        if state.can_view_gallery() {
            Ok(())
        } else {
            Err(ViewError::NotRevealed { state })
        }
    }

    async fn load_event(&self, event_id: Uuid) -> Result<Event, ViewError> {
        self.events
            .get_event(event_id)
            .await
            .map_err(|e| event_lookup(e, ViewError::EventNotFound, ViewError::Unavailable))
    }

    async fn load_photo(&self, event_id: Uuid, photo_id: Uuid) -> Result<Photo, ViewError> {
        let photo = self
            .events
            .get_photo(photo_id)
            .await
            .map_err(|e| event_lookup(e, ViewError::PhotoNotFound, ViewError::Unavailable))?;

        if photo.event_id != event_id {
            return Err(ViewError::PhotoNotFound);
        }
        Ok(photo)
    }

    // ---- administration ----

    #[instrument(skip(self, new), fields(name = %new.name))]
    pub async fn create_event(&self, new: NewEvent) -> Result<Event, AdminError> {
        let event = new.into_event(self.now())?;
        self.events
            .create_event(&event)
            .await
            .map_err(|e| AdminError::Unavailable(e.to_string()))?;
        Ok(event)
    }

    /// Apply a patch; the store is only written if the result validates
    #[instrument(skip(self, patch))]
    pub async fn update_event(
        &self,
        event_id: Uuid,
        patch: EventPatch,
    ) -> Result<Event, AdminError> {
        let current = self
            .events
            .get_event(event_id)
            .await
            .map_err(|e| event_lookup(e, AdminError::EventNotFound, AdminError::Unavailable))?;

        let updated = patch.apply(&current, self.now())?;
        self.events
            .update_event(&updated)
            .await
            .map_err(|e| event_lookup(e, AdminError::EventNotFound, AdminError::Unavailable))?;

        info!(
            %event_id,
            state = %updated.schedule().state_at(self.now()),
            "Event updated"
        );
        Ok(updated)
    }

    /// Delete a photo: record first, then its blobs
    #[instrument(skip(self))]
    pub async fn delete_photo(
        &self,
        event_id: Uuid,
        photo_id: Uuid,
        actor: Actor,
    ) -> Result<(), AdminError> {
        let event = self
            .events
            .get_event(event_id)
            .await
            .map_err(|e| event_lookup(e, AdminError::EventNotFound, AdminError::Unavailable))?;

        if actor == Actor::Guest && !event.allow_guest_deletion {
            return Err(AdminError::Forbidden);
        }

        let photo = self
            .events
            .get_photo(photo_id)
            .await
            .map_err(|e| event_lookup(e, AdminError::PhotoNotFound, AdminError::Unavailable))?;
        if photo.event_id != event_id {
            return Err(AdminError::PhotoNotFound);
        }

        self.events
            .delete_photo_record(photo_id)
            .await
            .map_err(|e| event_lookup(e, AdminError::PhotoNotFound, AdminError::Unavailable))?;
        self.exhausted.write().remove(&event_id);
        self.remove_blobs(&photo).await;

        info!(%event_id, %photo_id, ?actor, "Photo deleted");
        Ok(())
    }
}

async fn with_timeout<T>(
    limit: Duration,
    call: impl std::future::Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Backend(anyhow::anyhow!(
            "storage call timed out after {}s",
            limit.as_secs()
        ))),
    }
}
