//! End-to-end capture, reveal and gallery flow against the in-memory store.

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use darkroom::{
    Actor, AdminError, CaptureError, EventPatch, EventState, FilterKind, InMemoryStore,
    ManualClock, NewEvent, PipelineSettings, RenderPipeline, RenderSize, ViewError,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

fn png(width: u32, height: u32) -> Bytes {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 3 % 256) as u8, 128])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    Bytes::from(out)
}

fn wedding(max_photos: Option<u32>) -> NewEvent {
    NewEvent {
        name: "Ana & Luis".to_string(),
        upload_start: Some(ts("2025-06-14T16:00:00Z")),
        upload_end: Some(ts("2025-06-15T02:00:00Z")),
        reveal_time: ts("2025-06-15T10:00:00Z"),
        expiry_date: Some(ts("2025-07-15T10:00:00Z")),
        timezone: "Europe/Madrid".to_string(),
        max_photos,
        filter_type: FilterKind::Vintage,
        allow_guest_deletion: false,
    }
}

fn pipeline(start: &str) -> (Arc<RenderPipeline>, Arc<ManualClock>, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::new(ts(start)));
    let pipeline = Arc::new(RenderPipeline::new(
        store.clone(),
        store.clone(),
        clock.clone(),
        PipelineSettings::default(),
    ));
    (pipeline, clock, store)
}

#[tokio::test]
async fn test_photos_stay_hidden_until_reveal() {
    let (pipeline, clock, store) = pipeline("2025-06-14T12:00:00Z");
    let event = assert_ok!(pipeline.create_event(wedding(None)).await);

    let early = pipeline.submit(event.id, "phone-a", png(64, 48)).await;
    assert!(matches!(
        early,
        Err(CaptureError::Closed {
            state: EventState::NotStarted
        })
    ));

    clock.set(ts("2025-06-14T20:00:00Z"));
    let first = assert_ok!(pipeline.submit(event.id, "phone-a", png(64, 48)).await);
    clock.advance(TimeDelta::seconds(5));
    assert_ok!(pipeline.submit(event.id, "phone-b", png(48, 64)).await);
    assert_eq!(store.blob_count(), 4, "two photos plus thumbnails");

    let hidden = pipeline.gallery(event.id).await;
    assert!(matches!(
        hidden,
        Err(ViewError::NotRevealed {
            state: EventState::Active
        })
    ));
    assert_err!(
        pipeline
            .render_photo(event.id, first.photo_id, RenderSize::Preview)
            .await
    );

    clock.set(ts("2025-06-15T03:00:00Z"));
    let status = assert_ok!(pipeline.status(event.id, None).await);
    assert_eq!(status.state, EventState::Ended);
    assert_eq!(status.photo_count, 2);
    assert_eq!(status.next_transition, Some(event.reveal_time));

    clock.set(ts("2025-06-15T10:00:00Z"));
    let gallery = assert_ok!(pipeline.gallery(event.id).await);
    assert_eq!(gallery.photos.len(), 2);
    assert_eq!(gallery.photos[0].id, first.photo_id);
    assert!(gallery.photos.iter().all(|p| p.url.is_some()));
    assert!(gallery.photos[0]
        .thumbnail_url
        .as_deref()
        .is_some_and(|url| url.contains("_thumb.jpg")));

    let full = assert_ok!(
        pipeline
            .render_photo(event.id, first.photo_id, RenderSize::Full)
            .await
    );
    assert_eq!(full.content_type, "image/jpeg");
    assert_eq!((full.width, full.height), (64, 48));

    clock.set(ts("2025-07-15T10:00:00Z"));
    assert!(matches!(
        pipeline.gallery(event.id).await,
        Err(ViewError::NotRevealed {
            state: EventState::Expired
        })
    ));
}

#[tokio::test]
async fn test_quota_closes_capture_for_everyone() {
    let (pipeline, _clock, _store) = pipeline("2025-06-14T20:00:00Z");
    let event = assert_ok!(pipeline.create_event(wedding(Some(2))).await);

    assert_ok!(pipeline.submit(event.id, "phone-a", png(32, 32)).await);
    let second = assert_ok!(pipeline.submit(event.id, "phone-b", png(32, 32)).await);
    assert_eq!(second.photos_remaining, Some(0));

    let third = pipeline.submit(event.id, "phone-c", png(32, 32)).await;
    assert!(matches!(third, Err(CaptureError::QuotaExceeded)));

    let status = assert_ok!(pipeline.status(event.id, None).await);
    assert!(status.quota_reached);
    assert!(!status.capture_open);
}

#[tokio::test]
async fn test_rate_limit_then_window_frees() {
    let (pipeline, clock, _store) = pipeline("2025-06-14T20:00:00Z");
    let event = assert_ok!(pipeline.create_event(wedding(None)).await);

    for _ in 0..5 {
        assert_ok!(pipeline.submit(event.id, "phone-a", png(16, 16)).await);
        clock.advance(TimeDelta::seconds(2));
    }

    let limited = pipeline.submit(event.id, "phone-a", png(16, 16)).await;
    assert!(matches!(limited, Err(CaptureError::RateLimited { .. })));

    // Other sessions are unaffected
    assert_ok!(pipeline.submit(event.id, "phone-b", png(16, 16)).await);

    let status = assert_ok!(pipeline.status(event.id, Some("phone-a")).await);
    let gate = status.gate.unwrap();
    assert_eq!(gate.remaining_in_window, 0);
    assert!(gate.cooldown_remaining_secs > 0);

    clock.advance(TimeDelta::seconds(61));
    assert_ok!(pipeline.submit(event.id, "phone-a", png(16, 16)).await);
}

#[tokio::test]
async fn test_operator_reveal_now_and_deletion_policy() {
    let (pipeline, _clock, store) = pipeline("2025-06-14T20:00:00Z");
    let event = assert_ok!(pipeline.create_event(wedding(None)).await);
    let receipt = assert_ok!(pipeline.submit(event.id, "phone-a", png(40, 30)).await);

    let revealed = assert_ok!(
        pipeline
            .update_event(
                event.id,
                EventPatch {
                    reveal_now: true,
                    ..Default::default()
                },
            )
            .await
    );
    assert_eq!(revealed.reveal_time, ts("2025-06-14T20:00:00Z"));
    assert_eq!(assert_ok!(pipeline.gallery(event.id).await).photos.len(), 1);

    let guest = pipeline
        .delete_photo(event.id, receipt.photo_id, Actor::Guest)
        .await;
    assert!(matches!(guest, Err(AdminError::Forbidden)));

    assert_ok!(
        pipeline
            .delete_photo(event.id, receipt.photo_id, Actor::Operator)
            .await
    );
    assert_eq!(store.blob_count(), 0);
    assert!(assert_ok!(pipeline.gallery(event.id).await).photos.is_empty());
}

#[tokio::test]
async fn test_rejects_inverted_schedule() {
    let (pipeline, _clock, _store) = pipeline("2025-06-14T12:00:00Z");
    let mut inverted = wedding(None);
    inverted.upload_end = Some(ts("2025-06-14T10:00:00Z"));

    let result = pipeline.create_event(inverted).await;
    assert!(matches!(result, Err(AdminError::Invalid(_))));
}
