//! Periodic status re-evaluation.
//!
//! The lifecycle is a pure function of time, so a screen that shows it
//! needs something to re-run it. A ticker recomputes an event's status once
//! per period from a cached copy of the event, refreshes that copy from the
//! store every few ticks, and publishes the result on a watch channel.

use crate::models::Event;
use crate::render_pipeline::{EventStatus, RenderPipeline, ViewError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const DEFAULT_PERIOD: Duration = Duration::from_secs(1);
const DEFAULT_REFRESH_EVERY: u32 = 15;

/// Spawns per-event status publishers
#[derive(Clone)]
pub struct StatusTicker {
    pipeline: Arc<RenderPipeline>,
    period: Duration,
    refresh_every: u32,
}

impl StatusTicker {
    pub fn new(pipeline: Arc<RenderPipeline>) -> Self {
        Self {
            pipeline,
            period: DEFAULT_PERIOD,
            refresh_every: DEFAULT_REFRESH_EVERY,
        }
    }

    /// Re-evaluate every `period`, reloading the event every `refresh_every` ticks
    pub fn with_timing(mut self, period: Duration, refresh_every: u32) -> Self {
        self.period = period;
        self.refresh_every = refresh_every.max(1);
        self
    }

    /// Start publishing status for `event_id`.
    ///
    /// The task ends when `cancel` fires, every receiver is dropped, or the
    /// event disappears from the store.
    pub async fn watch(
        &self,
        event_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<watch::Receiver<EventStatus>, ViewError> {
        let (event, photo_count) = self.pipeline.status_inputs(event_id).await?;
        let initial = EventStatus::compute(&event, self.pipeline.now(), photo_count, None);
        let (tx, rx) = watch::channel(initial);

        tokio::spawn(run(self.clone(), event, photo_count, tx, cancel));
        Ok(rx)
    }
}

async fn run(
    ticker: StatusTicker,
    mut event: Event,
    mut photo_count: u64,
    tx: watch::Sender<EventStatus>,
    cancel: CancellationToken,
) {
    let event_id = event.id;
    let mut interval = tokio::time::interval(ticker.period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick completes immediately; the initial status is already published
    interval.tick().await;

    let mut ticks: u32 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tx.closed() => break,
            _ = interval.tick() => {}
        }

        ticks = ticks.wrapping_add(1);
        if ticks % ticker.refresh_every == 0 {
            match ticker.pipeline.status_inputs(event_id).await {
                Ok((fresh, count)) => {
                    event = fresh;
                    photo_count = count;
                }
                Err(ViewError::EventNotFound) => {
                    info!(%event_id, "Event removed, stopping status ticker");
                    break;
                }
                Err(e) => warn!(%event_id, error = %e, "Status refresh failed, using cached event"),
            }
        }

        let status = EventStatus::compute(&event, ticker.pipeline.now(), photo_count, None);
        let previous = tx.borrow().state;
        if status.state != previous {
            info!(%event_id, from = %previous, to = %status.state, "Event state changed");
        }

        if tx.send(status).is_err() {
            break;
        }
    }

    debug!(%event_id, "Status ticker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_clock::ManualClock;
    use crate::lifecycle::EventState;
    use crate::models::fixtures::{event, ts};
    use crate::models::EventPatch;
    use crate::render_pipeline::PipelineSettings;
    use crate::store::{EventStore, InMemoryStore};

    async fn setup(now: &str) -> (Arc<RenderPipeline>, Arc<ManualClock>, Arc<InMemoryStore>, Event) {
        let store = Arc::new(InMemoryStore::new());
        let event = event();
        store.create_event(&event).await.unwrap();
        let clock = Arc::new(ManualClock::new(ts(now)));
        let pipeline = Arc::new(RenderPipeline::new(
            store.clone(),
            store.clone(),
            clock.clone(),
            PipelineSettings::default(),
        ));
        (pipeline, clock, store, event)
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_state_change_on_tick() {
        let (pipeline, clock, _store, event) = setup("2025-01-15T17:59:58Z").await;
        let ticker = StatusTicker::new(pipeline);
        let mut rx = ticker.watch(event.id, CancellationToken::new()).await.unwrap();
        assert_eq!(rx.borrow().state, EventState::NotStarted);
        assert_eq!(rx.borrow().countdown.unwrap().total_seconds(), 2);

        clock.set(ts("2025-01-15T18:00:00Z"));
        rx.changed().await.unwrap();
        let status = rx.borrow_and_update().clone();
        assert_eq!(status.state, EventState::Active);
        assert!(status.capture_open);
        assert_eq!(status.next_transition, Some(ts("2025-01-16T06:00:00Z")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_picks_up_event_edits() {
        let (pipeline, _clock, _store, event) = setup("2025-01-15T19:00:00Z").await;
        let ticker = StatusTicker::new(pipeline.clone()).with_timing(Duration::from_secs(1), 2);
        let mut rx = ticker.watch(event.id, CancellationToken::new()).await.unwrap();

        let reveal = EventPatch {
            reveal_now: true,
            ..Default::default()
        };
        pipeline.update_event(event.id, reveal).await.unwrap();

        // Tick 1 still uses the cached event, tick 2 reloads it
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().state, EventState::Active);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().state, EventState::Revealed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_publishing() {
        let (pipeline, _clock, _store, event) = setup("2025-01-15T19:00:00Z").await;
        let cancel = CancellationToken::new();
        let mut rx = StatusTicker::new(pipeline)
            .watch(event.id, cancel.clone())
            .await
            .unwrap();

        cancel.cancel();
        // Sender is dropped once the task exits
        while rx.changed().await.is_ok() {}
        assert!(rx.has_changed().is_err());
    }

    #[tokio::test]
    async fn test_unknown_event() {
        let (pipeline, _clock, _store, _event) = setup("2025-01-15T19:00:00Z").await;
        let result = StatusTicker::new(pipeline)
            .watch(Uuid::new_v4(), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ViewError::EventNotFound)));
    }
}
