//! Per-session capture throttle.
//!
//! A sliding window of successful upload instants, a cooldown that starts
//! when the window overflows, and a single slot holding the last failed
//! payload for one manual retry. The gate never talks to storage; the
//! pipeline tells it what happened.

use crate::config::CaptureConfig;
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use thiserror::Error;

/// Local rejections; no network call has been made
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    #[error("Too many uploads, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Cooling down for another {remaining_secs}s")]
    CooldownActive { remaining_secs: u64 },
}

/// Window and cooldown lengths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatePolicy {
    pub max_uploads: usize,
    pub window: TimeDelta,
    pub cooldown: TimeDelta,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self::from(&CaptureConfig::default())
    }
}

impl From<&CaptureConfig> for GatePolicy {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            max_uploads: config.max_uploads_per_window,
            window: config.window(),
            cooldown: config.cooldown(),
        }
    }
}

/// The payload of the most recent failed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedUpload {
    pub payload: Bytes,
    pub failed_at: DateTime<Utc>,
}

/// Point-in-time view of a gate, for status responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateSnapshot {
    pub uploads_in_window: usize,
    pub remaining_in_window: usize,
    pub cooldown_remaining_secs: u64,
    pub retry_available: bool,
}

#[derive(Debug, Default)]
struct GateState {
    successes: VecDeque<DateTime<Utc>>,
    cooldown_until: Option<DateTime<Utc>>,
    last_failure: Option<FailedUpload>,
}

impl GateState {
    fn prune(&mut self, now: DateTime<Utc>, window: TimeDelta) {
        while self
            .successes
            .front()
            .is_some_and(|oldest| now - *oldest >= window)
        {
            self.successes.pop_front();
        }
    }
}

/// Sliding-window limiter with cooldown and a one-slot retry cache
#[derive(Debug)]
pub struct UploadGate {
    policy: GatePolicy,
    state: Mutex<GateState>,
}

impl UploadGate {
    pub fn new(policy: GatePolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Decide whether an attempt at `now` may proceed.
    ///
    /// Overflowing the window starts the cooldown.
    pub fn check(&self, now: DateTime<Utc>) -> Result<(), GateRejection> {
        let mut state = self.state.lock();

        if let Some(until) = state.cooldown_until {
            if now < until {
                return Err(GateRejection::CooldownActive {
                    remaining_secs: ceil_secs(until - now),
                });
            }
            state.cooldown_until = None;
        }

        state.prune(now, self.policy.window);

        if state.successes.len() >= self.policy.max_uploads {
            let until = now + self.policy.cooldown;
            state.cooldown_until = Some(until);

            let window_frees = state
                .successes
                .front()
                .map(|oldest| *oldest + self.policy.window)
                .unwrap_or(now);
            return Err(GateRejection::RateLimited {
                retry_after_secs: ceil_secs(window_frees.max(until) - now),
            });
        }

        Ok(())
    }

    /// Count a confirmed upload; clears any pending retry
    pub fn record_success(&self, at: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.successes.push_back(at);
        state.last_failure = None;
    }

    /// Keep `payload` for one manual retry, replacing any earlier failure
    pub fn record_failure(&self, payload: Bytes, at: DateTime<Utc>) {
        self.state.lock().last_failure = Some(FailedUpload {
            payload,
            failed_at: at,
        });
    }

    /// The cached failure, if any, left in place
    pub fn pending_retry(&self) -> Option<FailedUpload> {
        self.state.lock().last_failure.clone()
    }

    /// Drop the cached failure
    pub fn clear_retry(&self) {
        self.state.lock().last_failure = None;
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> GateSnapshot {
        let mut state = self.state.lock();
        state.prune(now, self.policy.window);

        let cooldown_remaining_secs = state
            .cooldown_until
            .filter(|until| now < *until)
            .map(|until| ceil_secs(until - now))
            .unwrap_or(0);

        GateSnapshot {
            uploads_in_window: state.successes.len(),
            remaining_in_window: self.policy.max_uploads.saturating_sub(state.successes.len()),
            cooldown_remaining_secs,
            retry_available: state.last_failure.is_some(),
        }
    }
}

/// Whole seconds, rounded up, never negative
fn ceil_secs(delta: TimeDelta) -> u64 {
    let millis = delta.num_milliseconds();
    if millis <= 0 {
        0
    } else {
        (millis as u64).div_ceil(1000)
    }
}
