//! Darkroom Service
//!
//! Event photo kiosk backend. Guests capture photos during an event's upload
//! window; the photos stay hidden until the reveal time, after which the
//! gallery serves them through the event's film filter until expiry.
//!
//! ## Features
//!
//! - **Time-gated lifecycle**: every decision is a pure function of the event
//!   schedule and the current instant, evaluated in the event's timezone
//! - **Upload throttling**: per-session sliding window with a cooldown and a
//!   one-slot retry for failed uploads
//! - **Size-budgeted compression**: downscale then step JPEG quality until
//!   the upload fits
//! - **Film filters**: vintage and 35mm looks with grain and vignette,
//!   rendered server-side for previews and exports
//!
//! ## Architecture
//!
//! ```text
//!  guest device                                     PostgreSQL
//! ┌──────────────┐   ┌──────────────┐              ┌──────────────┐
//! │ capture      │──▶│ upload gate  │              │ events       │
//! └──────────────┘   └──────────────┘              │ photos       │
//!                           │                      └──────────────┘
//!                           ▼                             ▲
//!                    ┌──────────────┐   ┌──────────┐      │
//!                    │ compressor   │──▶│ S3 blobs │──────┤
//!                    └──────────────┘   └──────────┘      │
//!                                             │           │
//!  gallery / status                           ▼           │
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐  │
//! │ HTTP API     │◀──│ filter       │◀──│ lifecycle    │──┘
//! └──────────────┘   └──────────────┘   └──────────────┘
//! ```

pub mod api;
pub mod compressor;
pub mod config;
pub mod event_clock;
pub mod filter;
pub mod lifecycle;
pub mod metadata_store;
pub mod models;
pub mod render_pipeline;
pub mod s3_store;
pub mod sessions;
pub mod status_ticker;
pub mod store;
pub mod upload_gate;

pub use api::{create_router, start_api_server, AppState};
pub use config::Config;
pub use event_clock::{Clock, EventClock, ManualClock, SystemClock};
pub use filter::{FilterEngine, FilterKind};
pub use lifecycle::{EventSchedule, EventState};
pub use metadata_store::MetadataStore;
pub use models::{Actor, Event, EventPatch, NewEvent, Photo};
pub use render_pipeline::{
    AdminError, CaptureError, EventStatus, PipelineSettings, RenderPipeline, RenderSize, ViewError,
};
pub use s3_store::S3BlobStore;
pub use status_ticker::StatusTicker;
pub use store::{BlobStore, EventStore, InMemoryStore, StoreError};
pub use upload_gate::{GatePolicy, GateRejection, UploadGate};
