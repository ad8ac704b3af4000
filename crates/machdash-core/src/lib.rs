//! Reactive data layer between `machdash-api` and UI consumers.
//!
//! This crate owns the business logic, domain model, and caching
//! infrastructure for the machdash workspace:
//!
//! - **[`Dashboard`]** — Central facade managing the full lifecycle:
//!   [`Dashboard::new`] builds the HTTP client, opens the SQLite cache,
//!   and runs the one-time legacy migration;
//!   [`select_machine()`](Dashboard::select_machine) starts a poll
//!   stream per active metric and fully stops the previous machine's
//!   streams first.
//!
//! - **[`Repository`]** — Cache-first reads and write-through mutations
//!   over [`CacheStore`]. Cached data renders instantly; backend
//!   refreshes land through upserts and never wipe the cache on
//!   failure.
//!
//! - **[`MetricStream`]** / **[`ReadingStream`]** — Per-metric polling
//!   task (live backend or simulated waveform) publishing
//!   [`ReadingBuffer`] snapshots through `tokio::sync::watch`.
//!
//! - **Zone engine** ([`classify`], [`aggregate`]) — Pure functions
//!   mapping values to [`Zone`]s via three configurable ranges with a
//!   fixed precedence, and reducing reading windows to a
//!   [`ZoneDistribution`].
//!
//! - **Domain model** ([`model`]) — Canonical types ([`Machine`],
//!   [`Metric`], [`Reading`], [`MetricId`]) shared across the
//!   workspace.

pub mod aggregate;
pub mod buffer;
pub mod cache;
pub mod classify;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod migrate;
pub mod model;
pub mod poll;
pub mod repo;

// ── Primary re-exports ──────────────────────────────────────────────
pub use buffer::ReadingBuffer;
pub use cache::CacheStore;
pub use classify::{classify, classify_metric};
pub use config::RuntimeConfig;
pub use coordinator::Dashboard;
pub use error::CoreError;
pub use migrate::MigrationReport;
pub use poll::{DistributionStream, Feed, MetricStream, ReadingStream, SimProfile, StreamState};
pub use repo::{NewMetric, Repository};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    IconKind,
    Machine,
    Metric,
    MetricId,
    MetricRange,
    Reading,
    Zone,
    ZoneDistribution,
};
