//! Async client for the machdash telemetry backend.
//!
//! Thin HTTP layer over the backend's read-only surface: machine and metric
//! catalogs, latest-reading polls, bounded history fetches, and the optional
//! distribution long-poll. `machdash-core` owns all caching, classification,
//! and lifecycle logic — this crate only speaks wire format.

pub mod client;
pub mod error;
pub mod models;
pub mod transport;

pub use client::TelemetryClient;
pub use error::Error;
pub use models::{DistributionDto, LatestReadingDto, MachineDto, MetricDefDto, ReadingPointDto};
pub use transport::TransportConfig;
