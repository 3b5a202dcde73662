//! Transcode pipeline
//!
//! The pipeline is a straight-line loop driven by one caller thread:
//! - `MediaSource` decodes frames of both types
//! - an optional enhancer rewrites video frames
//! - `SyncScheduler` merges the two streams by timestamp
//! - `TranscodeController` encodes and muxes them
//!
//! `PipelineHealth` exposes lock-free counters an observer thread can poll.

pub mod controller;
pub mod health;
pub mod state;
pub mod sync;
pub mod transcode;

pub use controller::{TranscodeConfig, TranscodeController, TranscodeStatistics};
pub use health::{HealthAlert, HealthMonitor, HealthSummary, PipelineHealth};
pub use state::PipelineState;
pub use sync::SyncScheduler;
pub use transcode::{TranscodeReport, Transcoder};
