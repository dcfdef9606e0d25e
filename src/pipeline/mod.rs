//! Reactive location pipeline
//!
//! Bridges the externally driven observation stream to a single published,
//! multicast, latest-value location state with per-cycle fault isolation.

pub mod error;
pub mod manager;
pub mod updates;

pub use error::PipelineError;
pub use manager::LocationPipeline;
pub use updates::LocationUpdates;
