//! Beacon Indoor Positioning
//!
//! Turns a stream of BLE beacon observation batches into a single published
//! location state. Each batch is positioned by a weighted centroid or by
//! linear least-squares multilateration, and the result is multicast to any
//! number of observers as a latest-value update.

pub mod core;
pub mod algorithms;
pub mod scanner;
pub mod pipeline;
pub mod utils;

// Re-export commonly used types
pub use core::{BeaconId, BeaconObservation, LocationUpdate, PositionEstimate, ScanBatch};
pub use algorithms::{CalculationError, CalculatorType, PositionCalculator};
pub use scanner::{AnchorRegistry, MockScanner, ObservationSource, ScanError, Sighting};
pub use pipeline::{LocationPipeline, LocationUpdates, PipelineError};
pub use utils::{init_logging, ConfigError, PipelineConfig};
