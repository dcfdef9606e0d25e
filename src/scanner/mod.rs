//! Beacon observation source abstraction
//!
//! The radio scanning subsystem is an external collaborator. This module
//! defines the boundary the location pipeline consumes, an anchor registry
//! for attaching surveyed coordinates to sightings, and a mock source used by
//! tests and the replay binary.

pub mod error;
pub mod mock;
pub mod registry;
pub mod source;

pub use error::{RegistryError, ScanError, ScanResult};
pub use mock::{MockScanner, ScannerStatus};
pub use registry::{AnchorEntry, AnchorRegistry, PathLossModel, Sighting};
pub use source::{BatchStream, ObservationSource};
