//! Observation source error types

use crate::core::BeaconId;

/// Failures reported by a beacon observation source
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScanError {
    /// The scanning backend could not be constructed
    #[error("scanner initialization failed: {reason}")]
    Initialization { reason: String },

    /// Radio scanning is not available on this device
    #[error("beacon scanning is not available")]
    NotAvailable,

    /// The running scan broke
    #[error("beacon scan failed: {reason}")]
    ScanFailed { reason: String },

    /// The source was released and cannot be used again
    #[error("observation source has been released")]
    Released,
}

/// Result type for observation source operations
pub type ScanResult<T> = Result<T, ScanError>;

/// Anchor registration failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid coordinates ({latitude}, {longitude}) for beacon {beacon}")]
    InvalidCoordinates {
        beacon: BeaconId,
        latitude: f64,
        longitude: f64,
    },

    #[error("invalid path loss exponent {0}")]
    InvalidPathLossExponent(f64),
}
