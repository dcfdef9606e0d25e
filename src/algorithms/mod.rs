//! Core positioning algorithms

pub mod calculator;
pub mod multilateration;
pub mod weighted_centroid;

pub use calculator::{CalculationError, CalculatorType, PositionCalculator};
pub use multilateration::{LocalFrame, Multilateration};
pub use weighted_centroid::{inverse_square_weight, weighted_centroid};

use crate::core::BeaconId;

/// Anchor coordinates paired with a usable range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangedAnchor {
    pub id: BeaconId,
    pub latitude: f64,
    pub longitude: f64,
    /// Finite, strictly positive distance (meters)
    pub distance: f64,
}
