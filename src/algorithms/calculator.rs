//! Position calculator: validation, strategy selection and fallback

use crate::algorithms::multilateration::Multilateration;
use crate::algorithms::weighted_centroid::weighted_centroid;
use crate::algorithms::RangedAnchor;
use crate::core::{BeaconId, PositionEstimate, ScanBatch, MIN_MULTILATERATION_ANCHORS};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Numeric failure inside one calculation cycle
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalculationError {
    #[error("invalid distance {distance} reported for beacon {beacon}")]
    InvalidDistance { beacon: BeaconId, distance: f64 },

    #[error("invalid anchor coordinates for beacon {beacon}")]
    InvalidAnchor { beacon: BeaconId },

    #[error("degenerate anchor geometry (normal matrix determinant {determinant:e})")]
    DegenerateGeometry { determinant: f64 },

    #[error("calculation produced a non-finite result")]
    NonFiniteResult,

    #[error("calculation panicked: {message}")]
    Panicked { message: String },
}

/// Strategy chosen once per pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculatorType {
    /// Inverse-square weighted centroid only
    WeightedCentroid,
    /// Least-squares multilateration, weighted centroid below the anchor threshold
    #[default]
    Multilateration,
}

/// Stateless position calculator over a closed set of strategies
#[derive(Debug, Clone, PartialEq)]
pub enum PositionCalculator {
    WeightedCentroid,
    Multilateration {
        solver: Multilateration,
        min_anchors: usize,
    },
}

impl Default for PositionCalculator {
    fn default() -> Self {
        Self::new(CalculatorType::default())
    }
}

impl PositionCalculator {
    pub fn new(kind: CalculatorType) -> Self {
        match kind {
            CalculatorType::WeightedCentroid => PositionCalculator::WeightedCentroid,
            CalculatorType::Multilateration => PositionCalculator::Multilateration {
                solver: Multilateration::default(),
                min_anchors: MIN_MULTILATERATION_ANCHORS,
            },
        }
    }

    /// Multilateration with a custom fallback threshold (clamped to at least three)
    pub fn multilateration(min_anchors: usize) -> Self {
        PositionCalculator::Multilateration {
            solver: Multilateration::default(),
            min_anchors: min_anchors.max(MIN_MULTILATERATION_ANCHORS),
        }
    }

    pub fn kind(&self) -> CalculatorType {
        match self {
            PositionCalculator::WeightedCentroid => CalculatorType::WeightedCentroid,
            PositionCalculator::Multilateration { .. } => CalculatorType::Multilateration,
        }
    }

    /// Estimate the device position from one scan batch.
    ///
    /// `Ok(None)` means there was nothing to compute (no beacon with a usable
    /// distance). `Err` is a genuine calculation failure.
    pub fn compute(&self, batch: &ScanBatch) -> Result<Option<PositionEstimate>, CalculationError> {
        let anchors = ranged_anchors(batch)?;
        trace!(
            beacons = batch.len(),
            usable = anchors.len(),
            "Computing position"
        );

        match self {
            PositionCalculator::WeightedCentroid => weighted_centroid(&anchors, batch.timestamp_ms),
            PositionCalculator::Multilateration { solver, min_anchors } => {
                if anchors.len() < *min_anchors {
                    debug!(
                        usable = anchors.len(),
                        required = *min_anchors,
                        "Too few ranged anchors for multilateration, using weighted centroid"
                    );
                    weighted_centroid(&anchors, batch.timestamp_ms)
                } else {
                    solver.solve(&anchors, batch.timestamp_ms).map(Some)
                }
            }
        }
    }
}

/// Validate a batch and keep the observations that can take part in weighting.
///
/// A present distance must be finite and non-negative. Zero and unknown
/// distances are dropped; the anchors of the remaining observations must be
/// valid coordinates.
pub fn ranged_anchors(batch: &ScanBatch) -> Result<Vec<RangedAnchor>, CalculationError> {
    let mut anchors = Vec::with_capacity(batch.len());

    for beacon in &batch.beacons {
        if let Some(distance) = beacon.distance {
            if !distance.is_finite() || distance < 0.0 {
                return Err(CalculationError::InvalidDistance {
                    beacon: beacon.id,
                    distance,
                });
            }
        }

        let Some(distance) = beacon.usable_distance() else {
            continue;
        };

        if !beacon.has_valid_anchor() {
            return Err(CalculationError::InvalidAnchor { beacon: beacon.id });
        }

        anchors.push(RangedAnchor {
            id: beacon.id,
            latitude: beacon.latitude,
            longitude: beacon.longitude,
            distance,
        });
    }

    Ok(anchors)
}
