//! Inverse-square weighted centroid of anchor coordinates
//!
//! Each anchor contributes `1 / d²` of influence, so a beacon at half the
//! distance pulls the estimate four times as hard. The result is a convex
//! combination of anchor coordinates and is defined for any non-empty set of
//! ranged anchors, which makes it the fallback when multilateration is
//! under-determined.

use crate::algorithms::{CalculationError, RangedAnchor};
use crate::core::PositionEstimate;

/// Inverse-square weight for one range
pub fn inverse_square_weight(distance: f64) -> f64 {
    1.0 / (distance * distance)
}

/// Weighted centroid over anchors with usable (finite, positive) distances.
///
/// Returns `Ok(None)` for an empty slice. A single anchor is returned
/// verbatim with its own distance as accuracy.
pub fn weighted_centroid(
    anchors: &[RangedAnchor],
    timestamp_ms: u64,
) -> Result<Option<PositionEstimate>, CalculationError> {
    match anchors {
        [] => Ok(None),
        [only] => Ok(Some(PositionEstimate {
            latitude: only.latitude,
            longitude: only.longitude,
            accuracy: only.distance,
            timestamp_ms,
        })),
        _ => {
            let mut total_weight = 0.0;
            let mut lat_sum = 0.0;
            let mut lon_sum = 0.0;
            let mut distance_sum = 0.0;

            for anchor in anchors {
                let weight = inverse_square_weight(anchor.distance);
                total_weight += weight;
                lat_sum += anchor.latitude * weight;
                lon_sum += anchor.longitude * weight;
                distance_sum += anchor.distance * weight;
            }

            if !total_weight.is_finite() || total_weight <= 0.0 {
                return Err(CalculationError::NonFiniteResult);
            }

            let estimate = PositionEstimate {
                latitude: lat_sum / total_weight,
                longitude: lon_sum / total_weight,
                accuracy: distance_sum / total_weight,
                timestamp_ms,
            };

            if estimate.is_finite() {
                Ok(Some(estimate))
            } else {
                Err(CalculationError::NonFiniteResult)
            }
        }
    }
}
