//! Linear least-squares multilateration
//!
//! Anchors are projected into a local east/north tangent plane around their
//! mean position. Subtracting the first circle equation
//! `(x-x₀)² + (y-y₀)² = d₀²` from every other one cancels the quadratic terms
//! and leaves an over-determined linear system `A·p = b`, solved through the
//! normal equations `(AᵀA)·p = Aᵀb`.

use crate::algorithms::{CalculationError, RangedAnchor};
use crate::core::{PositionEstimate, EARTH_RADIUS_M, SINGULARITY_EPSILON};
use nalgebra::{Matrix2, Vector2};

/// Least-squares multilateration solver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Multilateration {
    /// Relative threshold on `det(AᵀA) / trace(AᵀA)²` below which geometry is rejected
    pub singularity_epsilon: f64,
}

impl Default for Multilateration {
    fn default() -> Self {
        Self {
            singularity_epsilon: SINGULARITY_EPSILON,
        }
    }
}

/// Reference point of the local tangent plane
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalFrame {
    pub latitude: f64,
    pub longitude: f64,
}

impl LocalFrame {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Frame centred on the mean anchor position.
    ///
    /// Longitudes are averaged as offsets from the first anchor so that a
    /// cluster straddling ±180° is centred inside the cluster.
    pub fn centred_on(anchors: &[RangedAnchor]) -> Self {
        let Some(first) = anchors.first() else {
            return Self::new(0.0, 0.0);
        };
        let n = anchors.len() as f64;
        let latitude = anchors.iter().map(|a| a.latitude).sum::<f64>() / n;
        let lon_offset = anchors
            .iter()
            .map(|a| wrap_longitude(a.longitude - first.longitude))
            .sum::<f64>()
            / n;
        Self {
            latitude,
            longitude: wrap_longitude(first.longitude + lon_offset),
        }
    }

    /// Geodetic degrees to local (east, north) meters
    pub fn to_local(&self, latitude: f64, longitude: f64) -> Vector2<f64> {
        let lat_diff = (latitude - self.latitude).to_radians();
        let lon_diff = wrap_longitude(longitude - self.longitude).to_radians();
        let ref_lat_rad = self.latitude.to_radians();

        Vector2::new(
            EARTH_RADIUS_M * lon_diff * ref_lat_rad.cos(),
            EARTH_RADIUS_M * lat_diff,
        )
    }

    /// Local (east, north) meters back to geodetic degrees
    pub fn to_geodetic(&self, local: Vector2<f64>) -> (f64, f64) {
        let ref_lat_rad = self.latitude.to_radians();
        let lat_diff = local.y / EARTH_RADIUS_M;
        let lon_diff = local.x / (EARTH_RADIUS_M * ref_lat_rad.cos());

        (
            self.latitude + lat_diff.to_degrees(),
            wrap_longitude(self.longitude + lon_diff.to_degrees()),
        )
    }
}

/// Bring a longitude (or longitude difference) into [-180, 180]
fn wrap_longitude(degrees: f64) -> f64 {
    if (-180.0..=180.0).contains(&degrees) {
        degrees
    } else {
        (degrees + 180.0).rem_euclid(360.0) - 180.0
    }
}

impl Multilateration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Solve for the best-fit position. Requires at least three anchors.
    pub fn solve(
        &self,
        anchors: &[RangedAnchor],
        timestamp_ms: u64,
    ) -> Result<PositionEstimate, CalculationError> {
        if anchors.len() < 3 {
            return Err(CalculationError::DegenerateGeometry { determinant: 0.0 });
        }

        let frame = LocalFrame::centred_on(anchors);
        let points: Vec<Vector2<f64>> = anchors
            .iter()
            .map(|a| frame.to_local(a.latitude, a.longitude))
            .collect();

        let solution = self.least_squares(&points, anchors)?;
        let (latitude, longitude) = frame.to_geodetic(solution);

        let estimate = PositionEstimate {
            latitude,
            longitude,
            accuracy: rms_residual(&points, anchors, solution),
            timestamp_ms,
        };

        if estimate.is_finite() {
            Ok(estimate)
        } else {
            Err(CalculationError::NonFiniteResult)
        }
    }

    fn least_squares(
        &self,
        points: &[Vector2<f64>],
        anchors: &[RangedAnchor],
    ) -> Result<Vector2<f64>, CalculationError> {
        let p0 = points[0];
        let d0 = anchors[0].distance;

        let mut ata = Matrix2::zeros();
        let mut atb = Vector2::zeros();

        for (pi, anchor) in points.iter().zip(anchors).skip(1) {
            let row = 2.0 * (pi - p0);
            let b = d0.powi(2) - anchor.distance.powi(2) + pi.norm_squared() - p0.norm_squared();

            ata += row * row.transpose();
            atb += row * b;
        }

        let determinant = ata.determinant();
        let trace = ata.trace();
        if !determinant.is_finite() || determinant <= self.singularity_epsilon * trace * trace {
            return Err(CalculationError::DegenerateGeometry { determinant });
        }

        let inverse = ata
            .try_inverse()
            .ok_or(CalculationError::DegenerateGeometry { determinant })?;

        Ok(inverse * atb)
    }
}

/// Root-mean-square range residual at `solution`
fn rms_residual(points: &[Vector2<f64>], anchors: &[RangedAnchor], solution: Vector2<f64>) -> f64 {
    let sum_sq: f64 = points
        .iter()
        .zip(anchors)
        .map(|(p, a)| ((solution - p).norm() - a.distance).powi(2))
        .sum();
    (sum_sq / points.len() as f64).sqrt()
}
