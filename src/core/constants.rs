//! Geodesy constants and numeric thresholds

/// Mean Earth radius used for local tangent plane projection (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Minimum usable observations for a multilateration fix
pub const MIN_MULTILATERATION_ANCHORS: usize = 3;

/// Relative determinant threshold below which the normal matrix is treated as singular
pub const SINGULARITY_EPSILON: f64 = 1e-10;

/// Default log-distance path loss exponent (free space)
pub const DEFAULT_PATH_LOSS_EXPONENT: f64 = 2.0;
