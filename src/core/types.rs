//! Core data types for the positioning system

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of one physical anchor beacon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BeaconId {
    /// 128-bit group identifier shared by a deployment
    pub group: Uuid,
    pub major: u16,
    pub minor: u16,
}

impl BeaconId {
    pub fn new(group: Uuid, major: u16, minor: u16) -> Self {
        Self { group, major, minor }
    }
}

impl fmt::Display for BeaconId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.major, self.minor)
    }
}

/// One detected beacon at one scan moment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconObservation {
    pub id: BeaconId,
    /// Received signal strength (dBm)
    pub rssi: i16,
    /// Estimated distance (meters), `None` when the signal model could not resolve it
    pub distance: Option<f64>,
    /// Known anchor latitude (degrees, WGS84)
    pub latitude: f64,
    /// Known anchor longitude (degrees, WGS84)
    pub longitude: f64,
}

impl BeaconObservation {
    pub fn new(id: BeaconId, rssi: i16, distance: Option<f64>, latitude: f64, longitude: f64) -> Self {
        Self {
            id,
            rssi,
            distance,
            latitude,
            longitude,
        }
    }

    /// Distance usable as a weighting input: present, finite and strictly positive.
    pub fn usable_distance(&self) -> Option<f64> {
        self.distance.filter(|d| d.is_finite() && *d > 0.0)
    }

    /// Whether the anchor coordinates are finite and inside WGS84 bounds.
    pub fn has_valid_anchor(&self) -> bool {
        is_valid_coordinate(self.latitude, self.longitude)
    }
}

/// Batch of observations emitted by one scan cycle
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanBatch {
    /// Capture time (milliseconds since epoch)
    pub timestamp_ms: u64,
    pub beacons: Vec<BeaconObservation>,
}

impl ScanBatch {
    pub fn new(timestamp_ms: u64, beacons: Vec<BeaconObservation>) -> Self {
        Self { timestamp_ms, beacons }
    }

    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }

    pub fn len(&self) -> usize {
        self.beacons.len()
    }
}

/// Computed device location
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    pub latitude: f64,
    pub longitude: f64,
    /// Confidence radius (meters), not a hard bound
    pub accuracy: f64,
    /// Capture time of the batch this estimate was computed from
    pub timestamp_ms: u64,
}

impl PositionEstimate {
    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite() && self.accuracy.is_finite()
    }
}

/// Unit published to location observers
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub position: Option<PositionEstimate>,
    /// The batch that produced (or failed to produce) this update
    pub beacons: Vec<BeaconObservation>,
    /// Set only when the calculation step or the upstream source failed
    pub error: Option<String>,
}

impl LocationUpdate {
    /// Value published before the first batch arrives
    pub fn initial() -> Self {
        Self::default()
    }

    pub fn computed(position: Option<PositionEstimate>, beacons: Vec<BeaconObservation>) -> Self {
        Self {
            position,
            beacons,
            error: None,
        }
    }

    pub fn failed(beacons: Vec<BeaconObservation>, error: impl Into<String>) -> Self {
        Self {
            position: None,
            beacons,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

pub fn is_valid_coordinate(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && latitude.abs() <= 90.0
        && longitude.abs() <= 180.0
}
