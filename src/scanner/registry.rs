//! Anchor registry: beacon identity to known anchor coordinates
//!
//! Scanning reports only identity, signal strength and (sometimes) a range.
//! The registry attaches the surveyed anchor position, and fills in a missing
//! range from a log-distance path loss model when the anchor is calibrated.

use crate::core::{is_valid_coordinate, BeaconId, BeaconObservation, ScanBatch, DEFAULT_PATH_LOSS_EXPONENT};
use crate::scanner::RegistryError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Log-distance path loss model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathLossModel {
    /// Path loss exponent (2.0 in free space, higher indoors)
    pub exponent: f64,
}

impl Default for PathLossModel {
    fn default() -> Self {
        Self {
            exponent: DEFAULT_PATH_LOSS_EXPONENT,
        }
    }
}

impl PathLossModel {
    pub fn new(exponent: f64) -> Result<Self, RegistryError> {
        if !exponent.is_finite() || exponent <= 0.0 {
            return Err(RegistryError::InvalidPathLossExponent(exponent));
        }
        Ok(Self { exponent })
    }

    /// Range estimate from `measured_power` (RSSI at 1 m) and a received RSSI.
    ///
    /// `d = 10^((measured_power - rssi) / (10 n))`. Non-negative RSSI readings
    /// are not valid dBm measurements and yield `None`.
    pub fn distance(&self, measured_power: i16, rssi: i16) -> Option<f64> {
        if rssi >= 0 {
            return None;
        }
        let exponent = f64::from(i32::from(measured_power) - i32::from(rssi)) / (10.0 * self.exponent);
        Some(10f64.powf(exponent)).filter(|d| d.is_finite())
    }
}

/// Surveyed anchor entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorEntry {
    pub latitude: f64,
    pub longitude: f64,
    /// Calibrated RSSI at 1 m (dBm)
    pub measured_power: Option<i16>,
}

/// Raw sighting as reported by the radio layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    pub id: BeaconId,
    pub rssi: i16,
    #[serde(default)]
    pub distance: Option<f64>,
}

/// Registry of known anchors
#[derive(Debug, Clone, Default)]
pub struct AnchorRegistry {
    anchors: HashMap<BeaconId, AnchorEntry>,
    model: PathLossModel,
}

impl AnchorRegistry {
    pub fn new(model: PathLossModel) -> Self {
        Self {
            anchors: HashMap::new(),
            model,
        }
    }

    /// Register or replace an anchor. Coordinates must be finite and within WGS84 bounds.
    pub fn register(&mut self, id: BeaconId, entry: AnchorEntry) -> Result<Option<AnchorEntry>, RegistryError> {
        if !is_valid_coordinate(entry.latitude, entry.longitude) {
            return Err(RegistryError::InvalidCoordinates {
                beacon: id,
                latitude: entry.latitude,
                longitude: entry.longitude,
            });
        }
        debug!(beacon = %id, latitude = entry.latitude, longitude = entry.longitude, "Registered anchor");
        Ok(self.anchors.insert(id, entry))
    }

    pub fn get(&self, id: &BeaconId) -> Option<&AnchorEntry> {
        self.anchors.get(id)
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn model(&self) -> PathLossModel {
        self.model
    }

    /// Attach anchor coordinates to a sighting. Unregistered beacons yield `None`.
    pub fn resolve(&self, sighting: &Sighting) -> Option<BeaconObservation> {
        let entry = self.anchors.get(&sighting.id)?;
        let distance = sighting.distance.or_else(|| {
            entry
                .measured_power
                .and_then(|power| self.model.distance(power, sighting.rssi))
        });

        Some(BeaconObservation::new(
            sighting.id,
            sighting.rssi,
            distance,
            entry.latitude,
            entry.longitude,
        ))
    }

    /// Resolve a scan cycle worth of sightings into a batch
    pub fn resolve_batch(&self, timestamp_ms: u64, sightings: &[Sighting]) -> ScanBatch {
        let beacons: Vec<BeaconObservation> = sightings.iter().filter_map(|s| self.resolve(s)).collect();

        let unknown = sightings.len() - beacons.len();
        if unknown > 0 {
            trace!(unknown, "Dropped sightings of unregistered beacons");
        }

        ScanBatch::new(timestamp_ms, beacons)
    }
}
