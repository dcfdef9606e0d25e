use crate::algorithms::{CalculatorType, PositionCalculator};
use crate::core::{is_valid_coordinate, BeaconId, DEFAULT_PATH_LOSS_EXPONENT, MIN_MULTILATERATION_ANCHORS};
use crate::scanner::{AnchorEntry, AnchorRegistry, PathLossModel, RegistryError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

/// Pipeline configuration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Position calculation strategy, fixed for the lifetime of a pipeline
    pub calculator: CalculatorType,
    /// Usable observations needed before multilateration replaces the weighted centroid
    pub min_multilateration_anchors: usize,
    /// Log-distance path loss exponent for RSSI ranging
    pub path_loss_exponent: f64,
    /// Default log filter when RUST_LOG is not set
    pub log_level: String,
    /// Surveyed anchors
    pub anchors: Vec<AnchorConfig>,
}

/// Individual anchor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorConfig {
    pub uuid: Uuid,
    pub major: u16,
    pub minor: u16,
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// Calibrated RSSI at 1 m (dBm)
    #[serde(default)]
    pub measured_power: Option<i16>,
    /// Whether this anchor takes part in positioning
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl AnchorConfig {
    pub fn id(&self) -> BeaconId {
        BeaconId::new(self.uuid, self.major, self.minor)
    }

    pub fn entry(&self) -> AnchorEntry {
        AnchorEntry {
            latitude: self.latitude,
            longitude: self.longitude,
            measured_power: self.measured_power,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid {parameter} = {value}: {reason}")]
    InvalidParameter {
        parameter: String,
        value: String,
        reason: String,
    },

    #[error("anchor {0} is configured more than once")]
    DuplicateAnchor(BeaconId),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            calculator: CalculatorType::default(),
            min_multilateration_anchors: MIN_MULTILATERATION_ANCHORS,
            path_loss_exponent: DEFAULT_PATH_LOSS_EXPONENT,
            log_level: "info".to_string(),
            anchors: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path_str.clone(),
            source,
        })?;

        let config = Self::from_json_str(&content)?;
        debug!(path = %path_str, anchors = config.anchors.len(), "Loaded pipeline configuration");
        Ok(config)
    }

    /// Parse and validate configuration from JSON text
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_multilateration_anchors < MIN_MULTILATERATION_ANCHORS {
            return Err(ConfigError::InvalidParameter {
                parameter: "min_multilateration_anchors".to_string(),
                value: self.min_multilateration_anchors.to_string(),
                reason: format!(
                    "Multilateration is under-determined below {} anchors",
                    MIN_MULTILATERATION_ANCHORS
                ),
            });
        }

        if !self.path_loss_exponent.is_finite() || self.path_loss_exponent <= 0.0 {
            return Err(ConfigError::InvalidParameter {
                parameter: "path_loss_exponent".to_string(),
                value: self.path_loss_exponent.to_string(),
                reason: "Path loss exponent must be positive".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for anchor in &self.anchors {
            if !is_valid_coordinate(anchor.latitude, anchor.longitude) {
                return Err(ConfigError::InvalidParameter {
                    parameter: format!("anchor {} position", anchor.id()),
                    value: format!("({}, {})", anchor.latitude, anchor.longitude),
                    reason: "Latitude must be within ±90° and longitude within ±180°".to_string(),
                });
            }
            if !seen.insert(anchor.id()) {
                return Err(ConfigError::DuplicateAnchor(anchor.id()));
            }
        }

        Ok(())
    }

    /// Calculator for this configuration
    pub fn calculator(&self) -> PositionCalculator {
        match self.calculator {
            CalculatorType::WeightedCentroid => PositionCalculator::new(CalculatorType::WeightedCentroid),
            CalculatorType::Multilateration => {
                PositionCalculator::multilateration(self.min_multilateration_anchors)
            }
        }
    }

    /// Registry of the enabled anchors
    pub fn anchor_registry(&self) -> Result<AnchorRegistry, ConfigError> {
        let mut registry = AnchorRegistry::new(PathLossModel::new(self.path_loss_exponent)?);
        for anchor in self.anchors.iter().filter(|a| a.enabled) {
            registry.register(anchor.id(), anchor.entry())?;
        }
        Ok(registry)
    }
}
