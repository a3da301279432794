use serde::{Deserialize, Serialize};

use crate::color::{parse_hex, Marker, Rgb, OKABE_ITO};
use crate::data::detector::DetectorTable;
use crate::data::segment::Interpolation;
use crate::error::ConfigError;

/// Lookup tables and policies injected into the engine.
///
/// Every field has a default, so a configuration file only needs the
/// entries it changes:
///
/// ```json
/// { "fov_interpolation": "nearest", "markers": ["o", "s"] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub detectors: DetectorTable,
    /// Base colour palette as `#RRGGBB`.
    pub colors: Vec<String>,
    pub markers: Vec<Marker>,
    pub fov_interpolation: Interpolation,
    /// Isocentre distance in cm; jaw settings are rescaled to it.
    pub reference_distance_cm: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            detectors: DetectorTable::ptw(),
            colors: OKABE_ITO.iter().map(|c| c.to_string()).collect(),
            markers: Marker::ALL.to_vec(),
            fov_interpolation: Interpolation::Linear,
            reference_distance_cm: 100.0,
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.colors.is_empty() {
            return Err(ConfigError::EmptyPalette("colour"));
        }
        if self.markers.is_empty() {
            return Err(ConfigError::EmptyPalette("marker"));
        }
        if let Some(bad) = self.colors.iter().find(|c| parse_hex(c).is_none()) {
            return Err(ConfigError::BadColor(bad.clone()));
        }
        if !(self.reference_distance_cm > 0.0 && self.reference_distance_cm.is_finite()) {
            return Err(ConfigError::BadReferenceDistance(self.reference_distance_cm));
        }
        Ok(())
    }

    /// Base palette; entries that are not hex colours are skipped.
    pub fn palette(&self) -> Vec<Rgb> {
        self.colors.iter().filter_map(|c| parse_hex(c)).collect()
    }
}
