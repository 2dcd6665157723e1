//! Analysis settings
//!
//! The gating constants and block timing are fixed by BS.1770 and live in
//! [`crate::gating`]. What remains tunable is how true peak is oversampled,
//! how far the level matcher may attenuate a track, and whether the
//! integration work is sent to the offload worker.

use crate::error::{LoudnessError, Result};
use crate::offset::DEFAULT_OFFSET_CAP_DB;
use serde::{Deserialize, Serialize};

/// Default true peak oversampling factor
pub const DEFAULT_OVERSAMPLE_FACTOR: u32 = 4;

/// Highest rate the true peak estimator renders at (Hz)
pub const DEFAULT_MAX_OVERSAMPLE_RATE_HZ: u32 = 192_000;

/// Tunable analysis settings
///
/// Missing fields take their defaults when deserialized, so a settings file
/// only needs to name what it changes:
///
/// ```
/// use levelmatch_loudness::AnalysisSettings;
///
/// let settings = AnalysisSettings::from_json(r#"{ "offsetCapDb": 6.0 }"#).unwrap();
/// assert_eq!(settings.offset_cap_db, 6.0);
/// assert!(settings.offload_enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisSettings {
    /// Oversampling factor for true peak (1 = sample peak only)
    pub oversample_factor: u32,
    /// Ceiling for the oversampled render rate in Hz
    pub max_oversample_rate_hz: u32,
    /// Largest attenuation the level matcher applies, in dB
    pub offset_cap_db: f64,
    /// Send block integration to the background worker
    pub offload_enabled: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            oversample_factor: DEFAULT_OVERSAMPLE_FACTOR,
            max_oversample_rate_hz: DEFAULT_MAX_OVERSAMPLE_RATE_HZ,
            offset_cap_db: DEFAULT_OFFSET_CAP_DB,
            offload_enabled: true,
        }
    }
}

impl AnalysisSettings {
    /// Parse settings from JSON, filling unspecified fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|e| LoudnessError::InvalidSettings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check the settings are usable
    pub fn validate(&self) -> Result<()> {
        if self.oversample_factor == 0 {
            return Err(LoudnessError::InvalidSettings(
                "oversample factor must be at least 1".to_string(),
            ));
        }
        if self.max_oversample_rate_hz == 0 {
            return Err(LoudnessError::InvalidSettings(
                "maximum oversample rate must be positive".to_string(),
            ));
        }
        if !self.offset_cap_db.is_finite() || self.offset_cap_db < 0.0 {
            return Err(LoudnessError::InvalidSettings(format!(
                "offset cap must be a non-negative number of dB, got {}",
                self.offset_cap_db
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = AnalysisSettings::default();
        assert_eq!(settings.oversample_factor, 4);
        assert_eq!(settings.max_oversample_rate_hz, 192_000);
        assert_eq!(settings.offset_cap_db, 12.0);
        assert!(settings.offload_enabled);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings =
            AnalysisSettings::from_json(r#"{ "offloadEnabled": false, "oversampleFactor": 8 }"#)
                .unwrap();
        assert!(!settings.offload_enabled);
        assert_eq!(settings.oversample_factor, 8);
        assert_eq!(settings.offset_cap_db, 12.0);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(AnalysisSettings::from_json(r#"{ "oversampleFactor": 0 }"#).is_err());
        assert!(AnalysisSettings::from_json(r#"{ "offsetCapDb": -1.0 }"#).is_err());
        assert!(AnalysisSettings::from_json(r#"{ "maxOversampleRateHz": 0 }"#).is_err());
        assert!(AnalysisSettings::from_json("not json").is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let settings = AnalysisSettings {
            offset_cap_db: 9.5,
            ..AnalysisSettings::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("\"offsetCapDb\":9.5"));
        assert_eq!(AnalysisSettings::from_json(&json).unwrap(), settings);
    }
}
