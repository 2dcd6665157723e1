//! Level matching between tracks
//!
//! The quietest track is the reference: it plays unchanged and every louder
//! track is attenuated down to it, never boosted.
//!
//! # Offset Calculation
//!
//! - Target = lowest valid integrated loudness
//! - Offset = clamp(loudness - target, 0, cap)
//! - Tracks without a usable loudness get offset 0
//!
//! Gains are what the playback side multiplies its volume by:
//! `gain = 10^(-offset / 20)`.

use std::collections::BTreeMap;

/// Default ceiling on attenuation in dB
pub const DEFAULT_OFFSET_CAP_DB: f64 = 12.0;

/// Convert an attenuation in dB to a linear volume multiplier
pub fn linear_gain(offset_db: f64) -> f64 {
    10.0_f64.powf(-offset_db / 20.0)
}

/// Per-track attenuation in dB
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetMap<K: Ord> {
    offsets: BTreeMap<K, f64>,
    target_lufs: Option<f64>,
}

impl<K: Ord> OffsetMap<K> {
    /// Attenuation for `key`, if it was part of the calculation
    pub fn get(&self, key: &K) -> Option<f64> {
        self.offsets.get(key).copied()
    }

    /// Loudness every track was matched to; `None` when nothing was measurable
    pub fn target_lufs(&self) -> Option<f64> {
        self.target_lufs
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, f64)> {
        self.offsets.iter().map(|(key, &offset)| (key, offset))
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Linear gain for `key`
    pub fn gain(&self, key: &K) -> Option<f64> {
        self.get(key).map(linear_gain)
    }

    /// Linear gain for every track
    pub fn gains(&self) -> BTreeMap<&K, f64> {
        self.iter().map(|(key, offset)| (key, linear_gain(offset))).collect()
    }
}

/// Computes per-track offsets from integrated loudness
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetCalculator {
    cap_db: f64,
}

impl OffsetCalculator {
    /// Calculator with the default 12 dB cap
    pub fn new() -> Self {
        Self::with_cap(DEFAULT_OFFSET_CAP_DB)
    }

    /// Calculator capping attenuation at `cap_db` (negative caps become 0)
    pub fn with_cap(cap_db: f64) -> Self {
        Self {
            cap_db: cap_db.max(0.0),
        }
    }

    pub fn cap_db(&self) -> f64 {
        self.cap_db
    }

    /// Offsets for each `(key, integrated loudness)` pair
    pub fn offsets<K, I>(&self, loudness: I) -> OffsetMap<K>
    where
        K: Ord,
        I: IntoIterator<Item = (K, Option<f64>)>,
    {
        let loudness: Vec<(K, Option<f64>)> = loudness
            .into_iter()
            .map(|(key, lufs)| (key, lufs.filter(|l| l.is_finite())))
            .collect();

        let target_lufs = loudness
            .iter()
            .filter_map(|(_, lufs)| *lufs)
            .reduce(f64::min);

        let offsets = loudness
            .into_iter()
            .map(|(key, lufs)| {
                let offset = match (lufs, target_lufs) {
                    (Some(lufs), Some(target)) => (lufs - target).clamp(0.0, self.cap_db),
                    _ => 0.0,
                };
                (key, offset)
            })
            .collect();

        OffsetMap {
            offsets,
            target_lufs,
        }
    }
}

impl Default for OffsetCalculator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn louder_track_is_attenuated_to_quieter() {
        let map = OffsetCalculator::new().offsets([("A", Some(-14.0)), ("B", Some(-20.0))]);

        assert_eq!(map.target_lufs(), Some(-20.0));
        assert_eq!(map.get(&"A"), Some(6.0));
        assert_eq!(map.get(&"B"), Some(0.0));

        let gains = map.gains();
        assert!((gains[&"A"] - 0.5012).abs() < 1e-4);
        assert_eq!(gains[&"B"], 1.0);
    }

    #[test]
    fn offsets_are_capped() {
        let map = OffsetCalculator::new().offsets([("A", Some(-40.0)), ("B", Some(-10.0))]);
        assert_eq!(map.get(&"A"), Some(0.0));
        assert_eq!(map.get(&"B"), Some(12.0));

        let map = OffsetCalculator::with_cap(3.0).offsets([("A", Some(-40.0)), ("B", Some(-10.0))]);
        assert_eq!(map.get(&"B"), Some(3.0));
    }

    #[test]
    fn unmeasurable_tracks_are_left_alone() {
        let map = OffsetCalculator::new().offsets([
            ("A", Some(-10.0)),
            ("B", None),
            ("C", Some(f64::NEG_INFINITY)),
            ("D", Some(-16.0)),
        ]);
        assert_eq!(map.get(&"A"), Some(6.0));
        assert_eq!(map.get(&"B"), Some(0.0));
        assert_eq!(map.get(&"C"), Some(0.0));
        assert_eq!(map.get(&"D"), Some(0.0));
        assert_eq!(map.target_lufs(), Some(-16.0));
    }

    #[test]
    fn nothing_measurable_means_no_offsets() {
        let map = OffsetCalculator::new().offsets([("A", None), ("B", Some(f64::NAN))]);
        assert_eq!(map.target_lufs(), None);
        assert!(map.iter().all(|(_, offset)| offset == 0.0));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn empty_input() {
        let map = OffsetCalculator::new().offsets(Vec::<(u8, Option<f64>)>::new());
        assert!(map.is_empty());
        assert_eq!(map.target_lufs(), None);
    }

    #[test]
    fn negative_cap_is_zero() {
        assert_eq!(OffsetCalculator::with_cap(-5.0).cap_db(), 0.0);
    }

    #[test]
    fn linear_gain_values() {
        assert_eq!(linear_gain(0.0), 1.0);
        assert!((linear_gain(20.0) - 0.1).abs() < 1e-12);
        assert!((linear_gain(6.0) - 0.501_187).abs() < 1e-6);
    }
}
