//! Instrument manifest stored as `instrument.json` in the metadata archive
//!
//! The manifest maps instrument samples onto key and velocity ranges. Every
//! field except `sample` is optional on disk; absent fields take the values
//! a sampler uses when no region opcode is present.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Metadata archive name under which the manifest is stored
pub const INSTRUMENT_MANIFEST_NAME: &str = "instrument.json";

/// Instrument description: an ordered list of regions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentManifest {
    /// Regions in playback priority order
    #[serde(default)]
    pub regions: Vec<Region>,
}

/// One key/velocity zone mapped onto a sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Sample path; its file name is the instrument name in the InstFS partition
    pub sample: String,

    /// Inclusive MIDI key range
    #[serde(default = "full_range")]
    pub key_range: [u8; 2],

    /// Inclusive MIDI velocity range
    #[serde(default = "full_range")]
    pub vel_range: [u8; 2],

    /// MIDI key at which the sample plays unpitched
    #[serde(default = "default_root_key")]
    pub root_key: u8,

    /// Fine tuning in cents
    #[serde(default)]
    pub tune: i32,

    /// Gain in decibels
    #[serde(default)]
    pub volume: i32,

    /// Loop mode opcode, for example `no_loop` or `loop_continuous`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_mode: Option<String>,

    /// Amplitude envelope
    #[serde(default)]
    pub amp_env: AmpEnvelope,
}

/// ADSR amplitude envelope; times in seconds, sustain as a 0-100 level
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AmpEnvelope {
    /// Attack time
    #[serde(default)]
    pub attack: f32,
    /// Decay time
    #[serde(default)]
    pub decay: f32,
    /// Sustain level
    #[serde(default)]
    pub sustain: f32,
    /// Release time
    #[serde(default)]
    pub release: f32,
}

fn full_range() -> [u8; 2] {
    [0, 127]
}

fn default_root_key() -> u8 {
    60
}

impl Region {
    /// Region covering every key and velocity for `sample`
    pub fn new(sample: impl Into<String>) -> Self {
        Self {
            sample: sample.into(),
            key_range: full_range(),
            vel_range: full_range(),
            root_key: default_root_key(),
            tune: 0,
            volume: 0,
            loop_mode: None,
            amp_env: AmpEnvelope::default(),
        }
    }

    /// File name component of `sample`, accepting both separator styles
    pub fn sample_name(&self) -> &str {
        self.sample
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(self.sample.as_str())
    }

    /// Whether this region plays for `key` at `velocity`
    pub fn matches(&self, key: u8, velocity: u8) -> bool {
        (self.key_range[0]..=self.key_range[1]).contains(&key)
            && (self.vel_range[0]..=self.vel_range[1]).contains(&velocity)
    }
}

impl InstrumentManifest {
    /// Decode a manifest from JSON bytes
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Encode the manifest as pretty-printed JSON
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// First region that plays for `key` at `velocity`
    pub fn region_for(&self, key: u8, velocity: u8) -> Option<&Region> {
        self.regions.iter().find(|r| r.matches(key, velocity))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_for_missing_fields() {
        let json = br#"{"regions":[{"sample":"samples/Piano C4.wav"}]}"#;
        let manifest = InstrumentManifest::from_slice(json).expect("parse");

        assert_eq!(manifest.regions, vec![Region::new("samples/Piano C4.wav")]);
    }

    #[test]
    fn test_full_region() {
        let json = br#"{
            "regions": [{
                "sample": "kick.wav",
                "key_range": [36, 36],
                "vel_range": [1, 127],
                "root_key": 36,
                "tune": -12,
                "volume": 3,
                "loop_mode": "one_shot",
                "amp_env": {"attack": 0.001, "decay": 0.2, "sustain": 0.0, "release": 0.05}
            }]
        }"#;
        let manifest = InstrumentManifest::from_slice(json).expect("parse");
        let region = &manifest.regions[0];

        assert_eq!(region.key_range, [36, 36]);
        assert_eq!(region.tune, -12);
        assert_eq!(region.loop_mode.as_deref(), Some("one_shot"));
        assert_eq!(region.amp_env.decay, 0.2);
    }

    #[test]
    fn test_sample_name_strips_directories() {
        assert_eq!(Region::new("a/b/kick.wav").sample_name(), "kick.wav");
        assert_eq!(Region::new(r"a\b\snare.wav").sample_name(), "snare.wav");
        assert_eq!(Region::new("hat.wav").sample_name(), "hat.wav");
    }

    #[test]
    fn test_region_for_picks_first_match() {
        let mut low = Region::new("low.wav");
        low.key_range = [0, 59];
        let mut high = Region::new("high.wav");
        high.key_range = [60, 127];
        let manifest = InstrumentManifest {
            regions: vec![low, high],
        };

        assert_eq!(
            manifest.region_for(40, 100).map(Region::sample_name),
            Some("low.wav")
        );
        assert_eq!(
            manifest.region_for(72, 100).map(Region::sample_name),
            Some("high.wav")
        );
    }

    #[test]
    fn test_rejects_missing_sample() {
        let json = br#"{"regions":[{"root_key":60}]}"#;
        assert!(InstrumentManifest::from_slice(json).is_err());
    }
}
