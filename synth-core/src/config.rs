//! # Engine Configuration
//!
//! Every tunable constant of the engine lives in [`EngineConfig`]. Defaults
//! match the browser keyboard's behaviour; a JSON file can override any
//! subset of fields.

use crate::error::ConfigError;
use crate::pitch::YinConfig;
use crate::voice::WaveShape;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Preferred capture sample rate in Hz.
    pub sample_rate: u32,
    pub yin: YinConfig,
    /// Samples in the fast-path analysis window.
    pub analysis_window: usize,
    pub pitch_poll_ms: u64,
    pub level_poll_ms: u64,
    /// Histogram decay per update in standard (monophonic) mode.
    pub fast_decay: f32,
    /// Histogram decay per update in high accuracy (polyphonic) mode.
    pub accurate_decay: f32,
    /// Rolling capture buffer length.
    pub capture_seconds: u32,
    pub inference_interval_ms: u64,
    /// Audio that must accumulate before a periodic inference is worthwhile.
    pub inference_min_seconds: u32,
    /// Rate the neural model expects its input at.
    pub model_sample_rate: u32,
    pub release_ms: u64,
    /// Voice gain as a fraction of full scale.
    pub voice_gain: f32,
    pub wave_shape: WaveShape,
    /// Level meter dB range.
    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            yin: YinConfig::default(),
            analysis_window: 4096,
            pitch_poll_ms: 100,
            level_poll_ms: 67,
            fast_decay: 0.97,
            accurate_decay: 1.0,
            capture_seconds: 10,
            inference_interval_ms: 2000,
            inference_min_seconds: 4,
            model_sample_rate: 22_050,
            release_ms: 100,
            voice_gain: 0.1,
            wave_shape: WaveShape::Sine,
            min_decibels: -90.0,
            max_decibels: -10.0,
        }
    }
}

impl EngineConfig {
    /// Loads a configuration file, falling back to defaults for missing fields.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: EngineConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_decay(self.fast_decay)?;
        check_decay(self.accurate_decay)?;
        self.yin.validate()?;
        let positive = [
            ("sample_rate", self.sample_rate as u64),
            ("analysis_window", self.analysis_window as u64),
            ("capture_seconds", self.capture_seconds as u64),
            ("model_sample_rate", self.model_sample_rate as u64),
            ("pitch_poll_ms", self.pitch_poll_ms),
            ("level_poll_ms", self.level_poll_ms),
            ("inference_interval_ms", self.inference_interval_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::NotPositive { name });
            }
        }
        if self.max_decibels <= self.min_decibels {
            return Err(ConfigError::NotPositive { name: "max_decibels - min_decibels" });
        }
        Ok(())
    }

    /// Capacity of the rolling capture buffer at `sample_rate`.
    pub fn capture_capacity(&self, sample_rate: u32) -> usize {
        sample_rate as usize * self.capture_seconds as usize
    }

    pub fn release_window(&self) -> Duration {
        Duration::from_millis(self.release_ms)
    }
}

pub(crate) fn check_decay(factor: f32) -> Result<(), ConfigError> {
    if factor > 0.0 && factor <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidDecayFactor(factor))
    }
}
