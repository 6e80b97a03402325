//! # Pitch Detection Module
//!
//! Monophonic fundamental-frequency estimation for the fast analysis path.
//!
//! ## Features
//! - YIN difference function and cumulative mean normalisation
//! - Absolute-threshold search that walks down to the local minimum
//! - Parabolic interpolation for sub-sample accuracy
//! - Lag search bounded by a configurable frequency range

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Search bounds and threshold for [`detect_pitch_yin`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YinConfig {
    /// Lowest frequency considered, in Hz.
    pub min_frequency: f32,
    /// Highest frequency considered, in Hz.
    pub max_frequency: f32,
    /// Normalised difference below which a lag counts as periodic.
    pub threshold: f32,
}

impl Default for YinConfig {
    fn default() -> Self {
        Self { min_frequency: 50.0, max_frequency: 880.0, threshold: 0.1 }
    }
}

impl YinConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_frequency > 0.0 && self.max_frequency > self.min_frequency {
            Ok(())
        } else {
            Err(ConfigError::InvalidFrequencyRange { min: self.min_frequency, max: self.max_frequency })
        }
    }

    /// Lag range `(min_lag, max_lag)` in samples for a given sample rate.
    pub fn lag_range(&self, sample_rate: u32) -> (usize, usize) {
        let rate = sample_rate as f32;
        let min_lag = (rate / self.max_frequency).round() as usize;
        let max_lag = (rate / self.min_frequency).round() as usize;
        (min_lag.max(1), max_lag)
    }
}

/// Estimates the fundamental frequency of `signal` with the YIN algorithm.
///
/// # Arguments
/// * `signal` - Time-domain analysis window
/// * `sample_rate` - Sample rate in Hz
/// * `config` - Frequency bounds and absolute threshold
///
/// # Returns
/// * `Some(frequency)` - Estimated fundamental in Hz
/// * `None` - No lag dipped below the threshold (silence, noise, or a window
///   too short for the requested range)
pub fn detect_pitch_yin(signal: &[f32], sample_rate: u32, config: &YinConfig) -> Option<f32> {
    let (min_lag, max_lag) = config.lag_range(sample_rate);
    // Lags at or beyond the window length have no overlapping samples.
    let max_lag = max_lag.min(signal.len().saturating_sub(1));
    if min_lag + 1 > max_lag {
        return None;
    }

    let cmnd = cumulative_mean_normalized_difference(signal, max_lag);

    // --- Absolute threshold, then slide down to the local minimum ---
    let mut tau = (min_lag..=max_lag).find(|&lag| cmnd[lag] < config.threshold)?;
    while tau + 1 <= max_lag && cmnd[tau + 1] < cmnd[tau] {
        tau += 1;
    }

    // --- Parabolic interpolation for better precision ---
    let x0 = if tau > 1 { tau - 1 } else { tau };
    let x2 = if tau + 1 <= max_lag { tau + 1 } else { tau };
    let s0 = cmnd[x0];
    let s1 = cmnd[tau];
    let s2 = cmnd[x2];
    let denominator = 2.0 * (2.0 * s1 - s2 - s0);
    let refined_tau = if denominator.abs() > f32::EPSILON {
        tau as f32 + (s2 - s0) / denominator
    } else {
        tau as f32
    };

    let frequency = sample_rate as f32 / refined_tau;
    if frequency.is_finite() && frequency > 0.0 {
        Some(frequency)
    } else {
        None
    }
}

/// YIN steps 1 and 2: `d(tau)` over `1..=max_lag`, normalised by its running mean.
///
/// Index 0 is fixed at 1.0. A running sum of zero (digital silence) also yields 1.0.
fn cumulative_mean_normalized_difference(signal: &[f32], max_lag: usize) -> Vec<f32> {
    let mut buffer = vec![0.0_f32; max_lag + 1];
    for tau in 1..=max_lag {
        buffer[tau] = signal[..signal.len() - tau]
            .iter()
            .zip(&signal[tau..])
            .map(|(a, b)| {
                let delta = a - b;
                delta * delta
            })
            .sum();
    }

    buffer[0] = 1.0;
    let mut running_sum = 0.0;
    for tau in 1..=max_lag {
        running_sum += buffer[tau];
        if running_sum > 0.0 {
            buffer[tau] *= tau as f32 / running_sum;
        } else {
            buffer[tau] = 1.0;
        }
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(frequency: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn detects_220_hz_within_one_percent() {
        let signal = sine(220.0, 44_100, 2048);
        let freq = detect_pitch_yin(&signal, 44_100, &YinConfig::default()).unwrap();
        assert!((freq - 220.0).abs() < 2.2, "got {freq}");
    }

    #[test]
    fn detects_across_the_range() {
        for target in [82.41_f32, 146.8, 440.0, 659.3] {
            let signal = sine(target, 44_100, 4096);
            let freq = detect_pitch_yin(&signal, 44_100, &YinConfig::default()).unwrap();
            assert!((freq - target).abs() / target < 0.01, "{target}: got {freq}");
        }
    }

    #[test]
    fn silence_has_no_estimate() {
        let signal = vec![0.0; 2048];
        assert_eq!(detect_pitch_yin(&signal, 44_100, &YinConfig::default()), None);
    }

    #[test]
    fn short_window_has_no_estimate() {
        let signal = sine(220.0, 44_100, 40);
        assert_eq!(detect_pitch_yin(&signal, 44_100, &YinConfig::default()), None);
    }

    #[test]
    fn lag_range_rounds() {
        let (min_lag, max_lag) = YinConfig::default().lag_range(44_100);
        assert_eq!(min_lag, 50);
        assert_eq!(max_lag, 882);
    }

    #[test]
    fn is_deterministic() {
        let signal = sine(311.1, 48_000, 3000);
        let config = YinConfig::default();
        assert_eq!(
            detect_pitch_yin(&signal, 48_000, &config),
            detect_pitch_yin(&signal, 48_000, &config)
        );
    }
}
