//! # Spectrum & Level Metering
//!
//! Turns the analysis window into the 0..1 input level shown by the UI.
//! The window is DC-corrected and Hann-weighted, transformed with RustFFT,
//! mapped to decibels and quantised to byte bins before the RMS is taken.

use rustfft::{FftPlanner, num_complex::Complex};

/// Subtracts the mean so a biased input does not leak into the low bins.
fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 { return; }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

fn apply_hann_window(window: &mut [f32]) {
    if window.len() < 2 {
        return;
    }
    let span = (window.len() - 1) as f32;
    for (i, sample) in window.iter_mut().enumerate() {
        *sample *= 0.5 * (1.0 - (std::f32::consts::TAU * i as f32 / span).cos());
    }
}

/// Performs a forward FFT on a signal and returns the complex spectrum.
///
/// The signal is DC-corrected and Hann-windowed first. Any length is accepted;
/// RustFFT plans non-power-of-two sizes as well.
pub fn perform_fft(signal: &[f32]) -> Vec<Complex<f32>> {
    let mut windowed = signal.to_vec();
    remove_dc_offset(&mut windowed);
    apply_hann_window(&mut windowed);

    let mut buffer: Vec<Complex<f32>> = windowed.into_iter().map(|re| Complex::new(re, 0.0)).collect();
    if buffer.is_empty() {
        return buffer;
    }

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(buffer.len());
    fft.process(&mut buffer);
    buffer
}

/// Magnitudes of the first half of the spectrum (up to Nyquist), scaled by 1/N.
pub fn spectrum_to_magnitudes(spectrum: &[Complex<f32>]) -> Vec<f32> {
    let n = spectrum.len().max(1) as f32;
    spectrum
        .iter()
        .take(spectrum.len() / 2)
        .map(|c| c.norm() / n) // .norm() is sqrt(re^2 + im^2)
        .collect()
}

/// Maps magnitudes onto 0..255 across the `min_db..max_db` range.
pub fn byte_frequency_data(magnitudes: &[f32], min_db: f32, max_db: f32) -> Vec<u8> {
    let range = max_db - min_db;
    magnitudes
        .iter()
        .map(|&m| {
            let db = if m > 0.0 { 20.0 * m.log10() } else { f32::NEG_INFINITY };
            let scaled = 255.0 * (db - min_db) / range;
            scaled.clamp(0.0, 255.0) as u8
        })
        .collect()
}

/// Visual input level in 0..1.
///
/// RMS of the normalised byte spectrum, doubled for a livelier meter and
/// clamped to 1.
pub fn audio_level(signal: &[f32], min_db: f32, max_db: f32) -> f32 {
    let bytes = byte_frequency_data(&spectrum_to_magnitudes(&perform_fft(signal)), min_db, max_db);
    if bytes.is_empty() {
        return 0.0;
    }
    let sum: f32 = bytes
        .iter()
        .map(|&b| {
            let v = b as f32 / 255.0;
            v * v
        })
        .sum();
    let rms = (sum / bytes.len() as f32).sqrt();
    (rms * 2.0).min(1.0)
}
