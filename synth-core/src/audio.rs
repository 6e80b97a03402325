//! # Audio Device Module
//!
//! This module handles real-time audio I/O using CPAL (Cross-Platform Audio Library).
//! The input side streams fixed-size microphone blocks to the analysis thread;
//! the output side drives the synth [`crate::synth::Renderer`].
//!
//! ## Features
//! - Automatic default device selection
//! - Mono preferred, interleaved multi-channel input downmixed
//! - Callbacks that never block: blocks are handed off over channels
//! - Device failures mapped onto [`CaptureError`]
//!
//! Raw CPAL capture applies no echo cancellation, noise suppression or
//! automatic gain, which is what pitch analysis wants.

use crate::error::CaptureError;
use crate::synth::SynthGraph;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SupportedStreamConfigRange};
use crossbeam_channel::Sender;
use log::{error, info, warn};

/// Number of samples per block delivered to the analysis thread.
pub const BLOCK_SIZE: usize = 2048;

/// A running input stream and the rate it delivers at.
pub struct CaptureStream {
    /// Keeps the device running; dropping it stops capture.
    pub stream: cpal::Stream,
    pub sample_rate: u32,
    pub channels: u16,
}

/// A running output stream.
pub struct OutputStream {
    pub stream: cpal::Stream,
    pub sample_rate: u32,
}

/// Starts audio capture from the default input device.
///
/// # Arguments
/// * `sender` - Channel for mono blocks of [`BLOCK_SIZE`] samples
/// * `preferred_rate` - Sample rate to aim for, in Hz
///
/// # Returns
/// * `Ok(capture)` - Stream handle and negotiated format
/// * `Err(e)` - The device could not be acquired
pub fn start_audio_capture(
    sender: Sender<Vec<f32>>,
    preferred_rate: u32,
) -> Result<CaptureStream, CaptureError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(CaptureError::DeviceUnavailable)?;

    match device.name() {
        Ok(name) => info!("[CAPTURE] Using audio input device: {}", name),
        Err(e) => warn!("[CAPTURE] Input device has no name: {}", e),
    }

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported_config =
        find_supported_config(configs, preferred_rate).ok_or(CaptureError::UnsupportedPlatform)?;

    let config = supported_config.with_sample_rate(clamp_rate(&supported_config, preferred_rate));
    let sample_rate = config.sample_rate().0;
    let channels = config.channels();
    let config: cpal::StreamConfig = config.into();

    info!("[CAPTURE] Selected {} Hz, {} channel(s)", sample_rate, channels);

    let err_fn = |err| error!("[CAPTURE] An error occurred on the input stream: {}", err);

    // Accumulates mono audio from the callback until a full block is ready.
    let mut audio_buffer = Vec::with_capacity(BLOCK_SIZE * 2);

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            downmix_into(data, channels as usize, &mut audio_buffer);

            while audio_buffer.len() >= BLOCK_SIZE {
                let block = audio_buffer[..BLOCK_SIZE].to_vec();
                // Unbounded channel: only fails once the receiver is gone.
                let _ = sender.try_send(block);
                audio_buffer.drain(..BLOCK_SIZE);
            }
        },
        err_fn,
        None,
    )?;

    stream.play()?;

    Ok(CaptureStream { stream, sample_rate, channels })
}

/// Starts the default output device and returns the synth graph that drives it.
///
/// The graph runs at the device's own rate so its clock matches playback.
pub fn start_synth_output() -> anyhow::Result<(OutputStream, SynthGraph)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow::anyhow!("No output device available"))?;

    info!("[OUTPUT] Using audio output device: {}", device.name()?);

    let supported = device.default_output_config()?;
    if supported.sample_format() != SampleFormat::F32 {
        anyhow::bail!("Output device does not accept f32 samples");
    }
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let config: cpal::StreamConfig = supported.into();
    let (graph, mut renderer) = SynthGraph::new(sample_rate);
    info!("[OUTPUT] {} Hz, {} channel(s)", sample_rate, channels);

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            renderer.render_interleaved(data, channels);
        },
        |err| error!("[OUTPUT] An error occurred on the output stream: {}", err),
        None,
    )?;
    stream.play()?;

    Ok((OutputStream { stream, sample_rate }, graph))
}

/// Appends the per-frame average of an interleaved block to `out`.
pub fn downmix_into(data: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels <= 1 {
        out.extend_from_slice(data);
        return;
    }
    out.extend(
        data.chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}

/// Picks the f32 input configuration closest to `target_rate`, preferring mono.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .min_by_key(|c| {
            let rate_distance = if (c.min_sample_rate().0..=c.max_sample_rate().0).contains(&target_rate) {
                0
            } else {
                let min_diff = (c.min_sample_rate().0 as i64 - target_rate as i64).abs();
                let max_diff = (c.max_sample_rate().0 as i64 - target_rate as i64).abs();
                min_diff.min(max_diff)
            };
            (c.channels() != 1, rate_distance)
        })
}

fn clamp_rate(config: &SupportedStreamConfigRange, target_rate: u32) -> cpal::SampleRate {
    cpal::SampleRate(target_rate.clamp(config.min_sample_rate().0, config.max_sample_rate().0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_frames() {
        let mut out = Vec::new();
        downmix_into(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn mono_passes_through() {
        let mut out = vec![9.0];
        downmix_into(&[0.1, 0.2], 1, &mut out);
        assert_eq!(out, vec![9.0, 0.1, 0.2]);
    }
}
