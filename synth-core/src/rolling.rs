//! # Rolling Capture Buffer
//!
//! Keeps the most recent few seconds of captured audio for the neural pitch
//! model and decides when a batched inference is due.
//!
//! The buffer has a single writer (the capture path). The scheduler only
//! reads its counters; the busy flag is shared with the inference worker,
//! which clears it when a request finishes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Fixed-capacity circular sample store that overwrites its oldest data.
#[derive(Debug, Clone)]
pub struct CaptureBuffer {
    samples: Vec<f32>,
    write_index: usize,
    total_written: u64,
    last_inference_count: u64,
    sample_rate: u32,
}

impl CaptureBuffer {
    /// Creates a buffer holding `seconds` of audio at `sample_rate`.
    pub fn new(sample_rate: u32, seconds: u32) -> Self {
        Self::with_capacity(sample_rate, sample_rate as usize * seconds as usize)
    }

    pub fn with_capacity(sample_rate: u32, capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity.max(1)],
            write_index: 0,
            total_written: 0,
            last_inference_count: 0,
            sample_rate,
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Total samples ever written, including overwritten ones.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Samples written since the last inference was dispatched.
    pub fn pending(&self) -> u64 {
        self.total_written - self.last_inference_count
    }

    /// Appends with wraparound. Never blocks and never drops the newest data.
    pub fn write(&mut self, input: &[f32]) {
        let capacity = self.samples.len();
        // Only the tail of an oversized block can survive.
        let skip = input.len().saturating_sub(capacity);
        if skip > 0 {
            self.write_index = (self.write_index + skip) % capacity;
        }
        let mut remaining = &input[skip..];
        while !remaining.is_empty() {
            let run = remaining.len().min(capacity - self.write_index);
            self.samples[self.write_index..self.write_index + run].copy_from_slice(&remaining[..run]);
            self.write_index = (self.write_index + run) % capacity;
            remaining = &remaining[run..];
        }
        self.total_written += input.len() as u64;
    }

    /// Samples in chronological order, oldest retained sample first.
    ///
    /// Before the buffer has wrapped the unwritten slots are zeros and come first.
    pub fn linearize(&self) -> Vec<f32> {
        let mut ordered = Vec::with_capacity(self.samples.len());
        ordered.extend_from_slice(&self.samples[self.write_index..]);
        ordered.extend_from_slice(&self.samples[..self.write_index]);
        ordered
    }

    /// Records that everything written so far has been handed to the model.
    pub fn mark_inference(&mut self) {
        self.last_inference_count = self.total_written;
    }

    /// Clears contents and counters for a new session.
    pub fn clear(&mut self) {
        self.samples.fill(0.0);
        self.write_index = 0;
        self.total_written = 0;
        self.last_inference_count = 0;
    }
}

/// Why an inference request was issued.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// The periodic interval elapsed with enough fresh audio.
    Interval,
    /// A full buffer's worth of audio accumulated since the last request.
    Overflow,
}

/// Decides when the rolling buffer should be sent to the model.
///
/// At most one request is outstanding; a trigger that fires while the busy
/// flag is set is dropped, not queued.
#[derive(Debug)]
pub struct InferenceScheduler {
    interval: Duration,
    min_pending: u64,
    last_interval: Option<Duration>,
    busy: Arc<AtomicBool>,
}

impl InferenceScheduler {
    /// `min_pending` is the sample count that must accumulate before an
    /// interval tick is allowed to fire.
    pub fn new(interval: Duration, min_pending: u64) -> Self {
        Self { interval, min_pending, last_interval: None, busy: Arc::new(AtomicBool::new(false)) }
    }

    /// Flag shared with the worker that runs the request.
    pub fn busy_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.busy)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Checked after every capture write.
    pub fn on_write(&mut self, buffer: &CaptureBuffer) -> Option<Trigger> {
        if buffer.pending() >= buffer.capacity() as u64 && self.try_acquire() {
            return Some(Trigger::Overflow);
        }
        None
    }

    /// Checked on the application tick with the caller's clock.
    pub fn on_tick(&mut self, now: Duration, buffer: &CaptureBuffer) -> Option<Trigger> {
        let last = *self.last_interval.get_or_insert(now);
        if now.saturating_sub(last) < self.interval {
            return None;
        }
        self.last_interval = Some(now);
        if buffer.pending() < self.min_pending {
            return None;
        }
        self.try_acquire().then_some(Trigger::Interval)
    }

    /// Restarts the interval clock; used when analysis stops.
    pub fn reset(&mut self) {
        self.last_interval = None;
    }

    fn try_acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Linear-interpolation resampler.
///
/// The output holds `ceil(to_rate * duration)` samples.
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() || from_rate == 0 {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (input.len() as f64 * to_rate as f64 / from_rate as f64).ceil() as usize;
    let last = input.len() - 1;
    (0..out_len)
        .map(|i| {
            let position = i as f64 * ratio;
            let index = (position.floor() as usize).min(last);
            let next = (index + 1).min(last);
            let frac = (position - index as f64).clamp(0.0, 1.0) as f32;
            input[index] + (input[next] - input[index]) * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_keeps_most_recent_in_order() {
        let mut buffer = CaptureBuffer::with_capacity(10, 8);
        let data: Vec<f32> = (0..21).map(|i| i as f32).collect();
        for chunk in data.chunks(5) {
            buffer.write(chunk);
        }
        let expected: Vec<f32> = (13..21).map(|i| i as f32).collect();
        assert_eq!(buffer.linearize(), expected);
        assert_eq!(buffer.total_written(), 21);
    }

    #[test]
    fn single_oversized_write() {
        let mut buffer = CaptureBuffer::with_capacity(10, 4);
        buffer.write(&[1.0, 2.0]);
        buffer.write(&(0..11).map(|i| i as f32).collect::<Vec<_>>());
        assert_eq!(buffer.linearize(), vec![7.0, 8.0, 9.0, 10.0]);
        assert_eq!(buffer.total_written(), 13);
    }

    #[test]
    fn partial_fill_leads_with_zeros() {
        let mut buffer = CaptureBuffer::with_capacity(10, 5);
        buffer.write(&[1.0, 2.0]);
        assert_eq!(buffer.linearize(), vec![0.0, 0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn interval_needs_elapsed_time_and_enough_audio() {
        let mut buffer = CaptureBuffer::with_capacity(100, 1000);
        let mut scheduler = InferenceScheduler::new(Duration::from_secs(2), 400);
        assert_eq!(scheduler.on_tick(Duration::ZERO, &buffer), None);

        buffer.write(&[0.0; 300]);
        assert_eq!(scheduler.on_tick(Duration::from_secs(2), &buffer), None);

        buffer.write(&[0.0; 200]);
        assert_eq!(scheduler.on_tick(Duration::from_secs(3), &buffer), None);
        assert_eq!(scheduler.on_tick(Duration::from_secs(4), &buffer), Some(Trigger::Interval));
        assert!(scheduler.is_busy());
    }

    #[test]
    fn triggers_while_busy_are_dropped() {
        let mut buffer = CaptureBuffer::with_capacity(100, 100);
        let mut scheduler = InferenceScheduler::new(Duration::from_secs(1), 10);
        buffer.write(&[0.0; 100]);
        assert_eq!(scheduler.on_write(&buffer), Some(Trigger::Overflow));
        buffer.mark_inference();

        buffer.write(&[0.0; 100]);
        assert_eq!(scheduler.on_write(&buffer), None);
        scheduler.on_tick(Duration::ZERO, &buffer);
        assert_eq!(scheduler.on_tick(Duration::from_secs(1), &buffer), None);

        scheduler.busy_flag().store(false, Ordering::Release);
        assert_eq!(scheduler.on_write(&buffer), Some(Trigger::Overflow));
    }

    #[test]
    fn clear_resets_counters() {
        let mut buffer = CaptureBuffer::with_capacity(10, 4);
        buffer.write(&[1.0; 6]);
        buffer.mark_inference();
        buffer.write(&[1.0; 2]);
        assert_eq!(buffer.pending(), 2);
        buffer.clear();
        assert_eq!(buffer.pending(), 0);
        assert_eq!(buffer.total_written(), 0);
        assert_eq!(buffer.linearize(), vec![0.0; 4]);
    }

    #[test]
    fn resample_halves_length() {
        let input: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let out = resample(&input, 44_100, 22_050);
        assert_eq!(out.len(), 50);
        assert_eq!(out[10], 20.0);
        assert_eq!(resample(&input, 22_050, 22_050), input);
        assert_eq!(resample(&[1.0; 3], 44_100, 22_050).len(), 2);
    }
}
