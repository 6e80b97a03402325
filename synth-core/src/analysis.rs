//! # Analysis Engine
//!
//! Ties the capture stream to the pitch estimator, the rolling buffer and the
//! key detector. The caller feeds captured blocks through
//! [`AnalysisEngine::process_block`] and drives time with
//! [`AnalysisEngine::tick`]; nothing here reads a wall clock, so a test can
//! step the engine deterministically.

use crate::config::{EngineConfig, check_decay};
use crate::error::EngineError;
use crate::fft;
use crate::inference::{InferenceRequest, InferenceResponse, InferenceWorker, NeuralPitchModel, NoteExtractor};
use crate::key::{DetectionMode, KeyDetector, KeyEstimate, NoteEvent};
use crate::notes::frequency_to_midi;
use crate::pitch::detect_pitch_yin;
use crate::rolling::{CaptureBuffer, InferenceScheduler, Trigger};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::time::Duration;

/// Owns all analysis state for one listening session at a time.
pub struct AnalysisEngine {
    config: EngineConfig,
    sample_rate: u32,
    /// Mode chosen for the next session.
    mode: DetectionMode,
    /// Mode the running session was started with.
    active_mode: DetectionMode,
    analyzing: bool,

    key_detector: KeyDetector,
    displayed_key: Option<KeyEstimate>,

    window: VecDeque<f32>,
    audio_level: f32,
    latest_frequency: Option<f32>,
    latest_notes: Option<Vec<NoteEvent>>,
    last_level_poll: Option<Duration>,
    last_pitch_poll: Option<Duration>,

    capture: CaptureBuffer,
    scheduler: InferenceScheduler,
    worker: Option<InferenceWorker>,
    next_request_id: u64,
    /// Responses with an id at or below this belong to an earlier session.
    session_floor: u64,
}

impl AnalysisEngine {
    /// Creates an engine for audio arriving at `sample_rate`.
    pub fn new(config: EngineConfig, sample_rate: u32) -> Result<Self, EngineError> {
        config.validate()?;
        let key_detector = KeyDetector::new(config.fast_decay)?;
        let capture = CaptureBuffer::with_capacity(sample_rate, config.capture_capacity(sample_rate));
        let scheduler = InferenceScheduler::new(
            Duration::from_millis(config.inference_interval_ms),
            sample_rate as u64 * config.inference_min_seconds as u64,
        );
        Ok(Self {
            sample_rate,
            mode: DetectionMode::Standard,
            active_mode: DetectionMode::Standard,
            analyzing: false,
            key_detector,
            displayed_key: None,
            window: VecDeque::with_capacity(config.analysis_window),
            audio_level: 0.0,
            latest_frequency: None,
            latest_notes: None,
            last_level_poll: None,
            last_pitch_poll: None,
            capture,
            scheduler,
            worker: None,
            next_request_id: 0,
            session_floor: 0,
            config,
        })
    }

    /// Attaches the neural model used in high accuracy mode.
    pub fn with_model(
        mut self,
        model: Box<dyn NeuralPitchModel>,
        extractor: Box<dyn NoteExtractor>,
    ) -> Self {
        self.worker = Some(InferenceWorker::spawn(model, extractor, self.scheduler.busy_flag()));
        self
    }

    pub fn mode(&self) -> DetectionMode {
        self.mode
    }

    /// Selects the detection mode and its decay profile.
    ///
    /// A running session keeps the mode it was started with; the choice
    /// applies from the next [`start`](Self::start).
    pub fn set_mode(&mut self, mode: DetectionMode) -> Result<(), EngineError> {
        check_decay(self.decay_for(mode))?;
        self.mode = mode;
        debug!("[ANALYSIS] Mode {:?} selected", mode);
        Ok(())
    }

    fn decay_for(&self, mode: DetectionMode) -> f32 {
        match mode {
            DetectionMode::Standard => self.config.fast_decay,
            DetectionMode::HighAccuracy => self.config.accurate_decay,
        }
    }

    /// Enters the analyzing state. The displayed key is cleared.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.analyzing {
            return Ok(());
        }
        if self.mode == DetectionMode::HighAccuracy && self.worker.is_none() {
            return Err(EngineError::ModelUnavailable);
        }
        let decay = self.decay_for(self.mode);
        self.key_detector.set_decay_factor(decay)?;
        self.key_detector.reset();
        self.active_mode = self.mode;
        self.session_floor = self.next_request_id;
        if let Some(worker) = &self.worker {
            let stale = worker.drain().len();
            if stale > 0 {
                debug!("[ANALYSIS] Discarded {} responses from the previous session", stale);
            }
        }
        self.displayed_key = None;
        self.latest_frequency = None;
        self.latest_notes = None;
        self.window.clear();
        self.capture.clear();
        self.scheduler.reset();
        self.last_level_poll = None;
        self.last_pitch_poll = None;
        self.analyzing = true;
        info!("[ANALYSIS] Started ({:?})", self.active_mode);
        Ok(())
    }

    /// Leaves the analyzing state, keeping the last displayed key.
    pub fn stop(&mut self) {
        if !self.analyzing {
            return;
        }
        self.analyzing = false;
        self.key_detector.reset();
        self.capture.clear();
        self.scheduler.reset();
        self.window.clear();
        self.audio_level = 0.0;
        info!("[ANALYSIS] Stopped");
    }

    pub fn is_analyzing(&self) -> bool {
        self.analyzing
    }

    /// Accepts one captured mono block. Ignored while not analyzing.
    pub fn process_block(&mut self, samples: &[f32]) -> Result<(), EngineError> {
        if !self.analyzing {
            return Ok(());
        }

        self.window.extend(samples.iter().copied());
        let excess = self.window.len().saturating_sub(self.config.analysis_window);
        self.window.drain(..excess);

        if self.active_mode == DetectionMode::HighAccuracy {
            self.capture.write(samples);
            if let Some(trigger) = self.scheduler.on_write(&self.capture) {
                self.dispatch(trigger)?;
            }
        }
        Ok(())
    }

    /// Periodic work: level meter, pitch polling, inference scheduling and
    /// applying inference results.
    pub fn tick(&mut self, now: Duration) -> Result<(), EngineError> {
        if !self.analyzing {
            return Ok(());
        }

        if due(&mut self.last_level_poll, now, self.config.level_poll_ms) {
            let window = self.window.make_contiguous();
            self.audio_level =
                fft::audio_level(window, self.config.min_decibels, self.config.max_decibels);
        }

        match self.active_mode {
            DetectionMode::Standard => {
                if due(&mut self.last_pitch_poll, now, self.config.pitch_poll_ms) {
                    self.poll_pitch();
                }
            }
            DetectionMode::HighAccuracy => {
                if let Some(trigger) = self.scheduler.on_tick(now, &self.capture) {
                    self.dispatch(trigger)?;
                }
            }
        }

        self.apply_responses();
        Ok(())
    }

    fn poll_pitch(&mut self) {
        if self.window.len() < self.config.analysis_window {
            return;
        }
        let window = self.window.make_contiguous();
        let Some(frequency) = detect_pitch_yin(window, self.sample_rate, &self.config.yin) else {
            return;
        };
        self.latest_frequency = Some(frequency);
        self.key_detector.add_pitch_midi(frequency_to_midi(frequency), 1.0);
        self.displayed_key = Some(self.key_detector.current_key());
    }

    fn dispatch(&mut self, trigger: Trigger) -> Result<(), EngineError> {
        let Some(worker) = &self.worker else {
            self.scheduler.busy_flag().store(false, std::sync::atomic::Ordering::Release);
            return Err(EngineError::ModelUnavailable);
        };
        self.capture.mark_inference();
        self.next_request_id += 1;
        let request = InferenceRequest {
            id: self.next_request_id,
            samples: self.capture.linearize(),
            sample_rate: self.sample_rate,
        };
        debug!("[ANALYSIS] Inference {} requested ({:?})", request.id, trigger);
        if worker.submit(request) {
            Ok(())
        } else {
            self.scheduler.busy_flag().store(false, std::sync::atomic::Ordering::Release);
            Err(EngineError::WorkerGone)
        }
    }

    fn apply_responses(&mut self) {
        let Some(worker) = &self.worker else {
            return;
        };
        for response in worker.drain() {
            // A request dispatched before the last start finished late.
            if response.id() <= self.session_floor {
                debug!("[ANALYSIS] Dropping stale inference {}", response.id());
                continue;
            }
            match response {
                InferenceResponse::Notes { id, notes } => {
                    debug!("[ANALYSIS] Inference {} returned {} notes", id, notes.len());
                    if !notes.is_empty() {
                        self.key_detector.add_notes(&notes);
                        self.displayed_key = Some(self.key_detector.current_key());
                    }
                    self.latest_notes = Some(notes);
                }
                InferenceResponse::Failed { id, message } => {
                    warn!("[ANALYSIS] Inference {} failed, keeping previous estimate: {}", id, message);
                }
            }
        }
    }

    /// Key shown to the user; `None` until the first estimate of a session.
    pub fn displayed_key(&self) -> Option<KeyEstimate> {
        self.displayed_key
    }

    pub fn key_detector(&self) -> &KeyDetector {
        &self.key_detector
    }

    pub fn audio_level(&self) -> f32 {
        self.audio_level
    }

    /// Most recent fast-path estimate in Hz.
    pub fn latest_frequency(&self) -> Option<f32> {
        self.latest_frequency
    }

    /// Most recent batch from the neural model.
    pub fn latest_notes(&self) -> Option<&[NoteEvent]> {
        self.latest_notes.as_deref()
    }

    pub fn capture_buffer(&self) -> &CaptureBuffer {
        &self.capture
    }

    pub fn inference_busy(&self) -> bool {
        self.scheduler.is_busy()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// True when `interval_ms` has passed since `last`, updating `last`.
fn due(last: &mut Option<Duration>, now: Duration, interval_ms: u64) -> bool {
    match *last {
        Some(previous) if now.saturating_sub(previous) < Duration::from_millis(interval_ms) => false,
        _ => {
            *last = Some(now);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::PitchClass;

    fn tone(frequency: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn standard_mode_tracks_pitch_and_key() {
        let mut engine = AnalysisEngine::new(EngineConfig::default(), 44_100).unwrap();
        engine.start().unwrap();
        engine.process_block(&tone(220.0, 44_100, 4096)).unwrap();
        engine.tick(Duration::ZERO).unwrap();

        let freq = engine.latest_frequency().unwrap();
        assert!((freq - 220.0).abs() < 2.2);
        assert_eq!(engine.key_detector().histogram()[PitchClass::A.index()], 1.0);
        assert!(engine.displayed_key().is_some());
        assert!(engine.audio_level() > 0.0);
    }

    #[test]
    fn pitch_polls_at_configured_rate() {
        let mut engine = AnalysisEngine::new(EngineConfig::default(), 44_100).unwrap();
        engine.start().unwrap();
        engine.process_block(&tone(220.0, 44_100, 4096)).unwrap();
        engine.tick(Duration::from_millis(0)).unwrap();
        engine.tick(Duration::from_millis(50)).unwrap();
        let after_two = engine.key_detector().histogram()[PitchClass::A.index()];
        assert_eq!(after_two, 1.0);
        engine.tick(Duration::from_millis(100)).unwrap();
        assert!(engine.key_detector().histogram()[PitchClass::A.index()] > 1.0);
    }

    #[test]
    fn stop_resets_histogram_but_keeps_displayed_key() {
        let mut engine = AnalysisEngine::new(EngineConfig::default(), 44_100).unwrap();
        engine.start().unwrap();
        engine.process_block(&tone(220.0, 44_100, 4096)).unwrap();
        engine.tick(Duration::ZERO).unwrap();
        let shown = engine.displayed_key();

        engine.stop();
        assert!(!engine.is_analyzing());
        assert!(engine.key_detector().histogram().iter().all(|&v| v == 0.0));
        assert_eq!(engine.displayed_key(), shown);

        engine.start().unwrap();
        assert_eq!(engine.displayed_key(), None);
    }

    #[test]
    fn blocks_are_ignored_while_idle() {
        let mut engine = AnalysisEngine::new(EngineConfig::default(), 44_100).unwrap();
        engine.process_block(&tone(220.0, 44_100, 4096)).unwrap();
        engine.tick(Duration::ZERO).unwrap();
        assert_eq!(engine.latest_frequency(), None);
        assert_eq!(engine.audio_level(), 0.0);
    }

    #[test]
    fn high_accuracy_without_model_refuses_to_start() {
        let mut engine = AnalysisEngine::new(EngineConfig::default(), 44_100).unwrap();
        engine.set_mode(DetectionMode::HighAccuracy).unwrap();
        assert_eq!(engine.mode(), DetectionMode::HighAccuracy);
        assert!(matches!(engine.start(), Err(EngineError::ModelUnavailable)));
        assert!(!engine.is_analyzing());
        assert_eq!(engine.key_detector().decay_factor(), 0.97);
    }

    #[test]
    fn mode_switch_applies_from_next_start() {
        let mut engine = AnalysisEngine::new(EngineConfig::default(), 44_100).unwrap();
        engine.start().unwrap();
        engine.set_mode(DetectionMode::HighAccuracy).unwrap();
        for _ in 0..16 {
            engine.process_block(&[0.0; 1000]).unwrap();
        }
        engine.tick(Duration::ZERO).unwrap();
        assert_eq!(engine.capture_buffer().total_written(), 0);
        assert_eq!(engine.key_detector().decay_factor(), 0.97);

        engine.stop();
        assert!(matches!(engine.start(), Err(EngineError::ModelUnavailable)));
    }

    #[test]
    fn due_respects_interval() {
        let mut last = None;
        assert!(due(&mut last, Duration::from_millis(10), 100));
        assert!(!due(&mut last, Duration::from_millis(109), 100));
        assert!(due(&mut last, Duration::from_millis(110), 100));
    }
}
