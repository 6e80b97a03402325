//! # Voice Manager
//!
//! One oscillator plus gain path per pressed key. Voices start at a fixed
//! level, and on release ramp linearly to silence before the oscillator is
//! stopped and the voice is dropped from the registry.
//!
//! The manager talks to the sound output only through [`AudioGraph`], so the
//! same logic drives the real-time renderer and the recording graph used in
//! tests.

use crate::notes::note_name;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Key identity; the keyboard's note number.
pub type NoteId = u8;

/// Opaque handle to a node in the audio graph.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WaveShape {
    #[default]
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl WaveShape {
    /// One cycle of the waveform, `phase` in 0..1, output in -1..1.
    pub fn sample(self, phase: f32) -> f32 {
        match self {
            WaveShape::Sine => (2.0 * std::f32::consts::PI * phase).sin(),
            WaveShape::Square => {
                if phase < 0.5 { 1.0 } else { -1.0 }
            }
            WaveShape::Sawtooth => 2.0 * phase - 1.0,
            WaveShape::Triangle => {
                if phase < 0.5 { 4.0 * phase - 1.0 } else { 3.0 - 4.0 * phase }
            }
        }
    }
}

impl fmt::Display for WaveShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WaveShape::Sine => "sine",
            WaveShape::Square => "square",
            WaveShape::Sawtooth => "sawtooth",
            WaveShape::Triangle => "triangle",
        };
        f.write_str(name)
    }
}

/// The rendering context the voice manager drives.
pub trait AudioGraph {
    /// Monotonic playback clock.
    fn current_time(&self) -> Duration;
    fn create_oscillator(&mut self, frequency: f32, shape: WaveShape) -> NodeId;
    fn create_gain(&mut self, level: f32) -> NodeId;
    fn connect(&mut self, source: NodeId, destination: NodeId);
    fn connect_to_destination(&mut self, node: NodeId);
    fn disconnect(&mut self, node: NodeId);
    fn set_wave_shape(&mut self, oscillator: NodeId, shape: WaveShape);
    /// Linear ramp from the current level to `target`, reached at `end_time`.
    fn ramp_gain(&mut self, gain: NodeId, target: f32, end_time: Duration);
    fn stop_oscillator(&mut self, oscillator: NodeId);
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VoiceState {
    Active,
    /// Ramping to silence; torn down once the clock passes `until`.
    Releasing { until: Duration },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Voice {
    pub note: NoteId,
    pub frequency: f32,
    pub oscillator: NodeId,
    pub gain: NodeId,
    pub state: VoiceState,
}

/// Registry of sounding voices, at most one per note.
#[derive(Debug)]
pub struct VoiceManager<G: AudioGraph> {
    graph: G,
    voices: BTreeMap<NoteId, Voice>,
    wave_shape: WaveShape,
    level: f32,
    release: Duration,
}

impl<G: AudioGraph> VoiceManager<G> {
    pub fn new(graph: G, wave_shape: WaveShape, level: f32, release: Duration) -> Self {
        Self { graph, voices: BTreeMap::new(), wave_shape, level, release }
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut G {
        &mut self.graph
    }

    pub fn wave_shape(&self) -> WaveShape {
        self.wave_shape
    }

    /// Starts a voice with the current default shape.
    pub fn start_note(&mut self, note: NoteId, frequency: f32) -> bool {
        self.start_note_with_shape(note, frequency, self.wave_shape)
    }

    /// Starts a voice unless `note` already has one, active or releasing.
    ///
    /// Returns whether a new voice was created.
    pub fn start_note_with_shape(&mut self, note: NoteId, frequency: f32, shape: WaveShape) -> bool {
        if self.voices.contains_key(&note) {
            trace!("[VOICE] {} already sounding", note_name(note));
            return false;
        }

        let oscillator = self.graph.create_oscillator(frequency, shape);
        let gain = self.graph.create_gain(self.level);
        self.graph.connect(oscillator, gain);
        self.graph.connect_to_destination(gain);

        debug!("[VOICE] Start {} at {:.2} Hz ({})", note_name(note), frequency, shape);
        self.voices.insert(
            note,
            Voice { note, frequency, oscillator, gain, state: VoiceState::Active },
        );
        true
    }

    /// Begins the release ramp. Unknown or already-releasing notes are ignored.
    pub fn stop_note(&mut self, note: NoteId) {
        let until = self.graph.current_time() + self.release;
        let Some(voice) = self.voices.get_mut(&note) else {
            return;
        };
        if voice.state != VoiceState::Active {
            return;
        }
        voice.state = VoiceState::Releasing { until };
        self.graph.ramp_gain(voice.gain, 0.0, until);
        debug!("[VOICE] Release {}", note_name(note));
    }

    /// Stops and removes every voice whose release window has passed.
    ///
    /// Returns the notes that were removed.
    pub fn collect_released(&mut self) -> Vec<NoteId> {
        let now = self.graph.current_time();
        let finished: Vec<NoteId> = self
            .voices
            .values()
            .filter(|v| matches!(v.state, VoiceState::Releasing { until } if until <= now))
            .map(|v| v.note)
            .collect();

        for note in &finished {
            if let Some(voice) = self.voices.remove(note) {
                self.graph.stop_oscillator(voice.oscillator);
                self.graph.disconnect(voice.oscillator);
                self.graph.disconnect(voice.gain);
                trace!("[VOICE] Removed {}", note_name(*note));
            }
        }
        finished
    }

    /// Applies `shape` to all sounding voices and to later ones.
    pub fn set_wave_shape(&mut self, shape: WaveShape) {
        self.wave_shape = shape;
        for voice in self.voices.values() {
            self.graph.set_wave_shape(voice.oscillator, shape);
        }
    }

    pub fn voice(&self, note: NoteId) -> Option<&Voice> {
        self.voices.get(&note)
    }

    /// Voices in the registry, releasing ones included.
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Notes still held down, ascending.
    pub fn active_notes(&self) -> Vec<NoteId> {
        self.voices
            .values()
            .filter(|v| v.state == VoiceState::Active)
            .map(|v| v.note)
            .collect()
    }

    /// Frequency to display; defined only while exactly one note is held.
    pub fn display_frequency(&self) -> Option<f32> {
        let mut active = self.voices.values().filter(|v| v.state == VoiceState::Active);
        match (active.next(), active.next()) {
            (Some(voice), None) => Some(voice.frequency),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Records every graph call against a manually advanced clock.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingGraph {
        pub now: Duration,
        pub next_id: u32,
        pub calls: Vec<String>,
    }

    impl AudioGraph for RecordingGraph {
        fn current_time(&self) -> Duration {
            self.now
        }

        fn create_oscillator(&mut self, frequency: f32, shape: WaveShape) -> NodeId {
            self.next_id += 1;
            self.calls.push(format!("osc {} {frequency} {shape}", self.next_id));
            NodeId(self.next_id)
        }

        fn create_gain(&mut self, level: f32) -> NodeId {
            self.next_id += 1;
            self.calls.push(format!("gain {} {level}", self.next_id));
            NodeId(self.next_id)
        }

        fn connect(&mut self, source: NodeId, destination: NodeId) {
            self.calls.push(format!("connect {} {}", source.0, destination.0));
        }

        fn connect_to_destination(&mut self, node: NodeId) {
            self.calls.push(format!("out {}", node.0));
        }

        fn disconnect(&mut self, node: NodeId) {
            self.calls.push(format!("disconnect {}", node.0));
        }

        fn set_wave_shape(&mut self, oscillator: NodeId, shape: WaveShape) {
            self.calls.push(format!("shape {} {shape}", oscillator.0));
        }

        fn ramp_gain(&mut self, gain: NodeId, target: f32, end_time: Duration) {
            self.calls.push(format!("ramp {} {target} {}", gain.0, end_time.as_millis()));
        }

        fn stop_oscillator(&mut self, oscillator: NodeId) {
            self.calls.push(format!("stop {}", oscillator.0));
        }
    }

    fn manager() -> VoiceManager<RecordingGraph> {
        VoiceManager::new(RecordingGraph::default(), WaveShape::Sine, 0.1, Duration::from_millis(100))
    }

    fn count(graph: &RecordingGraph, prefix: &str) -> usize {
        graph.calls.iter().filter(|c| c.starts_with(prefix)).count()
    }

    #[test]
    fn duplicate_start_makes_one_voice() {
        let mut voices = manager();
        assert!(voices.start_note(60, 261.63));
        assert!(!voices.start_note(60, 261.63));
        assert_eq!(voices.voice_count(), 1);
        assert_eq!(count(voices.graph(), "osc"), 1);
        assert_eq!(voices.graph().calls[1], "gain 2 0.1");
    }

    #[test]
    fn unknown_stop_is_a_no_op() {
        let mut voices = manager();
        voices.start_note(60, 261.63);
        let calls_before = voices.graph().calls.len();
        voices.stop_note(61);
        assert_eq!(voices.graph().calls.len(), calls_before);
        assert_eq!(voices.active_notes(), vec![60]);
    }

    #[test]
    fn release_removes_exactly_once_after_window() {
        let mut voices = manager();
        voices.start_note(60, 261.63);
        voices.graph_mut().now = Duration::from_millis(500);
        voices.stop_note(60);
        voices.stop_note(60);
        assert_eq!(count(voices.graph(), "ramp"), 1);
        assert!(voices.graph().calls.contains(&"ramp 2 0 600".to_string()));
        assert!(voices.active_notes().is_empty());
        assert_eq!(voices.voice_count(), 1);

        voices.graph_mut().now = Duration::from_millis(599);
        assert!(voices.collect_released().is_empty());

        voices.graph_mut().now = Duration::from_millis(600);
        assert_eq!(voices.collect_released(), vec![60]);
        assert!(voices.collect_released().is_empty());
        assert_eq!(count(voices.graph(), "stop"), 1);
        assert_eq!(voices.voice_count(), 0);
    }

    #[test]
    fn restart_during_release_is_ignored() {
        let mut voices = manager();
        voices.start_note(60, 261.63);
        voices.stop_note(60);
        assert!(!voices.start_note(60, 261.63));
        voices.graph_mut().now = Duration::from_millis(100);
        voices.collect_released();
        assert!(voices.start_note(60, 261.63));
    }

    #[test]
    fn shape_change_reaches_sounding_and_future_voices() {
        let mut voices = manager();
        voices.start_note(60, 261.63);
        voices.start_note(64, 329.63);
        voices.stop_note(64);
        voices.set_wave_shape(WaveShape::Square);
        assert_eq!(count(voices.graph(), "shape"), 2);
        voices.start_note(67, 392.0);
        assert!(voices.graph().calls.iter().any(|c| c.starts_with("osc") && c.ends_with("square")));
    }

    #[test]
    fn display_frequency_needs_exactly_one_held_note() {
        let mut voices = manager();
        assert_eq!(voices.display_frequency(), None);
        voices.start_note(57, 220.0);
        assert_eq!(voices.display_frequency(), Some(220.0));
        voices.start_note(60, 261.63);
        assert_eq!(voices.display_frequency(), None);
        voices.stop_note(60);
        assert_eq!(voices.display_frequency(), Some(220.0));
    }

    #[test]
    fn waveforms_stay_in_range() {
        for shape in [WaveShape::Sine, WaveShape::Square, WaveShape::Sawtooth, WaveShape::Triangle] {
            for i in 0..100 {
                let v = shape.sample(i as f32 / 100.0);
                assert!((-1.0..=1.0).contains(&v), "{shape} {v}");
            }
        }
        assert_eq!(WaveShape::Triangle.sample(0.25), 0.0);
    }
}
