//! # Software Synth Graph
//!
//! Real-time implementation of [`AudioGraph`]. The control side
//! ([`SynthGraph`]) allocates node ids and posts commands over a channel; the
//! [`Renderer`] lives inside the output callback, applies pending commands at
//! the start of each block and synthesises the mix. The renderer never blocks
//! and publishes its frame count through an atomic, which is the playback
//! clock the control side reads.

use crate::voice::{AudioGraph, NodeId, WaveShape};
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Node slots reserved up front: one oscillator and one gain for each of the
/// 128 note numbers, so the output callback never grows its maps.
const MAX_NODES: usize = 256;

/// Commands from the control side to the renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphCommand {
    CreateOscillator { id: NodeId, frequency: f32, shape: WaveShape },
    CreateGain { id: NodeId, level: f32 },
    Connect { source: NodeId, destination: NodeId },
    ConnectToDestination { node: NodeId },
    Disconnect { node: NodeId },
    SetWaveShape { oscillator: NodeId, shape: WaveShape },
    RampGain { gain: NodeId, target: f32, end_frame: u64 },
    StopOscillator { oscillator: NodeId },
}

/// Control-side handle implementing [`AudioGraph`].
#[derive(Debug)]
pub struct SynthGraph {
    commands: Sender<GraphCommand>,
    frames: Arc<AtomicU64>,
    sample_rate: u32,
    next_id: u32,
}

impl SynthGraph {
    /// Creates a connected graph handle and renderer pair.
    pub fn new(sample_rate: u32) -> (SynthGraph, Renderer) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let frames = Arc::new(AtomicU64::new(0));
        let graph = SynthGraph { commands: tx, frames: Arc::clone(&frames), sample_rate, next_id: 0 };
        let renderer = Renderer {
            commands: rx,
            frames,
            sample_rate,
            oscillators: HashMap::with_capacity(MAX_NODES),
            gains: HashMap::with_capacity(MAX_NODES),
        };
        (graph, renderer)
    }

    fn allocate(&mut self) -> NodeId {
        self.next_id = self.next_id.wrapping_add(1);
        NodeId(self.next_id)
    }

    fn send(&self, command: GraphCommand) {
        // A closed channel means the output stream is gone; nothing left to drive.
        let _ = self.commands.send(command);
    }

    fn to_frame(&self, time: Duration) -> u64 {
        let rate = self.sample_rate as u128;
        ((time.as_nanos() * rate + 500_000_000) / 1_000_000_000) as u64
    }
}

impl AudioGraph for SynthGraph {
    fn current_time(&self) -> Duration {
        let frames = self.frames.load(Ordering::Acquire) as u128;
        let nanos = frames * 1_000_000_000 / self.sample_rate.max(1) as u128;
        Duration::from_nanos(nanos as u64)
    }

    fn create_oscillator(&mut self, frequency: f32, shape: WaveShape) -> NodeId {
        let id = self.allocate();
        self.send(GraphCommand::CreateOscillator { id, frequency, shape });
        id
    }

    fn create_gain(&mut self, level: f32) -> NodeId {
        let id = self.allocate();
        self.send(GraphCommand::CreateGain { id, level });
        id
    }

    fn connect(&mut self, source: NodeId, destination: NodeId) {
        self.send(GraphCommand::Connect { source, destination });
    }

    fn connect_to_destination(&mut self, node: NodeId) {
        self.send(GraphCommand::ConnectToDestination { node });
    }

    fn disconnect(&mut self, node: NodeId) {
        self.send(GraphCommand::Disconnect { node });
    }

    fn set_wave_shape(&mut self, oscillator: NodeId, shape: WaveShape) {
        self.send(GraphCommand::SetWaveShape { oscillator, shape });
    }

    fn ramp_gain(&mut self, gain: NodeId, target: f32, end_time: Duration) {
        let end_frame = self.to_frame(end_time);
        self.send(GraphCommand::RampGain { gain, target, end_frame });
    }

    fn stop_oscillator(&mut self, oscillator: NodeId) {
        self.send(GraphCommand::StopOscillator { oscillator });
    }
}

#[derive(Debug)]
struct Oscillator {
    frequency: f32,
    shape: WaveShape,
    phase: f32,
    output: Option<NodeId>,
}

#[derive(Debug)]
struct Gain {
    level: f32,
    ramp: Option<Ramp>,
    to_destination: bool,
}

#[derive(Debug, Clone, Copy)]
struct Ramp {
    start_level: f32,
    start_frame: u64,
    target: f32,
    end_frame: u64,
}

impl Gain {
    fn level_at(&mut self, frame: u64) -> f32 {
        if let Some(ramp) = self.ramp {
            if frame >= ramp.end_frame {
                self.level = ramp.target;
                self.ramp = None;
            } else {
                let span = (ramp.end_frame - ramp.start_frame).max(1) as f32;
                let t = frame.saturating_sub(ramp.start_frame) as f32 / span;
                self.level = ramp.start_level + (ramp.target - ramp.start_level) * t;
            }
        }
        self.level
    }
}

/// Audio-thread half of the graph.
#[derive(Debug)]
pub struct Renderer {
    commands: Receiver<GraphCommand>,
    frames: Arc<AtomicU64>,
    sample_rate: u32,
    oscillators: HashMap<NodeId, Oscillator>,
    gains: HashMap<NodeId, Gain>,
}

impl Renderer {
    /// Number of oscillators currently allocated.
    pub fn oscillator_count(&self) -> usize {
        self.oscillators.len()
    }

    /// Fills an interleaved block with `channels` identical channels.
    pub fn render_interleaved(&mut self, output: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        self.apply_pending();
        let start = self.frames.load(Ordering::Relaxed);
        let frame_count = output.len() / channels;
        for (i, frame) in output.chunks_mut(channels).enumerate() {
            let sample = self.next_sample(start + i as u64);
            frame.fill(sample);
        }
        self.frames.store(start + frame_count as u64, Ordering::Release);
    }

    /// Mono convenience wrapper.
    pub fn render(&mut self, output: &mut [f32]) {
        self.render_interleaved(output, 1);
    }

    fn apply_pending(&mut self) {
        let now = self.frames.load(Ordering::Relaxed);
        while let Ok(command) = self.commands.try_recv() {
            match command {
                GraphCommand::CreateOscillator { id, frequency, shape } => {
                    self.oscillators.insert(id, Oscillator { frequency, shape, phase: 0.0, output: None });
                }
                GraphCommand::CreateGain { id, level } => {
                    self.gains.insert(id, Gain { level, ramp: None, to_destination: false });
                }
                GraphCommand::Connect { source, destination } => {
                    if let Some(osc) = self.oscillators.get_mut(&source) {
                        osc.output = Some(destination);
                    }
                }
                GraphCommand::ConnectToDestination { node } => {
                    if let Some(gain) = self.gains.get_mut(&node) {
                        gain.to_destination = true;
                    }
                }
                GraphCommand::Disconnect { node } => {
                    self.oscillators.remove(&node);
                    self.gains.remove(&node);
                }
                GraphCommand::SetWaveShape { oscillator, shape } => {
                    if let Some(osc) = self.oscillators.get_mut(&oscillator) {
                        osc.shape = shape;
                    }
                }
                GraphCommand::RampGain { gain, target, end_frame } => {
                    if let Some(g) = self.gains.get_mut(&gain) {
                        let start_level = g.level_at(now);
                        g.ramp = Some(Ramp { start_level, start_frame: now, target, end_frame });
                    }
                }
                GraphCommand::StopOscillator { oscillator } => {
                    if let Some(osc) = self.oscillators.get_mut(&oscillator) {
                        osc.output = None;
                    }
                }
            }
        }
    }

    fn next_sample(&mut self, frame: u64) -> f32 {
        let sample_rate = self.sample_rate as f32;
        let mut mix = 0.0;
        for osc in self.oscillators.values_mut() {
            let Some(gain) = osc.output.and_then(|id| self.gains.get_mut(&id)) else {
                continue;
            };
            if !gain.to_destination {
                continue;
            }
            mix += osc.shape.sample(osc.phase) * gain.level_at(frame);
            osc.phase = (osc.phase + osc.frequency / sample_rate).fract();
        }
        mix
    }
}
