//! # Neural Inference Worker
//!
//! The high-accuracy path hands the linearised capture buffer to an external
//! neural pitch model on a dedicated thread. The model and the adapter that
//! turns its raw outputs into note events are supplied by the caller; this
//! module only moves buffers in and note events out.

use crate::key::NoteEvent;
use crate::rolling::resample;
use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

/// Raw per-frame model activations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelOutput {
    pub frames: Vec<Vec<f32>>,
    pub onsets: Vec<Vec<f32>>,
    pub contours: Vec<Vec<f32>>,
}

/// A polyphonic pitch model treated as a black box.
pub trait NeuralPitchModel: Send {
    /// Sample rate the model's input must be at.
    fn required_sample_rate(&self) -> u32;

    fn evaluate(&mut self, samples: &[f32]) -> Result<ModelOutput>;
}

/// Converts raw model activations into timed note events.
pub trait NoteExtractor: Send {
    fn extract(&self, output: &ModelOutput) -> Vec<NoteEvent>;
}

/// One batch of audio to analyse.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub id: u64,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InferenceResponse {
    Notes { id: u64, notes: Vec<NoteEvent> },
    Failed { id: u64, message: String },
}

impl InferenceResponse {
    /// Id of the request this answers. Ids increase per engine, so the
    /// engine can tell results of an earlier session from current ones.
    pub fn id(&self) -> u64 {
        match self {
            InferenceResponse::Notes { id, .. } | InferenceResponse::Failed { id, .. } => *id,
        }
    }
}

/// Handle to the inference thread.
///
/// Dropping the handle closes the request channel and joins the thread.
#[derive(Debug)]
pub struct InferenceWorker {
    request_tx: Option<Sender<InferenceRequest>>,
    response_rx: Receiver<InferenceResponse>,
    thread_handle: Option<JoinHandle<()>>,
}

impl InferenceWorker {
    /// Spawns the worker thread. `busy` is cleared after every request,
    /// whatever its outcome.
    pub fn spawn(
        mut model: Box<dyn NeuralPitchModel>,
        extractor: Box<dyn NoteExtractor>,
        busy: Arc<AtomicBool>,
    ) -> Self {
        let (request_tx, request_rx) = crossbeam_channel::unbounded::<InferenceRequest>();
        let (response_tx, response_rx) = crossbeam_channel::unbounded();

        let thread_handle = thread::spawn(move || {
            info!("[INFERENCE] Worker started");
            for request in request_rx.iter() {
                let id = request.id;
                let response = match run_request(model.as_mut(), extractor.as_ref(), request) {
                    Ok(notes) => {
                        debug!("[INFERENCE] Request {} produced {} notes", id, notes.len());
                        InferenceResponse::Notes { id, notes }
                    }
                    Err(e) => {
                        error!("[INFERENCE] Request {} failed: {:#}", id, e);
                        InferenceResponse::Failed { id, message: e.to_string() }
                    }
                };
                // The response is queued before the flag drops, so an idle
                // worker never has an undelivered result.
                let delivered = response_tx.send(response).is_ok();
                busy.store(false, Ordering::Release);
                if !delivered {
                    break;
                }
            }
            info!("[INFERENCE] Worker stopped");
        });

        Self { request_tx: Some(request_tx), response_rx, thread_handle: Some(thread_handle) }
    }

    /// Queues a request. Returns false if the worker has gone away.
    pub fn submit(&self, request: InferenceRequest) -> bool {
        match &self.request_tx {
            Some(tx) => tx.send(request).is_ok(),
            None => false,
        }
    }

    /// Responses that have arrived so far, oldest first. Never blocks.
    pub fn drain(&self) -> Vec<InferenceResponse> {
        self.response_rx.try_iter().collect()
    }

    /// Receiver for callers that want to wait on results.
    pub fn responses(&self) -> &Receiver<InferenceResponse> {
        &self.response_rx
    }
}

impl Drop for InferenceWorker {
    fn drop(&mut self) {
        self.request_tx.take();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_request(
    model: &mut dyn NeuralPitchModel,
    extractor: &dyn NoteExtractor,
    request: InferenceRequest,
) -> Result<Vec<NoteEvent>> {
    let target_rate = model.required_sample_rate();
    let samples = resample(&request.samples, request.sample_rate, target_rate);
    debug!(
        "[INFERENCE] Evaluating {} samples at {} Hz (from {} Hz)",
        samples.len(),
        target_rate,
        request.sample_rate
    );
    let output = model.evaluate(&samples)?;
    Ok(extractor.extract(&output))
}
