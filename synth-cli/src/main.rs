//! # Synth Keyboard - Headless Driver
//!
//! Runs one keyboard session against the real audio devices without a GUI.
//! The microphone feeds the analysis engine, the default output device plays
//! any notes given on the command line, and the UI snapshot is printed as a
//! JSON line twice a second.
//!
//! ```text
//! synth-cli [--config engine.json] [--seconds 30] [--scale "C major"] [--play C5,E5,G5]
//! ```
//!
//! Verbosity follows `RUST_LOG`, e.g. `RUST_LOG=debug`.

use anyhow::{Context, Result, bail};
use crossbeam_channel::{after, never, select, tick};
use log::{error, info, warn};
use std::time::{Duration, Instant};
use synth_core::notes::note_number_from_name;
use synth_core::scale::ScaleSelection;
use synth_core::synth::SynthGraph;
use synth_core::voice::NoteId;
use synth_core::{AnalysisEngine, EngineConfig, KeyboardSession, audio};

const TICK_INTERVAL: Duration = Duration::from_millis(20);
const REPORT_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
struct Options {
    config: Option<String>,
    seconds: Option<u64>,
    scale: Option<ScaleSelection>,
    play: Vec<NoteId>,
}

fn parse_options(mut args: impl Iterator<Item = String>) -> Result<Options> {
    let mut options = Options::default();
    while let Some(flag) = args.next() {
        let mut value = || args.next().with_context(|| format!("{flag} needs a value"));
        match flag.as_str() {
            "--config" => options.config = Some(value()?),
            "--seconds" => {
                let text = value()?;
                options.seconds = Some(text.parse().with_context(|| format!("bad duration {text:?}"))?);
            }
            "--scale" => {
                let text = value()?;
                options.scale = Some(text.parse().with_context(|| format!("bad scale {text:?}"))?);
            }
            "--play" => {
                for name in value()?.split(',').filter(|s| !s.is_empty()) {
                    let note = note_number_from_name(name.trim())
                        .with_context(|| format!("bad note {name:?}"))?;
                    options.play.push(note);
                }
            }
            other => bail!("unknown argument {other:?}"),
        }
    }
    Ok(options)
}

fn main() -> Result<()> {
    env_logger::init();
    let options = parse_options(std::env::args().skip(1))?;

    let config = match &options.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    info!("[MAIN] Starting synth keyboard");

    // Without an output device the keyboard is silent but analysis still runs.
    let (output, graph) = match audio::start_synth_output() {
        Ok((stream, graph)) => (Some(stream), graph),
        Err(e) => {
            warn!("[MAIN] No audio output, notes will be silent: {:#}", e);
            (None, SynthGraph::new(config.sample_rate).0)
        }
    };

    let (block_tx, block_rx) = crossbeam_channel::unbounded::<Vec<f32>>();
    let capture = match audio::start_audio_capture(block_tx, config.sample_rate) {
        Ok(capture) => capture,
        Err(e) => {
            error!("[MAIN] Microphone unavailable: {}", e);
            return Err(e).context("starting audio capture");
        }
    };

    let analysis = AnalysisEngine::new(config.clone(), capture.sample_rate)?;
    let mut session = KeyboardSession::new(graph, &config, analysis);
    if let Some(selection) = options.scale {
        session.set_scale(selection);
    }
    for &note in &options.play {
        if !session.press_key(note) {
            info!("[MAIN] Skipping note {} outside the selected scale", note);
        }
    }
    session.analysis.start()?;

    let started = Instant::now();
    let ticker = tick(TICK_INTERVAL);
    let reporter = tick(REPORT_INTERVAL);
    let deadline = match options.seconds {
        Some(seconds) => after(Duration::from_secs(seconds)),
        None => never(),
    };

    loop {
        select! {
            recv(block_rx) -> msg => match msg {
                Ok(block) => session.analysis.process_block(&block)?,
                Err(_) => {
                    warn!("[MAIN] Capture channel closed");
                    break;
                }
            },
            recv(ticker) -> _ => session.tick(started.elapsed())?,
            recv(reporter) -> _ => println!("{}", serde_json::to_string(&session.snapshot())?),
            recv(deadline) -> _ => break,
        }
    }

    for note in session.voices.active_notes() {
        session.release_key(note);
    }
    session.analysis.stop();
    println!("{}", serde_json::to_string(&session.snapshot())?);

    drop(capture);
    drop(output);
    info!("[MAIN] Finished");
    Ok(())
}
