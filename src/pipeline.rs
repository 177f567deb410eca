//! Downstream pipeline port.
//!
//! The listener core stops at the utterance boundary: transcription, reply
//! generation, speech synthesis, and persistence all live behind this trait.
//! Implementations run on the listener thread while the loop is in the
//! processing state, so they should do their own internal hand-off if they
//! need concurrency.

use crate::vad::Utterance;
use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

/// Timing metrics reported by a pipeline run, milliseconds end-to-end per
/// stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineTimings {
    pub utterance_ms: u64,
    pub transcribe_ms: u64,
    pub reply_ms: u64,
    pub synthesis_ms: u64,
}

/// What the downstream side produced for one utterance.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    /// Recognized text; may be empty when the audio carried no usable speech.
    pub transcript: String,
    /// Generated reply text; empty when the pipeline produced none.
    pub reply: String,
    /// Reference to synthesized or persisted audio, when the pipeline made one.
    pub audio_ref: Option<PathBuf>,
    pub timings: PipelineTimings,
}

/// Port invoked once per completed utterance, ownership included.
///
/// Failures must be reported as errors; a silent empty result hides problems
/// from the control surface.
pub trait UtterancePipeline: Send {
    fn handle(&mut self, utterance: Utterance) -> Result<PipelineResult>;
}
