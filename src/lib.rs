//! Local voice-interaction front end: adaptive noise-gate VAD, utterance
//! segmentation, and a controllable background listener loop.
//!
//! The crate captures microphone audio, calibrates a noise floor, classifies
//! frames as speech or silence with attack/release hysteresis, assembles
//! utterances (pre-roll, hangover, length bounds), and hands each finished
//! utterance to a downstream [`pipeline::UtterancePipeline`] port. Everything
//! past that port (STT, LLM, TTS, persistence, HTTP) lives outside this crate.

pub mod audio;
pub mod config;
pub mod error;
pub mod listener;
pub mod pipeline;
pub mod telemetry;
pub mod vad;

pub use config::ListenerConfig;
pub use error::ListenerError;
pub use listener::{Controller, ListenerState, LiveSnapshot};
pub use pipeline::{PipelineResult, PipelineTimings, UtterancePipeline};
pub use vad::{segment_pcm, CalibrationProfile, Utterance};
