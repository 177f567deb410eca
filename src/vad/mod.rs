//! Adaptive voice activity detection and utterance segmentation.
//!
//! Three stages, each fed one frame at a time by the listener loop:
//! noise-floor calibration, threshold classification with attack/release
//! hysteresis, and utterance assembly with pre-roll, hangover, and length
//! bounds.

mod calibrator;
mod engine;
mod segmenter;

pub use calibrator::{CalibrationProfile, Calibrator};
pub use engine::{AdaptiveVad, VadDecision};
pub use segmenter::{segment_pcm, CloseReason, SegmentEvent, SegmentPhase, Segmenter, Utterance};
