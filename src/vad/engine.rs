//! Per-frame speech/silence classification with attack/release hysteresis.
//!
//! Instantaneous frame RMS is compared against the calibrated threshold; a
//! transition in either direction is only accepted after the level has been
//! continuously on the other side for the configured debounce. This keeps
//! brief level flickers from chattering the segmenter.

use crate::audio::AudioFrame;
use crate::config::ListenerConfig;
use crate::vad::CalibrationProfile;

/// One classification per captured frame. Derived, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VadDecision {
    /// Debounced state: true once attack has elapsed, false once release has.
    pub is_speech: bool,
    /// Raw comparison for this frame. Exactly-at-threshold counts as below
    /// so ties bias against false triggers.
    pub above_threshold: bool,
    /// Monotonically increasing frame counter.
    pub frame_index: u64,
}

pub struct AdaptiveVad {
    threshold: f32,
    attack_frames: usize,
    release_frames: usize,
    above_run: usize,
    below_run: usize,
    in_speech: bool,
    next_index: u64,
}

impl AdaptiveVad {
    pub fn new(profile: &CalibrationProfile, cfg: &ListenerConfig) -> Self {
        Self {
            threshold: profile.threshold,
            attack_frames: cfg.frames_for(cfg.attack_ms),
            release_frames: cfg.frames_for(cfg.release_ms),
            above_run: 0,
            below_run: 0,
            in_speech: false,
            next_index: 0,
        }
    }

    pub fn process(&mut self, frame: &AudioFrame) -> VadDecision {
        self.classify(frame.rms())
    }

    /// Classify a frame by its RMS amplitude.
    pub fn classify(&mut self, rms: f32) -> VadDecision {
        let above = rms > self.threshold;

        if self.in_speech {
            if above {
                self.below_run = 0;
            } else {
                self.below_run += 1;
                if self.below_run >= self.release_frames {
                    self.in_speech = false;
                    self.above_run = 0;
                    self.below_run = 0;
                }
            }
        } else if above {
            self.above_run += 1;
            if self.above_run >= self.attack_frames {
                self.in_speech = true;
                self.above_run = 0;
                self.below_run = 0;
            }
        } else {
            self.above_run = 0;
        }

        let decision = VadDecision {
            is_speech: self.in_speech,
            above_threshold: above,
            frame_index: self.next_index,
        };
        self.next_index += 1;
        decision
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Drop any partial debounce state, keeping the frame counter.
    pub fn reset(&mut self) {
        self.above_run = 0;
        self.below_run = 0;
        self.in_speech = false;
    }
}
