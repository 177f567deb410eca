//! Utterance assembly on top of per-frame VAD decisions.
//!
//! Tracks three phases: scanning for onset, recording confirmed speech, and
//! waiting out the hangover grace period after speech appears to end. The
//! pre-roll ring keeps the most recent audio while scanning so the leading
//! edge of speech is never clipped; length bounds keep the active buffer
//! finite.

use crate::audio::AudioFrame;
use crate::config::ListenerConfig;
use crate::vad::{AdaptiveVad, CalibrationProfile, VadDecision};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Why an utterance was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Trailing silence outlasted release + hangover.
    Silence,
    /// The active buffer reached the configured maximum length.
    MaxDuration,
}

impl CloseReason {
    pub fn label(self) -> &'static str {
        match self {
            CloseReason::Silence => "silence",
            CloseReason::MaxDuration => "max_duration",
        }
    }
}

/// A finished, bounded audio segment ready for the downstream pipeline.
///
/// Spans pre-roll + speech + trailing hangover in capture order. Exactly one
/// owner holds it at a time; the segmenter's buffers are already cleared by
/// the time it is handed out.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub started_at: Instant,
    pub ended_at: Instant,
    /// Total time the signal spent above threshold while this utterance was
    /// active, attack window included.
    pub speech_ms: u64,
    pub close_reason: CloseReason,
}

impl Utterance {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / u64::from(self.sample_rate)
    }
}

/// What a single frame did to the segmenter state.
#[derive(Debug)]
pub enum SegmentEvent {
    /// Speech onset confirmed; pre-roll was folded into the active buffer.
    SpeechStarted,
    /// The VAD reported speech end; the hangover countdown began.
    HangoverStarted,
    /// Speech came back before the hangover expired; same utterance continues.
    SpeechResumed,
    /// An utterance closed and passed the minimum-length gate.
    Completed(Utterance),
    /// An utterance closed but contained too little speech to keep.
    Discarded { duration_ms: u64, speech_ms: u64 },
}

/// Current segmenter phase, exposed so the listener can mirror it in its
/// published state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentPhase {
    Listening,
    Recording,
    Hangover,
}

struct ActiveFrame {
    frame: AudioFrame,
    above: bool,
}

pub struct Segmenter {
    phase: SegmentPhase,
    pre_roll: VecDeque<AudioFrame>,
    pre_roll_capacity: usize,
    active: Vec<ActiveFrame>,
    speech_ms: u64,
    hangover_run: usize,
    hangover_frames: usize,
    max_frames: usize,
    frame_ms: u64,
    attack_ms: u64,
    min_utterance_ms: u64,
}

impl Segmenter {
    pub fn new(cfg: &ListenerConfig) -> Self {
        Self {
            phase: SegmentPhase::Listening,
            pre_roll: VecDeque::new(),
            pre_roll_capacity: cfg.pre_roll_frames(),
            active: Vec::new(),
            speech_ms: 0,
            hangover_run: 0,
            hangover_frames: (cfg.hangover_ms / cfg.frame_ms.max(1)) as usize,
            max_frames: cfg.frames_for(cfg.max_utterance_ms),
            frame_ms: cfg.frame_ms,
            attack_ms: cfg.attack_ms,
            min_utterance_ms: cfg.min_utterance_ms,
        }
    }

    pub fn phase(&self) -> SegmentPhase {
        self.phase
    }

    /// Feed one frame and its VAD decision.
    pub fn push(&mut self, frame: AudioFrame, decision: &VadDecision) -> Option<SegmentEvent> {
        match self.phase {
            SegmentPhase::Listening => {
                if decision.is_speech {
                    self.begin_utterance(frame, decision);
                    // A tiny max bound can already be saturated by pre-roll.
                    if self.active.len() >= self.max_frames {
                        return Some(self.close(CloseReason::MaxDuration));
                    }
                    return Some(SegmentEvent::SpeechStarted);
                }
                self.push_pre_roll(frame);
                None
            }
            SegmentPhase::Recording => {
                self.push_active(frame, decision);
                if self.active.len() >= self.max_frames {
                    return Some(self.close(CloseReason::MaxDuration));
                }
                if !decision.is_speech {
                    self.phase = SegmentPhase::Hangover;
                    self.hangover_run = usize::from(!decision.above_threshold);
                    if self.hangover_run >= self.hangover_frames {
                        return Some(self.close(CloseReason::Silence));
                    }
                    return Some(SegmentEvent::HangoverStarted);
                }
                None
            }
            SegmentPhase::Hangover => {
                self.push_active(frame, decision);
                if self.active.len() >= self.max_frames {
                    return Some(self.close(CloseReason::MaxDuration));
                }
                if decision.is_speech {
                    self.phase = SegmentPhase::Recording;
                    self.hangover_run = 0;
                    return Some(SegmentEvent::SpeechResumed);
                }
                if decision.above_threshold {
                    // Raw level is back above threshold; refresh the grace
                    // period even though the attack debounce hasn't re-fired.
                    self.hangover_run = 0;
                    return None;
                }
                self.hangover_run += 1;
                if self.hangover_run >= self.hangover_frames {
                    return Some(self.close(CloseReason::Silence));
                }
                None
            }
        }
    }

    /// Drop any in-flight utterance and return to scanning. Used on stop
    /// requests and capture failures.
    pub fn abort(&mut self) -> bool {
        let was_active = !matches!(self.phase, SegmentPhase::Listening);
        self.phase = SegmentPhase::Listening;
        self.pre_roll.clear();
        self.active.clear();
        self.speech_ms = 0;
        self.hangover_run = 0;
        was_active
    }

    fn push_pre_roll(&mut self, frame: AudioFrame) {
        if self.pre_roll_capacity == 0 {
            return;
        }
        if self.pre_roll.len() == self.pre_roll_capacity {
            self.pre_roll.pop_front();
        }
        self.pre_roll.push_back(frame);
    }

    fn begin_utterance(&mut self, frame: AudioFrame, decision: &VadDecision) {
        debug_assert!(self.active.is_empty());
        self.active = self
            .pre_roll
            .drain(..)
            .map(|frame| ActiveFrame {
                frame,
                above: false,
            })
            .collect();
        self.active.push(ActiveFrame {
            frame,
            above: decision.above_threshold,
        });
        // The attack window that confirmed this onset was continuously above
        // threshold; credit it up front (its frames sit in the pre-roll).
        self.speech_ms = self.attack_ms;
        self.hangover_run = 0;
        self.phase = SegmentPhase::Recording;
        info!(
            pre_roll_frames = self.active.len().saturating_sub(1),
            "utterance started"
        );
    }

    fn push_active(&mut self, frame: AudioFrame, decision: &VadDecision) {
        if decision.above_threshold {
            self.speech_ms += self.frame_ms;
        }
        self.active.push(ActiveFrame {
            frame,
            above: decision.above_threshold,
        });
    }

    fn close(&mut self, reason: CloseReason) -> SegmentEvent {
        if matches!(reason, CloseReason::Silence) {
            self.trim_trailing_silence();
        }

        let speech_ms = self.speech_ms;
        let frame_count = self.active.len();
        let started_at = self
            .active
            .first()
            .map(|record| record.frame.captured_at)
            .unwrap_or_else(Instant::now);
        let ended_at = self
            .active
            .last()
            .map(|record| record.frame.captured_at + Duration::from_millis(self.frame_ms))
            .unwrap_or(started_at);

        let mut samples = Vec::new();
        let mut sample_rate = 0;
        for record in self.active.drain(..) {
            sample_rate = record.frame.sample_rate;
            samples.extend(record.frame.samples);
        }

        self.phase = SegmentPhase::Listening;
        self.speech_ms = 0;
        self.hangover_run = 0;

        let utterance = Utterance {
            samples,
            sample_rate,
            started_at,
            ended_at,
            speech_ms,
            close_reason: reason,
        };
        let duration_ms = utterance.duration_ms();

        if speech_ms < self.min_utterance_ms {
            info!(
                duration_ms,
                speech_ms,
                min_ms = self.min_utterance_ms,
                "utterance dropped: too short"
            );
            return SegmentEvent::Discarded {
                duration_ms,
                speech_ms,
            };
        }

        info!(
            reason = reason.label(),
            duration_ms,
            speech_ms,
            frames = frame_count,
            "utterance closed"
        );
        SegmentEvent::Completed(utterance)
    }

    /// After a silence close the buffer tail holds the full release + hangover
    /// run; keep only `hangover_ms` of it so the utterance ends a fixed grace
    /// period after the last audible speech.
    fn trim_trailing_silence(&mut self) {
        let trailing = self
            .active
            .iter()
            .rev()
            .take_while(|record| !record.above)
            .count();
        let excess = trailing.saturating_sub(self.hangover_frames);
        if excess > 0 {
            debug!(trimmed_frames = excess, "trimming trailing silence");
            self.active.truncate(self.active.len() - excess);
        }
    }
}

/// Drive VAD + segmentation over synthetic PCM without a capture device.
///
/// Frames are cut at the configured size and stamped with evenly spaced
/// timestamps. Used by acceptance tests and benchmarks.
pub fn segment_pcm(
    samples: &[f32],
    profile: &CalibrationProfile,
    cfg: &ListenerConfig,
) -> Vec<Utterance> {
    let frame_samples = cfg.frame_samples();
    let mut vad = AdaptiveVad::new(profile, cfg);
    let mut segmenter = Segmenter::new(cfg);
    let origin = Instant::now();
    let mut utterances = Vec::new();

    for (index, chunk) in samples.chunks(frame_samples).enumerate() {
        let mut data = chunk.to_vec();
        data.resize(frame_samples, 0.0);
        let frame = AudioFrame::new(
            data,
            cfg.sample_rate,
            origin + Duration::from_millis(index as u64 * cfg.frame_ms),
        );
        let decision = vad.process(&frame);
        if let Some(SegmentEvent::Completed(utterance)) = segmenter.push(frame, &decision) {
            utterances.push(utterance);
        }
    }
    utterances
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_MS: u64 = 10;

    fn test_config() -> ListenerConfig {
        ListenerConfig {
            sample_rate: 16_000,
            frame_ms: FRAME_MS,
            attack_ms: 120,
            release_ms: 350,
            hangover_ms: 200,
            pre_roll_ms: 300,
            min_utterance_ms: 300,
            max_utterance_ms: 8_000,
            ..ListenerConfig::default()
        }
    }

    fn test_profile() -> CalibrationProfile {
        CalibrationProfile {
            noise_floor: 0.01,
            threshold: 0.1,
        }
    }

    /// Constant-amplitude PCM: every sample carries `level` so frame RMS is
    /// exactly `level`.
    fn pcm(sections: &[(u64, f32)], cfg: &ListenerConfig) -> Vec<f32> {
        let per_ms = cfg.sample_rate as u64 / 1000;
        let mut out = Vec::new();
        for &(ms, level) in sections {
            out.extend(std::iter::repeat(level).take((ms * per_ms) as usize));
        }
        out
    }

    #[test]
    fn short_gap_joins_tones_into_one_utterance() {
        // 250ms of silence is shorter than the 350ms release, so the two
        // tones are one utterance; trailing silence long enough to close it.
        let cfg = test_config();
        let audio = pcm(
            &[
                (200, 0.0),
                (1_000, 0.5),
                (250, 0.0),
                (50, 0.5),
                (700, 0.0),
            ],
            &cfg,
        );
        let utterances = segment_pcm(&audio, &test_profile(), &cfg);
        assert_eq!(utterances.len(), 1, "250ms gap must not split the utterance");

        let utterance = &utterances[0];
        assert_eq!(utterance.close_reason, CloseReason::Silence);
        // Spans from the available pre-roll (the 200ms leading silence is
        // shorter than the 300ms window) through the second tone end plus the
        // 200ms hangover; the release tail is trimmed off.
        // start ~= 10ms (ring holds 30 frames; 20 leading silence + early
        // attack frames), end = 1500ms + 200ms.
        let expected_ms = 1_690;
        let got = utterance.duration_ms();
        assert!(
            (got as i64 - expected_ms).abs() <= 2 * FRAME_MS as i64,
            "expected ~{expected_ms}ms, got {got}ms"
        );
    }

    #[test]
    fn long_gap_splits_into_two_utterances() {
        let cfg = test_config();
        let audio = pcm(
            &[
                (300, 0.0),
                (1_000, 0.5),
                (700, 0.0),
                (500, 0.5),
                (700, 0.0),
            ],
            &cfg,
        );
        let utterances = segment_pcm(&audio, &test_profile(), &cfg);
        assert_eq!(
            utterances.len(),
            2,
            "gap beyond release+hangover must split utterances"
        );
        assert!(utterances
            .iter()
            .all(|u| u.close_reason == CloseReason::Silence));
    }

    #[test]
    fn burst_shorter_than_attack_never_triggers() {
        let cfg = test_config();
        let audio = pcm(&[(300, 0.0), (80, 0.5), (700, 0.0)], &cfg);
        let utterances = segment_pcm(&audio, &test_profile(), &cfg);
        assert!(utterances.is_empty(), "80ms burst is inside the 120ms attack");
    }

    #[test]
    fn utterance_with_too_little_speech_is_discarded() {
        let cfg = ListenerConfig {
            attack_ms: 40,
            min_utterance_ms: 300,
            ..test_config()
        };
        // 100ms of speech passes the attack but stays under the minimum.
        let audio = pcm(&[(300, 0.0), (100, 0.5), (700, 0.0)], &cfg);
        let utterances = segment_pcm(&audio, &test_profile(), &cfg);
        assert!(utterances.is_empty(), "sub-minimum utterance must not be emitted");
    }

    #[test]
    fn utterance_includes_pre_roll_window() {
        let cfg = test_config();
        // Plenty of leading silence so the ring is full at onset.
        let audio = pcm(&[(1_000, 0.0), (600, 0.5), (700, 0.0)], &cfg);
        let utterances = segment_pcm(&audio, &test_profile(), &cfg);
        assert_eq!(utterances.len(), 1);

        // The ring holds the 300ms behind the trigger point, and the trigger
        // sits one attack window (120ms) into the tone: 180ms of leading
        // silence + 600ms tone + 200ms hangover.
        let expected_ms = (300 - 120) + 600 + 200;
        let got = utterances[0].duration_ms();
        assert!(
            (got as i64 - expected_ms as i64).abs() <= 2 * FRAME_MS as i64,
            "expected ~{expected_ms}ms, got {got}ms"
        );
    }

    #[test]
    fn max_duration_force_closes_without_silence() {
        let cfg = ListenerConfig {
            max_utterance_ms: 500,
            min_utterance_ms: 100,
            pre_roll_ms: 0,
            ..test_config()
        };
        // Continuous tone, no silence at all.
        let audio = pcm(&[(2_000, 0.5)], &cfg);
        let utterances = segment_pcm(&audio, &test_profile(), &cfg);
        assert!(
            utterances.len() >= 2,
            "continuous speech should force-close repeatedly, got {}",
            utterances.len()
        );
        for utterance in &utterances {
            assert_eq!(utterance.close_reason, CloseReason::MaxDuration);
            assert!(
                utterance.duration_ms() <= cfg.max_utterance_ms,
                "active buffer must never exceed the maximum"
            );
        }
    }

    #[test]
    fn frames_stay_in_capture_order() {
        let cfg = ListenerConfig {
            pre_roll_ms: 50,
            min_utterance_ms: 100,
            attack_ms: 20,
            ..test_config()
        };
        // Ramp so every sample value encodes its position.
        let per_ms = cfg.sample_rate as u64 / 1000;
        let mut audio = vec![0.0f32; (300 * per_ms) as usize];
        let ramp_len = (600 * per_ms) as usize;
        audio.extend((0..ramp_len).map(|i| 0.3 + (i as f32 / ramp_len as f32) * 0.5));
        audio.extend(vec![0.0f32; (700 * per_ms) as usize]);

        let utterances = segment_pcm(&audio, &test_profile(), &cfg);
        assert_eq!(utterances.len(), 1);
        let samples = &utterances[0].samples;
        let ramp: Vec<f32> = samples.iter().copied().filter(|s| *s > 0.29).collect();
        assert!(
            ramp.windows(2).all(|pair| pair[0] <= pair[1]),
            "speech samples must keep capture order"
        );
    }

    #[test]
    fn abort_discards_in_flight_utterance() {
        let cfg = test_config();
        let profile = test_profile();
        let mut vad = AdaptiveVad::new(&profile, &cfg);
        let mut segmenter = Segmenter::new(&cfg);
        let origin = Instant::now();

        for index in 0..40u64 {
            let frame = AudioFrame::new(
                vec![0.5; cfg.frame_samples()],
                cfg.sample_rate,
                origin + Duration::from_millis(index * FRAME_MS),
            );
            let decision = vad.process(&frame);
            segmenter.push(frame, &decision);
        }
        assert_eq!(segmenter.phase(), SegmentPhase::Recording);
        assert!(segmenter.abort(), "an utterance was in progress");
        assert_eq!(segmenter.phase(), SegmentPhase::Listening);
        assert!(!segmenter.abort(), "second abort has nothing to discard");
    }

    #[test]
    fn hangover_expiry_emits_exactly_one_utterance() {
        let cfg = test_config();
        let audio = pcm(&[(400, 0.0), (800, 0.5), (1_000, 0.0)], &cfg);
        let utterances = segment_pcm(&audio, &test_profile(), &cfg);
        assert_eq!(utterances.len(), 1);
        let utterance = &utterances[0];
        assert!(utterance.duration_ms() >= 800, "must cover the speech span");
        assert!(utterance.speech_ms >= 700, "speech accounting too low");
    }
}
