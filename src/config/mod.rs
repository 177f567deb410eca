//! Command-line parsing and the listener configuration surface.

#[cfg(test)]
mod tests;
mod validation;

use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;
pub const DEFAULT_FRAME_MS: u64 = 20;
pub const DEFAULT_CALIBRATION_MS: u64 = 1_500;
pub const DEFAULT_CALIBRATION_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_THRESHOLD_MULT: f32 = 3.0;
pub const DEFAULT_THRESHOLD_ABS: f32 = 0.006;
pub const DEFAULT_FLOOR_MIN: f32 = 0.000_6;
pub const DEFAULT_FLOOR_MAX: f32 = 0.12;
pub const DEFAULT_ATTACK_MS: u64 = 120;
pub const DEFAULT_RELEASE_MS: u64 = 350;
pub const DEFAULT_HANGOVER_MS: u64 = 200;
pub const DEFAULT_PRE_ROLL_MS: u64 = 300;
pub const DEFAULT_MIN_UTTERANCE_MS: u64 = 250;
pub const DEFAULT_MAX_UTTERANCE_MS: u64 = 30_000;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2_000;

/// Hard ceiling on a single utterance so a stuck VAD cannot grow the active
/// buffer without bound.
pub const MAX_UTTERANCE_HARD_LIMIT_MS: u64 = 120_000;

/// CLI options for the voicegate listener. Validated values keep the capture
/// loop and downstream consumers safe.
#[derive(Debug, Parser, Clone)]
#[command(about = "Adaptive-VAD voice listener", author, version)]
pub struct AppConfig {
    /// Preferred audio input device name (default input device when omitted)
    #[arg(long)]
    pub input_device: Option<String>,

    /// Print detected audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// Directory where finished utterances are written as WAV files
    #[arg(long = "dump-dir")]
    pub dump_dir: Option<PathBuf>,

    /// Peak-normalize dumped utterances to this dBFS (e.g. -3.0)
    #[arg(long = "normalize-dbfs", allow_negative_numbers = true)]
    pub normalize_dbfs: Option<f32>,

    /// Do not start the listener on launch; wait for a start command
    #[arg(long = "no-autostart", default_value_t = false)]
    pub no_autostart: bool,

    /// Log level for stderr tracing output
    #[arg(long = "log-level", env = "VOICEGATE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Target sample rate for the capture pipeline (Hz)
    #[arg(long = "sample-rate", default_value_t = DEFAULT_SAMPLE_RATE)]
    pub sample_rate: u32,

    /// Frame size for VAD decisions (milliseconds)
    #[arg(long = "frame-ms", default_value_t = DEFAULT_FRAME_MS)]
    pub frame_ms: u64,

    /// Noise-floor calibration window (milliseconds)
    #[arg(long = "calibration-ms", default_value_t = DEFAULT_CALIBRATION_MS)]
    pub calibration_ms: u64,

    /// Give up on calibration if no frames arrive within this long (milliseconds)
    #[arg(long = "calibration-timeout-ms", default_value_t = DEFAULT_CALIBRATION_TIMEOUT_MS)]
    pub calibration_timeout_ms: u64,

    /// Trigger threshold as a multiple of the calibrated noise floor
    #[arg(long = "threshold-mult", default_value_t = DEFAULT_THRESHOLD_MULT)]
    pub threshold_mult: f32,

    /// Absolute RMS guardrail for the trigger threshold (full-scale units)
    #[arg(long = "threshold-abs", default_value_t = DEFAULT_THRESHOLD_ABS)]
    pub threshold_abs: f32,

    /// Lower clamp applied to the calibrated noise floor
    #[arg(long = "floor-min", default_value_t = DEFAULT_FLOOR_MIN)]
    pub floor_min: f32,

    /// Upper clamp applied to the calibrated noise floor
    #[arg(long = "floor-max", default_value_t = DEFAULT_FLOOR_MAX)]
    pub floor_max: f32,

    /// Time above threshold before speech onset is accepted (milliseconds)
    #[arg(long = "attack-ms", default_value_t = DEFAULT_ATTACK_MS)]
    pub attack_ms: u64,

    /// Time below threshold before speech end is accepted (milliseconds)
    #[arg(long = "release-ms", default_value_t = DEFAULT_RELEASE_MS)]
    pub release_ms: u64,

    /// Grace period after speech appears to end (milliseconds)
    #[arg(long = "hangover-ms", default_value_t = DEFAULT_HANGOVER_MS)]
    pub hangover_ms: u64,

    /// Audio retained ahead of speech onset (milliseconds)
    #[arg(long = "pre-roll-ms", default_value_t = DEFAULT_PRE_ROLL_MS)]
    pub pre_roll_ms: u64,

    /// Discard utterances with less speech than this (milliseconds)
    #[arg(long = "min-utterance-ms", default_value_t = DEFAULT_MIN_UTTERANCE_MS)]
    pub min_utterance_ms: u64,

    /// Force-close utterances that reach this length (milliseconds)
    #[arg(long = "max-utterance-ms", default_value_t = DEFAULT_MAX_UTTERANCE_MS)]
    pub max_utterance_ms: u64,

    /// Frame channel capacity between the capture callback and the loop
    #[arg(long = "channel-capacity", default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,

    /// How long shutdown waits for the loop before the failsafe fires (milliseconds)
    #[arg(long = "shutdown-grace-ms", default_value_t = DEFAULT_SHUTDOWN_GRACE_MS)]
    pub shutdown_grace_ms: u64,

    /// Disable spoken shutdown-intent detection on pipeline transcripts
    #[arg(long = "no-voice-shutdown", default_value_t = false)]
    pub no_voice_shutdown: bool,

    /// Require a spoken confirmation before a shutdown intent is honored
    #[arg(long = "voice-shutdown-confirm", default_value_t = false)]
    pub voice_shutdown_confirm: bool,
}

/// Tunable parameters consumed by the capture loop, VAD, and segmenter.
///
/// This is the plain value struct handed across the crate; the CLI layer above
/// it is one producer, not the only one.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub sample_rate: u32,
    pub frame_ms: u64,
    pub calibration_ms: u64,
    pub calibration_timeout_ms: u64,
    pub threshold_mult: f32,
    pub threshold_abs: f32,
    pub floor_min: f32,
    pub floor_max: f32,
    pub attack_ms: u64,
    pub release_ms: u64,
    pub hangover_ms: u64,
    pub pre_roll_ms: u64,
    pub min_utterance_ms: u64,
    pub max_utterance_ms: u64,
    pub channel_capacity: usize,
    pub shutdown_grace_ms: u64,
    pub voice_shutdown_enabled: bool,
    pub voice_shutdown_confirm: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_ms: DEFAULT_FRAME_MS,
            calibration_ms: DEFAULT_CALIBRATION_MS,
            calibration_timeout_ms: DEFAULT_CALIBRATION_TIMEOUT_MS,
            threshold_mult: DEFAULT_THRESHOLD_MULT,
            threshold_abs: DEFAULT_THRESHOLD_ABS,
            floor_min: DEFAULT_FLOOR_MIN,
            floor_max: DEFAULT_FLOOR_MAX,
            attack_ms: DEFAULT_ATTACK_MS,
            release_ms: DEFAULT_RELEASE_MS,
            hangover_ms: DEFAULT_HANGOVER_MS,
            pre_roll_ms: DEFAULT_PRE_ROLL_MS,
            min_utterance_ms: DEFAULT_MIN_UTTERANCE_MS,
            max_utterance_ms: DEFAULT_MAX_UTTERANCE_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            voice_shutdown_enabled: true,
            voice_shutdown_confirm: false,
        }
    }
}

impl ListenerConfig {
    /// Samples per frame at the target rate.
    pub fn frame_samples(&self) -> usize {
        ((u64::from(self.sample_rate) * self.frame_ms) / 1000).max(1) as usize
    }

    /// Convert a millisecond duration into a frame count, rounding down but
    /// never below one frame.
    pub fn frames_for(&self, ms: u64) -> usize {
        (ms / self.frame_ms.max(1)).max(1) as usize
    }

    /// Pre-roll ring capacity in frames. Unlike [`Self::frames_for`] this may
    /// be zero: a zero pre-roll disables leading-edge buffering entirely.
    pub fn pre_roll_frames(&self) -> usize {
        (self.pre_roll_ms / self.frame_ms.max(1)) as usize
    }
}
