//! Noise-floor calibration.
//!
//! Consumes the first `calibration_ms` of frames after a listener starts and
//! derives the trigger threshold from a robust amplitude statistic. Runs once
//! per start (and again after a device change); the resulting profile is
//! immutable until the next calibration.

use crate::audio::AudioFrame;
use crate::config::ListenerConfig;
use tracing::info;

/// Result of a calibration pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationProfile {
    /// Clamped ambient RMS estimate (full-scale units).
    pub noise_floor: f32,
    /// Trigger threshold: `max(noise_floor * threshold_mult, threshold_abs)`.
    /// Always positive because `threshold_abs` is validated positive.
    pub threshold: f32,
}

impl CalibrationProfile {
    /// Derive a profile from a raw floor estimate, applying the configured
    /// clamp and threshold rule.
    pub fn from_floor(raw_floor: f32, cfg: &ListenerConfig) -> Self {
        let noise_floor = raw_floor.clamp(cfg.floor_min, cfg.floor_max);
        let threshold = (noise_floor * cfg.threshold_mult).max(cfg.threshold_abs);
        Self {
            noise_floor,
            threshold,
        }
    }
}

/// Accumulates frame RMS values until the calibration window is covered.
pub struct Calibrator {
    needed_frames: usize,
    window: Vec<f32>,
    cfg: ListenerConfig,
}

impl Calibrator {
    pub fn new(cfg: &ListenerConfig) -> Self {
        Self {
            needed_frames: cfg.frames_for(cfg.calibration_ms),
            window: Vec::new(),
            cfg: cfg.clone(),
        }
    }

    /// Feed one frame. Returns the finished profile once the window is full.
    pub fn observe(&mut self, frame: &AudioFrame) -> Option<CalibrationProfile> {
        self.window.push(frame.rms());
        if self.window.len() < self.needed_frames {
            return None;
        }
        Some(self.finish())
    }

    pub fn frames_observed(&self) -> usize {
        self.window.len()
    }

    fn finish(&self) -> CalibrationProfile {
        // Low percentile rather than mean: keeps stray door slams and clicks
        // during the calibration window from inflating the floor.
        let p10 = percentile(&self.window, 0.10);
        let profile = CalibrationProfile::from_floor(p10, &self.cfg);
        let p90 = percentile(&self.window, 0.90);
        info!(
            floor = profile.noise_floor,
            threshold = profile.threshold,
            p10,
            p90,
            frames = self.window.len(),
            "noise floor calibrated"
        );
        profile
    }
}

/// Nearest-rank percentile over an unsorted window; zero for empty input.
fn percentile(values: &[f32], q: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = ((sorted.len() - 1) as f32 * q).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn frame_with_rms(rms: f32, cfg: &ListenerConfig) -> AudioFrame {
        AudioFrame::new(
            vec![rms; cfg.frame_samples()],
            cfg.sample_rate,
            Instant::now(),
        )
    }

    fn test_config() -> ListenerConfig {
        ListenerConfig {
            calibration_ms: 200,
            frame_ms: 20,
            ..ListenerConfig::default()
        }
    }

    #[test]
    fn threshold_follows_max_rule() {
        let cfg = test_config();
        // Floor high enough that the multiple dominates the absolute guardrail.
        let profile = CalibrationProfile::from_floor(0.05, &cfg);
        assert!((profile.threshold - 0.15).abs() < 1e-6);

        // Tiny floor: the absolute guardrail wins.
        let profile = CalibrationProfile::from_floor(0.001, &cfg);
        assert_eq!(profile.threshold, cfg.threshold_abs);
    }

    #[test]
    fn threshold_is_always_positive() {
        let cfg = test_config();
        let profile = CalibrationProfile::from_floor(0.0, &cfg);
        assert!(profile.threshold > 0.0);
    }

    #[test]
    fn floor_is_clamped_to_configured_range() {
        let cfg = test_config();
        assert_eq!(
            CalibrationProfile::from_floor(0.0, &cfg).noise_floor,
            cfg.floor_min
        );
        assert_eq!(
            CalibrationProfile::from_floor(10.0, &cfg).noise_floor,
            cfg.floor_max
        );
    }

    #[test]
    fn completes_after_configured_window() {
        let cfg = test_config();
        let mut calibrator = Calibrator::new(&cfg);
        // 200ms / 20ms = 10 frames
        for _ in 0..9 {
            assert!(calibrator.observe(&frame_with_rms(0.01, &cfg)).is_none());
        }
        let profile = calibrator
            .observe(&frame_with_rms(0.01, &cfg))
            .expect("window should be complete");
        assert!((profile.noise_floor - 0.01).abs() < 1e-3);
    }

    #[test]
    fn low_percentile_ignores_bursts_in_window() {
        let cfg = test_config();
        let mut calibrator = Calibrator::new(&cfg);
        let mut profile = None;
        for i in 0..10 {
            // One loud outlier among quiet frames.
            let rms = if i == 4 { 0.9 } else { 0.01 };
            profile = calibrator.observe(&frame_with_rms(rms, &cfg));
        }
        let profile = profile.expect("window should be complete");
        assert!(
            profile.noise_floor < 0.02,
            "burst should not drag the floor up, got {}",
            profile.noise_floor
        );
    }
}
