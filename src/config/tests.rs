use super::{AppConfig, ListenerConfig};
use clap::Parser;

fn parsed(args: &[&str]) -> AppConfig {
    let mut full = vec!["test-app"];
    full.extend_from_slice(args);
    AppConfig::parse_from(full)
}

#[test]
fn defaults_pass_validation() {
    let mut cfg = parsed(&[]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn rejects_sample_rate_out_of_bounds() {
    let mut cfg = parsed(&["--sample-rate", "4000"]);
    assert!(cfg.validate().is_err());

    let mut cfg = parsed(&["--sample-rate", "192000"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn accepts_sample_rate_bounds() {
    let mut cfg = parsed(&["--sample-rate", "8000"]);
    assert!(cfg.validate().is_ok());

    let mut cfg = parsed(&["--sample-rate", "96000"]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn rejects_frame_ms_out_of_bounds() {
    let mut cfg = parsed(&["--frame-ms", "4"]);
    assert!(cfg.validate().is_err());

    let mut cfg = parsed(&["--frame-ms", "121"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_calibration_timeout_below_window() {
    let mut cfg = parsed(&["--calibration-ms", "2000", "--calibration-timeout-ms", "1000"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_nonpositive_absolute_threshold() {
    let mut cfg = parsed(&["--threshold-abs", "0.0"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_floor_clamp_inversion() {
    let mut cfg = parsed(&["--floor-min", "0.5", "--floor-max", "0.1"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_min_utterance_at_or_above_max() {
    let mut cfg = parsed(&["--min-utterance-ms", "5000", "--max-utterance-ms", "5000"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_oversized_max_utterance() {
    let mut cfg = parsed(&["--max-utterance-ms", "200000"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_normalize_dbfs_out_of_range() {
    let mut cfg = parsed(&["--normalize-dbfs", "-70"]);
    assert!(cfg.validate().is_err());

    let mut cfg = parsed(&["--normalize-dbfs", "1.0"]);
    assert!(cfg.validate().is_err());

    let mut cfg = parsed(&["--normalize-dbfs", "-3.0"]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn rejects_unknown_log_level() {
    let mut cfg = parsed(&["--log-level", "loud"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn normalizes_log_level_case() {
    let mut cfg = parsed(&["--log-level", "DEBUG"]);
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.log_level, "debug");
}

#[test]
fn rejects_blank_device_name() {
    let mut cfg = parsed(&["--input-device", "  "]);
    assert!(cfg.validate().is_err());
}

#[test]
fn listener_config_mirrors_cli_values() {
    let mut cfg = parsed(&[
        "--attack-ms",
        "100",
        "--release-ms",
        "400",
        "--hangover-ms",
        "250",
        "--pre-roll-ms",
        "200",
        "--no-voice-shutdown",
    ]);
    cfg.validate().expect("values should be valid");
    let listener = cfg.listener_config();
    assert_eq!(listener.attack_ms, 100);
    assert_eq!(listener.release_ms, 400);
    assert_eq!(listener.hangover_ms, 250);
    assert_eq!(listener.pre_roll_ms, 200);
    assert!(!listener.voice_shutdown_enabled);
}

#[test]
fn frame_conversions_round_down_but_not_to_zero() {
    let cfg = ListenerConfig {
        frame_ms: 20,
        sample_rate: 16_000,
        ..ListenerConfig::default()
    };
    assert_eq!(cfg.frame_samples(), 320);
    assert_eq!(cfg.frames_for(120), 6);
    assert_eq!(cfg.frames_for(10), 1);
    assert_eq!(cfg.pre_roll_frames(), 15);

    let no_pre_roll = ListenerConfig {
        pre_roll_ms: 0,
        ..cfg
    };
    assert_eq!(no_pre_roll.pre_roll_frames(), 0);
}
