use super::{AppConfig, ListenerConfig, MAX_UTTERANCE_HARD_LIMIT_MS};
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and normalize paths.
    pub fn validate(&mut self) -> Result<()> {
        if !(8_000..=96_000).contains(&self.sample_rate) {
            bail!(
                "--sample-rate must be between 8000 and 96000 Hz, got {}",
                self.sample_rate
            );
        }
        if !(5..=120).contains(&self.frame_ms) {
            bail!("--frame-ms must be between 5 and 120, got {}", self.frame_ms);
        }
        if !(100..=10_000).contains(&self.calibration_ms) {
            bail!(
                "--calibration-ms must be between 100 and 10000, got {}",
                self.calibration_ms
            );
        }
        if self.calibration_timeout_ms < self.calibration_ms
            || self.calibration_timeout_ms > 60_000
        {
            bail!(
                "--calibration-timeout-ms must be between --calibration-ms ({}) and 60000",
                self.calibration_ms
            );
        }
        if !(1.0..=100.0).contains(&self.threshold_mult) {
            bail!(
                "--threshold-mult must be between 1.0 and 100.0, got {}",
                self.threshold_mult
            );
        }
        if !(self.threshold_abs > 0.0 && self.threshold_abs <= 1.0) {
            bail!(
                "--threshold-abs must be in (0.0, 1.0] full-scale RMS, got {}",
                self.threshold_abs
            );
        }
        if !(self.floor_min > 0.0 && self.floor_min < self.floor_max) {
            bail!(
                "--floor-min must be positive and below --floor-max ({}), got {}",
                self.floor_max,
                self.floor_min
            );
        }
        if self.floor_max > 1.0 {
            bail!("--floor-max must be at most 1.0, got {}", self.floor_max);
        }
        if !(10..=2_000).contains(&self.attack_ms) {
            bail!("--attack-ms must be between 10 and 2000, got {}", self.attack_ms);
        }
        if !(50..=5_000).contains(&self.release_ms) {
            bail!("--release-ms must be between 50 and 5000, got {}", self.release_ms);
        }
        if self.hangover_ms > 5_000 {
            bail!("--hangover-ms must be at most 5000, got {}", self.hangover_ms);
        }
        if self.pre_roll_ms > 5_000 {
            bail!("--pre-roll-ms must be at most 5000, got {}", self.pre_roll_ms);
        }
        if self.max_utterance_ms == 0 || self.max_utterance_ms > MAX_UTTERANCE_HARD_LIMIT_MS {
            bail!(
                "--max-utterance-ms must be between 1 and {MAX_UTTERANCE_HARD_LIMIT_MS}, got {}",
                self.max_utterance_ms
            );
        }
        if self.min_utterance_ms >= self.max_utterance_ms {
            bail!(
                "--min-utterance-ms ({}) must be below --max-utterance-ms ({})",
                self.min_utterance_ms,
                self.max_utterance_ms
            );
        }
        if !(8..=1024).contains(&self.channel_capacity) {
            bail!(
                "--channel-capacity must be between 8 and 1024, got {}",
                self.channel_capacity
            );
        }
        if !(100..=30_000).contains(&self.shutdown_grace_ms) {
            bail!(
                "--shutdown-grace-ms must be between 100 and 30000, got {}",
                self.shutdown_grace_ms
            );
        }

        if let Some(dbfs) = self.normalize_dbfs {
            if !(-60.0..=0.0).contains(&dbfs) {
                bail!("--normalize-dbfs must be between -60.0 and 0.0, got {dbfs}");
            }
        }

        let level = self.log_level.trim().to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            bail!(
                "--log-level must be one of {LOG_LEVELS:?}, got '{}'",
                self.log_level
            );
        }
        self.log_level = level;

        if let Some(dir) = &mut self.dump_dir {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create dump dir '{}'", dir.display()))?;
            *dir = dir
                .canonicalize()
                .with_context(|| format!("failed to canonicalize dump dir '{}'", dir.display()))?;
        }

        if let Some(device) = &self.input_device {
            if device.trim().is_empty() {
                bail!("--input-device must not be blank");
            }
            if device.len() > 256 || device.chars().any(|ch| matches!(ch, '\n' | '\r')) {
                bail!("--input-device must be <=256 characters with no control characters");
            }
        }

        Ok(())
    }

    /// Snapshot the CLI-controlled listener settings for the capture loop.
    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            sample_rate: self.sample_rate,
            frame_ms: self.frame_ms,
            calibration_ms: self.calibration_ms,
            calibration_timeout_ms: self.calibration_timeout_ms,
            threshold_mult: self.threshold_mult,
            threshold_abs: self.threshold_abs,
            floor_min: self.floor_min,
            floor_max: self.floor_max,
            attack_ms: self.attack_ms,
            release_ms: self.release_ms,
            hangover_ms: self.hangover_ms,
            pre_roll_ms: self.pre_roll_ms,
            min_utterance_ms: self.min_utterance_ms,
            max_utterance_ms: self.max_utterance_ms,
            channel_capacity: self.channel_capacity,
            shutdown_grace_ms: self.shutdown_grace_ms,
            voice_shutdown_enabled: !self.no_voice_shutdown,
            voice_shutdown_confirm: self.voice_shutdown_confirm,
        }
    }
}
