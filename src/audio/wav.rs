//! WAV persistence for finished utterances.
//!
//! Writes 16-bit mono PCM with an optional peak normalization to a target
//! dBFS so quiet captures stay audible when played back.

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs;
use std::path::Path;

/// Write mono f32 samples as an i16 WAV file.
///
/// `normalize_dbfs` scales the signal so its peak lands at the given dBFS
/// (e.g. `-3.0`); `None` writes the samples as-is.
pub fn write_wav_int16_mono(
    path: &Path,
    samples: &[f32],
    sample_rate: u32,
    normalize_dbfs: Option<f32>,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create '{}'", parent.display()))?;
        }
    }

    let gain = match normalize_dbfs {
        Some(target_dbfs) => peak_gain(samples, target_dbfs),
        None => 1.0,
    };

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("failed to create '{}'", path.display()))?;
    for &sample in samples {
        let scaled = (sample * gain * 32_767.0).clamp(-32_768.0, 32_767.0);
        writer.write_sample(scaled as i16)?;
    }
    writer
        .finalize()
        .with_context(|| format!("failed to finalize '{}'", path.display()))?;
    Ok(())
}

/// Gain that places the signal peak at `target_dbfs`; unity for silence.
fn peak_gain(samples: &[f32], target_dbfs: f32) -> f32 {
    let peak = samples.iter().map(|s| s.abs()).fold(0.0_f32, f32::max);
    if peak == 0.0 {
        return 1.0;
    }
    let target_linear = 10.0_f32.powf(target_dbfs / 20.0);
    target_linear / peak
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn temp_wav(name: &str) -> std::path::PathBuf {
        env::temp_dir().join(format!("voicegate-test-{name}.wav"))
    }

    #[test]
    fn writes_readable_wav() {
        let path = temp_wav("plain");
        let samples: Vec<f32> = (0..1600).map(|i| (i as f32 * 0.01).sin() * 0.25).collect();
        write_wav_int16_mono(&path, &samples, 16_000, None).expect("write should succeed");

        let reader = hound::WavReader::open(&path).expect("file should be readable");
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.len() as usize, samples.len());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn normalization_moves_peak_to_target() {
        let path = temp_wav("normalized");
        let samples = vec![0.0, 0.1, -0.1, 0.05];
        write_wav_int16_mono(&path, &samples, 16_000, Some(-3.0)).expect("write should succeed");

        let reader = hound::WavReader::open(&path).expect("file should be readable");
        let peak = reader
            .into_samples::<i16>()
            .map(|s| s.unwrap().unsigned_abs())
            .max()
            .unwrap_or(0);
        let expected = (32_767.0 * 10.0_f32.powf(-3.0 / 20.0)) as u16;
        assert!(
            (i32::from(peak) - i32::from(expected)).abs() <= 1,
            "peak {peak} should sit near {expected}"
        );
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn silence_is_written_unscaled() {
        let path = temp_wav("silence");
        write_wav_int16_mono(&path, &[0.0; 64], 16_000, Some(-3.0)).expect("write should succeed");
        let reader = hound::WavReader::open(&path).expect("file should be readable");
        assert!(reader.into_samples::<i16>().all(|s| s.unwrap() == 0));
        let _ = fs::remove_file(&path);
    }
}
