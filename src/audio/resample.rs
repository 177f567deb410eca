//! Sample-rate conversion between the device's native rate and the pipeline
//! target rate.
//!
//! The default path is a windowed-sinc FIR low-pass (when decimating)
//! followed by linear interpolation; the `high-quality-audio` feature swaps
//! in a rubato sinc resampler and keeps the basic path as a fallback.

#[cfg(feature = "high-quality-audio")]
use anyhow::{anyhow, Result};
#[cfg(feature = "high-quality-audio")]
use rubato::{InterpolationParameters, InterpolationType, Resampler, SincFixedIn, WindowFunction};
use std::cmp::Ordering as CmpOrdering;
use std::f32::consts::PI;
#[cfg(feature = "high-quality-audio")]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "high-quality-audio")]
use tracing::warn;

// Practical rate bounds; ratios outside ~0.01x..8x are treated as bad input.
const MIN_DEVICE_RATE: u32 = 2_000;
const MAX_DEVICE_RATE: u32 = 1_600_000;
const MAX_FIR_TAPS: usize = 129;

#[cfg(feature = "high-quality-audio")]
static FALLBACK_WARNED: AtomicBool = AtomicBool::new(false);

/// Convert `input` from `device_rate` to `target_rate`. Returns the input
/// unchanged on degenerate rates so callers never have to special-case.
pub(super) fn resample(input: &[f32], device_rate: u32, target_rate: u32) -> Vec<f32> {
    if input.is_empty() || device_rate == 0 || target_rate == 0 || device_rate == target_rate {
        return input.to_vec();
    }

    #[cfg(feature = "high-quality-audio")]
    {
        match sinc_resample(input, device_rate, target_rate) {
            Ok(output) => output,
            Err(err) => {
                if !FALLBACK_WARNED.swap(true, Ordering::AcqRel) {
                    warn!("high-quality resampler failed ({err}); using basic path");
                }
                fir_linear_resample(input, device_rate, target_rate)
            }
        }
    }

    #[cfg(not(feature = "high-quality-audio"))]
    {
        fir_linear_resample(input, device_rate, target_rate)
    }
}

/// Resample a single dispatched frame and pin it to the expected length so
/// every frame the VAD sees has identical duration.
pub(super) fn resample_frame(
    frame: Vec<f32>,
    device_rate: u32,
    target_rate: u32,
    desired_len: usize,
) -> Vec<f32> {
    if device_rate == target_rate {
        return pin_length(frame, desired_len);
    }
    pin_length(resample(&frame, device_rate, target_rate), desired_len)
}

fn pin_length(mut data: Vec<f32>, desired: usize) -> Vec<f32> {
    match data.len().cmp(&desired) {
        CmpOrdering::Greater => data.truncate(desired),
        CmpOrdering::Less => {
            let pad = *data.last().unwrap_or(&0.0);
            data.resize(desired, pad);
        }
        CmpOrdering::Equal => {}
    }
    data
}

#[cfg(feature = "high-quality-audio")]
fn sinc_resample(input: &[f32], device_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    if !(MIN_DEVICE_RATE..=MAX_DEVICE_RATE).contains(&device_rate) {
        return Err(anyhow!("unsupported device sample rate {device_rate}Hz"));
    }
    let ratio = f64::from(target_rate) / f64::from(device_rate);

    let chunk = 256usize;
    let params = InterpolationParameters {
        sinc_len: 64,
        f_cutoff: 0.90,
        interpolation: InterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut sinc = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk, 1)
        .map_err(|e| anyhow!("failed to construct sinc resampler: {e:?}"))?;

    let expect = ((input.len() as f64) * ratio).round().max(1.0) as usize;
    let mut out = Vec::with_capacity(expect + 8);

    let mut seg = vec![0.0f32; chunk];
    let mut idx = 0usize;
    while idx < input.len() {
        let end = (idx + chunk).min(input.len());
        let len = end - idx;
        // Pad the final partial chunk with its own last sample.
        let pad = input[end - 1];
        seg.fill(pad);
        seg[..len].copy_from_slice(&input[idx..end]);
        let produced = sinc
            .process(std::slice::from_ref(&seg), None)
            .map_err(|e| anyhow!("resampler process failed: {e:?}"))?;
        out.extend_from_slice(&produced[0]);
        idx = end;
    }

    Ok(pin_length(out, expect))
}

fn fir_linear_resample(input: &[f32], device_rate: u32, target_rate: u32) -> Vec<f32> {
    if !(MIN_DEVICE_RATE..=MAX_DEVICE_RATE).contains(&device_rate) {
        return input.to_vec();
    }
    let ratio = target_rate as f32 / device_rate as f32;
    let filtered = if device_rate > target_rate {
        // Low-pass below the target Nyquist before dropping samples.
        let taps = decimation_taps(device_rate, target_rate);
        fir_low_pass(input, device_rate, target_rate, taps)
    } else {
        input.to_vec()
    };
    linear_interpolate(&filtered, ratio)
}

/// Linear interpolation; good enough for speech frames where latency matters
/// more than phase accuracy.
fn linear_interpolate(input: &[f32], ratio: f32) -> Vec<f32> {
    let output_len = (input.len() as f32 * ratio).round() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src = i as f32 / ratio;
        let idx = src.floor() as usize;
        let frac = src - idx as f32;
        if idx + 1 < input.len() {
            output.push(input[idx] * (1.0 - frac) + input[idx + 1] * frac);
        } else {
            output.push(input.last().copied().unwrap_or(0.0));
        }
    }
    output
}

/// Tap count scaled with the decimation ratio, kept odd and bounded.
fn decimation_taps(device_rate: u32, target_rate: u32) -> usize {
    let ratio = device_rate as f32 / target_rate.max(1) as f32;
    let mut taps = (ratio * 4.0).ceil().max(11.0) as usize;
    if taps % 2 == 0 {
        taps += 1;
    }
    taps.min(MAX_FIR_TAPS)
}

fn fir_low_pass(input: &[f32], device_rate: u32, target_rate: u32, taps: usize) -> Vec<f32> {
    if input.is_empty() || taps <= 1 {
        return input.to_vec();
    }

    let cutoff = (target_rate as f32 * 0.5 / device_rate as f32).min(0.499);
    let coeffs = hamming_sinc_taps(cutoff, taps);
    let half = taps / 2;
    let mut output = Vec::with_capacity(input.len());

    for n in 0..input.len() {
        let mut acc = 0.0;
        for (k, coeff) in coeffs.iter().enumerate() {
            if let Some(idx) = (n + k).checked_sub(half) {
                if let Some(sample) = input.get(idx) {
                    acc += *sample * coeff;
                }
            }
        }
        output.push(acc);
    }
    output
}

/// Normalized Hamming-windowed sinc kernel.
fn hamming_sinc_taps(normalized_cutoff: f32, taps: usize) -> Vec<f32> {
    let mut coeffs = Vec::with_capacity(taps);
    let m = (taps - 1) as f32;

    for n in 0..taps {
        let centered = n as f32 - m / 2.0;
        let x = 2.0 * PI * normalized_cutoff * centered;
        let sinc = if centered == 0.0 {
            2.0 * normalized_cutoff
        } else {
            (2.0 * normalized_cutoff * x.sin()) / x
        };
        let window = if taps <= 1 {
            1.0
        } else {
            0.54 - 0.46 * ((2.0 * PI * n as f32) / m).cos()
        };
        coeffs.push(sinc * window);
    }

    let sum: f32 = coeffs.iter().sum();
    if sum != 0.0 {
        for coeff in coeffs.iter_mut() {
            *coeff /= sum;
        }
    }
    coeffs
}
