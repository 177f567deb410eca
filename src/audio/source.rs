//! CPAL-backed capture source.
//!
//! Owns the input device and stream for the lifetime of a listener run. The
//! stream is built on the thread that reads frames (CPAL streams are not
//! `Send`), and releasing the handle on every exit path happens through
//! `Drop`.

use super::dispatch::FrameDispatcher;
use super::resample::resample_frame;
use super::AudioFrame;
use crate::config::ListenerConfig;
use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Which input device a listener run should capture from.
///
/// `None` means the host's default input. A selection persists across
/// restarts until explicitly changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSelection {
    pub name: Option<String>,
}

impl DeviceSelection {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("(default input)")
    }
}

/// What the control boundary sees when enumerating capture devices.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub default_sample_rate: u32,
    pub channels: u16,
}

/// Outcome of a single bounded frame read.
#[derive(Debug)]
pub enum FrameReadError {
    /// No frame arrived within one frame duration; transient.
    Timeout,
    /// The capture callback side is gone; the device failed mid-run.
    Disconnected,
}

pub struct AudioSource {
    stream: cpal::Stream,
    receiver: Receiver<Vec<f32>>,
    dropped: Arc<AtomicUsize>,
    device_name: String,
    device_rate: u32,
    target_rate: u32,
    frame_ms: u64,
    target_frame_samples: usize,
}

impl AudioSource {
    /// Enumerate capture devices for the control boundary.
    pub fn list_devices() -> Result<Vec<DeviceDescriptor>> {
        let host = cpal::default_host();
        let devices = host.input_devices().context("no input devices available")?;
        let mut found = Vec::new();
        for device in devices {
            let Ok(name) = device.name() else { continue };
            let Ok(config) = device.default_input_config() else {
                continue;
            };
            found.push(DeviceDescriptor {
                name,
                default_sample_rate: config.sample_rate().0,
                channels: config.channels(),
            });
        }
        Ok(found)
    }

    /// Check a selection without opening a stream: the device must exist,
    /// expose an input config, and use a sample format we can normalize.
    pub fn validate_selection(selection: &DeviceSelection) -> Result<DeviceDescriptor> {
        let device = find_device(selection)?;
        let name = device
            .name()
            .unwrap_or_else(|_| selection.label().to_string());
        let config = device
            .default_input_config()
            .with_context(|| format!("device '{name}' has no usable input config"))?;
        match config.sample_format() {
            SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16 => {}
            other => return Err(anyhow!("device '{name}' uses unsupported format {other:?}")),
        }
        Ok(DeviceDescriptor {
            name,
            default_sample_rate: config.sample_rate().0,
            channels: config.channels(),
        })
    }

    /// Open the selected device and start streaming frames.
    ///
    /// Frames come out of [`Self::read_frame`] already downmixed, resampled to
    /// the configured rate, and pinned to exactly one frame's worth of
    /// samples.
    pub fn open(selection: &DeviceSelection, cfg: &ListenerConfig) -> Result<Self> {
        let device = find_device(selection)?;
        let device_name = device
            .name()
            .unwrap_or_else(|_| "unknown input device".to_string());
        let default_config = device
            .default_input_config()
            .with_context(|| format!("failed to query input config for '{device_name}'"))?;
        let format = default_config.sample_format();
        let stream_config: StreamConfig = default_config.into();
        let device_rate = stream_config.sample_rate.0;
        let channels = usize::from(stream_config.channels.max(1));

        let frame_ms = cfg.frame_ms.clamp(5, 120);
        let device_frame_samples = ((u64::from(device_rate) * frame_ms) / 1000).max(1) as usize;
        let target_frame_samples =
            ((u64::from(cfg.sample_rate) * frame_ms) / 1000).max(1) as usize;

        let (sender, receiver) = bounded::<Vec<f32>>(cfg.channel_capacity.max(1));
        let dropped = Arc::new(AtomicUsize::new(0));
        let dispatcher = Arc::new(Mutex::new(FrameDispatcher::new(
            device_frame_samples,
            sender,
            dropped.clone(),
        )));

        debug!(
            device = %device_name,
            format = ?format,
            device_rate,
            channels,
            "opening capture stream"
        );

        let err_fn = |err| debug!("audio stream error: {err}");
        let stream = match format {
            SampleFormat::F32 => {
                let dispatcher = dispatcher.clone();
                let dropped = dropped.clone();
                device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _| {
                        if let Ok(mut pump) = dispatcher.try_lock() {
                            pump.push(data, channels, |sample| sample);
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    err_fn,
                    None,
                )?
            }
            SampleFormat::I16 => {
                let dispatcher = dispatcher.clone();
                let dropped = dropped.clone();
                device.build_input_stream(
                    &stream_config,
                    move |data: &[i16], _| {
                        if let Ok(mut pump) = dispatcher.try_lock() {
                            pump.push(data, channels, |sample| sample as f32 / 32_768.0);
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    err_fn,
                    None,
                )?
            }
            SampleFormat::U16 => {
                let dispatcher = dispatcher.clone();
                let dropped = dropped.clone();
                device.build_input_stream(
                    &stream_config,
                    move |data: &[u16], _| {
                        if let Ok(mut pump) = dispatcher.try_lock() {
                            pump.push(data, channels, |sample| {
                                (sample as f32 - 32_768.0) / 32_768.0
                            });
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    err_fn,
                    None,
                )?
            }
            other => return Err(anyhow!("unsupported sample format: {other:?}")),
        };

        stream.play().context("failed to start capture stream")?;

        Ok(Self {
            stream,
            receiver,
            dropped,
            device_name,
            device_rate,
            target_rate: cfg.sample_rate,
            frame_ms,
            target_frame_samples,
        })
    }

    /// Blocking read of the next frame, bounded by `timeout`. This is the only
    /// blocking call in the listener cycle.
    pub fn read_frame(&self, timeout: Duration) -> Result<AudioFrame, FrameReadError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(frame) => {
                let samples = resample_frame(
                    frame,
                    self.device_rate,
                    self.target_rate,
                    self.target_frame_samples,
                );
                Ok(AudioFrame::new(samples, self.target_rate, Instant::now()))
            }
            Err(RecvTimeoutError::Timeout) => Err(FrameReadError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(FrameReadError::Disconnected),
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_ms)
    }

    /// Frames lost to channel overflow since the stream opened.
    pub fn frames_dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for AudioSource {
    fn drop(&mut self) {
        if let Err(err) = self.stream.pause() {
            debug!("failed to pause capture stream: {err}");
        }
    }
}

fn find_device(selection: &DeviceSelection) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match &selection.name {
        Some(name) => {
            let mut devices = host.input_devices().context("no input devices available")?;
            devices
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| anyhow!("input device '{name}' not found"))
        }
        None => host
            .default_input_device()
            .context("no default input device available"),
    }
}
