//! The background listener loop.
//!
//! One dedicated thread drives the whole cycle: read a frame, classify it,
//! feed the segmenter, and hand each finished utterance to the pipeline port
//! synchronously. The controller talks to the loop only through the stop flag
//! (checked once per frame) and reads state only through published snapshots.

use crate::audio::{AudioSource, DeviceSelection, FrameReadError};
use crate::config::ListenerConfig;
use crate::error::ListenerError;
use crate::listener::intents::{intent_confirm, intent_shutdown, CONFIRM_WINDOW};
use crate::listener::live::{epoch_ms, LiveState, ResultSummary, SnapshotWriter, UtteranceSummary};
use crate::listener::ListenerState;
use crate::pipeline::UtterancePipeline;
use crate::vad::{AdaptiveVad, Calibrator, SegmentEvent, Segmenter, Utterance};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// How long reads may keep timing out before the device is declared dead.
const CAPTURE_STALL_MS: u64 = 2_000;

pub(crate) struct WorkerContext {
    pub cfg: ListenerConfig,
    pub selection: DeviceSelection,
    pub pipeline: Arc<Mutex<Box<dyn UtterancePipeline>>>,
    pub live: Arc<LiveState>,
    pub stop: Arc<AtomicBool>,
}

/// Thread entry point. Sends exactly one message on `ready`: the device name
/// once the source is open, or the open error.
pub(crate) fn run_listener(ctx: WorkerContext, ready: Sender<Result<String, String>>) {
    let source = match AudioSource::open(&ctx.selection, &ctx.cfg) {
        Ok(source) => {
            let _ = ready.send(Ok(source.device_name().to_string()));
            source
        }
        Err(err) => {
            // No state transition: a failed open leaves the listener exactly
            // where it was (stopped), per the start contract.
            let _ = ready.send(Err(format!("{err:#}")));
            return;
        }
    };

    let mut writer = SnapshotWriter::new(ctx.live.clone());
    writer.set_device(source.device_name());
    info!(
        device = source.device_name(),
        frame_ms = ctx.cfg.frame_ms,
        "microphone stream opened"
    );

    writer.set_state(ListenerState::Calibrating);
    let profile = match calibrate(&source, &ctx) {
        CalibrationOutcome::Profile(profile) => profile,
        CalibrationOutcome::Stopped => {
            writer.set_state(ListenerState::Stopped);
            return;
        }
        CalibrationOutcome::Failed(message) => {
            let tagged = ListenerError::CalibrationFailed(message);
            error!("{tagged}");
            drop(source);
            writer.set_error(tagged.to_string());
            park_until_stop(&ctx);
            writer.set_state(ListenerState::Stopped);
            return;
        }
    };

    let mut vad = AdaptiveVad::new(&profile, &ctx.cfg);
    let mut segmenter = Segmenter::new(&ctx.cfg);
    let mut arbiter = ShutdownArbiter::new(&ctx.cfg);
    let frame_timeout = source.frame_duration();
    let stall_limit = (CAPTURE_STALL_MS / ctx.cfg.frame_ms.max(1)).max(1);
    let mut stalled_reads: u64 = 0;

    writer.set_state(ListenerState::Listening);

    loop {
        if ctx.stop.load(Ordering::Relaxed) {
            // Stop policy: an utterance in progress is discarded, not flushed.
            if segmenter.abort() {
                info!("stop requested; in-flight utterance discarded");
            }
            break;
        }

        match source.read_frame(frame_timeout) {
            Ok(frame) => {
                stalled_reads = 0;
                let decision = vad.process(&frame);
                let Some(event) = segmenter.push(frame, &decision) else {
                    continue;
                };
                match event {
                    SegmentEvent::SpeechStarted | SegmentEvent::SpeechResumed => {
                        writer.set_state(ListenerState::Recording);
                    }
                    SegmentEvent::HangoverStarted => {
                        writer.set_state(ListenerState::Hangover);
                    }
                    SegmentEvent::Discarded { .. } => {
                        writer.set_state(ListenerState::Listening);
                    }
                    SegmentEvent::Completed(utterance) => {
                        writer.set_state(ListenerState::Processing);
                        let stop_requested =
                            process_utterance(&ctx, &mut writer, &mut arbiter, utterance);
                        if stop_requested {
                            ctx.stop.store(true, Ordering::Relaxed);
                            continue;
                        }
                        writer.set_state(ListenerState::Listening);
                    }
                }
            }
            Err(FrameReadError::Timeout) => {
                // A single short read is absorbed; a long stall means the
                // device went away under us.
                stalled_reads += 1;
                if stalled_reads >= stall_limit {
                    capture_interrupted(&ctx, &mut writer, &mut segmenter, source, "capture stalled");
                    return;
                }
            }
            Err(FrameReadError::Disconnected) => {
                capture_interrupted(
                    &ctx,
                    &mut writer,
                    &mut segmenter,
                    source,
                    "audio stream disconnected",
                );
                return;
            }
        }
    }

    if source.frames_dropped() > 0 {
        warn!(dropped = source.frames_dropped(), "frames lost to channel overflow");
    }
    writer.set_state(ListenerState::Stopped);
}

enum CalibrationOutcome {
    Profile(crate::vad::CalibrationProfile),
    Stopped,
    Failed(String),
}

fn calibrate(source: &AudioSource, ctx: &WorkerContext) -> CalibrationOutcome {
    let mut calibrator = Calibrator::new(&ctx.cfg);
    let deadline = Instant::now() + Duration::from_millis(ctx.cfg.calibration_timeout_ms);
    let frame_timeout = source.frame_duration();

    loop {
        if ctx.stop.load(Ordering::Relaxed) {
            return CalibrationOutcome::Stopped;
        }
        if Instant::now() >= deadline {
            return CalibrationOutcome::Failed(format!(
                "no usable signal within {}ms ({} frames observed)",
                ctx.cfg.calibration_timeout_ms,
                calibrator.frames_observed()
            ));
        }
        match source.read_frame(frame_timeout) {
            Ok(frame) => {
                if let Some(profile) = calibrator.observe(&frame) {
                    return CalibrationOutcome::Profile(profile);
                }
            }
            Err(FrameReadError::Timeout) => continue,
            Err(FrameReadError::Disconnected) => {
                return CalibrationOutcome::Failed("audio stream disconnected".to_string());
            }
        }
    }
}

/// Run the pipeline port for one utterance; returns true when a spoken
/// shutdown intent asks the loop to stop.
fn process_utterance(
    ctx: &WorkerContext,
    writer: &mut SnapshotWriter,
    arbiter: &mut ShutdownArbiter,
    utterance: Utterance,
) -> bool {
    let cycle_start = Instant::now();
    let summary = summarize(&utterance);

    let outcome = {
        let mut pipeline = ctx
            .pipeline
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pipeline.handle(utterance)
    };
    let cycle_ms = cycle_start.elapsed().as_millis() as u64;

    match outcome {
        Ok(result) => {
            if result.transcript.is_empty() {
                info!(cycle_ms, "cycle finished (empty transcript)");
            } else {
                info!(cycle_ms, transcript = %result.transcript, "cycle finished");
            }

            let decision = arbiter.observe(&result.transcript);
            let reply = match decision {
                IntentDecision::AwaitConfirm => {
                    info!("shutdown intent detected; awaiting spoken confirmation");
                    "To confirm shutdown, say: 'confirm shutdown'.".to_string()
                }
                _ => result.reply.clone(),
            };

            writer.record_result(
                summary,
                ResultSummary {
                    ok: true,
                    transcript: result.transcript,
                    reply,
                    audio_ref: result.audio_ref,
                    timings: result.timings,
                    cycle_ms,
                    error: None,
                },
            );

            if matches!(decision, IntentDecision::StopNow) {
                info!("spoken shutdown accepted; stopping listener");
                return true;
            }
            false
        }
        Err(err) => {
            // Pipeline failures are recorded and the loop keeps listening.
            let tagged = ListenerError::Pipeline(format!("{err:#}"));
            error!("{tagged}");
            writer.record_result(
                summary,
                ResultSummary {
                    ok: false,
                    transcript: String::new(),
                    reply: String::new(),
                    audio_ref: None,
                    timings: Default::default(),
                    cycle_ms,
                    error: Some(tagged.to_string()),
                },
            );
            false
        }
    }
}

fn summarize(utterance: &Utterance) -> UtteranceSummary {
    let age_ms = utterance.started_at.elapsed().as_millis() as u64;
    UtteranceSummary {
        started_at_epoch_ms: epoch_ms().saturating_sub(age_ms),
        duration_ms: utterance.duration_ms(),
        speech_ms: utterance.speech_ms,
        close_reason: utterance.close_reason.label(),
    }
}

fn capture_interrupted(
    ctx: &WorkerContext,
    writer: &mut SnapshotWriter,
    segmenter: &mut Segmenter,
    source: AudioSource,
    reason: &str,
) {
    if segmenter.abort() {
        warn!("capture failed; in-flight utterance discarded");
    }
    let tagged = ListenerError::CaptureInterrupted(reason.to_string());
    error!("{tagged}");
    // Release the dead device handle now; a restart reopens from scratch.
    drop(source);
    writer.set_error(tagged.to_string());
    park_until_stop(ctx);
    writer.set_state(ListenerState::Stopped);
}

/// Error states do not terminate the loop; hold position until the controller
/// says stop (or restart, which is stop + start).
fn park_until_stop(ctx: &WorkerContext) {
    let pause = Duration::from_millis(ctx.cfg.frame_ms.max(10));
    while !ctx.stop.load(Ordering::Relaxed) {
        std::thread::sleep(pause);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntentDecision {
    None,
    AwaitConfirm,
    StopNow,
}

/// Tracks spoken shutdown requests, optionally requiring a second
/// confirmation inside a bounded window.
struct ShutdownArbiter {
    enabled: bool,
    confirm_required: bool,
    pending_until: Option<Instant>,
}

impl ShutdownArbiter {
    fn new(cfg: &ListenerConfig) -> Self {
        Self {
            enabled: cfg.voice_shutdown_enabled,
            confirm_required: cfg.voice_shutdown_confirm,
            pending_until: None,
        }
    }

    fn observe(&mut self, transcript: &str) -> IntentDecision {
        if !self.enabled || transcript.trim().is_empty() {
            return IntentDecision::None;
        }

        if !self.confirm_required {
            if intent_shutdown(transcript) {
                return IntentDecision::StopNow;
            }
            return IntentDecision::None;
        }

        // Expire a stale pending request before evaluating.
        if let Some(deadline) = self.pending_until {
            if Instant::now() > deadline {
                self.pending_until = None;
            }
        }

        match self.pending_until {
            None => {
                if intent_shutdown(transcript) {
                    self.pending_until = Some(Instant::now() + CONFIRM_WINDOW);
                    return IntentDecision::AwaitConfirm;
                }
                IntentDecision::None
            }
            Some(_) => {
                if intent_confirm(transcript) {
                    return IntentDecision::StopNow;
                }
                IntentDecision::None
            }
        }
    }
}
