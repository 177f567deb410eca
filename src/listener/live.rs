//! Concurrently readable listener status.
//!
//! The loop thread is the only writer; it swaps a freshly built snapshot
//! behind a mutex on every state transition. Readers clone the `Arc`, so they
//! always observe a complete snapshot and never block the loop for longer
//! than the pointer swap. A condvar lets pollers wait for the next pipeline
//! result instead of busy-looping.

use crate::listener::ListenerState;
use crate::pipeline::PipelineTimings;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Shape of the last finished utterance, for the control surface.
#[derive(Debug, Clone, Serialize)]
pub struct UtteranceSummary {
    pub started_at_epoch_ms: u64,
    pub duration_ms: u64,
    pub speech_ms: u64,
    pub close_reason: &'static str,
}

/// Outcome of the last pipeline invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ResultSummary {
    pub ok: bool,
    pub transcript: String,
    pub reply: String,
    pub audio_ref: Option<PathBuf>,
    pub timings: PipelineTimings,
    /// End-to-end time for the capture-to-result cycle.
    pub cycle_ms: u64,
    /// Populated instead of the content fields when the pipeline failed.
    pub error: Option<String>,
}

/// Immutable status copy published on every listener state transition.
#[derive(Debug, Clone, Serialize)]
pub struct LiveSnapshot {
    pub state: ListenerState,
    /// True while an utterance is being captured (recording or hangover).
    pub recording: bool,
    /// True while the downstream pipeline holds an utterance.
    pub processing: bool,
    pub device: Option<String>,
    /// Bumped once per pipeline result (success or failure), never on plain
    /// status flips, so pollers can detect genuinely new results.
    pub result_seq: u64,
    pub updated_at_epoch_ms: u64,
    pub last_utterance: Option<UtteranceSummary>,
    pub last_result: Option<ResultSummary>,
    pub error: Option<String>,
}

impl LiveSnapshot {
    fn initial() -> Self {
        Self {
            state: ListenerState::Idle,
            recording: false,
            processing: false,
            device: None,
            result_seq: 0,
            updated_at_epoch_ms: epoch_ms(),
            last_utterance: None,
            last_result: None,
            error: None,
        }
    }
}

/// Shared slot holding the current snapshot.
pub struct LiveState {
    slot: Mutex<Arc<LiveSnapshot>>,
    changed: Condvar,
}

impl LiveState {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Arc::new(LiveSnapshot::initial())),
            changed: Condvar::new(),
        }
    }

    /// Cheap consistent read; never observes a partially updated snapshot.
    pub fn snapshot(&self) -> Arc<LiveSnapshot> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Block until a pipeline result newer than `since_seq` is published or
    /// the timeout elapses; returns the latest snapshot either way.
    pub fn wait_for_result(&self, since_seq: u64, timeout: Duration) -> Arc<LiveSnapshot> {
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            if guard.result_seq > since_seq {
                return guard.clone();
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return guard.clone();
            }
            let (next, _timed_out) = self
                .changed
                .wait_timeout(guard, remaining)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard = next;
        }
    }

    pub(crate) fn publish(&self, snapshot: LiveSnapshot) {
        let mut guard = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(snapshot);
        self.changed.notify_all();
    }

    /// Failsafe path: force the published state to stopped with a note,
    /// bypassing the (possibly wedged) loop thread.
    pub(crate) fn force_stopped(&self, note: &str) {
        let mut next = (*self.snapshot()).clone();
        next.state = ListenerState::Stopped;
        next.recording = false;
        next.processing = false;
        next.error = Some(note.to_string());
        next.updated_at_epoch_ms = epoch_ms();
        self.publish(next);
    }
}

impl Default for LiveState {
    fn default() -> Self {
        Self::new()
    }
}

/// Loop-side builder that carries the current snapshot between transitions.
pub(crate) struct SnapshotWriter {
    live: Arc<LiveState>,
    current: LiveSnapshot,
}

impl SnapshotWriter {
    /// Seed from whatever is currently published so `result_seq` keeps
    /// counting across restarts, then clear run-scoped fields.
    pub(crate) fn new(live: Arc<LiveState>) -> Self {
        let mut current = (*live.snapshot()).clone();
        current.error = None;
        Self { live, current }
    }

    pub(crate) fn set_device(&mut self, device: &str) {
        self.current.device = Some(device.to_string());
    }

    pub(crate) fn set_state(&mut self, state: ListenerState) {
        self.current.state = state;
        self.current.recording =
            matches!(state, ListenerState::Recording | ListenerState::Hangover);
        self.current.processing = matches!(state, ListenerState::Processing);
        self.publish();
    }

    /// Publish an error state with a populated error field.
    pub(crate) fn set_error(&mut self, message: String) {
        self.current.error = Some(message);
        self.set_state(ListenerState::Error);
    }

    /// Record a finished cycle. This is the only place `result_seq` advances.
    pub(crate) fn record_result(
        &mut self,
        utterance: UtteranceSummary,
        result: ResultSummary,
    ) {
        self.current.result_seq += 1;
        self.current.last_utterance = Some(utterance);
        self.current.last_result = Some(result);
        self.publish();
    }

    fn publish(&mut self) {
        self.current.updated_at_epoch_ms = epoch_ms();
        self.live.publish(self.current.clone());
    }
}

pub(crate) fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn summary_pair(seq_note: &str) -> (UtteranceSummary, ResultSummary) {
        (
            UtteranceSummary {
                started_at_epoch_ms: epoch_ms(),
                duration_ms: 900,
                speech_ms: 600,
                close_reason: "silence",
            },
            ResultSummary {
                ok: true,
                transcript: seq_note.to_string(),
                reply: String::new(),
                audio_ref: None,
                timings: PipelineTimings::default(),
                cycle_ms: 12,
                error: None,
            },
        )
    }

    #[test]
    fn initial_snapshot_is_idle() {
        let live = LiveState::new();
        let snapshot = live.snapshot();
        assert_eq!(snapshot.state, ListenerState::Idle);
        assert!(!snapshot.recording);
        assert_eq!(snapshot.result_seq, 0);
    }

    #[test]
    fn state_transitions_do_not_bump_result_seq() {
        let live = Arc::new(LiveState::new());
        let mut writer = SnapshotWriter::new(live.clone());
        writer.set_state(ListenerState::Listening);
        writer.set_state(ListenerState::Recording);
        let snapshot = live.snapshot();
        assert_eq!(snapshot.result_seq, 0);
        assert!(snapshot.recording);
    }

    #[test]
    fn results_bump_seq_and_wake_waiters() {
        let live = Arc::new(LiveState::new());
        let waiter = {
            let live = live.clone();
            thread::spawn(move || live.wait_for_result(0, Duration::from_secs(5)))
        };

        let mut writer = SnapshotWriter::new(live.clone());
        let (utterance, result) = summary_pair("hello");
        writer.record_result(utterance, result);

        let seen = waiter.join().expect("waiter should not panic");
        assert_eq!(seen.result_seq, 1);
        assert_eq!(seen.last_result.as_ref().unwrap().transcript, "hello");
    }

    #[test]
    fn wait_times_out_with_latest_snapshot() {
        let live = LiveState::new();
        let snapshot = live.wait_for_result(0, Duration::from_millis(20));
        assert_eq!(snapshot.result_seq, 0);
    }

    #[test]
    fn seq_carries_across_writer_restarts() {
        let live = Arc::new(LiveState::new());
        let mut writer = SnapshotWriter::new(live.clone());
        let (utterance, result) = summary_pair("first");
        writer.record_result(utterance, result);
        drop(writer);

        let mut writer = SnapshotWriter::new(live.clone());
        let (utterance, result) = summary_pair("second");
        writer.record_result(utterance, result);
        assert_eq!(live.snapshot().result_seq, 2);
    }

    #[test]
    fn force_stopped_overrides_state_and_notes_error() {
        let live = LiveState::new();
        live.force_stopped("failsafe");
        let snapshot = live.snapshot();
        assert_eq!(snapshot.state, ListenerState::Stopped);
        assert_eq!(snapshot.error.as_deref(), Some("failsafe"));
    }
}
