//! Lifecycle supervision for the background listener.
//!
//! The controller owns the worker thread handle, the stop flag, and the
//! persisted device selection. It never touches the device handle itself;
//! open/close happen on the loop thread, and the controller only issues
//! commands observed at frame boundaries.

use crate::audio::{AudioSource, DeviceDescriptor, DeviceSelection};
use crate::config::ListenerConfig;
use crate::error::ListenerError;
use crate::listener::runner::{run_listener, WorkerContext};
use crate::listener::{LiveSnapshot, LiveState};
use crate::pipeline::UtterancePipeline;
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Upper bound on how long `start` waits for the worker to open the device.
const OPEN_ACK_TIMEOUT: Duration = Duration::from_secs(10);

struct Worker {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

pub struct Controller {
    cfg: ListenerConfig,
    selection: DeviceSelection,
    pipeline: Arc<Mutex<Box<dyn UtterancePipeline>>>,
    live: Arc<LiveState>,
    worker: Option<Worker>,
    shut_down: bool,
}

impl Controller {
    pub fn new(cfg: ListenerConfig, pipeline: Box<dyn UtterancePipeline>) -> Self {
        Self {
            cfg,
            selection: DeviceSelection::default(),
            pipeline: Arc::new(Mutex::new(pipeline)),
            live: Arc::new(LiveState::new()),
            worker: None,
            shut_down: false,
        }
    }

    /// Shared status slot; hand this to whatever serves `status()` externally.
    pub fn live(&self) -> Arc<LiveState> {
        self.live.clone()
    }

    pub fn status(&self) -> Arc<LiveSnapshot> {
        self.live.snapshot()
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, ListenerError> {
        AudioSource::list_devices().map_err(|err| ListenerError::DeviceUnavailable(format!("{err:#}")))
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Start the background loop. A no-op returning current status when the
    /// loop is already running; a failed device open changes nothing.
    pub fn start(
        &mut self,
        selection: Option<DeviceSelection>,
    ) -> Result<Arc<LiveSnapshot>, ListenerError> {
        if self.shut_down {
            return Err(ListenerError::DeviceUnavailable(
                "controller has been shut down".to_string(),
            ));
        }
        if self.is_running() {
            return Ok(self.status());
        }
        self.reap_finished_worker();

        if let Some(selection) = selection {
            self.selection = selection;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = bounded(1);
        let ctx = WorkerContext {
            cfg: self.cfg.clone(),
            selection: self.selection.clone(),
            pipeline: self.pipeline.clone(),
            live: self.live.clone(),
            stop: stop.clone(),
        };
        let handle = thread::Builder::new()
            .name("voicegate-listener".to_string())
            .spawn(move || run_listener(ctx, ready_tx))
            .map_err(|err| {
                ListenerError::DeviceUnavailable(format!("failed to spawn listener thread: {err}"))
            })?;

        match ready_rx.recv_timeout(OPEN_ACK_TIMEOUT) {
            Ok(Ok(device)) => {
                info!(device = %device, "listener started");
                self.worker = Some(Worker { handle, stop });
                Ok(self.status())
            }
            Ok(Err(message)) => {
                let _ = handle.join();
                Err(ListenerError::DeviceUnavailable(message))
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                stop.store(true, Ordering::Relaxed);
                let _ = handle.join();
                Err(ListenerError::DeviceUnavailable(
                    "timed out opening the capture device".to_string(),
                ))
            }
        }
    }

    /// Signal the loop to exit at its next frame boundary and wait for it.
    /// Idempotent; calling while stopped changes nothing.
    pub fn stop(&mut self) -> Result<Arc<LiveSnapshot>, ListenerError> {
        let Some(worker) = self.worker.take() else {
            return Ok(self.status());
        };
        worker.stop.store(true, Ordering::Relaxed);
        if worker.handle.join().is_err() {
            error!("listener thread panicked during stop");
            self.live.force_stopped("listener thread panicked");
        }
        Ok(self.status())
    }

    /// Validate a new device and apply it, restarting the loop when it was
    /// running. Validation failure leaves selection and loop untouched.
    pub fn select_device(&mut self, name: &str) -> Result<Arc<LiveSnapshot>, ListenerError> {
        let selection = DeviceSelection::named(name);
        AudioSource::validate_selection(&selection)
            .map_err(|err| ListenerError::InvalidDevice(format!("{err:#}")))?;

        let was_running = self.is_running();
        if was_running {
            self.stop()?;
        }
        info!(device = name, "device selection changed");
        self.selection = selection;
        if was_running {
            self.start(None)?;
        }
        Ok(self.status())
    }

    pub fn selected_device(&self) -> &DeviceSelection {
        &self.selection
    }

    /// Stop and release everything. If the loop does not exit within the
    /// configured grace period, the thread handle is abandoned so the hosting
    /// process can still terminate; the published state is forced to stopped.
    pub fn shutdown(&mut self) -> Result<Arc<LiveSnapshot>, ListenerError> {
        self.shut_down = true;
        let Some(worker) = self.worker.take() else {
            return Ok(self.status());
        };
        worker.stop.store(true, Ordering::Relaxed);

        let deadline = Instant::now() + Duration::from_millis(self.cfg.shutdown_grace_ms);
        while !worker.handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        if worker.handle.is_finished() {
            let _ = worker.handle.join();
        } else {
            // Failsafe for platforms where a blocked device read resists
            // cooperative cancellation: abandon the thread rather than hang
            // the host.
            error!(
                grace_ms = self.cfg.shutdown_grace_ms,
                "listener did not stop within grace period; abandoning thread"
            );
            self.live
                .force_stopped("shutdown failsafe: listener thread abandoned");
        }
        Ok(self.status())
    }

    fn reap_finished_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.handle.join();
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ListenerState;
    use crate::pipeline::{PipelineResult, PipelineTimings};
    use crate::vad::Utterance;

    struct NullPipeline;

    impl UtterancePipeline for NullPipeline {
        fn handle(&mut self, _utterance: Utterance) -> anyhow::Result<PipelineResult> {
            Ok(PipelineResult {
                transcript: String::new(),
                reply: String::new(),
                audio_ref: None,
                timings: PipelineTimings::default(),
            })
        }
    }

    fn controller() -> Controller {
        Controller::new(ListenerConfig::default(), Box::new(NullPipeline))
    }

    #[test]
    fn fresh_controller_reports_idle() {
        let controller = controller();
        let status = controller.status();
        assert_eq!(status.state, ListenerState::Idle);
        assert!(!controller.is_running());
    }

    #[test]
    fn stop_without_start_is_a_noop() {
        let mut controller = controller();
        let before = controller.status();
        let after = controller.stop().expect("stop should succeed");
        assert_eq!(before.state, after.state);
        assert_eq!(before.result_seq, after.result_seq);
        assert_eq!(before.updated_at_epoch_ms, after.updated_at_epoch_ms);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let mut controller = controller();
        assert!(controller.shutdown().is_ok());
        assert!(controller.shutdown().is_ok());
        // A shut-down controller refuses to start again.
        assert!(matches!(
            controller.start(None),
            Err(ListenerError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn invalid_device_selection_changes_nothing() {
        let mut controller = controller();
        if controller.list_devices().is_err() {
            eprintln!("skipping invalid_device_selection_changes_nothing: no audio host");
            return;
        }
        let before = controller.status();
        let result = controller.select_device("voicegate-no-such-device");
        assert!(matches!(result, Err(ListenerError::InvalidDevice(_))));
        let after = controller.status();
        assert_eq!(before.state, after.state);
        assert_eq!(controller.selected_device(), &DeviceSelection::default());
    }

    #[test]
    fn start_with_missing_device_reports_unavailable_and_stays_put() {
        let mut controller = controller();
        if controller.list_devices().is_err() {
            eprintln!("skipping start_with_missing_device: no audio host");
            return;
        }
        let result = controller.start(Some(DeviceSelection::named("voicegate-no-such-device")));
        assert!(matches!(result, Err(ListenerError::DeviceUnavailable(_))));
        // The failed start must not leave the listener in an error state.
        let status = controller.status();
        assert!(matches!(
            status.state,
            ListenerState::Idle | ListenerState::Stopped
        ));
        assert!(!controller.is_running());
    }
}
