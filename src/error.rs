//! Error taxonomy for the listener control boundary.
//!
//! Internals use `anyhow` for context-rich propagation; operations exposed to
//! the control side collapse failures into these tagged conditions so an
//! external HTTP/UI layer can branch on them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListenerError {
    /// The capture device could not be opened. Fatal to `start`; the listener
    /// stays stopped.
    #[error("audio input device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A device selection failed validation. No listener state changes.
    #[error("invalid device selection: {0}")]
    InvalidDevice(String),

    /// No usable signal arrived during the calibration window.
    #[error("noise-floor calibration failed: {0}")]
    CalibrationFailed(String),

    /// The device failed mid-run. The active utterance is discarded and the
    /// loop parks in the error state until an operator restarts it.
    #[error("audio capture interrupted: {0}")]
    CaptureInterrupted(String),

    /// The downstream pipeline port rejected an utterance. Never fatal to the
    /// loop itself.
    #[error("pipeline failed: {0}")]
    Pipeline(String),
}
