//! Producer-side contracts for the screen and loopback audio streams.
//!
//! The OS-specific grabbers sit behind [`FrameGrabber`] and
//! [`LoopbackDevice`]; the timed/threaded drivers in this module turn them into
//! event streams the processor subscribes to.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::{events::Notifier, Result};

pub mod audio;
pub mod screen;

pub use audio::{
    volume_level, AudioBuffer, DeviceAudioCapture, DeviceFormat, LoopbackDevice, SampleFormat,
    SineDevice,
};
pub use screen::{
    dominant_color, FrameGrabber, FrameSurface, GradientGrabber, ScreenEvent, ScreenFrame,
    TimedScreenCapture,
};

/// Screen sampling source. Emits a frame (or an error) at a best-effort rate.
pub trait ScreenSource: Send + Sync {
    /// Begins sampling. Calling it while already capturing is a no-op.
    fn start(&self) -> Result<()>;
    /// Halts sampling; no events are emitted after it returns.
    fn stop(&self);
    fn is_capturing(&self) -> bool;
    /// Frames and capture errors, in the order they were produced.
    fn events(&self) -> &Notifier<ScreenEvent>;
}

/// System audio loopback source. Emits buffers at device-driven intervals.
pub trait AudioSource: Send + Sync {
    /// Starts capture. A device that cannot be opened surfaces as
    /// [`crate::AmbientError::Capture`]; the source does not retry.
    fn start(&self) -> Result<()>;
    /// Halts capture and closes the device.
    fn stop(&self);
    fn is_capturing(&self) -> bool;
    /// Raw PCM buffers as delivered by the device.
    fn buffers(&self) -> &Notifier<AudioBuffer>;
}

/// Run flag shared between a capture source and its worker thread.
#[derive(Debug, Default)]
pub(crate) struct CaptureState {
    running: AtomicBool,
}

impl CaptureState {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Flips the flag from stopped to running. Returns `false` when the
    /// source was already running.
    pub fn begin(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
