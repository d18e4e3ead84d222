//! Core library for the ambient effects engine.
//!
//! Screen frames and loopback audio buffers are fused into a smoothed
//! `(color, intensity)` stream by the [`SignalProcessor`], which the
//! [`EffectRuntime`] routes into the single active [`Effect`]. Each module owns
//! one stage of that chain; [`AmbientPipeline`] wires them together.

pub mod capture;
pub mod config;
pub mod effects;
pub mod error;
pub mod events;
pub mod monitor;
pub mod pipeline;
pub mod processing;
pub mod signal;

pub use capture::{
    AudioBuffer, AudioSource, DeviceAudioCapture, GradientGrabber, LoopbackDevice, ScreenEvent,
    ScreenFrame, ScreenSource, SineDevice, TimedScreenCapture,
};
pub use config::{AppSettings, EngineConfig};
pub use effects::{Effect, EffectDescriptor, EffectRegistry, EffectRuntime, RunState, SharedRegistry};
pub use error::{AmbientError, Result};
pub use events::{Notifier, SubscriptionId};
pub use monitor::{Monitor, MonitorSource, StaticMonitorSource, TargetMonitorSet};
pub use pipeline::AmbientPipeline;
pub use processing::SignalProcessor;
pub use signal::{FusedSignal, Rgb, SignalSmoother};
