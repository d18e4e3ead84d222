//! Wiring of capture sources, the signal processor and the effect runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::capture::{AudioSource, ScreenSource};
use crate::effects::{EffectRuntime, SharedRegistry};
use crate::monitor::MonitorSource;
use crate::processing::SignalProcessor;
use crate::{AmbientError, AppSettings, EngineConfig, Result};

/// Owns the whole capture → fuse → render chain.
///
/// Capture failures are surfaced once from [`AmbientPipeline::start`]; the
/// pipeline never retries on its own.
pub struct AmbientPipeline {
    screen: Arc<dyn ScreenSource>,
    audio: Arc<dyn AudioSource>,
    processor: SignalProcessor,
    runtime: EffectRuntime,
    shut_down: AtomicBool,
}

impl AmbientPipeline {
    pub fn new(
        config: &EngineConfig,
        registry: SharedRegistry,
        monitors: Arc<dyn MonitorSource>,
        screen: Arc<dyn ScreenSource>,
        audio: Arc<dyn AudioSource>,
    ) -> Result<Self> {
        let processor = SignalProcessor::new(config)?;
        let runtime = EffectRuntime::new(registry, monitors, config);
        runtime.attach(&processor);
        Ok(Self {
            screen,
            audio,
            processor,
            runtime,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn processor(&self) -> &SignalProcessor {
        &self.processor
    }

    pub fn runtime(&self) -> &EffectRuntime {
        &self.runtime
    }

    pub fn is_running(&self) -> bool {
        self.runtime.is_running()
    }

    /// Starts screen capture, audio capture, processing and rendering, in that
    /// order. Whatever was started is stopped again when a later step fails.
    pub fn start(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(AmbientError::msg("pipeline has been shut down"));
        }

        if let Err(err) = self.screen.start() {
            return Err(self.report_start_failure("screen capture", err));
        }
        if let Err(err) = self.audio.start() {
            self.screen.stop();
            return Err(self.report_start_failure("audio capture", err));
        }
        if let Err(err) = self.processor.start(self.screen.clone(), self.audio.clone()) {
            self.stop_capture();
            return Err(self.report_start_failure("signal processing", err));
        }
        if let Err(err) = self.runtime.start() {
            self.processor.stop();
            self.stop_capture();
            return Err(err);
        }

        tracing::info!(effect = %self.runtime.current_effect_id(), "ambient pipeline started");
        Ok(())
    }

    /// Hides the effect and halts processing and capture.
    pub fn stop(&self) -> Result<()> {
        self.runtime.stop()?;
        self.processor.stop();
        self.stop_capture();
        tracing::info!("ambient pipeline stopped");
        Ok(())
    }

    /// Pushes user settings into the core and starts or stops according to
    /// `enabled`. An unregistered effect id rejects the whole document before
    /// anything changes.
    pub fn apply_settings(&self, settings: &AppSettings) -> Result<()> {
        let settings = settings.clone().normalized();
        if !self.runtime.is_effect_registered(&settings.selected_effect_id) {
            let err = AmbientError::EffectNotRegistered(settings.selected_effect_id.clone());
            tracing::warn!(error = %err, "settings rejected");
            self.runtime
                .status()
                .emit(&format!("Failed to apply settings: {err}"));
            return Err(err);
        }
        self.processor.set_sensitivity(settings.audio_sensitivity);
        self.runtime
            .set_target_monitors(settings.target_monitor_ids.iter().cloned())?;
        self.runtime.set_current_effect(&settings.selected_effect_id)?;
        if !settings.source_monitor_id.is_empty() {
            tracing::debug!(monitor = %settings.source_monitor_id, "screen source monitor configured");
        }

        if settings.enabled {
            self.start()
        } else {
            self.stop()
        }
    }

    /// Releases everything. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.runtime.dispose();
        self.processor.dispose();
        self.stop_capture();
        tracing::info!("ambient pipeline shut down");
    }

    /// Logs a start failure and reports it on the runtime's status stream.
    fn report_start_failure(&self, stage: &str, err: AmbientError) -> AmbientError {
        tracing::error!(stage, error = %err, "ambient pipeline could not be started");
        self.runtime
            .status()
            .emit(&format!("Failed to start {stage}: {err}"));
        err
    }

    fn stop_capture(&self) {
        self.audio.stop();
        self.screen.stop();
    }
}

impl std::fmt::Debug for AmbientPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmbientPipeline")
            .field("screen_capturing", &self.screen.is_capturing())
            .field("audio_capturing", &self.audio.is_capturing())
            .field("runtime", &self.runtime)
            .finish()
    }
}
