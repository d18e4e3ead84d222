//! Fusion of the screen and audio streams into [`FusedSignal`]s.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::capture::{dominant_color, AudioBuffer, AudioSource, ScreenEvent, ScreenFrame, ScreenSource};
use crate::events::{Notifier, SubscriptionId};
use crate::{AmbientError, EngineConfig, FusedSignal, Result, Rgb, SignalSmoother};

pub mod dispatch;

pub use dispatch::Dispatcher;

const DEFAULT_SENSITIVITY: f32 = 0.5;

/// Fuses independent frame and audio events into a stream of
/// [`FusedSignal`]s.
///
/// Every incoming event is processed on a worker thread. The smoother windows
/// and the last-known `(color, intensity)` pair are updated under one lock, so
/// each published signal is internally consistent even though frame and audio
/// events race each other. Publication order across the two streams is not
/// guaranteed.
#[derive(Clone)]
pub struct SignalProcessor {
    inner: Arc<ProcessorInner>,
}

struct ProcessorInner {
    fusion: Mutex<FusionState>,
    /// `f32` bits of the audio sensitivity in `[0, 1]`.
    sensitivity: AtomicU32,
    signals: Notifier<FusedSignal>,
    dispatcher: Dispatcher,
    attachment: Mutex<Option<Attachment>>,
    disposed: AtomicBool,
    dropped_samples: AtomicU64,
    capture_errors: AtomicU64,
}

struct FusionState {
    smoother: SignalSmoother,
    last_color: Rgb,
    last_intensity: f32,
}

struct Attachment {
    screen: Arc<dyn ScreenSource>,
    screen_subscription: SubscriptionId,
    audio: Arc<dyn AudioSource>,
    audio_subscription: SubscriptionId,
}

impl SignalProcessor {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let dispatcher = Dispatcher::new("signal-processor", config.dispatch_workers)?;
        Ok(Self {
            inner: Arc::new(ProcessorInner {
                fusion: Mutex::new(FusionState {
                    smoother: SignalSmoother::new(config.smoothing_window),
                    last_color: Rgb::BLACK,
                    last_intensity: 0.0,
                }),
                sensitivity: AtomicU32::new(DEFAULT_SENSITIVITY.to_bits()),
                signals: Notifier::new(),
                dispatcher,
                attachment: Mutex::new(None),
                disposed: AtomicBool::new(false),
                dropped_samples: AtomicU64::new(0),
                capture_errors: AtomicU64::new(0),
            }),
        })
    }

    /// Stream of fused signals. Listeners run on a processor worker thread.
    pub fn signals(&self) -> &Notifier<FusedSignal> {
        &self.inner.signals
    }

    /// Queues a frame for processing and returns immediately.
    pub fn on_frame(&self, frame: ScreenFrame) {
        self.inner.dispatch_frame(frame);
    }

    /// Queues an audio buffer for processing and returns immediately.
    pub fn on_audio_buffer(&self, buffer: AudioBuffer) {
        self.inner.dispatch_audio(buffer);
    }

    /// Stores the audio sensitivity, clamped to `[0, 1]`. Only affects
    /// buffers processed afterwards.
    pub fn set_sensitivity(&self, value: f32) {
        let value = if value.is_nan() {
            DEFAULT_SENSITIVITY
        } else {
            value.clamp(0.0, 1.0)
        };
        self.inner
            .sensitivity
            .store(value.to_bits(), Ordering::Release);
    }

    pub fn sensitivity(&self) -> f32 {
        self.inner.sensitivity()
    }

    /// Subscribes to both capture sources. Calling it again while attached is
    /// a no-op.
    pub fn start(&self, screen: Arc<dyn ScreenSource>, audio: Arc<dyn AudioSource>) -> Result<()> {
        if self.inner.disposed.load(Ordering::Acquire) {
            return Err(AmbientError::msg("signal processor has been disposed"));
        }
        let mut attachment = self.inner.lock_attachment();
        if attachment.is_some() {
            return Ok(());
        }

        let weak = Arc::downgrade(&self.inner);
        let screen_subscription = screen.events().subscribe(move |event| {
            if let Some(inner) = Weak::upgrade(&weak) {
                match event {
                    ScreenEvent::Frame(frame) => inner.dispatch_frame(frame.clone()),
                    ScreenEvent::Error(message) => inner.record_capture_error(message),
                }
            }
        });

        let weak = Arc::downgrade(&self.inner);
        let audio_subscription = audio.buffers().subscribe(move |buffer| {
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.dispatch_audio(buffer.clone());
            }
        });

        *attachment = Some(Attachment {
            screen,
            screen_subscription,
            audio,
            audio_subscription,
        });
        tracing::info!("signal processing started");
        Ok(())
    }

    /// Unsubscribes from the capture sources. Work already queued still runs.
    pub fn stop(&self) {
        if let Some(attachment) = self.inner.lock_attachment().take() {
            attachment
                .screen
                .events()
                .unsubscribe(attachment.screen_subscription);
            attachment
                .audio
                .buffers()
                .unsubscribe(attachment.audio_subscription);
            tracing::info!("signal processing stopped");
        }
    }

    pub fn is_processing(&self) -> bool {
        self.inner.lock_attachment().is_some()
    }

    /// Stops processing and shuts the worker pool down. Idempotent.
    pub fn dispose(&self) {
        self.stop();
        if !self.inner.disposed.swap(true, Ordering::AcqRel) {
            self.inner.dispatcher.shutdown();
        }
    }

    /// Samples dropped because they could not be processed.
    pub fn dropped_samples(&self) -> u64 {
        self.inner.dropped_samples.load(Ordering::Relaxed)
    }

    /// Error notifications received from the screen source.
    pub fn capture_errors(&self) -> u64 {
        self.inner.capture_errors.load(Ordering::Relaxed)
    }

    /// The most recent smoothed pair, as it would be fused next.
    pub fn last_values(&self) -> (Rgb, f32) {
        let fusion = self.inner.lock_fusion();
        (fusion.last_color, fusion.last_intensity)
    }
}

impl std::fmt::Debug for SignalProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalProcessor")
            .field("sensitivity", &self.sensitivity())
            .field("processing", &self.is_processing())
            .field("dropped_samples", &self.dropped_samples())
            .finish()
    }
}

impl ProcessorInner {
    fn sensitivity(&self) -> f32 {
        f32::from_bits(self.sensitivity.load(Ordering::Acquire))
    }

    fn dispatch_frame(self: &Arc<Self>, frame: ScreenFrame) {
        let inner = self.clone();
        if !self.dispatcher.execute(move || inner.handle_frame(&frame)) {
            tracing::debug!("frame discarded, processor is shut down");
        }
    }

    fn dispatch_audio(self: &Arc<Self>, buffer: AudioBuffer) {
        let inner = self.clone();
        if !self.dispatcher.execute(move || inner.handle_audio(&buffer)) {
            tracing::debug!("audio buffer discarded, processor is shut down");
        }
    }

    fn handle_frame(&self, frame: &ScreenFrame) {
        match self.fuse_frame(frame) {
            Ok(signal) => self.publish(signal),
            Err(err) => self.drop_sample("frame", &err),
        }
    }

    fn handle_audio(&self, buffer: &AudioBuffer) {
        match self.fuse_audio(buffer) {
            Ok(signal) => self.publish(signal),
            Err(err) => self.drop_sample("audio", &err),
        }
    }

    fn fuse_frame(&self, frame: &ScreenFrame) -> Result<FusedSignal> {
        let color = dominant_color(frame)?;
        let mut fusion = self.lock_fusion();
        let smoothed = fusion.smoother.push_color(color);
        fusion.last_color = smoothed;
        Ok(FusedSignal::new(smoothed, fusion.last_intensity, frame.timestamp))
    }

    fn fuse_audio(&self, buffer: &AudioBuffer) -> Result<FusedSignal> {
        let loudness = buffer.loudness()?;
        let scaled = (loudness * (0.5 + self.sensitivity())).clamp(0.0, 1.0);
        let mut fusion = self.lock_fusion();
        let smoothed = fusion.smoother.push_intensity(scaled);
        fusion.last_intensity = smoothed;
        Ok(FusedSignal::new(fusion.last_color, smoothed, buffer.timestamp))
    }

    fn publish(&self, signal: FusedSignal) {
        tracing::trace!(
            color = ?signal.dominant_color(),
            intensity = signal.audio_intensity(),
            "fused signal"
        );
        self.signals.emit(&signal);
    }

    fn drop_sample(&self, kind: &'static str, err: &AmbientError) {
        let dropped = self.dropped_samples.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(kind, dropped, error = %err, "dropping unprocessable sample");
    }

    fn record_capture_error(&self, message: &str) {
        let errors = self.capture_errors.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(errors, %message, "screen capture reported an error");
    }

    fn lock_fusion(&self) -> MutexGuard<'_, FusionState> {
        match self.fusion.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_attachment(&self) -> MutexGuard<'_, Option<Attachment>> {
        match self.attachment.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameSurface;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};
    use std::sync::mpsc;
    use std::time::Duration;

    fn processor() -> SignalProcessor {
        SignalProcessor::new(&EngineConfig::default()).unwrap()
    }

    fn collect(processor: &SignalProcessor) -> mpsc::Receiver<FusedSignal> {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        processor.signals().subscribe(move |signal| {
            let _ = tx.lock().unwrap().send(*signal);
        });
        rx
    }

    fn next(rx: &mpsc::Receiver<FusedSignal>) -> FusedSignal {
        rx.recv_timeout(Duration::from_secs(2))
            .expect("a fused signal should be published")
    }

    fn solid_frame(color: Rgb) -> ScreenFrame {
        ScreenFrame::new(FrameSurface::solid(64, 36, color), Utc::now())
    }

    #[test]
    fn loud_audio_is_clamped_into_range() {
        let processor = processor();
        let rx = collect(&processor);
        processor.set_sensitivity(0.5);

        processor.on_audio_buffer(AudioBuffer::new(2.5, Vec::new(), 48_000));
        let signal = next(&rx);
        assert!(signal.audio_intensity() <= 1.0);
        assert!(signal.audio_intensity() >= 0.0);

        processor.on_audio_buffer(AudioBuffer::new(-4.0, Vec::new(), 48_000));
        let signal = next(&rx);
        assert!((0.0..=1.0).contains(&signal.audio_intensity()));
    }

    #[test]
    fn sensitivity_scales_loudness() {
        let processor = processor();
        let rx = collect(&processor);

        processor.set_sensitivity(0.0);
        processor.on_audio_buffer(AudioBuffer::new(0.4, Vec::new(), 48_000));
        assert_relative_eq!(next(&rx).audio_intensity(), 0.2, epsilon = 1e-6);

        processor.set_sensitivity(7.0);
        assert_eq!(processor.sensitivity(), 1.0);
    }

    #[test]
    fn frames_carry_last_known_intensity_and_their_timestamp() {
        let processor = processor();
        let rx = collect(&processor);
        processor.set_sensitivity(0.5);

        processor.on_audio_buffer(AudioBuffer::new(0.6, Vec::new(), 48_000));
        let audio = next(&rx);
        assert_eq!(audio.dominant_color(), Rgb::BLACK);

        let stamp = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let mut frame = solid_frame(Rgb::new(10, 20, 30));
        frame.timestamp = stamp;
        processor.on_frame(frame);

        let fused = next(&rx);
        assert_eq!(fused.dominant_color(), Rgb::new(10, 20, 30));
        assert_relative_eq!(fused.audio_intensity(), audio.audio_intensity());
        assert_eq!(fused.timestamp(), stamp);
        assert_eq!(processor.last_values().0, Rgb::new(10, 20, 30));
    }

    #[test]
    fn malformed_samples_are_dropped_without_publishing() {
        let processor = processor();
        let rx = collect(&processor);

        processor.on_audio_buffer(AudioBuffer::new(f32::NAN, Vec::new(), 48_000));
        processor.on_frame(ScreenFrame::new(
            FrameSurface::from_rgba(0, 0, Vec::new()),
            Utc::now(),
        ));
        processor.on_audio_buffer(AudioBuffer::new(0.1, Vec::new(), 48_000));

        // Only the valid buffer publishes.
        next(&rx);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(processor.dropped_samples(), 2);
    }

    #[test]
    fn concurrent_producers_never_publish_torn_pairs() {
        let processor = processor();
        let rx = collect(&processor);
        let color = Rgb::new(90, 60, 30);

        let frames = {
            let processor = processor.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    processor.on_frame(solid_frame(color));
                }
            })
        };
        let audio = {
            let processor = processor.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    processor.on_audio_buffer(AudioBuffer::new(0.8, Vec::new(), 48_000));
                }
            })
        };
        frames.join().unwrap();
        audio.join().unwrap();

        for _ in 0..100 {
            let signal = next(&rx);
            assert!(signal.dominant_color() == color || signal.dominant_color() == Rgb::BLACK);
            assert!((0.0..=1.0).contains(&signal.audio_intensity()));
        }
        processor.dispose();
    }

    #[test]
    fn dispose_is_idempotent_and_blocks_restart() {
        let processor = processor();
        processor.dispose();
        processor.dispose();

        let screen: Arc<dyn ScreenSource> = Arc::new(crate::capture::TimedScreenCapture::new(
            crate::capture::GradientGrabber::new(4, 4),
            Duration::from_millis(10),
        ));
        let audio: Arc<dyn AudioSource> = Arc::new(crate::capture::DeviceAudioCapture::new(
            crate::capture::SineDevice::new(8_000, 220.0),
        ));
        assert!(processor.start(screen, audio).is_err());
    }
}
