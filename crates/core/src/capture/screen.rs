use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use super::{CaptureState, ScreenSource};
use crate::{events::Notifier, AmbientError, Result, Rgb};

const MAX_GRID_COLUMNS: u32 = 64;
const MAX_GRID_ROWS: u32 = 36;

/// Captured RGBA8 pixels of one display frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSurface {
    width: u32,
    height: u32,
    stride: usize,
    pixels: Vec<u8>,
}

impl FrameSurface {
    /// Wraps tightly packed RGBA8 pixels (`stride == width * 4`).
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self::with_stride(width, height, width as usize * 4, pixels)
    }

    pub fn with_stride(width: u32, height: u32, stride: usize, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            stride,
            pixels,
        }
    }

    pub fn solid(width: u32, height: u32, color: Rgb) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..(width as usize * height as usize) {
            pixels.extend_from_slice(&[color.r, color.g, color.b, 255]);
        }
        Self::from_rgba(width, height, pixels)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn pixel(&self, x: u32, y: u32) -> Option<Rgb> {
        let offset = y as usize * self.stride + x as usize * 4;
        let px = self.pixels.get(offset..offset + 3)?;
        Some(Rgb::new(px[0], px[1], px[2]))
    }
}

/// One sampled frame of the primary display.
#[derive(Debug, Clone)]
pub struct ScreenFrame {
    pub surface: Arc<FrameSurface>,
    pub width: u32,
    pub height: u32,
    pub timestamp: DateTime<Utc>,
}

impl ScreenFrame {
    pub fn new(surface: FrameSurface, timestamp: DateTime<Utc>) -> Self {
        Self {
            width: surface.width(),
            height: surface.height(),
            surface: Arc::new(surface),
            timestamp,
        }
    }
}

/// What a screen source delivers on every tick.
#[derive(Debug, Clone)]
pub enum ScreenEvent {
    Frame(ScreenFrame),
    Error(String),
}

/// Average color over an evenly spaced sampling grid of at most 64×36 points.
///
/// Deterministic for a given surface. Frames whose declared size does not
/// match the pixel data are rejected.
pub fn dominant_color(frame: &ScreenFrame) -> Result<Rgb> {
    if frame.width == 0 || frame.height == 0 {
        return Err(AmbientError::InvalidInput("frame has no pixels"));
    }
    let surface = &frame.surface;
    if surface.width() < frame.width || surface.height() < frame.height {
        return Err(AmbientError::InvalidInput(
            "frame size exceeds its surface",
        ));
    }

    let step_x = (frame.width / MAX_GRID_COLUMNS).max(1);
    let step_y = (frame.height / MAX_GRID_ROWS).max(1);

    let (mut r, mut g, mut b, mut count) = (0u64, 0u64, 0u64, 0u64);
    for y in (step_y / 2..frame.height).step_by(step_y as usize) {
        for x in (step_x / 2..frame.width).step_by(step_x as usize) {
            let px = surface
                .pixel(x, y)
                .ok_or(AmbientError::InvalidInput("surface pixel buffer is truncated"))?;
            r += u64::from(px.r);
            g += u64::from(px.g);
            b += u64::from(px.b);
            count += 1;
        }
    }

    let mean = |sum: u64| (sum as f64 / count as f64).round() as u8;
    Ok(Rgb::new(mean(r), mean(g), mean(b)))
}

/// Platform bitmap grabber for the primary display.
pub trait FrameGrabber: Send + 'static {
    fn grab(&mut self) -> Result<FrameSurface>;
}

/// Deterministic synthetic grabber that slowly cycles through a color wheel.
#[derive(Debug, Clone)]
pub struct GradientGrabber {
    width: u32,
    height: u32,
    frame: u64,
}

impl GradientGrabber {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame: 0,
        }
    }
}

impl FrameGrabber for GradientGrabber {
    fn grab(&mut self) -> Result<FrameSurface> {
        let phase = (self.frame % 360) as f32 * 0.1;
        self.frame += 1;
        let channel = |v: f32| ((v + 1.0) * 127.5) as u8;
        let base = Rgb::new(
            channel(phase.sin()),
            channel(phase.cos()),
            channel((phase * 2.0).sin()),
        );

        let mut pixels = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for _ in 0..self.height {
            for x in 0..self.width {
                // Darken toward the right edge so the average differs from the base.
                let shade = 1.0 - (x as f32 / self.width.max(1) as f32) * 0.5;
                let px = base.scaled(shade);
                pixels.extend_from_slice(&[px.r, px.g, px.b, 255]);
            }
        }
        Ok(FrameSurface::from_rgba(self.width, self.height, pixels))
    }
}

/// Runs a [`FrameGrabber`] on a dedicated thread at a fixed interval.
pub struct TimedScreenCapture<G: FrameGrabber> {
    grabber: Arc<Mutex<G>>,
    interval: Duration,
    state: Arc<CaptureState>,
    events: Arc<Notifier<ScreenEvent>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<G: FrameGrabber> TimedScreenCapture<G> {
    pub fn new(grabber: G, interval: Duration) -> Self {
        Self {
            grabber: Arc::new(Mutex::new(grabber)),
            interval,
            state: Arc::new(CaptureState::default()),
            events: Arc::new(Notifier::new()),
            worker: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<G: FrameGrabber> ScreenSource for TimedScreenCapture<G> {
    fn start(&self) -> Result<()> {
        let mut worker = self.lock_worker();
        if !self.state.begin() {
            return Ok(());
        }

        let grabber = self.grabber.clone();
        let state = self.state.clone();
        let events = self.events.clone();
        let interval = self.interval;

        let spawned = thread::Builder::new()
            .name("screen-capture".into())
            .spawn(move || capture_loop(grabber, state, events, interval));

        match spawned {
            Ok(handle) => {
                tracing::info!(interval_ms = interval.as_millis() as u64, "screen capture started");
                *worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.state.set_running(false);
                Err(AmbientError::capture("screen", err.to_string()))
            }
        }
    }

    fn stop(&self) {
        let handle = self.lock_worker().take();
        self.state.set_running(false);
        if let Some(handle) = handle {
            handle.thread().unpark();
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
            tracing::info!("screen capture stopped");
        }
    }

    fn is_capturing(&self) -> bool {
        self.state.is_running()
    }

    fn events(&self) -> &Notifier<ScreenEvent> {
        &self.events
    }
}

impl<G: FrameGrabber> Drop for TimedScreenCapture<G> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop<G: FrameGrabber>(
    grabber: Arc<Mutex<G>>,
    state: Arc<CaptureState>,
    events: Arc<Notifier<ScreenEvent>>,
    interval: Duration,
) {
    while state.is_running() {
        let started = Instant::now();

        let grabbed = match grabber.lock() {
            Ok(mut grabber) => grabber.grab(),
            Err(_) => Err(AmbientError::Poisoned("frame grabber")),
        };
        let event = match grabbed {
            Ok(surface) => ScreenEvent::Frame(ScreenFrame::new(surface, Utc::now())),
            Err(err) => ScreenEvent::Error(format!("frame capture error: {err}")),
        };
        events.emit(&event);

        let elapsed = started.elapsed();
        if elapsed < interval {
            thread::park_timeout(interval - elapsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn frame(surface: FrameSurface) -> ScreenFrame {
        ScreenFrame::new(surface, Utc::now())
    }

    #[test]
    fn solid_frame_yields_its_color() {
        let color = Rgb::new(12, 200, 99);
        let frame = frame(FrameSurface::solid(320, 180, color));
        assert_eq!(dominant_color(&frame).unwrap(), color);
    }

    #[test]
    fn averages_split_frame() {
        let (width, height) = (4, 2);
        let mut pixels = Vec::new();
        for _ in 0..height {
            for x in 0..width {
                if x < 2 {
                    pixels.extend_from_slice(&[200, 0, 0, 255]);
                } else {
                    pixels.extend_from_slice(&[0, 0, 100, 255]);
                }
            }
        }
        let frame = frame(FrameSurface::from_rgba(width, height, pixels));
        assert_eq!(dominant_color(&frame).unwrap(), Rgb::new(100, 0, 50));
    }

    #[test]
    fn rejects_malformed_frames() {
        let empty = frame(FrameSurface::from_rgba(0, 0, Vec::new()));
        assert!(dominant_color(&empty).is_err());

        let truncated = frame(FrameSurface::from_rgba(8, 8, vec![0; 16]));
        assert!(dominant_color(&truncated).is_err());
    }

    #[test]
    fn gradient_grabber_is_deterministic() {
        let mut a = GradientGrabber::new(16, 9);
        let mut b = GradientGrabber::new(16, 9);
        for _ in 0..3 {
            assert_eq!(a.grab().unwrap(), b.grab().unwrap());
        }
    }

    struct FlakyGrabber {
        calls: u32,
    }

    impl FrameGrabber for FlakyGrabber {
        fn grab(&mut self) -> Result<FrameSurface> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                Err(AmbientError::msg("desktop locked"))
            } else {
                Ok(FrameSurface::solid(2, 2, Rgb::new(1, 2, 3)))
            }
        }
    }

    #[test]
    fn timed_capture_emits_frames_and_errors_until_stopped() {
        let capture = TimedScreenCapture::new(FlakyGrabber { calls: 0 }, Duration::from_millis(2));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        capture.events().subscribe(move |event| {
            let kind = matches!(event, ScreenEvent::Frame(_));
            let _ = tx.lock().unwrap().send(kind);
        });

        capture.start().unwrap();
        capture.start().unwrap();
        assert!(capture.is_capturing());

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(first);
        assert!(!second);

        capture.stop();
        assert!(!capture.is_capturing());
    }
}
