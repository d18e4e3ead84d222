use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{AudioSource, CaptureState};
use crate::{events::Notifier, AmbientError, Result};

/// PCM encoding of the raw bytes delivered by a loopback device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// 32-bit IEEE float, little endian.
    F32,
    /// 16-bit signed integer, little endian.
    I16,
    /// 32-bit signed integer, little endian.
    I32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::F32 | SampleFormat::I32 => 4,
            SampleFormat::I16 => 2,
        }
    }

    fn decode(self, bytes: &[u8]) -> f32 {
        match self {
            SampleFormat::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            SampleFormat::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / i16::MAX as f32,
            SampleFormat::I32 => {
                (i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
                    / i32::MAX as f64) as f32
            }
        }
    }
}

/// Format negotiated when a loopback device is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFormat {
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
}

/// One block of loopback audio.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Loudness in `[0, 1]` as reported by the source. Consumers must still
    /// treat it as untrusted.
    pub volume_level: f32,
    pub raw: Arc<[u8]>,
    pub sample_rate: u32,
    pub timestamp: DateTime<Utc>,
}

impl AudioBuffer {
    pub fn new(volume_level: f32, raw: Vec<u8>, sample_rate: u32) -> Self {
        Self {
            volume_level,
            raw: raw.into(),
            sample_rate,
            timestamp: Utc::now(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Builds a buffer from raw PCM, deriving the volume level from the samples.
    pub fn from_pcm(raw: Vec<u8>, format: DeviceFormat) -> Self {
        let volume = volume_level(&raw, format.sample_format);
        Self::new(volume, raw, format.sample_rate)
    }

    /// Volume level normalized to `[0, 1]`. Non-finite levels mark the buffer
    /// as malformed.
    pub fn loudness(&self) -> Result<f32> {
        if !self.volume_level.is_finite() {
            return Err(AmbientError::InvalidInput(
                "audio buffer carries a non-finite volume level",
            ));
        }
        Ok(self.volume_level.clamp(0.0, 1.0))
    }
}

/// Root-mean-square magnitude of a PCM block, normalized to `[0, 1]`.
///
/// Trailing bytes that do not form a whole sample are ignored.
pub fn volume_level(raw: &[u8], format: SampleFormat) -> f32 {
    let width = format.bytes_per_sample();
    let count = raw.len() / width;
    if count == 0 {
        return 0.0;
    }

    let sum: f64 = raw
        .chunks_exact(width)
        .map(|chunk| {
            let sample = format.decode(chunk);
            if sample.is_finite() {
                f64::from(sample) * f64::from(sample)
            } else {
                0.0
            }
        })
        .sum();
    ((sum / count as f64).sqrt() as f32).min(1.0)
}

/// Platform loopback driver. `read_block` may block for up to one device
/// period and returns `None` when no data is ready yet.
pub trait LoopbackDevice: Send + 'static {
    fn open(&mut self) -> Result<DeviceFormat>;
    fn read_block(&mut self) -> Result<Option<Vec<u8>>>;
    fn close(&mut self);
}

/// Pulls blocks from a [`LoopbackDevice`] on a dedicated thread and publishes
/// them as [`AudioBuffer`]s.
pub struct DeviceAudioCapture<D: LoopbackDevice> {
    device: Arc<Mutex<D>>,
    state: Arc<CaptureState>,
    buffers: Arc<Notifier<AudioBuffer>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<D: LoopbackDevice> DeviceAudioCapture<D> {
    pub fn new(device: D) -> Self {
        Self {
            device: Arc::new(Mutex::new(device)),
            state: Arc::new(CaptureState::default()),
            buffers: Arc::new(Notifier::new()),
            worker: Mutex::new(None),
        }
    }

    fn lock_device(&self) -> Result<MutexGuard<'_, D>> {
        self.device
            .lock()
            .map_err(|_| AmbientError::Poisoned("loopback device"))
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<D: LoopbackDevice> AudioSource for DeviceAudioCapture<D> {
    fn start(&self) -> Result<()> {
        let mut worker = self.lock_worker();
        if self.state.is_running() {
            return Ok(());
        }

        let format = self
            .lock_device()?
            .open()
            .map_err(|err| AmbientError::capture("audio", err.to_string()))?;

        self.state.set_running(true);
        let device = self.device.clone();
        let state = self.state.clone();
        let buffers = self.buffers.clone();

        let spawned = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || read_loop(device, state, buffers, format));

        match spawned {
            Ok(handle) => {
                tracing::info!(
                    sample_rate = format.sample_rate,
                    sample_format = ?format.sample_format,
                    "audio capture started"
                );
                *worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.state.set_running(false);
                if let Ok(mut device) = self.device.lock() {
                    device.close();
                }
                Err(AmbientError::capture("audio", err.to_string()))
            }
        }
    }

    fn stop(&self) {
        let handle = self.lock_worker().take();
        self.state.set_running(false);
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
            tracing::info!("audio capture stopped");
        }
    }

    fn is_capturing(&self) -> bool {
        self.state.is_running()
    }

    fn buffers(&self) -> &Notifier<AudioBuffer> {
        &self.buffers
    }
}

impl<D: LoopbackDevice> Drop for DeviceAudioCapture<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_loop<D: LoopbackDevice>(
    device: Arc<Mutex<D>>,
    state: Arc<CaptureState>,
    buffers: Arc<Notifier<AudioBuffer>>,
    format: DeviceFormat,
) {
    let mut delivered: u64 = 0;
    while state.is_running() {
        let block = match device.lock() {
            Ok(mut device) => device.read_block(),
            Err(_) => Err(AmbientError::Poisoned("loopback device")),
        };

        match block {
            Ok(Some(raw)) if !raw.is_empty() => {
                delivered += 1;
                let buffer = AudioBuffer::from_pcm(raw, format);
                if delivered % 100 == 0 {
                    tracing::debug!(
                        delivered,
                        bytes = buffer.raw.len(),
                        volume = buffer.volume_level,
                        "audio capture progress"
                    );
                }
                buffers.emit(&buffer);
            }
            Ok(_) => thread::sleep(Duration::from_millis(2)),
            Err(err) => {
                tracing::warn!(error = %err, "audio capture stopped with error");
                state.set_running(false);
            }
        }
    }

    if let Ok(mut device) = device.lock() {
        device.close();
    }
    tracing::debug!(delivered, "audio capture loop exited");
}

/// Synthetic loopback device producing a slowly pulsing sine tone.
#[derive(Debug, Clone)]
pub struct SineDevice {
    sample_rate: u32,
    frequency: f32,
    block_frames: usize,
    position: u64,
    pace: bool,
}

impl SineDevice {
    pub fn new(sample_rate: u32, frequency: f32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            frequency,
            block_frames: (sample_rate as usize / 100).max(1),
            position: 0,
            pace: true,
        }
    }

    /// Disables real-time pacing so blocks are produced as fast as they are read.
    pub fn unpaced(mut self) -> Self {
        self.pace = false;
        self
    }
}

impl LoopbackDevice for SineDevice {
    fn open(&mut self) -> Result<DeviceFormat> {
        self.position = 0;
        Ok(DeviceFormat {
            sample_rate: self.sample_rate,
            sample_format: SampleFormat::F32,
        })
    }

    fn read_block(&mut self) -> Result<Option<Vec<u8>>> {
        if self.pace {
            let period = self.block_frames as f64 / self.sample_rate as f64;
            thread::sleep(Duration::from_secs_f64(period));
        }

        let rate = self.sample_rate as f32;
        let mut raw = Vec::with_capacity(self.block_frames * 4);
        for _ in 0..self.block_frames {
            let t = self.position as f32 / rate;
            // Envelope swells over two seconds so the intensity visibly moves.
            let envelope = 0.5 + 0.5 * (t * std::f32::consts::PI).sin();
            let sample = envelope * (t * self.frequency * std::f32::consts::TAU).sin();
            raw.extend_from_slice(&sample.to_le_bytes());
            self.position += 1;
        }
        Ok(Some(raw))
    }

    fn close(&mut self) {}
}
