use std::collections::VecDeque;

use super::Rgb;

pub const DEFAULT_SMOOTHING_WINDOW: usize = 5;

/// Trailing-window mean over the color and intensity streams.
///
/// Not synchronized; the owner is expected to serialize access.
#[derive(Debug, Clone)]
pub struct SignalSmoother {
    window: usize,
    colors: VecDeque<Rgb>,
    intensities: VecDeque<f32>,
}

impl Default for SignalSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING_WINDOW)
    }
}

impl SignalSmoother {
    /// Creates a smoother averaging over the last `window` samples. A window
    /// of zero is treated as one (no smoothing).
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            colors: VecDeque::with_capacity(window + 1),
            intensities: VecDeque::with_capacity(window + 1),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Appends a color sample and returns the per-channel mean of the window,
    /// rounded to the nearest integer.
    pub fn push_color(&mut self, sample: Rgb) -> Rgb {
        push_bounded(&mut self.colors, sample, self.window);

        let (mut r, mut g, mut b) = (0u32, 0u32, 0u32);
        for color in &self.colors {
            r += u32::from(color.r);
            g += u32::from(color.g);
            b += u32::from(color.b);
        }
        let count = self.colors.len() as f32;
        let mean = |sum: u32| (sum as f32 / count).round().min(255.0) as u8;
        Rgb::new(mean(r), mean(g), mean(b))
    }

    /// Appends an intensity sample and returns the arithmetic mean of the
    /// window. Values are not clamped here.
    pub fn push_intensity(&mut self, sample: f32) -> f32 {
        push_bounded(&mut self.intensities, sample, self.window);
        let sum: f32 = self.intensities.iter().sum();
        sum / self.intensities.len() as f32
    }

    /// Number of buffered `(color, intensity)` samples.
    pub fn len(&self) -> (usize, usize) {
        (self.colors.len(), self.intensities.len())
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty() && self.intensities.is_empty()
    }

    pub fn reset(&mut self) {
        self.colors.clear();
        self.intensities.clear();
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, sample: T, window: usize) {
    queue.push_back(sample);
    while queue.len() > window {
        queue.pop_front();
    }
}
