//! Values flowing from the processor into the active effect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod smoother;

pub use smoother::SignalSmoother;

/// 8-bit RGB triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Multiplies every channel by `factor`, truncating toward zero.
    pub fn scaled(self, factor: f32) -> Self {
        let factor = if factor.is_nan() {
            0.0
        } else {
            factor.clamp(0.0, 1.0)
        };
        let scale = |channel: u8| (channel as f32 * factor) as u8;
        Self::new(scale(self.r), scale(self.g), scale(self.b))
    }
}

/// The single `(color, intensity, timestamp)` value published after combining
/// the screen and audio streams.
///
/// Instances are immutable; the audio intensity is clamped to `[0, 1]` on
/// construction so every consumer can rely on the range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawFusedSignal")]
pub struct FusedSignal {
    dominant_color: Rgb,
    audio_intensity: f32,
    timestamp: DateTime<Utc>,
}

/// Wire form of [`FusedSignal`]; decoding goes through [`FusedSignal::new`].
#[derive(Deserialize)]
struct RawFusedSignal {
    dominant_color: Rgb,
    audio_intensity: f32,
    timestamp: DateTime<Utc>,
}

impl From<RawFusedSignal> for FusedSignal {
    fn from(raw: RawFusedSignal) -> Self {
        Self::new(raw.dominant_color, raw.audio_intensity, raw.timestamp)
    }
}

impl FusedSignal {
    pub fn new(dominant_color: Rgb, audio_intensity: f32, timestamp: DateTime<Utc>) -> Self {
        let audio_intensity = if audio_intensity.is_nan() {
            0.0
        } else {
            audio_intensity.clamp(0.0, 1.0)
        };
        Self {
            dominant_color,
            audio_intensity,
            timestamp,
        }
    }

    pub fn dominant_color(&self) -> Rgb {
        self.dominant_color
    }

    pub fn audio_intensity(&self) -> f32 {
        self.audio_intensity
    }

    /// Intensity on a 0–100 scale for status displays.
    pub fn audio_intensity_percent(&self) -> f32 {
        self.audio_intensity * 100.0
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Default for FusedSignal {
    fn default() -> Self {
        Self::new(Rgb::BLACK, 0.0, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn clamps_intensity_on_construction() {
        let now = Utc::now();
        assert_eq!(FusedSignal::new(Rgb::BLACK, 2.5, now).audio_intensity(), 1.0);
        assert_eq!(FusedSignal::new(Rgb::BLACK, -0.3, now).audio_intensity(), 0.0);
        assert_eq!(
            FusedSignal::new(Rgb::BLACK, f32::NAN, now).audio_intensity(),
            0.0
        );
        assert_relative_eq!(
            FusedSignal::new(Rgb::BLACK, 0.42, now).audio_intensity_percent(),
            42.0,
            epsilon = 1e-4
        );
    }

    #[test]
    fn decoding_clamps_out_of_range_intensity() {
        let signal: FusedSignal = serde_json::from_str(
            r#"{ "dominant_color": { "r": 1, "g": 2, "b": 3 },
                 "audio_intensity": 5.0,
                 "timestamp": "2026-01-02T03:04:05Z" }"#,
        )
        .unwrap();
        assert_eq!(signal.audio_intensity(), 1.0);
        assert_eq!(signal.dominant_color(), Rgb::new(1, 2, 3));

        let negative: FusedSignal = serde_json::from_str(
            r#"{ "dominant_color": { "r": 0, "g": 0, "b": 0 },
                 "audio_intensity": -2.0,
                 "timestamp": "2026-01-02T03:04:05Z" }"#,
        )
        .unwrap();
        assert_eq!(negative.audio_intensity(), 0.0);
    }

    #[test]
    fn encoding_round_trips_through_the_constructor() {
        let signal = FusedSignal::new(Rgb::new(9, 8, 7), 0.25, Utc::now());
        let text = serde_json::to_string(&signal).unwrap();
        let decoded: FusedSignal = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, signal);
    }

    #[test]
    fn scaling_truncates_channels() {
        let color = Rgb::new(200, 101, 3);
        assert_eq!(color.scaled(0.5), Rgb::new(100, 50, 1));
        assert_eq!(color.scaled(3.0), color);
        assert_eq!(color.scaled(-1.0), Rgb::BLACK);
    }
}
