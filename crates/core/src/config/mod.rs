use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{effects::registry::normalize_id, Result};

pub const DEFAULT_EFFECT_ID: &str = "softglow";

/// Tuning knobs for the signal pipeline itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Screen sampling period; 33 ms is roughly 30 Hz.
    pub capture_interval_ms: u64,
    pub smoothing_window: usize,
    /// Worker threads processing frames and audio buffers.
    pub dispatch_workers: usize,
    pub default_effect: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capture_interval_ms: 33,
            smoothing_window: crate::signal::smoother::DEFAULT_SMOOTHING_WINDOW,
            dispatch_workers: 2,
            default_effect: DEFAULT_EFFECT_ID.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms.max(1))
    }
}

/// User-facing settings as stored by the application shell.
///
/// The core never reads or writes the settings file; it only consumes these
/// values to configure the processor and the effect runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppSettings {
    pub enabled: bool,
    pub selected_effect_id: String,
    pub audio_sensitivity: f32,
    pub source_monitor_id: String,
    pub target_monitor_ids: Vec<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            selected_effect_id: DEFAULT_EFFECT_ID.to_string(),
            audio_sensitivity: 0.5,
            source_monitor_id: String::new(),
            target_monitor_ids: Vec::new(),
        }
    }
}

impl AppSettings {
    /// Decodes a settings document; missing fields fall back to defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let settings: AppSettings = serde_json::from_str(text)?;
        Ok(settings.normalized())
    }

    /// Clamps the sensitivity and canonicalizes the effect id. A blank effect
    /// id falls back to the default effect.
    pub fn normalized(mut self) -> Self {
        self.audio_sensitivity = if self.audio_sensitivity.is_nan() {
            0.5
        } else {
            self.audio_sensitivity.clamp(0.0, 1.0)
        };
        let id = normalize_id(&self.selected_effect_id);
        self.selected_effect_id = if id.is_empty() {
            DEFAULT_EFFECT_ID.to_string()
        } else {
            id
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_camel_case_documents_with_defaults() {
        let settings = AppSettings::from_json(
            r#"{ "enabled": true, "selectedEffectId": " GenerativeVisualizer ",
                 "audioSensitivity": 4.0, "targetMonitorIds": ["\\\\.\\DISPLAY2"] }"#,
        )
        .unwrap();

        assert!(settings.enabled);
        assert_eq!(settings.selected_effect_id, "generativevisualizer");
        assert_eq!(settings.audio_sensitivity, 1.0);
        assert_eq!(settings.target_monitor_ids, vec![r"\\.\DISPLAY2".to_string()]);
        assert!(settings.source_monitor_id.is_empty());
    }

    #[test]
    fn blank_effect_falls_back_to_default() {
        let settings = AppSettings {
            selected_effect_id: "   ".into(),
            ..Default::default()
        }
        .normalized();
        assert_eq!(settings.selected_effect_id, DEFAULT_EFFECT_ID);
    }

    #[test]
    fn malformed_documents_are_reported() {
        assert!(AppSettings::from_json("{ not json").is_err());
    }

    #[test]
    fn engine_defaults_sample_at_thirty_hertz() {
        let config = EngineConfig::default();
        assert_eq!(config.capture_interval(), Duration::from_millis(33));
        assert_eq!(config.smoothing_window, 5);
        assert_eq!(config.default_effect, "softglow");
    }
}
