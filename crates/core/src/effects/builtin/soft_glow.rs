use super::{overlays_for, Overlay, SOFT_GLOW_ID};
use crate::effects::{Effect, EffectDescriptor};
use crate::{FusedSignal, Monitor, Result};

/// Lowest brightness factor applied to the glow so it never goes fully dark.
const MIN_INTENSITY: f32 = 0.3;

/// Solid color glow that follows the screen color, brightened by audio.
#[derive(Debug)]
pub struct SoftGlowEffect {
    descriptor: EffectDescriptor,
    overlays: Vec<Overlay>,
    disposed: bool,
}

impl Default for SoftGlowEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftGlowEffect {
    pub fn new() -> Self {
        Self {
            descriptor: EffectDescriptor::new(
                SOFT_GLOW_ID,
                "Soft Glow",
                "Solid color ambient glow that responds to screen colors and audio intensity",
            ),
            overlays: Vec::new(),
            disposed: false,
        }
    }

    pub fn overlays(&self) -> &[Overlay] {
        &self.overlays
    }
}

impl Effect for SoftGlowEffect {
    fn descriptor(&self) -> &EffectDescriptor {
        &self.descriptor
    }

    fn initialize(&mut self, targets: &[Monitor]) -> Result<()> {
        self.overlays = overlays_for(targets);
        tracing::debug!(overlays = self.overlays.len(), "soft glow initialized");
        Ok(())
    }

    fn update(&mut self, signal: &FusedSignal) {
        if self.disposed {
            return;
        }
        let brightness = signal.audio_intensity().max(MIN_INTENSITY);
        let fill = signal.dominant_color().scaled(brightness);
        for overlay in &mut self.overlays {
            overlay.fill = fill;
        }
    }

    fn show(&mut self) -> Result<()> {
        for overlay in &mut self.overlays {
            overlay.visible = true;
        }
        Ok(())
    }

    fn hide(&mut self) -> Result<()> {
        for overlay in &mut self.overlays {
            overlay.visible = false;
        }
        Ok(())
    }

    fn dispose(&mut self) {
        if !self.disposed {
            self.overlays.clear();
            self.disposed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Rgb;
    use chrono::Utc;

    fn targets() -> Vec<Monitor> {
        vec![
            Monitor::new("primary", "Main", true),
            Monitor::new("left", "Left", false),
            Monitor::new("right", "Right", false),
        ]
    }

    #[test]
    fn binds_only_secondary_monitors() {
        let mut effect = SoftGlowEffect::new();
        effect.initialize(&targets()).unwrap();
        let ids: Vec<&str> = effect.overlays().iter().map(|o| o.monitor.id.as_str()).collect();
        assert_eq!(ids, vec!["left", "right"]);
        assert!(effect.overlays().iter().all(|o| !o.visible));
    }

    #[test]
    fn brightness_never_drops_below_floor() {
        let mut effect = SoftGlowEffect::new();
        effect.initialize(&targets()).unwrap();

        effect.update(&FusedSignal::new(Rgb::new(200, 100, 50), 0.0, Utc::now()));
        assert_eq!(effect.overlays()[0].fill, Rgb::new(60, 30, 15));

        effect.update(&FusedSignal::new(Rgb::new(200, 100, 50), 1.0, Utc::now()));
        assert_eq!(effect.overlays()[1].fill, Rgb::new(200, 100, 50));
    }

    #[test]
    fn show_hide_and_dispose() {
        let mut effect = SoftGlowEffect::new();
        effect.initialize(&targets()).unwrap();
        effect.show().unwrap();
        assert!(effect.overlays().iter().all(|o| o.visible));
        effect.hide().unwrap();
        assert!(effect.overlays().iter().all(|o| !o.visible));

        effect.dispose();
        effect.dispose();
        assert!(effect.overlays().is_empty());
        effect.update(&FusedSignal::new(Rgb::new(1, 1, 1), 1.0, Utc::now()));
    }
}
