//! Effects available out of the box.

use crate::{Monitor, Rgb};

use super::EffectRegistry;

pub mod generative;
pub mod soft_glow;

pub use generative::{GenerativeVisualizerEffect, Particle, ParticleFrame};
pub use soft_glow::SoftGlowEffect;

pub const SOFT_GLOW_ID: &str = "softglow";
pub const GENERATIVE_VISUALIZER_ID: &str = "generativevisualizer";

pub(crate) fn register_builtins(registry: &mut EffectRegistry) {
    let builtins: [(&str, fn() -> Box<dyn super::Effect>); 2] = [
        (SOFT_GLOW_ID, || Box::new(SoftGlowEffect::new())),
        (GENERATIVE_VISUALIZER_ID, || {
            Box::new(GenerativeVisualizerEffect::new())
        }),
    ];
    for (id, factory) in builtins {
        if let Err(err) = registry.register(id, factory) {
            tracing::error!(effect = id, error = %err, "failed to register built-in effect");
        }
    }
}

/// Borderless full-screen surface covering one target monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    pub monitor: Monitor,
    pub visible: bool,
    pub fill: Rgb,
}

impl Overlay {
    fn new(monitor: Monitor) -> Self {
        Self {
            monitor,
            visible: false,
            fill: Rgb::BLACK,
        }
    }
}

/// One hidden overlay per target. Primary monitors are skipped even if a
/// caller passes them in.
pub(crate) fn overlays_for(targets: &[Monitor]) -> Vec<Overlay> {
    targets
        .iter()
        .filter(|monitor| !monitor.is_primary)
        .cloned()
        .map(Overlay::new)
        .collect()
}
