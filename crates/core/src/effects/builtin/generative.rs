use fastrand::Rng;

use super::{overlays_for, Overlay, GENERATIVE_VISUALIZER_ID};
use crate::effects::{Effect, EffectDescriptor};
use crate::{FusedSignal, Monitor, Result, Rgb};

const INITIAL_PARTICLES: usize = 100;
const MAX_PARTICLES: usize = 500;
const LIFE_DECAY: f32 = 0.005;
const MIN_ALPHA: f32 = 0.3;
const LINK_INTENSITY: f32 = 0.3;
const LINK_DISTANCE: f32 = 100.0;
const LINK_CANDIDATES: usize = 50;
const LINK_ALPHA: u8 = 50;
/// Canvas size used for spawning; overlays cover full monitors.
const CANVAS: (f32, f32) = (1920.0, 1080.0);

#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub x: f32,
    pub y: f32,
    pub velocity_x: f32,
    pub velocity_y: f32,
    pub size: f32,
    pub life: f32,
    pub max_life: f32,
}

impl Particle {
    fn normalized_life(&self) -> f32 {
        if self.max_life <= f32::EPSILON {
            return 0.0;
        }
        (self.life / self.max_life).clamp(0.0, 1.0)
    }
}

/// A particle ready to be drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct Dot {
    pub x: f32,
    pub y: f32,
    pub diameter: f32,
    pub color: Rgb,
    pub alpha: u8,
}

/// Faint line between two nearby particles.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub from: (f32, f32),
    pub to: (f32, f32),
    pub color: Rgb,
    pub alpha: u8,
}

/// Everything an overlay needs to paint one animation frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticleFrame {
    pub background: Rgb,
    pub dots: Vec<Dot>,
    pub links: Vec<Link>,
}

/// Particle field whose speed and density follow the audio intensity and
/// whose color follows the screen.
pub struct GenerativeVisualizerEffect {
    descriptor: EffectDescriptor,
    overlays: Vec<Overlay>,
    particles: Vec<Particle>,
    rng: Rng,
    color: Rgb,
    intensity: f32,
    updates: u64,
    disposed: bool,
}

impl Default for GenerativeVisualizerEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerativeVisualizerEffect {
    pub fn new() -> Self {
        Self::with_rng(Rng::new())
    }

    /// Uses a caller-supplied generator, e.g. a seeded one for reproducible output.
    pub fn with_rng(rng: Rng) -> Self {
        Self {
            descriptor: EffectDescriptor::new(
                GENERATIVE_VISUALIZER_ID,
                "Generative Visualizer",
                "Dynamic particle-based visualization that responds to audio intensity and screen colors",
            ),
            overlays: Vec::new(),
            particles: Vec::new(),
            rng,
            color: Rgb::new(0, 0, 255),
            intensity: 0.0,
            updates: 0,
            disposed: false,
        }
    }

    pub fn overlays(&self) -> &[Overlay] {
        &self.overlays
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    fn spawn(&mut self, speed: f32, size_range: (f32, f32), life_range: (f32, f32)) -> Particle {
        let (width, height) = CANVAS;
        Particle {
            x: self.rng.f32() * width,
            y: self.rng.f32() * height,
            velocity_x: (self.rng.f32() * 2.0 - 1.0) * speed,
            velocity_y: (self.rng.f32() * 2.0 - 1.0) * speed,
            size: size_range.0 + self.rng.f32() * (size_range.1 - size_range.0),
            life: 1.0,
            max_life: life_range.0 + self.rng.f32() * (life_range.1 - life_range.0),
        }
    }

    fn seed_particles(&mut self) {
        self.particles.clear();
        for _ in 0..INITIAL_PARTICLES {
            let particle = self.spawn(2.0, (2.0, 10.0), (2.0, 7.0));
            self.particles.push(particle);
        }
    }

    fn step_particles(&mut self) {
        let speed = 1.0 + self.intensity * 3.0;
        let spawn_count = (self.intensity * 10.0) as usize;

        self.particles.retain_mut(|particle| {
            particle.x += particle.velocity_x * speed;
            particle.y += particle.velocity_y * speed;
            particle.life -= LIFE_DECAY;
            particle.life > 0.0
        });

        for _ in 0..spawn_count {
            if self.particles.len() >= MAX_PARTICLES {
                break;
            }
            let particle = self.spawn(3.0, (3.0, 15.0), (1.0, 4.0));
            self.particles.push(particle);
        }
    }

    /// Builds the drawable frame for the current particle state.
    pub fn render_frame(&self) -> ParticleFrame {
        let (width, height) = CANVAS;
        let in_bounds =
            |p: &&Particle| p.x >= 0.0 && p.x < width && p.y >= 0.0 && p.y < height;

        let dots = self
            .particles
            .iter()
            .filter(in_bounds)
            .map(|p| {
                let life = p.normalized_life();
                Dot {
                    x: p.x,
                    y: p.y,
                    diameter: p.size * life,
                    color: self.color,
                    alpha: (life.max(MIN_ALPHA) * 255.0) as u8,
                }
            })
            .collect();

        let mut links = Vec::new();
        if self.intensity > LINK_INTENSITY {
            let nearby: Vec<&Particle> = self
                .particles
                .iter()
                .filter(|p| p.life > 0.5)
                .take(LINK_CANDIDATES)
                .collect();
            for i in 0..nearby.len() {
                for j in (i + 1)..(i + 5).min(nearby.len()) {
                    let (a, b) = (nearby[i], nearby[j]);
                    let distance = ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt();
                    if distance < LINK_DISTANCE {
                        links.push(Link {
                            from: (a.x, a.y),
                            to: (b.x, b.y),
                            color: self.color,
                            alpha: LINK_ALPHA,
                        });
                    }
                }
            }
        }

        ParticleFrame {
            background: Rgb::BLACK,
            dots,
            links,
        }
    }
}

impl Effect for GenerativeVisualizerEffect {
    fn descriptor(&self) -> &EffectDescriptor {
        &self.descriptor
    }

    fn initialize(&mut self, targets: &[Monitor]) -> Result<()> {
        self.overlays = overlays_for(targets);
        self.seed_particles();
        tracing::debug!(
            overlays = self.overlays.len(),
            particles = self.particles.len(),
            "generative visualizer initialized"
        );
        Ok(())
    }

    fn update(&mut self, signal: &FusedSignal) {
        if self.disposed {
            return;
        }
        self.color = signal.dominant_color();
        self.intensity = signal.audio_intensity();
        self.updates += 1;
        self.step_particles();
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
            self.particles.clear();
            self.disposed = true;
        }
    }
}

impl std::fmt::Debug for GenerativeVisualizerEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerativeVisualizerEffect")
            .field("overlays", &self.overlays.len())
            .field("particles", &self.particles.len())
            .field("color", &self.color)
            .field("intensity", &self.intensity)
            .field("disposed", &self.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn effect() -> GenerativeVisualizerEffect {
        let mut effect = GenerativeVisualizerEffect::with_rng(Rng::with_seed(7));
        effect
            .initialize(&[
                Monitor::new("primary", "Main", true),
                Monitor::new("side", "Side", false),
            ])
            .unwrap();
        effect
    }

    fn signal(intensity: f32) -> FusedSignal {
        FusedSignal::new(Rgb::new(255, 128, 0), intensity, Utc::now())
    }

    #[test]
    fn seeds_initial_particles_and_skips_primary() {
        let effect = effect();
        assert_eq!(effect.particles().len(), INITIAL_PARTICLES);
        assert_eq!(effect.overlays().len(), 1);
        assert_eq!(effect.overlays()[0].monitor.id, "side");
    }

    #[test]
    fn loud_audio_spawns_particles_up_to_the_cap() {
        let mut effect = effect();
        effect.update(&signal(1.0));
        assert_eq!(effect.particles().len(), INITIAL_PARTICLES + 10);

        for _ in 0..100 {
            effect.update(&signal(1.0));
        }
        assert_eq!(effect.particles().len(), MAX_PARTICLES);
    }

    #[test]
    fn silence_lets_particles_fade_out() {
        let mut effect = effect();
        for _ in 0..=(1.0 / LIFE_DECAY) as usize {
            effect.update(&signal(0.0));
        }
        assert!(effect.particles().is_empty());
        assert_eq!(effect.updates(), 201);
    }

    fn cluster() -> Vec<Particle> {
        [(500.0, 500.0), (510.0, 500.0), (500.0, 510.0), (520.0, 520.0)]
            .into_iter()
            .map(|(x, y)| Particle {
                x,
                y,
                velocity_x: 0.0,
                velocity_y: 0.0,
                size: 8.0,
                life: 1.0,
                max_life: 1.0,
            })
            .collect()
    }

    #[test]
    fn quiet_frames_use_signal_color_without_links() {
        let mut effect = effect();
        effect.particles = cluster();
        effect.update(&signal(0.2));
        let quiet = effect.render_frame();
        assert!(quiet.links.is_empty());
        assert_eq!(quiet.dots.len(), effect.particles().len());
        assert!(quiet.dots.iter().all(|d| d.color == Rgb::new(255, 128, 0)));
        assert!(quiet.dots.iter().all(|d| d.alpha >= (MIN_ALPHA * 255.0) as u8));
    }

    #[test]
    fn loud_frames_link_nearby_particles() {
        let mut effect = effect();
        effect.particles = cluster();
        effect.update(&signal(0.8));
        let loud = effect.render_frame();

        assert!(loud.links.len() >= 6);
        assert!(loud.links.iter().all(|l| l.alpha == LINK_ALPHA));
        assert!(loud.links.iter().all(|l| l.color == Rgb::new(255, 128, 0)));
        assert!(loud
            .links
            .iter()
            .any(|l| l.from == (500.0, 500.0) && l.to == (520.0, 520.0)));
    }

    #[test]
    fn dispose_releases_everything() {
        let mut effect = effect();
        effect.show().unwrap();
        assert!(effect.overlays()[0].visible);
        effect.dispose();
        effect.update(&signal(1.0));
        assert!(effect.particles().is_empty());
        assert!(effect.overlays().is_empty());
    }
}
