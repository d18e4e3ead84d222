//! Pluggable visual effects and the runtime that drives them.
//!
//! An [`Effect`] owns whatever rendering resources it needs for the monitors
//! it was initialized with. Effects are created through the
//! [`EffectRegistry`] and live in the single slot of the [`EffectRuntime`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{FusedSignal, Monitor, Result};

pub mod builtin;
pub mod registry;
pub mod runtime;

pub use builtin::{GenerativeVisualizerEffect, Overlay, SoftGlowEffect};
pub use registry::EffectRegistry;
pub use runtime::{EffectRuntime, RunState, SharedRegistry};

/// Static metadata describing an effect kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectDescriptor {
    /// Lowercase registry key.
    pub id: String,
    pub display_name: String,
    pub description: String,
}

impl EffectDescriptor {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: registry::normalize_id(&id.into()),
            display_name: display_name.into(),
            description: description.into(),
        }
    }
}

/// Capability shared by every effect kind.
///
/// `show`, `hide` and `update` must run in whatever execution context owns
/// the effect's rendering resources; marshalling into that context is the
/// effect's own responsibility.
pub trait Effect: Send {
    fn descriptor(&self) -> &EffectDescriptor;

    fn id(&self) -> &str {
        &self.descriptor().id
    }

    fn name(&self) -> &str {
        &self.descriptor().display_name
    }

    /// Binds the effect to its target monitors. Called exactly once, before
    /// any other lifecycle method.
    fn initialize(&mut self, targets: &[Monitor]) -> Result<()>;

    /// Applies the latest fused signal.
    fn update(&mut self, signal: &FusedSignal);

    fn show(&mut self) -> Result<()>;

    /// Hides every surface without releasing it.
    fn hide(&mut self) -> Result<()>;

    /// Releases all rendering resources. Must tolerate repeated calls.
    fn dispose(&mut self);
}

/// Constructor registered for an effect id.
pub type EffectFactory = Arc<dyn Fn() -> Box<dyn Effect> + Send + Sync>;
