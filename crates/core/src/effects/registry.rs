//! Lookup of effect id to factory.
//!
//! Keys are canonicalized (trimmed, lowercased) on registration and on every
//! lookup, so callers may use any casing.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{builtin, Effect, EffectDescriptor, EffectFactory};
use crate::{AmbientError, Result};

/// Canonical form of an effect id.
pub fn normalize_id(id: &str) -> String {
    id.trim().to_lowercase()
}

/// Owned registry of effect factories.
///
/// `new()` starts with the built-in effects; `empty()` starts bare.
#[derive(Clone)]
pub struct EffectRegistry {
    factories: HashMap<String, EffectFactory>,
}

impl Default for EffectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::with_builtins()
    }

    /// Creates a registry holding `softglow` and `generativevisualizer`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        builtin::register_builtins(&mut registry);
        registry
    }

    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registers `factory` under `id`, replacing any previous factory for the
    /// same id.
    pub fn register<F>(&mut self, id: &str, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Effect> + Send + Sync + 'static,
    {
        let key = normalize_id(id);
        if key.is_empty() {
            return Err(AmbientError::InvalidEffectId);
        }
        if self.factories.insert(key.clone(), Arc::new(factory)).is_some() {
            tracing::debug!(effect = %key, "replaced effect factory");
        }
        Ok(())
    }

    /// Instantiates the effect registered under `id` (any casing).
    pub fn create(&self, id: &str) -> Result<Box<dyn Effect>> {
        let key = normalize_id(id);
        if key.is_empty() {
            return Err(AmbientError::InvalidEffectId);
        }
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| AmbientError::EffectNotRegistered(id.trim().to_string()))?;
        Ok(factory())
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.factories.contains_key(&normalize_id(id))
    }

    /// Returns `true` when a factory was removed.
    pub fn unregister(&mut self, id: &str) -> bool {
        self.factories.remove(&normalize_id(id)).is_some()
    }

    /// Registered ids in alphabetical order.
    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Metadata of every registered effect, ordered by id.
    ///
    /// Each effect is instantiated briefly to read its descriptor and then
    /// disposed without being initialized.
    pub fn descriptors(&self) -> Vec<EffectDescriptor> {
        self.list_ids()
            .iter()
            .filter_map(|id| self.factories.get(id))
            .map(|factory| {
                let mut effect = factory();
                let descriptor = effect.descriptor().clone();
                effect.dispose();
                descriptor
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for EffectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectRegistry")
            .field("ids", &self.list_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::SoftGlowEffect;

    #[test]
    fn builtins_are_registered_at_startup() {
        let registry = EffectRegistry::new();
        assert_eq!(
            registry.list_ids(),
            vec!["generativevisualizer".to_string(), "softglow".to_string()]
        );
        assert!(registry.is_registered("SoftGlow"));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = EffectRegistry::new();
        let effect = registry.create("SOFTGLOW").unwrap();
        assert_eq!(effect.id(), "softglow");
        assert_eq!(effect.name(), "Soft Glow");
    }

    #[test]
    fn unknown_ids_are_named_in_the_error() {
        let registry = EffectRegistry::new();
        let err = registry.create("nonexistent").err().unwrap();
        let message = err.to_string();
        assert!(message.contains("nonexistent"));
        assert!(message.contains("not registered"));
    }

    #[test]
    fn blank_ids_are_rejected() {
        let mut registry = EffectRegistry::empty();
        let err = registry
            .register("   ", || Box::new(SoftGlowEffect::new()))
            .unwrap_err();
        assert!(matches!(err, AmbientError::InvalidEffectId));
        assert!(registry.is_empty());
        assert!(matches!(
            registry.create(""),
            Err(AmbientError::InvalidEffectId)
        ));
    }

    #[test]
    fn last_registration_wins_and_unregister_reports_presence() {
        let mut registry = EffectRegistry::new();
        registry
            .register(" GenerativeVisualizer ", || Box::new(SoftGlowEffect::new()))
            .unwrap();
        let effect = registry.create("generativevisualizer").unwrap();
        assert_eq!(effect.id(), "softglow");
        assert_eq!(registry.len(), 2);

        assert!(registry.unregister("GENERATIVEVISUALIZER"));
        assert!(!registry.unregister("generativevisualizer"));
        assert!(!registry.is_registered("generativevisualizer"));
    }

    #[test]
    fn descriptors_list_display_metadata() {
        let names: Vec<String> = EffectRegistry::new()
            .descriptors()
            .into_iter()
            .map(|d| d.display_name)
            .collect();
        assert_eq!(names, vec!["Generative Visualizer", "Soft Glow"]);
    }
}
