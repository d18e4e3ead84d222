//! Lifecycle of the single active effect.
//!
//! [`EffectRuntime`] owns one slot holding the current effect id and, once
//! created, its instance. Every transition runs under one lock and is
//! all-or-nothing: when creating, initializing, showing or hiding an instance
//! fails, the running flag and the slot are left exactly as they were.
//! Status messages are emitted only after the lock is released.

use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::thread;

use super::{registry::normalize_id, Effect, EffectRegistry};
use crate::events::{Notifier, SubscriptionId};
use crate::monitor::{Monitor, MonitorSource, TargetMonitorSet};
use crate::processing::SignalProcessor;
use crate::{AmbientError, EngineConfig, FusedSignal, Result};

/// Registry handle shared between the runtime and whoever registers effects.
pub type SharedRegistry = Arc<RwLock<EffectRegistry>>;

/// Whether the current effect is visible and receiving signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
}

/// State machine driving the active effect.
///
/// Cloning yields another handle to the same runtime.
#[derive(Clone)]
pub struct EffectRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    registry: SharedRegistry,
    monitors: Arc<dyn MonitorSource>,
    state: Mutex<RuntimeState>,
    status: Notifier<String>,
    monitor_subscription: Mutex<Option<SubscriptionId>>,
    signal_link: Mutex<Option<(SignalProcessor, SubscriptionId)>>,
    /// Serializes enumerate-then-apply so an older enumeration never lands
    /// after a newer one.
    reload_gate: Mutex<()>,
}

struct RuntimeState {
    running: bool,
    disposed: bool,
    effect_id: String,
    current: Option<Box<dyn Effect>>,
    targets: TargetMonitorSet,
    available: Vec<Monitor>,
}

impl RuntimeState {
    fn resolved(&self) -> Vec<Monitor> {
        self.targets.resolve(&self.available)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            return Err(AmbientError::msg("effect runtime has been disposed"));
        }
        Ok(())
    }
}

impl EffectRuntime {
    /// Creates a stopped runtime, loads the current monitor list and starts
    /// listening for monitor configuration changes.
    pub fn new(
        registry: SharedRegistry,
        monitors: Arc<dyn MonitorSource>,
        config: &EngineConfig,
    ) -> Self {
        let available = match monitors.connected_monitors() {
            Ok(list) => list,
            Err(err) => {
                tracing::warn!(error = %err, "initial monitor enumeration failed");
                Vec::new()
            }
        };
        let mut effect_id = normalize_id(&config.default_effect);
        if effect_id.is_empty() {
            effect_id = crate::config::DEFAULT_EFFECT_ID.to_string();
        }

        let inner = Arc::new(RuntimeInner {
            registry,
            monitors,
            state: Mutex::new(RuntimeState {
                running: false,
                disposed: false,
                effect_id,
                current: None,
                targets: TargetMonitorSet::all_secondary(),
                available,
            }),
            status: Notifier::new(),
            monitor_subscription: Mutex::new(None),
            signal_link: Mutex::new(None),
            reload_gate: Mutex::new(()),
        });

        let weak = Arc::downgrade(&inner);
        let subscription = inner.monitors.changes().subscribe(move |_| {
            if let Some(inner) = Weak::upgrade(&weak) {
                RuntimeInner::spawn_reload(inner);
            }
        });
        *lock(&inner.monitor_subscription) = Some(subscription);

        Self { inner }
    }

    /// Human-readable status messages for every transition, successful or not.
    pub fn status(&self) -> &Notifier<String> {
        &self.inner.status
    }

    /// Routes the processor's fused signals into this runtime. Attaching to a
    /// new processor detaches from the previous one.
    pub fn attach(&self, processor: &SignalProcessor) {
        let weak = Arc::downgrade(&self.inner);
        let subscription = processor.signals().subscribe(move |signal| {
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.forward_signal(signal);
            }
        });
        let previous = lock(&self.inner.signal_link).replace((processor.clone(), subscription));
        if let Some((old, id)) = previous {
            old.signals().unsubscribe(id);
        }
    }

    /// Shows the current effect, creating the configured one first if the
    /// slot is empty. No-op while already running.
    pub fn start(&self) -> Result<()> {
        let mut messages = Vec::new();
        let result = {
            let mut state = self.inner.lock_state();
            self.inner.start_locked(&mut state, &mut messages)
        };
        self.inner.publish(messages);
        result
    }

    /// Hides the current effect without disposing it. No-op while stopped.
    pub fn stop(&self) -> Result<()> {
        let mut messages = Vec::new();
        let result = {
            let mut state = self.inner.lock_state();
            self.inner.stop_locked(&mut state, &mut messages)
        };
        self.inner.publish(messages);
        result
    }

    /// Replaces the current effect with a fresh instance of `id`.
    ///
    /// Blank ids and the current id are no-ops. An unregistered id, or a
    /// new instance that fails to come up, leaves the old instance in place.
    pub fn set_current_effect(&self, id: &str) -> Result<()> {
        let key = normalize_id(id);
        let mut messages = Vec::new();
        let result = {
            let mut state = self.inner.lock_state();
            self.inner.switch_locked(&mut state, &key, &mut messages)
        };
        self.inner.publish(messages);
        result
    }

    /// Changes which monitors the effect renders to and rebinds the current
    /// instance. An identical id sequence is a no-op.
    pub fn set_target_monitors<I, S>(&self, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let targets = TargetMonitorSet::new(ids);
        let mut messages = Vec::new();
        let result = {
            let mut state = self.inner.lock_state();
            self.inner.retarget_locked(&mut state, targets, &mut messages)
        };
        self.inner.publish(messages);
        result
    }

    /// Re-enumerates monitors synchronously and rebinds the running effect.
    /// Returns the number of monitors the effect is now bound to.
    pub fn reload_monitors(&self) -> Result<usize> {
        self.inner.reload()
    }

    /// Schedules a monitor reload on a background thread.
    pub fn on_monitors_changed(&self) {
        RuntimeInner::spawn_reload(self.inner.clone());
    }

    /// Forwards `signal` to the current effect while running; otherwise the
    /// signal is dropped.
    pub fn on_fused_signal(&self, signal: &FusedSignal) {
        self.inner.forward_signal(signal);
    }

    /// Stops, disposes the current instance and detaches from the processor
    /// and the monitor source. Safe to call repeatedly.
    pub fn dispose(&self) {
        let mut messages = Vec::new();
        {
            let mut state = self.inner.lock_state();
            if state.disposed {
                return;
            }
            if let Err(err) = self.inner.stop_locked(&mut state, &mut messages) {
                tracing::warn!(error = %err, "failed to hide effect during dispose");
                state.running = false;
            }
            if let Some(mut current) = state.current.take() {
                current.dispose();
            }
            state.disposed = true;
        }
        self.inner.publish(messages);

        if let Some((processor, id)) = lock(&self.inner.signal_link).take() {
            processor.signals().unsubscribe(id);
        }
        if let Some(id) = lock(&self.inner.monitor_subscription).take() {
            self.inner.monitors.changes().unsubscribe(id);
        }
        tracing::info!("effect runtime disposed");
    }

    /// `true` between a successful `start` and the next successful `stop`.
    pub fn is_running(&self) -> bool {
        self.inner.lock_state().running
    }

    pub fn state(&self) -> RunState {
        if self.is_running() {
            RunState::Running
        } else {
            RunState::Stopped
        }
    }

    /// Canonical id of the effect in the slot, or of the effect `start`
    /// will create.
    pub fn current_effect_id(&self) -> String {
        self.inner.lock_state().effect_id.clone()
    }

    /// Whether an instance currently occupies the slot.
    pub fn has_instance(&self) -> bool {
        self.inner.lock_state().current.is_some()
    }

    /// Whether `id` (any casing) can be instantiated by this runtime.
    pub fn is_effect_registered(&self, id: &str) -> bool {
        match self.inner.registry.read() {
            Ok(registry) => registry.is_registered(id),
            Err(poisoned) => poisoned.into_inner().is_registered(id),
        }
    }

    /// The configured selection; empty means every secondary monitor.
    pub fn target_monitor_ids(&self) -> Vec<String> {
        self.inner.lock_state().targets.ids().to_vec()
    }

    /// The targets resolved against the latest monitor snapshot.
    pub fn resolved_monitors(&self) -> Vec<Monitor> {
        self.inner.lock_state().resolved()
    }

    /// Latest successful enumeration, primary monitor included.
    pub fn available_monitors(&self) -> Vec<Monitor> {
        self.inner.lock_state().available.clone()
    }
}

impl std::fmt::Debug for EffectRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("EffectRuntime")
            .field("running", &state.running)
            .field("effect_id", &state.effect_id)
            .field("has_instance", &state.current.is_some())
            .field("targets", &state.targets)
            .finish()
    }
}

impl RuntimeInner {
    fn lock_state(&self) -> MutexGuard<'_, RuntimeState> {
        lock(&self.state)
    }

    fn publish(&self, messages: Vec<String>) {
        for message in messages {
            self.status.emit(&message);
        }
    }

    fn forward_signal(&self, signal: &FusedSignal) {
        let mut state = self.lock_state();
        if !state.running {
            return;
        }
        if let Some(current) = state.current.as_mut() {
            current.update(signal);
        }
    }

    /// Creates and initializes an instance of `id` bound to `targets`.
    fn instantiate(&self, id: &str, targets: &[Monitor]) -> Result<Box<dyn Effect>> {
        let mut effect = self
            .registry
            .read()
            .map_err(|_| AmbientError::Poisoned("effect registry"))?
            .create(id)?;
        if let Err(err) = effect.initialize(targets) {
            effect.dispose();
            return Err(render_error(id, "initialize", err));
        }
        tracing::debug!(effect = id, monitors = targets.len(), "effect instance created");
        Ok(effect)
    }

    /// Puts a fresh instance of `id` bound to `targets` into the slot. When
    /// running, the old instance is hidden and the new one shown; on failure
    /// the old instance keeps its slot and its visibility.
    fn replace_instance(
        &self,
        state: &mut RuntimeState,
        id: &str,
        targets: &[Monitor],
    ) -> Result<()> {
        let mut next = self.instantiate(id, targets)?;
        if state.running {
            if let Some(current) = state.current.as_mut() {
                if let Err(err) = current.hide() {
                    next.dispose();
                    return Err(render_error(&state.effect_id, "hide", err));
                }
            }
            if let Err(err) = next.show() {
                next.dispose();
                if let Some(current) = state.current.as_mut() {
                    if let Err(restore) = current.show() {
                        tracing::error!(
                            effect = %state.effect_id,
                            error = %restore,
                            "failed to restore previous effect"
                        );
                    }
                }
                return Err(render_error(id, "show", err));
            }
        }
        if let Some(mut old) = state.current.replace(next) {
            old.dispose();
        }
        Ok(())
    }

    fn start_locked(&self, state: &mut RuntimeState, messages: &mut Vec<String>) -> Result<()> {
        state.ensure_live()?;
        if state.running {
            return Ok(());
        }

        let outcome = match state.current.as_mut() {
            Some(current) => current
                .show()
                .map_err(|err| render_error(&state.effect_id, "show", err)),
            None => {
                let targets = state.resolved();
                self.instantiate(&state.effect_id, &targets)
                    .and_then(|mut effect| match effect.show() {
                        Ok(()) => {
                            state.current = Some(effect);
                            Ok(())
                        }
                        Err(err) => {
                            effect.dispose();
                            Err(render_error(&state.effect_id, "show", err))
                        }
                    })
            }
        };

        match outcome {
            Ok(()) => {
                state.running = true;
                let name = display_name(state);
                tracing::info!(effect = %state.effect_id, "effects rendering started");
                messages.push(format!("Effects rendering started with {name} effect"));
                Ok(())
            }
            Err(err) => {
                tracing::warn!(effect = %state.effect_id, error = %err, "failed to start effects");
                messages.push(format!("Failed to start effects rendering: {err}"));
                Err(err)
            }
        }
    }

    fn stop_locked(&self, state: &mut RuntimeState, messages: &mut Vec<String>) -> Result<()> {
        if !state.running {
            return Ok(());
        }
        if let Some(current) = state.current.as_mut() {
            if let Err(err) = current.hide() {
                let err = render_error(&state.effect_id, "hide", err);
                messages.push(format!("Failed to stop effects rendering: {err}"));
                return Err(err);
            }
        }
        state.running = false;
        tracing::info!(effect = %state.effect_id, "effects rendering stopped");
        messages.push("Effects rendering stopped".to_string());
        Ok(())
    }

    fn switch_locked(
        &self,
        state: &mut RuntimeState,
        key: &str,
        messages: &mut Vec<String>,
    ) -> Result<()> {
        state.ensure_live()?;
        if key.is_empty() || key == state.effect_id {
            return Ok(());
        }

        let targets = state.resolved();
        match self.replace_instance(state, key, &targets) {
            Ok(()) => {
                state.effect_id = key.to_string();
                let name = display_name(state);
                tracing::info!(effect = key, running = state.running, "switched effect");
                messages.push(format!("Switched to {name} effect"));
                Ok(())
            }
            Err(err) => {
                tracing::warn!(effect = key, error = %err, "effect switch rejected");
                messages.push(format!("Failed to switch to effect '{key}': {err}"));
                Err(err)
            }
        }
    }

    fn retarget_locked(
        &self,
        state: &mut RuntimeState,
        targets: TargetMonitorSet,
        messages: &mut Vec<String>,
    ) -> Result<()> {
        state.ensure_live()?;
        if targets == state.targets {
            return Ok(());
        }

        let resolved = targets.resolve(&state.available);
        if state.current.is_some() {
            let id = state.effect_id.clone();
            if let Err(err) = self.replace_instance(state, &id, &resolved) {
                tracing::warn!(error = %err, "target monitor update rejected");
                messages.push(format!("Failed to update target monitors: {err}"));
                return Err(err);
            }
        }
        state.targets = targets;
        tracing::info!(monitors = resolved.len(), "target monitors updated");
        messages.push(format!(
            "Updated target monitors: {} monitor(s) selected for effects",
            resolved.len()
        ));
        Ok(())
    }

    fn reload(&self) -> Result<usize> {
        let mut messages = Vec::new();
        let result = {
            let _gate = lock(&self.reload_gate);
            match self.monitors.connected_monitors() {
                Ok(listed) => {
                    let mut state = self.lock_state();
                    self.apply_monitors(&mut state, listed, &mut messages)
                }
                Err(err) => {
                    tracing::warn!(error = %err, "monitor reload failed");
                    messages.push(format!("Failed to load monitors: {err}"));
                    Err(err)
                }
            }
        };
        self.publish(messages);
        result
    }

    fn apply_monitors(
        &self,
        state: &mut RuntimeState,
        listed: Vec<Monitor>,
        messages: &mut Vec<String>,
    ) -> Result<usize> {
        state.ensure_live()?;
        let secondary = listed.iter().filter(|m| !m.is_primary).count();
        messages.push(format!(
            "Detected {} monitors ({secondary} secondary)",
            listed.len()
        ));
        state.available = listed;

        let resolved = state.resolved();
        if state.running && state.current.is_some() {
            let id = state.effect_id.clone();
            if let Err(err) = self.replace_instance(state, &id, &resolved) {
                tracing::warn!(error = %err, "failed to rebind effect after monitor change");
                messages.push(format!("Failed to update effect '{id}' after monitor change: {err}"));
                return Err(err);
            }
            tracing::info!(monitors = resolved.len(), "effect rebound after monitor change");
            messages.push(format!(
                "Monitor configuration changed - effects updated on {} monitor(s)",
                resolved.len()
            ));
        }
        Ok(resolved.len())
    }

    fn spawn_reload(inner: Arc<Self>) {
        let spawned = thread::Builder::new()
            .name("monitor-reload".to_string())
            .spawn(move || {
                if let Err(err) = inner.reload() {
                    tracing::debug!(error = %err, "background monitor reload failed");
                }
            });
        if let Err(err) = spawned {
            tracing::error!(error = %err, "failed to spawn monitor reload thread");
        }
    }
}

fn display_name(state: &RuntimeState) -> String {
    state
        .current
        .as_ref()
        .map(|effect| effect.name().to_string())
        .unwrap_or_else(|| state.effect_id.clone())
}

/// Attributes an effect failure to `effect` unless it already names one.
fn render_error(effect: &str, operation: &'static str, err: AmbientError) -> AmbientError {
    match err {
        err @ AmbientError::Render { .. } => err,
        other => AmbientError::render(effect, operation, other),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
