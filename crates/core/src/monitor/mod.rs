//! Display inventory and target resolution.

use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::{events::Notifier, AmbientError, Result};

/// A connected display as reported by the monitor detection collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Monitor {
    /// Opaque id, stable across enumerations.
    pub id: String,
    pub name: String,
    pub is_primary: bool,
}

impl Monitor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, is_primary: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_primary,
        }
    }
}

/// Source of the connected-monitor list plus change notifications.
pub trait MonitorSource: Send + Sync {
    /// Enumerates connected monitors. Implementations guarantee exactly one
    /// primary monitor and stable ids across calls.
    fn connected_monitors(&self) -> Result<Vec<Monitor>>;

    /// Raised with the new monitor list whenever displays are (un)plugged.
    fn changes(&self) -> &Notifier<Vec<Monitor>>;
}

/// Ordered selection of monitor ids. Empty means "every non-primary monitor".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetMonitorSet {
    ids: Vec<String>,
}

impl TargetMonitorSet {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn all_secondary() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn is_all_secondary(&self) -> bool {
        self.ids.is_empty()
    }

    /// Resolves the selection against the current monitor list.
    ///
    /// Primary monitors are always excluded, even when listed explicitly.
    /// Explicit selections keep the configured order; unknown ids and
    /// duplicates are skipped.
    pub fn resolve(&self, available: &[Monitor]) -> Vec<Monitor> {
        let primaries = available.iter().filter(|m| m.is_primary).count();
        if !available.is_empty() && primaries != 1 {
            tracing::warn!(
                primaries,
                monitors = available.len(),
                "monitor list should contain exactly one primary display"
            );
        }

        if self.ids.is_empty() {
            return available
                .iter()
                .filter(|m| !m.is_primary)
                .cloned()
                .collect();
        }

        let mut resolved: Vec<Monitor> = Vec::with_capacity(self.ids.len());
        for id in &self.ids {
            if resolved.iter().any(|m| &m.id == id) {
                continue;
            }
            if let Some(monitor) = available.iter().find(|m| &m.id == id && !m.is_primary) {
                resolved.push(monitor.clone());
            }
        }
        resolved
    }
}

impl From<Vec<String>> for TargetMonitorSet {
    fn from(ids: Vec<String>) -> Self {
        Self { ids }
    }
}

/// In-memory monitor source. `replace` simulates a display configuration change.
#[derive(Debug, Default)]
pub struct StaticMonitorSource {
    monitors: Mutex<Vec<Monitor>>,
    changes: Notifier<Vec<Monitor>>,
    unavailable: Mutex<Option<String>>,
}

impl StaticMonitorSource {
    pub fn new(monitors: Vec<Monitor>) -> Self {
        Self {
            monitors: Mutex::new(monitors),
            ..Default::default()
        }
    }

    /// A typical desk: one primary display plus `secondary` extra displays.
    pub fn with_secondaries(secondary: usize) -> Self {
        let mut monitors = vec![Monitor::new(r"\\.\DISPLAY1", "Primary Display", true)];
        for index in 0..secondary {
            let n = index + 2;
            monitors.push(Monitor::new(
                format!(r"\\.\DISPLAY{n}"),
                format!("Display {n}"),
                false,
            ));
        }
        Self::new(monitors)
    }

    /// Replaces the whole list and notifies listeners.
    pub fn replace(&self, monitors: Vec<Monitor>) {
        *self.lock_monitors() = monitors.clone();
        self.changes.emit(&monitors);
    }

    /// Makes subsequent enumerations fail with `reason`; `None` restores them.
    pub fn set_unavailable(&self, reason: Option<String>) {
        match self.unavailable.lock() {
            Ok(mut slot) => *slot = reason,
            Err(poisoned) => *poisoned.into_inner() = reason,
        }
    }

    fn lock_monitors(&self) -> MutexGuard<'_, Vec<Monitor>> {
        match self.monitors.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl MonitorSource for StaticMonitorSource {
    fn connected_monitors(&self) -> Result<Vec<Monitor>> {
        let reason = self
            .unavailable
            .lock()
            .map_err(|_| AmbientError::Poisoned("monitor source"))?
            .clone();
        if let Some(reason) = reason {
            return Err(AmbientError::Monitor(reason));
        }
        Ok(self.lock_monitors().clone())
    }

    fn changes(&self) -> &Notifier<Vec<Monitor>> {
        &self.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desk() -> Vec<Monitor> {
        vec![
            Monitor::new("primaryId", "Main", true),
            Monitor::new("secondaryId", "Left", false),
            Monitor::new("thirdId", "Right", false),
        ]
    }

    fn ids(monitors: &[Monitor]) -> Vec<&str> {
        monitors.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn empty_selection_means_all_secondaries() {
        let resolved = TargetMonitorSet::all_secondary().resolve(&desk());
        assert_eq!(ids(&resolved), vec!["secondaryId", "thirdId"]);
    }

    #[test]
    fn primary_is_never_a_target() {
        let set = TargetMonitorSet::new(["primaryId", "secondaryId"]);
        assert_eq!(ids(&set.resolve(&desk())), vec!["secondaryId"]);
    }

    #[test]
    fn explicit_selection_keeps_order_and_skips_unknown_ids() {
        let set = TargetMonitorSet::new(["thirdId", "ghost", "secondaryId", "thirdId"]);
        assert_eq!(ids(&set.resolve(&desk())), vec!["thirdId", "secondaryId"]);
    }

    #[test]
    fn static_source_notifies_on_replace() {
        let source = StaticMonitorSource::with_secondaries(1);
        let seen = std::sync::Arc::new(Mutex::new(0usize));
        {
            let seen = seen.clone();
            source.changes().subscribe(move |list| *seen.lock().unwrap() = list.len());
        }

        source.replace(desk());
        assert_eq!(*seen.lock().unwrap(), 3);
        assert_eq!(source.connected_monitors().unwrap(), desk());

        source.set_unavailable(Some("driver reset".into()));
        let err = source.connected_monitors().unwrap_err();
        assert!(err.to_string().contains("driver reset"));
    }
}
