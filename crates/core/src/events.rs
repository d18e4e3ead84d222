//! Explicit subscription lists used in place of ambient event handlers.
//!
//! Producers own a [`Notifier`] and call [`Notifier::emit`] from whatever
//! thread they run on. Listeners are invoked synchronously on that thread, so
//! anything slow must be handed off (see [`crate::processing::Dispatcher`]).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Handle returned by [`Notifier::subscribe`], used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct Notifier<T> {
    listeners: Mutex<Vec<(SubscriptionId, Listener<T>)>>,
    next_id: AtomicU64,
}

impl<T> Default for Notifier<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Notifier<T> {
    /// Creates a notifier with no listeners.
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a listener and returns the id that removes it again.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        match self.listeners.lock() {
            Ok(mut listeners) => listeners.push((id, Arc::new(listener))),
            Err(poisoned) => poisoned.into_inner().push((id, Arc::new(listener))),
        }
        id
    }

    /// Removes a listener. Returns `false` when the id was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = match self.listeners.lock() {
            Ok(listeners) => listeners,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Delivers `value` to every listener registered at the time of the call.
    ///
    /// The listener list is snapshotted first so listeners may subscribe or
    /// unsubscribe from inside a callback without deadlocking.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = match self.listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, l)| l.clone()).collect(),
            Err(poisoned) => poisoned
                .into_inner()
                .iter()
                .map(|(_, l)| l.clone())
                .collect(),
        };
        for listener in snapshot {
            listener(value);
        }
    }

    /// Number of listeners currently registered.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }
}

impl<T> fmt::Debug for Notifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_to_all_listeners_until_unsubscribed() {
        let notifier = Notifier::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let seen = seen.clone();
            notifier.subscribe(move |v| seen.lock().unwrap().push(("a", *v)))
        };
        {
            let seen = seen.clone();
            notifier.subscribe(move |v| seen.lock().unwrap().push(("b", *v)));
        }

        notifier.emit(&1);
        assert!(notifier.unsubscribe(first));
        assert!(!notifier.unsubscribe(first));
        notifier.emit(&2);

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![("a", 1), ("b", 1), ("b", 2)]);
    }

    #[test]
    fn listeners_may_unsubscribe_themselves() {
        let notifier = Arc::new(Notifier::<()>::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let id = {
            let notifier = notifier.clone();
            let slot = slot.clone();
            notifier.clone().subscribe(move |_| {
                if let Some(id) = *slot.lock().unwrap() {
                    notifier.unsubscribe(id);
                }
            })
        };
        *slot.lock().unwrap() = Some(id);

        notifier.emit(&());
        assert_eq!(notifier.listener_count(), 0);
    }
}
