//! Per-instance listener lists with synchronous fan-out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Handle returned by [`Listeners::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct Listeners<E> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(SubscriptionId, Callback<E>)>>,
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener with `event`.
    ///
    /// The list is snapshotted first, so a listener may subscribe or
    /// unsubscribe (itself included) without deadlocking.
    pub fn emit(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        for callback in callbacks {
            callback(event);
        }
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn every_subscriber_sees_each_event() {
        let listeners = Listeners::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let total = total.clone();
            listeners.subscribe(move |n| {
                total.fetch_add(*n as usize, Ordering::SeqCst);
            });
        }

        listeners.emit(&2);
        assert_eq!(total.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn unsubscribed_listener_is_not_called() {
        let listeners = Listeners::<()>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let id = {
            let calls = calls.clone();
            listeners.subscribe(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };

        listeners.emit(&());
        assert!(listeners.unsubscribe(id));
        assert!(!listeners.unsubscribe(id));
        listeners.emit(&());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(listeners.is_empty());
    }

    #[test]
    fn listener_may_subscribe_during_emit() {
        let listeners = Arc::new(Listeners::<()>::new());
        let inner = listeners.clone();
        listeners.subscribe(move |_| {
            inner.subscribe(|_| {});
        });

        listeners.emit(&());
        assert_eq!(listeners.len(), 2);
    }
}
