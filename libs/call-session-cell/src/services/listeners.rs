// libs/call-session-cell/src/services/listeners.rs
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

type ListenerMap<T> = Mutex<BTreeMap<u64, Listener<T>>>;

/// Callback registry handing out disposer handles.
/// Listeners run in registration order on the emitting task.
pub struct ListenerRegistry<T> {
    listeners: Arc<ListenerMap<T>>,
    next_id: AtomicU64,
}

impl<T: 'static> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().insert(id, Arc::new(callback));

        let weak: Weak<ListenerMap<T>> = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = weak.upgrade() {
                listeners.lock().remove(&id);
            }
        })
    }

    /// Invoke every listener with `value`.
    /// The lock is released before callbacks run, so a listener may dispose
    /// its own subscription.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = self.listeners.lock().values().cloned().collect();
        for listener in snapshot {
            listener(value);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let removed = {
            let mut listeners = self.listeners.lock();
            let count = listeners.len();
            listeners.clear();
            count
        };
        if removed > 0 {
            debug!("Cleared {} listeners", removed);
        }
    }
}

impl<T: 'static> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Disposer returned by every `subscribe`/`add_listener` call.
/// Disposing twice is a no-op; dropping the handle disposes it.
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new<F>(dispose: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    /// A handle with nothing to release
    pub fn noop() -> Self {
        Self { dispose: None }
    }

    pub fn dispose(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }

    pub fn is_active(&self) -> bool {
        self.dispose.is_some()
    }

    /// Keep the listener registered for the registry's lifetime
    pub fn detach(mut self) {
        self.dispose = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_reaches_registered_listeners_in_order() {
        let registry = ListenerRegistry::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        let _a = registry.add(move |v| first.lock().push(("a", *v)));
        let second = Arc::clone(&seen);
        let _b = registry.add(move |v| second.lock().push(("b", *v)));

        registry.emit(&7);
        assert_eq!(*seen.lock(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let registry = ListenerRegistry::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        let mut subscription = registry.add(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        registry.emit(&1);
        subscription.dispose();
        subscription.dispose();
        registry.emit(&2);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
        assert!(!subscription.is_active());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let registry = ListenerRegistry::<u32>::new();
        {
            let _subscription = registry.add(|_| {});
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_subscription_outliving_registry_is_harmless() {
        let mut subscription = {
            let registry = ListenerRegistry::<u32>::new();
            registry.add(|_| {})
        };
        subscription.dispose();
    }

    #[test]
    fn test_detach_keeps_listener() {
        let registry = ListenerRegistry::<u32>::new();
        registry.add(|_| {}).detach();
        assert_eq!(registry.len(), 1);
        registry.clear();
        assert!(registry.is_empty());
    }
}
