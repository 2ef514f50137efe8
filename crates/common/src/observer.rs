//! Observer registry with typed unsubscribe handles
//!
//! Dispatch works on a snapshot of the registered observers, so observers
//! may subscribe or unsubscribe from inside a callback. A panicking observer
//! is logged and skipped; the remaining observers still receive the event.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

struct Inner<O: ?Sized> {
    name: &'static str,
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Arc<O>)>>,
}

/// Set of observers of type `O` (usually a trait object)
pub struct ObserverRegistry<O: ?Sized> {
    inner: Arc<Inner<O>>,
}

impl<O: ?Sized> Clone for ObserverRegistry<O> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<O: ?Sized> fmt::Debug for ObserverRegistry<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("name", &self.inner.name)
            .field("observers", &self.inner.entries.lock().len())
            .finish()
    }
}

impl<O> ObserverRegistry<O>
where
    O: ?Sized + Send + Sync + 'static,
{
    /// Create an empty registry; `name` only shows up in logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                next_id: AtomicU64::new(1),
                entries: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register an observer. It stays registered until the returned
    /// [`Subscription`] is dropped, unsubscribed, or the registry is cleared.
    pub fn register(&self, observer: Arc<O>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.entries.lock().push((id, observer));

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.entries.lock().retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Current observers in registration order
    pub fn snapshot(&self) -> Vec<Arc<O>> {
        self.inner.entries.lock().iter().map(|(_, observer)| Arc::clone(observer)).collect()
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Whether no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every observer
    pub fn clear(&self) {
        self.inner.entries.lock().clear();
    }

    /// Invoke `f` for each observer, isolating panics.
    ///
    /// Returns the number of observers that panicked.
    pub fn notify<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&O),
    {
        let mut failures = 0;
        for observer in self.snapshot() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(observer.as_ref())));
            if outcome.is_err() {
                failures += 1;
                error!(registry = self.inner.name, "observer panicked during dispatch");
            }
        }
        failures
    }
}

/// Handle returned by [`ObserverRegistry::register`]
///
/// Dropping the handle unsubscribes. Call [`Subscription::detach`] to keep the
/// observer registered for the lifetime of the registry.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self { cancel: Some(Box::new(cancel)) }
    }

    /// Remove the observer now.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    /// Keep the observer registered after this handle goes away.
    pub fn detach(mut self) {
        self.cancel = None;
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("active", &self.cancel.is_some()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    trait Counter: Send + Sync {
        fn hit(&self, value: usize);
    }

    struct Recording(AtomicUsize);

    impl Counter for Recording {
        fn hit(&self, value: usize) {
            self.0.fetch_add(value, Ordering::SeqCst);
        }
    }

    struct Exploding;

    impl Counter for Exploding {
        fn hit(&self, _value: usize) {
            panic!("observer failure");
        }
    }

    #[test]
    fn dropping_subscription_unregisters() {
        let registry: ObserverRegistry<dyn Counter> = ObserverRegistry::new("test");
        let recording = Arc::new(Recording(AtomicUsize::new(0)));

        let subscription = registry.register(recording.clone());
        registry.notify(|o| o.hit(1));
        drop(subscription);
        registry.notify(|o| o.hit(1));

        assert_eq!(recording.0.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn detached_subscription_stays_registered() {
        let registry: ObserverRegistry<dyn Counter> = ObserverRegistry::new("test");
        let recording = Arc::new(Recording(AtomicUsize::new(0)));

        registry.register(recording.clone()).detach();
        registry.notify(|o| o.hit(2));

        assert_eq!(recording.0.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn panicking_observer_does_not_block_others() {
        let registry: ObserverRegistry<dyn Counter> = ObserverRegistry::new("test");
        let first = Arc::new(Recording(AtomicUsize::new(0)));
        let last = Arc::new(Recording(AtomicUsize::new(0)));

        let _a = registry.register(first.clone());
        let _b = registry.register(Arc::new(Exploding));
        let _c = registry.register(last.clone());

        let failures = registry.notify(|o| o.hit(1));

        assert_eq!(failures, 1);
        assert_eq!(first.0.load(Ordering::SeqCst), 1);
        assert_eq!(last.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_after_registry_dropped_is_harmless() {
        let registry: ObserverRegistry<dyn Counter> = ObserverRegistry::new("test");
        let subscription = registry.register(Arc::new(Recording(AtomicUsize::new(0))));
        drop(registry);
        subscription.unsubscribe();
    }
}
