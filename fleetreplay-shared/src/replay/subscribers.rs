use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use crate::models::Batch;

type Callback = Arc<dyn Fn(&Batch) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<(u64, Callback)>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Callbacks registered against an engine.
///
/// Dispatch works on a snapshot taken when the batch starts: removing a
/// subscriber mid-dispatch still lets it see the current batch, and one added
/// mid-dispatch first sees the next batch. Callbacks run without the registry
/// lock held, so they may subscribe or unsubscribe freely, but they must not
/// call back into the engine that is dispatching.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl SubscriberRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for every future batch.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Batch) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.inner);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.push((id, Arc::new(callback)));

        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Number of live subscribers.
    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    /// Whether nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `batch` to every subscriber registered right now.
    ///
    /// Returns how many callbacks were invoked.
    pub fn notify(&self, batch: &Batch) -> usize {
        let snapshot: Vec<Callback> = lock(&self.inner)
            .entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in &snapshot {
            callback(batch);
        }
        snapshot.len()
    }
}

/// Handle returned by `subscribe`; dropping it unsubscribes.
///
/// Call [`Subscription::detach`] to keep the callback for the lifetime of the
/// engine instead.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Subscription {
    /// Identifier unique within the owning registry.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the callback. Returns `false` if it was already gone.
    pub fn unsubscribe(mut self) -> bool {
        self.remove()
    }

    /// Keeps the callback registered for as long as the registry lives.
    pub fn detach(mut self) {
        self.registry = Weak::new();
    }

    fn remove(&mut self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        self.registry = Weak::new();

        let mut registry = lock(&registry);
        let before = registry.entries.len();
        registry.entries.retain(|(id, _)| *id != self.id);
        registry.entries.len() != before
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeliveredEvent, TripEvent};
    use chrono::{TimeZone, Utc};
    use std::sync::{
        Mutex as StdMutex,
        atomic::{AtomicUsize, Ordering},
    };

    fn batch() -> Batch {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Batch {
            now,
            events: vec![DeliveredEvent {
                trip_id: "a".into(),
                event: TripEvent::new(now, 0.0, 0.0),
            }],
        }
    }

    #[test]
    fn notifies_every_subscriber() {
        let registry = SubscriberRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let first = {
            let hits = Arc::clone(&hits);
            registry.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        let second = {
            let hits = Arc::clone(&hits);
            registry.subscribe(move |batch| {
                hits.fetch_add(batch.len(), Ordering::SeqCst);
            })
        };

        assert_eq!(registry.notify(&batch()), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn unsubscribe_and_drop_remove_callbacks() {
        let registry = SubscriberRegistry::new();
        let kept = registry.subscribe(|_| {});
        let removed = registry.subscribe(|_| {});
        {
            let _scoped = registry.subscribe(|_| {});
            assert_eq!(registry.len(), 3);
        }

        assert_eq!(registry.len(), 2);
        assert!(removed.unsubscribe());
        assert_eq!(registry.len(), 1);
        kept.detach();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn removal_during_dispatch_applies_to_next_batch() {
        let registry = SubscriberRegistry::new();
        let late_calls = Arc::new(AtomicUsize::new(0));
        let victim: Arc<StdMutex<Option<Subscription>>> = Arc::new(StdMutex::new(None));

        let remover = {
            let victim = Arc::clone(&victim);
            registry.subscribe(move |_| {
                if let Some(subscription) = victim.lock().unwrap().take() {
                    subscription.unsubscribe();
                }
            })
        };
        let counted = {
            let late_calls = Arc::clone(&late_calls);
            registry.subscribe(move |_| {
                late_calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        *victim.lock().unwrap() = Some(counted);

        // The snapshot still includes the removed subscriber.
        assert_eq!(registry.notify(&batch()), 2);
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);

        assert_eq!(registry.notify(&batch()), 1);
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
        remover.detach();
    }
}
