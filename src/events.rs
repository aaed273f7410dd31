use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// All state guarded in this crate is plain data that is consistent
/// between statements, so a poisoned lock is still safe to use.
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    listeners: Vec<(u64, Listener<E>)>,
}

/// Synchronous publish/subscribe registry.
///
/// # Dispatch
/// - Listeners run on the emitting thread, in subscription order
/// - The registry lock is released before any listener runs, so listeners
///   may subscribe or unsubscribe (themselves included) during dispatch
/// - A panicking listener is caught and logged; remaining listeners still
///   receive the event
pub struct EventBus<E> {
    registry: Arc<Mutex<Registry<E>>>,
    name: &'static str,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        EventBus {
            registry: Arc::clone(&self.registry),
            name: self.name,
        }
    }
}

impl<E: 'static> EventBus<E> {
    pub fn new(name: &'static str) -> Self {
        EventBus {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: Vec::new(),
            })),
            name,
        }
    }

    /// Register a listener. The returned handle removes it again.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = lock_or_recover(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.listeners.push((id, Arc::new(listener)));
            id
        };

        let weak: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.registry);
        Subscription {
            id,
            remove: Arc::new(move || {
                if let Some(registry) = weak.upgrade() {
                    lock_or_recover(&registry)
                        .listeners
                        .retain(|(listener_id, _)| *listener_id != id);
                }
            }),
        }
    }

    /// Deliver an event to every listener; returns how many completed without panicking.
    pub fn emit(&self, event: &E) -> usize {
        let snapshot: Vec<(u64, Listener<E>)> = lock_or_recover(&self.registry)
            .listeners
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        let mut delivered = 0;
        for (id, listener) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    log::error!(
                        "[{}] listener {} panicked: {}",
                        self.name,
                        id,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
        delivered
    }

    pub fn listener_count(&self) -> usize {
        lock_or_recover(&self.registry).listeners.len()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handle returned by `EventBus::subscribe`.
///
/// Dropping it does not unsubscribe; call `unsubscribe`, which is
/// idempotent and safe to call from inside a listener.
#[derive(Clone)]
pub struct Subscription {
    id: u64,
    remove: Arc<dyn Fn() + Send + Sync>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(&self) {
        (self.remove)();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_reaches_all_listeners() {
        let bus: EventBus<u32> = EventBus::new("test");
        let total = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let total = total.clone();
            bus.subscribe(move |v| {
                total.fetch_add(*v as usize, Ordering::SeqCst);
            });
        }

        assert_eq!(bus.emit(&2), 3);
        assert_eq!(total.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let bus: EventBus<u32> = EventBus::new("test");
        let seen = Arc::new(AtomicUsize::new(0));

        let before = seen.clone();
        bus.subscribe(move |_| {
            before.fetch_add(1, Ordering::SeqCst);
        });
        bus.subscribe(|_| panic!("listener failure"));
        let after = seen.clone();
        bus.subscribe(move |_| {
            after.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.emit(&1), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        // Registry still usable after the panic
        assert_eq!(bus.emit(&1), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 4);
        assert_eq!(bus.listener_count(), 3);
    }

    #[test]
    fn test_unsubscribe_idempotent() {
        let bus: EventBus<u32> = EventBus::new("test");
        let sub = bus.subscribe(|_| {});
        let other = bus.subscribe(|_| {});

        sub.unsubscribe();
        sub.unsubscribe();

        assert_eq!(bus.listener_count(), 1);
        assert_ne!(sub.id(), other.id());
    }

    #[test]
    fn test_unsubscribe_during_dispatch() {
        let bus: EventBus<u32> = EventBus::new("test");
        let calls = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot_in = slot.clone();
        let calls_in = calls.clone();
        let sub = bus.subscribe(move |_| {
            calls_in.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = slot_in.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        bus.emit(&0);
        bus.emit(&0);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_unsubscribe_after_bus_dropped() {
        let bus: EventBus<u32> = EventBus::new("test");
        let sub = bus.subscribe(|_| {});
        drop(bus);
        sub.unsubscribe();
    }
}
