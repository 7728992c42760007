/// file: src/emitter.rs
/// description: Typed multi-subscriber event emitter decoupling producers from listeners
use std::sync::{Arc, Mutex};
use tracing::error;

/// Opaque handle returned by [`Emitter::on`], used to detach a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    handlers: Vec<(HandlerId, Handler<E>)>,
}

/// A minimal typed pub/sub primitive: producers call [`emit`](Emitter::emit),
/// any number of listeners register with [`on`](Emitter::on). Handlers run in
/// registration order; a panicking handler is caught and logged so the
/// remaining handlers still run.
pub struct Emitter<E> {
    registry: Mutex<Registry<E>>,
}

impl<E> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Emitter<E> {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                next_id: 0,
                handlers: Vec::new(),
            }),
        }
    }

    pub fn on(&self, handler: impl Fn(&E) + Send + Sync + 'static) -> HandlerId {
        let mut registry = self.registry.lock().unwrap();
        registry.next_id += 1;
        let id = HandlerId(registry.next_id);
        registry.handlers.push((id, Arc::new(handler)));
        id
    }

    /// Detaches a handler. Returns false if the id was already removed.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut registry = self.registry.lock().unwrap();
        let before = registry.handlers.len();
        registry.handlers.retain(|(hid, _)| *hid != id);
        registry.handlers.len() != before
    }

    pub fn emit(&self, event: &E) {
        // Snapshot under the lock, invoke outside it so handlers may call
        // back into the emitter without deadlocking.
        let handlers: Vec<Handler<E>> = {
            let registry = self.registry.lock().unwrap();
            registry.handlers.iter().map(|(_, h)| Arc::clone(h)).collect()
        };
        for handler in handlers {
            let outcome =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(event)));
            if outcome.is_err() {
                error!("event handler panicked; continuing with remaining handlers");
            }
        }
    }

    pub fn handler_count(&self) -> usize {
        self.registry.lock().unwrap().handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn handlers_run_in_registration_order() {
        let emitter: Emitter<u32> = Emitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        emitter.on(move |v| first.lock().unwrap().push(("first", *v)));
        let second = Arc::clone(&seen);
        emitter.on(move |v| second.lock().unwrap().push(("second", *v)));

        emitter.emit(&7);
        assert_eq!(*seen.lock().unwrap(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn off_detaches_a_single_handler() {
        let emitter: Emitter<()> = Emitter::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let id = emitter.on(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        emitter.emit(&());
        assert!(emitter.off(id));
        assert!(!emitter.off(id));
        emitter.emit(&());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.handler_count(), 0);
    }

    #[test]
    fn panicking_handler_does_not_stop_the_rest() {
        let emitter: Emitter<()> = Emitter::new();
        let calls = Arc::new(AtomicUsize::new(0));

        emitter.on(|_| panic!("listener bug"));
        let counter = Arc::clone(&calls);
        emitter.on(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit(&());
        emitter.emit(&());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
