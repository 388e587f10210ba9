use parking_lot::RwLock;
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Weak},
};

use super::{event::CourierEvent, traits::Listener};

type Member<E> = Weak<dyn Listener<E>>;

/// Result of one fan-out
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Copy-on-write set of listeners
///
/// The registry never owns a listener: it keeps `Weak` handles, so dropping the caller's
/// `Arc` is enough to stop deliveries. Membership changes swap in a new list; a dispatch
/// that already took its snapshot keeps delivering to that snapshot.
pub struct ListenerRegistry<E> {
    members: RwLock<Arc<Vec<Member<E>>>>,
}

fn member_addr<E>(member: &Member<E>) -> *const () {
    Weak::as_ptr(member) as *const ()
}

impl<E: 'static> ListenerRegistry<E> {
    pub fn new() -> Self {
        Self {
            members: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Add a listener. Returns `false` if it is already registered.
    pub fn register<L>(&self, listener: &Arc<L>) -> bool
    where
        L: Listener<E> + 'static,
    {
        let strong: Arc<dyn Listener<E>> = listener.clone();
        self.register_dyn(&strong)
    }

    /// Add a listener already held as a trait object
    pub fn register_dyn(&self, listener: &Arc<dyn Listener<E>>) -> bool {
        let member = Arc::downgrade(listener);
        let addr = member_addr(&member);

        let mut members = self.members.write();
        if members.iter().any(|m| member_addr(m) == addr) {
            return false;
        }
        let list = Arc::make_mut(&mut *members);
        list.retain(|m| m.strong_count() > 0);
        list.push(member);
        true
    }

    /// Remove a listener by identity. Returns `false` if it was not registered.
    pub fn unregister<L>(&self, listener: &Arc<L>) -> bool
    where
        L: Listener<E> + ?Sized,
    {
        let addr = Arc::as_ptr(listener) as *const ();

        let mut members = self.members.write();
        if !members.iter().any(|m| member_addr(m) == addr) {
            return false;
        }
        Arc::make_mut(&mut *members).retain(|m| member_addr(m) != addr);
        true
    }

    pub fn unregister_all(&self) {
        *self.members.write() = Arc::new(Vec::new());
    }

    /// Number of registered listeners that are still alive
    pub fn len(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|m| m.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Arc<Vec<Member<E>>> {
        Arc::clone(&self.members.read())
    }

    /// Deliver `event` to every listener in the current snapshot, in registration order
    ///
    /// Runs on the calling thread. A listener that returns an error or panics is logged and
    /// skipped; the remaining listeners still get the event.
    pub fn dispatch(&self, event: &CourierEvent<E>) -> DispatchReport {
        let snapshot = self.snapshot();
        let mut report = DispatchReport::default();
        let mut saw_dead = false;

        for member in snapshot.iter() {
            let Some(listener) = member.upgrade() else {
                saw_dead = true;
                continue;
            };

            match panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    log::warn!(
                        "Listener failed to handle event from cycle {}: {err:#}",
                        event.cycle()
                    );
                    report.failed += 1;
                }
                Err(_) => {
                    log::error!(
                        "Listener panicked while handling event from cycle {}",
                        event.cycle()
                    );
                    report.failed += 1;
                }
            }
        }

        drop(snapshot);
        if saw_dead {
            self.prune();
        }

        report
    }

    fn prune(&self) {
        let mut members = self.members.write();
        if members.iter().any(|m| m.strong_count() == 0) {
            Arc::make_mut(&mut *members).retain(|m| m.strong_count() > 0);
        }
    }
}

impl<E: 'static> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        cycles: Mutex<Vec<u64>>,
    }

    impl Recorder {
        fn cycles(&self) -> Vec<u64> {
            self.cycles.lock().clone()
        }
    }

    impl Listener<u8> for Recorder {
        fn on_event(&self, event: &CourierEvent<u8>) -> Result<()> {
            self.cycles.lock().push(event.cycle());
            Ok(())
        }
    }

    struct Failing;

    impl Listener<u8> for Failing {
        fn on_event(&self, _event: &CourierEvent<u8>) -> Result<()> {
            Err(anyhow!("listener rejected event"))
        }
    }

    struct Panicking;

    impl Listener<u8> for Panicking {
        fn on_event(&self, _event: &CourierEvent<u8>) -> Result<()> {
            panic!("listener bug");
        }
    }

    /// Registers `late` into the registry the first time it sees an event
    struct Registrar {
        registry: Arc<ListenerRegistry<u8>>,
        late: Arc<Recorder>,
    }

    impl Listener<u8> for Registrar {
        fn on_event(&self, _event: &CourierEvent<u8>) -> Result<()> {
            self.registry.register(&self.late);
            Ok(())
        }
    }

    /// Unregisters `target` whenever it sees an event
    struct Remover {
        registry: Arc<ListenerRegistry<u8>>,
        target: Arc<Recorder>,
    }

    impl Listener<u8> for Remover {
        fn on_event(&self, _event: &CourierEvent<u8>) -> Result<()> {
            self.registry.unregister(&self.target);
            Ok(())
        }
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let registry = ListenerRegistry::<u8>::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        struct Tagged(&'static str, Arc<Mutex<Vec<&'static str>>>);
        impl Listener<u8> for Tagged {
            fn on_event(&self, _event: &CourierEvent<u8>) -> Result<()> {
                self.1.lock().push(self.0);
                Ok(())
            }
        }

        let a = Arc::new(Tagged("a", order.clone()));
        let b = Arc::new(Tagged("b", order.clone()));
        let c = Arc::new(Tagged("c", order.clone()));
        registry.register(&a);
        registry.register(&b);
        registry.register(&c);

        let report = registry.dispatch(&CourierEvent::new(1, 0xFA));
        assert_eq!(report.delivered, 3);
        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_duplicate_register_and_unregister() {
        let registry = ListenerRegistry::<u8>::new();
        let recorder = Arc::new(Recorder::default());

        assert!(registry.register(&recorder));
        assert!(!registry.register(&recorder));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(&recorder));
        assert!(!registry.unregister(&recorder));
        assert!(registry.is_empty());

        registry.dispatch(&CourierEvent::new(1, 0));
        assert!(recorder.cycles().is_empty());
    }

    #[test]
    fn test_trait_object_listener_roundtrip() {
        let registry = ListenerRegistry::<u8>::new();
        let recorder = Arc::new(Recorder::default());
        let erased: Arc<dyn Listener<u8>> = recorder.clone();

        assert!(registry.register_dyn(&erased));
        assert!(!registry.register(&recorder));

        registry.dispatch(&CourierEvent::new(3, 0));
        assert_eq!(recorder.cycles(), vec![3]);

        assert!(registry.unregister(&erased));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_all() {
        let registry = ListenerRegistry::<u8>::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        registry.register(&a);
        registry.register(&b);

        registry.unregister_all();
        let report = registry.dispatch(&CourierEvent::new(1, 0));

        assert_eq!(report, DispatchReport::default());
        assert!(a.cycles().is_empty());
        assert!(b.cycles().is_empty());
    }

    #[test]
    fn test_failing_listeners_are_isolated() {
        let registry = ListenerRegistry::<u8>::new();
        let failing = Arc::new(Failing);
        let panicking = Arc::new(Panicking);
        let recorder = Arc::new(Recorder::default());
        registry.register(&failing);
        registry.register(&panicking);
        registry.register(&recorder);

        let report = registry.dispatch(&CourierEvent::new(7, 0));

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(recorder.cycles(), vec![7]);
    }

    #[test]
    fn test_dropped_listener_is_not_kept_alive() {
        let registry = ListenerRegistry::<u8>::new();
        let recorder = Arc::new(Recorder::default());
        let weak = Arc::downgrade(&recorder);
        registry.register(&recorder);

        drop(recorder);
        assert!(weak.upgrade().is_none());

        let report = registry.dispatch(&CourierEvent::new(1, 0));
        assert_eq!(report.delivered, 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_during_dispatch_misses_inflight_event() {
        let registry = Arc::new(ListenerRegistry::<u8>::new());
        let late = Arc::new(Recorder::default());
        let registrar = Arc::new(Registrar {
            registry: registry.clone(),
            late: late.clone(),
        });
        registry.register(&registrar);

        registry.dispatch(&CourierEvent::new(1, 0));
        assert!(late.cycles().is_empty());

        registry.dispatch(&CourierEvent::new(2, 0));
        assert_eq!(late.cycles(), vec![2]);
    }

    #[test]
    fn test_unregister_during_dispatch_still_delivers_inflight_event() {
        let registry = Arc::new(ListenerRegistry::<u8>::new());
        let target = Arc::new(Recorder::default());
        let remover = Arc::new(Remover {
            registry: registry.clone(),
            target: target.clone(),
        });
        registry.register(&remover);
        registry.register(&target);

        registry.dispatch(&CourierEvent::new(1, 0));
        assert_eq!(target.cycles(), vec![1]);

        registry.dispatch(&CourierEvent::new(2, 0));
        assert_eq!(target.cycles(), vec![1]);
    }
}
