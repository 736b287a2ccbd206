use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Handle returned when a listener is registered; used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Ordered listener registry. Dispatch always works on a snapshot, so
/// listeners may add or remove listeners while being called.
pub(crate) struct ListenerSet<L: ?Sized> {
    entries: Mutex<Vec<(ListenerId, Arc<L>)>>,
    next: AtomicU64,
}

impl<L: ?Sized> ListenerSet<L> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(ListenerId, Arc<L>)>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn add(&self, listener: Arc<L>) -> ListenerId {
        let id = ListenerId(self.next.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    pub(crate) fn contains(&self, id: ListenerId) -> bool {
        self.lock().iter().any(|(existing, _)| *existing == id)
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<L>> {
        self.lock().iter().map(|(_, l)| Arc::clone(l)).collect()
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

type Hook = Box<dyn FnOnce() + Send>;

enum HookState {
    Armed(Option<Hook>),
    Fired,
}

/// A hook that runs exactly once, when its owner shuts down.
///
/// A hook installed after shutdown runs immediately.
pub(crate) struct OnClose {
    state: Mutex<HookState>,
}

impl OnClose {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(HookState::Armed(None)),
        }
    }

    pub(crate) fn set(&self, hook: Hook) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let HookState::Armed(slot) = &mut *state {
            *slot = Some(hook);
            return;
        }
        drop(state);
        hook();
    }

    pub(crate) fn fire(&self) {
        let hook = {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match std::mem::replace(&mut *state, HookState::Fired) {
                HookState::Armed(hook) => hook,
                HookState::Fired => None,
            }
        };
        if let Some(hook) = hook {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn add_remove_contains() {
        let set: ListenerSet<dyn Fn() -> u8 + Send + Sync> = ListenerSet::new();
        let a = set.add(Arc::new(|| 1u8));
        let b = set.add(Arc::new(|| 2u8));
        assert_ne!(a, b);
        assert!(set.contains(a));
        assert_eq!(set.snapshot().iter().map(|l| l()).collect::<Vec<_>>(), [1, 2]);

        assert!(set.remove(a));
        assert!(!set.remove(a));
        assert!(!set.contains(a));
        assert_eq!(set.len(), 1);

        set.clear();
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn hook_fires_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hook = OnClose::new();
        let counter = Arc::clone(&hits);
        hook.set(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        hook.fire();
        hook.fire();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_hook_runs_immediately() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hook = OnClose::new();
        hook.fire();

        let counter = Arc::clone(&hits);
        hook.set(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
