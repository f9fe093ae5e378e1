use std::panic::{self, AssertUnwindSafe};

use tracing::error;

/// Handle returned by [`ChangeNotifier::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Listener<T> = Box<dyn FnMut(&T)>;

/// Listeners run in registration order on the caller's thread. A panicking
/// listener is logged and skipped; the remaining listeners still run.
pub struct ChangeNotifier<T> {
    listeners: Vec<(ListenerId, Listener<T>)>,
    next_id: u64,
}

impl<T> ChangeNotifier<T> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 1,
        }
    }

    pub fn on(&mut self, listener: impl FnMut(&T) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns false if `id` was not registered.
    pub fn off(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Deliver `value` to every listener. Returns how many listeners panicked.
    pub fn emit(&mut self, value: &T) -> usize {
        let mut failed = 0;
        for (id, listener) in &mut self.listeners {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(value)));
            if let Err(payload) = outcome {
                failed += 1;
                error!(
                    listener = id.0,
                    reason = panic_message(payload.as_ref()),
                    "save change listener panicked"
                );
            }
        }
        failed
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<T> Default for ChangeNotifier<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
