//! Per-message-type callback registry.
//!
//! One transport handler per message type fans out to every callback
//! registered here. Callbacks are identified by their `Arc` allocation, so
//! the same [`Listener`] registered twice for a type is stored once and a
//! single [`ListenerRegistry::unlisten`] removes it.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

/// Callback invoked with each message payload of the registered type.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&Value) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Map of message type -> callbacks in registration order.
#[derive(Default)]
pub struct ListenerRegistry {
    callbacks: HashMap<String, Vec<Listener>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("type_count", &self.callbacks.len())
            .field("total_callbacks", &self.len())
            .finish()
    }
}

impl ListenerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `msg_type`.
    ///
    /// Returns `false` if this exact callback is already registered for the
    /// type (nothing changes).
    pub fn listen(&mut self, msg_type: &str, callback: &Listener) -> bool {
        let entry = self.callbacks.entry(msg_type.to_string()).or_default();
        if entry.iter().any(|cb| Arc::ptr_eq(cb, callback)) {
            return false;
        }
        entry.push(Arc::clone(callback));
        true
    }

    /// Remove `callback` from `msg_type`. Returns `true` if it was present.
    ///
    /// The type's entry stays in the map even when it becomes empty.
    pub fn unlisten(&mut self, msg_type: &str, callback: &Listener) -> bool {
        let Some(entry) = self.callbacks.get_mut(msg_type) else {
            return false;
        };
        match entry.iter().position(|cb| Arc::ptr_eq(cb, callback)) {
            Some(idx) => {
                entry.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Whether `callback` is currently registered for `msg_type`.
    #[must_use]
    pub fn contains(&self, msg_type: &str, callback: &Listener) -> bool {
        self.callbacks
            .get(msg_type)
            .is_some_and(|v| v.iter().any(|cb| Arc::ptr_eq(cb, callback)))
    }

    /// Callbacks for `msg_type` in registration order, cloned out so they can
    /// be invoked without borrowing the registry.
    #[must_use]
    pub fn callbacks(&self, msg_type: &str) -> Vec<Listener> {
        self.callbacks.get(msg_type).cloned().unwrap_or_default()
    }

    /// Check if any callbacks are registered for a type.
    #[must_use]
    pub fn has_callbacks(&self, msg_type: &str) -> bool {
        self.callbacks.get(msg_type).is_some_and(|v| !v.is_empty())
    }

    /// Types with at least one callback.
    #[must_use]
    pub fn registered_types(&self) -> Vec<&str> {
        self.callbacks
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Total number of registrations across all types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.values().map(Vec::len).sum()
    }

    /// Whether no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every registration.
    pub fn clear(&mut self) {
        self.callbacks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Listener {
        let log = Arc::clone(log);
        listener(move |payload| {
            log.lock().unwrap().push(format!("{name}:{payload}"));
        })
    }

    #[test]
    fn test_callbacks_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::new();
        registry.listen("todos", &recorder(&log, "f1"));
        registry.listen("todos", &recorder(&log, "f2"));

        let payload = serde_json::json!([1]);
        for cb in registry.callbacks("todos") {
            cb(&payload);
        }
        assert_eq!(*log.lock().unwrap(), ["f1:[1]", "f2:[1]"]);
    }

    #[test]
    fn test_duplicate_registration_is_noop() {
        let cb = listener(|_| {});
        let mut registry = ListenerRegistry::new();
        assert!(registry.listen("todos", &cb));
        assert!(!registry.listen("todos", &cb));
        assert_eq!(registry.len(), 1);

        assert!(registry.unlisten("todos", &cb));
        assert!(!registry.has_callbacks("todos"));
        assert!(!registry.unlisten("todos", &cb));
    }

    #[test]
    fn test_same_callback_on_two_types() {
        let cb = listener(|_| {});
        let mut registry = ListenerRegistry::new();
        registry.listen("a", &cb);
        registry.listen("b", &cb);
        registry.unlisten("a", &cb);
        assert!(!registry.contains("a", &cb));
        assert!(registry.contains("b", &cb));
        assert_eq!(registry.registered_types(), ["b"]);
    }

    #[test]
    fn test_equal_closures_are_distinct_listeners() {
        let mut registry = ListenerRegistry::new();
        registry.listen("todos", &listener(|_| {}));
        registry.listen("todos", &listener(|_| {}));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unlisten_unknown_type() {
        let mut registry = ListenerRegistry::new();
        assert!(!registry.unlisten("nothing", &listener(|_| {})));
    }

    #[test]
    fn test_clear() {
        let mut registry = ListenerRegistry::new();
        registry.listen("a", &listener(|_| {}));
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.callbacks("a").is_empty());
    }
}
