//! Registry of the `(channel, filter)` pairs the application wants.
//!
//! The registry is the client's memory of server-side subscription state. It
//! holds each distinct pair at most once, in insertion order, so replaying it
//! after a reconnect never emits a duplicate `subscribe`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A data channel plus an optional server-side filter.
///
/// Equality is structural: two subscriptions are equal when their channels
/// match and their filters are equal JSON values (both absent counts as
/// equal). A `null` filter is normalized to absent on construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Channel name, e.g. `todos`.
    pub channel: String,
    /// Opaque filter forwarded to the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
}

impl Subscription {
    /// Subscription to every message on `channel`.
    pub fn channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            filter: None,
        }
    }

    /// Subscription to `channel` narrowed by `filter`. A `null` filter is
    /// the same as no filter.
    pub fn filtered(channel: impl Into<String>, filter: Value) -> Self {
        Self {
            channel: channel.into(),
            filter: (!filter.is_null()).then_some(filter),
        }
    }

    /// Parse a `subscribe`/`unsubscribe` payload.
    ///
    /// Extra keys (such as `token`) are ignored. A JSON `null` filter is
    /// treated as absent. Returns `None` without a string `channel`.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let channel = payload.get("channel")?.as_str()?;
        let filter = payload.get("filter").filter(|f| !f.is_null()).cloned();
        Some(Self {
            channel: channel.to_string(),
            filter,
        })
    }

    /// Wire payload: `{channel}` or `{channel, filter}`.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        let mut payload = serde_json::json!({ "channel": self.channel });
        if let Some(filter) = &self.filter {
            payload["filter"] = filter.clone();
        }
        payload
    }
}

/// Ordered, duplicate-free set of [`Subscription`]s.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    entries: Vec<Subscription>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Position of the entry structurally equal to `sub`.
    #[must_use]
    pub fn index_of(&self, sub: &Subscription) -> Option<usize> {
        self.entries.iter().position(|entry| entry == sub)
    }

    /// Whether an equal subscription is present.
    #[must_use]
    pub fn contains(&self, sub: &Subscription) -> bool {
        self.index_of(sub).is_some()
    }

    /// Add `sub` unless an equal entry exists. Returns `true` if added.
    ///
    /// The registry stores its own copy; later changes to the caller's value
    /// do not reach it.
    pub fn subscribe(&mut self, sub: &Subscription) -> bool {
        if self.contains(sub) {
            return false;
        }
        self.entries.push(sub.clone());
        true
    }

    /// Remove the entry equal to `sub`. Returns `true` if one was removed.
    pub fn unsubscribe(&mut self, sub: &Subscription) -> bool {
        match self.index_of(sub) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Remove and return every entry, in insertion order.
    pub fn drain(&mut self) -> Vec<Subscription> {
        std::mem::take(&mut self.entries)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Subscription> {
        self.entries.iter()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a SubscriptionRegistry {
    type Item = &'a Subscription;
    type IntoIter = std::slice::Iter<'a, Subscription>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_is_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        assert!(registry.subscribe(&Subscription::channel("todos")));
        assert!(!registry.subscribe(&Subscription::channel("todos")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_filter_compared_by_value() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(&Subscription::filtered("rooms", json!({"state": "active", "floor": 2})));

        let same = Subscription::filtered("rooms", json!({"floor": 2, "state": "active"}));
        assert_eq!(registry.index_of(&same), Some(0));
        assert!(!registry.subscribe(&same));

        let other = Subscription::filtered("rooms", json!({"state": "closed", "floor": 2}));
        assert_eq!(registry.index_of(&other), None);
    }

    #[test]
    fn test_absent_filter_differs_from_present_filter() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(&Subscription::channel("rooms"));
        assert!(registry.subscribe(&Subscription::filtered("rooms", json!("active"))));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unsubscribe_absent_is_noop() {
        let mut registry = SubscriptionRegistry::new();
        assert!(!registry.unsubscribe(&Subscription::channel("todos")));
        registry.subscribe(&Subscription::channel("todos"));
        assert!(registry.unsubscribe(&Subscription::channel("todos")));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stored_copy_is_independent() {
        let mut registry = SubscriptionRegistry::new();
        let mut sub = Subscription::filtered("rooms", json!({"state": "active"}));
        registry.subscribe(&sub);

        sub.filter = Some(json!({"state": "closed"}));
        let stored: Vec<_> = registry.iter().cloned().collect();
        assert_eq!(stored[0].filter, Some(json!({"state": "active"})));
    }

    #[test]
    fn test_insertion_order_kept_after_removal() {
        let mut registry = SubscriptionRegistry::new();
        for channel in ["a", "b", "c"] {
            registry.subscribe(&Subscription::channel(channel));
        }
        registry.unsubscribe(&Subscription::channel("b"));
        let channels: Vec<_> = registry.iter().map(|s| s.channel.as_str()).collect();
        assert_eq!(channels, ["a", "c"]);
    }

    #[test]
    fn test_from_payload_ignores_token_and_null_filter() {
        let sub = Subscription::from_payload(&json!({"channel": "todos", "filter": null, "token": "T"}))
            .unwrap();
        assert_eq!(sub, Subscription::channel("todos"));
        assert!(Subscription::from_payload(&json!({"filter": "x"})).is_none());
    }

    #[test]
    fn test_null_filter_matches_wire_unsubscribe() {
        let mut registry = SubscriptionRegistry::new();
        let sub = Subscription::filtered("todos", Value::Null);
        assert_eq!(sub, Subscription::channel("todos"));
        registry.subscribe(&sub);

        let wire = Subscription::from_payload(&json!({"channel": "todos", "filter": null})).unwrap();
        assert!(registry.unsubscribe(&wire));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_to_payload_omits_absent_filter() {
        assert_eq!(Subscription::channel("todos").to_payload(), json!({"channel": "todos"}));
        assert_eq!(
            Subscription::filtered("rooms", json!("active")).to_payload(),
            json!({"channel": "rooms", "filter": "active"})
        );
    }
}
