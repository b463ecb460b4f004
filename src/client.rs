//! Connection manager.
//!
//! [`Client`] owns the transport, the subscription registry and the listener
//! registry, and is the single place inbound events are dispatched from.
//!
//! # Architecture
//!
//! ```text
//!   application ──send/subscribe/listen──► Client ──emit──► Transport
//!                                            ▲                  │
//!        callbacks ◄── ListenerRegistry ◄── dispatch ◄── EventSink
//!                                            │
//!                        Reconnect ──► replay SubscriptionRegistry
//! ```
//!
//! # Dispatch
//!
//! Inbound events are handled one at a time. When [`Client::configure`] runs
//! inside a tokio runtime a dispatcher task drains the transport's events;
//! otherwise the owner drives delivery with [`Client::drain_events`].
//! Callbacks run with no client lock held and may call back into the client.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use url::Url;

use crate::config::{EndpointOptions, DEFAULT_ORIGIN};
use crate::error::ClientError;
use crate::listener::{Listener, ListenerRegistry};
use crate::protocol;
use crate::session::{self, MemoryStore, Session, SessionStore};
use crate::subscription::{Subscription, SubscriptionRegistry};
use crate::transport::{Connector, Transport, TransportEvent};

/// How often [`Client::flush`] rechecks the transport queue.
const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to a session/subscription client.
///
/// Cheap to clone; all clones share one connection and one set of
/// registries.
#[derive(Clone)]
pub struct Client {
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Client")
            .field("url", &state.connection.as_ref().map(|c| c.url.as_str()))
            .field("subscriptions", &state.subscriptions.len())
            .field("listeners", &state.listeners)
            .finish_non_exhaustive()
    }
}

pub(crate) struct Shared {
    connector: Arc<dyn Connector>,
    pub(crate) store: Arc<dyn SessionStore>,
    origin: Option<Url>,
    state: Mutex<ClientState>,
}

#[derive(Default)]
struct ClientState {
    connection: Option<Connection>,
    subscriptions: SubscriptionRegistry,
    listeners: ListenerRegistry,
    watches: Vec<WatchRef>,
}

/// Live [`Watch`]es sharing one subscription.
struct WatchRef {
    subscription: Subscription,
    count: usize,
    /// Whether the first watch added the subscription to the registry.
    owned: bool,
}

/// A configured endpoint and its live transport.
struct Connection {
    url: Url,
    transport: Box<dyn Transport>,
    /// Message types the transport forwards. Never shrinks.
    installed: HashSet<String>,
    dispatcher: Option<tokio::task::JoinHandle<()>>,
    /// Undrained events when no dispatcher task is running.
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
}

impl Connection {
    fn install(&mut self, msg_type: &str) {
        if self.installed.insert(msg_type.to_string()) {
            self.transport.on(msg_type);
            log::debug!("[Client] Installed transport handler for '{msg_type}'");
        }
    }

    fn emit(&mut self, msg_type: &str, data: Value, token: Option<&str>) -> Result<(), ClientError> {
        log::trace!("[Client] Emit '{msg_type}'");
        self.transport.emit(msg_type, attach_token(data, token))
    }

    fn shutdown(&mut self) {
        self.transport.close();
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
    }
}

/// Merge `token` into an object payload. `null` becomes `{}` first; other
/// non-object payloads are passed through untouched.
fn attach_token(data: Value, token: Option<&str>) -> Value {
    let mut data = if data.is_null() {
        Value::Object(Map::new())
    } else {
        data
    };
    if let (Some(token), Value::Object(map)) = (token, &mut data) {
        map.insert(session::TOKEN_KEY.to_string(), Value::String(token.to_string()));
    }
    data
}

/// Builder for [`Client`].
#[derive(Debug)]
pub struct ClientBuilder {
    connector: Arc<dyn Connector>,
    store: Option<Arc<dyn SessionStore>>,
    origin: Option<Url>,
}

impl ClientBuilder {
    /// Session storage. Defaults to an in-memory store.
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Origin that port-only endpoints resolve against.
    /// Defaults to `http://localhost`.
    pub fn origin(mut self, origin: Url) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Build an unconfigured client.
    pub fn build(self) -> Client {
        Client {
            shared: Arc::new(Shared {
                connector: self.connector,
                store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
                origin: self.origin,
                state: Mutex::new(ClientState::default()),
            }),
        }
    }
}

impl Client {
    /// Start building a client that opens transports through `connector`.
    pub fn builder(connector: Arc<dyn Connector>) -> ClientBuilder {
        ClientBuilder {
            connector,
            store: None,
            origin: None,
        }
    }

    pub(crate) fn upgrade(shared: &Weak<Shared>) -> Option<Self> {
        shared.upgrade().map(|shared| Self { shared })
    }

    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn token(&self) -> Option<String> {
        session::token(&*self.shared.store)
    }

    /// Connect to the endpoint named by `options`.
    ///
    /// Calling again closes the previous transport and connects to the new
    /// endpoint. Registered listeners and subscriptions carry over: their
    /// handlers are installed on the new transport and every subscription is
    /// replayed.
    pub fn configure(&self, options: &EndpointOptions) -> Result<(), ClientError> {
        let url = match &self.shared.origin {
            Some(origin) => options.resolve(origin)?,
            None => {
                let origin = Url::parse(DEFAULT_ORIGIN)
                    .map_err(|e| ClientError::Config(format!("invalid origin {DEFAULT_ORIGIN}: {e}")))?;
                options.resolve(&origin)?
            }
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = self.shared.connector.connect(&url, events_tx)?;
        log::info!("[Client] Configured endpoint {url}");

        let token = self.token();
        let mut guard = self.state();
        let state = &mut *guard;

        if let Some(mut previous) = state.connection.take() {
            log::info!("[Client] Closing previous connection to {}", previous.url);
            previous.shutdown();
        }

        let mut connection = Connection {
            url,
            transport,
            installed: HashSet::new(),
            dispatcher: None,
            events: None,
        };

        for msg_type in protocol::BASELINE_TYPES {
            connection.install(msg_type);
        }
        for msg_type in state.listeners.registered_types() {
            connection.install(msg_type);
        }
        for sub in &state.subscriptions {
            if let Err(e) = connection.emit(protocol::SUBSCRIBE, sub.to_payload(), token.as_deref()) {
                log::warn!("[Client] Failed to replay subscription to '{}': {}", sub.channel, e);
            }
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let shared = Arc::downgrade(&self.shared);
                connection.dispatcher = Some(runtime.spawn(run_dispatch_loop(shared, events_rx)));
            }
            Err(_) => {
                log::debug!("[Client] No tokio runtime; events are delivered by drain_events()");
                connection.events = Some(events_rx);
            }
        }

        state.connection = Some(connection);
        Ok(())
    }

    /// Whether [`Self::configure`] has succeeded.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.state().connection.is_some()
    }

    /// Resolved endpoint URL, once configured.
    #[must_use]
    pub fn url(&self) -> Option<Url> {
        self.state().connection.as_ref().map(|c| c.url.clone())
    }

    /// Send one message, attaching the session token.
    ///
    /// `subscribe` and `unsubscribe` messages update the subscription
    /// registry before they go out. Exactly one transport emit per call.
    pub fn send(&self, msg_type: &str, data: Value) -> Result<(), ClientError> {
        let token = self.token();
        let mut guard = self.state();
        let state = &mut *guard;
        let connection = state.connection.as_mut().ok_or(ClientError::Uninitialized)?;

        if msg_type == protocol::SUBSCRIBE || msg_type == protocol::UNSUBSCRIBE {
            match Subscription::from_payload(&data) {
                Some(sub) if msg_type == protocol::SUBSCRIBE => {
                    state.subscriptions.subscribe(&sub);
                }
                Some(sub) => {
                    state.subscriptions.unsubscribe(&sub);
                }
                None => log::warn!("[Client] '{msg_type}' payload has no channel; registry unchanged"),
            }
        }

        connection.emit(msg_type, data, token.as_deref())
    }

    /// Subscribe to `sub`. Sends nothing if it is already subscribed.
    pub fn subscribe(&self, sub: &Subscription) -> Result<(), ClientError> {
        let token = self.token();
        let mut guard = self.state();
        let state = &mut *guard;
        let connection = state.connection.as_mut().ok_or(ClientError::Uninitialized)?;

        if !state.subscriptions.subscribe(sub) {
            log::debug!("[Client] Already subscribed to '{}'", sub.channel);
            return Ok(());
        }
        connection.emit(protocol::SUBSCRIBE, sub.to_payload(), token.as_deref())
    }

    /// Unsubscribe from `sub`. Sends nothing if it is not subscribed.
    pub fn unsubscribe(&self, sub: &Subscription) -> Result<(), ClientError> {
        let token = self.token();
        let mut guard = self.state();
        let state = &mut *guard;
        let connection = state.connection.as_mut().ok_or(ClientError::Uninitialized)?;

        if !state.subscriptions.unsubscribe(sub) {
            return Ok(());
        }
        connection.emit(protocol::UNSUBSCRIBE, sub.to_payload(), token.as_deref())
    }

    /// Unsubscribe from everything, sending one `unsubscribe` per entry in
    /// insertion order. The registry is empty afterwards even if an emit
    /// fails; the first failure is returned.
    pub fn unsubscribe_all(&self) -> Result<(), ClientError> {
        let token = self.token();
        let mut guard = self.state();
        let state = &mut *guard;
        let connection = state.connection.as_mut().ok_or(ClientError::Uninitialized)?;

        let mut result = Ok(());
        for sub in state.subscriptions.drain() {
            if let Err(e) = connection.emit(protocol::UNSUBSCRIBE, sub.to_payload(), token.as_deref()) {
                log::warn!("[Client] Failed to unsubscribe from '{}': {}", sub.channel, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Current subscriptions in insertion order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.state().subscriptions.iter().cloned().collect()
    }

    /// Call `callback` for every message of `msg_type`.
    ///
    /// Returns `Ok(false)` if this callback was already registered for the
    /// type.
    pub fn listen(&self, msg_type: &str, callback: &Listener) -> Result<bool, ClientError> {
        let mut guard = self.state();
        let state = &mut *guard;
        let connection = state.connection.as_mut().ok_or(ClientError::Uninitialized)?;

        let added = state.listeners.listen(msg_type, callback);
        connection.install(msg_type);
        Ok(added)
    }

    /// Stop calling `callback` for `msg_type`. Returns `Ok(false)` if it was
    /// not registered.
    pub fn unlisten(&self, msg_type: &str, callback: &Listener) -> Result<bool, ClientError> {
        let mut state = self.state();
        if state.connection.is_none() {
            return Err(ClientError::Uninitialized);
        }
        Ok(state.listeners.unlisten(msg_type, callback))
    }

    /// Remove every listener. Transport handlers stay installed.
    pub fn reset_listeners(&self) {
        self.state().listeners.clear();
        log::debug!("[Client] Listener registry reset");
    }

    /// Whether any callback is registered for `msg_type`.
    #[must_use]
    pub fn has_listeners(&self, msg_type: &str) -> bool {
        self.state().listeners.has_callbacks(msg_type)
    }

    /// Total number of listener registrations.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.state().listeners.len()
    }

    /// Send `create-objects`.
    pub fn create_objects(&self, data: Value) -> Result<(), ClientError> {
        self.send(protocol::CREATE_OBJECTS, data)
    }

    /// Send `update-objects`.
    pub fn update_objects(&self, data: Value) -> Result<(), ClientError> {
        self.send(protocol::UPDATE_OBJECTS, data)
    }

    /// Send `delete-objects`.
    pub fn delete_objects(&self, data: Value) -> Result<(), ClientError> {
        self.send(protocol::DELETE_OBJECTS, data)
    }

    /// Listen on `sub.channel` and subscribe to `sub` until the returned
    /// [`Watch`] is dropped.
    ///
    /// Watches on the same subscription share it: `unsubscribe` goes out only
    /// when the last of them is dropped, and only if a watch subscribed in
    /// the first place. The listener is removed on drop only if this watch
    /// registered it.
    pub fn watch(&self, sub: Subscription, callback: Listener) -> Result<Watch, ClientError> {
        let owns_listener = self.listen(&sub.channel, &callback)?;
        if let Err(e) = self.retain_watch(&sub) {
            if owns_listener {
                self.unlisten_quietly(&sub.channel, &callback);
            }
            return Err(e);
        }
        Ok(Watch {
            client: self.clone(),
            subscription: sub,
            callback,
            owns_listener,
        })
    }

    fn retain_watch(&self, sub: &Subscription) -> Result<(), ClientError> {
        let token = self.token();
        let mut guard = self.state();
        let state = &mut *guard;
        let connection = state.connection.as_mut().ok_or(ClientError::Uninitialized)?;

        if let Some(watch) = state.watches.iter_mut().find(|w| w.subscription == *sub) {
            watch.count += 1;
            return Ok(());
        }

        let owned = state.subscriptions.subscribe(sub);
        if owned {
            if let Err(e) = connection.emit(protocol::SUBSCRIBE, sub.to_payload(), token.as_deref()) {
                state.subscriptions.unsubscribe(sub);
                return Err(e);
            }
        }
        state.watches.push(WatchRef {
            subscription: sub.clone(),
            count: 1,
            owned,
        });
        Ok(())
    }

    fn release_watch(&self, sub: &Subscription) -> Result<(), ClientError> {
        let token = self.token();
        let mut guard = self.state();
        let state = &mut *guard;

        let Some(index) = state.watches.iter().position(|w| w.subscription == *sub) else {
            return Ok(());
        };
        state.watches[index].count -= 1;
        if state.watches[index].count > 0 {
            return Ok(());
        }
        let watch = state.watches.remove(index);
        if !watch.owned || !state.subscriptions.unsubscribe(sub) {
            return Ok(());
        }
        let connection = state.connection.as_mut().ok_or(ClientError::Uninitialized)?;
        connection.emit(protocol::UNSUBSCRIBE, sub.to_payload(), token.as_deref())
    }

    pub(crate) fn unlisten_quietly(&self, msg_type: &str, callback: &Listener) {
        if let Err(e) = self.unlisten(msg_type, callback) {
            log::debug!("[Client] Cleanup unlisten for '{msg_type}' failed: {e}");
        }
    }

    /// Wait until every emitted frame has reached the wire.
    ///
    /// Fails with [`ClientError::Transport`] if frames are still queued after
    /// `timeout`, e.g. because the endpoint is unreachable.
    pub async fn flush(&self, timeout: Duration) -> Result<(), ClientError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let queued = {
                let state = self.state();
                let connection = state.connection.as_ref().ok_or(ClientError::Uninitialized)?;
                connection.transport.queued()
            };
            if queued == 0 {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ClientError::Transport(format!(
                    "{queued} frame(s) not written within {timeout:?}"
                )));
            }
            tokio::time::sleep(FLUSH_POLL_INTERVAL).await;
        }
    }

    /// Deliver one inbound transport event.
    ///
    /// This is what the dispatcher task calls for every event; it is public
    /// so embedders without a runtime (and tests) can feed events directly.
    pub fn dispatch(&self, event: TransportEvent) {
        match event {
            TransportEvent::Reconnect => self.replay(),
            TransportEvent::Message { msg_type, payload } => {
                match msg_type.as_str() {
                    protocol::FAILURE => self.handle_failure(&payload),
                    protocol::WELCOME => self.handle_welcome(&payload),
                    _ => {}
                }
                self.fan_out(&msg_type, &payload);
            }
        }
    }

    /// Dispatch every queued event when no dispatcher task is running.
    /// Returns how many events were delivered.
    pub fn drain_events(&self) -> usize {
        let events: Vec<TransportEvent> = {
            let mut state = self.state();
            let Some(rx) = state.connection.as_mut().and_then(|c| c.events.as_mut()) else {
                return 0;
            };
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };
        let count = events.len();
        for event in events {
            self.dispatch(event);
        }
        count
    }

    fn fan_out(&self, msg_type: &str, payload: &Value) {
        let callbacks = self.state().listeners.callbacks(msg_type);
        if callbacks.is_empty() {
            log::trace!("[Client] No listeners for '{msg_type}'");
            return;
        }

        for callback in callbacks {
            let live = self.state().listeners.contains(msg_type, &callback);
            if !live {
                continue;
            }
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| callback(payload)));
            if outcome.is_err() {
                log::error!("[Client] Listener for '{msg_type}' panicked");
            }
        }
    }

    /// Re-send `subscribe` for every registry entry, in insertion order.
    fn replay(&self) {
        let token = self.token();
        let mut guard = self.state();
        let state = &mut *guard;
        let Some(connection) = state.connection.as_mut() else {
            return;
        };

        for sub in &state.subscriptions {
            if let Err(e) = connection.emit(protocol::SUBSCRIBE, sub.to_payload(), token.as_deref()) {
                log::warn!("[Client] Failed to replay subscription to '{}': {}", sub.channel, e);
            }
        }
        log::info!("[Client] Reconnected, replayed {} subscriptions", state.subscriptions.len());
    }

    fn handle_failure(&self, payload: &Value) {
        let status = payload.get("status").and_then(Value::as_u64);
        let message = payload.get("message").and_then(Value::as_str).unwrap_or("");

        if status == Some(protocol::STATUS_UNAUTHORIZED) {
            Session::clear(&*self.shared.store);
            log::error!("[Client] Unauthorized (401): {message}; session cleared");
        } else {
            log::error!("[Client] Server failure (status {status:?}): {message}");
        }
    }

    fn handle_welcome(&self, payload: &Value) {
        let Some(session) = Session::from_payload(payload) else {
            log::debug!("[Client] Welcome without session");
            return;
        };
        if let Err(e) = session.save(&*self.shared.store) {
            log::warn!("[Client] Failed to store welcome session: {e:#}");
        }
    }
}

/// Dispatcher task: delivers events in arrival order until the transport or
/// the client goes away.
async fn run_dispatch_loop(shared: Weak<Shared>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        let Some(client) = Client::upgrade(&shared) else {
            break;
        };
        client.dispatch(event);
    }
    log::debug!("[Client] Dispatcher stopped");
}

/// Live channel watch. Dropping it unsubscribes and removes the listener.
pub struct Watch {
    client: Client,
    subscription: Subscription,
    callback: Listener,
    owns_listener: bool,
}

impl std::fmt::Debug for Watch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch")
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
    }
}

impl Watch {
    /// The watched subscription.
    #[must_use]
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        if let Err(e) = self.client.release_watch(&self.subscription) {
            log::debug!("[Client] Watch cleanup unsubscribe failed: {e}");
        }
        if self.owns_listener {
            self.client.unlisten_quietly(&self.subscription.channel, &self.callback);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attach_token_merges_into_objects() {
        let data = attach_token(json!({"channel": "todos"}), Some("T"));
        assert_eq!(data, json!({"channel": "todos", "token": "T"}));
    }

    #[test]
    fn test_attach_token_null_becomes_object() {
        assert_eq!(attach_token(Value::Null, None), json!({}));
        assert_eq!(attach_token(Value::Null, Some("T")), json!({"token": "T"}));
    }

    #[test]
    fn test_attach_token_leaves_arrays_alone() {
        assert_eq!(attach_token(json!([1, 2]), Some("T")), json!([1, 2]));
    }

    #[test]
    fn test_attach_token_without_session() {
        assert_eq!(attach_token(json!({"a": 1}), None), json!({"a": 1}));
    }
}
