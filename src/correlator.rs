//! Request/response correlation over a fire-and-forget channel.
//!
//! [`Client::try_request`] sends one message and settles once, when the first
//! message of either the expected success type or failure type arrives:
//!
//! 1. transient listeners are registered for both types
//! 2. the request is sent
//! 3. on success: both listeners are removed, the `on_success` hook runs,
//!    the [`Pending`] resolves to the payload
//! 4. on failure: both listeners are removed, the `on_failure` hook runs,
//!    the [`Pending`] resolves to an error carrying the server's `message`
//!
//! No timeout is applied. A reply that never comes leaves the [`Pending`]
//! unresolved until its listeners are removed by other means (for example
//! [`Client::reset_listeners`]), at which point it resolves to
//! [`ClientError::Closed`].

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::client::{Client, Shared};
use crate::error::ClientError;
use crate::listener::{listener, Listener};

type Reply = Result<Value, ClientError>;
type SuccessHook = Box<dyn FnOnce(&Value) + Send>;
type FailureHook = Box<dyn FnOnce(&str) + Send>;

/// Outgoing half of a correlated exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Message type to send.
    pub channel: String,
    /// Message payload.
    pub data: Value,
}

impl Request {
    /// Request of type `channel` carrying `data`.
    pub fn new(channel: impl Into<String>, data: Value) -> Self {
        Self {
            channel: channel.into(),
            data,
        }
    }
}

/// Which replies settle a request, and what to do locally when they do.
pub struct Expect {
    success: String,
    failure: String,
    on_success: Option<SuccessHook>,
    on_failure: Option<FailureHook>,
    reject: fn(String) -> ClientError,
}

impl std::fmt::Debug for Expect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expect")
            .field("success", &self.success)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

impl Expect {
    /// Settle on `success` or `failure` message types.
    ///
    /// Failures reject with [`ClientError::Correlation`] unless
    /// [`Self::reject_with`] says otherwise.
    pub fn new(success: impl Into<String>, failure: impl Into<String>) -> Self {
        Self {
            success: success.into(),
            failure: failure.into(),
            on_success: None,
            on_failure: None,
            reject: ClientError::Correlation,
        }
    }

    /// Run `hook` with the success payload before the [`Pending`] resolves.
    pub fn on_success(mut self, hook: impl FnOnce(&Value) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(hook));
        self
    }

    /// Run `hook` with the failure message before the [`Pending`] rejects.
    ///
    /// Also runs when the request could not be sent at all.
    pub fn on_failure(mut self, hook: impl FnOnce(&str) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(hook));
        self
    }

    /// Error constructor used for server-reported failures.
    pub fn reject_with(mut self, reject: fn(String) -> ClientError) -> Self {
        self.reject = reject;
        self
    }
}

/// Future of a correlated reply. Settles exactly once.
#[derive(Debug)]
pub struct Pending {
    state: PendingState,
}

#[derive(Debug)]
enum PendingState {
    Ready(Option<Reply>),
    Waiting(oneshot::Receiver<Reply>),
}

impl Pending {
    /// Already-settled future.
    #[must_use]
    pub fn ready(reply: Reply) -> Self {
        Self {
            state: PendingState::Ready(Some(reply)),
        }
    }

    /// Already-failed future.
    #[must_use]
    pub fn failed(err: ClientError) -> Self {
        Self::ready(Err(err))
    }

    fn waiting(rx: oneshot::Receiver<Reply>) -> Self {
        Self {
            state: PendingState::Waiting(rx),
        }
    }
}

impl Future for Pending {
    type Output = Reply;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            PendingState::Ready(reply) => Poll::Ready(reply.take().unwrap_or(Err(ClientError::Closed))),
            PendingState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|reply| reply.unwrap_or(Err(ClientError::Closed))),
        }
    }
}

/// State of one in-flight exchange. Taken exactly once by whichever reply
/// arrives first; dropping it unresolved closes the [`Pending`].
struct Correlation {
    tx: oneshot::Sender<Reply>,
    on_success: Option<SuccessHook>,
    on_failure: Option<FailureHook>,
    reject: fn(String) -> ClientError,
    registrations: Vec<(String, Weak<dyn Fn(&Value) + Send + Sync>)>,
}

type Slot = Arc<Mutex<Option<Correlation>>>;

enum Outcome<'a> {
    Success(&'a Value),
    Failure(&'a Value),
}

impl Client {
    /// Send `request` and await the first matching success or failure reply.
    ///
    /// The request is sent before this returns; awaiting the [`Pending`] only
    /// waits for the reply.
    pub fn try_request(&self, request: Request, expect: Expect) -> Pending {
        let (tx, rx) = oneshot::channel();
        let slot: Slot = Arc::new(Mutex::new(None));
        let client = Arc::downgrade(&self.shared);

        let success_listener = correlation_listener(&client, &slot, true);
        let failure_listener = correlation_listener(&client, &slot, false);

        *lock(&slot) = Some(Correlation {
            tx,
            on_success: expect.on_success,
            on_failure: expect.on_failure,
            reject: expect.reject,
            registrations: vec![
                (expect.success.clone(), Arc::downgrade(&success_listener)),
                (expect.failure.clone(), Arc::downgrade(&failure_listener)),
            ],
        });

        let sent = self
            .listen(&expect.success, &success_listener)
            .and_then(|_| self.listen(&expect.failure, &failure_listener))
            .and_then(|_| self.send(&request.channel, request.data));

        if let Err(err) = sent {
            log::warn!("[Client] Request '{}' not sent: {}", request.channel, err);
            self.unlisten_quietly(&expect.success, &success_listener);
            self.unlisten_quietly(&expect.failure, &failure_listener);
            let correlation = lock(&slot).take();
            if let Some(hook) = correlation.and_then(|c| c.on_failure) {
                hook(&err.to_string());
            }
            return Pending::failed(err);
        }

        log::debug!(
            "[Client] Sent '{}', awaiting '{}' or '{}'",
            request.channel,
            expect.success,
            expect.failure
        );
        Pending::waiting(rx)
    }
}

fn lock(slot: &Slot) -> std::sync::MutexGuard<'_, Option<Correlation>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn correlation_listener(client: &Weak<Shared>, slot: &Slot, success: bool) -> Listener {
    let client = Weak::clone(client);
    let slot = Arc::clone(slot);
    listener(move |payload| {
        let outcome = if success {
            Outcome::Success(payload)
        } else {
            Outcome::Failure(payload)
        };
        settle(&client, &slot, outcome);
    })
}

fn settle(client: &Weak<Shared>, slot: &Slot, outcome: Outcome<'_>) {
    let Some(correlation) = lock(slot).take() else {
        return;
    };

    if let Some(client) = Client::upgrade(client) {
        for (msg_type, registration) in &correlation.registrations {
            if let Some(listener) = registration.upgrade() {
                client.unlisten_quietly(msg_type, &listener);
            }
        }
    }

    match outcome {
        Outcome::Success(payload) => {
            if let Some(hook) = correlation.on_success {
                hook(payload);
            }
            let _ = correlation.tx.send(Ok(payload.clone()));
        }
        Outcome::Failure(payload) => {
            let message = failure_message(payload);
            if let Some(hook) = correlation.on_failure {
                hook(&message);
            }
            let _ = correlation.tx.send(Err((correlation.reject)(message)));
        }
    }
}

/// The server's `message` field, falling back to the raw payload.
fn failure_message(payload: &Value) -> String {
    match payload.get("message") {
        Some(Value::String(message)) => message.clone(),
        Some(other) => other.to_string(),
        None if payload.is_null() => "request failed".to_string(),
        None => payload.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failure_message() {
        assert_eq!(failure_message(&json!({"message": "bad credentials"})), "bad credentials");
        assert_eq!(failure_message(&json!({"message": 42})), "42");
        assert_eq!(failure_message(&Value::Null), "request failed");
        assert_eq!(failure_message(&json!({"code": 1})), r#"{"code":1}"#);
    }

    #[tokio::test]
    async fn test_ready_pending_resolves() {
        assert_eq!(Pending::ready(Ok(json!(1))).await, Ok(json!(1)));
    }

    #[tokio::test]
    async fn test_dropped_sender_closes_pending() {
        let (tx, rx) = oneshot::channel::<Reply>();
        drop(tx);
        assert_eq!(Pending::waiting(rx).await, Err(ClientError::Closed));
    }
}
