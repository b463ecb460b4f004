//! Login and logout over the correlated request channel.
//!
//! The session lives in the client's [`SessionStore`](crate::session::SessionStore):
//! a successful `login` stores `{token, user}`, a failed one clears it, and a
//! successful `logout` tears down subscriptions, the session and listeners in
//! that order.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::client::Client;
use crate::correlator::{Expect, Pending, Request};
use crate::error::ClientError;
use crate::protocol;
use crate::session::{self, Session};

impl Client {
    /// Authenticate with `user` and `password`.
    ///
    /// Resolves to the server's `login-successful` payload. A `login-failed`
    /// reply rejects with [`ClientError::Authentication`] carrying the
    /// server's message. Either failure path leaves the client logged out.
    pub fn login(&self, user: &str, password: &str) -> Pending {
        let store = Arc::clone(&self.shared.store);
        let failed_store = Arc::clone(&self.shared.store);

        let expect = Expect::new(protocol::LOGIN_SUCCESSFUL, protocol::LOGIN_FAILED)
            .reject_with(ClientError::Authentication)
            .on_success(move |payload| match Session::from_payload(payload) {
                Some(session) => {
                    if let Err(e) = session.save(&*store) {
                        log::error!("[Client] Failed to store session: {e:#}");
                    } else {
                        log::info!("[Client] Logged in");
                    }
                }
                None => {
                    log::warn!("[Client] Login succeeded without a token");
                    Session::clear(&*store);
                }
            })
            .on_failure(move |message| {
                log::warn!("[Client] Login failed: {message}");
                Session::clear(&*failed_store);
            });

        self.try_request(
            Request::new(protocol::LOGIN, json!({ "user": user, "password": password })),
            expect,
        )
    }

    /// End the session.
    ///
    /// Resolves immediately when not logged in. Otherwise, on
    /// `logout-successful`: unsubscribes from everything, clears the session
    /// and drops every listener. `logout-failed` rejects with the server's
    /// message and leaves state untouched.
    pub fn logout(&self) -> Pending {
        if !self.is_logged_in() {
            log::debug!("[Client] Logout without session");
            return Pending::ready(Ok(Value::Null));
        }

        let client = Arc::downgrade(&self.shared);
        let expect = Expect::new(protocol::LOGOUT_SUCCESSFUL, protocol::LOGOUT_FAILED)
            .on_success(move |_| {
                if let Some(client) = Client::upgrade(&client) {
                    client.finish_logout();
                }
            })
            .on_failure(|message| log::warn!("[Client] Logout failed: {message}"));

        self.try_request(Request::new(protocol::LOGOUT, json!({})), expect)
    }

    fn finish_logout(&self) {
        if let Err(e) = self.unsubscribe_all() {
            log::warn!("[Client] Unsubscribe during logout failed: {e}");
        }
        Session::clear(&*self.shared.store);
        self.reset_listeners();
        log::info!("[Client] Logged out");
    }

    /// Whether a session token is stored.
    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        session::token(&*self.shared.store).is_some()
    }

    /// The stored session, if any.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        Session::load(&*self.shared.store)
    }
}
