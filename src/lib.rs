//! RTDS client - session and subscription management for a real-time
//! data-sync server.
//!
//! The client keeps one self-reconnecting transport and layers on top of it:
//!
//! - **Subscriptions** - structurally deduplicated `(channel, filter)` pairs,
//!   replayed after every reconnect
//! - **Listeners** - per-message-type callback fan-out
//! - **Correlation** - request/response pairing over the fire-and-forget
//!   channel ([`Client::try_request`])
//! - **Auth** - login/logout with a persistent session token attached to
//!   every outgoing message
//!
//! # Modules
//!
//! - [`client`] - connection manager and dispatch
//! - [`subscription`] - subscription registry
//! - [`listener`] - listener registry
//! - [`correlator`] - correlated requests
//! - [`auth`] - login and logout
//! - [`session`] - session persistence backends
//! - [`transport`] - transport seam and the WebSocket implementation
//! - [`config`] - endpoint options and CLI configuration
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rtds_client::{listener, Client, EndpointOptions, Subscription};
//! use rtds_client::transport::ws::WsConnector;
//!
//! # async fn run() -> Result<(), rtds_client::ClientError> {
//! let client = Client::builder(Arc::new(WsConnector::new())).build();
//! client.configure(&EndpointOptions::port(3201))?;
//! client.login("ada", "secret").await?;
//!
//! let _watch = client.watch(
//!     Subscription::channel("todos"),
//!     listener(|payload| println!("{payload}")),
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod correlator;
pub mod env;
pub mod error;
pub mod listener;
pub mod protocol;
pub mod session;
pub mod subscription;
pub mod transport;

// Re-export commonly used types
pub use client::{Client, ClientBuilder, Watch};
pub use config::{Config, EndpointOptions};
pub use correlator::{Expect, Pending, Request};
pub use error::ClientError;
pub use listener::{listener, Listener};
pub use session::{Session, SessionStore};
pub use subscription::Subscription;
pub use transport::{Connector, Transport, TransportEvent};
