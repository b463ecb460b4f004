//! Transport boundary.
//!
//! The client speaks to the server through a bidirectional, type-tagged
//! message channel with automatic reconnect (socket.io semantics). This
//! module defines that seam:
//!
//! - [`Connector`] opens a [`Transport`] for an endpoint URL
//! - [`Transport::on`] installs forwarding for one message type
//! - [`Transport::emit`] queues an outgoing message
//! - inbound traffic arrives on the [`EventSink`] as [`TransportEvent`]s
//!
//! [`ws`] provides the WebSocket implementation used by the `rtds` binary.

pub mod ws;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use crate::error::ClientError;

/// Inbound event from a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A message of an installed type.
    Message {
        /// Message type tag.
        msg_type: String,
        /// Message payload.
        payload: Value,
    },
    /// The link dropped and has been re-established.
    Reconnect,
}

impl TransportEvent {
    /// Shorthand for [`TransportEvent::Message`].
    pub fn message(msg_type: impl Into<String>, payload: Value) -> Self {
        Self::Message {
            msg_type: msg_type.into(),
            payload,
        }
    }
}

/// Where a transport delivers inbound events.
pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

/// An open, self-reconnecting message channel.
///
/// Implementations must not call back into the client from `on`, `emit` or
/// `close`; they are invoked while client state is locked.
pub trait Transport: Send + std::fmt::Debug {
    /// Start forwarding messages of `msg_type` to the event sink.
    fn on(&mut self, msg_type: &str);

    /// Queue one outgoing message.
    fn emit(&mut self, msg_type: &str, payload: Value) -> Result<(), ClientError>;

    /// Tear the transport down. No events are delivered afterwards.
    fn close(&mut self);

    /// Frames accepted by [`Self::emit`] that have not reached the wire yet.
    fn queued(&self) -> usize {
        0
    }
}

/// Factory for transports.
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Open a transport to `url` that reports inbound traffic on `events`.
    fn connect(&self, url: &Url, events: EventSink) -> Result<Box<dyn Transport>, ClientError>;
}

/// JSON text frame carried on the wire: `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Message type tag.
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Message payload.
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// Encode a message as frame text.
    pub fn encode(msg_type: &str, data: Value) -> Result<String, ClientError> {
        serde_json::to_string(&Self {
            msg_type: msg_type.to_string(),
            data,
        })
        .map_err(|e| ClientError::Transport(format!("Failed to encode '{msg_type}': {e}")))
    }

    /// Decode frame text, `None` if it is not a frame.
    #[must_use]
    pub fn decode(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_wire_shape() {
        let text = Frame::encode("subscribe", json!({"channel": "todos"})).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"type": "subscribe", "data": {"channel": "todos"}}));
    }

    #[test]
    fn test_decode_defaults_missing_data() {
        let frame = Frame::decode(r#"{"type":"logout-successful"}"#).unwrap();
        assert_eq!(frame.msg_type, "logout-successful");
        assert_eq!(frame.data, Value::Null);
    }

    #[test]
    fn test_decode_rejects_non_frames() {
        assert!(Frame::decode("hello").is_none());
        assert!(Frame::decode(r#"{"data": 1}"#).is_none());
    }
}
