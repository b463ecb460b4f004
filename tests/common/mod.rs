//! Shared test fixtures: a recording in-memory transport.

#![allow(dead_code, reason = "not every test binary uses every helper")]

use std::sync::{Arc, Mutex};

use rtds_client::transport::EventSink;
use rtds_client::{Client, ClientError, Connector, EndpointOptions, Transport};
use serde_json::Value;
use url::Url;

/// Everything the fake transports observed.
#[derive(Debug, Default)]
pub struct Recorded {
    pub connects: Vec<Url>,
    pub emits: Vec<(String, Value)>,
    pub installed: Vec<String>,
    pub closed: usize,
    pub sink: Option<EventSink>,
    pub fail_emits: bool,
}

/// Connector whose transports record into a shared [`Recorded`].
#[derive(Debug, Clone, Default)]
pub struct RecordingConnector {
    pub recorded: Arc<Mutex<Recorded>>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emits(&self) -> Vec<(String, Value)> {
        self.recorded.lock().unwrap().emits.clone()
    }

    pub fn emit_types(&self) -> Vec<String> {
        self.emits().into_iter().map(|(t, _)| t).collect()
    }

    pub fn clear_emits(&self) {
        self.recorded.lock().unwrap().emits.clear();
    }

    pub fn installed(&self) -> Vec<String> {
        self.recorded.lock().unwrap().installed.clone()
    }

    pub fn set_fail_emits(&self, fail: bool) {
        self.recorded.lock().unwrap().fail_emits = fail;
    }
}

impl Connector for RecordingConnector {
    fn connect(&self, url: &Url, events: EventSink) -> Result<Box<dyn Transport>, ClientError> {
        let mut recorded = self.recorded.lock().unwrap();
        recorded.connects.push(url.clone());
        recorded.sink = Some(events);
        Ok(Box::new(RecordingTransport {
            recorded: Arc::clone(&self.recorded),
        }))
    }
}

#[derive(Debug)]
struct RecordingTransport {
    recorded: Arc<Mutex<Recorded>>,
}

impl Transport for RecordingTransport {
    fn on(&mut self, msg_type: &str) {
        self.recorded
            .lock()
            .unwrap()
            .installed
            .push(msg_type.to_string());
    }

    fn emit(&mut self, msg_type: &str, payload: Value) -> Result<(), ClientError> {
        let mut recorded = self.recorded.lock().unwrap();
        if recorded.fail_emits {
            return Err(ClientError::Transport("emit refused".to_string()));
        }
        recorded.emits.push((msg_type.to_string(), payload));
        Ok(())
    }

    fn close(&mut self) {
        self.recorded.lock().unwrap().closed += 1;
    }
}

/// A client on a recording transport, configured for port 3201.
pub fn configured_client() -> (Client, RecordingConnector) {
    let connector = RecordingConnector::new();
    let client = Client::builder(Arc::new(connector.clone())).build();
    client
        .configure(&EndpointOptions::port(3201))
        .expect("configure");
    (client, connector)
}
