//! Mock channel for testing.
//!
//! Allows injecting inbound events, capturing sent events, and simulating
//! transport drops.

use super::{ChannelError, EventChannel};
use async_trait::async_trait;
use chat_types::{ClientEvent, ServerEvent};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Mock channel for testing.
///
/// Cloning shares state, so a test can hold one clone while the engine
/// owns another.
#[derive(Debug)]
pub struct MockChannel {
    state: Arc<Mutex<MockChannelState>>,
    inbound_tx: mpsc::UnboundedSender<Result<ServerEvent, ChannelError>>,
    inbound_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<ServerEvent, ChannelError>>>>,
}

#[derive(Debug, Default)]
struct MockChannelState {
    connected: bool,
    connect_count: u32,
    auth_token: Option<String>,
    sent: Vec<ClientEvent>,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
}

impl MockChannel {
    /// Create a new mock channel.
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(MockChannelState::default())),
            inbound_tx,
            inbound_rx: Arc::new(tokio::sync::Mutex::new(inbound_rx)),
        }
    }

    /// Inject an inbound event, delivered by the next `recv()`.
    pub fn push_inbound(&self, event: ServerEvent) {
        let _ = self.inbound_tx.send(Ok(event));
    }

    /// Simulate a transport-level drop: `recv()` fails with the reason and
    /// the channel reports disconnected.
    pub fn drop_connection(&self, reason: &str) {
        self.state.lock().unwrap().connected = false;
        let _ = self
            .inbound_tx
            .send(Err(ChannelError::ReceiveFailed(reason.to_string())));
    }

    /// All events that were sent, in order.
    pub fn sent_events(&self) -> Vec<ClientEvent> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Wire names of all sent events, in order.
    pub fn sent_names(&self) -> Vec<&'static str> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|e| e.name())
            .collect()
    }

    /// The last event that was sent.
    pub fn last_sent(&self) -> Option<ClientEvent> {
        self.state.lock().unwrap().sent.last().cloned()
    }

    /// The auth token passed to the most recent `connect()`.
    pub fn auth_token(&self) -> Option<String> {
        self.state.lock().unwrap().auth_token.clone()
    }

    /// How many times `connect()` has succeeded.
    pub fn connect_count(&self) -> u32 {
        self.state.lock().unwrap().connect_count
    }

    /// Cause the next `connect()` to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.state.lock().unwrap().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next `send()` to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.state.lock().unwrap().fail_next_send = Some(error.to_string());
    }

    /// Clear captured sends.
    pub fn clear_sent(&self) {
        self.state.lock().unwrap().sent.clear();
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MockChannel {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            inbound_tx: self.inbound_tx.clone(),
            inbound_rx: Arc::clone(&self.inbound_rx),
        }
    }
}

#[async_trait]
impl EventChannel for MockChannel {
    async fn connect(&self, auth_token: Option<&str>) -> Result<(), ChannelError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.fail_next_connect.take() {
            return Err(ChannelError::ConnectionFailed(error));
        }
        state.connected = true;
        state.connect_count += 1;
        state.auth_token = auth_token.map(str::to_string);
        Ok(())
    }

    async fn send(&self, event: &ClientEvent) -> Result<(), ChannelError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(ChannelError::NotConnected);
        }
        if let Some(error) = state.fail_next_send.take() {
            return Err(ChannelError::SendFailed(error));
        }
        state.sent.push(event.clone());
        Ok(())
    }

    async fn recv(&self) -> Result<ServerEvent, ChannelError> {
        {
            let state = self.state.lock().unwrap();
            if !state.connected {
                return Err(ChannelError::NotConnected);
            }
        }
        let mut rx = self.inbound_rx.lock().await;
        match rx.recv().await {
            Some(Ok(event)) => Ok(event),
            Some(Err(error)) => Err(error),
            None => Err(ChannelError::ConnectionClosed),
        }
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    async fn close(&self) -> Result<(), ChannelError> {
        self.state.lock().unwrap().connected = false;
        Ok(())
    }
}
