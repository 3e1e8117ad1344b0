//! Event-channel abstraction for the Chatter engine.
//!
//! This module provides a pluggable channel layer that abstracts the
//! underlying bidirectional connection (websocket in production, mock for
//! testing).
//!
//! # Design
//!
//! The channel trait is async and connection-oriented:
//! - `connect()` establishes a connection
//! - `send()` transmits one named outbound event
//! - `recv()` yields the next inbound event
//! - `close()` gracefully terminates
//!
//! The channel itself is dumb; connect/reconnect classification, fan-out,
//! and offline no-op semantics live in
//! [`ConnectionManager`](crate::connection::ConnectionManager).

mod mock;

pub use mock::MockChannel;

use async_trait::async_trait;
use chat_types::{ClientEvent, ServerEvent};
use thiserror::Error;

/// Channel errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

/// What the connection layer delivers to subscribers.
#[derive(Debug, Clone)]
pub enum ChannelNotice {
    /// The channel came up. `resumed` is true after a prior drop.
    Up {
        /// Whether a session existed before (reconnect vs first connect).
        resumed: bool,
    },
    /// The channel went down.
    Down {
        /// Why, best effort.
        reason: String,
    },
    /// An inbound wire event.
    Event(ServerEvent),
}

/// Bidirectional named-event channel to the messaging service.
///
/// Implementations handle the underlying connection mechanism
/// (websocket, mock, etc).
#[async_trait]
pub trait EventChannel: Send + Sync + 'static {
    /// Establish the connection, optionally authenticating.
    async fn connect(&self, auth_token: Option<&str>) -> Result<(), ChannelError>;

    /// Send one outbound event. Fire-and-forget at the protocol level.
    async fn send(&self, event: &ClientEvent) -> Result<(), ChannelError>;

    /// Wait for the next inbound event.
    ///
    /// Returns an error when the connection drops or closes.
    async fn recv(&self) -> Result<ServerEvent, ChannelError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), ChannelError>;
}
