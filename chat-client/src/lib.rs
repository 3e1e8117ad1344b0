//! # chat-client
//!
//! Client engine for the Chatter realtime chat sync protocol.
//!
//! This is the I/O layer applications use to stay in sync with the
//! messaging service.
//!
//! ## Architecture
//!
//! chat-client wires pure state containers (from chat-core) to the
//! outside world:
//!
//! ```text
//! Application → EngineHandle → ChatEngine (one task, owns all state)
//!                                   ↑
//!               ConnectionManager → EventChannel → network
//!                                   ↑
//!               ChatApi / MediaUploader / Notifier (request/response)
//! ```
//!
//! All state mutation happens on the engine task; channel events, command
//! calls, and I/O completions re-enter through one queue. Consumers read
//! state via snapshot queries and react to [`StateChange`] notifications.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod channel;
pub mod connection;
pub mod engine;

pub use api::{
    ApiError, ChatApi, MediaUpload, MediaUploader, MockChatApi, MockNotifier, MockUploader,
    Notifier,
};
pub use channel::{ChannelError, ChannelNotice, EventChannel, MockChannel};
pub use connection::{ConnectionManager, Subscription};
pub use engine::{ChatConfig, ChatEngine, EngineError, EngineHandle, MediaDraft, StateChange};
