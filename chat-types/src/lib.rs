//! # chat-types
//!
//! Wire format and domain types for the Chatter sync engine.
//!
//! This crate provides the foundational types used across all Chatter crates:
//! - [`UserId`], [`ConversationId`], [`MessageId`], [`TempId`] - Identity types
//! - [`Message`], [`ConversationSummary`], [`Participant`] - Domain model
//! - [`ClientEvent`], [`ServerEvent`] - Named-event wire protocol
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod events;
mod ids;
mod message;

pub use error::WireError;
pub use events::{ChatUpdate, ClientEvent, EventKind, ServerEvent};
pub use ids::{ConversationId, MessageId, MessageRef, TempId, UserId};
pub use message::{
    ConversationSummary, DeliveryStatus, Message, MessageKind, Participant, PresenceStatus,
};
