//! # chat-core
//!
//! Pure reconciliation logic for the Chatter sync engine (no I/O, instant tests).
//!
//! This crate implements the state containers and reducers that keep a
//! client's view of chats consistent, without any network or timer I/O:
//!
//! - [`SummaryStore`] - the chat-list aggregate, one row per conversation
//! - [`MessageLog`] - the open conversation's ordered message log
//! - [`PresenceTracker`] - per-peer online/offline state
//! - [`TypingEmitter`] / [`RemoteTyping`] - debounced local typing emission
//!   and per-peer remote typing state
//! - [`merge_read_receipt`] - folds read-receipt echoes into both stores
//! - [`grouping`] - date labels for rendering
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce
//! output without side effects. Timer-driven behavior (the typing debounce)
//! is expressed as actions for the caller to interpret; the actual I/O is
//! performed by `chat-client`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod grouping;
pub mod log;
pub mod presence;
pub mod receipts;
pub mod summary;
pub mod typing;

pub use log::{InboundOutcome, MessageLog};
pub use presence::PresenceTracker;
pub use receipts::merge_read_receipt;
pub use summary::{search_by_participant, summary_preview, SummaryStore, SummaryUpdate};
pub use typing::{RemoteTyping, TypingAction, TypingEmitter, DEFAULT_DEBOUNCE};
