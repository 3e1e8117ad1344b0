//! Typing indicators: debounced local emission and remote peer state.
//!
//! Local emission is edge-triggered. `typing` goes out only on the
//! idle-to-active transition, never per keystroke; `stop_typing` goes out
//! when the input empties or when the debounce window elapses with no
//! fresh keystroke. The emitter is a pure state machine producing
//! [`TypingAction`]s; the caller interprets timer actions with real
//! timers and feeds expirations back via [`TypingEmitter::timer_fired`].
//! Generation counting makes stale timers harmless: every keystroke bumps
//! the generation, so a timer armed before it fires into nothing.

use chat_types::{ConversationId, UserId};
use std::collections::HashSet;
use std::time::Duration;

/// Debounce window after the last keystroke before `stop_typing` is sent.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1500);

/// Instructions produced by the emitter for the caller to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingAction {
    /// Emit a `typing` event (idle → active edge).
    EmitTyping,
    /// Emit a `stop_typing` event (active → idle edge).
    EmitStopTyping,
    /// Arm the debounce timer; feed the generation back on expiry.
    StartStopTimer {
        /// Identifies this arming; stale generations are ignored.
        generation: u64,
    },
}

/// Edge-triggered, debounced emitter for the local user's typing state.
#[derive(Debug, Clone, Default)]
pub struct TypingEmitter {
    active: bool,
    generation: u64,
}

impl TypingEmitter {
    /// Create an idle emitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Process the input field's new contents after a keystroke.
    pub fn keystroke(&mut self, text: &str) -> Vec<TypingAction> {
        // Any keystroke invalidates a pending stop timer.
        self.generation = self.generation.wrapping_add(1);

        if text.trim().is_empty() {
            if self.active {
                self.active = false;
                return vec![TypingAction::EmitStopTyping];
            }
            return vec![];
        }

        let mut actions = Vec::with_capacity(2);
        if !self.active {
            self.active = true;
            actions.push(TypingAction::EmitTyping);
        }
        actions.push(TypingAction::StartStopTimer {
            generation: self.generation,
        });
        actions
    }

    /// Process a debounce timer expiry armed with `generation`.
    pub fn timer_fired(&mut self, generation: u64) -> Vec<TypingAction> {
        if generation != self.generation || !self.active {
            return vec![];
        }
        self.active = false;
        vec![TypingAction::EmitStopTyping]
    }

    /// Whether the local user currently counts as typing.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Forget all state, e.g. when leaving the conversation.
    ///
    /// Returns `EmitStopTyping` if the emitter was mid-typing so the peer
    /// does not see a stuck indicator.
    pub fn reset(&mut self) -> Vec<TypingAction> {
        self.generation = self.generation.wrapping_add(1);
        if self.active {
            self.active = false;
            return vec![TypingAction::EmitStopTyping];
        }
        vec![]
    }
}

/// Remote typing state per `(conversation, peer)` pair.
#[derive(Debug, Clone, Default)]
pub struct RemoteTyping {
    typing: HashSet<(ConversationId, UserId)>,
}

impl RemoteTyping {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// A `user_typing` event arrived.
    pub fn set_typing(&mut self, conversation: ConversationId, user: UserId) {
        self.typing.insert((conversation, user));
    }

    /// A `user_stop_typing` event arrived.
    pub fn set_stopped(&mut self, conversation: &ConversationId, user: &UserId) {
        self.typing.remove(&(conversation.clone(), user.clone()));
    }

    /// Whether a peer is typing in a conversation.
    pub fn is_typing(&self, conversation: &ConversationId, user: &UserId) -> bool {
        self.typing.contains(&(conversation.clone(), user.clone()))
    }

    /// Drop all state.
    pub fn clear(&mut self) {
        self.typing.clear();
    }
}
