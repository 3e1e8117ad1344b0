//! Per-conversation message log reconciliation.
//!
//! The log merges three sources with no guaranteed relative order: the
//! authoritative bulk fetch, local optimistic inserts, and inbound pushed
//! events. Two invariants hold at all times:
//!
//! - entries are in non-decreasing created-timestamp order
//! - no two entries share a durable id
//!
//! The server echo of the local user's own send is filtered here
//! ([`InboundOutcome::SelfEcho`]) so an optimistic entry is never
//! duplicated; the caller still applies the echo to the summary store.

use chat_types::{
    ConversationId, DeliveryStatus, Message, MessageKind, MessageRef, TempId, UserId,
};
use chrono::{DateTime, Utc};

/// What [`MessageLog::apply_inbound`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// A new confirmed entry was appended.
    Appended,
    /// The event reported the local user's own send; the log is unchanged.
    SelfEcho,
    /// An entry with the same durable id already exists; dropped.
    Duplicate,
    /// The event belongs to a different conversation; dropped.
    OtherConversation,
}

/// The ordered message log of one open conversation.
///
/// Exclusively owns that conversation's messages while the conversation is
/// open; dropped wholesale on leave.
#[derive(Debug, Clone)]
pub struct MessageLog {
    conversation: ConversationId,
    local_user: UserId,
    entries: Vec<Message>,
}

impl MessageLog {
    /// Create an empty log for one conversation.
    pub fn new(conversation: ConversationId, local_user: UserId) -> Self {
        Self {
            conversation,
            local_user,
            entries: Vec::new(),
        }
    }

    /// The conversation this log belongs to.
    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    /// Replace the log wholesale with an authoritative bulk fetch.
    ///
    /// The fetch is ordered oldest to newest; any optimistic entries not
    /// reflected in it are discarded (the fetch is the source of truth).
    pub fn replace_all(&mut self, fetched: Vec<Message>) {
        self.entries = fetched;
    }

    /// Append a locally composed message in `Sending` state.
    ///
    /// The entry is visible immediately, before any network round trip.
    /// Returns the temporary id for later status transitions.
    pub fn push_optimistic(
        &mut self,
        content: String,
        kind: MessageKind,
        created_at: DateTime<Utc>,
    ) -> TempId {
        let temp_id = TempId::new();
        self.entries.push(Message {
            id: MessageRef::Local(temp_id),
            conversation: self.conversation.clone(),
            sender: self.local_user.clone(),
            content,
            kind,
            created_at,
            status: DeliveryStatus::Sending,
            read_by: vec![],
        });
        temp_id
    }

    /// Merge an inbound pushed event into the log.
    ///
    /// Self-echoes and duplicate durable ids leave the log untouched. Peer
    /// messages are inserted at their timestamp position (normally the
    /// tail) so out-of-order delivery cannot break the ordering invariant.
    pub fn apply_inbound(&mut self, message: Message) -> InboundOutcome {
        if message.conversation != self.conversation {
            return InboundOutcome::OtherConversation;
        }
        if message.sender == self.local_user {
            return InboundOutcome::SelfEcho;
        }
        if let MessageRef::Server(id) = &message.id {
            let duplicate = self
                .entries
                .iter()
                .any(|m| matches!(&m.id, MessageRef::Server(existing) if existing == id));
            if duplicate {
                return InboundOutcome::Duplicate;
            }
        }

        let position = self
            .entries
            .iter()
            .rposition(|m| m.created_at <= message.created_at)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.entries.insert(position, message);
        InboundOutcome::Appended
    }

    /// Mark a `Sending` optimistic entry as handed to the channel.
    pub fn mark_sent(&mut self, temp_id: &TempId) -> bool {
        self.set_status(temp_id, DeliveryStatus::Sent)
    }

    /// Roll a `Sending` optimistic entry back to a retryable failed state.
    pub fn mark_failed(&mut self, temp_id: &TempId) -> bool {
        self.set_status(temp_id, DeliveryStatus::Failed)
    }

    fn set_status(&mut self, temp_id: &TempId, status: DeliveryStatus) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|m| matches!(&m.id, MessageRef::Local(t) if t == temp_id))
        {
            Some(entry) => {
                entry.status = status;
                true
            }
            None => false,
        }
    }

    /// Record `reader` on every loaded message.
    ///
    /// The `messages_read` payload carries no watermark, so the whole
    /// loaded log is marked uniformly.
    pub fn mark_all_read_by(&mut self, reader: &UserId) {
        for entry in &mut self.entries {
            entry.mark_read_by(reader);
        }
    }

    /// The entries, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
