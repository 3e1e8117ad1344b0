//! Domain model for messages, conversations, and presence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ConversationId, MessageRef, UserId};

/// The kind of content a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text; `content` is the message body.
    Text,
    /// An image; `content` is the stored media URL.
    Image,
    /// A video; `content` is the stored media URL.
    Video,
}

/// Delivery status of a message from the local client's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Optimistically created, not yet handed to the channel.
    Sending,
    /// Handed to the channel (or fetched/received as confirmed).
    Sent,
    /// Confirmed delivered to the peer.
    Delivered,
    /// The authoritative write path rejected the send; retryable.
    Failed,
}

/// Online status of a peer. Last write wins, no timestamp carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// The peer has an active connection.
    Online,
    /// The peer is not connected.
    Offline,
}

/// A single chat message.
///
/// Field names follow the service's JSON wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message identity: durable or client-local temporary.
    pub id: MessageRef,
    /// The conversation this message belongs to.
    pub conversation: ConversationId,
    /// Who sent it.
    pub sender: UserId,
    /// Text body, or the stored media URL for image/video kinds.
    pub content: String,
    /// Content kind.
    pub kind: MessageKind,
    /// Server (or optimistic local) creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Delivery status as known locally.
    pub status: DeliveryStatus,
    /// Users who have read this message.
    #[serde(default)]
    pub read_by: Vec<UserId>,
}

impl Message {
    /// Record `reader` in the read-by set. Idempotent.
    pub fn mark_read_by(&mut self, reader: &UserId) {
        if !self.read_by.contains(reader) {
            self.read_by.push(reader.clone());
        }
    }
}

/// A conversation participant as shown in the chat list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// The participant's user id.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Unique handle; the chat-list search matches against this.
    pub username: String,
    /// Optional avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Chat-list-level aggregate: one row per conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    /// The conversation id.
    pub id: ConversationId,
    /// Participants, at least two, unique.
    pub participants: Vec<Participant>,
    /// The most recent message, if any.
    pub latest_message: Option<Message>,
}

impl ConversationSummary {
    /// The participant that is not `local_user`, for one-to-one chats.
    pub fn peer_of(&self, local_user: &UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id != local_user)
    }

    /// Whether the conversation has activity `local_user` has not read.
    ///
    /// Derived: a latest message exists, someone else sent it, and the
    /// local user is not in its read-by set.
    pub fn is_unread(&self, local_user: &UserId) -> bool {
        match &self.latest_message {
            Some(msg) => &msg.sender != local_user && !msg.read_by.contains(local_user),
            None => false,
        }
    }
}
