//! Named-event wire protocol for the Chatter sync engine.
//!
//! The messaging service speaks socket.io-style named events with JSON
//! payloads. [`ClientEvent`] covers the outbound direction, [`ServerEvent`]
//! the inbound one. Each outbound event serializes to an
//! `(event name, JSON payload)` pair; inbound events are parsed from the
//! same shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ConversationId, Message, Participant, PresenceStatus, TempId, UserId, WireError};

/// The kind of an event a consumer can subscribe to.
///
/// Covers inbound wire events plus the channel lifecycle events the
/// connection layer synthesizes (`Connect`, `Reconnect`, `Disconnect`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Channel established for the first time in this session.
    Connect,
    /// Channel re-established after a prior drop.
    Reconnect,
    /// Channel lost or closed.
    Disconnect,
    /// New message in a joined conversation.
    ReceiveMessage,
    /// Read-receipt echo.
    MessagesRead,
    /// Summary-level update for a joined conversation.
    ChatUpdated,
    /// Summary-level update regardless of join state.
    ChatUpdatedGlobal,
    /// Peer presence change.
    UserStatusUpdate,
    /// Peer started typing.
    UserTyping,
    /// Peer stopped typing.
    UserStopTyping,
}

/// An outbound event, emitted fire-and-forget over the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Subscribe to a conversation's events.
    JoinChat {
        /// The conversation to join.
        conversation: ConversationId,
    },
    /// Unsubscribe from a conversation's events.
    LeaveChat {
        /// The conversation to leave.
        conversation: ConversationId,
    },
    /// Optimistic text send.
    SendMessage {
        /// Target conversation.
        conversation: ConversationId,
        /// The local sender.
        sender: UserId,
        /// Message body.
        content: String,
        /// Client-generated id for later reconciliation.
        temp_id: TempId,
        /// Client-side send timestamp, RFC 3339.
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// Post-upload media announce.
    SendMediaMessage {
        /// Target conversation.
        conversation: ConversationId,
        /// The local sender.
        sender: UserId,
        /// Stored content reference returned by the upload endpoint.
        media_url: String,
        /// `image` or `video`.
        media_type: crate::MessageKind,
    },
    /// Read receipt request.
    MarkAsRead {
        /// The conversation being read.
        conversation: ConversationId,
        /// The reading user.
        user: UserId,
    },
    /// Typing indicator edge event (idle → active).
    Typing {
        /// The conversation being typed in.
        conversation: ConversationId,
        /// The typing user.
        user: UserId,
    },
    /// Typing indicator edge event (active → idle).
    StopTyping {
        /// The conversation no longer typed in.
        conversation: ConversationId,
        /// The user who stopped.
        user: UserId,
    },
    /// Presence announce after connect/reconnect.
    UserOnline {
        /// The local user.
        user: UserId,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessagePayload<'a> {
    conversation_id: &'a ConversationId,
    sender_id: &'a UserId,
    content: &'a str,
    temp_id: &'a TempId,
    timestamp: &'a chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMediaPayload<'a> {
    conversation_id: &'a ConversationId,
    sender_id: &'a UserId,
    media_url: &'a str,
    media_type: crate::MessageKind,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConversationUserPayload<'a> {
    conversation_id: &'a ConversationId,
    user_id: &'a UserId,
}

impl ClientEvent {
    /// The wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinChat { .. } => "join_chat",
            Self::LeaveChat { .. } => "leave_chat",
            Self::SendMessage { .. } => "send_message",
            Self::SendMediaMessage { .. } => "send_media_message",
            Self::MarkAsRead { .. } => "mark_as_read",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stop_typing",
            Self::UserOnline { .. } => "user_online",
        }
    }

    /// Serialize the JSON payload for this event.
    pub fn payload(&self) -> Result<Value, WireError> {
        let value = match self {
            Self::JoinChat { conversation } | Self::LeaveChat { conversation } => {
                serde_json::to_value(conversation)
            }
            Self::SendMessage {
                conversation,
                sender,
                content,
                temp_id,
                timestamp,
            } => serde_json::to_value(SendMessagePayload {
                conversation_id: conversation,
                sender_id: sender,
                content,
                temp_id,
                timestamp,
            }),
            Self::SendMediaMessage {
                conversation,
                sender,
                media_url,
                media_type,
            } => serde_json::to_value(SendMediaPayload {
                conversation_id: conversation,
                sender_id: sender,
                media_url,
                media_type: *media_type,
            }),
            Self::MarkAsRead { conversation, user }
            | Self::Typing { conversation, user }
            | Self::StopTyping { conversation, user } => {
                serde_json::to_value(ConversationUserPayload {
                    conversation_id: conversation,
                    user_id: user,
                })
            }
            Self::UserOnline { user } => serde_json::to_value(user),
        };
        value.map_err(|source| WireError::Encode {
            event: self.name(),
            source,
        })
    }
}

/// An inbound event delivered by the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// New message in a joined conversation.
    ReceiveMessage(Message),
    /// Read-receipt echo.
    MessagesRead {
        /// The conversation that was read.
        conversation: ConversationId,
        /// Who read it.
        reader: UserId,
    },
    /// Summary-level update for a joined conversation.
    ChatUpdated(ChatUpdate),
    /// Summary-level update regardless of join state.
    ChatUpdatedGlobal(ChatUpdate),
    /// Peer presence change.
    UserStatusUpdate {
        /// The peer whose status changed.
        user: UserId,
        /// The new status.
        status: PresenceStatus,
    },
    /// Peer started typing.
    UserTyping {
        /// The conversation being typed in.
        conversation: ConversationId,
        /// The typing peer.
        user: UserId,
    },
    /// Peer stopped typing.
    UserStopTyping {
        /// The conversation no longer typed in.
        conversation: ConversationId,
        /// The peer who stopped.
        user: UserId,
    },
}

/// Payload of `chat_updated` / `chat_updated_global`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUpdate {
    /// The conversation the update applies to.
    pub conversation_id: ConversationId,
    /// The new latest message, if the update carries one.
    #[serde(default)]
    pub latest_message: Option<Message>,
    /// Participants, present when the conversation is new to the client.
    #[serde(default)]
    pub participants: Option<Vec<Participant>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagesReadPayload {
    conversation_id: ConversationId,
    reader_id: UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusPayload {
    user_id: UserId,
    status: PresenceStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingPayload {
    conversation_id: ConversationId,
    user_id: UserId,
}

impl ServerEvent {
    /// Parse an inbound `(name, payload)` pair.
    pub fn from_wire(name: &str, payload: Value) -> Result<Self, WireError> {
        fn decode<T: serde::de::DeserializeOwned>(
            name: &str,
            payload: Value,
        ) -> Result<T, WireError> {
            serde_json::from_value(payload).map_err(|source| WireError::Decode {
                event: name.to_string(),
                source,
            })
        }

        match name {
            "receive_message" => Ok(Self::ReceiveMessage(decode(name, payload)?)),
            "messages_read" => {
                let p: MessagesReadPayload = decode(name, payload)?;
                Ok(Self::MessagesRead {
                    conversation: p.conversation_id,
                    reader: p.reader_id,
                })
            }
            "chat_updated" => Ok(Self::ChatUpdated(decode(name, payload)?)),
            "chat_updated_global" => Ok(Self::ChatUpdatedGlobal(decode(name, payload)?)),
            "user_status_update" => {
                let p: StatusPayload = decode(name, payload)?;
                Ok(Self::UserStatusUpdate {
                    user: p.user_id,
                    status: p.status,
                })
            }
            "user_typing" => {
                let p: TypingPayload = decode(name, payload)?;
                Ok(Self::UserTyping {
                    conversation: p.conversation_id,
                    user: p.user_id,
                })
            }
            "user_stop_typing" => {
                let p: TypingPayload = decode(name, payload)?;
                Ok(Self::UserStopTyping {
                    conversation: p.conversation_id,
                    user: p.user_id,
                })
            }
            other => Err(WireError::UnknownEvent(other.to_string())),
        }
    }

    /// The subscription kind this event dispatches under.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ReceiveMessage(_) => EventKind::ReceiveMessage,
            Self::MessagesRead { .. } => EventKind::MessagesRead,
            Self::ChatUpdated(_) => EventKind::ChatUpdated,
            Self::ChatUpdatedGlobal(_) => EventKind::ChatUpdatedGlobal,
            Self::UserStatusUpdate { .. } => EventKind::UserStatusUpdate,
            Self::UserTyping { .. } => EventKind::UserTyping,
            Self::UserStopTyping { .. } => EventKind::UserStopTyping,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeliveryStatus, MessageId, MessageKind, MessageRef};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn join_chat_payload_is_bare_id() {
        let event = ClientEvent::JoinChat {
            conversation: ConversationId::new("c1"),
        };
        assert_eq!(event.name(), "join_chat");
        assert_eq!(event.payload().unwrap(), json!("c1"));
    }

    #[test]
    fn send_message_payload_shape() {
        let event = ClientEvent::SendMessage {
            conversation: ConversationId::new("c1"),
            sender: UserId::new("me"),
            content: "hello".into(),
            temp_id: TempId::new(),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        };
        let payload = event.payload().unwrap();
        assert_eq!(payload["conversationId"], json!("c1"));
        assert_eq!(payload["senderId"], json!("me"));
        assert_eq!(payload["content"], json!("hello"));
        assert!(payload["tempId"].is_string());
        assert!(payload["timestamp"].is_string());
    }

    #[test]
    fn mark_as_read_payload_shape() {
        let event = ClientEvent::MarkAsRead {
            conversation: ConversationId::new("c1"),
            user: UserId::new("me"),
        };
        let payload = event.payload().unwrap();
        assert_eq!(payload, json!({"conversationId": "c1", "userId": "me"}));
    }

    #[test]
    fn user_online_payload_is_bare_id() {
        let event = ClientEvent::UserOnline {
            user: UserId::new("me"),
        };
        assert_eq!(event.payload().unwrap(), json!("me"));
    }

    #[test]
    fn receive_message_parses_full_object() {
        let payload = json!({
            "id": "m42",
            "conversation": "c1",
            "sender": "peer",
            "content": "yo",
            "kind": "text",
            "createdAt": "2024-01-11T12:00:00Z",
            "status": "sent",
            "readBy": []
        });
        let event = ServerEvent::from_wire("receive_message", payload).unwrap();
        match event {
            ServerEvent::ReceiveMessage(msg) => {
                assert_eq!(msg.id, MessageRef::Server(MessageId::new("m42")));
                assert_eq!(msg.sender, UserId::new("peer"));
                assert_eq!(msg.kind, MessageKind::Text);
                assert_eq!(msg.status, DeliveryStatus::Sent);
            }
            other => panic!("expected ReceiveMessage, got {:?}", other),
        }
    }

    #[test]
    fn messages_read_parses() {
        let event = ServerEvent::from_wire(
            "messages_read",
            json!({"conversationId": "c1", "readerId": "peer"}),
        )
        .unwrap();
        assert_eq!(
            event,
            ServerEvent::MessagesRead {
                conversation: ConversationId::new("c1"),
                reader: UserId::new("peer"),
            }
        );
        assert_eq!(event.kind(), EventKind::MessagesRead);
    }

    #[test]
    fn chat_updated_parses_without_participants() {
        let event = ServerEvent::from_wire(
            "chat_updated",
            json!({"conversationId": "c1", "latestMessage": null}),
        )
        .unwrap();
        match event {
            ServerEvent::ChatUpdated(update) => {
                assert_eq!(update.conversation_id, ConversationId::new("c1"));
                assert!(update.latest_message.is_none());
                assert!(update.participants.is_none());
            }
            other => panic!("expected ChatUpdated, got {:?}", other),
        }
    }

    #[test]
    fn global_and_joined_updates_have_distinct_kinds() {
        let payload = json!({"conversationId": "c1"});
        let joined = ServerEvent::from_wire("chat_updated", payload.clone()).unwrap();
        let global = ServerEvent::from_wire("chat_updated_global", payload).unwrap();
        assert_eq!(joined.kind(), EventKind::ChatUpdated);
        assert_eq!(global.kind(), EventKind::ChatUpdatedGlobal);
    }

    #[test]
    fn status_update_parses() {
        let event = ServerEvent::from_wire(
            "user_status_update",
            json!({"userId": "peer", "status": "online"}),
        )
        .unwrap();
        assert_eq!(
            event,
            ServerEvent::UserStatusUpdate {
                user: UserId::new("peer"),
                status: PresenceStatus::Online,
            }
        );
    }

    #[test]
    fn typing_events_parse() {
        let payload = json!({"conversationId": "c1", "userId": "peer"});
        let typing = ServerEvent::from_wire("user_typing", payload.clone()).unwrap();
        let stopped = ServerEvent::from_wire("user_stop_typing", payload).unwrap();
        assert_eq!(typing.kind(), EventKind::UserTyping);
        assert_eq!(stopped.kind(), EventKind::UserStopTyping);
    }

    #[test]
    fn unknown_event_is_rejected() {
        let result = ServerEvent::from_wire("mystery_event", json!({}));
        assert!(matches!(result, Err(WireError::UnknownEvent(_))));
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let result = ServerEvent::from_wire("messages_read", json!("not an object"));
        assert!(matches!(result, Err(WireError::Decode { .. })));
    }
}
