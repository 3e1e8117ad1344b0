//! Conversation summary store - the chat-list aggregate.
//!
//! One row per conversation, updated from the same inbound event stream as
//! the open conversation's message log but owned independently. The store
//! is the reconciliation point for summary-level updates arriving from any
//! source (socket event, push notification, bulk refetch): a timestamp
//! guard keeps `latest_message` monotonically non-decreasing so an
//! out-of-order or duplicate event can never regress the chat list.

use chat_types::{ConversationId, ConversationSummary, Message, MessageKind, Participant, UserId};

/// A partial, summary-level update for one conversation.
///
/// All fields are optional; absent fields leave the stored row untouched.
#[derive(Debug, Clone, Default)]
pub struct SummaryUpdate {
    /// A candidate new latest message.
    pub latest_message: Option<Message>,
    /// Participants, supplied when the conversation may be new to the client.
    pub participants: Option<Vec<Participant>>,
    /// A single reader to fold into the latest message's read-by set.
    pub read_by: Option<UserId>,
}

/// The chat-list-level store: exactly one entry per conversation id.
///
/// New conversations are inserted at the head. Existing conversations keep
/// their position on update - there is no promote-to-top on activity.
#[derive(Debug, Clone, Default)]
pub struct SummaryStore {
    chats: Vec<ConversationSummary>,
}

impl SummaryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole store with a bulk-fetch snapshot.
    ///
    /// Used on cold start, screen refocus, and post-reconnect resync.
    pub fn replace_all(&mut self, chats: Vec<ConversationSummary>) {
        self.chats = chats;
    }

    /// Apply a partial update to one conversation.
    ///
    /// Unknown ids insert a new entry at the head when the update carries
    /// any substantive data (a latest message or participants); a
    /// receipt-only update for an unknown id is dropped. For known ids the
    /// latest message is replaced only when strictly newer than the stored
    /// one, and `read_by` insertion is idempotent.
    ///
    /// Returns `true` when the store changed.
    pub fn upsert(&mut self, conversation: &ConversationId, update: SummaryUpdate) -> bool {
        match self.chats.iter_mut().find(|c| &c.id == conversation) {
            Some(existing) => {
                let mut changed = false;

                if let Some(incoming) = update.latest_message {
                    let newer = match &existing.latest_message {
                        Some(current) => incoming.created_at > current.created_at,
                        None => true,
                    };
                    if newer {
                        existing.latest_message = Some(incoming);
                        changed = true;
                    }
                }

                if let Some(reader) = update.read_by {
                    if let Some(latest) = existing.latest_message.as_mut() {
                        if !latest.read_by.contains(&reader) {
                            latest.read_by.push(reader);
                            changed = true;
                        }
                    }
                }

                changed
            }
            None => {
                if update.latest_message.is_none() && update.participants.is_none() {
                    return false;
                }
                self.chats.insert(
                    0,
                    ConversationSummary {
                        id: conversation.clone(),
                        participants: update.participants.unwrap_or_default(),
                        latest_message: update.latest_message,
                    },
                );
                true
            }
        }
    }

    /// Look up one conversation.
    pub fn get(&self, conversation: &ConversationId) -> Option<&ConversationSummary> {
        self.chats.iter().find(|c| &c.id == conversation)
    }

    /// All conversations, head first.
    pub fn chats(&self) -> &[ConversationSummary] {
        &self.chats
    }

    /// Number of conversations.
    pub fn len(&self) -> usize {
        self.chats.len()
    }

    /// Whether the store holds no conversations.
    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    /// Drop everything. Used on account logout.
    pub fn clear(&mut self) {
        self.chats.clear();
    }
}

/// Normalize a message into its chat-list preview form.
///
/// Media content is replaced by a short placeholder and blank text bodies
/// by a generic one, so the chat list never renders a raw URL or an empty
/// row.
pub fn summary_preview(message: &Message) -> Message {
    let mut preview = message.clone();
    match preview.kind {
        MessageKind::Image => preview.content = "Photo".into(),
        MessageKind::Video => preview.content = "Video".into(),
        MessageKind::Text => {
            if preview.content.trim().is_empty() {
                preview.content = "Sent a message".into();
            }
        }
    }
    preview
}

/// Filter conversations by participant username, case-insensitive substring.
///
/// This is a pure projection for the presentation layer; the store itself
/// is never mutated by searching.
pub fn search_by_participant<'a>(
    chats: &'a [ConversationSummary],
    query: &str,
) -> Vec<&'a ConversationSummary> {
    let needle = query.to_lowercase();
    chats
        .iter()
        .filter(|chat| {
            chat.participants
                .iter()
                .any(|p| p.username.to_lowercase().contains(&needle))
        })
        .collect()
}
