//! Request/response collaborators consumed at the engine boundary.
//!
//! Three thin traits cover everything the engine needs besides the event
//! channel: the authoritative data source for bulk fetches ([`ChatApi`]),
//! the media upload endpoint ([`MediaUploader`]), and best-effort push
//! notification dispatch ([`Notifier`]). Each has a mock with queued
//! responses, call capture, and failure injection.

use async_trait::async_trait;
use chat_types::{ConversationId, ConversationSummary, Message, MessageKind, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors from the request/response collaborators.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request could not be completed.
    #[error("request failed: {0}")]
    Request(String),

    /// The response body could not be understood.
    #[error("malformed response: {0}")]
    Decode(String),
}

/// The authoritative data source for cold start and resync.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Fetch the full conversation list for the local user.
    async fn fetch_conversations(&self) -> Result<Vec<ConversationSummary>, ApiError>;

    /// Fetch a conversation's message history, oldest first.
    async fn fetch_messages(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<Message>, ApiError>;
}

/// One media upload bound for a conversation.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    /// Target conversation.
    pub conversation: ConversationId,
    /// The uploading user.
    pub sender: UserId,
    /// Raw file bytes.
    pub data: Vec<u8>,
    /// Original file name, for the upload form.
    pub file_name: String,
    /// `Image` or `Video`.
    pub kind: MessageKind,
}

/// The media upload endpoint. Returns the stored content URL.
#[async_trait]
pub trait MediaUploader: Send + Sync {
    /// Upload media and return its stored content reference.
    async fn upload(&self, upload: MediaUpload) -> Result<String, ApiError>;
}

/// Best-effort push-notification dispatch.
///
/// Failures are the caller's to ignore: a notification must never block or
/// roll back a send.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Ask the service to notify `recipient`.
    async fn notify(&self, recipient: &UserId, title: &str, body: &str) -> Result<(), ApiError>;
}

// ============================================================
// Mocks
// ============================================================

/// Mock [`ChatApi`] with settable responses and call counting.
#[derive(Debug, Default)]
pub struct MockChatApi {
    inner: Arc<Mutex<MockChatApiInner>>,
}

#[derive(Debug, Default)]
struct MockChatApiInner {
    conversations: Vec<ConversationSummary>,
    messages: HashMap<ConversationId, Vec<Message>>,
    conversation_fetches: u32,
    message_fetches: Vec<ConversationId>,
    fail_next_conversations: Option<String>,
    fail_next_messages: Option<String>,
}

impl MockChatApi {
    /// Create an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the conversation list returned by every fetch.
    pub fn set_conversations(&self, conversations: Vec<ConversationSummary>) {
        self.inner.lock().unwrap().conversations = conversations;
    }

    /// Set the history returned for one conversation.
    pub fn set_messages(&self, conversation: ConversationId, messages: Vec<Message>) {
        self.inner.lock().unwrap().messages.insert(conversation, messages);
    }

    /// How many times the conversation list was fetched.
    pub fn conversation_fetches(&self) -> u32 {
        self.inner.lock().unwrap().conversation_fetches
    }

    /// Which conversations had their history fetched, in order.
    pub fn message_fetches(&self) -> Vec<ConversationId> {
        self.inner.lock().unwrap().message_fetches.clone()
    }

    /// Cause the next conversation-list fetch to fail.
    pub fn fail_next_conversations(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_conversations = Some(error.to_string());
    }

    /// Cause the next history fetch to fail.
    pub fn fail_next_messages(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_messages = Some(error.to_string());
    }
}

impl Clone for MockChatApi {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl ChatApi for MockChatApi {
    async fn fetch_conversations(&self) -> Result<Vec<ConversationSummary>, ApiError> {
        let mut inner = self.inner.lock().unwrap();
        inner.conversation_fetches += 1;
        if let Some(error) = inner.fail_next_conversations.take() {
            return Err(ApiError::Request(error));
        }
        Ok(inner.conversations.clone())
    }

    async fn fetch_messages(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<Message>, ApiError> {
        let mut inner = self.inner.lock().unwrap();
        inner.message_fetches.push(conversation.clone());
        if let Some(error) = inner.fail_next_messages.take() {
            return Err(ApiError::Request(error));
        }
        Ok(inner.messages.get(conversation).cloned().unwrap_or_default())
    }
}

/// Mock [`MediaUploader`] with a settable stored-URL response.
#[derive(Debug, Default)]
pub struct MockUploader {
    inner: Arc<Mutex<MockUploaderInner>>,
}

#[derive(Debug, Default)]
struct MockUploaderInner {
    stored_url: Option<String>,
    uploads: Vec<MediaUpload>,
    fail_next: Option<String>,
}

impl MockUploader {
    /// Create a mock that stores nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the stored URL returned by subsequent uploads.
    pub fn set_stored_url(&self, url: &str) {
        self.inner.lock().unwrap().stored_url = Some(url.to_string());
    }

    /// All uploads received, in order.
    pub fn uploads(&self) -> Vec<MediaUpload> {
        self.inner.lock().unwrap().uploads.clone()
    }

    /// Cause the next upload to fail.
    pub fn fail_next(&self, error: &str) {
        self.inner.lock().unwrap().fail_next = Some(error.to_string());
    }
}

impl Clone for MockUploader {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl MediaUploader for MockUploader {
    async fn upload(&self, upload: MediaUpload) -> Result<String, ApiError> {
        let mut inner = self.inner.lock().unwrap();
        inner.uploads.push(upload);
        if let Some(error) = inner.fail_next.take() {
            return Err(ApiError::Request(error));
        }
        inner
            .stored_url
            .clone()
            .ok_or_else(|| ApiError::Request("no stored url configured".into()))
    }
}

/// Mock [`Notifier`] recording every dispatch.
#[derive(Debug, Default)]
pub struct MockNotifier {
    inner: Arc<Mutex<MockNotifierInner>>,
}

#[derive(Debug, Default)]
struct MockNotifierInner {
    notifications: Vec<(UserId, String, String)>,
    fail_all: bool,
}

impl MockNotifier {
    /// Create an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// All `(recipient, title, body)` triples dispatched so far.
    pub fn notifications(&self) -> Vec<(UserId, String, String)> {
        self.inner.lock().unwrap().notifications.clone()
    }

    /// Make every dispatch fail. Dispatches are still recorded.
    pub fn fail_all(&self) {
        self.inner.lock().unwrap().fail_all = true;
    }
}

impl Clone for MockNotifier {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, recipient: &UserId, title: &str, body: &str) -> Result<(), ApiError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .notifications
            .push((recipient.clone(), title.to_string(), body.to_string()));
        if inner.fail_all {
            return Err(ApiError::Request("notification service down".into()));
        }
        Ok(())
    }
}
