//! The chat engine: one task that owns all derived state.
//!
//! Every mutation - channel events, app commands, I/O completions - enters
//! through a single queue and is applied on one task, so the state
//! containers from chat-core need no locking and no handler ever mutates
//! state from inside a network completion. Spawned I/O (bulk fetch, media
//! upload, notification dispatch) re-enters the queue with a completion
//! command.
//!
//! Consumers drive the engine through [`EngineHandle`]: fire-and-forget
//! commands, snapshot queries, and a [`StateChange`] broadcast for
//! reacting to updates.

use crate::api::{ApiError, ChatApi, MediaUpload, MediaUploader, Notifier};
use crate::channel::{ChannelNotice, EventChannel};
use crate::connection::{ConnectionManager, Subscription};
use chat_core::{
    merge_read_receipt, summary_preview, InboundOutcome, MessageLog, PresenceTracker,
    RemoteTyping, SummaryStore, SummaryUpdate, TypingAction, TypingEmitter, DEFAULT_DEBOUNCE,
};
use chat_types::{
    ChatUpdate, ClientEvent, ConversationId, ConversationSummary, EventKind, Message, MessageKind,
    PresenceStatus, ServerEvent, TempId, UserId,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Engine errors surfaced to the application.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine task is no longer running.
    #[error("engine task has shut down")]
    Closed,
}

/// Configuration for the chat engine.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// The local user's id; drives self-echo filtering and presence.
    pub local_user: UserId,
    /// Display name used as the notification title on sends.
    pub display_name: String,
    /// Token passed to the channel on connect.
    pub auth_token: Option<String>,
    /// Debounce window for local typing emission.
    pub typing_debounce: Duration,
}

impl ChatConfig {
    /// Create a configuration for one local user.
    pub fn new(local_user: UserId, display_name: &str) -> Self {
        Self {
            local_user,
            display_name: display_name.to_string(),
            auth_token: None,
            typing_debounce: DEFAULT_DEBOUNCE,
        }
    }

    /// Set the channel auth token.
    pub fn with_auth_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_string());
        self
    }

    /// Override the typing debounce window.
    pub fn with_typing_debounce(mut self, window: Duration) -> Self {
        self.typing_debounce = window;
        self
    }
}

/// A media send that has not reached the stored state yet.
///
/// Returned inside [`StateChange::MediaSendFailed`] so the application can
/// re-preview and retry without re-reading the file.
#[derive(Debug, Clone)]
pub struct MediaDraft {
    /// Target conversation.
    pub conversation: ConversationId,
    /// Raw file bytes.
    pub data: Vec<u8>,
    /// Original file name.
    pub file_name: String,
    /// `Image` or `Video`.
    pub kind: MessageKind,
}

/// Change notifications broadcast by the engine.
#[derive(Debug, Clone)]
pub enum StateChange {
    /// The channel came up; a resync was kicked off.
    Connected {
        /// Whether this was a reconnect after a drop.
        resumed: bool,
    },
    /// The channel went down; outbound events are no-ops until reconnect.
    Disconnected,
    /// The conversation list changed.
    ConversationsChanged,
    /// The open conversation's message log changed.
    MessagesChanged(ConversationId),
    /// A peer's presence changed.
    PresenceChanged(UserId),
    /// A peer's typing state changed.
    TypingChanged {
        /// The conversation being typed in.
        conversation: ConversationId,
        /// The peer.
        user: UserId,
        /// Whether they are now typing.
        typing: bool,
    },
    /// A media send failed; the draft is returned for retry.
    MediaSendFailed {
        /// The draft that did not make it.
        draft: MediaDraft,
        /// Human-readable failure reason.
        error: String,
    },
}

enum Command {
    Start,
    OpenConversation(ConversationSummary),
    CloseConversation,
    SendText(String),
    SendMedia {
        data: Vec<u8>,
        file_name: String,
        kind: MessageKind,
    },
    InputChanged(String),
    Channel(ChannelNotice),
    ConversationsFetched(Result<Vec<ConversationSummary>, ApiError>),
    MessagesFetched(ConversationId, Result<Vec<Message>, ApiError>),
    MediaUploaded {
        draft: MediaDraft,
        result: Result<String, ApiError>,
    },
    TypingExpired(u64),
    Query(Query),
    Shutdown,
}

enum Query {
    Conversations(oneshot::Sender<Vec<ConversationSummary>>),
    OpenMessages(oneshot::Sender<Option<Vec<Message>>>),
    Presence(UserId, oneshot::Sender<Option<PresenceStatus>>),
    PeerTyping(ConversationId, UserId, oneshot::Sender<bool>),
}

/// Cheap, clonable handle to a running engine task.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    changes: broadcast::Sender<StateChange>,
}

impl EngineHandle {
    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    /// Connect the channel and kick off the initial sync.
    ///
    /// Also the way to reconnect after a drop: connect is idempotent, so
    /// calling this on a live channel is a no-op.
    pub fn start(&self) -> Result<(), EngineError> {
        self.send(Command::Start)
    }

    /// Enter a conversation: join, mark as read, load history.
    pub fn open_conversation(&self, summary: ConversationSummary) -> Result<(), EngineError> {
        self.send(Command::OpenConversation(summary))
    }

    /// Leave the open conversation: mark as read, leave, deregister.
    pub fn close_conversation(&self) -> Result<(), EngineError> {
        self.send(Command::CloseConversation)
    }

    /// Optimistically send a text message in the open conversation.
    pub fn send_text(&self, content: &str) -> Result<(), EngineError> {
        self.send(Command::SendText(content.to_string()))
    }

    /// Upload media and announce it in the open conversation.
    pub fn send_media(
        &self,
        data: Vec<u8>,
        file_name: &str,
        kind: MessageKind,
    ) -> Result<(), EngineError> {
        self.send(Command::SendMedia {
            data,
            file_name: file_name.to_string(),
            kind,
        })
    }

    /// Report the input field's contents; drives debounced typing events.
    pub fn input_changed(&self, text: &str) -> Result<(), EngineError> {
        self.send(Command::InputChanged(text.to_string()))
    }

    /// Stop the engine task. Closes the open conversation first.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        self.send(Command::Shutdown)
    }

    /// Snapshot of the conversation list, head first.
    pub async fn conversations(&self) -> Result<Vec<ConversationSummary>, EngineError> {
        self.query(Query::Conversations).await
    }

    /// Snapshot of the open conversation's messages, or `None` if closed.
    pub async fn open_messages(&self) -> Result<Option<Vec<Message>>, EngineError> {
        self.query(Query::OpenMessages).await
    }

    /// A peer's last reported presence.
    pub async fn presence_of(&self, user: UserId) -> Result<Option<PresenceStatus>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Query(Query::Presence(user, reply)))?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    /// Whether a peer is typing in a conversation.
    pub async fn peer_typing(
        &self,
        conversation: ConversationId,
        user: UserId,
    ) -> Result<bool, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Query(Query::PeerTyping(conversation, user, reply)))?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands.send(command).map_err(|_| EngineError::Closed)
    }

    async fn query<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Query,
    ) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Query(make(reply)))?;
        rx.await.map_err(|_| EngineError::Closed)
    }
}

/// Factory for the engine task.
pub struct ChatEngine;

impl ChatEngine {
    /// Spawn the engine task and return its handle.
    ///
    /// The engine registers its channel subscriptions immediately; call
    /// [`EngineHandle::start`] to connect and begin syncing.
    pub fn spawn<C: EventChannel>(
        config: ChatConfig,
        manager: Arc<ConnectionManager<C>>,
        api: Arc<dyn ChatApi>,
        uploader: Arc<dyn MediaUploader>,
        notifier: Arc<dyn Notifier>,
    ) -> EngineHandle {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (changes, _) = broadcast::channel(64);

        let mut runtime = Runtime {
            config,
            manager,
            api,
            uploader,
            notifier,
            commands: commands.clone(),
            changes: changes.clone(),
            summaries: SummaryStore::new(),
            presence: PresenceTracker::new(),
            remote_typing: RemoteTyping::new(),
            typing: TypingEmitter::new(),
            open: None,
            permanent_subs: Vec::new(),
        };

        // Summary, receipt, presence, and lifecycle events are app-wide;
        // per-conversation kinds are subscribed on open.
        for kind in [
            EventKind::Connect,
            EventKind::Disconnect,
            EventKind::MessagesRead,
            EventKind::ChatUpdated,
            EventKind::ChatUpdatedGlobal,
            EventKind::UserStatusUpdate,
        ] {
            let sub = runtime.forward_subscription(kind);
            runtime.permanent_subs.push(sub);
        }

        tokio::spawn(run(runtime, inbox));

        EngineHandle { commands, changes }
    }
}

async fn run<C: EventChannel>(
    mut runtime: Runtime<C>,
    mut inbox: mpsc::UnboundedReceiver<Command>,
) {
    while let Some(command) = inbox.recv().await {
        if matches!(command, Command::Shutdown) {
            runtime.shutdown().await;
            break;
        }
        runtime.handle(command).await;
    }
}

struct OpenConversation {
    log: MessageLog,
    peer: Option<UserId>,
    subs: Vec<Subscription>,
}

struct Runtime<C: EventChannel> {
    config: ChatConfig,
    manager: Arc<ConnectionManager<C>>,
    api: Arc<dyn ChatApi>,
    uploader: Arc<dyn MediaUploader>,
    notifier: Arc<dyn Notifier>,
    commands: mpsc::UnboundedSender<Command>,
    changes: broadcast::Sender<StateChange>,
    summaries: SummaryStore,
    presence: PresenceTracker,
    remote_typing: RemoteTyping,
    typing: TypingEmitter,
    open: Option<OpenConversation>,
    permanent_subs: Vec<Subscription>,
}

impl<C: EventChannel> Runtime<C> {
    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start => {
                let auth = self.config.auth_token.clone();
                if let Err(error) = self.manager.connect(auth.as_deref()).await {
                    // Offline cold start: the list is still fetchable.
                    tracing::warn!("connect failed: {error}");
                    self.spawn_conversation_fetch();
                }
            }
            Command::Channel(notice) => self.handle_channel(notice).await,
            Command::OpenConversation(summary) => self.open_conversation(summary).await,
            Command::CloseConversation => self.close_conversation().await,
            Command::SendText(content) => self.send_text(content).await,
            Command::SendMedia {
                data,
                file_name,
                kind,
            } => self.send_media(data, file_name, kind),
            Command::InputChanged(text) => {
                let actions = self.typing.keystroke(&text);
                self.run_typing_actions(actions).await;
            }
            Command::TypingExpired(generation) => {
                let actions = self.typing.timer_fired(generation);
                self.run_typing_actions(actions).await;
            }
            Command::ConversationsFetched(Ok(list)) => {
                self.summaries.replace_all(list);
                self.notify(StateChange::ConversationsChanged);
            }
            Command::ConversationsFetched(Err(error)) => {
                tracing::warn!("conversation list fetch failed: {error}");
            }
            Command::MessagesFetched(conversation, Ok(history)) => {
                let matches = self
                    .open
                    .as_mut()
                    .filter(|open| open.log.conversation() == &conversation)
                    .map(|open| open.log.replace_all(history))
                    .is_some();
                if matches {
                    self.notify(StateChange::MessagesChanged(conversation));
                }
            }
            Command::MessagesFetched(conversation, Err(error)) => {
                tracing::warn!(conversation = %conversation, "history fetch failed: {error}");
            }
            Command::MediaUploaded { draft, result } => self.media_uploaded(draft, result).await,
            Command::Query(query) => self.answer(query),
            Command::Shutdown => {}
        }
    }

    async fn handle_channel(&mut self, notice: ChannelNotice) {
        match notice {
            ChannelNotice::Up { resumed } => {
                // Same recovery on first connect and reconnect: announce
                // presence, re-fetch the list, re-join and re-fetch the
                // open conversation. Incremental catch-up is not a thing
                // across the reconnect boundary.
                self.manager
                    .emit(ClientEvent::UserOnline {
                        user: self.config.local_user.clone(),
                    })
                    .await;
                self.spawn_conversation_fetch();
                if let Some(conversation) =
                    self.open.as_ref().map(|o| o.log.conversation().clone())
                {
                    self.manager
                        .emit(ClientEvent::JoinChat {
                            conversation: conversation.clone(),
                        })
                        .await;
                    self.spawn_message_fetch(conversation);
                }
                self.notify(StateChange::Connected { resumed });
            }
            ChannelNotice::Down { reason } => {
                tracing::warn!("channel down: {reason}");
                self.notify(StateChange::Disconnected);
            }
            ChannelNotice::Event(event) => self.apply_event(event),
        }
    }

    fn apply_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::ReceiveMessage(message) => {
                let conversation = message.conversation.clone();
                // The summary sees every message, own echo included; the
                // open log filters the echo so the optimistic entry is
                // not duplicated.
                let changed = self.summaries.upsert(
                    &conversation,
                    SummaryUpdate {
                        latest_message: Some(summary_preview(&message)),
                        ..Default::default()
                    },
                );
                if changed {
                    self.notify(StateChange::ConversationsChanged);
                }
                let appended = match self.open.as_mut() {
                    Some(open) => {
                        matches!(open.log.apply_inbound(message), InboundOutcome::Appended)
                    }
                    None => false,
                };
                if appended {
                    self.notify(StateChange::MessagesChanged(conversation));
                }
            }
            ServerEvent::MessagesRead {
                conversation,
                reader,
            } => {
                let open_matches = self
                    .open
                    .as_ref()
                    .is_some_and(|open| open.log.conversation() == &conversation);
                let changed = merge_read_receipt(
                    &mut self.summaries,
                    self.open.as_mut().map(|open| &mut open.log),
                    &conversation,
                    &reader,
                );
                if changed {
                    self.notify(StateChange::ConversationsChanged);
                }
                if open_matches {
                    self.notify(StateChange::MessagesChanged(conversation));
                }
            }
            ServerEvent::ChatUpdated(update) | ServerEvent::ChatUpdatedGlobal(update) => {
                self.apply_chat_update(update);
            }
            ServerEvent::UserStatusUpdate { user, status } => {
                self.presence.apply(user.clone(), status);
                self.notify(StateChange::PresenceChanged(user));
            }
            ServerEvent::UserTyping { conversation, user } => {
                self.remote_typing
                    .set_typing(conversation.clone(), user.clone());
                self.notify(StateChange::TypingChanged {
                    conversation,
                    user,
                    typing: true,
                });
            }
            ServerEvent::UserStopTyping { conversation, user } => {
                self.remote_typing.set_stopped(&conversation, &user);
                self.notify(StateChange::TypingChanged {
                    conversation,
                    user,
                    typing: false,
                });
            }
        }
    }

    fn apply_chat_update(&mut self, update: ChatUpdate) {
        let ChatUpdate {
            conversation_id,
            latest_message,
            participants,
        } = update;
        let changed = self.summaries.upsert(
            &conversation_id,
            SummaryUpdate {
                latest_message: latest_message.map(|m| summary_preview(&m)),
                participants,
                read_by: None,
            },
        );
        if changed {
            self.notify(StateChange::ConversationsChanged);
        }
    }

    async fn open_conversation(&mut self, summary: ConversationSummary) {
        if self.open.is_some() {
            // Exactly one enter/leave pair per conversation.
            self.close_conversation().await;
        }

        let conversation = summary.id.clone();
        let peer = summary
            .peer_of(&self.config.local_user)
            .map(|p| p.id.clone());
        let subs = vec![
            self.forward_subscription(EventKind::ReceiveMessage),
            self.forward_subscription(EventKind::UserTyping),
            self.forward_subscription(EventKind::UserStopTyping),
        ];

        self.manager
            .emit(ClientEvent::JoinChat {
                conversation: conversation.clone(),
            })
            .await;
        self.manager
            .emit(ClientEvent::MarkAsRead {
                conversation: conversation.clone(),
                user: self.config.local_user.clone(),
            })
            .await;

        self.open = Some(OpenConversation {
            log: MessageLog::new(conversation.clone(), self.config.local_user.clone()),
            peer,
            subs,
        });
        self.spawn_message_fetch(conversation.clone());
        tracing::debug!(conversation = %conversation, "entered conversation");
        self.notify(StateChange::MessagesChanged(conversation));
    }

    async fn close_conversation(&mut self) {
        if self.open.is_none() {
            return;
        }
        // Flush a pending typing indicator before leaving.
        let actions = self.typing.reset();
        self.run_typing_actions(actions).await;

        let Some(open) = self.open.take() else { return };
        let conversation = open.log.conversation().clone();
        self.manager
            .emit(ClientEvent::MarkAsRead {
                conversation: conversation.clone(),
                user: self.config.local_user.clone(),
            })
            .await;
        self.manager
            .emit(ClientEvent::LeaveChat {
                conversation: conversation.clone(),
            })
            .await;
        for sub in &open.subs {
            self.manager.off(sub);
        }
        tracing::debug!(conversation = %conversation, "left conversation");
    }

    async fn send_text(&mut self, content: String) {
        let trimmed = content.trim().to_string();
        if trimmed.is_empty() {
            return;
        }
        let staged = self.open.as_mut().map(|open| {
            let now = Utc::now();
            let temp_id = open.log.push_optimistic(trimmed.clone(), MessageKind::Text, now);
            (open.log.conversation().clone(), open.peer.clone(), temp_id, now)
        });
        let Some((conversation, peer, temp_id, now)) = staged else {
            tracing::debug!("send_text with no open conversation");
            return;
        };

        // Optimistic entry is visible before the channel round trip.
        self.notify(StateChange::MessagesChanged(conversation.clone()));

        let delivered = self
            .manager
            .emit(ClientEvent::SendMessage {
                conversation: conversation.clone(),
                sender: self.config.local_user.clone(),
                content: trimmed.clone(),
                temp_id,
                timestamp: now,
            })
            .await;
        if delivered {
            self.mark_temp_sent(&temp_id, &conversation);
        }

        // Best-effort push notification; failure never rolls back the send.
        if let Some(peer) = peer {
            let notifier = Arc::clone(&self.notifier);
            let title = self.config.display_name.clone();
            tokio::spawn(async move {
                if let Err(error) = notifier.notify(&peer, &title, &trimmed).await {
                    tracing::debug!("notification dispatch failed: {error}");
                }
            });
        }
    }

    fn send_media(&mut self, data: Vec<u8>, file_name: String, kind: MessageKind) {
        let Some(conversation) = self.open.as_ref().map(|o| o.log.conversation().clone()) else {
            tracing::debug!("send_media with no open conversation");
            return;
        };
        let draft = MediaDraft {
            conversation: conversation.clone(),
            data,
            file_name,
            kind,
        };
        let uploader = Arc::clone(&self.uploader);
        let sender = self.config.local_user.clone();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = uploader
                .upload(MediaUpload {
                    conversation: draft.conversation.clone(),
                    sender,
                    data: draft.data.clone(),
                    file_name: draft.file_name.clone(),
                    kind: draft.kind,
                })
                .await;
            let _ = commands.send(Command::MediaUploaded { draft, result });
        });
    }

    async fn media_uploaded(&mut self, draft: MediaDraft, result: Result<String, ApiError>) {
        let url = match result {
            Ok(url) => url,
            Err(error) => {
                tracing::warn!("media upload failed: {error}");
                self.notify(StateChange::MediaSendFailed {
                    draft,
                    error: error.to_string(),
                });
                return;
            }
        };

        let appended = self.open.as_mut().and_then(|open| {
            if open.log.conversation() != &draft.conversation {
                return None;
            }
            let temp_id = open.log.push_optimistic(url.clone(), draft.kind, Utc::now());
            // The authoritative write already succeeded; the announce is
            // fire-and-forget on top of it.
            open.log.mark_sent(&temp_id);
            Some(open.log.conversation().clone())
        });
        match appended {
            Some(conversation) => {
                self.manager
                    .emit(ClientEvent::SendMediaMessage {
                        conversation: conversation.clone(),
                        sender: self.config.local_user.clone(),
                        media_url: url,
                        media_type: draft.kind,
                    })
                    .await;
                self.notify(StateChange::MessagesChanged(conversation));
            }
            None => {
                tracing::debug!("conversation closed before media upload finished");
            }
        }
    }

    async fn run_typing_actions(&mut self, actions: Vec<TypingAction>) {
        if actions.is_empty() {
            return;
        }
        let Some(conversation) = self.open.as_ref().map(|o| o.log.conversation().clone()) else {
            return;
        };
        for action in actions {
            match action {
                TypingAction::EmitTyping => {
                    self.manager
                        .emit(ClientEvent::Typing {
                            conversation: conversation.clone(),
                            user: self.config.local_user.clone(),
                        })
                        .await;
                }
                TypingAction::EmitStopTyping => {
                    self.manager
                        .emit(ClientEvent::StopTyping {
                            conversation: conversation.clone(),
                            user: self.config.local_user.clone(),
                        })
                        .await;
                }
                TypingAction::StartStopTimer { generation } => {
                    let commands = self.commands.clone();
                    let window = self.config.typing_debounce;
                    tokio::spawn(async move {
                        tokio::time::sleep(window).await;
                        let _ = commands.send(Command::TypingExpired(generation));
                    });
                }
            }
        }
    }

    fn mark_temp_sent(&mut self, temp_id: &TempId, conversation: &ConversationId) {
        let marked = self
            .open
            .as_mut()
            .filter(|open| open.log.conversation() == conversation)
            .map(|open| open.log.mark_sent(temp_id))
            .unwrap_or(false);
        if marked {
            self.notify(StateChange::MessagesChanged(conversation.clone()));
        }
    }

    fn answer(&self, query: Query) {
        match query {
            Query::Conversations(reply) => {
                let _ = reply.send(self.summaries.chats().to_vec());
            }
            Query::OpenMessages(reply) => {
                let _ = reply.send(self.open.as_ref().map(|o| o.log.messages().to_vec()));
            }
            Query::Presence(user, reply) => {
                let _ = reply.send(self.presence.status(&user));
            }
            Query::PeerTyping(conversation, user, reply) => {
                let _ = reply.send(self.remote_typing.is_typing(&conversation, &user));
            }
        }
    }

    fn spawn_conversation_fetch(&self) {
        let api = Arc::clone(&self.api);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = api.fetch_conversations().await;
            let _ = commands.send(Command::ConversationsFetched(result));
        });
    }

    fn spawn_message_fetch(&self, conversation: ConversationId) {
        let api = Arc::clone(&self.api);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = api.fetch_messages(&conversation).await;
            let _ = commands.send(Command::MessagesFetched(conversation, result));
        });
    }

    fn forward_subscription(&self, kind: EventKind) -> Subscription {
        let commands = self.commands.clone();
        self.manager.on(kind, move |notice| {
            let _ = commands.send(Command::Channel(notice.clone()));
        })
    }

    fn notify(&self, change: StateChange) {
        // No receivers is fine; notifications are best effort.
        let _ = self.changes.send(change);
    }

    async fn shutdown(&mut self) {
        self.close_conversation().await;
        for sub in self.permanent_subs.drain(..) {
            self.manager.off(&sub);
        }
        tracing::debug!("engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{MockChatApi, MockNotifier, MockUploader};
    use crate::channel::MockChannel;
    use chat_types::{DeliveryStatus, MessageId, MessageRef, Participant};
    use chrono::TimeZone;
    use serde_json::json;

    struct Fixture {
        handle: EngineHandle,
        channel: MockChannel,
        api: MockChatApi,
        uploader: MockUploader,
        notifier: MockNotifier,
    }

    fn fixture() -> Fixture {
        let channel = MockChannel::new();
        let manager = Arc::new(ConnectionManager::new(channel.clone()));
        let api = MockChatApi::new();
        let uploader = MockUploader::new();
        let notifier = MockNotifier::new();
        let handle = ChatEngine::spawn(
            ChatConfig::new(UserId::new("me"), "Me").with_auth_token("token-1"),
            manager,
            Arc::new(api.clone()),
            Arc::new(uploader.clone()),
            Arc::new(notifier.clone()),
        );
        Fixture {
            handle,
            channel,
            api,
            uploader,
            notifier,
        }
    }

    fn participant(id: &str) -> Participant {
        Participant {
            id: UserId::new(id),
            name: id.to_uppercase(),
            username: id.into(),
            avatar: None,
        }
    }

    fn summary(id: &str) -> ConversationSummary {
        ConversationSummary {
            id: ConversationId::new(id),
            participants: vec![participant("me"), participant("peer")],
            latest_message: None,
        }
    }

    fn peer_message(conversation: &str, id: &str, sender: &str, ts: i64) -> Message {
        Message {
            id: MessageRef::Server(MessageId::new(id)),
            conversation: ConversationId::new(conversation),
            sender: UserId::new(sender),
            content: format!("msg {id}"),
            kind: MessageKind::Text,
            created_at: Utc.timestamp_opt(ts, 0).unwrap(),
            status: DeliveryStatus::Sent,
            read_by: vec![],
        }
    }

    fn receive_event(message: &Message) -> ServerEvent {
        ServerEvent::ReceiveMessage(message.clone())
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    fn count(names: &[&'static str], wanted: &str) -> usize {
        names.iter().filter(|n| **n == wanted).count()
    }

    #[tokio::test]
    async fn start_connects_announces_and_fetches() {
        let f = fixture();
        f.api.set_conversations(vec![summary("c1")]);

        f.handle.start().unwrap();
        settle().await;

        assert_eq!(f.channel.auth_token(), Some("token-1".to_string()));
        assert_eq!(count(&f.channel.sent_names(), "user_online"), 1);
        assert_eq!(f.api.conversation_fetches(), 1);
        let chats = f.handle.conversations().await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].id, ConversationId::new("c1"));
    }

    #[tokio::test]
    async fn open_conversation_joins_marks_read_and_loads_history() {
        let f = fixture();
        f.api.set_messages(
            ConversationId::new("c1"),
            vec![peer_message("c1", "m1", "peer", 100)],
        );
        f.handle.start().unwrap();
        settle().await;

        f.handle.open_conversation(summary("c1")).unwrap();
        settle().await;

        let names = f.channel.sent_names();
        assert_eq!(count(&names, "join_chat"), 1);
        assert_eq!(count(&names, "mark_as_read"), 1);

        let messages = f.handle.open_messages().await.unwrap().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, MessageRef::Server(MessageId::new("m1")));
    }

    #[tokio::test]
    async fn send_text_is_optimistic_then_sent() {
        let f = fixture();
        f.handle.start().unwrap();
        settle().await;
        f.handle.open_conversation(summary("c1")).unwrap();
        settle().await;

        f.handle.send_text("  hello there  ").unwrap();
        settle().await;

        let messages = f.handle.open_messages().await.unwrap().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].id.is_local());
        assert_eq!(messages[0].content, "hello there");
        assert_eq!(messages[0].status, DeliveryStatus::Sent);

        match f.channel.last_sent() {
            Some(ClientEvent::SendMessage { content, .. }) => assert_eq!(content, "hello there"),
            other => panic!("expected send_message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_text_fires_best_effort_notification() {
        let f = fixture();
        f.handle.start().unwrap();
        settle().await;
        f.handle.open_conversation(summary("c1")).unwrap();
        settle().await;

        f.handle.send_text("ping").unwrap();
        settle().await;

        let notifications = f.notifier.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].0, UserId::new("peer"));
        assert_eq!(notifications[0].1, "Me");
        assert_eq!(notifications[0].2, "ping");
    }

    #[tokio::test]
    async fn notification_failure_does_not_roll_back_send() {
        let f = fixture();
        f.notifier.fail_all();
        f.handle.start().unwrap();
        settle().await;
        f.handle.open_conversation(summary("c1")).unwrap();
        settle().await;

        f.handle.send_text("ping").unwrap();
        settle().await;

        let messages = f.handle.open_messages().await.unwrap().unwrap();
        assert_eq!(messages[0].status, DeliveryStatus::Sent);
    }

    #[tokio::test]
    async fn send_text_offline_stays_sending() {
        let f = fixture();
        // No start: there is no channel, emits are no-ops.
        f.handle.open_conversation(summary("c1")).unwrap();
        settle().await;

        f.handle.send_text("hello").unwrap();
        settle().await;

        let messages = f.handle.open_messages().await.unwrap().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, DeliveryStatus::Sending);
        assert!(f.channel.sent_events().is_empty());
    }

    #[tokio::test]
    async fn empty_send_is_ignored() {
        let f = fixture();
        f.handle.start().unwrap();
        settle().await;
        f.handle.open_conversation(summary("c1")).unwrap();
        settle().await;

        f.handle.send_text("   ").unwrap();
        settle().await;

        assert!(f.handle.open_messages().await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn self_echo_does_not_duplicate_but_updates_summary() {
        let f = fixture();
        f.handle.start().unwrap();
        settle().await;
        f.handle.open_conversation(summary("c1")).unwrap();
        settle().await;

        f.handle.send_text("hi").unwrap();
        settle().await;
        let before = f.handle.open_messages().await.unwrap().unwrap().len();

        // Server echoes our own send back into the joined room.
        let echo = peer_message("c1", "m-echo", "me", 200);
        f.channel.push_inbound(receive_event(&echo));
        settle().await;

        let after = f.handle.open_messages().await.unwrap().unwrap();
        assert_eq!(after.len(), before, "self echo must not append");

        // The summary still advances from the echo.
        let chats = f.handle.conversations().await.unwrap();
        let latest = chats[0].latest_message.as_ref().unwrap();
        assert_eq!(latest.content, "msg m-echo");
    }

    #[tokio::test]
    async fn peer_message_appends_to_open_log() {
        let f = fixture();
        f.handle.start().unwrap();
        settle().await;
        f.handle.open_conversation(summary("c1")).unwrap();
        settle().await;

        f.channel
            .push_inbound(receive_event(&peer_message("c1", "m1", "peer", 100)));
        settle().await;

        let messages = f.handle.open_messages().await.unwrap().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, UserId::new("peer"));
    }

    #[tokio::test]
    async fn messages_read_echo_marks_log_and_summary() {
        let f = fixture();
        f.handle.start().unwrap();
        settle().await;
        f.handle.open_conversation(summary("c1")).unwrap();
        settle().await;
        f.handle.send_text("hi").unwrap();
        settle().await;
        // Give the summary a latest message to fold the receipt into.
        f.channel
            .push_inbound(receive_event(&peer_message("c1", "m1", "peer", 100)));
        settle().await;

        let receipt = ServerEvent::from_wire(
            "messages_read",
            json!({"conversationId": "c1", "readerId": "peer"}),
        )
        .unwrap();
        f.channel.push_inbound(receipt.clone());
        f.channel.push_inbound(receipt);
        settle().await;

        let messages = f.handle.open_messages().await.unwrap().unwrap();
        for message in &messages {
            assert_eq!(message.read_by, vec![UserId::new("peer")]);
        }
        let chats = f.handle.conversations().await.unwrap();
        let latest = chats[0].latest_message.as_ref().unwrap();
        assert_eq!(latest.read_by, vec![UserId::new("peer")]);
    }

    #[tokio::test]
    async fn chat_update_inserts_unknown_conversation_at_head() {
        let f = fixture();
        f.api.set_conversations(vec![summary("c1")]);
        f.handle.start().unwrap();
        settle().await;

        let update = ServerEvent::from_wire(
            "chat_updated_global",
            json!({
                "conversationId": "c-new",
                "latestMessage": {
                    "id": "m9",
                    "conversation": "c-new",
                    "sender": "other",
                    "content": "hello!",
                    "kind": "text",
                    "createdAt": "2024-01-11T12:00:00Z",
                    "status": "sent",
                    "readBy": []
                }
            }),
        )
        .unwrap();
        f.channel.push_inbound(update);
        settle().await;

        let chats = f.handle.conversations().await.unwrap();
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].id, ConversationId::new("c-new"));
    }

    #[tokio::test]
    async fn stale_chat_update_cannot_regress_summary() {
        let f = fixture();
        let mut seeded = summary("c1");
        seeded.latest_message = Some(peer_message("c1", "m-cur", "peer", 100));
        f.api.set_conversations(vec![seeded]);
        f.handle.start().unwrap();
        settle().await;

        let push = |ts: i64, id: &str| {
            let message = peer_message("c1", id, "peer", ts);
            ServerEvent::ChatUpdated(ChatUpdate {
                conversation_id: ConversationId::new("c1"),
                latest_message: Some(message),
                participants: None,
            })
        };
        f.channel.push_inbound(push(90, "m-stale"));
        settle().await;
        let chats = f.handle.conversations().await.unwrap();
        assert_eq!(
            chats[0].latest_message.as_ref().unwrap().created_at,
            Utc.timestamp_opt(100, 0).unwrap()
        );

        f.channel.push_inbound(push(150, "m-newer"));
        settle().await;
        let chats = f.handle.conversations().await.unwrap();
        assert_eq!(
            chats[0].latest_message.as_ref().unwrap().created_at,
            Utc.timestamp_opt(150, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn presence_updates_are_tracked() {
        let f = fixture();
        f.handle.start().unwrap();
        settle().await;

        let event = ServerEvent::from_wire(
            "user_status_update",
            json!({"userId": "peer", "status": "online"}),
        )
        .unwrap();
        f.channel.push_inbound(event);
        settle().await;

        assert_eq!(
            f.handle.presence_of(UserId::new("peer")).await.unwrap(),
            Some(chat_types::PresenceStatus::Online)
        );
        assert_eq!(f.handle.presence_of(UserId::new("stranger")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn remote_typing_follows_edge_events() {
        let f = fixture();
        f.handle.start().unwrap();
        settle().await;
        f.handle.open_conversation(summary("c1")).unwrap();
        settle().await;

        let payload = json!({"conversationId": "c1", "userId": "peer"});
        f.channel
            .push_inbound(ServerEvent::from_wire("user_typing", payload.clone()).unwrap());
        settle().await;
        assert!(f
            .handle
            .peer_typing(ConversationId::new("c1"), UserId::new("peer"))
            .await
            .unwrap());

        f.channel
            .push_inbound(ServerEvent::from_wire("user_stop_typing", payload).unwrap());
        settle().await;
        assert!(!f
            .handle
            .peer_typing(ConversationId::new("c1"), UserId::new("peer"))
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn typing_is_debounced_to_one_edge_pair() {
        let f = fixture();
        f.handle.start().unwrap();
        settle().await;
        f.handle.open_conversation(summary("c1")).unwrap();
        settle().await;
        f.channel.clear_sent();

        // Keystrokes far faster than the debounce window.
        for text in ["h", "he", "hel", "hell", "hello"] {
            f.handle.input_changed(text).unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        // Let the window elapse and all armed timers fire.
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        settle().await;

        let names = f.channel.sent_names();
        assert_eq!(count(&names, "typing"), 1, "one edge, not one per keystroke");
        assert_eq!(count(&names, "stop_typing"), 1, "one stop after the window");
    }

    #[tokio::test(start_paused = true)]
    async fn emptying_the_input_stops_typing_immediately() {
        let f = fixture();
        f.handle.start().unwrap();
        settle().await;
        f.handle.open_conversation(summary("c1")).unwrap();
        settle().await;
        f.channel.clear_sent();

        f.handle.input_changed("h").unwrap();
        settle().await;
        f.handle.input_changed("").unwrap();
        settle().await;

        let names = f.channel.sent_names();
        assert_eq!(count(&names, "typing"), 1);
        assert_eq!(count(&names, "stop_typing"), 1);

        // The stale timer firing later must not emit a second stop.
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        settle().await;
        assert_eq!(count(&f.channel.sent_names(), "stop_typing"), 1);
    }

    #[tokio::test]
    async fn close_conversation_emits_then_deregisters() {
        let f = fixture();
        f.handle.start().unwrap();
        settle().await;
        f.handle.open_conversation(summary("c1")).unwrap();
        settle().await;

        f.handle.close_conversation().unwrap();
        settle().await;

        let names = f.channel.sent_names();
        // Enter: join_chat + mark_as_read. Leave: mark_as_read + leave_chat.
        assert_eq!(count(&names, "mark_as_read"), 2);
        assert_eq!(count(&names, "leave_chat"), 1);
        assert_eq!(f.handle.open_messages().await.unwrap(), None);

        // The per-conversation handlers are gone: a pushed message no
        // longer reaches any log.
        f.channel
            .push_inbound(receive_event(&peer_message("c1", "m1", "peer", 100)));
        settle().await;
        assert_eq!(f.handle.open_messages().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reconnect_triggers_full_resync() {
        let f = fixture();
        f.api.set_conversations(vec![summary("c1")]);
        f.handle.start().unwrap();
        settle().await;
        f.handle.open_conversation(summary("c1")).unwrap();
        settle().await;

        assert_eq!(f.api.conversation_fetches(), 1);
        assert_eq!(f.api.message_fetches().len(), 1);

        f.channel.drop_connection("wifi gone");
        settle().await;

        // The app retries; connect classifies this as a reconnect.
        f.handle.start().unwrap();
        settle().await;

        assert_eq!(f.api.conversation_fetches(), 2, "list re-fetched");
        assert_eq!(f.api.message_fetches().len(), 2, "open history re-fetched");
        let names = f.channel.sent_names();
        assert_eq!(count(&names, "user_online"), 2, "presence re-announced");
        assert_eq!(count(&names, "join_chat"), 2, "conversation re-joined");
    }

    #[tokio::test]
    async fn media_upload_success_appends_and_announces() {
        let f = fixture();
        f.uploader.set_stored_url("https://cdn/stored.png");
        f.handle.start().unwrap();
        settle().await;
        f.handle.open_conversation(summary("c1")).unwrap();
        settle().await;

        f.handle
            .send_media(vec![1, 2, 3], "photo.png", MessageKind::Image)
            .unwrap();
        settle().await;

        let messages = f.handle.open_messages().await.unwrap().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, MessageKind::Image);
        assert_eq!(messages[0].content, "https://cdn/stored.png");
        assert_eq!(messages[0].status, DeliveryStatus::Sent);

        assert_eq!(count(&f.channel.sent_names(), "send_media_message"), 1);
        assert_eq!(f.uploader.uploads().len(), 1);
    }

    #[tokio::test]
    async fn media_upload_failure_returns_draft_for_retry() {
        let f = fixture();
        f.uploader.fail_next("disk full");
        f.handle.start().unwrap();
        settle().await;
        f.handle.open_conversation(summary("c1")).unwrap();
        settle().await;
        let mut changes = f.handle.subscribe();

        f.handle
            .send_media(vec![9, 9, 9], "clip.mp4", MessageKind::Video)
            .unwrap();
        settle().await;

        // No optimistic entry for a failed authoritative write.
        assert!(f.handle.open_messages().await.unwrap().unwrap().is_empty());
        assert_eq!(count(&f.channel.sent_names(), "send_media_message"), 0);

        let mut returned_draft = None;
        while let Ok(change) = changes.try_recv() {
            if let StateChange::MediaSendFailed { draft, error } = change {
                assert!(error.contains("disk full"));
                returned_draft = Some(draft);
            }
        }
        let draft = returned_draft.expect("MediaSendFailed not broadcast");
        assert_eq!(draft.data, vec![9, 9, 9]);
        assert_eq!(draft.file_name, "clip.mp4");
        assert_eq!(draft.kind, MessageKind::Video);
    }

    #[tokio::test]
    async fn shutdown_closes_conversation_and_stops() {
        let f = fixture();
        f.handle.start().unwrap();
        settle().await;
        f.handle.open_conversation(summary("c1")).unwrap();
        settle().await;

        f.handle.shutdown().unwrap();
        settle().await;

        assert_eq!(count(&f.channel.sent_names(), "leave_chat"), 1);
        assert!(matches!(
            f.handle.conversations().await,
            Err(EngineError::Closed)
        ));
    }
}
