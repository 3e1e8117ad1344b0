//! Connection lifecycle and inbound event fan-out.
//!
//! [`ConnectionManager`] owns one [`EventChannel`] and is injected into
//! whatever needs it - there is no process-global handle. It provides:
//!
//! - idempotent `connect` (an existing live channel is reused)
//! - offline-tolerant `emit` (no channel is a logged no-op, never an error)
//! - handle-based subscriptions with per-kind fan-out
//! - connect vs reconnect classification: the first successful connect
//!   dispatches `Connect`; a connect after a prior drop additionally
//!   dispatches `Reconnect`, which consumers use to trigger a full resync
//!
//! A background pump turns `recv()` results into dispatches and converts
//! the first receive error into a `Disconnect` notice. Handlers must be
//! short and non-blocking; they run on the pump task.

use crate::channel::{ChannelError, ChannelNotice, EventChannel};
use chat_types::{ClientEvent, EventKind};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

type Handler = Arc<dyn Fn(&ChannelNotice) + Send + Sync>;

/// A registered handler, returned by [`ConnectionManager::on`].
///
/// Pass it back to [`ConnectionManager::off`] to deregister. Dropping the
/// handle does not deregister; removal is always explicit.
#[derive(Debug)]
pub struct Subscription {
    kind: EventKind,
    id: u64,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(u64, Handler)>>,
}

struct ManagerInner {
    live: bool,
    had_session: bool,
    pump: Option<JoinHandle<()>>,
}

/// Owns the channel lifecycle and fans inbound events out to subscribers.
pub struct ConnectionManager<C: EventChannel> {
    channel: Arc<C>,
    inner: Arc<Mutex<ManagerInner>>,
    registry: Arc<Mutex<Registry>>,
}

impl<C: EventChannel> ConnectionManager<C> {
    /// Create a manager around a channel. Nothing connects yet.
    pub fn new(channel: C) -> Self {
        Self {
            channel: Arc::new(channel),
            inner: Arc::new(Mutex::new(ManagerInner {
                live: false,
                had_session: false,
                pump: None,
            })),
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    /// Establish the channel if none is live. Idempotent.
    ///
    /// Dispatches `Connect` to subscribers on success and, when a prior
    /// session had dropped, `Reconnect` as well.
    pub async fn connect(&self, auth_token: Option<&str>) -> Result<(), ChannelError> {
        if self.inner.lock().unwrap().live {
            return Ok(());
        }

        self.channel.connect(auth_token).await?;

        let resumed = {
            let mut inner = self.inner.lock().unwrap();
            let resumed = inner.had_session;
            inner.live = true;
            inner.had_session = true;
            if let Some(stale) = inner.pump.take() {
                stale.abort();
            }
            inner.pump = Some(self.spawn_pump());
            resumed
        };

        tracing::info!(resumed, "channel up");
        dispatch(&self.registry, EventKind::Connect, &ChannelNotice::Up { resumed });
        if resumed {
            dispatch(
                &self.registry,
                EventKind::Reconnect,
                &ChannelNotice::Up { resumed: true },
            );
        }
        Ok(())
    }

    /// Tear the channel down and clear the handle.
    ///
    /// "No channel" is a steady state afterwards; `emit` becomes a no-op
    /// for every consumer.
    pub async fn disconnect(&self) {
        let pump = {
            let mut inner = self.inner.lock().unwrap();
            inner.live = false;
            inner.pump.take()
        };
        if let Some(pump) = pump {
            pump.abort();
        }
        if let Err(error) = self.channel.close().await {
            tracing::debug!("channel close failed: {error}");
        }
        tracing::info!("channel down (requested)");
        dispatch(
            &self.registry,
            EventKind::Disconnect,
            &ChannelNotice::Down {
                reason: "disconnect requested".into(),
            },
        );
    }

    /// Whether a live channel exists right now.
    pub fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().live
    }

    /// Send an outbound event, fire-and-forget.
    ///
    /// Returns `true` when the event was handed to a live channel. With no
    /// channel, or when the send fails, the event is dropped with a log
    /// line - callers stay responsive offline and must treat `false` as
    /// "not delivered", never as an error.
    pub async fn emit(&self, event: ClientEvent) -> bool {
        if !self.inner.lock().unwrap().live {
            tracing::warn!(event = event.name(), "no channel, dropping outbound event");
            return false;
        }
        match self.channel.send(&event).await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(event = event.name(), "send failed: {error}");
                false
            }
        }
    }

    /// Register a handler for one event kind.
    ///
    /// Multiple independent handlers per kind are supported; each receives
    /// every matching notice until its subscription is passed to [`off`].
    ///
    /// [`off`]: ConnectionManager::off
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ChannelNotice) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().unwrap();
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription { kind, id }
    }

    /// Remove exactly the handler behind `subscription`.
    ///
    /// Other handlers for the same kind are unaffected. Removing an
    /// already-removed subscription is a no-op.
    pub fn off(&self, subscription: &Subscription) {
        let mut registry = self.registry.lock().unwrap();
        if let Some(handlers) = registry.handlers.get_mut(&subscription.kind) {
            handlers.retain(|(id, _)| *id != subscription.id);
        }
    }

    fn spawn_pump(&self) -> JoinHandle<()> {
        let channel = Arc::clone(&self.channel);
        let inner = Arc::clone(&self.inner);
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            loop {
                match channel.recv().await {
                    Ok(event) => {
                        let kind = event.kind();
                        dispatch(&registry, kind, &ChannelNotice::Event(event));
                    }
                    Err(error) => {
                        tracing::warn!("channel dropped: {error}");
                        inner.lock().unwrap().live = false;
                        dispatch(
                            &registry,
                            EventKind::Disconnect,
                            &ChannelNotice::Down {
                                reason: error.to_string(),
                            },
                        );
                        break;
                    }
                }
            }
        })
    }
}

/// Invoke every handler registered for `kind`.
///
/// Handlers are cloned out before the calls so a handler may re-enter
/// `on`/`off` without deadlocking.
fn dispatch(registry: &Mutex<Registry>, kind: EventKind, notice: &ChannelNotice) {
    let handlers: Vec<Handler> = {
        let registry = registry.lock().unwrap();
        match registry.handlers.get(&kind) {
            Some(entries) => entries.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => Vec::new(),
        }
    };
    for handler in handlers {
        handler(notice);
    }
}

impl<C: EventChannel> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        if let Some(pump) = self.inner.lock().unwrap().pump.take() {
            pump.abort();
        }
    }
}
