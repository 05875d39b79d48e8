//! Public entry point: [`RealtimeClient`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::emitter::{EventEmitter, ListenerId};
use crate::events::Event;
use crate::protocol::{ClientMessage, close_code, encode_msg};
use crate::session::Session;
use crate::types::{ClientStats, ConnectionSnapshot, Credentials, Error};

/// Handle to the realtime update client.
///
/// Cheap to clone; every clone drives the same connection. Construct one per
/// application context and hand it to whatever needs live updates.
///
/// All operations fail soft: misuse and transport problems are logged and
/// reported as `false`, never as a panic or `Err`.
#[derive(Clone)]
pub struct RealtimeClient {
    pub(crate) inner: Arc<Inner>,
}

/// Non-owning handle to a [`RealtimeClient`].
///
/// Listeners are stored on the client, so a listener that calls back into
/// the client should capture one of these rather than a clone.
#[derive(Clone)]
pub struct WeakRealtimeClient {
    inner: Weak<Inner>,
}

impl WeakRealtimeClient {
    /// `None` once every [`RealtimeClient`] clone has been dropped.
    pub fn upgrade(&self) -> Option<RealtimeClient> {
        self.inner.upgrade().map(|inner| RealtimeClient { inner })
    }
}

pub(crate) struct Inner {
    pub config: ClientConfig,
    pub emitter: EventEmitter,
    shared: Mutex<Shared>,
}

/// Mutable client state. The lock is never held across `.await` or while
/// listeners run.
#[derive(Default)]
pub(crate) struct Shared {
    pub session: Session,
    /// Bumped on every connect attempt and on `disconnect()`; tasks tagged
    /// with an older generation are stale and must not touch state.
    pub generation: u64,
    pub outbound: Option<mpsc::UnboundedSender<String>>,
    pub connection: Option<CancellationToken>,
    pub reconnect_timer: Option<CancellationToken>,
    pub attempts: u32,
    pub exhausted_notified: bool,
    pub credentials: Option<Credentials>,
    /// Channels the caller wants, with their subscribe params.
    pub desired: BTreeMap<String, Value>,
}

impl RealtimeClient {
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                emitter: EventEmitter::new(),
                shared: Mutex::new(Shared::default()),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn downgrade(&self) -> WeakRealtimeClient {
        WeakRealtimeClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Open the transport in the background and authenticate with
    /// `credentials` once it is open.
    ///
    /// A no-op (with a warning) while a connection is open or in progress.
    /// Must be called from within a tokio runtime.
    pub fn connect(&self, credentials: Credentials) {
        self.inner.connect(credentials);
    }

    /// Ask the server for `channel`. Requires an authenticated session.
    ///
    /// Returns `true` without sending anything if the channel is already
    /// active or a subscribe for it is outstanding.
    pub fn subscribe(&self, channel: &str, params: Value) -> bool {
        self.inner.subscribe(channel, params)
    }

    pub fn unsubscribe(&self, channel: &str) -> bool {
        self.inner.unsubscribe(channel)
    }

    /// Request fresh data for an active channel.
    pub fn request_update(&self, channel: &str, params: Value) -> bool {
        self.inner.request_update(channel, params)
    }

    /// Serialize and transmit `message` if the transport is open.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> bool {
        self.inner.send(message)
    }

    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.emitter.on(event, handler)
    }

    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.inner.emitter.off(event, id)
    }

    /// Close the connection and stop all timers. Idempotent.
    ///
    /// Once this returns, no heartbeat or reconnect callback fires for the
    /// closed session.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    pub fn connection_state(&self) -> ConnectionSnapshot {
        self.inner.snapshot()
    }

    pub fn stats(&self) -> ClientStats {
        let last_pong = self.inner.lock().session.last_pong;
        ClientStats {
            connection: self.inner.snapshot(),
            last_pong,
            event_names: self.inner.emitter.event_names(),
            config: self.inner.config.clone(),
        }
    }
}

impl Inner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn connect(self: &Arc<Self>, credentials: Credentials) {
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::error!("connect() called outside a tokio runtime");
            return;
        }
        let mut shared = self.lock();
        if shared.session.is_live() {
            tracing::warn!(state = ?shared.session.transport, "WebSocket already connected");
            return;
        }
        if let Some(timer) = shared.reconnect_timer.take() {
            timer.cancel();
        }
        shared.attempts = 0;
        shared.exhausted_notified = false;
        shared.credentials = Some(credentials.clone());
        tracing::info!(url = %self.config.url, "connecting");
        self.start_session(&mut shared, Some(credentials));
    }

    pub(crate) fn subscribe(&self, channel: &str, params: Value) -> bool {
        let generation = {
            let mut shared = self.lock();
            if !shared.session.is_authenticated() {
                tracing::error!(%channel, "cannot subscribe: not authenticated");
                return false;
            }
            if shared.session.active.contains(channel)
                || shared.session.pending_subscribe.contains(channel)
            {
                tracing::debug!(%channel, "already subscribed");
                shared.desired.insert(channel.to_string(), params);
                return true;
            }
            shared.session.pending_subscribe.insert(channel.to_string());
            shared.generation
        };

        tracing::info!(%channel, "subscribing");
        let sent = self.send(&ClientMessage::Subscribe {
            channel: channel.to_string(),
            params: params.clone(),
        });
        let mut shared = self.lock();
        if sent {
            // Only channels the server was actually asked for are restored.
            if shared.generation == generation {
                shared.desired.insert(channel.to_string(), params);
            }
        } else {
            shared.session.pending_subscribe.remove(channel);
        }
        sent
    }

    fn unsubscribe(&self, channel: &str) -> bool {
        {
            let mut shared = self.lock();
            if !shared.session.is_authenticated() {
                tracing::error!(%channel, "cannot unsubscribe: not authenticated");
                return false;
            }
            shared.desired.remove(channel);
            shared
                .session
                .pending_unsubscribe
                .insert(channel.to_string());
        }

        tracing::info!(%channel, "unsubscribing");
        let sent = self.send(&ClientMessage::Unsubscribe {
            channel: channel.to_string(),
        });
        if !sent {
            self.lock().session.pending_unsubscribe.remove(channel);
        }
        sent
    }

    fn request_update(&self, channel: &str, params: Value) -> bool {
        if !self.lock().session.active.contains(channel) {
            tracing::error!(%channel, "cannot request update: not subscribed");
            return false;
        }
        self.send(&ClientMessage::RequestUpdate {
            channel: channel.to_string(),
            params,
        })
    }

    pub(crate) fn send<T: Serialize + ?Sized>(&self, message: &T) -> bool {
        let text = match encode_msg(message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("cannot send message: {e}");
                return false;
            }
        };
        let shared = self.lock();
        let tx = match shared.outbound.as_ref() {
            Some(tx) if shared.session.is_open() => tx,
            _ => {
                tracing::error!("cannot send message: not connected");
                return false;
            }
        };
        if tx.send(text).is_err() {
            tracing::error!("cannot send message: transport task has exited");
            return false;
        }
        true
    }

    fn disconnect(&self) {
        let was_live = {
            let mut shared = self.lock();
            shared.generation += 1;
            if let Some(timer) = shared.reconnect_timer.take() {
                timer.cancel();
            }
            if let Some(connection) = shared.connection.take() {
                connection.cancel();
            }
            let was_live = shared.session.is_live();
            shared.session.reset();
            shared.outbound = None;
            shared.desired.clear();
            shared.credentials = None;
            was_live
        };

        if was_live {
            tracing::info!("disconnected by client");
            self.emitter.emit(&Event::Disconnected {
                code: close_code::NORMAL,
                reason: "Client disconnect".to_string(),
            });
        } else {
            tracing::debug!("disconnect: no live connection");
        }
    }

    fn snapshot(&self) -> ConnectionSnapshot {
        let shared = self.lock();
        ConnectionSnapshot {
            transport_state: shared.session.transport,
            auth_state: shared.session.auth,
            client_id: shared.session.client_id.clone(),
            subscriptions: shared.session.active.iter().cloned().collect(),
            reconnect_attempts: shared.attempts,
        }
    }
}
