//! Connection management: transport task, heartbeat, and reconnection.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;

use crate::Error;
use crate::client::{Inner, Shared};
use crate::events::Event;
use crate::protocol::{ClientMessage, close_code, decode_msg};
use crate::types::{Credentials, TransportState};

// ---------------------------------------------------------------------------
// Type aliases for WebSocket split halves
// ---------------------------------------------------------------------------

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

type WsRead = futures_util::stream::SplitStream<WsStream>;
type WsWrite = futures_util::stream::SplitSink<WsStream, tungstenite::Message>;

async fn connect_and_split(url: &str) -> Result<(WsWrite, WsRead), Error> {
    let (ws, _resp) = tokio_tungstenite::connect_async(url).await?;
    Ok(ws.split())
}

fn client_close() -> tungstenite::Message {
    tungstenite::Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "Client disconnect".into(),
    }))
}

// ---------------------------------------------------------------------------
// Transport task
// ---------------------------------------------------------------------------

/// Drive one connection from dial to close.
///
/// Exits quietly when `cancel` fires; any other exit path reports the close
/// through `handle_close`, which decides whether to reconnect.
pub(crate) async fn run_connection(
    inner: Arc<Inner>,
    generation: u64,
    cancel: CancellationToken,
    credentials: Option<Credentials>,
) {
    let url = inner.config.url.clone();
    let dial = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        result = tokio::time::timeout(inner.config.connect_timeout, connect_and_split(&url)) => result,
    };
    let (mut ws_write, mut ws_read) = match dial {
        Ok(Ok(halves)) => halves,
        Ok(Err(e)) => {
            tracing::warn!(%url, "WebSocket connect failed: {e}");
            inner.emit_error(generation, e.to_string());
            inner.handle_close(generation, close_code::ABNORMAL, e.to_string());
            return;
        }
        Err(_) => {
            let message = format!("connect timed out after {:?}", inner.config.connect_timeout);
            tracing::warn!(%url, "{message}");
            inner.emit_error(generation, message.clone());
            inner.handle_close(generation, close_code::ABNORMAL, message);
            return;
        }
    };

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    if !inner.on_open(generation, out_tx, credentials) {
        tracing::debug!("connection superseded, closing");
        let _ = ws_write.send(client_close()).await;
        return;
    }

    let period = inner.config.ping_interval;
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let (code, reason) = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::debug!("close requested");
                let _ = ws_write.send(client_close()).await;
                let _ = ws_write.close().await;
                return;
            }

            Some(text) = out_rx.recv() => {
                if let Err(e) = ws_write.send(tungstenite::Message::Text(text.into())).await {
                    tracing::warn!("WebSocket write failed: {e}");
                    inner.emit_error(generation, e.to_string());
                    break (close_code::ABNORMAL, e.to_string());
                }
            }

            frame = ws_read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        inner.handle_frame(generation, text.as_str());
                    }
                    Some(Ok(tungstenite::Message::Binary(data))) => {
                        match std::str::from_utf8(&data) {
                            Ok(text) => inner.handle_frame(generation, text),
                            Err(e) => tracing::warn!("dropping non-UTF-8 binary frame: {e}"),
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        inner.mark_closing(generation);
                        // Flushes the close reply tungstenite queued.
                        let _ = ws_write.close().await;
                        break match frame {
                            Some(f) => (u16::from(f.code), f.reason.as_str().to_owned()),
                            None => (close_code::NO_STATUS, String::new()),
                        };
                    }
                    Some(Ok(_)) => {
                        // Protocol-level ping/pong frames are answered by tungstenite.
                    }
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error: {e}");
                        inner.emit_error(generation, e.to_string());
                        break (close_code::ABNORMAL, e.to_string());
                    }
                    None => {
                        tracing::info!("WebSocket stream ended");
                        break (close_code::ABNORMAL, String::new());
                    }
                }
            }

            _ = heartbeat.tick() => inner.heartbeat_tick(generation),
        }
    };

    inner.handle_close(generation, code, reason);
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

impl Inner {
    /// Start a fresh connection attempt, superseding any previous one.
    pub(crate) fn start_session(
        self: &Arc<Self>,
        shared: &mut Shared,
        credentials: Option<Credentials>,
    ) {
        shared.generation += 1;
        shared.session.begin_connect();
        shared.outbound = None;
        let cancel = CancellationToken::new();
        if let Some(previous) = shared.connection.replace(cancel.clone()) {
            previous.cancel();
        }
        tokio::spawn(run_connection(
            Arc::clone(self),
            shared.generation,
            cancel,
            credentials,
        ));
    }

    /// Transport is up. Returns `false` if this connection was superseded.
    fn on_open(
        &self,
        generation: u64,
        outbound: mpsc::UnboundedSender<String>,
        credentials: Option<Credentials>,
    ) -> bool {
        let auth = {
            let mut shared = self.lock();
            if shared.generation != generation {
                return false;
            }
            let auth = credentials
                .filter(Credentials::should_authenticate)
                .map(|c| ClientMessage::Authenticate {
                    token: c.token,
                    tenant_id: c.tenant_id,
                    role: c.role,
                });
            if !shared.session.open(auth.is_some()) {
                // Nothing to authenticate, so the open itself ends the retry run.
                shared.attempts = 0;
                shared.exhausted_notified = false;
            }
            shared.outbound = Some(outbound);
            auth
        };

        tracing::info!(url = %self.config.url, "WebSocket connected");
        if !self.emit_current(generation, &Event::Connected) {
            return false;
        }
        if let Some(msg) = auth {
            tracing::info!("authenticating");
            self.send(&msg);
        }
        true
    }

    fn handle_frame(&self, generation: u64, text: &str) {
        let msg = match decode_msg(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("dropping malformed message: {e}");
                return;
            }
        };

        let (transition, restore) = {
            let mut shared = self.lock();
            if shared.generation != generation {
                return;
            }
            let transition = shared.session.apply(msg);
            if let Some(channel) = &transition.denied {
                shared.desired.remove(channel);
            }
            if transition.auth_failed {
                // Rejected credentials are not resent; reconnects come back
                // unauthenticated until the caller connects again.
                shared.credentials = None;
            }
            let mut restore = Vec::new();
            if transition.authenticated {
                shared.attempts = 0;
                shared.exhausted_notified = false;
                if self.config.restore_subscriptions {
                    restore = shared
                        .desired
                        .iter()
                        .map(|(channel, params)| (channel.clone(), params.clone()))
                        .collect();
                }
            }
            (transition, restore)
        };

        for reply in &transition.replies {
            self.send(reply);
        }
        for event in &transition.events {
            if !self.emit_current(generation, event) {
                return;
            }
        }
        if !restore.is_empty() {
            tracing::info!(count = restore.len(), "restoring subscriptions");
        }
        for (channel, params) in restore {
            self.subscribe(&channel, params);
        }
    }

    fn heartbeat_tick(&self, generation: u64) {
        let open = {
            let shared = self.lock();
            shared.generation == generation && shared.session.is_open()
        };
        if open {
            tracing::trace!("sending heartbeat ping");
            self.send(&ClientMessage::Ping);
        }
    }

    fn mark_closing(&self, generation: u64) {
        let mut shared = self.lock();
        if shared.generation == generation {
            shared.session.transport = TransportState::Closing;
        }
    }

    /// Emit `event` only while `generation` is still current. Returns `false`
    /// once the connection has been superseded or disconnected.
    ///
    /// The check runs before each event, so a `disconnect()` stops the rest of
    /// a batch. An event already being dispatched when another thread calls
    /// `disconnect()` still reaches its listeners.
    fn emit_current(&self, generation: u64, event: &Event) -> bool {
        if self.lock().generation != generation {
            tracing::debug!(event = %event.name(), "dropping event for a stale connection");
            return false;
        }
        self.emitter.emit(event);
        true
    }

    fn emit_error(&self, generation: u64, message: String) {
        self.emit_current(generation, &Event::Error { message });
    }

    /// The transport for `generation` is gone. Emits `disconnected` and, for
    /// any close other than a normal one, schedules the next attempt.
    fn handle_close(self: &Arc<Self>, generation: u64, code: u16, reason: String) {
        let exhausted = {
            let mut shared = self.lock();
            if shared.generation != generation {
                return;
            }
            shared.session.reset();
            shared.outbound = None;
            if let Some(connection) = shared.connection.take() {
                connection.cancel();
            }
            if code == close_code::NORMAL {
                None
            } else {
                self.schedule_reconnect(&mut shared, generation)
            }
        };

        tracing::info!(code, %reason, "WebSocket disconnected");
        self.emitter.emit(&Event::Disconnected { code, reason });
        if let Some(attempts) = exhausted {
            self.emitter.emit(&Event::MaxReconnectAttempts { attempts });
        }
    }

    /// Arm the backoff timer. Returns the attempt count when the budget is
    /// spent and `max_reconnect_attempts` has not been reported yet.
    fn schedule_reconnect(self: &Arc<Self>, shared: &mut Shared, generation: u64) -> Option<u32> {
        if let Some(timer) = shared.reconnect_timer.take() {
            timer.cancel();
        }

        let policy = self.config.reconnect;
        if policy.is_exhausted(shared.attempts) {
            if shared.exhausted_notified {
                return None;
            }
            shared.exhausted_notified = true;
            tracing::error!(attempts = shared.attempts, "max reconnect attempts reached");
            return Some(shared.attempts);
        }

        let delay = policy.delay_for(shared.attempts);
        tracing::info!(
            delay_ms = delay.as_millis() as u64,
            attempt = shared.attempts + 1,
            max_attempts = policy.max_attempts,
            "scheduling reconnect"
        );

        let timer = CancellationToken::new();
        shared.reconnect_timer = Some(timer.clone());
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(delay) => inner.fire_reconnect(generation),
            }
        });
        None
    }

    fn fire_reconnect(self: &Arc<Self>, generation: u64) {
        let mut shared = self.lock();
        if shared.generation != generation {
            return;
        }
        shared.reconnect_timer = None;
        shared.attempts += 1;
        let credentials = if self.config.retain_credentials {
            shared.credentials.clone()
        } else {
            None
        };
        tracing::info!(attempt = shared.attempts, "reconnecting");
        self.start_session(&mut shared, credentials);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::client::RealtimeClient;
    use crate::config::ClientConfig;
    use crate::events::names;
    use crate::types::AuthState;

    /// A client whose session is open, with its outbound queue exposed.
    fn open_client(
        authenticate: bool,
    ) -> (RealtimeClient, mpsc::UnboundedReceiver<String>, u64) {
        let c = RealtimeClient::new(ClientConfig::default()).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = {
            let mut shared = c.inner.lock();
            shared.generation = 1;
            shared.session.begin_connect();
            shared.session.open(authenticate);
            shared.outbound = Some(tx);
            shared.generation
        };
        (c, rx, generation)
    }

    #[test]
    fn heartbeat_skips_tick_unless_open() {
        let (c, mut rx, generation) = open_client(false);

        c.inner.lock().session.transport = TransportState::Closing;
        c.inner.heartbeat_tick(generation);
        assert!(rx.try_recv().is_err());

        c.inner.lock().session.transport = TransportState::Open;
        c.inner.heartbeat_tick(generation + 1);
        assert!(rx.try_recv().is_err());

        c.inner.heartbeat_tick(generation);
        assert_eq!(rx.try_recv().unwrap(), r#"{"type":"ping"}"#);
    }

    #[test]
    fn rejected_credentials_are_forgotten() {
        let (c, _rx, generation) = open_client(true);
        c.inner.lock().credentials = Some(Credentials::new("expired"));

        c.inner.handle_frame(
            generation,
            r#"{"type":"authentication_failed","reason":"bad token"}"#,
        );

        let shared = c.inner.lock();
        assert_eq!(shared.session.auth, AuthState::AuthFailed);
        assert!(shared.credentials.is_none());
    }

    #[test]
    fn disconnect_from_listener_stops_remaining_events() {
        let (c, _rx, generation) = open_client(true);
        {
            let mut shared = c.inner.lock();
            shared.session.auth = AuthState::Authenticated;
            shared.session.active.insert("dashboard_kpi".to_string());
        }

        let handle = c.downgrade();
        c.on("dashboard_kpi_data", move |_| {
            if let Some(client) = handle.upgrade() {
                client.disconnect();
            }
        });
        let generic = Arc::new(AtomicUsize::new(0));
        let g = generic.clone();
        c.on(names::INITIAL_DATA, move |_| {
            g.fetch_add(1, Ordering::SeqCst);
        });

        c.inner.handle_frame(
            generation,
            r#"{"type":"initial_data","channel":"dashboard_kpi","data":{"total":5}}"#,
        );

        assert_eq!(generic.load(Ordering::SeqCst), 0);
        assert_eq!(c.connection_state().transport_state, TransportState::Closed);
    }
}
