//! Per-connection session bookkeeping and the inbound state machine.
//!
//! [`Session::apply`] is pure with respect to I/O: it updates state and
//! returns the events to emit and replies to send, which the connection task
//! carries out after releasing the client lock.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};

use crate::events::{Event, UpdateKind};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::types::{AuthState, TransportState};

#[derive(Debug, Default)]
pub(crate) struct Session {
    pub transport: TransportState,
    pub auth: AuthState,
    pub client_id: Option<String>,
    /// Channels the server has acknowledged.
    pub active: BTreeSet<String>,
    pub pending_subscribe: HashSet<String>,
    pub pending_unsubscribe: HashSet<String>,
    pub last_pong: Option<DateTime<Utc>>,
}

/// Outcome of applying one inbound message.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Transition {
    pub events: Vec<Event>,
    pub replies: Vec<ClientMessage>,
    /// The session just became authenticated.
    pub authenticated: bool,
    /// The server rejected the credentials this session sent.
    pub auth_failed: bool,
    /// The server refused a subscription; drop it from the desired set.
    pub denied: Option<String>,
}

impl Transition {
    fn emit(events: Vec<Event>) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }
}

impl Session {
    /// Reinitialize for a new connect attempt.
    pub fn begin_connect(&mut self) {
        self.reset();
        self.transport = TransportState::Connecting;
    }

    /// Transport opened. Returns `true` if authentication should start.
    pub fn open(&mut self, authenticate: bool) -> bool {
        self.transport = TransportState::Open;
        if authenticate {
            self.auth = AuthState::Authenticating;
        }
        authenticate
    }

    /// Drop everything tied to the closed transport. `last_pong` is kept for
    /// diagnostics.
    pub fn reset(&mut self) {
        self.transport = TransportState::Closed;
        self.auth = AuthState::Unauthenticated;
        self.client_id = None;
        self.active.clear();
        self.pending_subscribe.clear();
        self.pending_unsubscribe.clear();
    }

    pub fn is_open(&self) -> bool {
        self.transport == TransportState::Open
    }

    pub fn is_live(&self) -> bool {
        matches!(
            self.transport,
            TransportState::Open | TransportState::Connecting
        )
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth == AuthState::Authenticated
    }

    pub fn apply(&mut self, msg: ServerMessage) -> Transition {
        match msg {
            ServerMessage::ConnectionEstablished { client_id } => {
                if !self.is_open() {
                    tracing::warn!(%client_id, "connection acknowledgment on a transport that is not open");
                    return Transition::default();
                }
                tracing::info!(%client_id, "connection established");
                self.client_id = Some(client_id.clone());
                Transition::emit(vec![Event::ConnectionEstablished { client_id }])
            }
            ServerMessage::Authenticated { details } => {
                if self.auth != AuthState::Authenticating {
                    tracing::warn!(auth = ?self.auth, "unexpected authenticated message");
                    return Transition::default();
                }
                tracing::info!("authenticated");
                self.auth = AuthState::Authenticated;
                Transition {
                    events: vec![Event::Authenticated { details }],
                    authenticated: true,
                    ..Default::default()
                }
            }
            ServerMessage::AuthenticationFailed { details } => {
                if self.auth != AuthState::Authenticating {
                    tracing::warn!(auth = ?self.auth, "unexpected authentication_failed message");
                    return Transition::default();
                }
                tracing::error!("authentication failed");
                self.auth = AuthState::AuthFailed;
                Transition {
                    events: vec![Event::AuthenticationFailed { details }],
                    auth_failed: true,
                    ..Default::default()
                }
            }
            ServerMessage::Subscribed { channel } => {
                if !self.pending_subscribe.remove(&channel) {
                    tracing::warn!(%channel, "subscribe ack without an outstanding request");
                    return Transition::default();
                }
                tracing::info!(%channel, "subscribed");
                self.active.insert(channel.clone());
                Transition::emit(vec![Event::Subscribed { channel }])
            }
            ServerMessage::Unsubscribed { channel } => {
                if !self.pending_unsubscribe.remove(&channel) {
                    tracing::warn!(%channel, "unsubscribe ack without an outstanding request");
                    return Transition::default();
                }
                tracing::info!(%channel, "unsubscribed");
                self.active.remove(&channel);
                Transition::emit(vec![Event::Unsubscribed { channel }])
            }
            ServerMessage::SubscriptionDenied { channel, message } => {
                if !self.pending_subscribe.remove(&channel) {
                    tracing::warn!(%channel, "subscription denial without an outstanding request");
                    return Transition::default();
                }
                tracing::warn!(%channel, reason = ?message, "subscription denied");
                Transition {
                    events: vec![Event::SubscriptionDenied {
                        channel: channel.clone(),
                        message,
                    }],
                    denied: Some(channel),
                    ..Default::default()
                }
            }
            ServerMessage::InitialData { channel, data } => {
                if !self.active.contains(&channel) {
                    tracing::warn!(%channel, "initial data for inactive channel dropped");
                    return Transition::default();
                }
                tracing::debug!(%channel, "initial data");
                Transition::emit(vec![
                    Event::ChannelData {
                        channel: channel.clone(),
                        data: data.clone(),
                    },
                    Event::InitialData { channel, data },
                ])
            }
            ServerMessage::DashboardUpdate { channel, data } => {
                self.update(UpdateKind::Dashboard, channel, data)
            }
            ServerMessage::MetricsUpdate { channel, data } => {
                self.update(UpdateKind::Metrics, channel, data)
            }
            ServerMessage::PlatformUpdate { channel, data } => {
                self.update(UpdateKind::Platform, channel, data)
            }
            ServerMessage::Update { channel, data } => {
                self.update(UpdateKind::Requested, channel, data)
            }
            ServerMessage::Ping => {
                tracing::trace!("server ping");
                Transition {
                    replies: vec![ClientMessage::Pong],
                    ..Default::default()
                }
            }
            ServerMessage::Pong => {
                tracing::trace!("pong received");
                self.last_pong = Some(Utc::now());
                Transition::default()
            }
            ServerMessage::Error { message } => {
                tracing::warn!(%message, "server error");
                Transition::emit(vec![Event::Error { message }])
            }
            ServerMessage::Unknown(raw) => {
                tracing::debug!(kind = ?raw.get("type"), "unknown message type");
                Transition::emit(vec![Event::Message(raw)])
            }
        }
    }

    fn update(&self, kind: UpdateKind, channel: String, data: serde_json::Value) -> Transition {
        if !self.active.contains(&channel) {
            tracing::warn!(%channel, kind = kind.event_name(), "update for inactive channel dropped");
            return Transition::default();
        }
        tracing::debug!(%channel, kind = kind.event_name(), "update");
        Transition::emit(vec![
            Event::Update {
                kind,
                channel: channel.clone(),
                data: data.clone(),
            },
            Event::ChannelUpdate { channel, data },
        ])
    }
}
