//! Events delivered to listeners registered with
//! [`RealtimeClient::on`](crate::RealtimeClient::on).

use std::borrow::Cow;

use serde::Serialize;
use serde_json::{Map, Value};

/// Fixed event names. Channel-scoped events are named `"<channel>_data"` and
/// `"<channel>_update"`; see [`channel_data`] and [`channel_update`].
pub mod names {
    pub const CONNECTED: &str = "connected";
    pub const DISCONNECTED: &str = "disconnected";
    pub const CONNECTION_ESTABLISHED: &str = "connection_established";
    pub const AUTHENTICATED: &str = "authenticated";
    pub const AUTHENTICATION_FAILED: &str = "authentication_failed";
    pub const SUBSCRIBED: &str = "subscribed";
    pub const UNSUBSCRIBED: &str = "unsubscribed";
    pub const SUBSCRIPTION_DENIED: &str = "subscription_denied";
    pub const INITIAL_DATA: &str = "initial_data";
    pub const DASHBOARD_UPDATE: &str = "dashboard_update";
    pub const METRICS_UPDATE: &str = "metrics_update";
    pub const PLATFORM_UPDATE: &str = "platform_update";
    pub const UPDATE: &str = "update";
    pub const ERROR: &str = "error";
    pub const MAX_RECONNECT_ATTEMPTS: &str = "max_reconnect_attempts";
    pub const MESSAGE: &str = "message";
}

pub fn channel_data(channel: &str) -> String {
    format!("{channel}_data")
}

pub fn channel_update(channel: &str) -> String {
    format!("{channel}_update")
}

/// Scope of a pushed update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Dashboard,
    Metrics,
    Platform,
    /// Reply to an explicit `request_update`.
    Requested,
}

impl UpdateKind {
    pub fn event_name(self) -> &'static str {
        match self {
            UpdateKind::Dashboard => names::DASHBOARD_UPDATE,
            UpdateKind::Metrics => names::METRICS_UPDATE,
            UpdateKind::Platform => names::PLATFORM_UPDATE,
            UpdateKind::Requested => names::UPDATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Transport opened.
    Connected,
    /// Transport closed; `code` is the WebSocket close code (1006 when the
    /// connection dropped without a close frame).
    Disconnected { code: u16, reason: String },
    ConnectionEstablished { client_id: String },
    Authenticated { details: Map<String, Value> },
    AuthenticationFailed { details: Map<String, Value> },
    Subscribed { channel: String },
    Unsubscribed { channel: String },
    SubscriptionDenied { channel: String, message: Option<String> },
    /// Initial payload for one channel, delivered as `"<channel>_data"`.
    ChannelData { channel: String, data: Value },
    /// Same payload, delivered as the generic `initial_data` event.
    InitialData { channel: String, data: Value },
    /// Kind-scoped update, delivered as e.g. `dashboard_update`.
    Update {
        kind: UpdateKind,
        channel: String,
        data: Value,
    },
    /// Channel-scoped update, delivered as `"<channel>_update"`.
    ChannelUpdate { channel: String, data: Value },
    /// Server-reported or transport error. Never closes the connection by itself.
    Error { message: String },
    MaxReconnectAttempts { attempts: u32 },
    /// Message with an unrecognized `type`, passed through untouched.
    Message(Value),
}

impl Event {
    /// The listener key this event is dispatched under.
    pub fn name(&self) -> Cow<'static, str> {
        match self {
            Event::Connected => Cow::Borrowed(names::CONNECTED),
            Event::Disconnected { .. } => Cow::Borrowed(names::DISCONNECTED),
            Event::ConnectionEstablished { .. } => Cow::Borrowed(names::CONNECTION_ESTABLISHED),
            Event::Authenticated { .. } => Cow::Borrowed(names::AUTHENTICATED),
            Event::AuthenticationFailed { .. } => Cow::Borrowed(names::AUTHENTICATION_FAILED),
            Event::Subscribed { .. } => Cow::Borrowed(names::SUBSCRIBED),
            Event::Unsubscribed { .. } => Cow::Borrowed(names::UNSUBSCRIBED),
            Event::SubscriptionDenied { .. } => Cow::Borrowed(names::SUBSCRIPTION_DENIED),
            Event::ChannelData { channel, .. } => Cow::Owned(channel_data(channel)),
            Event::InitialData { .. } => Cow::Borrowed(names::INITIAL_DATA),
            Event::Update { kind, .. } => Cow::Borrowed(kind.event_name()),
            Event::ChannelUpdate { channel, .. } => Cow::Owned(channel_update(channel)),
            Event::Error { .. } => Cow::Borrowed(names::ERROR),
            Event::MaxReconnectAttempts { .. } => Cow::Borrowed(names::MAX_RECONNECT_ATTEMPTS),
            Event::Message(_) => Cow::Borrowed(names::MESSAGE),
        }
    }

    /// Channel payload carried by data and update events.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Event::ChannelData { data, .. }
            | Event::InitialData { data, .. }
            | Event::Update { data, .. }
            | Event::ChannelUpdate { data, .. } => Some(data),
            Event::Message(raw) => Some(raw),
            _ => None,
        }
    }

    pub fn channel(&self) -> Option<&str> {
        match self {
            Event::Subscribed { channel }
            | Event::Unsubscribed { channel }
            | Event::SubscriptionDenied { channel, .. }
            | Event::ChannelData { channel, .. }
            | Event::InitialData { channel, .. }
            | Event::Update { channel, .. }
            | Event::ChannelUpdate { channel, .. } => Some(channel),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn channel_scoped_names() {
        let data = Event::ChannelData {
            channel: "dashboard_kpi".into(),
            data: json!({"total": 5}),
        };
        assert_eq!(data.name(), "dashboard_kpi_data");
        assert_eq!(data.channel(), Some("dashboard_kpi"));
        assert_eq!(data.data(), Some(&json!({"total": 5})));

        let update = Event::ChannelUpdate {
            channel: "live_metrics".into(),
            data: Value::Null,
        };
        assert_eq!(update.name(), "live_metrics_update");
    }

    #[test]
    fn update_kind_names() {
        assert_eq!(UpdateKind::Dashboard.event_name(), "dashboard_update");
        assert_eq!(UpdateKind::Metrics.event_name(), "metrics_update");
        assert_eq!(UpdateKind::Platform.event_name(), "platform_update");
        assert_eq!(UpdateKind::Requested.event_name(), "update");
    }

    #[test]
    fn lifecycle_events_have_no_payload() {
        assert_eq!(Event::Connected.name(), names::CONNECTED);
        assert!(Event::Connected.data().is_none());
        let closed = Event::Disconnected {
            code: 1006,
            reason: String::new(),
        };
        assert_eq!(closed.name(), names::DISCONNECTED);
        assert!(closed.channel().is_none());
    }
}
