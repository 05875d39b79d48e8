//! Public types for the realtime-client crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite;

use crate::config::ClientConfig;

/// Dashboard role presented to the server in the `authenticate` request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    TenantAdmin,
    SuperAdmin,
}

/// Credentials supplied by the caller at [`connect`](crate::RealtimeClient::connect) time.
///
/// Held in memory only, for automatic reconnects when
/// `retain_credentials` is set. [`disconnect`](crate::RealtimeClient::disconnect) drops
/// them, as does a rejected authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub token: Option<String>,
    pub tenant_id: Option<String>,
    pub role: Role,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Default::default()
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// An `authenticate` request is sent on open when a token is present or
    /// the role is privileged.
    pub fn should_authenticate(&self) -> bool {
        self.token.is_some() || self.role == Role::SuperAdmin
    }
}

/// Mirrors the underlying WebSocket's own state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    Connecting,
    Open,
    Closing,
    #[default]
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated,
    AuthFailed,
}

/// Point-in-time view of the client's session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionSnapshot {
    pub transport_state: TransportState,
    pub auth_state: AuthState,
    pub client_id: Option<String>,
    /// Acknowledged channels, sorted by name.
    pub subscriptions: Vec<String>,
    pub reconnect_attempts: u32,
}

/// Diagnostics returned by [`RealtimeClient::stats`](crate::RealtimeClient::stats).
#[derive(Debug, Clone, Serialize)]
pub struct ClientStats {
    pub connection: ConnectionSnapshot,
    /// When the last `pong` arrived from the server.
    pub last_pong: Option<DateTime<Utc>>,
    /// Event names with at least one registered listener.
    pub event_names: Vec<String>,
    pub config: ClientConfig,
}

/// Errors returned by this crate.
///
/// Client operations never surface these directly; they are logged and the
/// operation reports `false`. Construction and configuration loading return them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("config error: {0}")]
    Config(String),
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_triggers_authentication() {
        let creds = Credentials::new("tok").with_tenant("tenant-1");
        assert!(creds.should_authenticate());
        assert_eq!(creds.tenant_id.as_deref(), Some("tenant-1"));
        assert_eq!(creds.role, Role::TenantAdmin);
    }

    #[test]
    fn super_admin_authenticates_without_token() {
        let creds = Credentials::default().with_role(Role::SuperAdmin);
        assert!(creds.should_authenticate());
    }

    #[test]
    fn anonymous_tenant_admin_skips_authentication() {
        assert!(!Credentials::default().should_authenticate());
    }

    #[test]
    fn role_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Role::SuperAdmin).unwrap(),
            r#""super_admin""#
        );
        let parsed: Role = serde_json::from_str(r#""tenant_admin""#).unwrap();
        assert_eq!(parsed, Role::TenantAdmin);
    }

    #[test]
    fn default_states_are_closed_and_unauthenticated() {
        assert_eq!(TransportState::default(), TransportState::Closed);
        assert_eq!(AuthState::default(), AuthState::Unauthenticated);
    }
}
