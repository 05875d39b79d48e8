//! Dashboard push protocol: JSON messages tagged by a `type` field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Error;
use crate::types::Role;

/// Path the push server listens on, relative to the hosting page's origin.
pub const WS_PATH: &str = "/ws";

pub mod close_code {
    /// Explicit client-initiated (or orderly server) shutdown. Never retried.
    pub const NORMAL: u16 = 1000;
    /// Closed without a close frame (network drop, refused connect).
    pub const ABNORMAL: u16 = 1006;
    /// Close frame arrived without a status code.
    pub const NO_STATUS: u16 = 1005;
}

// ---------------------------------------------------------------------------
// Outbound (client -> server)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate {
        token: Option<String>,
        #[serde(rename = "tenantId")]
        tenant_id: Option<String>,
        role: Role,
    },
    Subscribe {
        channel: String,
        params: Value,
    },
    Unsubscribe {
        channel: String,
    },
    RequestUpdate {
        channel: String,
        params: Value,
    },
    Ping,
    Pong,
}

// ---------------------------------------------------------------------------
// Inbound (server -> client)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionEstablished {
        #[serde(rename = "clientId")]
        client_id: String,
    },
    Authenticated {
        #[serde(flatten)]
        details: Map<String, Value>,
    },
    AuthenticationFailed {
        #[serde(flatten)]
        details: Map<String, Value>,
    },
    Subscribed {
        channel: String,
    },
    Unsubscribed {
        channel: String,
    },
    SubscriptionDenied {
        channel: String,
        #[serde(default)]
        message: Option<String>,
    },
    InitialData {
        channel: String,
        #[serde(default)]
        data: Value,
    },
    DashboardUpdate {
        channel: String,
        #[serde(default)]
        data: Value,
    },
    MetricsUpdate {
        channel: String,
        #[serde(default)]
        data: Value,
    },
    PlatformUpdate {
        channel: String,
        #[serde(default)]
        data: Value,
    },
    /// Reply to a `request_update`.
    Update {
        channel: String,
        #[serde(default)]
        data: Value,
    },
    Ping,
    Pong,
    Error {
        #[serde(default)]
        message: String,
    },
    /// A well-formed message whose `type` this client does not know.
    #[serde(skip)]
    Unknown(Value),
}

const KNOWN_TYPES: &[&str] = &[
    "connection_established",
    "authenticated",
    "authentication_failed",
    "subscribed",
    "unsubscribed",
    "subscription_denied",
    "initial_data",
    "dashboard_update",
    "metrics_update",
    "platform_update",
    "update",
    "ping",
    "pong",
    "error",
];

// ---------------------------------------------------------------------------
// Encode / decode helpers
// ---------------------------------------------------------------------------

pub fn encode_msg<T: Serialize + ?Sized>(msg: &T) -> Result<String, Error> {
    Ok(serde_json::to_string(msg)?)
}

pub fn decode_msg(text: &str) -> Result<ServerMessage, Error> {
    let value: Value = serde_json::from_str(text)?;
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return Err(Error::Protocol(
            "message is not an object with a string `type` field".to_string(),
        ));
    };
    if !KNOWN_TYPES.contains(&kind) {
        return Ok(ServerMessage::Unknown(value));
    }
    Ok(serde_json::from_value(value)?)
}

// ---------------------------------------------------------------------------
// Endpoint derivation
// ---------------------------------------------------------------------------

/// Derive the push endpoint for a hosting page: `wss` when the page is served
/// over `https`, `ws` otherwise, same host and port, fixed [`WS_PATH`].
pub fn endpoint_for(page_url: &str) -> Result<url::Url, Error> {
    let page = url::Url::parse(page_url)?;
    let scheme = match page.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(Error::UnsupportedScheme(other.to_string())),
    };
    let host = page
        .host_str()
        .ok_or_else(|| Error::Protocol(format!("page URL has no host: {page_url}")))?;
    let authority = match page.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Ok(url::Url::parse(&format!("{scheme}://{authority}{WS_PATH}"))?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn to_value(msg: &ClientMessage) -> Value {
        serde_json::from_str(&encode_msg(msg).unwrap()).unwrap()
    }

    #[test]
    fn authenticate_uses_wire_field_names() {
        let msg = ClientMessage::Authenticate {
            token: Some("tok".into()),
            tenant_id: Some("t-1".into()),
            role: Role::TenantAdmin,
        };
        assert_eq!(
            to_value(&msg),
            json!({"type": "authenticate", "token": "tok", "tenantId": "t-1", "role": "tenant_admin"})
        );
    }

    #[test]
    fn subscribe_and_request_update_carry_params() {
        let sub = ClientMessage::Subscribe {
            channel: "dashboard_kpi".into(),
            params: json!({"period": "7d"}),
        };
        assert_eq!(
            to_value(&sub),
            json!({"type": "subscribe", "channel": "dashboard_kpi", "params": {"period": "7d"}})
        );
        let req = ClientMessage::RequestUpdate {
            channel: "live_metrics".into(),
            params: json!({}),
        };
        assert_eq!(to_value(&req)["type"], "request_update");
    }

    #[test]
    fn ping_and_pong_are_bare_types() {
        assert_eq!(to_value(&ClientMessage::Ping), json!({"type": "ping"}));
        assert_eq!(to_value(&ClientMessage::Pong), json!({"type": "pong"}));
    }

    #[test]
    fn decode_connection_established_ignores_extra_fields() {
        let msg = decode_msg(
            r#"{"type":"connection_established","clientId":"abc123","timestamp":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ServerMessage::ConnectionEstablished {
                client_id: "abc123".into()
            }
        );
    }

    #[test]
    fn decode_authenticated_keeps_details() {
        let msg = decode_msg(r#"{"type":"authenticated","tenantId":"t-1","role":"tenant_admin"}"#)
            .unwrap();
        match msg {
            ServerMessage::Authenticated { details } => {
                assert_eq!(details.get("tenantId"), Some(&json!("t-1")));
                assert!(!details.contains_key("type"));
            }
            other => panic!("expected Authenticated, got {other:?}"),
        }
    }

    #[test]
    fn decode_initial_data() {
        let msg =
            decode_msg(r#"{"type":"initial_data","channel":"dashboard_kpi","data":{"total":5}}"#)
                .unwrap();
        assert_eq!(
            msg,
            ServerMessage::InitialData {
                channel: "dashboard_kpi".into(),
                data: json!({"total": 5}),
            }
        );
    }

    #[test]
    fn decode_update_without_data_defaults_to_null() {
        let msg = decode_msg(r#"{"type":"metrics_update","channel":"live_metrics"}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::MetricsUpdate {
                channel: "live_metrics".into(),
                data: Value::Null,
            }
        );
    }

    #[test]
    fn decode_error_message() {
        let msg = decode_msg(r#"{"type":"error","message":"Not subscribed to channel"}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Error {
                message: "Not subscribed to channel".into()
            }
        );
    }

    #[test]
    fn decode_unknown_type_preserves_payload() {
        let msg = decode_msg(r#"{"type":"tenant_notice","text":"hi"}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Unknown(json!({"type": "tenant_notice", "text": "hi"}))
        );
    }

    #[test]
    fn decode_rejects_malformed_json() {
        assert!(matches!(decode_msg("not json"), Err(Error::Json(_))));
    }

    #[test]
    fn decode_rejects_missing_type() {
        assert!(matches!(decode_msg(r#"{"channel":"x"}"#), Err(Error::Protocol(_))));
        assert!(matches!(decode_msg("[1,2,3]"), Err(Error::Protocol(_))));
    }

    #[test]
    fn decode_rejects_known_type_with_wrong_shape() {
        assert!(matches!(
            decode_msg(r#"{"type":"subscribed"}"#),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn endpoint_for_https_page_uses_wss() {
        let url = endpoint_for("https://app.example.com/dashboard?tab=1").unwrap();
        assert_eq!(url.as_str(), "wss://app.example.com/ws");
    }

    #[test]
    fn endpoint_for_http_page_keeps_port() {
        let url = endpoint_for("http://localhost:3000/super-admin").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:3000/ws");
    }

    #[test]
    fn endpoint_for_rejects_other_schemes() {
        assert!(matches!(
            endpoint_for("file:///tmp/index.html"),
            Err(Error::UnsupportedScheme(s)) if s == "file"
        ));
    }
}
