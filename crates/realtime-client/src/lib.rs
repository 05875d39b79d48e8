//! Realtime dashboard update client.
//!
//! Maintains one WebSocket session to a dashboard update server: it
//! authenticates, subscribes to named channels, and re-dispatches server
//! pushes to listeners registered by event name.
//!
//! # Features
//! - JSON wire protocol tagged by `type`
//! - Role/tenant authentication handshake
//! - Channel subscriptions restored after reconnect
//! - Exponential backoff reconnection with a bounded attempt budget
//! - Heartbeat pings while the transport is open
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), realtime_client::Error> {
//! use realtime_client::{ClientConfig, Credentials, RealtimeClient, events};
//!
//! let client = RealtimeClient::new(ClientConfig::for_page("https://app.example.com/dashboard")?)?;
//!
//! // Listeners live on the client; capture a weak handle to call back into it.
//! let handle = client.downgrade();
//! client.on(events::names::AUTHENTICATED, move |_| {
//!     if let Some(client) = handle.upgrade() {
//!         client.subscribe("dashboard_kpi", serde_json::json!({}));
//!     }
//! });
//! client.on(events::channel_data("dashboard_kpi"), |event| {
//!     println!("kpi: {:?}", event.data());
//! });
//!
//! client.connect(Credentials::new("bearer-token").with_tenant("tenant-1"));
//! # Ok(())
//! # }
//! ```

mod client;
pub mod config;
mod connection;
pub mod dashboard;
mod emitter;
pub mod events;
pub mod protocol;
mod session;
mod types;

pub use client::{RealtimeClient, WeakRealtimeClient};
pub use config::{ClientConfig, ReconnectPolicy};
pub use dashboard::{DashboardFeed, DashboardKind, DashboardStats};
pub use emitter::{EventEmitter, ListenerId};
pub use events::{Event, UpdateKind};
pub use types::{
    AuthState, ClientStats, ConnectionSnapshot, Credentials, Error, Role, TransportState,
};
