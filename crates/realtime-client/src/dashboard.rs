//! Dashboard feed: subscribes a dashboard's channel set whenever the client
//! authenticates and tracks when each kind of update last arrived.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::client::RealtimeClient;
use crate::emitter::ListenerId;
use crate::events::{UpdateKind, names};
use crate::types::{ClientStats, Credentials};

/// Which dashboard is being fed; decides the channel set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DashboardKind {
    TenantAdmin,
    SuperAdmin,
    Analytics,
    Other(String),
}

impl DashboardKind {
    /// Pick the dashboard from a page path.
    pub fn for_path(path: &str) -> Self {
        if path.contains("super-admin") {
            DashboardKind::SuperAdmin
        } else {
            DashboardKind::TenantAdmin
        }
    }

    pub fn channels(&self) -> &'static [&'static str] {
        match self {
            DashboardKind::TenantAdmin => &["dashboard_kpi", "live_metrics", "appointment_status"],
            DashboardKind::SuperAdmin => &["platform_overview", "live_metrics", "dashboard_kpi"],
            DashboardKind::Analytics => &["live_metrics", "dashboard_kpi", "platform_overview"],
            DashboardKind::Other(_) => &["dashboard_kpi", "live_metrics"],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub client: ClientStats,
    pub last_updates: BTreeMap<UpdateKind, DateTime<Utc>>,
    pub kind: DashboardKind,
    pub initialized: bool,
}

type LastUpdates = Arc<Mutex<BTreeMap<UpdateKind, DateTime<Utc>>>>;

pub struct DashboardFeed {
    client: RealtimeClient,
    kind: DashboardKind,
    last_updates: LastUpdates,
    /// Registered listeners; non-empty exactly while initialized.
    listeners: Mutex<Vec<(&'static str, ListenerId)>>,
}

impl DashboardFeed {
    pub fn new(client: RealtimeClient, kind: DashboardKind) -> Self {
        Self {
            client,
            kind,
            last_updates: Arc::default(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn client(&self) -> &RealtimeClient {
        &self.client
    }

    pub fn kind(&self) -> &DashboardKind {
        &self.kind
    }

    /// Register the feed's listeners and connect. A second call is a no-op.
    pub fn initialize(&self, credentials: Credentials) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        if !listeners.is_empty() {
            tracing::warn!(kind = ?self.kind, "dashboard feed already initialized");
            return;
        }

        let weak = self.client.downgrade();
        let channels = self.kind.channels();
        let id = self.client.on(names::AUTHENTICATED, move |_| {
            let Some(client) = weak.upgrade() else {
                return;
            };
            for channel in channels {
                client.subscribe(channel, Value::Object(Default::default()));
            }
        });
        listeners.push((names::AUTHENTICATED, id));

        for kind in [UpdateKind::Dashboard, UpdateKind::Metrics, UpdateKind::Platform] {
            let last_updates = Arc::clone(&self.last_updates);
            let id = self.client.on(kind.event_name(), move |_| {
                last_updates
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(kind, Utc::now());
            });
            listeners.push((kind.event_name(), id));
        }
        drop(listeners);

        tracing::info!(kind = ?self.kind, channels = ?channels, "dashboard feed initialized");
        self.client.connect(credentials);
    }

    pub fn is_initialized(&self) -> bool {
        !self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    pub fn request_update(&self, channel: &str) -> bool {
        self.client
            .request_update(channel, Value::Object(Default::default()))
    }

    pub fn stats(&self) -> DashboardStats {
        DashboardStats {
            client: self.client.stats(),
            last_updates: self
                .last_updates
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            kind: self.kind.clone(),
            initialized: self.is_initialized(),
        }
    }

    /// Remove the feed's listeners and close the connection.
    pub fn disconnect(&self) {
        let removed: Vec<_> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for (event, id) in removed {
            self.client.off(event, id);
        }
        self.client.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::events::Event;

    fn feed(kind: DashboardKind) -> DashboardFeed {
        DashboardFeed::new(RealtimeClient::new(ClientConfig::default()).unwrap(), kind)
    }

    #[test]
    fn kind_from_path() {
        assert_eq!(
            DashboardKind::for_path("/super-admin/dashboard"),
            DashboardKind::SuperAdmin
        );
        assert_eq!(
            DashboardKind::for_path("/tenant/dashboard"),
            DashboardKind::TenantAdmin
        );
        assert_eq!(DashboardKind::for_path(""), DashboardKind::TenantAdmin);
    }

    #[test]
    fn channel_sets() {
        assert_eq!(
            DashboardKind::TenantAdmin.channels(),
            ["dashboard_kpi", "live_metrics", "appointment_status"]
        );
        assert_eq!(
            DashboardKind::SuperAdmin.channels(),
            ["platform_overview", "live_metrics", "dashboard_kpi"]
        );
        assert_eq!(
            DashboardKind::Analytics.channels(),
            ["live_metrics", "dashboard_kpi", "platform_overview"]
        );
        assert_eq!(
            DashboardKind::Other("billing".into()).channels(),
            ["dashboard_kpi", "live_metrics"]
        );
    }

    #[test]
    fn initialize_registers_once_and_disconnect_unregisters() {
        // No runtime: connect() is a logged no-op, listeners still register.
        let f = feed(DashboardKind::TenantAdmin);
        assert!(!f.is_initialized());

        f.initialize(Credentials::new("tok"));
        f.initialize(Credentials::new("tok"));
        assert!(f.is_initialized());
        assert_eq!(
            f.client().stats().event_names,
            vec![
                "authenticated".to_string(),
                "dashboard_update".to_string(),
                "metrics_update".to_string(),
                "platform_update".to_string(),
            ]
        );
        assert_eq!(f.client().inner.emitter.listener_count(names::AUTHENTICATED), 1);

        f.disconnect();
        assert!(!f.is_initialized());
        assert!(f.client().stats().event_names.is_empty());
    }

    #[test]
    fn update_events_record_timestamps() {
        let f = feed(DashboardKind::SuperAdmin);
        f.initialize(Credentials::new("tok"));

        f.client().inner.emitter.emit(&Event::Update {
            kind: UpdateKind::Metrics,
            channel: "live_metrics".into(),
            data: Value::Null,
        });

        let stats = f.stats();
        assert!(stats.initialized);
        assert_eq!(stats.kind, DashboardKind::SuperAdmin);
        assert_eq!(
            stats.last_updates.keys().copied().collect::<Vec<_>>(),
            vec![UpdateKind::Metrics]
        );
    }

    #[test]
    fn request_update_without_subscription_fails() {
        let f = feed(DashboardKind::Analytics);
        assert!(!f.request_update("live_metrics"));
    }
}
