//! Watch a dashboard's realtime channels and print every update.
//!
//! ```sh
//! cargo run -p realtime-client --example watch -- \
//!     --page-url https://app.example.com/super-admin/dashboard --token <TOKEN>
//! ```
//!
//! Or with explicit channels and a YAML config:
//! ```sh
//! REALTIME_TOKEN=<TOKEN> cargo run -p realtime-client --example watch -- \
//!     --config client.yaml --channel dashboard_kpi --channel live_metrics
//! ```
//!
//! Channel payloads are printed to stdout (pipe to `jq` for formatting).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use realtime_client::{
    ClientConfig, Credentials, DashboardFeed, DashboardKind, Event, RealtimeClient, Role, config,
    events,
};

#[derive(Parser)]
#[command(name = "watch")]
struct Cli {
    /// YAML client config; flags below override it
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// WebSocket endpoint, e.g. ws://localhost:3000/ws
    #[arg(long, conflicts_with = "page_url")]
    url: Option<String>,

    /// Dashboard page URL; the endpoint and channel set are derived from it
    #[arg(long)]
    page_url: Option<String>,

    #[arg(long, env = "REALTIME_TOKEN")]
    token: Option<String>,

    #[arg(long, env = "REALTIME_TENANT_ID")]
    tenant_id: Option<String>,

    /// Authenticate as super admin
    #[arg(long)]
    super_admin: bool,

    /// Channel to subscribe (repeatable); defaults to the dashboard's set
    #[arg(long = "channel")]
    channels: Vec<String>,
}

async fn build_config(cli: &Cli) -> Result<ClientConfig, realtime_client::Error> {
    let mut cfg = match &cli.config {
        Some(path) => config::load(path).await?,
        None => ClientConfig::default(),
    };
    if let Some(page_url) = &cli.page_url {
        cfg.url = ClientConfig::for_page(page_url)?.url;
    }
    if let Some(url) = &cli.url {
        cfg.url.clone_from(url);
    }
    Ok(cfg)
}

fn print_event(event: &Event) {
    match event {
        Event::ChannelData { channel, data } | Event::ChannelUpdate { channel, data } => {
            eprintln!("[{}] channel={channel}", event.name());
            println!("{data}");
        }
        Event::Disconnected { code, reason } => eprintln!("[disconnected] code={code} {reason}"),
        Event::Error { message } => eprintln!("[error] {message}"),
        other => eprintln!("[{}]", other.name()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = match build_config(&cli).await {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let client = match RealtimeClient::new(cfg) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut credentials = Credentials {
        token: cli.token.clone(),
        tenant_id: cli.tenant_id.clone(),
        ..Default::default()
    };
    if cli.super_admin {
        credentials = credentials.with_role(Role::SuperAdmin);
    }

    let kind = cli
        .page_url
        .as_deref()
        .and_then(|u| url::Url::parse(u).ok())
        .map_or(DashboardKind::TenantAdmin, |u| DashboardKind::for_path(u.path()));
    let channels: Vec<String> = if cli.channels.is_empty() {
        kind.channels().iter().map(|c| c.to_string()).collect()
    } else {
        cli.channels.clone()
    };

    for name in [
        events::names::CONNECTED,
        events::names::DISCONNECTED,
        events::names::AUTHENTICATED,
        events::names::AUTHENTICATION_FAILED,
        events::names::SUBSCRIPTION_DENIED,
        events::names::ERROR,
        events::names::MAX_RECONNECT_ATTEMPTS,
    ] {
        client.on(name, print_event);
    }
    for channel in &channels {
        client.on(events::channel_data(channel), print_event);
        client.on(events::channel_update(channel), print_event);
    }

    eprintln!("watching {channels:?} at {} ...", client.config().url);

    let feed = if cli.channels.is_empty() {
        let feed = DashboardFeed::new(client.clone(), kind);
        feed.initialize(credentials);
        Some(feed)
    } else {
        let handle = client.downgrade();
        client.on(events::names::AUTHENTICATED, move |_| {
            let Some(client) = handle.upgrade() else {
                return;
            };
            for channel in &channels {
                client.subscribe(channel, serde_json::json!({}));
            }
        });
        client.connect(credentials);
        None
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("error: {e}");
    }

    match feed {
        Some(feed) => {
            if let Ok(stats) = serde_json::to_string_pretty(&feed.stats()) {
                eprintln!("{stats}");
            }
            feed.disconnect();
        }
        None => client.disconnect(),
    }
    ExitCode::SUCCESS
}
