//! # relaymsg Server
//!
//! Main binary: loads configuration, wires the broker's external
//! collaborators (store, ACL source, presence webhook, counters), and runs
//! the TCP accept loop that hands each connection to
//! `relaymsg_broker::run_connection`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relaymsg_broker::{BrokerState, ChannelManager, ClientRegistry};
use relaymsg_broker::connection::ShutdownSignals;
use relaymsg_common::snowflake::SnowflakeGenerator;
use relaymsg_store::{
    AclSource, AtomicMonitor, InMemoryAclSource, Monitor, NoopWebhook, OnlineStatusWebhook,
    PostgresStore, ReqwestWebhook, Store,
};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = relaymsg_common::config::init()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relaymsg=debug".into()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    tracing::info!("starting relaymsg broker v{}", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn Store> = Arc::new(
        PostgresStore::connect(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await?,
    );

    // No Postgres-backed subscriber/ACL source exists yet (`relaymsg-store`
    // ships only the in-memory fake) — see DESIGN.md, "ACL source".
    let acl: Arc<dyn AclSource> = Arc::new(InMemoryAclSource::new());

    let webhook: Arc<dyn OnlineStatusWebhook> = if config.webhook.enabled {
        Arc::new(ReqwestWebhook::new(
            config.webhook.url.clone(),
            Duration::from_millis(config.webhook.timeout_ms),
        ))
    } else {
        Arc::new(NoopWebhook)
    };
    let monitor: Arc<dyn Monitor> = Arc::new(AtomicMonitor::new());

    let registry = Arc::new(ClientRegistry::new());
    let channels = Arc::new(ChannelManager::new(
        registry.clone(),
        acl.clone(),
        config.broker.channel_queue_capacity,
    ));

    let state = Arc::new(BrokerState {
        registry,
        channels,
        store,
        webhook,
        monitor,
        acl,
        snowflake: Arc::new(SnowflakeGenerator::new(config.broker.node_id)),
        mode: config.broker.mode,
        webhook_enabled: config.webhook.enabled,
        preemption_grace: Duration::from_secs(config.broker.preemption_grace_secs),
        read_timeout: Duration::from_secs(config.broker.read_timeout_secs),
        shutdowns: Arc::new(ShutdownSignals::new()),
    });

    let listener = TcpListener::bind(&config.server.bind_addr).await?;
    tracing::info!("listening on {}", config.server.bind_addr);

    let next_conn_id = AtomicU64::new(1);
    loop {
        let (socket, peer_addr) = listener.accept().await?;
        socket.set_nodelay(true).ok();
        let conn_id = next_conn_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(conn_id, %peer_addr, "accepted connection");
        let state = state.clone();
        tokio::spawn(async move {
            relaymsg_broker::run_connection(conn_id, socket, state).await;
        });
    }
}
