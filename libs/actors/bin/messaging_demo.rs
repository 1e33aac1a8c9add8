//! Loopback demo: two processes, one migrating entity
//!
//! Usage:
//!   messaging-demo --calls 10 --migrate-after 4
//!   messaging-demo --config config/messaging.toml --environment dev --json-logs
//!
//! Node 2 keeps calling an entity hosted on node 1. Halfway through, the
//! entity moves to node 2; the proxy hits `NotFoundActor`, re-resolves and
//! carries on without the caller noticing.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use messaging_actors::{
    kinds, Dispatcher, LoopbackNetwork, MessagingError, MessagingSystem, NodeIdentity,
    StaticLocationDirectory,
};
use messaging_config::{load_config, MessagingConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use types::{ActorId, EntityId, Envelope, ProcessId};

const OP_VISIT: u16 = 1;

#[derive(Parser, Debug)]
#[command(name = "messaging-demo")]
#[command(about = "Actor messaging loopback demo")]
#[command(version)]
struct Args {
    /// Path to configuration file (defaults to config/messaging.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment overlay to apply on top of the configuration file
    #[arg(short, long)]
    environment: Option<String>,

    /// Log filter, overrides the configured level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,

    /// Number of calls to make
    #[arg(long, default_value_t = 8)]
    calls: u32,

    /// Move the entity to the caller's node after this many calls
    #[arg(long, default_value_t = 3)]
    migrate_after: u32,

    /// Override the relocation backoff (milliseconds)
    #[arg(long)]
    retry_backoff_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => MessagingConfig::load(Some(path.as_path()), args.environment.as_deref())?,
        None => load_config(args.environment.as_deref())?,
    };
    if let Some(backoff) = args.retry_backoff_ms {
        config.retry_backoff_ms = backoff;
    }

    let filter = args.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    init_logging(&filter, args.json_logs)?;
    info!("Effective configuration:\n{}", config.to_toml()?);

    let network = LoopbackNetwork::new();
    let directory = Arc::new(StaticLocationDirectory::new());
    let home = NodeIdentity::new(ProcessId::new(1), "node-1");
    let away = NodeIdentity::new(ProcessId::new(2), "node-2");
    directory.bind_process(home.process, home.address.clone());
    directory.bind_process(away.process, away.address.clone());

    let start_node = |node: NodeIdentity| -> Result<MessagingSystem> {
        let system = MessagingSystem::new(
            node.clone(),
            config.clone(),
            build_dispatcher()?,
            network.transport_for(node.address.clone()),
            directory.clone(),
        );
        network.attach(node.address, &system.router());
        system.start();
        Ok(system)
    };
    let node1 = start_node(home)?;
    let node2 = start_node(away)?;

    let entity = EntityId::from_raw(1001);
    let original = node1.spawn_actor(kinds::GENERIC_DISPATCH)?;
    directory.bind_entity(entity, original.actor_id());
    info!(entity_id = %entity, actor_id = %original.actor_id(), "Entity hosted on node-1");

    let proxy = node2.proxy_for_entity(entity);
    for i in 0..args.calls {
        if i == args.migrate_after {
            let moved = node2.spawn_actor(kinds::GENERIC_DISPATCH)?;
            directory.bind_entity(entity, moved.actor_id());
            node1.unregister_actor(original.actor_id()).await?;
            info!(entity_id = %entity, actor_id = %moved.actor_id(), "Entity migrated to node-2");
        }

        // The proxy stamps the resolved actor id on every attempt
        let request = Envelope::request(ActorId::NONE, OP_VISIT, Bytes::from(format!("visit {}", i)));
        match proxy.call(request).await {
            Ok(response) => info!(
                call = i,
                reply = %String::from_utf8_lossy(response.payload()),
                "Call answered"
            ),
            Err(e) => warn!(call = i, error = %e, "Call failed"),
        }
    }

    let caller_metrics =
        serde_json::to_string_pretty(&node2.metrics()).context("Failed to render metrics")?;
    info!("Caller metrics:\n{}", caller_metrics);

    node2.shutdown().await;
    node1.shutdown().await;
    Ok(())
}

fn build_dispatcher() -> Result<Dispatcher, MessagingError> {
    Ok(Dispatcher::builder()
        .on_opcode(OP_VISIT, |ctx, envelope: Envelope| async move {
            let reply = format!(
                "{} handled '{}'",
                ctx.actor_id(),
                String::from_utf8_lossy(envelope.payload())
            );
            Ok(Some(Bytes::from(reply)))
        })?
        .build())
}

fn init_logging(filter: &str, json_logs: bool) -> Result<()> {
    let filter = EnvFilter::try_new(filter).context("Invalid log filter")?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
