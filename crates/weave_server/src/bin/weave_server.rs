//! Sync server binary.
//!
//! Owns the lifecycle of the process services: event bus, broadcast
//! bridge, store, mutation handler and socket server are constructed
//! here, wired together by handle, and torn down on exit.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use weave_bus::{BroadcastBridge, EventBus, HostId};
use weave_model::LwwCrdt;
use weave_server::{MutationHandler, ServerConfig, ServerResult, ServerStore, SocketServer};

/// Weave sync server.
#[derive(Debug, Parser)]
#[command(name = "weave-server", version, about)]
struct Args {
    /// Socket bind address.
    #[arg(long, default_value = "127.0.0.1:9550")]
    bind: String,

    /// Host id for relay origin tags; random when omitted.
    #[arg(long)]
    host_id: Option<String>,

    /// Maximum rows per pushed batch.
    #[arg(long, default_value_t = 20)]
    batch_limit: usize,

    /// Seconds between heartbeat frames.
    #[arg(long, default_value_t = 30)]
    heartbeat_secs: u64,
}

#[tokio::main]
async fn main() -> ServerResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = ServerConfig::new(args.bind)
        .with_batch_limit(args.batch_limit)
        .with_heartbeat_interval(Duration::from_secs(args.heartbeat_secs));
    if let Some(host_id) = args.host_id {
        config = config.with_host_id(host_id);
    }

    let bus = Arc::new(EventBus::new());
    let bridge = Arc::new(BroadcastBridge::new(
        HostId::new(config.host_id.clone()),
        Arc::clone(&bus),
        BroadcastBridge::channel(256),
    ));
    bridge.init();

    let store = Arc::new(ServerStore::new(Arc::new(LwwCrdt::new())));
    let mutations = Arc::new(MutationHandler::new(
        Arc::clone(&store),
        bridge.clone(),
        config.max_mutation_batch,
    ));

    let server = SocketServer::new(config.clone(), store, mutations, bus);
    info!(host = %config.host_id, addr = %config.bind_addr, "starting weave server");

    let result = server.run().await;

    bridge.dispose();
    result
}
