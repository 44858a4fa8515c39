use std::net::SocketAddr;
use std::sync::Arc;

use rust_decimal_macros::dec;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use mech_arena_server::arena::manager::ArenaManager;
use mech_arena_server::arena::server::ArenaServer;
use mech_arena_server::arena::{Arena, ArenaServices};
use mech_arena_server::config::ServerConfig;
use mech_arena_server::game::types::sups;
use mech_arena_server::metrics::{self, Metrics};
use mech_arena_server::queue::{BattleQueue, BattleQueueScheduler, MemoryQueueStore};
use mech_arena_server::services::payments::LocalPayments;
use mech_arena_server::services::pubsub::BroadcastBus;
use mech_arena_server::voting::AbilityCatalog;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Mech Arena Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    info!(
        "Configuration loaded: {}:{}, arenas={}, faction_mech_limit={}",
        config.bind_address, config.arena_port, config.arena_count, config.queue.faction_mech_limit
    );

    let metrics = Arc::new(Metrics::new());
    let metrics_addr = SocketAddr::new(config.bind_address, config.metrics_port);
    tokio::spawn({
        let metrics = metrics.clone();
        async move {
            if let Err(e) = metrics::serve_metrics(metrics, metrics_addr).await {
                error!("Metrics endpoint stopped: {}", e);
            }
        }
    });

    // Standalone collaborators
    let payments = Arc::new(LocalPayments::new(sups(dec!(10_000))));
    let bus = Arc::new(BroadcastBus::default());
    let store = Arc::new(MemoryQueueStore::new());

    let queue = Arc::new(BattleQueue::new(
        store,
        payments.clone(),
        bus.clone(),
        config.queue.clone(),
        config.collaborator_timeout,
        metrics.clone(),
    ));

    let culled = queue.reconcile().await?;
    if culled > 0 {
        info!("Startup reconciliation culled {} queue entries", culled);
    }

    let services = ArenaServices {
        payments,
        publisher: bus,
        catalog: Arc::new(AbilityCatalog::standard()),
        metrics: metrics.clone(),
        ai_players: Arc::new(config.ai_player_ids.clone()),
    };

    let mut manager = ArenaManager::new(queue.clone());
    for i in 0..config.arena_count {
        let arena = Arena::new(Uuid::new_v4(), queue.clone(), services.clone(), &config);
        let addr = SocketAddr::new(config.bind_address, config.arena_port + i as u16);
        let server = ArenaServer::bind(arena.clone(), addr).await?;
        tokio::spawn(server.run());
        manager.add(arena);
    }
    let manager = Arc::new(manager);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = BattleQueueScheduler::new(queue.clone(), manager.clone(), metrics.clone());
    let mut scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    info!("Server ready with {} arenas", manager.arenas().len());

    tokio::select! {
        result = &mut scheduler_task => {
            if let Err(e) = result {
                error!("Queue scheduler stopped unexpectedly: {}", e);
            }
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
        }
    }

    // Cleanup
    shutdown_tx.send_replace(true);
    manager.shutdown_all();
    if !scheduler_task.is_finished() {
        let _ = scheduler_task.await;
    }
    info!("Server stopped");

    Ok(())
}
