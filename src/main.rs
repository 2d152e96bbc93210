//! Escrow Payouts service
//!
//! ```text
//! ┌──────────┐    ┌─────────────┐    ┌──────────┐    ┌───────────┐
//! │ Gateway  │───▶│ Coordinator │───▶│ Executor │───▶│   Rails   │
//! │  (HTTP)  │    │ (hold FSM)  │    │ (1 call) │    │ proc/bank/│
//! └──────────┘    └─────────────┘    └──────────┘    │  manual   │
//!                        ▲                           └───────────┘
//!                 auto-release worker
//! ```
//!
//! Usage: `escrow_payouts [--env dev] [--port 8080]`

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use escrow_payouts::batch_file::{ArtifactStore, BatchFileEncoder};
use escrow_payouts::config::AppConfig;
use escrow_payouts::escrow::{
    AuditSink, AutoReleaseWorker, BatchSettlement, EscrowStore, HoldRegistry, LogPublisher,
    MemoryAuditLog, MemoryStore, Pacer, PgAuditLog, PgEscrowStore, PgTokenVault,
    ReleaseCoordinator, TransferExecutor, WorkerConfig, db,
};
use escrow_payouts::gateway::{self, state::AppState};
use escrow_payouts::logging;
use escrow_payouts::rails::{
    BankingNetworkRail, ManualBatchFileRail, MemoryTokenVault, ProcessorTransferRail,
    RailRegistry, TokenVault,
};

/// Path prefix of batch file download links
const BATCH_FILE_ROUTE: &str = "/api/v1/batch-files";

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

struct Persistence {
    store: Arc<dyn EscrowStore>,
    pg_store: Option<Arc<PgEscrowStore>>,
    audit: Arc<dyn AuditSink>,
    vault: Arc<dyn TokenVault>,
}

async fn open_persistence(config: &AppConfig) -> anyhow::Result<Persistence> {
    let Some(url) = &config.postgres_url else {
        warn!("postgres_url not set, running on the in-memory store");
        return Ok(Persistence {
            store: Arc::new(MemoryStore::new()),
            pg_store: None,
            audit: Arc::new(MemoryAuditLog::new()),
            vault: Arc::new(MemoryTokenVault::new()),
        });
    };

    let pool = db::connect(url).await?;
    db::migrate(&pool).await?;
    info!("PostgreSQL connected, schema up to date");

    let pg_store = Arc::new(PgEscrowStore::new(pool.clone()));
    Ok(Persistence {
        store: pg_store.clone(),
        pg_store: Some(pg_store),
        audit: Arc::new(PgAuditLog::new(pool.clone())),
        vault: Arc::new(PgTokenVault::new(pool)),
    })
}

fn build_registry(config: &AppConfig, vault: Arc<dyn TokenVault>) -> RailRegistry {
    let mut registry = RailRegistry::new();
    if let Some(url) = &config.providers.processor_base_url {
        registry.register(Arc::new(ProcessorTransferRail::new(url.clone())));
    }
    if let Some(url) = &config.providers.banking_base_url {
        registry.register(Arc::new(BankingNetworkRail::new(url.clone(), vault)));
    }
    registry.register(Arc::new(ManualBatchFileRail::new()));

    for (ledger_id, ledger) in &config.ledgers {
        registry.configure_ledger(ledger_id.clone(), ledger.rails.clone());
    }
    for (ledger_id, rail, validation) in registry.validate_all() {
        if !validation.valid {
            warn!(ledger_id, rail, errors = ?validation.errors, "Rail configuration is invalid");
        }
    }
    registry
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _log_guard = logging::init_logging(&config);

    info!(env, "Starting escrow payouts service");

    let persistence = open_persistence(&config).await?;
    let registry = build_registry(&config, persistence.vault.clone());

    let executor = Arc::new(
        TransferExecutor::new(
            persistence.store.clone(),
            Arc::new(registry),
            Arc::new(LogPublisher),
            persistence.audit.clone(),
        )
        .with_rail_timeout(Duration::from_millis(config.executor.rail_timeout_ms)),
    );

    let mut coordinator = ReleaseCoordinator::new(persistence.store.clone(), executor, persistence.audit.clone())
        .with_pacer(Pacer::new(
            Duration::from_millis(config.executor.item_delay_ms),
            config.executor.burst,
        ))
        .with_max_batch_size(config.executor.max_batch_size);

    let mut artifacts = None;
    if let Some(batch) = &config.batch_file {
        let store = Arc::new(ArtifactStore::new(
            chrono::Duration::seconds(batch.link_ttl_secs),
            BATCH_FILE_ROUTE,
        ));
        coordinator = coordinator.with_batch_settlement(BatchSettlement::new(
            BatchFileEncoder::new(batch.originator.clone()),
            store.clone(),
        ));
        artifacts = Some(store);
    } else {
        warn!("batch_file not configured, manual rail payouts cannot be settled");
    }
    let coordinator = Arc::new(coordinator);

    if config.auto_release.enabled {
        let mut ledgers: Vec<String> = config.ledgers.keys().cloned().collect();
        ledgers.sort();
        let mut worker = AutoReleaseWorker::new(
            coordinator.clone(),
            ledgers,
            WorkerConfig {
                scan_interval: Duration::from_secs(config.auto_release.scan_interval_secs),
                limit: config.auto_release.limit,
                execute_immediately: config.auto_release.execute_immediately,
                stale_threshold: Duration::from_secs(config.auto_release.stale_threshold_secs),
            },
        );
        if let Some(artifacts) = artifacts {
            worker = worker.with_artifacts(artifacts);
        }
        tokio::spawn(async move {
            worker.run().await;
        });
    }

    let mut state = AppState::new(
        coordinator,
        Arc::new(HoldRegistry::new(persistence.store.clone())),
    );
    if let Some(pg_store) = persistence.pg_store {
        state = state.with_pg_store(pg_store);
    }

    let port = get_port_override().unwrap_or(config.gateway.port);
    gateway::run_server(&config.gateway.host, port, Arc::new(state)).await
}
