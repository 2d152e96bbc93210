//! Auto-Release Worker
//!
//! Background worker that periodically sweeps each configured ledger for
//! holds past their date and releases them. Each cycle first resumes
//! releases left pending longer than the stale threshold.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use super::coordinator::{MAX_SWEEP_LIMIT, ReleaseCoordinator};
use super::types::{AutoReleaseReport, BatchReleaseResult};
use crate::batch_file::ArtifactStore;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to sweep
    pub scan_interval: Duration,
    /// Maximum entries per ledger per sweep
    pub limit: usize,
    /// Execute the queued releases in the same sweep
    pub execute_immediately: bool,
    /// How long a release must sit in `pending` to be resumed
    pub stale_threshold: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(300),
            limit: 50,
            execute_immediately: true,
            stale_threshold: Duration::from_secs(60),
        }
    }
}

/// What one cycle did for one ledger
#[derive(Debug)]
pub struct LedgerCycle {
    pub ledger_id: String,
    /// Stale pending releases executed this cycle
    pub recovered: Option<BatchReleaseResult>,
    pub sweep: Option<AutoReleaseReport>,
}

pub struct AutoReleaseWorker {
    coordinator: Arc<ReleaseCoordinator>,
    ledgers: Vec<String>,
    artifacts: Option<Arc<ArtifactStore>>,
    config: WorkerConfig,
}

impl AutoReleaseWorker {
    pub fn new(coordinator: Arc<ReleaseCoordinator>, ledgers: Vec<String>, config: WorkerConfig) -> Self {
        let config = WorkerConfig {
            limit: config.limit.clamp(1, MAX_SWEEP_LIMIT),
            ..config
        };
        Self {
            coordinator,
            ledgers,
            artifacts: None,
            config,
        }
    }

    /// Also drop expired batch-file links on every cycle
    pub fn with_artifacts(mut self, artifacts: Arc<ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run the sweep loop forever
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            limit = self.config.limit,
            stale_threshold_secs = self.config.stale_threshold.as_secs(),
            ledgers = self.ledgers.len(),
            "Starting auto release worker"
        );

        loop {
            self.run_once().await;
            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// One cycle over every ledger. A failing ledger does not stop the others.
    pub async fn run_once(&self) -> Vec<LedgerCycle> {
        let mut cycles = Vec::with_capacity(self.ledgers.len());
        for ledger_id in &self.ledgers {
            let recovered = match self
                .coordinator
                .recover_stale(ledger_id, self.config.stale_threshold, self.config.limit)
                .await
            {
                Ok(result) => Some(result),
                Err(e) => {
                    error!(ledger_id, error = %e, "Stale release recovery failed");
                    None
                }
            };

            let sweep = match self
                .coordinator
                .auto_release_sweep(ledger_id, self.config.limit, self.config.execute_immediately)
                .await
            {
                Ok(report) => {
                    if report.eligible == 0 {
                        debug!(ledger_id, "No expired holds");
                    }
                    Some(report)
                }
                Err(e) => {
                    error!(ledger_id, error = %e, "Auto release sweep failed");
                    None
                }
            };

            cycles.push(LedgerCycle {
                ledger_id: ledger_id.clone(),
                recovered,
                sweep,
            });
        }

        if let Some(artifacts) = &self.artifacts {
            let purged = artifacts.purge_expired(Utc::now());
            if purged > 0 {
                debug!(purged, "Expired batch file links purged");
            }
        }
        cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::audit::MemoryAuditLog;
    use crate::escrow::events::LogPublisher;
    use crate::escrow::executor::TransferExecutor;
    use crate::escrow::state::ReleaseStatus;
    use crate::escrow::store::fixtures::{held_entry, verified_account};
    use crate::escrow::store::{EscrowStore, MemoryStore};
    use crate::rails::{MockRail, PROCESSOR, RailConfig, RailRegistry};

    fn setup() -> (Arc<MemoryStore>, Arc<MockRail>, Arc<ReleaseCoordinator>) {
        let store = Arc::new(MemoryStore::new());
        let processor = Arc::new(MockRail::new(PROCESSOR));
        let mut registry = RailRegistry::new();
        registry.register(processor.clone());
        registry.configure_ledger("ledger-1", vec![RailConfig::new(PROCESSOR)]);
        registry.configure_ledger("ledger-2", vec![RailConfig::new(PROCESSOR)]);

        let audit = Arc::new(MemoryAuditLog::new());
        let executor = Arc::new(TransferExecutor::new(
            store.clone(),
            Arc::new(registry),
            Arc::new(LogPublisher),
            audit.clone(),
        ));
        let coordinator = Arc::new(ReleaseCoordinator::new(store.clone(), executor, audit));
        (store, processor, coordinator)
    }

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.scan_interval, Duration::from_secs(300));
        assert_eq!(config.limit, 50);
        assert!(config.execute_immediately);
        assert_eq!(config.stale_threshold, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_run_once_sweeps_every_ledger() {
        let (store, processor, coordinator) = setup();

        store.upsert_account(verified_account("c1"));
        let mut ids = Vec::new();
        for ledger in ["ledger-1", "ledger-2"] {
            let mut entry = held_entry(ledger, "c1", 5_000);
            entry.hold_until = Some(Utc::now() - chrono::Duration::minutes(5));
            ids.push(entry.id);
            store.insert_entry(entry);
        }

        let artifacts = Arc::new(ArtifactStore::new(chrono::Duration::seconds(-1), "/files"));
        artifacts.put("ledger-1", "old.ach".into(), String::new(), 0, Utc::now());

        let worker = AutoReleaseWorker::new(
            coordinator,
            vec!["ledger-1".into(), "ledger-2".into()],
            WorkerConfig {
                limit: 10_000,
                ..Default::default()
            },
        )
        .with_artifacts(artifacts.clone());
        assert_eq!(worker.config().limit, MAX_SWEEP_LIMIT);

        let cycles = worker.run_once().await;
        assert_eq!(cycles.len(), 2);
        assert!(cycles.iter().all(|c| c.sweep.as_ref().unwrap().eligible == 1));
        assert!(cycles.iter().all(|c| c.recovered.as_ref().unwrap().total == 0));
        assert_eq!(processor.execute_count(), 2);
        for id in ids {
            let entry = store.get_entry(id).await.unwrap().unwrap();
            assert_eq!(entry.release_status, ReleaseStatus::Released);
        }
        assert!(artifacts.is_empty());

        // Nothing left to sweep
        let cycles = worker.run_once().await;
        assert!(cycles.iter().all(|c| c.sweep.as_ref().unwrap().eligible == 0));
    }

    #[tokio::test]
    async fn test_queued_releases_are_executed_next_cycle() {
        let (store, processor, coordinator) = setup();
        store.upsert_account(verified_account("c1"));
        let mut entry = held_entry("ledger-1", "c1", 5_000);
        entry.hold_until = Some(Utc::now() - chrono::Duration::minutes(5));
        store.insert_entry(entry.clone());

        let worker = AutoReleaseWorker::new(
            coordinator,
            vec!["ledger-1".into()],
            WorkerConfig {
                execute_immediately: false,
                stale_threshold: Duration::ZERO,
                ..Default::default()
            },
        );

        let cycles = worker.run_once().await;
        assert_eq!(cycles[0].sweep.as_ref().unwrap().queued.len(), 1);
        assert_eq!(processor.execute_count(), 0);
        assert_eq!(
            store.get_entry(entry.id).await.unwrap().unwrap().release_status,
            ReleaseStatus::PendingRelease
        );

        let cycles = worker.run_once().await;
        assert_eq!(cycles[0].recovered.as_ref().unwrap().succeeded, 1);
        assert_eq!(processor.execute_count(), 1);
        assert_eq!(
            store.get_entry(entry.id).await.unwrap().unwrap().release_status,
            ReleaseStatus::Released
        );
    }
}
