use std::sync::Arc;

use crate::escrow::{HoldRegistry, PgEscrowStore, ReleaseCoordinator};

/// Shared gateway state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ReleaseCoordinator>,
    pub holds: Arc<HoldRegistry>,
    /// Present when running on PostgreSQL; pinged by the health check
    pub pg_store: Option<Arc<PgEscrowStore>>,
}

impl AppState {
    pub fn new(coordinator: Arc<ReleaseCoordinator>, holds: Arc<HoldRegistry>) -> Self {
        Self {
            coordinator,
            holds,
            pg_store: None,
        }
    }

    pub fn with_pg_store(mut self, store: Arc<PgEscrowStore>) -> Self {
        self.pg_store = Some(store);
        self
    }
}
