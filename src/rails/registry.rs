//! Rail Registry
//!
//! Strategy map `rail name -> adapter`, populated at startup, plus the
//! per-ledger rail configuration and the rail selection policy.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{ConfigValidation, MANUAL, RAIL_PRIORITY, RailAdapter, RailConfig};
use crate::escrow::error::EscrowError;
use crate::escrow::types::ConnectedAccount;

/// Which rule of the selection policy picked the rail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionSource {
    Explicit,
    RecipientPreference,
    LedgerPriority,
    Fallback,
}

/// Rail chosen for one payout
#[derive(Clone)]
pub struct SelectedRail {
    pub adapter: Arc<dyn RailAdapter>,
    pub config: RailConfig,
    pub source: SelectionSource,
}

impl SelectedRail {
    pub fn name(&self) -> &'static str {
        self.adapter.name()
    }
}

impl std::fmt::Debug for SelectedRail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedRail")
            .field("rail", &self.adapter.name())
            .field("source", &self.source)
            .finish()
    }
}

#[derive(Default)]
pub struct RailRegistry {
    adapters: HashMap<String, Arc<dyn RailAdapter>>,
    ledgers: HashMap<String, Vec<RailConfig>>,
}

impl RailRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn RailAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    /// Replace the rail configuration of a ledger
    pub fn configure_ledger(&mut self, ledger_id: impl Into<String>, rails: Vec<RailConfig>) {
        self.ledgers.insert(ledger_id.into(), rails);
    }

    pub fn get(&self, rail: &str) -> Option<Arc<dyn RailAdapter>> {
        self.adapters.get(rail).cloned()
    }

    pub fn has(&self, rail: &str) -> bool {
        self.adapters.contains_key(rail)
    }

    pub fn ledger_ids(&self) -> impl Iterator<Item = &String> {
        self.ledgers.keys()
    }

    fn ledger_config(&self, ledger_id: &str, rail: &str) -> Option<&RailConfig> {
        self.ledgers
            .get(ledger_id)
            .and_then(|rails| rails.iter().find(|c| c.rail == rail))
    }

    /// Ledger config for `rail`, or an empty enabled config when none is set
    pub fn config_for(&self, ledger_id: &str, rail: &str) -> RailConfig {
        self.ledger_config(ledger_id, rail)
            .cloned()
            .unwrap_or_else(|| RailConfig::new(rail))
    }

    /// Enabled in the ledger's config. [`MANUAL`] needs no credentials and
    /// counts as enabled unless the ledger turns it off.
    fn is_enabled_for(&self, ledger_id: &str, rail: &str) -> bool {
        match self.ledger_config(ledger_id, rail) {
            Some(config) => config.enabled,
            None => rail == MANUAL,
        }
    }

    fn selected(&self, ledger_id: &str, rail: &str, source: SelectionSource) -> Option<SelectedRail> {
        self.get(rail).map(|adapter| SelectedRail {
            adapter,
            config: self.config_for(ledger_id, rail),
            source,
        })
    }

    /// Select the rail for a payout. First match wins:
    ///
    /// 1. `explicit` rail from the request, which must be enabled for the ledger
    /// 2. the recipient's preferred rail, if enabled for the ledger
    /// 3. the ledger's enabled rails in [`RAIL_PRIORITY`] order
    /// 4. [`MANUAL`]
    pub fn select(
        &self,
        ledger_id: &str,
        explicit: Option<&str>,
        account: Option<&ConnectedAccount>,
    ) -> Result<SelectedRail, EscrowError> {
        if let Some(rail) = explicit.map(str::trim).filter(|r| !r.is_empty()) {
            if !self.has(rail) {
                return Err(EscrowError::UnknownRail(rail.to_string()));
            }
            if !self.is_enabled_for(ledger_id, rail) {
                return Err(EscrowError::RailDisabled(rail.to_string()));
            }
            return self
                .selected(ledger_id, rail, SelectionSource::Explicit)
                .ok_or_else(|| EscrowError::UnknownRail(rail.to_string()));
        }

        if let Some(preferred) = account.and_then(|a| a.preferred_rail.as_deref()) {
            if !self.has(preferred) {
                warn!(ledger_id, rail = preferred, "Preferred rail is not registered");
            } else if !self.is_enabled_for(ledger_id, preferred) {
                debug!(ledger_id, rail = preferred, "Preferred rail not enabled for ledger");
            } else if let Some(selected) =
                self.selected(ledger_id, preferred, SelectionSource::RecipientPreference)
            {
                return Ok(selected);
            }
        }

        for rail in RAIL_PRIORITY {
            let configured = self
                .ledger_config(ledger_id, rail)
                .is_some_and(|c| c.enabled);
            if configured
                && let Some(selected) = self.selected(ledger_id, rail, SelectionSource::LedgerPriority)
            {
                return Ok(selected);
            }
        }

        self.selected(ledger_id, MANUAL, SelectionSource::Fallback)
            .ok_or_else(|| EscrowError::UnknownRail(MANUAL.to_string()))
    }

    /// Validate every configured rail of every ledger
    pub fn validate_all(&self) -> Vec<(String, String, ConfigValidation)> {
        let mut report = Vec::new();
        for (ledger_id, rails) in &self.ledgers {
            for config in rails.iter().filter(|c| c.enabled) {
                let validation = match self.get(&config.rail) {
                    Some(adapter) => adapter.validate_config(config),
                    None => ConfigValidation::from_errors(vec![format!(
                        "no adapter registered for rail '{}'",
                        config.rail
                    )]),
                };
                report.push((ledger_id.clone(), config.rail.clone(), validation));
            }
        }
        report
    }
}
