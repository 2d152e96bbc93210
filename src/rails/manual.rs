//! Manual Batch File Rail
//!
//! No live API call. `execute` checks the payout against what an entry
//! detail record needs and hands it back for the store to queue with the
//! release completion; the payout goes out in the ledger's next batch file.
//! Settlement is confirmed by an external process once the file has been
//! submitted to the bank, so the rail status stays `pending`.

use async_trait::async_trait;
use tracing::{info, warn};

use super::{ConfigValidation, Destination, MANUAL, Payout, RailAdapter, RailConfig, TransferResult};
use crate::batch_file::BatchPayout;
use crate::escrow::error::FailureCode;
use crate::money::to_minor_units;

/// Batch files settle in this currency only
const BATCH_CURRENCY: &str = "USD";

#[derive(Debug, Default)]
pub struct ManualBatchFileRail;

impl ManualBatchFileRail {
    pub fn new() -> Self {
        Self
    }

    fn external_id(release_id: impl std::fmt::Display) -> String {
        format!("batch_{}", release_id)
    }
}

#[async_trait]
impl RailAdapter for ManualBatchFileRail {
    fn name(&self) -> &'static str {
        MANUAL
    }

    async fn execute(&self, payout: &Payout, _config: &RailConfig) -> TransferResult {
        let Destination::BankAccount(bank_account) = &payout.destination else {
            return TransferResult::failed(
                FailureCode::InvalidDestination.as_str(),
                "manual rail requires bank account details",
            );
        };
        if !payout.currency.eq_ignore_ascii_case(BATCH_CURRENCY) {
            return TransferResult::failed(
                FailureCode::UnsupportedCurrency.as_str(),
                format!("batch files settle in {} only", BATCH_CURRENCY),
            );
        }
        let amount = match to_minor_units(payout.amount, &payout.currency) {
            Ok(amount) => amount,
            Err(e) => {
                return TransferResult::failed(FailureCode::AmountConversionFailed.as_str(), e.to_string());
            }
        };

        let batch_payout = BatchPayout {
            recipient_id: payout.recipient_id.clone(),
            bank_account: bank_account.clone(),
            amount,
        };
        if let Err(e) = batch_payout.validate() {
            warn!(
                release_id = %payout.release_id,
                ledger_id = %payout.ledger_id,
                error = %e,
                "Bank details rejected for batch file"
            );
            return TransferResult::failed(FailureCode::InvalidBankDetails.as_str(), e.to_string());
        }

        info!(
            release_id = %payout.release_id,
            ledger_id = %payout.ledger_id,
            amount,
            "Payout accepted for batch file"
        );
        TransferResult::pending(Self::external_id(payout.release_id)).with_batch_payout(batch_payout)
    }

    /// Settlement is confirmed out of band, so a batch payout stays pending here.
    async fn get_status(&self, external_id: &str, _config: &RailConfig) -> TransferResult {
        TransferResult::pending(external_id)
    }

    fn validate_config(&self, _config: &RailConfig) -> ConfigValidation {
        ConfigValidation::from_errors(Vec::new())
    }
}
