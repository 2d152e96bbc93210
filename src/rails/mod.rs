//! Payment Rails
//!
//! A rail moves money to a recipient. Every rail implements [`RailAdapter`]
//! and is registered by name in the [`RailRegistry`].
//!
//! # Contract
//!
//! 1. `execute` is called at most once per release; the release id is passed
//!    along so providers can correlate and deduplicate
//! 2. A rail never retries a call whose outcome is unknown
//! 3. Failures carry the provider's error code verbatim

pub mod banking;
pub mod manual;
pub mod processor;
pub mod registry;

pub use banking::{BankingNetworkRail, MemoryTokenVault, TokenVault};
pub use manual::ManualBatchFileRail;
pub use processor::ProcessorTransferRail;
pub use registry::{RailRegistry, SelectedRail};

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::batch_file::BatchPayout;
use crate::escrow::types::ReleaseId;

/// Hosted-payments processor transfer rail
pub const PROCESSOR: &str = "processor";
/// Bank-aggregator authorization + transfer rail
pub const BANKING_NETWORK: &str = "banking_network";
/// Offline fixed-width batch file rail
pub const MANUAL: &str = "manual";

/// Fixed priority used when neither the caller nor the recipient picks a rail
pub const RAIL_PRIORITY: [&str; 3] = [PROCESSOR, BANKING_NETWORK, MANUAL];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BankAccountType {
    #[default]
    Checking,
    Savings,
}

/// Recipient bank details for the batch file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    pub routing_number: String,
    pub account_number: String,
    pub holder_name: String,
    #[serde(default)]
    pub account_type: BankAccountType,
}

/// Where a payout goes, in the shape the selected rail needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Destination {
    ProcessorAccount {
        account_id: String,
    },
    BankingNetwork {
        /// Id of the vaulted access token, resolved server-side
        token_id: String,
        account_id: String,
        legal_name: String,
    },
    BankAccount(BankAccount),
}

/// One payout handed to a rail
#[derive(Debug, Clone)]
pub struct Payout {
    pub release_id: ReleaseId,
    pub ledger_id: String,
    pub recipient_id: String,
    /// Major units, exactly the held amount
    pub amount: Decimal,
    pub currency: String,
    pub destination: Destination,
}

/// Per-ledger rail configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RailConfig {
    pub rail: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub credentials: HashMap<String, String>,
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

impl RailConfig {
    pub fn new(rail: impl Into<String>) -> Self {
        Self {
            rail: rail.into(),
            enabled: true,
            ..Default::default()
        }
    }

    pub fn with_credential(mut self, key: &str, value: &str) -> Self {
        self.credentials.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_setting(mut self, key: &str, value: &str) -> Self {
        self.settings.insert(key.to_string(), value.to_string());
        self
    }

    /// Non-empty credential value
    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

/// Transfer state as reported by a rail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Completed,
    /// Accepted; settlement is confirmed later
    Pending,
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Completed => "completed",
            TransferStatus::Pending => "pending",
            TransferStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider error as reported by the rail
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RailError {
    pub code: String,
    pub message: String,
}

impl RailError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Outcome of a rail call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferResult {
    pub success: bool,
    pub status: TransferStatus,
    pub external_id: Option<String>,
    pub error: Option<RailError>,
    /// Payout the store must queue for the next batch file when the release completes
    #[serde(skip)]
    pub batch_payout: Option<BatchPayout>,
}

impl TransferResult {
    pub fn completed(external_id: impl Into<String>) -> Self {
        Self {
            success: true,
            status: TransferStatus::Completed,
            external_id: Some(external_id.into()),
            error: None,
            batch_payout: None,
        }
    }

    pub fn pending(external_id: impl Into<String>) -> Self {
        Self {
            success: true,
            status: TransferStatus::Pending,
            external_id: Some(external_id.into()),
            error: None,
            batch_payout: None,
        }
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            status: TransferStatus::Failed,
            external_id: None,
            error: Some(RailError::new(code, message)),
            batch_payout: None,
        }
    }

    pub fn with_batch_payout(mut self, payout: BatchPayout) -> Self {
        self.batch_payout = Some(payout);
        self
    }

    /// Failure that still produced a provider-side object
    pub fn failed_with_id(
        external_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            external_id: Some(external_id.into()),
            ..Self::failed(code, message)
        }
    }
}

/// Result of [`RailAdapter::validate_config`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ConfigValidation {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Rail adapter trait
///
/// Implementations must be safe to share between tasks.
#[async_trait]
pub trait RailAdapter: Send + Sync {
    /// Registry key, e.g. [`PROCESSOR`]
    fn name(&self) -> &'static str;

    /// Move `payout.amount` to `payout.destination`
    async fn execute(&self, payout: &Payout, config: &RailConfig) -> TransferResult;

    /// Query a previously executed transfer
    async fn get_status(&self, external_id: &str, config: &RailConfig) -> TransferResult;

    fn validate_config(&self, config: &RailConfig) -> ConfigValidation;
}

/// Scriptable rail for tests
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        Succeed,
        Pending,
        Fail(String),
        /// Sleep before answering (used to trip the executor timeout)
        Stall(Duration),
    }

    pub struct MockRail {
        name: &'static str,
        behavior: Mutex<MockBehavior>,
        execute_count: AtomicUsize,
        payouts: Mutex<Vec<Payout>>,
    }

    impl MockRail {
        pub fn new(name: &'static str) -> Self {
            Self {
                name,
                behavior: Mutex::new(MockBehavior::Succeed),
                execute_count: AtomicUsize::new(0),
                payouts: Mutex::new(Vec::new()),
            }
        }

        pub fn set_behavior(&self, behavior: MockBehavior) {
            *self.behavior.lock().unwrap() = behavior;
        }

        pub fn execute_count(&self) -> usize {
            self.execute_count.load(Ordering::SeqCst)
        }

        pub fn payouts(&self) -> Vec<Payout> {
            self.payouts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RailAdapter for MockRail {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn execute(&self, payout: &Payout, _config: &RailConfig) -> TransferResult {
            self.execute_count.fetch_add(1, Ordering::SeqCst);
            self.payouts.lock().unwrap().push(payout.clone());

            let behavior = self.behavior.lock().unwrap().clone();
            match behavior {
                MockBehavior::Succeed => TransferResult::completed(format!("mock_{}", payout.release_id)),
                MockBehavior::Pending => TransferResult::pending(format!("mock_{}", payout.release_id)),
                MockBehavior::Fail(code) => TransferResult::failed(code, "Mock transfer failure"),
                MockBehavior::Stall(delay) => {
                    tokio::time::sleep(delay).await;
                    TransferResult::completed(format!("mock_{}", payout.release_id))
                }
            }
        }

        async fn get_status(&self, external_id: &str, _config: &RailConfig) -> TransferResult {
            TransferResult::completed(external_id)
        }

        fn validate_config(&self, _config: &RailConfig) -> ConfigValidation {
            ConfigValidation::from_errors(Vec::new())
        }
    }
}

#[cfg(test)]
pub use mock::{MockBehavior, MockRail};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rail_config_lookup() {
        let config = RailConfig::new(PROCESSOR)
            .with_credential("secret_key", "sk_test_1")
            .with_credential("empty", "  ")
            .with_setting("transfer_group_prefix", "escrow");
        assert_eq!(config.credential("secret_key"), Some("sk_test_1"));
        assert_eq!(config.credential("empty"), None);
        assert_eq!(config.credential("missing"), None);
        assert_eq!(config.setting("transfer_group_prefix"), Some("escrow"));
        assert!(config.enabled);
    }

    #[test]
    fn test_rail_config_yaml_defaults() {
        let config: RailConfig = serde_yaml::from_str("rail: manual\n").unwrap();
        assert!(config.enabled);
        assert!(config.credentials.is_empty());
    }

    #[test]
    fn test_transfer_result_constructors() {
        let ok = TransferResult::completed("tr_1");
        assert!(ok.success);
        assert_eq!(ok.status, TransferStatus::Completed);

        let pending = TransferResult::pending("batch_1");
        assert!(pending.success);
        assert_eq!(pending.status.to_string(), "pending");

        let failed = TransferResult::failed_with_id("tr_2", "account_closed", "closed");
        assert!(!failed.success);
        assert_eq!(failed.external_id.as_deref(), Some("tr_2"));
        assert_eq!(failed.error.unwrap().code, "account_closed");
    }

    #[test]
    fn test_config_validation() {
        assert!(ConfigValidation::from_errors(vec![]).valid);
        let invalid = ConfigValidation::from_errors(vec!["missing secret_key".into()]);
        assert!(!invalid.valid);
        assert_eq!(invalid.errors.len(), 1);
    }
}
