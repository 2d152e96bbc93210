//! Banking Network Rail
//!
//! Two-step payout against a bank-aggregator API:
//!
//! ```text
//! /transfer/authorization/create ──approved──▶ /transfer/create
//!            │
//!         declined ──▶ failed (rationale code)
//! ```
//!
//! The aggregator access token is looked up server-side from the
//! [`TokenVault`] by id; it is never part of a request or a destination.
//! Amounts are sent in major units with two decimals.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{
    BANKING_NETWORK, ConfigValidation, Destination, Payout, RailAdapter, RailConfig,
    TransferResult,
};
use crate::escrow::error::{EscrowError, FailureCode};
use crate::money::format_major_2dp;

/// Server-side store of aggregator access tokens
#[async_trait]
pub trait TokenVault: Send + Sync {
    async fn access_token(&self, token_id: &str) -> Result<Option<String>, EscrowError>;
}

#[derive(Default)]
pub struct MemoryTokenVault {
    tokens: RwLock<HashMap<String, String>>,
}

impl MemoryTokenVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token_id: impl Into<String>, access_token: impl Into<String>) {
        self.tokens
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(token_id.into(), access_token.into());
    }
}

#[async_trait]
impl TokenVault for MemoryTokenVault {
    async fn access_token(&self, token_id: &str) -> Result<Option<String>, EscrowError> {
        Ok(self
            .tokens
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(token_id)
            .cloned())
    }
}

#[derive(Debug, Deserialize)]
struct AuthorizationEnvelope {
    authorization: Authorization,
}

#[derive(Debug, Deserialize)]
struct Authorization {
    id: String,
    decision: String,
    decision_rationale: Option<DecisionRationale>,
}

#[derive(Debug, Deserialize)]
struct DecisionRationale {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransferEnvelope {
    transfer: Transfer,
}

#[derive(Debug, Deserialize)]
struct Transfer {
    id: String,
    status: String,
    failure_reason: Option<FailureReason>,
}

#[derive(Debug, Deserialize)]
struct FailureReason {
    ach_return_code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error_code: Option<String>,
    error_type: Option<String>,
    error_message: Option<String>,
}

/// Outcome of one API call: parsed body or a ready-made failure
enum Call<T> {
    Ok(T),
    Failed(TransferResult),
}

pub struct BankingNetworkRail {
    client: reqwest::Client,
    base_url: String,
    vault: Arc<dyn TokenVault>,
}

impl BankingNetworkRail {
    pub fn new(base_url: impl Into<String>, vault: Arc<dyn TokenVault>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, vault)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        vault: Arc<dyn TokenVault>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            vault,
        }
    }

    fn base_url<'a>(&'a self, config: &'a RailConfig) -> &'a str {
        config
            .setting("base_url")
            .map(|u| u.trim_end_matches('/'))
            .unwrap_or(&self.base_url)
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        config: &RailConfig,
        path: &str,
        body: serde_json::Value,
    ) -> Call<T> {
        let response = match self
            .client
            .post(format!("{}{}", self.base_url(config), path))
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(path, error = %e, "Banking network request failed");
                return Call::Failed(TransferResult::failed("network_error", e.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let failure = match response.json::<ErrorBody>().await {
                Ok(body) => TransferResult::failed(
                    body.error_code
                        .or(body.error_type)
                        .unwrap_or_else(|| "provider_error".to_string()),
                    body.error_message
                        .unwrap_or_else(|| format!("HTTP {}", status)),
                ),
                Err(_) => TransferResult::failed("provider_error", format!("HTTP {}", status)),
            };
            return Call::Failed(failure);
        }

        match response.json::<T>().await {
            Ok(body) => Call::Ok(body),
            Err(e) => Call::Failed(TransferResult::failed("invalid_response", e.to_string())),
        }
    }

    fn transfer_result(transfer: Transfer) -> TransferResult {
        match transfer.status.as_str() {
            "posted" | "settled" | "funds_available" => TransferResult::completed(transfer.id),
            "pending" => TransferResult::pending(transfer.id),
            other => {
                let (code, message) = match transfer.failure_reason {
                    Some(reason) => (
                        reason.ach_return_code.unwrap_or_else(|| other.to_string()),
                        reason.description.unwrap_or_else(|| format!("transfer {}", other)),
                    ),
                    None => (other.to_string(), format!("transfer {}", other)),
                };
                TransferResult::failed_with_id(transfer.id, code, message)
            }
        }
    }
}

#[async_trait]
impl RailAdapter for BankingNetworkRail {
    fn name(&self) -> &'static str {
        BANKING_NETWORK
    }

    async fn execute(&self, payout: &Payout, config: &RailConfig) -> TransferResult {
        let Destination::BankingNetwork {
            token_id,
            account_id,
            legal_name,
        } = &payout.destination
        else {
            return TransferResult::failed(
                FailureCode::InvalidDestination.as_str(),
                "banking network rail requires a linked bank account destination",
            );
        };
        let (Some(client_id), Some(secret)) =
            (config.credential("client_id"), config.credential("secret"))
        else {
            return TransferResult::failed(
                FailureCode::RailMisconfigured.as_str(),
                "client_id and secret must be configured",
            );
        };
        let amount = match format_major_2dp(payout.amount, &payout.currency) {
            Ok(amount) => amount,
            Err(e) => {
                return TransferResult::failed(FailureCode::AmountConversionFailed.as_str(), e.to_string());
            }
        };
        let access_token = match self.vault.access_token(token_id).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                return TransferResult::failed(
                    FailureCode::MissingAccessToken.as_str(),
                    format!("no vaulted token for id {}", token_id),
                );
            }
            Err(e) => return TransferResult::failed(FailureCode::VaultError.as_str(), e.to_string()),
        };

        let release_id = payout.release_id.to_string();
        debug!(release_id = %release_id, account_id = %account_id, amount = %amount, "Banking network authorization");

        let authorization: AuthorizationEnvelope = match self
            .post(
                config,
                "/transfer/authorization/create",
                json!({
                    "client_id": client_id,
                    "secret": secret,
                    "access_token": access_token,
                    "account_id": account_id,
                    "type": "credit",
                    "network": config.setting("network").unwrap_or("ach"),
                    "ach_class": config.setting("ach_class").unwrap_or("ppd"),
                    "amount": amount,
                    "iso_currency_code": payout.currency.to_ascii_uppercase(),
                    "user": { "legal_name": legal_name },
                    "idempotency_key": release_id,
                }),
            )
            .await
        {
            Call::Ok(body) => body,
            Call::Failed(result) => return result,
        };

        let authorization = authorization.authorization;
        if authorization.decision != "approved" {
            let (code, message) = match authorization.decision_rationale {
                Some(rationale) => (
                    rationale
                        .code
                        .unwrap_or_else(|| "authorization_declined".to_string()),
                    rationale
                        .description
                        .unwrap_or_else(|| format!("authorization {}", authorization.decision)),
                ),
                None => (
                    "authorization_declined".to_string(),
                    format!("authorization {}", authorization.decision),
                ),
            };
            return TransferResult::failed(code, message);
        }

        let transfer: TransferEnvelope = match self
            .post(
                config,
                "/transfer/create",
                json!({
                    "client_id": client_id,
                    "secret": secret,
                    "access_token": access_token,
                    "account_id": account_id,
                    "authorization_id": authorization.id,
                    "amount": amount,
                    "description": config.setting("description").unwrap_or("Payout"),
                    "metadata": { "release_id": release_id, "ledger_id": payout.ledger_id },
                }),
            )
            .await
        {
            Call::Ok(body) => body,
            Call::Failed(result) => return result,
        };

        Self::transfer_result(transfer.transfer)
    }

    async fn get_status(&self, external_id: &str, config: &RailConfig) -> TransferResult {
        let (Some(client_id), Some(secret)) =
            (config.credential("client_id"), config.credential("secret"))
        else {
            return TransferResult::failed(
                FailureCode::RailMisconfigured.as_str(),
                "client_id and secret must be configured",
            );
        };

        match self
            .post::<TransferEnvelope>(
                config,
                "/transfer/get",
                json!({ "client_id": client_id, "secret": secret, "transfer_id": external_id }),
            )
            .await
        {
            Call::Ok(body) => Self::transfer_result(body.transfer),
            Call::Failed(result) => result,
        }
    }

    fn validate_config(&self, config: &RailConfig) -> ConfigValidation {
        let mut errors = Vec::new();
        for key in ["client_id", "secret"] {
            if config.credential(key).is_none() {
                errors.push(format!("credentials.{} is required", key));
            }
        }
        if let Some(network) = config.setting("network")
            && !matches!(network, "ach" | "same-day-ach" | "rtp")
        {
            errors.push(format!("settings.network is not supported: {}", network));
        }
        ConfigValidation::from_errors(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::types::ReleaseId;
    use crate::rails::TransferStatus;
    use axum::{Json, Router, routing::post};
    use rust_decimal::Decimal;
    use serde_json::Value;

    async fn authorize(Json(body): Json<Value>) -> (axum::http::StatusCode, Json<Value>) {
        if body["access_token"] != "access-sandbox-1" {
            return (
                axum::http::StatusCode::BAD_REQUEST,
                Json(json!({"error_type": "INVALID_INPUT", "error_code": "INVALID_ACCESS_TOKEN", "error_message": "bad token"})),
            );
        }
        let decision = if body["account_id"] == "acc_low_balance" {
            json!({"id": "auth_2", "decision": "declined", "decision_rationale": {"code": "NSF", "description": "insufficient funds"}})
        } else {
            json!({"id": "auth_1", "decision": "approved", "decision_rationale": null})
        };
        (axum::http::StatusCode::OK, Json(json!({ "authorization": decision })))
    }

    async fn create(Json(body): Json<Value>) -> Json<Value> {
        assert_eq!(body["authorization_id"], "auth_1");
        Json(json!({"transfer": {"id": format!("xfer_{}", body["amount"].as_str().unwrap_or("")), "status": "pending"}}))
    }

    async fn get(Json(body): Json<Value>) -> Json<Value> {
        let id = body["transfer_id"].as_str().unwrap_or_default().to_string();
        if id == "xfer_returned" {
            return Json(json!({"transfer": {"id": id, "status": "returned", "failure_reason": {"ach_return_code": "R03", "description": "no account"}}}));
        }
        Json(json!({"transfer": {"id": id, "status": "settled"}}))
    }

    async fn spawn_provider() -> String {
        let app = Router::new()
            .route("/transfer/authorization/create", post(authorize))
            .route("/transfer/create", post(create))
            .route("/transfer/get", post(get));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn vault() -> Arc<MemoryTokenVault> {
        let vault = Arc::new(MemoryTokenVault::new());
        vault.insert("tok-1", "access-sandbox-1");
        vault.insert("tok-revoked", "access-revoked");
        vault
    }

    fn payout(token_id: &str, account_id: &str) -> Payout {
        Payout {
            release_id: ReleaseId::new(),
            ledger_id: "ledger-1".into(),
            recipient_id: "creator-1".into(),
            amount: Decimal::new(100, 0),
            currency: "USD".into(),
            destination: Destination::BankingNetwork {
                token_id: token_id.into(),
                account_id: account_id.into(),
                legal_name: "Ada Lovelace".into(),
            },
        }
    }

    fn config() -> RailConfig {
        RailConfig::new(BANKING_NETWORK)
            .with_credential("client_id", "client-1")
            .with_credential("secret", "secret-1")
    }

    #[tokio::test]
    async fn test_authorize_then_transfer() {
        let rail = BankingNetworkRail::new(spawn_provider().await, vault());
        let result = rail.execute(&payout("tok-1", "acc_1"), &config()).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.status, TransferStatus::Pending);
        // Major units with two decimals
        assert_eq!(result.external_id.as_deref(), Some("xfer_100.00"));
    }

    #[tokio::test]
    async fn test_declined_authorization() {
        let rail = BankingNetworkRail::new(spawn_provider().await, vault());
        let result = rail.execute(&payout("tok-1", "acc_low_balance"), &config()).await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert_eq!(error.code, "NSF");
        assert_eq!(error.message, "insufficient funds");
    }

    #[tokio::test]
    async fn test_token_resolution() {
        let rail = BankingNetworkRail::new(spawn_provider().await, vault());

        let unknown = rail.execute(&payout("tok-missing", "acc_1"), &config()).await;
        assert_eq!(unknown.error.unwrap().code, "missing_access_token");

        let revoked = rail.execute(&payout("tok-revoked", "acc_1"), &config()).await;
        assert_eq!(revoked.error.unwrap().code, "INVALID_ACCESS_TOKEN");
    }

    #[tokio::test]
    async fn test_get_status() {
        let rail = BankingNetworkRail::new(spawn_provider().await, vault());
        let settled = rail.get_status("xfer_1", &config()).await;
        assert_eq!(settled.status, TransferStatus::Completed);

        let returned = rail.get_status("xfer_returned", &config()).await;
        assert_eq!(returned.status, TransferStatus::Failed);
        assert_eq!(returned.error.unwrap().code, "R03");
    }

    #[test]
    fn test_transfer_status_mapping() {
        let status = |status: &str| {
            BankingNetworkRail::transfer_result(Transfer {
                id: "x".into(),
                status: status.into(),
                failure_reason: None,
            })
            .status
        };
        assert_eq!(status("posted"), TransferStatus::Completed);
        assert_eq!(status("pending"), TransferStatus::Pending);
        assert_eq!(status("cancelled"), TransferStatus::Failed);
    }

    #[test]
    fn test_validate_config() {
        let rail = BankingNetworkRail::new("https://bank.example", vault());
        assert!(rail.validate_config(&config()).valid);

        let invalid = RailConfig::new(BANKING_NETWORK).with_setting("network", "swift");
        let validation = rail.validate_config(&invalid);
        assert_eq!(validation.errors.len(), 3);
    }
}
