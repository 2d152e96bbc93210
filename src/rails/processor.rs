//! Processor Transfer Rail
//!
//! Pays out through a hosted-payments processor's transfer endpoint. The
//! destination is the recipient's processor account id and the amount is sent
//! in the currency's minor unit. The release id is used as idempotency key and
//! transfer group so a transfer can always be traced back to its release.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ConfigValidation, Destination, PROCESSOR, Payout, RailAdapter, RailConfig, TransferResult};
use crate::escrow::error::FailureCode;
use crate::money::to_minor_units;

#[derive(Debug, Deserialize)]
struct TransferBody {
    id: String,
    #[serde(default)]
    reversed: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
}

pub struct ProcessorTransferRail {
    client: reqwest::Client,
    base_url: String,
}

impl ProcessorTransferRail {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn base_url<'a>(&'a self, config: &'a RailConfig) -> &'a str {
        config
            .setting("base_url")
            .map(|u| u.trim_end_matches('/'))
            .unwrap_or(&self.base_url)
    }

    async fn provider_failure(response: reqwest::Response) -> TransferResult {
        let status = response.status();
        match response.json::<ErrorEnvelope>().await {
            Ok(envelope) => {
                let code = envelope
                    .error
                    .code
                    .or(envelope.error.kind)
                    .unwrap_or_else(|| "provider_error".to_string());
                let message = envelope
                    .error
                    .message
                    .unwrap_or_else(|| format!("HTTP {}", status));
                TransferResult::failed(code, message)
            }
            Err(_) => TransferResult::failed("provider_error", format!("HTTP {}", status)),
        }
    }
}

#[async_trait]
impl RailAdapter for ProcessorTransferRail {
    fn name(&self) -> &'static str {
        PROCESSOR
    }

    async fn execute(&self, payout: &Payout, config: &RailConfig) -> TransferResult {
        let Destination::ProcessorAccount { account_id } = &payout.destination else {
            return TransferResult::failed(
                FailureCode::InvalidDestination.as_str(),
                "processor rail requires a processor account destination",
            );
        };
        let Some(secret_key) = config.credential("secret_key") else {
            return TransferResult::failed(
                FailureCode::RailMisconfigured.as_str(),
                "secret_key is not configured",
            );
        };
        let amount = match to_minor_units(payout.amount, &payout.currency) {
            Ok(amount) => amount,
            Err(e) => {
                return TransferResult::failed(FailureCode::AmountConversionFailed.as_str(), e.to_string());
            }
        };

        let release_id = payout.release_id.to_string();
        let params = [
            ("amount", amount.to_string()),
            ("currency", payout.currency.to_ascii_lowercase()),
            ("destination", account_id.clone()),
            ("transfer_group", format!("release_{}", release_id)),
            ("metadata[release_id]", release_id.clone()),
            ("metadata[ledger_id]", payout.ledger_id.clone()),
            ("metadata[recipient_id]", payout.recipient_id.clone()),
        ];

        debug!(release_id = %release_id, destination = %account_id, amount, "Processor transfer");

        let response = match self
            .client
            .post(format!("{}/v1/transfers", self.base_url(config)))
            .bearer_auth(secret_key)
            .header("Idempotency-Key", &release_id)
            .form(&params)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(release_id = %release_id, error = %e, "Processor transfer request failed");
                return TransferResult::failed("network_error", e.to_string());
            }
        };

        if !response.status().is_success() {
            return Self::provider_failure(response).await;
        }

        match response.json::<TransferBody>().await {
            Ok(body) => TransferResult::completed(body.id),
            // Transfer was accepted but the body is unreadable: report it, never retry.
            Err(e) => TransferResult::failed("invalid_response", e.to_string()),
        }
    }

    async fn get_status(&self, external_id: &str, config: &RailConfig) -> TransferResult {
        let Some(secret_key) = config.credential("secret_key") else {
            return TransferResult::failed(
                FailureCode::RailMisconfigured.as_str(),
                "secret_key is not configured",
            );
        };

        let response = match self
            .client
            .get(format!("{}/v1/transfers/{}", self.base_url(config), external_id))
            .bearer_auth(secret_key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return TransferResult::failed("network_error", e.to_string()),
        };

        if !response.status().is_success() {
            return Self::provider_failure(response).await;
        }

        match response.json::<TransferBody>().await {
            Ok(body) if body.reversed => {
                TransferResult::failed_with_id(body.id, "transfer_reversed", "transfer was reversed")
            }
            Ok(body) => TransferResult::completed(body.id),
            Err(e) => TransferResult::failed("invalid_response", e.to_string()),
        }
    }

    fn validate_config(&self, config: &RailConfig) -> ConfigValidation {
        let mut errors = Vec::new();
        if config.credential("secret_key").is_none() {
            errors.push("credentials.secret_key is required".to_string());
        }
        if let Some(url) = config.setting("base_url")
            && !(url.starts_with("https://") || url.starts_with("http://"))
        {
            errors.push(format!("settings.base_url is not an http(s) url: {}", url));
        }
        ConfigValidation::from_errors(errors)
    }
}
