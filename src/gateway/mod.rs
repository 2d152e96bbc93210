pub mod handlers;
pub mod state;
pub mod types;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;

use state::AppState;

/// Build the HTTP router
pub fn router(state: Arc<AppState>) -> Router {
    let ledger_routes = Router::new()
        .route("/holds", get(handlers::get_held))
        .route("/holds/summary", get(handlers::get_summary))
        .route("/releases", post(handlers::release))
        .route("/releases/batch", post(handlers::batch_release))
        .route("/releases/auto", post(handlers::auto_release))
        .route("/entries/{entry_id}/void", post(handlers::void_release))
        .route("/batch-files", post(handlers::generate_batch_file));

    Router::new()
        .route("/api/v1/health", get(handlers::health_check))
        .nest("/api/v1/ledgers/{ledger_id}", ledger_routes)
        .route("/api/v1/releases/{release_id}", get(handlers::get_release))
        .route(
            "/api/v1/releases/{release_id}/execute",
            post(handlers::execute_release),
        )
        .route(
            "/api/v1/releases/{release_id}/reconcile",
            post(handlers::reconcile_release),
        )
        .route("/api/v1/batch-files/{token}", get(handlers::download_batch_file))
        .with_state(state)
}

/// Start HTTP Gateway server
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!(%addr, "Gateway listening");
    axum::serve(listener, router(state))
        .await
        .context("Server error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch_file::{ArtifactStore, BatchFileEncoder, BatchOriginator};
    use crate::escrow::store::fixtures::{held_entry, verified_account};
    use crate::escrow::{
        BatchSettlement, HoldRegistry, LogPublisher, MemoryAuditLog, MemoryStore,
        ReleaseCoordinator, TransferExecutor,
    };
    use crate::rails::{
        MANUAL, ManualBatchFileRail, MockBehavior, MockRail, PROCESSOR, RailConfig,
        RailRegistry,
    };
    use serde_json::{Value, json};

    struct TestServer {
        base: String,
        store: Arc<MemoryStore>,
        processor: Arc<MockRail>,
        client: reqwest::Client,
    }

    async fn start() -> TestServer {
        let store = Arc::new(MemoryStore::new());
        let processor = Arc::new(MockRail::new(PROCESSOR));

        let mut registry = RailRegistry::new();
        registry.register(processor.clone());
        registry.register(Arc::new(ManualBatchFileRail::new()));
        registry.configure_ledger("ledger-1", vec![RailConfig::new(PROCESSOR)]);

        let audit = Arc::new(MemoryAuditLog::new());
        let executor = Arc::new(TransferExecutor::new(
            store.clone(),
            Arc::new(registry),
            Arc::new(LogPublisher),
            audit.clone(),
        ));
        let originator: BatchOriginator = serde_json::from_value(json!({
            "immediate_destination": "091000019",
            "immediate_origin": "1234567890",
            "destination_name": "FIRST NATIONAL",
            "origin_name": "ESCROW PAYOUTS",
            "company_name": "ESCROW PAYOUTS",
            "company_id": "1234567890",
            "originating_dfi": "09100001",
        }))
        .unwrap();
        let settlement = BatchSettlement::new(
            BatchFileEncoder::new(originator),
            Arc::new(ArtifactStore::new(chrono::Duration::seconds(300), "/api/v1/batch-files")),
        );
        let coordinator = Arc::new(
            ReleaseCoordinator::new(store.clone(), executor, audit).with_batch_settlement(settlement),
        );
        let state = Arc::new(AppState::new(
            coordinator,
            Arc::new(HoldRegistry::new(store.clone())),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        TestServer {
            base: format!("http://{}", addr),
            store,
            processor,
            client: reqwest::Client::new(),
        }
    }

    #[tokio::test]
    async fn test_health() {
        let server = start().await;
        let resp = server
            .client
            .get(format!("{}/api/v1/health", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["code"], 0);
        assert!(body["data"]["timestamp_ms"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_release_and_conflict() {
        let server = start().await;
        server.store.upsert_account(verified_account("c1"));
        let entry = held_entry("ledger-1", "c1", 10_000);
        server.store.insert_entry(entry.clone());

        let url = format!("{}/api/v1/ledgers/ledger-1/releases", server.base);
        let resp = server
            .client
            .post(&url)
            .json(&json!({ "entry_id": entry.id, "requested_by": "ops" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["data"]["status"], "completed");
        let release_id = body["data"]["release_id"].as_str().unwrap().to_string();

        let resp = server
            .client
            .post(&url)
            .json(&json!({ "entry_id": entry.id }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 409);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["data"]["error"], "NOT_HELD");

        let resp = server
            .client
            .get(format!("{}/api/v1/releases/{}", server.base, release_id))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["data"]["rail"], PROCESSOR);

        let resp = server
            .client
            .get(format!("{}/api/v1/releases/not-a-ulid", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_queued_auto_release_is_executed_on_request() {
        let server = start().await;
        server.store.upsert_account(verified_account("c1"));
        let mut entry = held_entry("ledger-1", "c1", 10_000);
        entry.hold_until = Some(chrono::Utc::now() - chrono::Duration::hours(1));
        server.store.insert_entry(entry);

        let resp = server
            .client
            .post(format!("{}/api/v1/ledgers/ledger-1/releases/auto", server.base))
            .json(&json!({ "execute_immediately": false }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        let release_id = body["data"]["queued"][0].as_str().unwrap().to_string();
        assert_eq!(server.processor.execute_count(), 0);

        let resp = server
            .client
            .post(format!("{}/api/v1/releases/{}/execute", server.base, release_id))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["data"]["status"], "completed");
        assert_eq!(server.processor.execute_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_release_is_reported() {
        let server = start().await;
        server.store.upsert_account(verified_account("c1"));
        let entry = held_entry("ledger-1", "c1", 10_000);
        server.store.insert_entry(entry.clone());
        server
            .processor
            .set_behavior(MockBehavior::Fail("account_closed".into()));

        let resp = server
            .client
            .post(format!("{}/api/v1/ledgers/ledger-1/releases", server.base))
            .json(&json!({ "entry_id": entry.id }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 502);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["data"]["error"], "RELEASE_FAILED");
        assert!(body["msg"].as_str().unwrap().contains("account_closed"));
    }

    #[tokio::test]
    async fn test_batch_release_multi_status() {
        let server = start().await;
        server.store.upsert_account(verified_account("c1"));
        let ok_entry = held_entry("ledger-1", "c1", 1_000);
        let orphan = held_entry("ledger-1", "nobody", 1_000);
        server.store.insert_entry(ok_entry.clone());
        server.store.insert_entry(orphan.clone());

        let resp = server
            .client
            .post(format!("{}/api/v1/ledgers/ledger-1/releases/batch", server.base))
            .json(&json!({ "entry_ids": [ok_entry.id, orphan.id] }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 207);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["data"]["succeeded"], 1);
        assert_eq!(body["data"]["failed"], 1);
        assert_eq!(body["data"]["results"].as_array().unwrap().len(), 2);

        let resp = server
            .client
            .post(format!("{}/api/v1/ledgers/ledger-1/releases/batch", server.base))
            .json(&json!({ "entry_ids": [] }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_holds_and_void() {
        let server = start().await;
        let entry = held_entry("ledger-1", "c1", 2_500);
        server.store.insert_entry(entry.clone());

        let resp = server
            .client
            .get(format!(
                "{}/api/v1/ledgers/ledger-1/holds?ready_only=true&limit=10",
                server.base
            ))
            .send()
            .await
            .unwrap();
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"][0]["has_connected_account"], false);

        let resp = server
            .client
            .post(format!(
                "{}/api/v1/ledgers/ledger-1/entries/{}/void",
                server.base, entry.id
            ))
            .json(&json!({ "reason": "refunded" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["data"]["release_status"], "voided");

        let resp = server
            .client
            .get(format!("{}/api/v1/ledgers/ledger-1/holds/summary", server.base))
            .send()
            .await
            .unwrap();
        let body: Value = resp.json().await.unwrap();
        assert!(body["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_file_download_is_ledger_scoped() {
        let server = start().await;
        let mut account = verified_account("c1");
        account.preferred_rail = Some(MANUAL.into());
        server.store.upsert_account(account);
        let entry = held_entry("ledger-1", "c1", 10_000);
        server.store.insert_entry(entry.clone());

        let resp = server
            .client
            .post(format!("{}/api/v1/ledgers/ledger-1/releases", server.base))
            .json(&json!({ "entry_id": entry.id }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let resp = server
            .client
            .post(format!("{}/api/v1/ledgers/ledger-1/batch-files", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let body: Value = resp.json().await.unwrap();
        let url = body["data"]["url"].as_str().unwrap().to_string();

        let download = |ledger: Option<&'static str>| {
            let mut req = server.client.get(format!("{}{}", server.base, url));
            if let Some(ledger) = ledger {
                req = req.header("X-Ledger-Id", ledger);
            }
            req.send()
        };

        assert_eq!(download(None).await.unwrap().status(), 400);
        assert_eq!(download(Some("ledger-2")).await.unwrap().status(), 404);

        let resp = download(Some("ledger-1")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let text = resp.text().await.unwrap();
        assert!(text.lines().all(|l| l.len() == 94));
        assert!(text.contains("021000021"));
    }
}
