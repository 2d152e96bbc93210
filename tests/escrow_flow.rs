//! Escrow release flows through the public API, on the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use escrow_payouts::batch_file::{ArtifactStore, BatchFileEncoder, BatchOriginator};
use escrow_payouts::escrow::types::{EntryType, RECIPIENT_ENTITY_TYPE};
use escrow_payouts::escrow::{
    BatchSettlement, ConnectedAccount, EscrowError, EscrowStore, HoldFilter, HoldRegistry,
    LedgerEntry, LogPublisher, MemoryAuditLog, MemoryStore, ReleaseCoordinator, ReleaseStatus,
    TransferExecutor,
};
use escrow_payouts::rails::{
    BankAccount, BankAccountType, ConfigValidation, MANUAL, ManualBatchFileRail,
    PROCESSOR, Payout, RailAdapter, RailConfig, RailRegistry, TransferResult,
};

const LEDGER: &str = "ledger-main";

/// Processor stand-in that completes every transfer
#[derive(Default)]
struct InstantProcessor {
    calls: AtomicUsize,
}

#[async_trait]
impl RailAdapter for InstantProcessor {
    fn name(&self) -> &'static str {
        PROCESSOR
    }

    async fn execute(&self, payout: &Payout, _config: &RailConfig) -> TransferResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        TransferResult::completed(format!("tr_{}", payout.release_id))
    }

    async fn get_status(&self, external_id: &str, _config: &RailConfig) -> TransferResult {
        TransferResult::completed(external_id)
    }

    fn validate_config(&self, _config: &RailConfig) -> ConfigValidation {
        ConfigValidation::from_errors(Vec::new())
    }
}

struct Service {
    store: Arc<MemoryStore>,
    processor: Arc<InstantProcessor>,
    coordinator: ReleaseCoordinator,
    holds: HoldRegistry,
}

fn service() -> Service {
    let store = Arc::new(MemoryStore::new());
    let processor = Arc::new(InstantProcessor::default());

    let mut registry = RailRegistry::new();
    registry.register(processor.clone());
    registry.register(Arc::new(ManualBatchFileRail::new()));
    registry.configure_ledger(LEDGER, vec![RailConfig::new(PROCESSOR)]);

    let audit = Arc::new(MemoryAuditLog::new());
    let executor = Arc::new(TransferExecutor::new(
        store.clone(),
        Arc::new(registry),
        Arc::new(LogPublisher),
        audit.clone(),
    ));
    let originator: BatchOriginator = serde_json::from_value(serde_json::json!({
        "immediate_destination": "091000019",
        "immediate_origin": "1234567890",
        "destination_name": "FIRST NATIONAL",
        "origin_name": "ESCROW PAYOUTS",
        "company_name": "ESCROW PAYOUTS",
        "company_id": "1234567890",
        "originating_dfi": "09100001",
    }))
    .unwrap();
    let coordinator = ReleaseCoordinator::new(store.clone(), executor, audit).with_batch_settlement(
        BatchSettlement::new(
            BatchFileEncoder::new(originator),
            Arc::new(ArtifactStore::new(Duration::seconds(300), "/api/v1/batch-files")),
        ),
    );
    let holds = HoldRegistry::new(store.clone());

    Service {
        store,
        processor,
        coordinator,
        holds,
    }
}

fn entry(creator: &str, cents: i64, hold_until: Option<chrono::DateTime<Utc>>) -> LedgerEntry {
    LedgerEntry {
        id: Uuid::new_v4(),
        ledger_id: LEDGER.into(),
        account_id: "escrow-liability".into(),
        venture_id: Some("venture-a".into()),
        creator_id: Some(creator.into()),
        amount: Decimal::new(cents, 2),
        currency: "USD".into(),
        entry_type: EntryType::Credit,
        release_status: ReleaseStatus::Held,
        hold_reason: Some("chargeback window".into()),
        hold_until,
        void_reason: None,
        created_at: Utc::now(),
        status_changed_at: None,
    }
}

fn account(creator: &str, preferred_rail: Option<&str>) -> ConnectedAccount {
    ConnectedAccount {
        entity_type: RECIPIENT_ENTITY_TYPE.into(),
        entity_id: creator.into(),
        processor_account_id: Some(format!("acct_{}", creator)),
        banking_token_id: None,
        banking_account_id: None,
        bank_account: Some(BankAccount {
            routing_number: "021000021".into(),
            account_number: "000123456789".into(),
            holder_name: "Grace Hopper".into(),
            account_type: BankAccountType::Checking,
        }),
        legal_name: Some("Grace Hopper".into()),
        preferred_rail: preferred_rail.map(str::to_string),
        can_receive_transfers: true,
        active: true,
    }
}

#[tokio::test]
async fn test_auto_release_pays_only_expired_holds() {
    let svc = service();
    svc.store.upsert_account(account("creator-1", None));

    let expired = entry("creator-1", 10_000, Some(Utc::now() - Duration::days(1)));
    let waiting = entry("creator-1", 5_000, Some(Utc::now() + Duration::days(7)));
    svc.store.insert_entry(expired.clone());
    svc.store.insert_entry(waiting.clone());

    let report = svc.coordinator.auto_release_sweep(LEDGER, 50, true).await.unwrap();
    assert_eq!(report.eligible, 1);
    assert_eq!(report.executed.as_ref().map(|r| r.succeeded), Some(1));
    assert_eq!(svc.processor.calls.load(Ordering::SeqCst), 1);

    let expired = svc.store.get_entry(expired.id).await.unwrap().unwrap();
    assert_eq!(expired.release_status, ReleaseStatus::Released);

    let held = svc
        .holds
        .list_held(
            &HoldFilter {
                ledger_id: LEDGER.into(),
                ..Default::default()
            },
            Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].entry_id, waiting.id);
    assert!(!held[0].is_ready);
}

#[tokio::test]
async fn test_voided_entry_cannot_be_released() {
    let svc = service();
    svc.store.upsert_account(account("creator-1", None));
    let e = entry("creator-1", 2_000, None);
    svc.store.insert_entry(e.clone());

    svc.coordinator
        .void_release(LEDGER, e.id, "refund issued", Some("support".into()))
        .await
        .unwrap();

    let err = svc.coordinator.release(LEDGER, e.id, None, None).await.unwrap_err();
    assert!(matches!(err, EscrowError::NotHeld { status: ReleaseStatus::Voided, .. }));
    assert_eq!(err.http_status(), 409);
    assert_eq!(svc.processor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_manual_rail_settles_through_batch_file() {
    let svc = service();
    svc.store.upsert_account(account("creator-1", Some(MANUAL)));
    let e = entry("creator-1", 10_000, None);
    svc.store.insert_entry(e.clone());

    let outcome = svc.coordinator.release(LEDGER, e.id, None, None).await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.rail.as_deref(), Some(MANUAL));
    assert_eq!(svc.processor.calls.load(Ordering::SeqCst), 0);

    let link = svc.coordinator.generate_batch_file(LEDGER, None).await.unwrap();
    assert_eq!(link.entry_count, 1);

    let file = svc.coordinator.fetch_batch_file(&link.token, LEDGER).unwrap();
    let lines: Vec<&str> = file.contents.lines().collect();
    assert_eq!(lines.len() % 10, 0);
    assert!(lines.iter().all(|l| l.len() == 94));

    let detail = lines.iter().find(|l| l.starts_with('6')).unwrap();
    assert_eq!(&detail[3..12], "021000021");
    assert_eq!(&detail[29..39], "0000010000");
    assert_eq!(&detail[12..29], "000123456789     ");
}
