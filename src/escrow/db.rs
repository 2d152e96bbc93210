//! Escrow Database Layer
//!
//! PostgreSQL implementation of [`EscrowStore`]. Every state change is a
//! CAS update (`WHERE status = expected`); multi-row changes run in one
//! transaction with the entry row locked `FOR UPDATE`. The partial unique
//! index `uq_release_requests_active_entry` backs the one-in-flight rule.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

use super::audit::{AuditRecord, AuditSink};
use super::error::EscrowError;
use super::state::{ReleaseRequestStatus, ReleaseStatus, ReleaseType};
use super::store::EscrowStore;
use super::types::{
    ConnectedAccount, EntryId, EntryType, Finalization, LedgerEntry, QueuedPayout, ReleaseId,
    ReleaseRequest,
};
use crate::batch_file::BatchPayout;
use crate::rails::{BankAccount, BankAccountType, TokenVault};

const SCHEMA: &str = include_str!("../../migrations/0001_escrow.sql");

const ENTRY_COLUMNS: &str = "id, ledger_id, account_id, venture_id, creator_id, amount, currency, \
     entry_type, release_status, hold_reason, hold_until, void_reason, created_at, status_changed_at";

const RELEASE_COLUMNS: &str = "id, entry_id, ledger_id, status, release_type, requested_by, \
     requested_rail, rail, rail_status, amount, currency, external_transfer_id, error_code, \
     error_message, created_at, completed_at";

const PAYOUT_COLUMNS: &str = "release_id, ledger_id, recipient_id, routing_number, account_number, \
     holder_name, account_type, amount_minor, queued_at, batch_file";

const ACCOUNT_COLUMNS: &str = "entity_type, entity_id, processor_account_id, banking_token_id, \
     banking_account_id, bank_routing_number, bank_account_number, bank_holder_name, \
     bank_account_type, legal_name, preferred_rail, can_receive_transfers, active";

/// Connect a pool the way the service uses it
pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;
    info!("PostgreSQL connection pool established");
    Ok(pool)
}

/// Apply the escrow schema (idempotent)
pub async fn migrate(pool: &PgPool) -> Result<(), EscrowError> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

fn parse_column<T: FromStr>(column: &str, raw: &str) -> Result<T, EscrowError> {
    raw.parse()
        .map_err(|_| EscrowError::DatabaseError(format!("Invalid {}: {}", column, raw)))
}

fn row_to_entry(row: &PgRow) -> Result<LedgerEntry, EscrowError> {
    let entry_type: String = row.try_get("entry_type")?;
    let release_status: String = row.try_get("release_status")?;
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        ledger_id: row.try_get("ledger_id")?,
        account_id: row.try_get("account_id")?,
        venture_id: row.try_get("venture_id")?,
        creator_id: row.try_get("creator_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        entry_type: parse_column::<EntryType>("entry_type", &entry_type)?,
        release_status: parse_column::<ReleaseStatus>("release_status", &release_status)?,
        hold_reason: row.try_get("hold_reason")?,
        hold_until: row.try_get("hold_until")?,
        void_reason: row.try_get("void_reason")?,
        created_at: row.try_get("created_at")?,
        status_changed_at: row.try_get("status_changed_at")?,
    })
}

fn row_to_release(row: &PgRow) -> Result<ReleaseRequest, EscrowError> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let release_type: String = row.try_get("release_type")?;
    Ok(ReleaseRequest {
        id: parse_column::<ReleaseId>("release id", &id)?,
        entry_id: row.try_get("entry_id")?,
        ledger_id: row.try_get("ledger_id")?,
        status: parse_column::<ReleaseRequestStatus>("status", &status)?,
        release_type: parse_column::<ReleaseType>("release_type", &release_type)?,
        requested_by: row.try_get("requested_by")?,
        requested_rail: row.try_get("requested_rail")?,
        rail: row.try_get("rail")?,
        rail_status: row.try_get("rail_status")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        external_transfer_id: row.try_get("external_transfer_id")?,
        error_code: row.try_get("error_code")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn account_type_name(account_type: BankAccountType) -> &'static str {
    match account_type {
        BankAccountType::Checking => "checking",
        BankAccountType::Savings => "savings",
    }
}

fn parse_account_type(raw: Option<&str>) -> BankAccountType {
    match raw {
        Some("savings") => BankAccountType::Savings,
        _ => BankAccountType::Checking,
    }
}

fn row_to_payout(row: &PgRow) -> Result<QueuedPayout, EscrowError> {
    let release_id: String = row.try_get("release_id")?;
    let account_type: String = row.try_get("account_type")?;
    let amount: i64 = row.try_get("amount_minor")?;
    Ok(QueuedPayout {
        release_id: parse_column::<ReleaseId>("release id", &release_id)?,
        ledger_id: row.try_get("ledger_id")?,
        payout: BatchPayout {
            recipient_id: row.try_get("recipient_id")?,
            bank_account: BankAccount {
                routing_number: row.try_get("routing_number")?,
                account_number: row.try_get("account_number")?,
                holder_name: row.try_get("holder_name")?,
                account_type: parse_account_type(Some(&account_type)),
            },
            amount: u64::try_from(amount)
                .map_err(|_| EscrowError::DatabaseError(format!("Invalid amount_minor: {}", amount)))?,
        },
        queued_at: row.try_get("queued_at")?,
        batch_file: row.try_get("batch_file")?,
    })
}

fn row_to_account(row: &PgRow) -> Result<ConnectedAccount, EscrowError> {
    let routing: Option<String> = row.try_get("bank_routing_number")?;
    let account_number: Option<String> = row.try_get("bank_account_number")?;
    let bank_account = match (routing, account_number) {
        (Some(routing_number), Some(account_number)) => {
            let account_type: Option<String> = row.try_get("bank_account_type")?;
            Some(BankAccount {
                routing_number,
                account_number,
                holder_name: row
                    .try_get::<Option<String>, _>("bank_holder_name")?
                    .unwrap_or_default(),
                account_type: parse_account_type(account_type.as_deref()),
            })
        }
        _ => None,
    };
    Ok(ConnectedAccount {
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        processor_account_id: row.try_get("processor_account_id")?,
        banking_token_id: row.try_get("banking_token_id")?,
        banking_account_id: row.try_get("banking_account_id")?,
        bank_account,
        legal_name: row.try_get("legal_name")?,
        preferred_rail: row.try_get("preferred_rail")?,
        can_receive_transfers: row.try_get("can_receive_transfers")?,
        active: row.try_get("active")?,
    })
}

fn status_names(statuses: &[ReleaseStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

pub struct PgEscrowStore {
    pool: PgPool,
}

impl PgEscrowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), EscrowError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl EscrowStore for PgEscrowStore {
    async fn get_entry(&self, entry_id: EntryId) -> Result<Option<LedgerEntry>, EscrowError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM ledger_entries_tb WHERE id = $1",
            ENTRY_COLUMNS
        ))
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn list_entries(
        &self,
        ledger_id: &str,
        statuses: &[ReleaseStatus],
    ) -> Result<Vec<LedgerEntry>, EscrowError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM ledger_entries_tb
            WHERE ledger_id = $1 AND release_status = ANY($2)
            ORDER BY created_at ASC, id ASC
            "#,
            ENTRY_COLUMNS
        ))
        .bind(ledger_id)
        .bind(status_names(statuses))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn list_expired_holds(
        &self,
        ledger_id: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, EscrowError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM ledger_entries_tb
            WHERE ledger_id = $1
              AND release_status = 'held'
              AND hold_until IS NOT NULL
              AND hold_until <= $2
            ORDER BY hold_until ASC, id ASC
            LIMIT $3
            "#,
            ENTRY_COLUMNS
        ))
        .bind(ledger_id)
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn find_connected_account(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<ConnectedAccount>, EscrowError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM connected_accounts_tb WHERE entity_type = $1 AND entity_id = $2",
            ACCOUNT_COLUMNS
        ))
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn find_connected_accounts(
        &self,
        entity_type: &str,
        entity_ids: &[String],
    ) -> Result<Vec<ConnectedAccount>, EscrowError> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {} FROM connected_accounts_tb WHERE entity_type = $1 AND entity_id = ANY($2)",
            ACCOUNT_COLUMNS
        ))
        .bind(entity_type)
        .bind(entity_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_account).collect()
    }

    async fn create_release(&self, release: &ReleaseRequest) -> Result<(), EscrowError> {
        let entry_key = release.entry_id.to_string();
        let mut tx = self.pool.begin().await?;

        let status: Option<String> = sqlx::query_scalar(
            "SELECT release_status FROM ledger_entries_tb WHERE id = $1 FOR UPDATE",
        )
        .bind(release.entry_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(status) = status else {
            return Err(EscrowError::EntryNotFound(entry_key));
        };

        let in_flight: Option<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM release_requests_tb
            WHERE entry_id = $1 AND status IN ('pending', 'processing')
            LIMIT 1
            "#,
        )
        .bind(release.entry_id)
        .fetch_optional(&mut *tx)
        .await?;
        if in_flight.is_some() {
            return Err(EscrowError::ReleaseInFlight(entry_key));
        }

        let status = parse_column::<ReleaseStatus>("release_status", &status)?;
        if status != ReleaseStatus::Held {
            return Err(EscrowError::NotHeld {
                entry_id: entry_key,
                status,
            });
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO release_requests_tb
                (id, entry_id, ledger_id, status, release_type, requested_by, requested_rail,
                 amount, currency, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
            "#,
        )
        .bind(release.id.to_string())
        .bind(release.entry_id)
        .bind(&release.ledger_id)
        .bind(release.status.as_str())
        .bind(release.release_type.as_str())
        .bind(&release.requested_by)
        .bind(&release.requested_rail)
        .bind(release.amount)
        .bind(&release.currency)
        .bind(release.created_at)
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(EscrowError::ReleaseInFlight(entry_key));
            }
            Err(e) => return Err(e.into()),
        }

        let updated = sqlx::query(
            r#"
            UPDATE ledger_entries_tb
            SET release_status = 'pending_release', status_changed_at = $2
            WHERE id = $1 AND release_status = 'held'
            "#,
        )
        .bind(release.entry_id)
        .bind(release.created_at)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(EscrowError::InvalidStateTransition(format!(
                "entry {} left held during release creation",
                entry_key
            )));
        }

        tx.commit().await?;
        debug!(release_id = %release.id, entry_id = %entry_key, "Release request persisted");
        Ok(())
    }

    async fn get_release(&self, release_id: ReleaseId) -> Result<Option<ReleaseRequest>, EscrowError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM release_requests_tb WHERE id = $1",
            RELEASE_COLUMNS
        ))
        .bind(release_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_release).transpose()
    }

    async fn mark_processing(&self, release_id: ReleaseId, rail: &str) -> Result<bool, EscrowError> {
        let result = sqlx::query(
            r#"
            UPDATE release_requests_tb
            SET status = 'processing', rail = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(release_id.to_string())
        .bind(rail)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_stale_releases(
        &self,
        ledger_id: &str,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ReleaseRequest>, EscrowError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM release_requests_tb
            WHERE ledger_id = $1 AND status = 'pending' AND created_at < $2
            ORDER BY created_at ASC, id ASC
            LIMIT $3
            "#,
            RELEASE_COLUMNS
        ))
        .bind(ledger_id)
        .bind(created_before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_release).collect()
    }

    async fn finalize_release(
        &self,
        release_id: ReleaseId,
        finalization: &Finalization,
        now: DateTime<Utc>,
    ) -> Result<ReleaseRequest, EscrowError> {
        let (next_status, next_entry) = match finalization {
            Finalization::Completed { .. } => (ReleaseRequestStatus::Completed, ReleaseStatus::Released),
            Finalization::Failed { .. } => (ReleaseRequestStatus::Failed, ReleaseStatus::Held),
        };
        let (external_transfer_id, rail_status, error_code, error_message) = match finalization {
            Finalization::Completed {
                external_transfer_id,
                rail_status,
                ..
            } => (external_transfer_id.clone(), Some(rail_status.clone()), None, None),
            Finalization::Failed { code, message } => {
                (None, None, Some(code.as_str().to_string()), Some(message.clone()))
            }
        };

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT entry_id, ledger_id, status FROM release_requests_tb WHERE id = $1 FOR UPDATE",
        )
            .bind(release_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Err(EscrowError::ReleaseNotFound(release_id.to_string()));
        };
        let entry_id: EntryId = row.try_get("entry_id")?;
        let ledger_id: String = row.try_get("ledger_id")?;
        let current: String = row.try_get("status")?;
        let current = parse_column::<ReleaseRequestStatus>("status", &current)?;
        if !current.can_transition_to(next_status) {
            return Err(EscrowError::InvalidStateTransition(format!(
                "release {} {} -> {}",
                release_id, current, next_status
            )));
        }

        sqlx::query(
            r#"
            UPDATE release_requests_tb
            SET status = $2,
                completed_at = $3,
                external_transfer_id = COALESCE($4, external_transfer_id),
                rail_status = COALESCE($5, rail_status),
                error_code = $6,
                error_message = $7,
                updated_at = NOW()
            WHERE id = $1 AND status = $8
            "#,
        )
        .bind(release_id.to_string())
        .bind(next_status.as_str())
        .bind(now)
        .bind(external_transfer_id)
        .bind(rail_status)
        .bind(error_code)
        .bind(error_message)
        .bind(current.as_str())
        .execute(&mut *tx)
        .await?;

        let entry_update = sqlx::query(
            r#"
            UPDATE ledger_entries_tb
            SET release_status = $2, status_changed_at = $3
            WHERE id = $1 AND release_status = 'pending_release'
            "#,
        )
        .bind(entry_id)
        .bind(next_entry.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;
        if entry_update.rows_affected() == 0 {
            // Dropping the transaction rolls back the release update
            return Err(EscrowError::InvalidStateTransition(format!(
                "entry {} is not pending_release",
                entry_id
            )));
        }

        if let Finalization::Completed {
            batch_payout: Some(payout),
            ..
        } = finalization
        {
            let amount = i64::try_from(payout.amount)
                .map_err(|_| EscrowError::DatabaseError(format!("Payout amount too large: {}", payout.amount)))?;
            sqlx::query(&format!(
                r#"
                INSERT INTO batch_payouts_tb ({})
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NULL)
                ON CONFLICT (release_id) DO NOTHING
                "#,
                PAYOUT_COLUMNS
            ))
            .bind(release_id.to_string())
            .bind(&ledger_id)
            .bind(&payout.recipient_id)
            .bind(payout.bank_account.routing_number.trim())
            .bind(payout.bank_account.account_number.trim())
            .bind(&payout.bank_account.holder_name)
            .bind(account_type_name(payout.bank_account.account_type))
            .bind(amount)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let row = sqlx::query(&format!(
            "SELECT {} FROM release_requests_tb WHERE id = $1",
            RELEASE_COLUMNS
        ))
        .bind(release_id.to_string())
        .fetch_one(&mut *tx)
        .await?;
        let release = row_to_release(&row)?;

        tx.commit().await?;
        Ok(release)
    }

    async fn record_rail_status(
        &self,
        release_id: ReleaseId,
        rail_status: &str,
    ) -> Result<bool, EscrowError> {
        let result = sqlx::query(
            r#"
            UPDATE release_requests_tb
            SET rail_status = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'completed'
            "#,
        )
        .bind(release_id.to_string())
        .bind(rail_status)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn void_entry(
        &self,
        entry_id: EntryId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, EscrowError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE ledger_entries_tb
            SET release_status = 'voided', void_reason = $2, status_changed_at = $3
            WHERE id = $1 AND release_status = 'held'
            RETURNING {}
            "#,
            ENTRY_COLUMNS
        ))
        .bind(entry_id)
        .bind(reason)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_entry(&row),
            None => match self.get_entry(entry_id).await? {
                Some(entry) => Err(EscrowError::NotHeld {
                    entry_id: entry_id.to_string(),
                    status: entry.release_status,
                }),
                None => Err(EscrowError::EntryNotFound(entry_id.to_string())),
            },
        }
    }

    async fn list_unsettled_payouts(&self, ledger_id: &str) -> Result<Vec<QueuedPayout>, EscrowError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM batch_payouts_tb
            WHERE ledger_id = $1 AND batch_file IS NULL
            ORDER BY queued_at ASC, release_id ASC
            "#,
            PAYOUT_COLUMNS
        ))
        .bind(ledger_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_payout).collect()
    }

    async fn settle_payouts(
        &self,
        ledger_id: &str,
        release_ids: &[ReleaseId],
        file_name: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EscrowError> {
        let ids: Vec<String> = release_ids.iter().map(ReleaseId::to_string).collect();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE batch_payouts_tb
            SET batch_file = $3, settled_at = $4
            WHERE ledger_id = $1 AND release_id = ANY($2) AND batch_file IS NULL
            "#,
        )
        .bind(ledger_id)
        .bind(&ids)
        .bind(file_name)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() != ids.len() as u64 {
            // Dropping the transaction rolls back the partial stamp
            return Err(EscrowError::InvalidStateTransition(format!(
                "{} of {} payouts were still queued for ledger {}",
                updated.rows_affected(),
                ids.len(),
                ledger_id
            )));
        }

        tx.commit().await?;
        debug!(ledger_id, file_name, payouts = ids.len(), "Batch payouts stamped");
        Ok(())
    }
}

/// Audit records in `escrow_audit_tb`
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditLog {
    async fn record(&self, record: AuditRecord) -> Result<(), EscrowError> {
        sqlx::query(
            r#"
            INSERT INTO escrow_audit_tb
                (id, action, ledger_id, entry_id, release_id, actor, amount, currency, rail,
                 risk_score, detail, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11::jsonb, $12)
            "#,
        )
        .bind(record.id)
        .bind(record.action.as_str())
        .bind(&record.ledger_id)
        .bind(record.entry_id)
        .bind(record.release_id.map(|id| id.to_string()))
        .bind(&record.actor)
        .bind(record.amount)
        .bind(&record.currency)
        .bind(&record.rail)
        .bind(i16::from(record.risk_score))
        .bind(record.detail.to_string())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Aggregator tokens in `banking_tokens_tb`
pub struct PgTokenVault {
    pool: PgPool,
}

impl PgTokenVault {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenVault for PgTokenVault {
    async fn access_token(&self, token_id: &str) -> Result<Option<String>, EscrowError> {
        let token = sqlx::query_scalar("SELECT access_token FROM banking_tokens_tb WHERE token_id = $1")
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(token)
    }
}
