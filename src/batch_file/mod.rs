//! Fixed-Width Batch File
//!
//! Encodes payouts into a 94-character positional settlement file:
//!
//! ```text
//! 1  file header
//! 5  batch header
//! 6  entry detail        (one per payout)
//! 8  batch control       (count, entry hash, totals)
//! 9  file control        (batch/block/entry counts, hash, totals)
//! 9999…                  filler until line count % 10 == 0
//! ```
//!
//! Downstream parsers are positional: every field is padded or truncated to
//! its exact column width, numbers with zeros and text with spaces.

pub mod artifact;
pub mod fields;

pub use artifact::{Artifact, ArtifactLink, ArtifactStore};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rails::{BankAccount, BankAccountType};
use fields::{alpha, alpha_right, digits, numeric, numeric_mod};

/// Length of every record
pub const RECORD_SIZE: usize = 94;
/// Records per block
pub const BLOCKING_FACTOR: usize = 10;
/// Largest amount an entry detail record can carry (10 digits)
pub const MAX_ENTRY_AMOUNT: u64 = 9_999_999_999;

/// Service class code: credits only
const SERVICE_CLASS_CREDITS: &str = "220";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchFileError {
    #[error("Batch file needs at least one payout")]
    Empty,

    #[error("Invalid {field}: {value:?} must be all digits and fit the column")]
    InvalidDigits { field: &'static str, value: String },

    #[error("Value {value} does not fit field {field}")]
    FieldOverflow { field: &'static str, value: u64 },

    #[error("Missing account number for recipient {0}")]
    MissingAccountNumber(String),

    #[error("Amount must be positive for recipient {0}")]
    ZeroAmount(String),

    #[error("File id modifier must be A-Z or 0-9, got {0:?}")]
    InvalidFileIdModifier(char),
}

/// Originator identifiers printed in the header and control records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOriginator {
    /// Routing number of the receiving point (9 digits)
    pub immediate_destination: String,
    /// Originator identification (up to 10 characters)
    pub immediate_origin: String,
    pub destination_name: String,
    pub origin_name: String,
    pub company_name: String,
    /// Company identification (up to 10 characters)
    pub company_id: String,
    /// First 8 digits of the originating bank's routing number
    pub originating_dfi: String,
    #[serde(default = "default_sec_code")]
    pub sec_code: String,
    #[serde(default = "default_entry_description")]
    pub entry_description: String,
    #[serde(default)]
    pub company_discretionary_data: String,
    #[serde(default)]
    pub reference_code: String,
}

fn default_sec_code() -> String {
    "PPD".to_string()
}

fn default_entry_description() -> String {
    "PAYOUT".to_string()
}

/// One payout line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPayout {
    pub recipient_id: String,
    pub bank_account: BankAccount,
    /// Minor units
    pub amount: u64,
}

impl BatchPayout {
    /// Check everything an entry detail record needs from this payout.
    /// Returns the routing number as printed.
    pub fn validate(&self) -> Result<String, BatchFileError> {
        let routing = self.bank_account.routing_number.trim();
        if routing.len() != 9 {
            return Err(BatchFileError::InvalidDigits {
                field: "routing_number",
                value: routing.to_string(),
            });
        }
        let routing = digits(routing, 9, "routing_number")?;
        if self.bank_account.account_number.trim().is_empty() {
            return Err(BatchFileError::MissingAccountNumber(self.recipient_id.clone()));
        }
        if self.amount == 0 {
            return Err(BatchFileError::ZeroAmount(self.recipient_id.clone()));
        }
        if self.amount > MAX_ENTRY_AMOUNT {
            return Err(BatchFileError::FieldOverflow {
                field: "amount",
                value: self.amount,
            });
        }
        Ok(routing)
    }
}

/// Per-file options
#[derive(Debug, Clone)]
pub struct BatchFileOptions {
    pub created_at: DateTime<Utc>,
    pub effective_date: NaiveDate,
    pub file_id_modifier: char,
    pub batch_number: u32,
}

impl BatchFileOptions {
    /// Today, effective next day, modifier `A`, batch 1
    pub fn now() -> Self {
        let created_at = Utc::now();
        Self {
            created_at,
            effective_date: created_at.date_naive().succ_opt().unwrap_or(created_at.date_naive()),
            file_id_modifier: 'A',
            batch_number: 1,
        }
    }
}

/// Encoded file plus the control totals written into it
#[derive(Debug, Clone)]
pub struct BatchFile {
    pub lines: Vec<String>,
    pub entry_count: usize,
    pub entry_hash: u64,
    pub total_credit: u64,
    pub block_count: usize,
}

impl BatchFile {
    /// Records joined with `\n`, terminated by a newline
    pub fn contents(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

/// Hash contribution of a routing number: its first eight significant digits
fn routing_hash_part(routing: &str) -> u64 {
    routing
        .trim_start_matches('0')
        .bytes()
        .take(8)
        .fold(0u64, |acc, b| acc * 10 + u64::from(b - b'0'))
}

pub struct BatchFileEncoder {
    originator: BatchOriginator,
}

impl BatchFileEncoder {
    pub fn new(originator: BatchOriginator) -> Self {
        Self { originator }
    }

    pub fn originator(&self) -> &BatchOriginator {
        &self.originator
    }

    pub fn encode(
        &self,
        payouts: &[BatchPayout],
        options: &BatchFileOptions,
    ) -> Result<BatchFile, BatchFileError> {
        if payouts.is_empty() {
            return Err(BatchFileError::Empty);
        }
        let modifier = options.file_id_modifier;
        if !(modifier.is_ascii_uppercase() || modifier.is_ascii_digit()) {
            return Err(BatchFileError::InvalidFileIdModifier(modifier));
        }
        let originating_dfi = digits(&self.originator.originating_dfi, 8, "originating_dfi")?;
        let batch_number = numeric(u64::from(options.batch_number), 7, "batch_number")?;

        let mut lines = vec![
            self.file_header(options)?,
            self.batch_header(options, &originating_dfi, &batch_number),
        ];

        let mut entry_hash: u64 = 0;
        let mut total_credit: u64 = 0;
        for (index, payout) in payouts.iter().enumerate() {
            let routing = payout.validate()?;
            entry_hash = (entry_hash + routing_hash_part(&routing)) % 10_000_000_000;
            total_credit = total_credit
                .checked_add(payout.amount)
                .ok_or(BatchFileError::FieldOverflow {
                    field: "total_credit",
                    value: u64::MAX,
                })?;
            lines.push(self.entry_detail(payout, &routing, &originating_dfi, index as u64 + 1)?);
        }

        let entry_count = payouts.len();
        let totals = numeric(total_credit, 12, "total_credit")?;

        // Batch control
        lines.push(format!(
            "8{}{}{}{}{}{}{}{}{}{}",
            SERVICE_CLASS_CREDITS,
            numeric(entry_count as u64, 6, "entry_count")?,
            numeric_mod(entry_hash, 10),
            numeric(0, 12, "total_debit")?,
            totals,
            alpha(&self.originator.company_id, 10),
            alpha("", 19),
            alpha("", 6),
            originating_dfi,
            batch_number,
        ));

        // File control: the four records above plus entries, then pad to whole blocks
        let record_count = lines.len() + 1;
        let block_count = record_count.div_ceil(BLOCKING_FACTOR);
        lines.push(format!(
            "9{}{}{}{}{}{}{}",
            numeric(1, 6, "batch_count")?,
            numeric(block_count as u64, 6, "block_count")?,
            numeric(entry_count as u64, 8, "entry_count")?,
            numeric_mod(entry_hash, 10),
            numeric(0, 12, "total_debit")?,
            totals,
            alpha("", 39),
        ));

        while lines.len() % BLOCKING_FACTOR != 0 {
            lines.push("9".repeat(RECORD_SIZE));
        }

        debug_assert!(lines.iter().all(|l| l.len() == RECORD_SIZE));

        Ok(BatchFile {
            lines,
            entry_count,
            entry_hash,
            total_credit,
            block_count,
        })
    }

    fn file_header(&self, options: &BatchFileOptions) -> Result<String, BatchFileError> {
        let destination = digits(&self.originator.immediate_destination, 9, "immediate_destination")?;
        Ok(format!(
            "101{}{}{}{}{}{:03}{:02}1{}{}{}",
            alpha_right(&destination, 10),
            alpha_right(&self.originator.immediate_origin, 10),
            options.created_at.format("%y%m%d"),
            options.created_at.format("%H%M"),
            options.file_id_modifier,
            RECORD_SIZE,
            BLOCKING_FACTOR,
            alpha(&self.originator.destination_name, 23),
            alpha(&self.originator.origin_name, 23),
            alpha(&self.originator.reference_code, 8),
        ))
    }

    fn batch_header(
        &self,
        options: &BatchFileOptions,
        originating_dfi: &str,
        batch_number: &str,
    ) -> String {
        format!(
            "5{}{}{}{}{}{}{}{}{}1{}{}",
            SERVICE_CLASS_CREDITS,
            alpha(&self.originator.company_name, 16),
            alpha(&self.originator.company_discretionary_data, 20),
            alpha(&self.originator.company_id, 10),
            alpha(&self.originator.sec_code, 3),
            alpha(&self.originator.entry_description, 10),
            options.created_at.format("%y%m%d"),
            options.effective_date.format("%y%m%d"),
            alpha("", 3),
            originating_dfi,
            batch_number,
        )
    }

    fn entry_detail(
        &self,
        payout: &BatchPayout,
        routing: &str,
        originating_dfi: &str,
        sequence: u64,
    ) -> Result<String, BatchFileError> {
        let account = &payout.bank_account;
        let transaction_code = match account.account_type {
            BankAccountType::Checking => "22",
            BankAccountType::Savings => "32",
        };

        Ok(format!(
            "6{}{}{}{}{}{}{}0{}{}",
            transaction_code,
            routing,
            alpha(account.account_number.trim(), 17),
            numeric(payout.amount, 10, "amount")?,
            alpha(&payout.recipient_id, 15),
            alpha(&account.holder_name, 22),
            alpha("", 2),
            originating_dfi,
            numeric(sequence, 7, "trace_sequence")?,
        ))
    }
}
