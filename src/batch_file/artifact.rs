//! Short-lived batch file artifacts.
//!
//! Generated files contain recipient bank details, so they are only handed out
//! through an unguessable token that expires after a few minutes and is bound
//! to the ledger that generated it.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::escrow::error::EscrowError;

/// Stored file contents
#[derive(Debug, Clone)]
pub struct Artifact {
    pub ledger_id: String,
    pub file_name: String,
    pub contents: String,
    pub entry_count: usize,
    pub expires_at: DateTime<Utc>,
}

/// Download link returned to the caller
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactLink {
    pub token: String,
    pub url: String,
    pub file_name: String,
    pub entry_count: usize,
    pub expires_at: DateTime<Utc>,
}

/// Thread-safe in-memory artifact store.
pub struct ArtifactStore {
    artifacts: DashMap<String, Artifact>,
    ttl: Duration,
    url_prefix: String,
}

impl ArtifactStore {
    pub fn new(ttl: Duration, url_prefix: impl Into<String>) -> Self {
        Self {
            artifacts: DashMap::new(),
            ttl,
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    /// Store a file and return its link
    pub fn put(
        &self,
        ledger_id: &str,
        file_name: String,
        contents: String,
        entry_count: usize,
        now: DateTime<Utc>,
    ) -> ArtifactLink {
        let token = Uuid::new_v4().simple().to_string();
        let expires_at = now + self.ttl;
        self.artifacts.insert(
            token.clone(),
            Artifact {
                ledger_id: ledger_id.to_string(),
                file_name: file_name.clone(),
                contents,
                entry_count,
                expires_at,
            },
        );
        ArtifactLink {
            url: format!("{}/{}", self.url_prefix, token),
            token,
            file_name,
            entry_count,
            expires_at,
        }
    }

    /// Fetch an artifact for `ledger_id`.
    ///
    /// Unknown, expired and foreign-ledger tokens are indistinguishable to the
    /// caller. Expired artifacts are dropped on access.
    pub fn fetch(&self, token: &str, ledger_id: &str, now: DateTime<Utc>) -> Result<Artifact, EscrowError> {
        let expired = match self.artifacts.get(token) {
            None => return Err(EscrowError::ArtifactNotFound),
            Some(artifact) if artifact.expires_at <= now => true,
            Some(artifact) if artifact.ledger_id != ledger_id => {
                return Err(EscrowError::ArtifactNotFound);
            }
            Some(artifact) => return Ok(artifact.clone()),
        };
        if expired {
            self.artifacts.remove(token);
        }
        Err(EscrowError::ArtifactNotFound)
    }

    /// Drop every expired artifact, returning how many were removed
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.artifacts.len();
        self.artifacts.retain(|_, artifact| artifact.expires_at > now);
        before - self.artifacts.len()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}
