//! `ConversationStore` trait: the storage seam used by the pipeline.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DatabaseError;

/// Who authored a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SenderType {
    /// Inbound mail from a conversation participant.
    #[serde(rename = "human")]
    Human,
    /// Automated reply.
    #[default]
    #[serde(rename = "AI")]
    Ai,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::Human => "human",
            SenderType::Ai => "AI",
        }
    }
}

impl fmt::Display for SenderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SenderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("human") {
            Ok(SenderType::Human)
        } else if s.eq_ignore_ascii_case("ai") {
            Ok(SenderType::Ai)
        } else {
            Err(format!("unknown sender type: {s}"))
        }
    }
}

/// A conversation as seen by this system (read-only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub conv_key: String,
    pub active: bool,
    pub participants: Vec<String>,
}

impl Conversation {
    /// Whether `address` is one of the participants (ASCII case-insensitive).
    pub fn has_participant(&self, address: &str) -> bool {
        let address = address.trim();
        self.participants
            .iter()
            .any(|p| p.trim().eq_ignore_ascii_case(address))
    }
}

/// A history row to be written. The timestamp is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewHistoryEntry {
    pub conv_key: String,
    pub sender: String,
    pub recipient: String,
    pub sender_type: SenderType,
    pub content: String,
    pub attachment: Option<String>,
}

/// A persisted history row.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: String,
    pub conv_key: String,
    pub sender: String,
    pub recipient: String,
    pub sender_type: SenderType,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub attachment: Option<String>,
}

/// Backend-agnostic storage for conversations, history, and the
/// processed-email ledger.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    // ── Conversations ───────────────────────────────────────────────

    /// Look up a conversation and its participants by key.
    async fn find_conversation(
        &self,
        conv_key: &str,
    ) -> Result<Option<Conversation>, DatabaseError>;

    // ── History ─────────────────────────────────────────────────────

    /// Append one history row. Returns the generated row ID.
    async fn append_history(&self, entry: &NewHistoryEntry) -> Result<String, DatabaseError>;

    /// List history for a conversation, oldest first.
    async fn list_history(&self, conv_key: &str) -> Result<Vec<HistoryEntry>, DatabaseError>;

    // ── Processed-email ledger ──────────────────────────────────────

    /// Return the subset of `hashes` already present in the ledger.
    async fn processed_hashes(&self, hashes: &[String]) -> Result<HashSet<String>, DatabaseError>;

    /// Whether a single hash is already in the ledger.
    async fn is_processed(&self, hash: &str) -> Result<bool, DatabaseError> {
        let found = self.processed_hashes(&[hash.to_string()]).await?;
        Ok(found.contains(hash))
    }

    /// Record a hash as processed. Returns `false` if it was already present.
    async fn mark_processed(&self, hash: &str) -> Result<bool, DatabaseError>;

    /// Total number of hashes in the ledger.
    async fn processed_count(&self) -> Result<u64, DatabaseError>;
}
