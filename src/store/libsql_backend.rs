//! libSQL backend: `ConversationStore` over a [`ConnectionPool`].
//!
//! Every trait method checks out its own connection and lets the guard
//! return it when the method returns.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params;
use libsql::params::Params;
use tracing::debug;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::pool::ConnectionPool;
use crate::store::traits::{
    Conversation, ConversationStore, HistoryEntry, NewHistoryEntry, SenderType,
};

/// SQLite caps bound parameters per statement; stay well under it.
const LOOKUP_CHUNK: usize = 500;

const HISTORY_COLUMNS: &str =
    "id, conv_key, sender, recipient, sender_type, content, timestamp, attachment";

pub struct LibSqlStore {
    pool: Arc<ConnectionPool>,
}

impl LibSqlStore {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Map a libsql Row to a HistoryEntry. Column order matches HISTORY_COLUMNS.
fn row_to_history(row: &libsql::Row) -> Result<HistoryEntry, DatabaseError> {
    let column = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));

    let sender_type_str: String = row.get(4).map_err(column)?;
    let sender_type = sender_type_str
        .parse::<SenderType>()
        .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
    let timestamp_str: String = row.get(6).map_err(column)?;
    let attachment = match row.get_value(7).map_err(column)? {
        libsql::Value::Null => None,
        libsql::Value::Text(s) => Some(s),
        other => {
            return Err(DatabaseError::Query(format!(
                "row parse: attachment is not text: {other:?}"
            )));
        }
    };

    Ok(HistoryEntry {
        id: row.get(0).map_err(column)?,
        conv_key: row.get(1).map_err(column)?,
        sender: row.get(2).map_err(column)?,
        recipient: row.get(3).map_err(column)?,
        sender_type,
        content: row.get(5).map_err(column)?,
        timestamp: parse_datetime(&timestamp_str),
        attachment,
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl ConversationStore for LibSqlStore {
    async fn find_conversation(
        &self,
        conv_key: &str,
    ) -> Result<Option<Conversation>, DatabaseError> {
        let conn = self.pool.checkout()?;

        let mut rows = conn
            .query(
                "SELECT status FROM conversations WHERE conv_key = ?1",
                params![conv_key],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_conversation: {e}")))?;

        let status: String = match rows.next().await {
            Ok(Some(row)) => row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            Ok(None) => return Ok(None),
            Err(e) => return Err(DatabaseError::Query(format!("find_conversation: {e}"))),
        };

        let mut rows = conn
            .query(
                "SELECT address FROM conversation_participants WHERE conv_key = ?1 ORDER BY address",
                params![conv_key],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_conversation participants: {e}")))?;

        let mut participants = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => participants.push(
                    row.get::<String>(0)
                        .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
                ),
                Ok(None) => break,
                Err(e) => {
                    return Err(DatabaseError::Query(format!(
                        "find_conversation participants: {e}"
                    )));
                }
            }
        }

        Ok(Some(Conversation {
            conv_key: conv_key.to_string(),
            active: status.eq_ignore_ascii_case("active"),
            participants,
        }))
    }

    async fn append_history(&self, entry: &NewHistoryEntry) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let conn = self.pool.checkout()?;

        conn.execute(
            "INSERT INTO conversation_history
                (id, sender, recipient, sender_type, content, timestamp, attachment, conv_key)
             VALUES (?1, ?2, ?3, ?4, ?5, strftime('%Y-%m-%d %H:%M:%f', 'now'), ?6, ?7)",
            params![
                id.clone(),
                entry.sender.as_str(),
                entry.recipient.as_str(),
                entry.sender_type.as_str(),
                entry.content.as_str(),
                opt_text(entry.attachment.as_deref()),
                entry.conv_key.as_str(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("append_history: {e}")))?;

        debug!(id = %id, conv_key = %entry.conv_key, "History entry inserted");
        Ok(id)
    }

    async fn list_history(&self, conv_key: &str) -> Result<Vec<HistoryEntry>, DatabaseError> {
        let conn = self.pool.checkout()?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {HISTORY_COLUMNS} FROM conversation_history
                     WHERE conv_key = ?1 ORDER BY timestamp ASC, rowid ASC"
                ),
                params![conv_key],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_history: {e}")))?;

        let mut entries = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => entries.push(row_to_history(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("list_history: {e}"))),
            }
        }
        Ok(entries)
    }

    async fn processed_hashes(&self, hashes: &[String]) -> Result<HashSet<String>, DatabaseError> {
        let mut found = HashSet::new();
        if hashes.is_empty() {
            return Ok(found);
        }

        let conn = self.pool.checkout()?;
        for chunk in hashes.chunks(LOOKUP_CHUNK) {
            let placeholders = (1..=chunk.len())
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ");
            let values = chunk
                .iter()
                .map(|h| libsql::Value::Text(h.clone()))
                .collect();

            let mut rows = conn
                .query(
                    &format!("SELECT hash FROM processed_emails WHERE hash IN ({placeholders})"),
                    Params::Positional(values),
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("processed_hashes: {e}")))?;

            loop {
                match rows.next().await {
                    Ok(Some(row)) => {
                        found.insert(
                            row.get::<String>(0)
                                .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
                        );
                    }
                    Ok(None) => break,
                    Err(e) => return Err(DatabaseError::Query(format!("processed_hashes: {e}"))),
                }
            }
        }

        Ok(found)
    }

    async fn mark_processed(&self, hash: &str) -> Result<bool, DatabaseError> {
        let conn = self.pool.checkout()?;
        let inserted = conn
            .execute(
                "INSERT INTO processed_emails (hash) VALUES (?1) ON CONFLICT(hash) DO NOTHING",
                params![hash],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_processed: {e}")))?;

        Ok(inserted > 0)
    }

    async fn processed_count(&self) -> Result<u64, DatabaseError> {
        let conn = self.pool.checkout()?;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM processed_emails", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("processed_count: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(count.max(0) as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("processed_count: {e}"))),
        }
    }
}
