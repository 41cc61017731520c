//! Poll-process-drain cycle.
//!
//! One run:
//! 1. Fetch unseen emails from the `EmailSource`
//! 2. Drop those already in the processed-email ledger
//! 3. For each remaining email, in arrival order: extract the conversation
//!    key, check the conversation, append to history on success
//! 4. Mark every attempted email's hash as processed, whatever the outcome
//!
//! Failures on a single email are logged and never stop the batch.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::InboxConfig;
use crate::error::Result;
use crate::mailbox::{EmailSource, FetchedEmail};
use crate::pipeline::conversation::{check_conversation, extract_conversation_key};
use crate::pipeline::ledger::filter_unprocessed;
use crate::store::{ConnectionPool, ConversationStore, LibSqlStore, NewHistoryEntry, SenderType};

/// Summary of an inbound email appended to conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedMessage {
    pub conversation_key: String,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl fmt::Display for ProcessedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Conversation Key: {}", self.conversation_key)?;
        writeln!(f, "Sender: {}", self.sender)?;
        writeln!(f, "Recipient: {}", self.recipient)?;
        writeln!(f, "Subject: {}", self.subject)?;
        write!(f, "Body: {}", self.body)
    }
}

pub struct Orchestrator {
    store: Arc<dyn ConversationStore>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Run one cycle against `source` and return the appended messages.
    ///
    /// Errors only when the source cannot be read or the ledger lookup
    /// fails; both abort the run before any email is touched.
    pub async fn run(&self, source: &dyn EmailSource) -> Result<Vec<ProcessedMessage>> {
        let emails = source.receive().await?;
        info!(count = emails.len(), "New emails checked");

        if emails.is_empty() {
            info!("No emails in the inbox");
            return Ok(Vec::new());
        }

        let unprocessed = filter_unprocessed(self.store.as_ref(), emails).await?;
        info!(count = unprocessed.len(), "Unprocessed emails filtered");

        if unprocessed.is_empty() {
            info!("No new emails to process");
            return Ok(Vec::new());
        }

        let mut processed = Vec::new();
        for fetched in &unprocessed {
            if let Some(message) = self.process_email(fetched).await {
                processed.push(message);
            }
            self.mark_processed(&fetched.hash).await;
        }

        info!(
            attempted = unprocessed.len(),
            appended = processed.len(),
            "Poll run complete"
        );
        Ok(processed)
    }

    /// Match one email to its conversation and append it to history.
    async fn process_email(&self, fetched: &FetchedEmail) -> Option<ProcessedMessage> {
        let email = &fetched.email;
        info!(
            hash = %fetched.hash,
            sender = %email.from,
            subject = %email.subject,
            "Processing email"
        );

        let Some(conv_key) = extract_conversation_key(&email.subject) else {
            warn!(hash = %fetched.hash, subject = %email.subject, "No conversation key found in subject");
            return None;
        };

        let check = check_conversation(self.store.as_ref(), &conv_key, &email.from).await;
        if !check.is_active() {
            warn!(
                conv_key = %conv_key,
                sender = %email.from,
                reason = check.reason(),
                "No active conversation for key and sender"
            );
            return None;
        }

        let entry = NewHistoryEntry {
            conv_key: conv_key.clone(),
            sender: email.from.clone(),
            recipient: email.to.clone(),
            sender_type: SenderType::Human,
            content: email.body.clone(),
            attachment: None,
        };

        match self.store.append_history(&entry).await {
            Ok(id) => {
                info!(id = %id, conv_key = %conv_key, "Appended email to conversation history");
                Some(ProcessedMessage {
                    conversation_key: conv_key,
                    sender: email.from.clone(),
                    recipient: email.to.clone(),
                    subject: email.subject.clone(),
                    body: email.body.clone(),
                })
            }
            Err(e) => {
                error!(conv_key = %conv_key, error = %e, "Failed to append email to history");
                None
            }
        }
    }

    async fn mark_processed(&self, hash: &str) {
        match self.store.mark_processed(hash).await {
            Ok(true) => info!(hash, "Email hash marked processed"),
            Ok(false) => warn!(hash, "Email hash was already marked processed"),
            Err(e) => error!(hash, error = %e, "Failed to mark email hash processed"),
        }
    }
}

/// Open storage from `config`, run one cycle, and close the pool.
///
/// A pool that cannot be initialized ends the run with an empty result
/// before the source is contacted.
pub async fn poll_once(
    config: &InboxConfig,
    source: &dyn EmailSource,
) -> Result<Vec<ProcessedMessage>> {
    let pool = match ConnectionPool::open(&config.database).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "Failed to initialize the database connection pool");
            return Ok(Vec::new());
        }
    };

    let store = Arc::new(LibSqlStore::new(Arc::clone(&pool)));
    let result = Orchestrator::new(store).run(source).await;
    pool.close();
    result
}
