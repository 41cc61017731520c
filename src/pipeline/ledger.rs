//! Processed-email ledger: filter a batch against hashes already handled.

use tracing::debug;

use crate::error::DatabaseError;
use crate::mailbox::FetchedEmail;
use crate::store::ConversationStore;

/// Keep only emails whose hash is not yet in the ledger, preserving order.
///
/// Issues a single batched lookup and never writes to the ledger.
pub async fn filter_unprocessed(
    store: &dyn ConversationStore,
    emails: Vec<FetchedEmail>,
) -> Result<Vec<FetchedEmail>, DatabaseError> {
    if emails.is_empty() {
        return Ok(Vec::new());
    }

    let hashes: Vec<String> = emails.iter().map(|e| e.hash.clone()).collect();
    let processed = store.processed_hashes(&hashes).await?;

    let total = emails.len();
    let unprocessed: Vec<FetchedEmail> = emails
        .into_iter()
        .filter(|e| !processed.contains(&e.hash))
        .collect();

    debug!(
        "Filtered {} emails, {} unprocessed",
        total,
        unprocessed.len()
    );

    Ok(unprocessed)
}
