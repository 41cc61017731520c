//! Mailbox access: the `EmailSource` seam, parsed email records, and the
//! IMAP implementation.

pub mod imap;
pub mod parse;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};

pub use imap::ImapSource;

use crate::error::MailError;

/// A parsed inbound email. Never mutated after parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailRecord {
    pub subject: String,
    pub from: String,
    pub to: String,
    pub body: String,
}

/// An email paired with the content hash used as its dedup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedEmail {
    pub email: EmailRecord,
    pub hash: String,
}

/// Anything that can hand over the batch of currently unseen emails.
///
/// Implementations must not return the same email twice within one call.
#[async_trait]
pub trait EmailSource: Send + Sync {
    async fn receive(&self) -> Result<Vec<FetchedEmail>, MailError>;
}

/// Hex-encoded SHA-256 of the raw message bytes.
pub fn content_hash(raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw);
    format!("{:x}", hasher.finalize())
}
