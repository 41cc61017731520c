//! Conversation matching: key extraction from subjects and the fail-closed
//! existence/participation check.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, error};

use crate::store::ConversationStore;

/// `[conv:<key>]`, tag case-insensitive, key 1-64 of `[A-Za-z0-9_-]`.
fn conversation_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[\s*(?i:conv)\s*:\s*([A-Za-z0-9_-]{1,64})\s*\]").expect("valid regex")
    })
}

/// Extract the conversation key embedded in a subject line.
///
/// Returns `None` for any subject without a complete, well-formed tag.
/// When several tags are present the first one wins.
pub fn extract_conversation_key(subject: &str) -> Option<String> {
    conversation_tag_re()
        .captures(subject)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Outcome of a conversation lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationCheck {
    /// Exists, is active, and (when a sender was given) the sender takes part.
    Active,
    NotFound,
    Inactive,
    NotParticipant,
    /// The lookup itself failed. Treated as "does not exist".
    StorageError(String),
}

impl ConversationCheck {
    pub fn is_active(&self) -> bool {
        matches!(self, ConversationCheck::Active)
    }

    /// Short human-readable reason, used in skip logs.
    pub fn reason(&self) -> &str {
        match self {
            ConversationCheck::Active => "active",
            ConversationCheck::NotFound => "conversation not found",
            ConversationCheck::Inactive => "conversation is not active",
            ConversationCheck::NotParticipant => "sender is not a participant",
            ConversationCheck::StorageError(_) => "storage error during lookup",
        }
    }
}

/// Confirm `conv_key` is an active conversation that `sender` takes part in.
pub async fn check_conversation(
    store: &dyn ConversationStore,
    conv_key: &str,
    sender: &str,
) -> ConversationCheck {
    lookup(store, conv_key, Some(sender)).await
}

/// Confirm `conv_key` is an active conversation, regardless of sender.
pub async fn check_conversation_by_key(
    store: &dyn ConversationStore,
    conv_key: &str,
) -> ConversationCheck {
    lookup(store, conv_key, None).await
}

async fn lookup(
    store: &dyn ConversationStore,
    conv_key: &str,
    sender: Option<&str>,
) -> ConversationCheck {
    let conversation = match store.find_conversation(conv_key).await {
        Ok(Some(conversation)) => conversation,
        Ok(None) => return ConversationCheck::NotFound,
        Err(e) => {
            error!(conv_key, error = %e, "Conversation lookup failed");
            return ConversationCheck::StorageError(e.to_string());
        }
    };

    if !conversation.active {
        return ConversationCheck::Inactive;
    }

    if let Some(sender) = sender
        && !conversation.has_participant(sender)
    {
        debug!(conv_key, sender, "Sender not among conversation participants");
        return ConversationCheck::NotParticipant;
    }

    ConversationCheck::Active
}
