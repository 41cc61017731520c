//! Outbound message store: record replies sent into an existing
//! conversation.

use std::sync::Arc;

use tracing::{error, info};

use crate::error::OutboundError;
use crate::pipeline::conversation::{ConversationCheck, check_conversation_by_key};
use crate::store::{ConversationStore, NewHistoryEntry, SenderType};

/// A reply to be recorded against a conversation.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub conv_key: String,
    pub recipient: String,
    pub content: String,
    /// Falls back to the store's default sender when `None`.
    pub sender: Option<String>,
    pub sender_type: SenderType,
    pub attachment: Option<String>,
}

impl OutboundMessage {
    pub fn new(
        conv_key: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            conv_key: conv_key.into(),
            recipient: recipient.into(),
            content: content.into(),
            sender: None,
            sender_type: SenderType::default(),
            attachment: None,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_sender_type(mut self, sender_type: SenderType) -> Self {
        self.sender_type = sender_type;
        self
    }

    pub fn with_attachment(mut self, attachment: impl Into<String>) -> Self {
        self.attachment = Some(attachment.into());
        self
    }
}

pub struct OutboundStore {
    store: Arc<dyn ConversationStore>,
    default_sender: String,
}

impl OutboundStore {
    pub fn new(store: Arc<dyn ConversationStore>, default_sender: impl Into<String>) -> Self {
        Self {
            store,
            default_sender: default_sender.into(),
        }
    }

    /// Verify the conversation is active, then append one history row.
    ///
    /// Nothing is written on failure. Returns the new row ID.
    pub async fn store_sent_message(&self, message: OutboundMessage) -> Result<String, OutboundError> {
        let check = check_conversation_by_key(self.store.as_ref(), &message.conv_key).await;
        if check != ConversationCheck::Active {
            error!(
                conv_key = %message.conv_key,
                reason = check.reason(),
                "Conversation unavailable, message not stored"
            );
            return Err(OutboundError::ConversationUnavailable {
                conv_key: message.conv_key,
                reason: check.reason().to_string(),
            });
        }

        let entry = NewHistoryEntry {
            conv_key: message.conv_key,
            sender: message
                .sender
                .unwrap_or_else(|| self.default_sender.clone()),
            recipient: message.recipient,
            sender_type: message.sender_type,
            content: message.content,
            attachment: message.attachment,
        };

        match self.store.append_history(&entry).await {
            Ok(id) => {
                info!(id = %id, conv_key = %entry.conv_key, "Message stored for conversation");
                Ok(id)
            }
            Err(e) => {
                error!(conv_key = %entry.conv_key, error = %e, "Error storing message");
                Err(e.into())
            }
        }
    }
}
