//! Inbound matching pipeline and outbound recording.

pub mod conversation;
pub mod ledger;
pub mod orchestrator;
pub mod outbound;

pub use conversation::{ConversationCheck, check_conversation, extract_conversation_key};
pub use orchestrator::{Orchestrator, ProcessedMessage, poll_once};
pub use outbound::{OutboundMessage, OutboundStore};
