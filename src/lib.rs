//! convo-inbox: match inbound email to conversation threads and record
//! conversation history.

pub mod config;
pub mod error;
pub mod mailbox;
pub mod pipeline;
pub mod store;
