//! Persistence layer: libSQL-backed conversations, history, and the
//! processed-email ledger.

pub mod libsql_backend;
pub mod migrations;
pub mod pool;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use pool::{ConnectionPool, PooledConnection};
pub use traits::{Conversation, ConversationStore, HistoryEntry, NewHistoryEntry, SenderType};
