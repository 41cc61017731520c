//! Integration tests for the poll-process-drain cycle.
//!
//! Each test builds a file-backed libSQL store in a temp dir, feeds raw
//! RFC 822 messages through a scripted `EmailSource`, and checks what ends
//! up in conversation history and the processed-email ledger.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use libsql::params;

use convo_inbox::config::DatabaseConfig;
use convo_inbox::error::MailError;
use convo_inbox::mailbox::parse::parse_fetched;
use convo_inbox::mailbox::{EmailSource, FetchedEmail};
use convo_inbox::pipeline::{Orchestrator, OutboundMessage, OutboundStore};
use convo_inbox::store::{ConnectionPool, ConversationStore, LibSqlStore, SenderType};

/// Mailbox stub that serves the same raw messages on every call.
struct ScriptedMailbox {
    raw: Vec<String>,
    calls: AtomicUsize,
}

impl ScriptedMailbox {
    fn new(raw: &[String]) -> Self {
        Self {
            raw: raw.to_vec(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmailSource for ScriptedMailbox {
    async fn receive(&self) -> Result<Vec<FetchedEmail>, MailError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .raw
            .iter()
            .filter_map(|raw| parse_fetched(raw.as_bytes()))
            .collect())
    }
}

fn raw_email(from: &str, subject: &str, body: &str) -> String {
    format!(
        "From: {from}\r\nTo: bot@y.com\r\nSubject: {subject}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\r\n{body}\r\n"
    )
}

async fn open_store() -> (tempfile::TempDir, Arc<ConnectionPool>, Arc<LibSqlStore>) {
    let tmp = tempfile::tempdir().unwrap();
    let pool = ConnectionPool::open(&DatabaseConfig::new(tmp.path().join("convo.db")))
        .await
        .unwrap();
    let store = Arc::new(LibSqlStore::new(Arc::clone(&pool)));
    (tmp, pool, store)
}

async fn seed_conversation(pool: &ConnectionPool, conv_key: &str, participants: &[&str]) {
    let conn = pool.checkout().unwrap();
    conn.execute(
        "INSERT INTO conversations (conv_key, status) VALUES (?1, 'active')",
        params![conv_key],
    )
    .await
    .unwrap();
    for address in participants {
        conn.execute(
            "INSERT INTO conversation_participants (conv_key, address) VALUES (?1, ?2)",
            params![conv_key, *address],
        )
        .await
        .unwrap();
    }
}

#[tokio::test]
async fn project_sync_reply_lands_in_history() {
    let (_tmp, pool, store) = open_store().await;
    seed_conversation(&pool, "abc123", &["a@x.com"]).await;

    let mailbox = ScriptedMailbox::new(&[raw_email(
        "a@x.com",
        "Re: Project Sync [conv:abc123]",
        "Thursday works for me.",
    )]);
    let results = Orchestrator::new(store.clone()).run(&mailbox).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].conversation_key, "abc123");
    assert_eq!(results[0].subject, "Re: Project Sync [conv:abc123]");
    assert_eq!(results[0].body, "Thursday works for me.");

    let history = store.list_history("abc123").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].sender, "a@x.com");
    assert_eq!(history[0].recipient, "bot@y.com");
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test]
async fn repeated_polls_never_duplicate_history() {
    let (_tmp, pool, store) = open_store().await;
    seed_conversation(&pool, "abc123", &["a@x.com"]).await;

    let mailbox = ScriptedMailbox::new(&[
        raw_email("a@x.com", "Re: [conv:abc123]", "first"),
        raw_email("a@x.com", "Hello there", "no key here"),
        raw_email("b@x.com", "Re: [conv:abc123]", "not a participant"),
    ]);
    let orchestrator = Orchestrator::new(store.clone());

    let first = orchestrator.run(&mailbox).await.unwrap();
    let second = orchestrator.run(&mailbox).await.unwrap();

    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
    assert_eq!(mailbox.calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.list_history("abc123").await.unwrap().len(), 1);
    assert_eq!(store.processed_count().await.unwrap(), 3);
}

#[tokio::test]
async fn ledger_survives_reopening_the_database() {
    let tmp = tempfile::tempdir().unwrap();
    let config = DatabaseConfig::new(tmp.path().join("convo.db"));
    let mailbox = ScriptedMailbox::new(&[raw_email("a@x.com", "[conv:abc123]", "hi")]);

    {
        let pool = ConnectionPool::open(&config).await.unwrap();
        seed_conversation(&pool, "abc123", &["a@x.com"]).await;
        let store = Arc::new(LibSqlStore::new(Arc::clone(&pool)));
        assert_eq!(Orchestrator::new(store).run(&mailbox).await.unwrap().len(), 1);
        pool.close();
    }

    let pool = ConnectionPool::open(&config).await.unwrap();
    let store = Arc::new(LibSqlStore::new(Arc::clone(&pool)));
    assert!(Orchestrator::new(store.clone()).run(&mailbox).await.unwrap().is_empty());
    assert_eq!(store.list_history("abc123").await.unwrap().len(), 1);
}

#[tokio::test]
async fn outbound_reply_follows_inbound_message() {
    let (_tmp, pool, store) = open_store().await;
    seed_conversation(&pool, "abc123", &["a@x.com"]).await;

    let mailbox = ScriptedMailbox::new(&[raw_email("a@x.com", "[conv:abc123]", "question?")]);
    Orchestrator::new(store.clone()).run(&mailbox).await.unwrap();

    let outbound = OutboundStore::new(store.clone(), "assistant@y.com");
    outbound
        .store_sent_message(OutboundMessage::new("abc123", "a@x.com", "answer."))
        .await
        .unwrap();

    let history = store.list_history("abc123").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].sender_type, SenderType::Human);
    assert_eq!(history[1].sender_type, SenderType::Ai);
    assert_eq!(history[1].sender, "assistant@y.com");
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test]
async fn outbound_to_missing_conversation_is_refused() {
    let (_tmp, pool, store) = open_store().await;

    let outbound = OutboundStore::new(store.clone(), "assistant@y.com");
    let result = outbound
        .store_sent_message(OutboundMessage::new("nope", "a@x.com", "hi"))
        .await;

    assert!(result.is_err());
    assert!(store.list_history("nope").await.unwrap().is_empty());
    assert_eq!(pool.in_use(), 0);
}
