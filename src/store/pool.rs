//! Connection pool over a local libSQL database.
//!
//! Each logical storage operation checks out one connection and holds a
//! [`PooledConnection`] guard for its duration. The guard hands the
//! connection back when it is dropped, so release happens on every exit
//! path including early `?` returns.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use libsql::{Connection, Database as LibSqlDatabase};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::DatabaseError;
use crate::store::migrations;

pub struct ConnectionPool {
    db: LibSqlDatabase,
    idle: Mutex<Vec<Connection>>,
    max_connections: usize,
    in_use: AtomicUsize,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Open (or create) the database file, run migrations, and return a
    /// ready pool.
    pub async fn open(config: &DatabaseConfig) -> Result<Arc<Self>, DatabaseError> {
        let path = config.path.as_path();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let pool = Arc::new(Self {
            db,
            idle: Mutex::new(Vec::new()),
            max_connections: config.max_connections.max(1),
            in_use: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });

        {
            let conn = pool.checkout()?;
            migrations::run_migrations(&conn).await?;
        }

        info!(
            path = %path.display(),
            max_connections = pool.max_connections,
            "Database connection pool initialized"
        );
        Ok(pool)
    }

    /// Check out a connection, reusing an idle one when available.
    pub fn checkout(&self) -> Result<PooledConnection<'_>, DatabaseError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DatabaseError::Pool("Connection pool is closed".into()));
        }

        if self.in_use.load(Ordering::Acquire) >= self.max_connections {
            return Err(DatabaseError::Pool(format!(
                "Connection pool exhausted ({} in use)",
                self.max_connections
            )));
        }

        let reused = self
            .idle
            .lock()
            .map_err(|_| DatabaseError::Pool("Connection pool mutex poisoned".into()))?
            .pop();

        let conn = match reused {
            Some(conn) => conn,
            None => self
                .db
                .connect()
                .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?,
        };

        self.in_use.fetch_add(1, Ordering::AcqRel);
        Ok(PooledConnection { pool: self, conn })
    }

    /// Number of connections currently checked out.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Number of idle connections waiting for reuse.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    /// Drop all idle connections and refuse further checkouts.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let dropped = match self.idle.lock() {
            Ok(mut idle) => idle.drain(..).count(),
            Err(_) => 0,
        };
        debug!(dropped, "Connection pool closed");
    }

    fn release(&self, conn: Connection) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(conn);
        }
    }
}

/// A checked-out connection. Returned to the pool on drop.
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Connection,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        // libsql connections are cheap handles; the clone shares the session.
        self.pool.release(self.conn.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool(max_connections: usize) -> (tempfile::TempDir, Arc<ConnectionPool>) {
        let tmp = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: tmp.path().join("pool.db"),
            max_connections,
        };
        let pool = ConnectionPool::open(&config).await.unwrap();
        (tmp, pool)
    }

    #[tokio::test]
    async fn open_creates_nested_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("dir").join("convo.db");
        let pool = ConnectionPool::open(&DatabaseConfig::new(&path)).await.unwrap();
        assert!(path.exists());
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn open_fails_when_parent_is_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let result = ConnectionPool::open(&DatabaseConfig::new(blocker.join("convo.db"))).await;
        assert!(matches!(result, Err(DatabaseError::Pool(_))));
    }

    #[tokio::test]
    async fn guard_releases_on_drop() {
        let (_tmp, pool) = test_pool(2).await;
        {
            let _conn = pool.checkout().unwrap();
            assert_eq!(pool.in_use(), 1);
        }
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn idle_connections_are_reused() {
        let (_tmp, pool) = test_pool(2).await;
        for _ in 0..5 {
            let conn = pool.checkout().unwrap();
            conn.query("SELECT 1", ()).await.unwrap();
        }
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn exhausted_pool_refuses_checkout() {
        let (_tmp, pool) = test_pool(1).await;
        let _held = pool.checkout().unwrap();
        assert!(matches!(pool.checkout(), Err(DatabaseError::Pool(_))));
    }

    #[tokio::test]
    async fn closed_pool_refuses_checkout() {
        let (_tmp, pool) = test_pool(2).await;
        pool.close();
        assert_eq!(pool.idle_count(), 0);
        assert!(matches!(pool.checkout(), Err(DatabaseError::Pool(_))));
    }

    #[tokio::test]
    async fn release_after_close_discards_connection() {
        let (_tmp, pool) = test_pool(2).await;
        let conn = pool.checkout().unwrap();
        pool.close();
        drop(conn);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.idle_count(), 0);
    }
}
