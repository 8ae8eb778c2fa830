//! Connection pooling for the SQLite backend.

use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;
use tracing::debug;

use super::config::SqliteConfig;
use crate::error::StorageError;
use crate::query::sql::LOWER_FUNCTION;

/// Internal pool state.
struct PoolInner {
    idle: Mutex<Vec<Connection>>,
    available: Condvar,
    acquire_timeout: Duration,
}

impl PoolInner {
    fn release(&self, conn: Connection) {
        self.idle.lock().push(conn);
        self.available.notify_one();
    }
}

/// A fixed-size pool of SQLite connections.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Open every connection up front.
    pub fn open(config: &SqliteConfig) -> Result<Self, StorageError> {
        let size = config.effective_pool_size();
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            connections.push(open_connection(config)?);
        }
        debug!(size, path = ?config.path, "opened sqlite connection pool");

        Ok(Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(connections),
                available: Condvar::new(),
                acquire_timeout: config.acquire_timeout,
            }),
        })
    }

    /// Take a connection, waiting up to the acquire timeout for one to free up.
    pub fn acquire(&self) -> Result<PooledConnection, StorageError> {
        let deadline = Instant::now() + self.inner.acquire_timeout;
        let mut idle = self.inner.idle.lock();
        loop {
            if let Some(conn) = idle.pop() {
                return Ok(PooledConnection {
                    connection: Some(conn),
                    pool: self.inner.clone(),
                });
            }
            if self.inner.available.wait_until(&mut idle, deadline).timed_out() && idle.is_empty() {
                return Err(StorageError::PoolTimeout(self.inner.acquire_timeout));
            }
        }
    }

    /// Number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }
}

fn open_connection(config: &SqliteConfig) -> Result<Connection, StorageError> {
    let conn = if config.in_memory {
        Connection::open_in_memory()?
    } else {
        let conn = Connection::open(&config.path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn
    };
    conn.busy_timeout(config.busy_timeout)?;
    register_lower(&conn)?;
    Ok(conn)
}

/// Register a lower-casing function with full Unicode folding.
///
/// SQLite's built-in `LOWER` only folds ASCII letters. Non-text values pass
/// through unchanged.
fn register_lower(conn: &Connection) -> Result<(), StorageError> {
    conn.create_scalar_function(
        LOWER_FUNCTION,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            Ok(match ctx.get_raw(0) {
                ValueRef::Text(bytes) => {
                    SqlValue::Text(String::from_utf8_lossy(bytes).to_lowercase())
                }
                other => SqlValue::from(other),
            })
        },
    )?;
    Ok(())
}

/// A pooled connection that returns itself to the pool when dropped.
pub struct PooledConnection {
    connection: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `None` after `drop` has run.
        self.connection
            .as_ref()
            .unwrap_or_else(|| unreachable!("pooled connection used after release"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_connection_returns_on_drop() {
        let pool = ConnectionPool::open(&SqliteConfig::in_memory()).unwrap();
        assert_eq!(pool.idle_count(), 1);
        {
            let conn = pool.acquire().unwrap();
            conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)").unwrap();
            assert_eq!(pool.idle_count(), 0);
        }
        assert_eq!(pool.idle_count(), 1);

        // same in-memory database
        let conn = pool.acquire().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_lower_folds_unicode() {
        let pool = ConnectionPool::open(&SqliteConfig::in_memory()).unwrap();
        let conn = pool.acquire().unwrap();
        let sql = format!("SELECT {}('MÜNCHENER ÉVORA'), {}(NULL), {}(7)", LOWER_FUNCTION, LOWER_FUNCTION, LOWER_FUNCTION);
        let (text, null, number): (String, Option<String>, i64) = conn
            .query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap();
        assert_eq!(text, "münchener évora");
        assert_eq!(null, None);
        assert_eq!(number, 7);
    }

    #[test]
    fn test_acquire_times_out() {
        let config = SqliteConfig::in_memory().with_acquire_timeout(Duration::from_millis(20));
        let pool = ConnectionPool::open(&config).unwrap();
        let _held = pool.acquire().unwrap();
        assert!(matches!(pool.acquire(), Err(StorageError::PoolTimeout(_))));
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let config = SqliteConfig::in_memory().with_acquire_timeout(Duration::from_secs(5));
        let pool = ConnectionPool::open(&config).unwrap();
        let held = pool.acquire().unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire().map(|_| ()))
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);

        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_file_pool_size() {
        let dir = tempfile::tempdir().unwrap();
        let config = SqliteConfig::new(dir.path().join("pool.db")).with_pool_size(3);
        let pool = ConnectionPool::open(&config).unwrap();
        assert_eq!(pool.idle_count(), 3);
    }
}
