// src/db/mod.rs

//! Database layer for sdkwatch
//!
//! This module handles all SQLite operations including:
//! - Database initialization and schema creation
//! - Connection management
//! - Transaction handling
//! - Change notification for live queries

pub mod models;
pub mod schema;

use crate::error::{Error, Result};
use rusqlite::hooks::Action;
use rusqlite::{Connection, Transaction};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, trace};

/// Initialize a new sdkwatch database at the specified path
///
/// Creates the database file and applies the schema migrations.
/// This is idempotent - calling it on an existing database is safe.
pub fn init(db_path: &str) -> Result<()> {
    debug!("Initializing database at: {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::InitError(format!("Failed to create database directory: {}", e))
            })?;
        }
    }

    let conn = Connection::open(db_path)?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    schema::migrate(&conn)?;

    info!("Database initialized successfully");
    Ok(())
}

/// Open an existing sdkwatch database
///
/// Pending migrations are applied, so a database created by an older
/// release is usable right away.
pub fn open(db_path: &str) -> Result<Connection> {
    if !Path::new(db_path).exists() {
        return Err(Error::DatabaseNotFound(db_path.to_string()));
    }

    let conn = Connection::open(db_path)?;

    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    schema::migrate(&conn)?;

    Ok(conn)
}

/// Run `f` inside a transaction, committing only if it succeeds
pub fn transaction<F, T>(conn: &mut Connection, f: F) -> Result<T>
where
    F: FnOnce(&Transaction) -> Result<T>,
{
    let tx = conn.transaction()?;
    let result = f(&tx)?;
    tx.commit()?;
    Ok(result)
}

/// Tables whose changes are reported to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Apps,
    Versions,
    Preferences,
}

impl Table {
    pub fn as_str(&self) -> &str {
        match self {
            Table::Apps => "apps",
            Table::Versions => "versions",
            Table::Preferences => "preferences",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "apps" => Some(Table::Apps),
            "versions" => Some(Table::Versions),
            "preferences" => Some(Table::Preferences),
            _ => None,
        }
    }
}

/// Notification pushed to subscribers after a successful write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub tables: BTreeSet<Table>,
}

impl StoreEvent {
    /// Whether any of `tables` changed
    pub fn touches(&self, tables: &[Table]) -> bool {
        tables.iter().any(|t| self.tables.contains(t))
    }
}

/// The single handle to the sdkwatch database
///
/// Owns the connection and the list of subscribers. Every write that goes
/// through [`Store::transaction`] or [`Store::write`] is followed by one
/// [`StoreEvent`] naming the tables it touched.
pub struct Store {
    conn: Connection,
    pending: Arc<Mutex<BTreeSet<Table>>>,
    subscribers: RefCell<Vec<Sender<StoreEvent>>>,
}

impl Store {
    /// Create (if needed) and open the database at `db_path`
    pub fn init(db_path: &str) -> Result<Self> {
        init(db_path)?;
        Self::open(db_path)
    }

    /// Open an existing database at `db_path`
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open(db_path)?;
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database with the full schema
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::migrate(&conn)?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an already-migrated connection
    pub fn from_connection(conn: Connection) -> Self {
        let pending = Arc::new(Mutex::new(BTreeSet::new()));
        let hook_pending = Arc::clone(&pending);

        conn.update_hook(Some(
            move |action: Action, _db: &str, table: &str, _rowid: i64| {
                let Some(table) = Table::from_name(table) else {
                    return;
                };
                if let Ok(mut pending) = hook_pending.lock() {
                    pending.insert(table);
                    // Version rows disappear with their app via ON DELETE CASCADE
                    if table == Table::Apps && action == Action::SQLITE_DELETE {
                        pending.insert(Table::Versions);
                    }
                }
            },
        ));

        Self {
            conn,
            pending,
            subscribers: RefCell::new(Vec::new()),
        }
    }

    /// Read access to the underlying connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Register a new subscriber
    ///
    /// The subscription ends when the receiver is dropped.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        let (sender, receiver) = mpsc::channel();
        self.subscribers.borrow_mut().push(sender);
        receiver
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// Run `f` in a transaction and notify subscribers once it commits
    pub fn transaction<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        match transaction(&mut self.conn, f) {
            Ok(value) => {
                self.notify();
                Ok(value)
            }
            Err(e) => {
                self.discard_pending();
                Err(e)
            }
        }
    }

    /// Run autocommit writes and notify subscribers
    ///
    /// Each statement commits on its own, so statements that ran before an
    /// error are reported even when `f` fails.
    pub fn write<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let result = f(&self.conn);
        self.notify();
        result
    }

    fn discard_pending(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }

    /// Push the tables changed since the last notification to subscribers
    fn notify(&self) {
        let tables = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => return,
        };
        if tables.is_empty() {
            return;
        }

        trace!("Store changed: {:?}", tables);
        let event = StoreEvent { tables };
        self.subscribers
            .borrow_mut()
            .retain(|sender| sender.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_init_creates_database() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap().to_string();

        // Remove the temp file so init can create it
        drop(temp_file);

        let result = init(&db_path);
        assert!(result.is_ok());
        assert!(Path::new(&db_path).exists());
    }

    #[test]
    fn test_open_existing_database() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();

        init(db_path).unwrap();

        let result = open(db_path);
        assert!(result.is_ok());
    }

    #[test]
    fn test_open_nonexistent_database() {
        let result = open("/nonexistent/path/db.sqlite");
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), Error::DatabaseNotFound(_)));
    }

    #[test]
    fn test_subscriber_notified_after_commit() {
        let mut store = Store::open_in_memory().unwrap();
        let rx = store.subscribe();

        store
            .transaction(|tx| {
                tx.execute(
                    "INSERT INTO apps (package_name, title, background_color) VALUES ('a', 'A', 0)",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        let event = rx.try_recv().unwrap();
        assert!(event.touches(&[Table::Apps]));
        assert!(!event.touches(&[Table::Preferences]));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_no_notification_after_rollback() {
        let mut store = Store::open_in_memory().unwrap();
        let rx = store.subscribe();

        let result: Result<()> = store.transaction(|tx| {
            tx.execute(
                "INSERT INTO apps (package_name, title, background_color) VALUES ('a', 'A', 0)",
                [],
            )?;
            Err(Error::ParseError("abort".to_string()))
        });
        assert!(result.is_err());
        assert!(rx.try_recv().is_err());

        // The aborted change must not leak into the next notification
        store
            .write(|conn| {
                conn.execute("INSERT INTO preferences (key, value) VALUES ('k', 'v')", [])?;
                Ok(())
            })
            .unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.tables.len(), 1);
        assert!(event.touches(&[Table::Preferences]));
    }

    #[test]
    fn test_failed_write_reports_committed_statements() {
        let store = Store::open_in_memory().unwrap();
        let rx = store.subscribe();

        let result: Result<()> = store.write(|conn| {
            conn.execute("INSERT INTO preferences (key, value) VALUES ('k', 'v')", [])?;
            Err(Error::ParseError("second statement failed".to_string()))
        });
        assert!(result.is_err());

        let stored: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM preferences", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stored, 1);
        let event = rx.try_recv().unwrap();
        assert!(event.touches(&[Table::Preferences]));
    }

    #[test]
    fn test_app_delete_reports_versions() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|conn| {
                conn.execute(
                    "INSERT INTO apps (package_name, title, background_color) VALUES ('a', 'A', 0)",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        let rx = store.subscribe();
        store
            .write(|conn| {
                conn.execute("DELETE FROM apps WHERE package_name = 'a'", [])?;
                Ok(())
            })
            .unwrap();

        let event = rx.try_recv().unwrap();
        assert!(event.touches(&[Table::Versions]));
    }

    #[test]
    fn test_dropped_subscriber_is_removed() {
        let store = Store::open_in_memory().unwrap();
        let rx = store.subscribe();
        let _kept = store.subscribe();
        drop(rx);
        assert_eq!(store.subscriber_count(), 2);

        store
            .write(|conn| {
                conn.execute("INSERT INTO preferences (key, value) VALUES ('k', 'v')", [])?;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.subscriber_count(), 1);
    }

    #[test]
    fn test_reads_do_not_notify() {
        let store = Store::open_in_memory().unwrap();
        let rx = store.subscribe();
        let count: i64 = store
            .write(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM apps", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
        assert!(rx.try_recv().is_err());
    }
}
