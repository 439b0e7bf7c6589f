//! Database connection management with pragma configuration.
//!
//! Opens the SQLite database, applies the WAL pragmas and runs migrations.
//! Named response caches and ledger tables are views over this one connection.

use super::migrations;
use super::responses::ResponseCache;
use super::tables::Table;
use crate::Error;
use std::path::Path;
use tokio_rusqlite::{Connection, params};

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA foreign_keys=ON;";

/// Kind tag for a namespace registered in the `stores` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoreKind {
    Cache,
    Table,
}

impl StoreKind {
    fn as_str(self) -> &'static str {
        match self {
            StoreKind::Cache => "cache",
            StoreKind::Table => "table",
        }
    }
}

/// Store database handle.
///
/// Wraps a tokio-rusqlite Connection that runs database operations
/// on a background thread. Cloning shares the connection.
#[derive(Clone, Debug)]
pub struct StoreDb {
    pub(crate) conn: Connection,
}

impl StoreDb {
    /// Open a database at the specified path.
    ///
    /// Creates the file if it doesn't exist, applies performance pragmas,
    /// and runs any pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
        Self::init(conn).await
    }

    /// Open an in-memory database for testing.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(e.into()))?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, Error> {
        conn.call(|conn| {
            conn.execute_batch(PRAGMAS)?;
            Ok(())
        })
        .await
        .map_err(Error::Database)?;

        migrations::run(&conn).await?;

        Ok(Self { conn })
    }

    /// Open (registering if needed) the named response cache.
    pub async fn open_cache(&self, name: &str) -> Result<ResponseCache, Error> {
        self.register(name, StoreKind::Cache).await?;
        Ok(ResponseCache::new(self.clone(), name))
    }

    /// Delete the named response cache and everything in it.
    ///
    /// Returns true if the cache existed.
    pub async fn delete_cache(&self, name: &str) -> Result<bool, Error> {
        self.unregister(name, StoreKind::Cache, "DELETE FROM responses WHERE store = ?1")
            .await
    }

    /// Open (registering if needed) the named ledger table.
    pub async fn open_table(&self, name: &str) -> Result<Table, Error> {
        self.register(name, StoreKind::Table).await?;
        Ok(Table::new(self.clone(), name))
    }

    /// Delete the named ledger table and all of its records.
    ///
    /// Returns true if the table existed.
    pub async fn delete_table(&self, name: &str) -> Result<bool, Error> {
        self.unregister(name, StoreKind::Table, "DELETE FROM records WHERE tbl = ?1")
            .await
    }

    async fn register(&self, name: &str, kind: StoreKind) -> Result<(), Error> {
        let name = name.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO stores (name, kind, created_at) VALUES (?1, ?2, ?3)",
                    params![name, kind.as_str(), now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn unregister(&self, name: &str, kind: StoreKind, purge_sql: &'static str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let tx = conn.transaction()?;
                let purged = tx.execute(purge_sql, params![name])?;
                let registered = tx.execute(
                    "DELETE FROM stores WHERE name = ?1 AND kind = ?2",
                    params![name, kind.as_str()],
                )?;
                tx.commit()?;
                Ok(registered > 0 || purged > 0)
            })
            .await
            .map_err(Error::from)
    }
}
