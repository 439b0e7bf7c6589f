//! Named ledger tables of small JSON records.
//!
//! Used for the per-URL age ledger and for the serialized eviction chain.

use super::connection::StoreDb;
use crate::Error;
use serde::{Serialize, de::DeserializeOwned};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// Handle to one named ledger table.
#[derive(Clone, Debug)]
pub struct Table {
    db: StoreDb,
    name: String,
}

impl Table {
    pub(crate) fn new(db: StoreDb, name: &str) -> Self {
        Self { db, name: name.to_string() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read and decode the record stored under `key`.
    ///
    /// # Errors
    ///
    /// `Error::RecordNotFound` if there is no record, `Error::CorruptRecord`
    /// if it does not decode as `T`.
    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<T, Error> {
        let tbl = self.name.clone();
        let key = key.to_string();
        let json = self
            .db
            .conn
            .call(move |conn| -> Result<String, Error> {
                let result = conn.query_row(
                    "SELECT value_json FROM records WHERE tbl = ?1 AND key = ?2",
                    params![tbl, key],
                    |row| row.get::<_, String>(0),
                );

                match result {
                    Ok(json) => Ok(json),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Err(Error::RecordNotFound { table: tbl, key }),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)?;

        Ok(serde_json::from_str(&json)?)
    }

    /// Encode and store `value` under `key`, replacing any previous record.
    pub async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), Error> {
        let tbl = self.name.clone();
        let key = key.to_string();
        let json = serde_json::to_string(value)?;
        let now = chrono::Utc::now().to_rfc3339();

        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO records (tbl, key, value_json, updated_at) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(tbl, key) DO UPDATE SET
                        value_json = excluded.value_json,
                        updated_at = excluded.updated_at",
                    params![tbl, key, json, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Delete the record under `key`. Returns true if one existed.
    pub async fn delete(&self, key: &str) -> Result<bool, Error> {
        let tbl = self.name.clone();
        let key = key.to_string();
        self.db
            .conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM records WHERE tbl = ?1 AND key = ?2", params![tbl, key])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// All keys currently present, in key order.
    #[cfg(test)]
    pub async fn keys(&self) -> Result<Vec<String>, Error> {
        let tbl = self.name.clone();
        self.db
            .conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT key FROM records WHERE tbl = ?1 ORDER BY key")?;
                let keys = stmt
                    .query_map(params![tbl], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(keys)
            })
            .await
            .map_err(Error::from)
    }
}
