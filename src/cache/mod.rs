//! SQLite-backed pre-aggregation state.
//!
//! Persists what was materialized (refresh key, build time, table location,
//! status) so a restarted process keeps serving the tables it already built
//! instead of rebuilding all of them.
//!
//! Records are JSON values under string keys:
//!
//! ```text
//! instance:{cube}.{pre_aggregation}              -> InstanceRecord
//! instance:{cube}.{pre_aggregation}:{partition}  -> InstanceRecord
//! ```
//!
//! The layout version lives in SQLite's `user_version`; a database written
//! with another layout is emptied on open.

mod hash;
pub use hash::{compute_hash, short_hash, SHORT_HASH_LEN};

use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

/// Bump when the record format changes.
const STATE_LAYOUT_VERSION: i64 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("malformed state record {key}: {source}")]
    Record {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Key/value store of persisted pre-aggregation state.
pub struct StateCache {
    conn: Connection,
}

impl StateCache {
    /// Open or create the state database at `path`.
    pub fn open(path: &Path) -> CacheResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> CacheResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> CacheResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS state (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );",
        )?;

        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version != STATE_LAYOUT_VERSION {
            if version != 0 {
                info!(found = version, expected = STATE_LAYOUT_VERSION, "discarding pre-aggregation state");
            }
            conn.execute("DELETE FROM state", [])?;
            conn.pragma_update(None, "user_version", STATE_LAYOUT_VERSION)?;
        }
        Ok(Self { conn })
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let json: Option<String> = self
            .conn
            .query_row("SELECT value FROM state WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        json.map(|json| decode(key, &json)).transpose()
    }

    /// Insert or replace the record under `key`.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> CacheResult<()> {
        let json = serde_json::to_string(value).map_err(|source| CacheError::Record {
            key: key.to_string(),
            source,
        })?;
        self.conn.execute(
            "INSERT INTO state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
            params![key, json],
        )?;
        Ok(())
    }

    /// Returns whether a record was removed.
    pub fn delete(&self, key: &str) -> CacheResult<bool> {
        let rows = self.conn.execute("DELETE FROM state WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }

    /// Every record whose key starts with `prefix`, ordered by key.
    pub fn scan<T: DeserializeOwned>(&self, prefix: &str) -> CacheResult<Vec<(String, T)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM state WHERE substr(key, 1, ?2) = ?1 ORDER BY key")?;
        let rows = stmt
            .query_map(params![prefix, prefix.chars().count() as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(key, json)| {
                let value = decode(&key, &json)?;
                Ok((key, value))
            })
            .collect()
    }

    pub fn len(&self) -> CacheResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM state", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }
}

fn decode<T: DeserializeOwned>(key: &str, json: &str) -> CacheResult<T> {
    serde_json::from_str(json).map_err(|source| CacheError::Record {
        key: key.to_string(),
        source,
    })
}

/// Record keys.
pub struct StateKey;

impl StateKey {
    pub const INSTANCE_PREFIX: &'static str = "instance:";

    /// Key for one materialized instance.
    pub fn instance(cube: &str, pre_aggregation: &str, partition: Option<&str>) -> String {
        match partition {
            Some(p) => format!("{}{}.{}:{}", Self::INSTANCE_PREFIX, cube, pre_aggregation, p),
            None => format!("{}{}.{}", Self::INSTANCE_PREFIX, cube, pre_aggregation),
        }
    }
}
