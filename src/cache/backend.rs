//! Cache backend trait, in-memory double, and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::http::StoredResponse;

/// Storage behind the cache partitions.
///
/// Writes are atomic per key and reads never block writes, so strategies need
/// no locking beyond what the backend does internally.
pub trait CacheBackend: Send + Sync {
  /// Ensure a partition exists, possibly empty.
  fn open_partition(&self, partition: &str) -> Result<()>;

  /// Store a response under `key`, overwriting any previous entry.
  fn put(&self, partition: &str, key: &str, response: &StoredResponse) -> Result<()>;

  /// Look up a response by key.
  fn get(&self, partition: &str, key: &str) -> Result<Option<StoredResponse>>;

  /// Request keys currently held in a partition.
  fn keys(&self, partition: &str) -> Result<Vec<String>>;

  /// Names of all partitions currently in the backend.
  fn partitions(&self) -> Result<Vec<String>>;

  /// Delete a partition and everything in it.
  fn delete_partition(&self, partition: &str) -> Result<()>;
}

/// In-memory backend. The injectable test double; also handy for ephemeral
/// runs where nothing should touch disk.
#[derive(Default)]
pub struct MemoryBackend {
  partitions: Mutex<BTreeMap<String, BTreeMap<String, StoredResponse>>>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheBackend for MemoryBackend {
  fn open_partition(&self, partition: &str) -> Result<()> {
    let mut partitions = self.partitions.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    partitions.entry(partition.to_string()).or_default();
    Ok(())
  }

  fn put(&self, partition: &str, key: &str, response: &StoredResponse) -> Result<()> {
    let mut partitions = self.partitions.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    partitions
      .entry(partition.to_string())
      .or_default()
      .insert(key.to_string(), response.clone());
    Ok(())
  }

  fn get(&self, partition: &str, key: &str) -> Result<Option<StoredResponse>> {
    let partitions = self.partitions.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      partitions
        .get(partition)
        .and_then(|entries| entries.get(key))
        .cloned(),
    )
  }

  fn keys(&self, partition: &str) -> Result<Vec<String>> {
    let partitions = self.partitions.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      partitions
        .get(partition)
        .map(|entries| entries.keys().cloned().collect())
        .unwrap_or_default(),
    )
  }

  fn partitions(&self) -> Result<Vec<String>> {
    let partitions = self.partitions.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(partitions.keys().cloned().collect())
  }

  fn delete_partition(&self, partition: &str) -> Result<()> {
    let mut partitions = self.partitions.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    partitions.remove(partition);
    Ok(())
  }
}

/// SQLite-backed partition store: the durable backend for real runs.
pub struct SqliteBackend {
  conn: Mutex<Connection>,
}

/// Schema for partition tables.
const CACHE_SCHEMA: &str = r#"
-- Partition registry; a row exists even for empty partitions
CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY
);

-- Cached response snapshots (serialized JSON)
CREATE TABLE IF NOT EXISTS entries (
    partition TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (partition, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_partition ON entries(partition);
"#;

impl SqliteBackend {
  /// Open the backend at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open an in-memory backend; used by tests.
  #[allow(dead_code)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let backend = Self {
      conn: Mutex::new(conn),
    };
    backend.run_migrations()?;

    Ok(backend)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("dashcache").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// SHA256 hash for stable, fixed-length row keys.
fn hash_key(key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  hex::encode(hasher.finalize())
}

impl CacheBackend for SqliteBackend {
  fn open_partition(&self, partition: &str) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to open partition {}: {}", partition, e))?;

    Ok(())
  }

  fn put(&self, partition: &str, key: &str, response: &StoredResponse) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data =
      serde_json::to_vec(response).map_err(|e| eyre!("Failed to serialize response: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to open partition {}: {}", partition, e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO entries (partition, key_hash, request_key, data, stored_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
          partition,
          hash_key(key),
          key,
          data,
          response.stored_at.to_rfc3339()
        ],
      )
      .map_err(|e| eyre!("Failed to store entry: {}", e))?;

    Ok(())
  }

  fn get(&self, partition: &str, key: &str) -> Result<Option<StoredResponse>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT data FROM entries WHERE partition = ? AND key_hash = ?")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let data: Option<Vec<u8>> = stmt
      .query_row(params![partition, hash_key(key)], |row| row.get(0))
      .ok();

    match data {
      Some(data) => {
        let response: StoredResponse = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize cached response: {}", e))?;
        Ok(Some(response))
      }
      None => Ok(None),
    }
  }

  fn keys(&self, partition: &str) -> Result<Vec<String>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT request_key FROM entries WHERE partition = ? ORDER BY request_key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys: Vec<String> = stmt
      .query_map(params![partition], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query keys: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(keys)
  }

  fn partitions(&self) -> Result<Vec<String>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM partitions ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names: Vec<String> = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query partitions: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn delete_partition(&self, partition: &str) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM entries WHERE partition = ?", params![partition])
      .map_err(|e| eyre!("Failed to delete entries for {}: {}", partition, e))?;

    conn
      .execute("DELETE FROM partitions WHERE name = ?", params![partition])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", partition, e))?;

    Ok(())
  }
}
