//! SQLite store for state that outlives the process: the recent-search list
//! and the login session.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::api::types::User;
use crate::error::StorageError;

/// Schema for local tables.
const SCHEMA: &str = r#"
-- Most recent first, position 0 is the newest
CREATE TABLE IF NOT EXISTS recent_searches (
    position INTEGER PRIMARY KEY,
    query TEXT NOT NULL,
    searched_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One session per API base URL
CREATE TABLE IF NOT EXISTS sessions (
    base_url TEXT PRIMARY KEY,
    cookies TEXT NOT NULL,
    user_json TEXT,
    saved_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// A persisted login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
  /// `Cookie` header value
  pub cookies: String,
  pub user: Option<User>,
}

pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the database at the default location.
  pub fn open() -> Result<Self, StorageError> {
    Self::open_at(&Self::default_path()?)
  }

  pub fn open_at(path: &Path) -> Result<Self, StorageError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path).map_err(|source| StorageError::Open {
      path: path.display().to_string(),
      source,
    })?;
    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self, StorageError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self, StorageError> {
    conn.execute_batch(SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// `$XDG_DATA_HOME/taskdeck/taskdeck.db`
  pub fn default_path() -> Result<PathBuf, StorageError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or(StorageError::NoDataDir)?;

    Ok(data_dir.join("taskdeck").join("taskdeck.db"))
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
    self.conn.lock().map_err(|_| StorageError::Poisoned)
  }

  // ==========================================================================
  // Recent searches
  // ==========================================================================

  pub fn recent_searches(&self) -> Result<Vec<String>, StorageError> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare("SELECT query FROM recent_searches ORDER BY position")?;
    let queries = stmt
      .query_map([], |row| row.get(0))?
      .collect::<Result<Vec<String>, _>>()?;
    Ok(queries)
  }

  /// Replace the whole list, keeping the given order.
  pub fn replace_recent_searches(&self, queries: &[String]) -> Result<(), StorageError> {
    let mut conn = self.conn()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM recent_searches", [])?;
    for (position, query) in queries.iter().enumerate() {
      tx.execute(
        "INSERT INTO recent_searches (position, query) VALUES (?, ?)",
        params![position as i64, query],
      )?;
    }
    tx.commit()?;
    Ok(())
  }

  // ==========================================================================
  // Sessions
  // ==========================================================================

  pub fn session(&self, base_url: &str) -> Result<Option<StoredSession>, StorageError> {
    let conn = self.conn()?;
    let row: Option<(String, Option<String>)> = conn
      .query_row(
        "SELECT cookies, user_json FROM sessions WHERE base_url = ?",
        params![base_url],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()?;

    Ok(row.map(|(cookies, user_json)| StoredSession {
      cookies,
      // A corrupt user blob only costs us the cached name
      user: user_json.and_then(|json| serde_json::from_str(&json).ok()),
    }))
  }

  pub fn save_session(
    &self,
    base_url: &str,
    cookies: &str,
    user: Option<&User>,
  ) -> Result<(), StorageError> {
    let user_json = user.and_then(|u| serde_json::to_string(u).ok());
    self.conn()?.execute(
      "INSERT OR REPLACE INTO sessions (base_url, cookies, user_json, saved_at)
       VALUES (?, ?, ?, datetime('now'))",
      params![base_url, cookies, user_json],
    )?;
    Ok(())
  }

  pub fn clear_session(&self, base_url: &str) -> Result<(), StorageError> {
    self
      .conn()?
      .execute("DELETE FROM sessions WHERE base_url = ?", params![base_url])?;
    Ok(())
  }
}
