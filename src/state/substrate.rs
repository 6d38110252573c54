use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::SubstrateError;

pub type SubstrateResult<T> = Result<T, SubstrateError>;

/// A flat, string-keyed durable store of string sets and integers.
///
/// Each call must be atomic on its own key. Nothing here spans keys;
/// the triage store orders its writes so that a crash between two of
/// them never leaves an identifier marked by accident.
pub trait Substrate: Send + Sync {
    fn get_set(&self, key: &str) -> SubstrateResult<HashSet<String>>;
    fn put_set(&self, key: &str, members: &HashSet<String>) -> SubstrateResult<()>;
    fn get_int(&self, key: &str) -> SubstrateResult<Option<i64>>;
    fn put_int(&self, key: &str, value: i64) -> SubstrateResult<()>;
    fn remove(&self, key: &str) -> SubstrateResult<()>;

    fn insert_member(&self, key: &str, member: &str) -> SubstrateResult<()> {
        let mut members = self.get_set(key)?;
        if members.insert(member.to_string()) {
            self.put_set(key, &members)?;
        }
        Ok(())
    }

    fn remove_member(&self, key: &str, member: &str) -> SubstrateResult<()> {
        let mut members = self.get_set(key)?;
        if members.remove(member) {
            self.put_set(key, &members)?;
        }
        Ok(())
    }
}

/// SQLite-backed substrate.
///
/// The parent directory is created on open if it does not exist yet.
pub struct SqliteSubstrate {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteSubstrate {
    pub fn open(db_path: impl AsRef<Path>) -> SubstrateResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&db_path)?;
        // WAL keeps readers off the writer's back; pragma returns a row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        let substrate = SqliteSubstrate {
            conn: Mutex::new(conn),
            db_path,
        };
        substrate.init_schema()?;

        tracing::info!("📁 Triage database initialized at: {}", substrate.db_path.display());
        Ok(substrate)
    }

    fn init_schema(&self) -> SubstrateResult<()> {
        let conn = self.lock()?;

        // One row per set member, so a single swipe is a single row write
        conn.execute(
            "CREATE TABLE IF NOT EXISTS string_sets (
                key     TEXT NOT NULL,
                member  TEXT NOT NULL,
                PRIMARY KEY (key, member)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS integers (
                key     TEXT PRIMARY KEY,
                value   INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    fn lock(&self) -> SubstrateResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SubstrateError::Unavailable("database connection poisoned".into()))
    }
}

impl Substrate for SqliteSubstrate {
    fn get_set(&self, key: &str) -> SubstrateResult<HashSet<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT member FROM string_sets WHERE key = ?1")?;
        let members = stmt
            .query_map([key], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(members)
    }

    fn put_set(&self, key: &str, members: &HashSet<String>) -> SubstrateResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM string_sets WHERE key = ?1", [key])?;
        {
            let mut insert =
                tx.prepare("INSERT INTO string_sets (key, member) VALUES (?1, ?2)")?;
            for member in members {
                insert.execute(params![key, member])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_int(&self, key: &str) -> SubstrateResult<Option<i64>> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM integers WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn put_int(&self, key: &str, value: i64) -> SubstrateResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO integers (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> SubstrateResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM string_sets WHERE key = ?1", [key])?;
        tx.execute("DELETE FROM integers WHERE key = ?1", [key])?;
        tx.commit()?;
        Ok(())
    }

    fn insert_member(&self, key: &str, member: &str) -> SubstrateResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO string_sets (key, member) VALUES (?1, ?2)",
            params![key, member],
        )?;
        Ok(())
    }

    fn remove_member(&self, key: &str, member: &str) -> SubstrateResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM string_sets WHERE key = ?1 AND member = ?2",
            params![key, member],
        )?;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteSubstrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSubstrate")
            .field("db_path", &self.db_path)
            .finish()
    }
}

/// Volatile substrate, used in tests and as the fallback when the
/// database cannot be opened.
#[derive(Debug, Default)]
pub struct MemorySubstrate {
    sets: Mutex<HashMap<String, HashSet<String>>>,
    ints: Mutex<HashMap<String, i64>>,
    failing: AtomicBool,
}

impl MemorySubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, as if the disk went away.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_writable(&self) -> SubstrateResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SubstrateError::Unavailable("substrate offline".into()));
        }
        Ok(())
    }

    fn poisoned() -> SubstrateError {
        SubstrateError::Unavailable("memory substrate poisoned".into())
    }
}

impl Substrate for MemorySubstrate {
    fn get_set(&self, key: &str) -> SubstrateResult<HashSet<String>> {
        let sets = self.sets.lock().map_err(|_| Self::poisoned())?;
        Ok(sets.get(key).cloned().unwrap_or_default())
    }

    fn put_set(&self, key: &str, members: &HashSet<String>) -> SubstrateResult<()> {
        self.check_writable()?;
        let mut sets = self.sets.lock().map_err(|_| Self::poisoned())?;
        sets.insert(key.to_string(), members.clone());
        Ok(())
    }

    fn get_int(&self, key: &str) -> SubstrateResult<Option<i64>> {
        let ints = self.ints.lock().map_err(|_| Self::poisoned())?;
        Ok(ints.get(key).copied())
    }

    fn put_int(&self, key: &str, value: i64) -> SubstrateResult<()> {
        self.check_writable()?;
        let mut ints = self.ints.lock().map_err(|_| Self::poisoned())?;
        ints.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> SubstrateResult<()> {
        self.check_writable()?;
        self.sets.lock().map_err(|_| Self::poisoned())?.remove(key);
        self.ints.lock().map_err(|_| Self::poisoned())?.remove(key);
        Ok(())
    }
}
