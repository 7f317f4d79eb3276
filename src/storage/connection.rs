//! Store handles and the connection registry
//!
//! Three operating modes:
//! - `Durable`: the single persistent database file
//! - `Ephemeral`: an in-memory database that lives exactly as long as its handle
//! - `IsolatedDurable`: a database file keyed by the current process id, so
//!   parallel test processes never share state

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;

use super::migrate::{MigrationReport, SchemaMigrator};
use crate::config::{self, EveryPollConfig};
use crate::{Error, Result};

const DURABLE_FILE: &str = "everypoll.db";
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// How a store is backed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreMode {
    Durable,
    Ephemeral,
    IsolatedDurable,
}

impl StoreMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreMode::Durable => "durable",
            StoreMode::Ephemeral => "ephemeral",
            StoreMode::IsolatedDurable => "isolated",
        }
    }

    /// Whether the registry keeps track of handles in this mode
    pub fn is_tracked(&self) -> bool {
        !matches!(self, StoreMode::Durable)
    }
}

impl std::fmt::Display for StoreMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where stores live and how connections are tuned
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Directory holding the durable and per-process database files
    pub data_dir: PathBuf,
    /// Explicit durable database path (overrides `data_dir/everypoll.db`)
    pub database: Option<PathBuf>,
    pub busy_timeout: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::new(config::default_data_dir())
    }
}

impl StoreSettings {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            database: None,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// Resolve settings from a loaded config file
    pub fn from_config(config: &EveryPollConfig) -> Self {
        let mut settings = Self::new(
            config
                .data_dir
                .as_deref()
                .map(PathBuf::from)
                .unwrap_or_else(config::default_data_dir),
        );
        settings.database = config.database.as_deref().map(PathBuf::from);
        if let Some(ms) = config.busy_timeout_ms {
            settings.busy_timeout = Duration::from_millis(ms);
        }
        settings
    }

    pub fn durable_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.data_dir.join(DURABLE_FILE))
    }

    pub fn isolated_path(&self) -> PathBuf {
        self.data_dir
            .join(format!("everypoll.test.{}.db", std::process::id()))
    }

    /// File backing a mode, `None` for in-memory stores
    pub fn location(&self, mode: StoreMode) -> Option<PathBuf> {
        match mode {
            StoreMode::Durable => Some(self.durable_path()),
            StoreMode::IsolatedDurable => Some(self.isolated_path()),
            StoreMode::Ephemeral => None,
        }
    }
}

struct HandleInner {
    id: u64,
    mode: StoreMode,
    path: Option<PathBuf>,
    conn: Mutex<Option<Connection>>,
}

/// A live store connection.
///
/// Clones share the same connection. Closing any clone closes it for all of
/// them; every later operation fails with `Error::StoreClosed`.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.mode)
            .field("path", &self.inner.path)
            .field("open", &self.is_open())
            .finish()
    }
}

impl StoreHandle {
    fn open(id: u64, mode: StoreMode, path: Option<PathBuf>, settings: &StoreSettings) -> Result<Self> {
        let conn = match &path {
            Some(path) => {
                config::ensure_db_dir(path)?;
                let conn = Connection::open(path)?;
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
                conn
            }
            None => Connection::open_in_memory()?,
        };
        conn.busy_timeout(settings.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Ok(Self {
            inner: Arc::new(HandleInner {
                id,
                mode,
                path,
                conn: Mutex::new(Some(conn)),
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn mode(&self) -> StoreMode {
        self.inner.mode
    }

    /// Backing file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// True if both handles share one connection
    pub fn same_as(&self, other: &StoreHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run `f` against the connection.
    ///
    /// Calls on one handle are serialized; each completes before the next starts.
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.lock();
        let conn = guard.as_mut().ok_or(Error::StoreClosed(self.inner.id))?;
        f(conn)
    }

    /// Close the connection. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        let Some(conn) = self.lock().take() else {
            return false;
        };
        if let Err((_, err)) = conn.close() {
            tracing::warn!("Store #{} did not close cleanly: {}", self.inner.id, err);
        }
        true
    }

    /// Row counts of the entity tables
    pub fn stats(&self) -> Result<StoreStats> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<usize> {
                let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
                Ok(n as usize)
            };
            Ok(StoreStats {
                users: count("users")?,
                polls: count("polls")?,
                answers: count("answers")?,
                votes: count("votes")?,
            })
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.inner.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Store statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    pub users: usize,
    pub polls: usize,
    pub answers: usize,
    pub votes: usize,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Store Statistics:")?;
        writeln!(f, "  Users: {}", self.users)?;
        writeln!(f, "  Polls: {}", self.polls)?;
        writeln!(f, "  Answers: {}", self.answers)?;
        writeln!(f, "  Votes: {}", self.votes)
    }
}

/// Opens store handles, bootstraps their schema and tracks the
/// ephemeral and per-process ones so they can be closed together.
pub struct ConnectionManager {
    settings: StoreSettings,
    migrator: SchemaMigrator,
    next_id: AtomicU64,
    tracked: Mutex<Vec<StoreHandle>>,
}

impl ConnectionManager {
    pub fn new(settings: StoreSettings) -> Self {
        Self::with_migrator(settings, SchemaMigrator::new())
    }

    pub fn with_migrator(settings: StoreSettings, migrator: SchemaMigrator) -> Self {
        Self {
            settings,
            migrator,
            next_id: AtomicU64::new(1),
            tracked: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Open a new handle with the schema fully migrated.
    ///
    /// Every `Ephemeral` call yields a separate, empty database; reuse the
    /// returned handle to keep working with the same data.
    pub fn open(&self, mode: StoreMode) -> Result<StoreHandle> {
        self.open_with_report(mode).map(|(handle, _)| handle)
    }

    /// Like `open`, also reporting which migrations were applied
    pub fn open_with_report(&self, mode: StoreMode) -> Result<(StoreHandle, MigrationReport)> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = StoreHandle::open(id, mode, self.settings.location(mode), &self.settings)?;

        let report = match handle.with_conn(|conn| self.migrator.initialize(conn)) {
            Ok(report) => report,
            Err(err) => {
                handle.close();
                return Err(err);
            }
        };

        tracing::info!(
            "Opened {} store #{}{}",
            mode,
            id,
            handle.path().map(|p| format!(" at {}", p.display())).unwrap_or_default()
        );

        if mode.is_tracked() {
            self.lock_tracked().push(handle.clone());
        }
        Ok((handle, report))
    }

    /// Close one handle. Closing an already-closed handle only logs.
    pub fn close_one(&self, handle: &StoreHandle) {
        self.lock_tracked().retain(|h| !h.same_as(handle));
        if handle.close() {
            tracing::debug!("Closed store #{}", handle.id());
        } else {
            tracing::warn!("Store #{} was already closed", handle.id());
        }
    }

    /// Close every tracked handle
    pub fn close_all(&self) {
        let handles: Vec<StoreHandle> = self.lock_tracked().drain(..).collect();
        let mut closed = 0;
        for handle in &handles {
            if handle.close() {
                closed += 1;
            } else {
                tracing::warn!("Store #{} was already closed", handle.id());
            }
        }
        tracing::debug!("Closed {} of {} tracked store(s)", closed, handles.len());
    }

    /// Number of tracked handles that are still open
    pub fn tracked(&self) -> usize {
        self.lock_tracked().iter().filter(|h| h.is_open()).count()
    }

    /// Close this process's isolated handles and delete its database file
    pub fn purge_isolated(&self) -> Result<()> {
        let isolated: Vec<StoreHandle> = {
            let mut tracked = self.lock_tracked();
            let (isolated, rest): (Vec<StoreHandle>, Vec<StoreHandle>) = tracked
                .drain(..)
                .partition(|h| h.mode() == StoreMode::IsolatedDurable);
            *tracked = rest;
            isolated
        };
        for handle in &isolated {
            handle.close();
        }

        let path = self.settings.isolated_path();
        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.clone().into_os_string();
            file.push(suffix);
            let file = PathBuf::from(file);
            if file.exists() {
                std::fs::remove_file(&file)?;
            }
        }
        tracing::debug!("Purged isolated store at {}", path.display());
        Ok(())
    }

    fn lock_tracked(&self) -> MutexGuard<'_, Vec<StoreHandle>> {
        self.tracked.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
