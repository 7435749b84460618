//! Connection cache: one live driver connection per server and user mapping.
//!
//! Scans and modifies borrow connections from here for the duration of a
//! query. A connection flagged broken by the error classifier stays flagged
//! until the next [`ConnectionCache::acquire`] for its key replaces it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::classify::{Phase, escalate};
use crate::driver::types::code;
use crate::driver::{Driver, DriverConn, DriverError, DriverResult};
use crate::error::{Error, Result};
use crate::opts::Opts;

/// Identity of a cached connection: server address plus user mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnKey {
    pub host: String,
    pub port: u16,
    pub socket: Option<String>,
    pub user: String,
    pub database: Option<String>,
}

impl From<&Opts> for ConnKey {
    fn from(opts: &Opts) -> Self {
        Self {
            host: opts.host.clone(),
            port: opts.port,
            socket: opts.socket.clone(),
            user: opts.user.clone(),
            database: opts.database.clone(),
        }
    }
}

/// Session variables applied to every new connection.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SessionSettings {
    wait_timeout: u32,
    interactive_timeout: u32,
    sql_mode: String,
}

impl From<&Opts> for SessionSettings {
    fn from(opts: &Opts) -> Self {
        Self {
            wait_timeout: opts.wait_timeout,
            interactive_timeout: opts.interactive_timeout,
            sql_mode: opts.sql_mode.clone(),
        }
    }
}

impl SessionSettings {
    fn statements(&self) -> [String; 3] {
        [
            format!("SET wait_timeout = {}", self.wait_timeout),
            format!("SET interactive_timeout = {}", self.interactive_timeout),
            format!("SET sql_mode='{}'", self.sql_mode.replace('\'', "''")),
        ]
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A cached driver connection shared by the operations of one query.
pub struct Connection {
    id: u64,
    key: ConnKey,
    inner: Mutex<Box<dyn DriverConn>>,
    broken: AtomicBool,
    session: Mutex<Option<SessionSettings>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("broken", &self.is_broken())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Unique id of this handle; a reconnect yields a new id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &ConnKey {
        &self.key
    }

    /// Returns true if the connection was invalidated.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    pub(crate) fn mark_broken(&self) {
        if !self.broken.swap(true, Ordering::AcqRel) {
            warn!(conn_id = self.id, host = %self.key.host, "connection invalidated");
        }
    }

    /// Run driver calls with exclusive access to the connection.
    ///
    /// Fails with `CR_SERVER_GONE_ERROR` once the connection is broken.
    pub fn with<T>(&self, f: impl FnOnce(&mut dyn DriverConn) -> DriverResult<T>) -> DriverResult<T> {
        if self.is_broken() {
            return Err(DriverError::new(
                code::CR_SERVER_GONE_ERROR,
                "connection was invalidated",
            ));
        }
        let mut inner = self.inner.lock().map_err(|_| {
            DriverError::new(code::CR_UNKNOWN_ERROR, "connection lock poisoned")
        })?;
        f(inner.as_mut())
    }

    /// The `sql_mode` this connection's session runs with, once applied.
    pub fn sql_mode(&self) -> Option<String> {
        lock(&self.session).as_ref().map(|s| s.sql_mode.clone())
    }

    pub fn server_info(&self) -> DriverResult<String> {
        self.with(|c| Ok(c.server_info()))
    }

    /// Apply session variables unless this connection already runs with them.
    fn apply_session(&self, opts: &Opts) -> Result<()> {
        let wanted = SessionSettings::from(opts);
        let mut current = lock(&self.session);
        if current.as_ref() == Some(&wanted) {
            return Ok(());
        }
        for sql in wanted.statements() {
            self.with(|c| c.query(&sql))
                .map_err(|e| escalate(self, Phase::Execute, "failed to set session variables", e))?;
        }
        debug!(
            conn_id = self.id,
            wait_timeout = wanted.wait_timeout,
            interactive_timeout = wanted.interactive_timeout,
            sql_mode = %wanted.sql_mode,
            "session variables applied"
        );
        *current = Some(wanted);
        Ok(())
    }
}

/// Hands out live connections keyed by [`ConnKey`].
pub struct ConnectionCache {
    driver: Arc<dyn Driver>,
    conns: Mutex<HashMap<ConnKey, Arc<Connection>>>,
    next_id: AtomicU64,
}

impl ConnectionCache {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            conns: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Return the cached connection for `opts`, connecting if there is none
    /// or the cached one was invalidated.
    pub fn acquire(&self, opts: &Opts) -> Result<Arc<Connection>> {
        let key = ConnKey::from(opts);
        if let Some(conn) = self.live(&key) {
            conn.apply_session(opts)?;
            return Ok(conn);
        }

        // Connecting may block on the network; other keys stay available.
        let inner = self.driver.connect(opts).map_err(Error::Connect)?;
        let fresh = Arc::new(Connection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            key: key.clone(),
            inner: Mutex::new(inner),
            broken: AtomicBool::new(false),
            session: Mutex::new(None),
        });

        let conn = {
            let mut conns = lock(&self.conns);
            let cached = conns.get(&key).filter(|c| !c.is_broken()).cloned();
            match cached {
                Some(cached) => {
                    debug!(conn_id = fresh.id, kept = cached.id, "dropping redundant connection");
                    cached
                }
                None => {
                    debug!(conn_id = fresh.id, host = %key.host, port = key.port, user = %key.user, "connected");
                    conns.insert(key, Arc::clone(&fresh));
                    fresh
                }
            }
        };
        conn.apply_session(opts)?;
        Ok(conn)
    }

    /// The cached connection for `key`, evicting it if it was invalidated.
    fn live(&self, key: &ConnKey) -> Option<Arc<Connection>> {
        let mut conns = lock(&self.conns);
        let conn = conns.get(key)?;
        if !conn.is_broken() {
            return Some(Arc::clone(conn));
        }
        debug!(conn_id = conn.id, "replacing invalidated connection");
        conns.remove(key);
        None
    }

    /// Give back a connection after an operation. It stays cached.
    pub fn release(&self, conn: Arc<Connection>) {
        debug!(conn_id = conn.id, broken = conn.is_broken(), "connection released");
    }

    /// Drop a connection so the next acquire for its key reconnects.
    pub fn invalidate(&self, conn: &Connection) {
        conn.mark_broken();
        let mut conns = lock(&self.conns);
        if conns.get(&conn.key).is_some_and(|c| c.id == conn.id) {
            conns.remove(&conn.key);
        }
    }

    /// Drop every cached connection.
    pub fn cleanup(&self) {
        let mut conns = lock(&self.conns);
        debug!(count = conns.len(), "dropping cached connections");
        conns.clear();
    }

    /// Number of cached connections.
    pub fn len(&self) -> usize {
        lock(&self.conns).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
