//! Per-thread SQLite connections

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::lock_api::ArcReentrantMutexGuard;
use parking_lot::{Mutex, RawMutex, RawThreadId, ReentrantMutex};
use rusqlite::{Connection, OpenFlags};

use crate::config::StoreConfig;
use crate::{DatabaseError, Result};

type Slot = Arc<ReentrantMutex<Connection>>;
type SlotMap = Mutex<HashMap<ThreadId, Slot>>;

/// The calling thread's connection. Derefs to [`Connection`] and is
/// `!Send`, so it can never be used from another thread.
pub type ConnectionHandle = ArcReentrantMutexGuard<RawMutex, RawThreadId, Connection>;

/// Managers this thread has opened a connection through. On thread exit
/// each live manager drops the thread's entry.
struct ThreadSlots {
    thread: ThreadId,
    managers: RefCell<Vec<Weak<SlotMap>>>,
}

impl Drop for ThreadSlots {
    fn drop(&mut self) {
        for slots in self.managers.get_mut().drain(..) {
            if let Some(slots) = slots.upgrade() {
                let released = slots.lock().remove(&self.thread);
                drop(released);
            }
        }
    }
}

thread_local! {
    static THREAD_SLOTS: ThreadSlots = ThreadSlots {
        thread: thread::current().id(),
        managers: RefCell::new(Vec::new()),
    };
}

/// Hands each calling thread its own connection to the backing file.
///
/// Connections are opened lazily on a thread's first call. The manager owns
/// all of them: a thread's connection is closed by [`ConnectionManager::close`]
/// on that thread or when the thread exits, and dropping the manager closes
/// the connections of every thread at once.
#[derive(Debug)]
pub struct ConnectionManager {
    config: StoreConfig,
    slots: Arc<SlotMap>,
}

impl ConnectionManager {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config.database
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Get the calling thread's connection, opening it on first use
    pub fn get_connection(&self) -> Result<ConnectionHandle> {
        let thread = thread::current().id();
        let existing = self.slots.lock().get(&thread).cloned();
        if let Some(slot) = existing {
            return Ok(slot.lock_arc());
        }

        let slot: Slot = Arc::new(ReentrantMutex::new(self.open()?));
        self.slots.lock().insert(thread, Arc::clone(&slot));
        self.release_on_thread_exit();
        Ok(slot.lock_arc())
    }

    /// Whether the calling thread currently holds a connection
    pub fn has_connection(&self) -> bool {
        self.slots.lock().contains_key(&thread::current().id())
    }

    /// Number of threads currently holding a connection
    pub fn connection_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Release the calling thread's connection. No-op if it has none.
    pub fn close(&self) {
        let released = self.slots.lock().remove(&thread::current().id());
        if released.is_some() {
            tracing::debug!(path = %self.config.database.display(), "closed connection");
        }
    }

    fn release_on_thread_exit(&self) {
        // Fails only while this thread is already tearing down its locals
        let _ = THREAD_SLOTS.try_with(|local| {
            let mut managers = local.managers.borrow_mut();
            managers.retain(|slots| slots.strong_count() > 0);
            if !managers.iter().any(|slots| slots.as_ptr() == Arc::as_ptr(&self.slots)) {
                managers.push(Arc::downgrade(&self.slots));
            }
        });
    }

    #[cfg(test)]
    fn current_slot(&self) -> Option<Weak<ReentrantMutex<Connection>>> {
        self.slots.lock().get(&thread::current().id()).map(Arc::downgrade)
    }

    fn open(&self) -> Result<Connection> {
        let path = &self.config.database;
        let open_err = |source| DatabaseError::classify(path.clone(), source, |path, source| {
            DatabaseError::Open { path, source }
        });

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags).map_err(open_err)?;

        // Busy timeout first so the remaining pragmas also wait on contention
        conn.busy_timeout(self.config.busy_timeout()).map_err(open_err)?;
        conn.pragma_update(None, "foreign_keys", true).map_err(open_err)?;
        conn.pragma_update(None, "journal_mode", self.config.journal_mode.pragma_value())
            .map_err(open_err)?;
        conn.pragma_update(None, "synchronous", self.config.synchronous.pragma_value())
            .map_err(open_err)?;

        tracing::debug!(
            path = %path.display(),
            journal_mode = self.config.journal_mode.pragma_value(),
            synchronous = self.config.synchronous.pragma_value(),
            busy_timeout_ms = self.config.busy_timeout_ms,
            "opened connection"
        );
        Ok(conn)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let released: Vec<Slot> = self.slots.lock().drain().map(|(_, slot)| slot).collect();
        if !released.is_empty() {
            tracing::debug!(
                path = %self.config.database.display(),
                connections = released.len(),
                "closed connections"
            );
        }
    }
}
