//! Query registry and cancellation.
//!
//! Every executing query is registered under a [`QueryId`]. Killing a query
//! flips its [`KillSwitch`]: the cursor sees the flag on its next step, and
//! threads blocked on partition channels wake up because the switch's
//! notification channel disconnects.

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tessera_common::QueryId;
use tessera_common::utils::hash::{FastHashMap, fast_map};
use tracing::info;

/// Lifecycle state of a registered query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryState {
    /// Planned, not yet executing.
    Registered,
    /// Executing.
    Running,
    /// All results were produced.
    Completed,
    /// Killed by a caller.
    Killed,
    /// Aborted by an error.
    Failed,
}

impl QueryState {
    /// Returns true for states from which a query can still be killed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, QueryState::Registered | QueryState::Running | QueryState::Killed)
    }
}

/// Result of [`QueryRegistry::kill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// The query was active and is now marked killed.
    Killed,
    /// No active query has this id.
    NotFound,
}

/// Cancellation flag shared between a query's cursor and its workers.
pub struct KillSwitch {
    killed: AtomicBool,
    // Dropped on kill, which disconnects `listener`.
    notify: Mutex<Option<Sender<()>>>,
    listener: Receiver<()>,
}

impl KillSwitch {
    /// Creates an unset switch.
    #[must_use]
    pub fn new() -> Self {
        let (notify, listener) = channel::bounded(0);
        Self {
            killed: AtomicBool::new(false),
            notify: Mutex::new(Some(notify)),
            listener,
        }
    }

    /// Sets the flag and wakes every listener.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
        self.notify.lock().take();
    }

    /// Returns true once [`KillSwitch::kill`] was called.
    #[must_use]
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// A receiver that never yields a message and becomes ready
    /// (disconnected) when the switch is killed.
    #[must_use]
    pub fn listener(&self) -> Receiver<()> {
        self.listener.clone()
    }
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new()
    }
}

struct Entry {
    state: QueryState,
    switch: Arc<KillSwitch>,
}

/// Registry of the queries of one database.
pub struct QueryRegistry {
    queries: RwLock<FastHashMap<QueryId, Entry>>,
    next_id: AtomicU64,
}

impl QueryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queries: RwLock::new(fast_map()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new query and returns its id and kill switch.
    pub fn register(&self) -> (QueryId, Arc<KillSwitch>) {
        let id = QueryId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let switch = Arc::new(KillSwitch::new());
        self.queries.write().insert(
            id,
            Entry {
                state: QueryState::Registered,
                switch: Arc::clone(&switch),
            },
        );
        info!(query = %id, "query registered");
        (id, switch)
    }

    /// Marks a registered query as executing.
    pub fn mark_running(&self, id: QueryId) {
        if let Some(entry) = self.queries.write().get_mut(&id) {
            if entry.state == QueryState::Registered {
                entry.state = QueryState::Running;
            }
        }
    }

    /// Records the outcome of a query. A killed query stays killed.
    pub fn finish(&self, id: QueryId, success: bool) {
        if let Some(entry) = self.queries.write().get_mut(&id) {
            if entry.state != QueryState::Killed {
                entry.state = if success {
                    QueryState::Completed
                } else {
                    QueryState::Failed
                };
                info!(query = %id, state = ?entry.state, "query finished");
            }
        }
    }

    /// Kills an active query. Killing an already killed query succeeds
    /// again; finished or unknown queries are not found.
    pub fn kill(&self, id: QueryId) -> KillOutcome {
        let mut queries = self.queries.write();
        match queries.get_mut(&id) {
            Some(entry) if entry.state.is_active() => {
                entry.state = QueryState::Killed;
                entry.switch.kill();
                info!(query = %id, "query killed");
                KillOutcome::Killed
            }
            _ => KillOutcome::NotFound,
        }
    }

    /// Current state of a query, if it is still registered.
    #[must_use]
    pub fn state(&self, id: QueryId) -> Option<QueryState> {
        self.queries.read().get(&id).map(|e| e.state)
    }

    /// Ids of queries that are registered or running, ascending.
    #[must_use]
    pub fn running(&self) -> Vec<QueryId> {
        let mut ids: Vec<QueryId> = self
            .queries
            .read()
            .iter()
            .filter(|(_, e)| matches!(e.state, QueryState::Registered | QueryState::Running))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Removes a query.
    pub fn deregister(&self, id: QueryId) {
        self.queries.write().remove(&id);
    }
}

impl Default for QueryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
