//! The authoritative mapping from logged-in display name to live connection.
//!
//! Every lookup, mutation, and iteration goes through [`Registry`]. The lock
//! is a plain `std::sync::Mutex` because no operation here awaits; callers
//! get owned copies and do their network work after the lock is released.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    net::SocketAddr,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::DeliveryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates an id that is unique for the lifetime of the process.
    pub fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A non-owning reference to one session's connection.
///
/// The session task owns the socket. A handle can only queue lines into the
/// session's outbox, which the session drains and writes in order.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: SocketAddr,
    outbox: mpsc::Sender<String>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, peer: SocketAddr, outbox: mpsc::Sender<String>) -> Self {
        Self { id, peer, outbox }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queues a line without waiting.
    pub fn deliver(&self, line: String) -> Result<(), DeliveryError> {
        self.outbox.try_send(line).map_err(|err| match err {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

#[derive(Default)]
pub struct Registry {
    entries: Mutex<Entries>,
}

/// Both directions are updated under the same lock so they never disagree.
#[derive(Default)]
struct Entries {
    by_name: BTreeMap<String, ConnectionHandle>,
    by_id: HashMap<ConnectionId, String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `name → connection` only if the name is free and the
    /// connection is not already registered under another name.
    pub fn try_register(&self, name: &str, connection: &ConnectionHandle) -> bool {
        let mut entries = self.lock();

        if entries.by_name.contains_key(name) || entries.by_id.contains_key(&connection.id()) {
            return false;
        }

        entries
            .by_name
            .insert(name.to_string(), connection.clone());
        entries.by_id.insert(connection.id(), name.to_string());
        true
    }

    /// Removes the entry for `id` and returns the name it held.
    ///
    /// Calling this for an unknown or already removed connection is a no-op.
    pub fn unregister(&self, id: ConnectionId) -> Option<String> {
        let mut entries = self.lock();
        let name = entries.by_id.remove(&id)?;
        entries.by_name.remove(&name);
        Some(name)
    }

    pub fn lookup(&self, name: &str) -> Option<ConnectionHandle> {
        self.lock().by_name.get(name).cloned()
    }

    pub fn name_of(&self, id: ConnectionId) -> Option<String> {
        self.lock().by_id.get(&id).cloned()
    }

    /// Point-in-time copy of every registered connection, ordered by name.
    pub fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.lock().by_name.values().cloned().collect()
    }

    /// Point-in-time copy of every registered name, in order.
    pub fn names(&self) -> Vec<String> {
        self.lock().by_name.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        // No operation can panic between its two map updates.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
