//! Registry of live realtime connections.
//!
//! Every add, remove and broadcast takes the same mutex around the map, so
//! the three operations are linearizable with respect to each other and a
//! broadcast always iterates a membership that nobody else is mutating.
//! Sends never block while the lock is held: each connection owns a bounded
//! outbound queue drained by its socket task, and a full or closed queue
//! counts as a failed send.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;

/// Capacity of each connection's outbound frame queue.
pub const OUTBOUND_BUFFER: usize = 64;

/// One live realtime session.
#[derive(Debug)]
pub struct Connection {
    id: String,
    tx: mpsc::Sender<String>,
}

impl Connection {
    pub fn new(id: impl Into<String>, tx: mpsc::Sender<String>) -> Self {
        Self { id: id.into(), tx }
    }

    /// Create a connection together with the receiving end of its queue.
    pub fn channel(id: impl Into<String>) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        (Self::new(id, tx), rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Outcome of a single [`ConnectionRegistry::broadcast`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the frame was queued for.
    pub delivered: usize,
    /// Connections whose send failed; they are no longer registered.
    pub dropped: Vec<String>,
}

/// Thread-safe set of live connections keyed by connection ID.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        // Every critical section is a single map operation, so a poisoned
        // map is still consistent.
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `connection`, replacing any entry with the same ID.
    /// Returns the replaced connection, if any.
    pub fn add(&self, connection: Connection) -> Option<Connection> {
        let id = connection.id.clone();
        self.lock().insert(id, connection)
    }

    /// Remove the entry for `id`. Removing an absent ID is a no-op.
    pub fn remove(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Serialize `payload` once and queue it for every registered connection.
    ///
    /// Connections whose queue is closed or full are removed in the same
    /// critical section; their failure never reaches the caller.
    pub fn broadcast<T: Serialize + ?Sized>(&self, payload: &T) -> BroadcastReport {
        match serde_json::to_string(payload) {
            Ok(frame) => self.broadcast_frame(&frame),
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize broadcast payload");
                BroadcastReport::default()
            }
        }
    }

    /// Queue an already-serialized frame for every registered connection.
    pub fn broadcast_frame(&self, frame: &str) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        self.lock().retain(|id, connection| {
            match connection.tx.try_send(frame.to_string()) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(_) => {
                    report.dropped.push(id.clone());
                    false
                }
            }
        });

        for id in &report.dropped {
            tracing::warn!(connection_id = %id, "realtime send failed, connection dropped");
        }
        report
    }

    /// Drop every connection. Their socket tasks see the queue close and exit.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Connection> = self.lock().drain().map(|(_, c)| c).collect();
        drained.len()
    }
}
